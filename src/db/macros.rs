//! Backend dispatch macro.
//!
//! Pools and connections are enums with one variant per sqlx backend. This
//! macro expands the repetitive per-variant match arms at compile time.

/// Macro for generating backend dispatch match arms.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, pool, {
///     MySql(p) => p.close().await,
///     Postgres(p) => p.close().await,
///     SQLite(p) => p.close().await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($kind:ident, $value:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $crate::db::pool::$kind::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
