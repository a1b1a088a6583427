//! Data models for the tenant router.
//!
//! This module re-exports all model types used throughout the application.

pub mod driver;
pub mod parameters;

// Re-export commonly used types
pub use driver::{DatabaseType, sqlx_url};
pub use parameters::{Field, Login, ParameterRecord, mask_url};
