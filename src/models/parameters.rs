//! Tenant connection parameters.
//!
//! A [`ParameterRecord`] holds one tenant's connection identity, credentials
//! and pool tuning, all as the raw strings found in configuration. Records are
//! built fresh on every resolution pass and never mutated once published.

use serde::{Deserialize, Serialize};

/// One field of a [`ParameterRecord`], as named in configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Key,
    Url,
    Driver,
    User,
    Pass,
    Sql,
    UrlPrefix,
    PoolTimeout,
    IdleTime,
    PoolMaxSize,
    PoolMinSize,
    /// Accepted for compatibility, carries no value.
    DefaultSchema,
}

impl Field {
    pub const ALL: [Field; 12] = [
        Field::Key,
        Field::Url,
        Field::Driver,
        Field::User,
        Field::Pass,
        Field::Sql,
        Field::UrlPrefix,
        Field::PoolTimeout,
        Field::IdleTime,
        Field::PoolMaxSize,
        Field::PoolMinSize,
        Field::DefaultSchema,
    ];

    /// Name of the field between the `mdb.` prefix and the tenant suffix.
    pub fn config_name(&self) -> &'static str {
        match self {
            Field::Key => "key",
            Field::Url => "url",
            Field::Driver => "driver",
            Field::User => "user",
            Field::Pass => "pass",
            Field::Sql => "sql",
            Field::UrlPrefix => "urlprefix",
            Field::PoolTimeout => "pool.timeout",
            Field::IdleTime => "pool.maxIdleTime",
            Field::PoolMaxSize => "pool.maxSize",
            Field::PoolMinSize => "pool.minSize",
            Field::DefaultSchema => "defaultschema",
        }
    }

    /// Look up a field by its configuration name.
    pub fn from_config_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.config_name() == name)
    }
}

/// Credentials a connection authenticates with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Login {
    pub user: Option<String>,
    pub pass: Option<String>,
}

/// Connection parameters for one tenant, or for the `all` defaults record.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRecord {
    /// Tenant key used by routing lookups.
    pub key: Option<String>,
    pub url: Option<String>,
    pub driver: Option<String>,
    pub user: Option<String>,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub pass: Option<String>,
    /// Discovery query, only meaningful on the bootstrap record.
    pub sql: Option<String>,
    /// Prepended to every discovered URL, only meaningful on the bootstrap record.
    pub url_prefix: Option<String>,
    /// Milliseconds to wait for a pooled connection.
    pub pool_timeout: Option<String>,
    /// Milliseconds before an idle pooled connection is closed.
    pub idle_time: Option<String>,
    pub pool_max_size: Option<String>,
    pub pool_min_size: Option<String>,
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(str::is_empty)
}

/// First non-empty wins: keep `slot` unless it is blank.
fn default_if_empty(slot: &mut Option<String>, fallback: &Option<String>) {
    if is_blank(slot) {
        slot.clone_from(fallback);
    }
}

impl ParameterRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill every unset field (except `key`) from `defaults`.
    ///
    /// Values already present on `self` are never overwritten, so applying the
    /// same defaults twice yields the same record as applying them once.
    pub fn inherit(&mut self, defaults: &ParameterRecord) {
        default_if_empty(&mut self.driver, &defaults.driver);
        default_if_empty(&mut self.pass, &defaults.pass);
        default_if_empty(&mut self.user, &defaults.user);
        default_if_empty(&mut self.pool_max_size, &defaults.pool_max_size);
        default_if_empty(&mut self.pool_min_size, &defaults.pool_min_size);
        default_if_empty(&mut self.pool_timeout, &defaults.pool_timeout);
        default_if_empty(&mut self.idle_time, &defaults.idle_time);
        default_if_empty(&mut self.url_prefix, &defaults.url_prefix);
        default_if_empty(&mut self.sql, &defaults.sql);
        default_if_empty(&mut self.url, &defaults.url);
    }

    /// Set one field from a configuration value.
    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let value = Some(value.into());
        match field {
            Field::Key => self.key = value,
            Field::Url => self.url = value,
            Field::Driver => self.driver = value,
            Field::User => self.user = value,
            Field::Pass => self.pass = value,
            Field::Sql => self.sql = value,
            Field::UrlPrefix => self.url_prefix = value,
            Field::PoolTimeout => self.pool_timeout = value,
            Field::IdleTime => self.idle_time = value,
            Field::PoolMaxSize => self.pool_max_size = value,
            Field::PoolMinSize => self.pool_min_size = value,
            Field::DefaultSchema => {}
        }
    }

    /// Tenant key, if set and non-empty.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }

    /// True when both driver and url are set, the minimum for a usable tenant.
    pub fn is_complete(&self) -> bool {
        !is_blank(&self.driver) && !is_blank(&self.url)
    }

    /// Credentials connections for this tenant authenticate with.
    pub fn login(&self) -> Login {
        Login {
            user: self.user.clone().filter(|u| !u.is_empty()),
            pass: self.pass.clone(),
        }
    }

    /// URL with any embedded password masked, safe to log.
    pub fn masked_url(&self) -> String {
        self.url.as_deref().map(mask_url).unwrap_or_default()
    }
}

impl std::fmt::Debug for ParameterRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterRecord")
            .field("key", &self.key)
            .field("url", &self.url.as_deref().map(mask_url))
            .field("driver", &self.driver)
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "****"))
            .field("sql", &self.sql)
            .field("url_prefix", &self.url_prefix)
            .field("pool_timeout", &self.pool_timeout)
            .field("idle_time", &self.idle_time)
            .field("pool_max_size", &self.pool_max_size)
            .field("pool_min_size", &self.pool_min_size)
            .finish()
    }
}

/// Mask the password component of a connection URL.
pub fn mask_url(raw: &str) -> String {
    let (jdbc, rest) = match raw.strip_prefix("jdbc:") {
        Some(rest) => ("jdbc:", rest),
        None => ("", raw),
    };

    if let Ok(mut parsed) = url::Url::parse(rest) {
        if parsed.password().is_some() && parsed.set_password(Some("****")).is_ok() {
            return format!("{}{}", jdbc, parsed);
        }
        return raw.to_string();
    }

    // Simple masking for strings the URL parser rejects
    if let Some(at_pos) = raw.find('@') {
        if let Some(colon_pos) = raw[..at_pos].rfind(':') {
            if !raw[..colon_pos].ends_with('/') {
                return format!("{}****{}", &raw[..colon_pos + 1], &raw[at_pos..]);
            }
        }
    }
    raw.to_string()
}
