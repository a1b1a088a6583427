//! Configuration resolution.
//!
//! Turns flat `mdb.<field>.<tenant>` entries into one [`ParameterRecord`] per
//! tenant identifier, then asks the configured [`Discovery`] for more tenants
//! when a bootstrap record is present.

use crate::db::discovery::{Discovery, NoDiscovery};
use crate::models::{Field, ParameterRecord};
use crate::settings::ConfigEntries;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix shared by every configuration key this crate reads.
pub const CONF_PREFIX: &str = "mdb.";

/// Identifier of the defaults record every tenant inherits from.
pub const ALL_KEY: &str = "all";

/// Identifier of the bootstrap record used for discovery.
pub const BOOTSTRAP_KEY: &str = "db";

/// Resolved records by tenant identifier, in identifier order.
pub type ResolvedParameters = BTreeMap<String, ParameterRecord>;

/// Parse flat entries into records, without discovery.
///
/// Entries outside the `mdb.` prefix are ignored. Unknown field names are
/// logged and skipped. A record without `mdb.key.<t>` is keyed by `<t>`.
pub fn parse_entries(entries: &ConfigEntries) -> ResolvedParameters {
    let mut resolved = ResolvedParameters::new();

    for (name, value) in entries.iter() {
        let Some(rest) = name.strip_prefix(CONF_PREFIX) else {
            continue;
        };
        let Some((field_name, tenant)) = rest.rsplit_once('.') else {
            warn!(entry = %name, "Configuration entry has no tenant suffix, skipping");
            continue;
        };
        if tenant.is_empty() {
            warn!(entry = %name, "Configuration entry has an empty tenant suffix, skipping");
            continue;
        }
        let Some(field) = Field::from_config_name(field_name) else {
            warn!(entry = %name, field = %field_name, "Unknown configuration field, skipping");
            continue;
        };

        let record = resolved.entry(tenant.to_string()).or_default();
        apply_parameter(field, value, record);
    }

    for (id, record) in resolved.iter_mut() {
        if record.key().is_none() && id != ALL_KEY {
            record.key = Some(id.clone());
        }
    }

    resolved
}

/// Set one field on a record. Shared by file parsing and runtime registration.
pub fn apply_parameter(field: Field, value: &str, record: &mut ParameterRecord) {
    if field == Field::DefaultSchema {
        debug!("Ignoring defaultschema setting");
        return;
    }
    record.set(field, value);
}

/// Map a registration entry name to a field.
///
/// The `mdb.` prefix is optional and any tenant suffix is ignored, so
/// `mdb.url.t9`, `mdb.url.`, `mdb.url` and `url` all name the url field. The
/// longest matching field name wins (`pool.maxSize.t9` is not `pool`).
pub fn field_for_name(name: &str) -> Option<Field> {
    let name = name.strip_prefix(CONF_PREFIX).unwrap_or(name);
    Field::ALL
        .into_iter()
        .filter(|field| {
            let field_name = field.config_name();
            name.strip_prefix(field_name)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
        })
        .max_by_key(|field| field.config_name().len())
}

/// Resolves configuration entries into the desired set of tenants.
#[derive(Clone)]
pub struct ConfigResolver {
    discovery: Arc<dyn Discovery>,
}

impl ConfigResolver {
    pub fn new(discovery: Arc<dyn Discovery>) -> Self {
        Self { discovery }
    }

    /// A resolver that never queries a bootstrap database.
    pub fn without_discovery() -> Self {
        Self::new(Arc::new(NoDiscovery))
    }

    pub fn discovery(&self) -> &dyn Discovery {
        self.discovery.as_ref()
    }

    /// Resolve entries, merging discovered tenants under `"1".."N"`.
    ///
    /// A discovered record overwrites the key, url, user and pass of any
    /// record already resolved under the same identifier. The `all` and `db`
    /// records are never overwritten.
    pub async fn resolve(&self, entries: &ConfigEntries) -> ResolvedParameters {
        let mut resolved = parse_entries(entries);

        let Some(bootstrap) = resolved.get(BOOTSTRAP_KEY) else {
            return resolved;
        };
        let mut bootstrap = bootstrap.clone();
        if let Some(defaults) = resolved.get(ALL_KEY) {
            bootstrap.inherit(defaults);
        }
        resolved.insert(BOOTSTRAP_KEY.to_string(), bootstrap.clone());

        let discovered = self.discovery.discover(&bootstrap).await;
        debug!(
            discovery = self.discovery.name(),
            tenants = discovered.len(),
            "Merging discovered tenants"
        );

        for (index, found) in discovered.into_iter().enumerate() {
            let id = (index + 1).to_string();
            if id == ALL_KEY || id == BOOTSTRAP_KEY {
                continue;
            }
            let record = resolved.entry(id).or_default();
            record.key = found.key;
            record.url = found.url;
            record.user = found.user;
            record.pass = found.pass;
        }

        resolved
    }
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("discovery", &self.discovery.name())
            .finish()
    }
}
