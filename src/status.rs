//! Human-readable status of the published registry.

use crate::db::registry::Registry;

const RULE: &str = "=================================================";
const UNDERLINE: &str = "~~~~~~~~~~~";

/// Render a text report: one block per pool with the tenants routed to it.
pub fn status_report(registry: &Registry) -> String {
    let mut output = String::new();
    output.push_str("         Multiple DB sources:\n");
    output.push_str(RULE);
    output.push('\n');

    if registry.pool_count() == 0 {
        output.push_str("Datasources:\n");
        output.push_str(UNDERLINE);
        output.push('\n');
        output.push_str("(not yet connected)\n");
        return output;
    }

    for pool in registry.pools() {
        let tenants = registry.tenants_for_url(pool.url());
        let primary = pool.primary();

        output.push_str(&format!("Datasource [{}]:\n", pool.masked_url()));
        output.push_str(UNDERLINE);
        output.push('\n');
        output.push_str(&format!("Driver: {}\n", pool.db_type()));
        output.push_str(&format!("Tenants: {}\n", tenants.join(", ")));
        output.push_str(&format!(
            "Pool size: {} ({} idle, max {})\n",
            primary.size(),
            primary.num_idle(),
            pool.settings().max_connections
        ));
        if pool.is_broken() {
            output.push_str("Status: BROKEN\n");
        }
        output.push('\n');
    }

    if let Some(at) = registry.reconciled_at() {
        output.push_str(&format!("Last reconciled: {}\n", at.to_rfc3339()));
    }
    output.push_str(RULE);
    output.push('\n');
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::provision::PoolProvisioner;
    use crate::models::ParameterRecord;
    use tempfile::TempDir;

    #[test]
    fn test_status_not_yet_connected() {
        let report = status_report(&Registry::new());
        assert!(report.contains("Multiple DB sources"));
        assert!(report.contains("(not yet connected)"));
    }

    #[tokio::test]
    async fn test_status_lists_pools_and_tenants() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("s.db").display());
        let mut registry = Registry::new();
        for key in ["one", "two"] {
            let record = ParameterRecord {
                key: Some(key.into()),
                url: Some(url.clone()),
                driver: Some("sqlite".into()),
                ..Default::default()
            };
            PoolProvisioner.provision(record, &mut registry).await.unwrap();
        }

        let report = status_report(&registry);
        assert!(report.contains(&format!("Datasource [{}]:", url)));
        assert!(report.contains("Tenants: one, two"));
        assert!(report.contains("Driver: SQLite"));
        assert!(!report.contains("not yet connected"));
    }
}
