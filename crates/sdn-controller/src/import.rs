//! Switch import from the device catalog.
//!
//! The catalog has served two response shapes over time. Both are parsed
//! into one [`ImportedSwitch`] before Switch records are written.

use crate::config::Settings;
use sdn_common::resources::Switch;
use sdn_common::validation::validate_ipv4;
use sdn_common::{labels, SdnError, SdnResult};
use sdn_reconcile::{mutate, StateStore};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct NamedRef {
    #[serde(alias = "slug")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressRef {
    pub address: String,
}

/// One device entry as returned by the catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CatalogDevice {
    Current {
        name: String,
        role: NamedRef,
        #[serde(default)]
        primary_ip4: Option<AddressRef>,
    },
    Legacy {
        name: String,
        device_role: NamedRef,
        #[serde(default)]
        primary_ip: Option<AddressRef>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogResponse {
    Paged { results: Vec<CatalogDevice> },
    List(Vec<CatalogDevice>),
}

/// Parses a catalog response, paged (`{"results": [...]}`) or a bare list.
pub fn parse_catalog(body: &str) -> SdnResult<Vec<CatalogDevice>> {
    let response: CatalogResponse = serde_json::from_str(body)
        .map_err(|e| SdnError::validation("catalog", format!("unrecognized response: {}", e)))?;
    Ok(match response {
        CatalogResponse::Paged { results } => results,
        CatalogResponse::List(devices) => devices,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedSwitch {
    pub fqdn: String,
    pub ip: String,
    pub role: String,
}

impl CatalogDevice {
    fn parts(&self) -> (&str, &str, Option<&str>) {
        match self {
            CatalogDevice::Current {
                name,
                role,
                primary_ip4,
            } => (
                name.as_str(),
                role.name.as_str(),
                primary_ip4.as_ref().map(|a| a.address.as_str()),
            ),
            CatalogDevice::Legacy {
                name,
                device_role,
                primary_ip,
            } => (
                name.as_str(),
                device_role.name.as_str(),
                primary_ip.as_ref().map(|a| a.address.as_str()),
            ),
        }
    }

    /// Normalizes the entry: lower-cased FQDN within `settings.fqdn_domain`,
    /// management IP without prefix length, FQDN as fallback address.
    pub fn normalize(&self, settings: &Settings) -> SdnResult<ImportedSwitch> {
        let (name, role, address) = self.parts();
        let name = name.trim().trim_end_matches('.').to_lowercase();
        if name.is_empty() {
            return Err(SdnError::validation("catalog", "device without a name"));
        }
        let fqdn = if name.contains('.') || settings.fqdn_domain.is_empty() {
            name
        } else {
            format!("{}.{}", name, settings.fqdn_domain)
        };
        settings.fqdn_policy.validate(&fqdn)?;

        let ip = address
            .map(|a| a.split('/').next().unwrap_or(a).trim())
            .filter(|a| !a.is_empty())
            .and_then(|a| match validate_ipv4(&fqdn, a) {
                Ok(ip) => Some(ip.to_string()),
                Err(e) => {
                    warn!(switch = %fqdn, error = %e, "ignoring catalog address");
                    None
                }
            })
            .unwrap_or_else(|| fqdn.clone());

        Ok(ImportedSwitch {
            fqdn,
            ip,
            role: role.trim().to_lowercase(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
}

/// Writes catalog devices into the Switch store.
pub struct SwitchImporter {
    switches: Arc<dyn StateStore<Switch>>,
    settings: Arc<Settings>,
}

impl SwitchImporter {
    pub fn new(switches: Arc<dyn StateStore<Switch>>, settings: Arc<Settings>) -> Self {
        Self { switches, settings }
    }

    /// Creates missing switches and patches the address and role of known ones.
    pub async fn import(&self, devices: &[CatalogDevice]) -> SdnResult<ImportReport> {
        let mut report = ImportReport::default();
        for device in devices {
            let imported = match device.normalize(&self.settings) {
                Ok(imported) => imported,
                Err(e) => {
                    warn!(error = %e, "skipping catalog device");
                    report.skipped.push(device.parts().0.to_string());
                    continue;
                }
            };

            if self.switches.get(&imported.fqdn).await?.is_none() {
                let mut switch = Switch::new(&imported.fqdn, &imported.ip);
                switch.meta.set_label(labels::SWITCH_ROLE, &imported.role);
                match self.switches.create(&imported.fqdn, switch).await {
                    Ok(_) => {
                        info!(switch = %imported.fqdn, ip = %imported.ip, "imported switch");
                        report.created.push(imported.fqdn);
                        continue;
                    }
                    Err(e) if e.is_conflict() => {
                        debug!(switch = %imported.fqdn, "switch created concurrently");
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let before = self.switches.get(&imported.fqdn).await?.map(|r| r.version);
            let after = mutate(self.switches.as_ref(), &imported.fqdn, |s: &mut Switch| {
                s.spec.ip = imported.ip.clone();
                s.meta.set_label(labels::SWITCH_ROLE, &imported.role);
            })
            .await?;
            if before != Some(after.version) {
                info!(switch = %imported.fqdn, ip = %imported.ip, "updated imported switch");
                report.updated.push(imported.fqdn);
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use pretty_assertions::assert_eq;
    use sdn_common::kinds;
    use sdn_reconcile::MemoryStore;

    fn settings() -> Arc<Settings> {
        let mut config = ControllerConfig::default();
        config.inventory.fqdn_domain = "sdn.test".to_string();
        Arc::new(Settings::from_config(&config).unwrap())
    }

    #[test]
    fn test_both_schemas_normalize_alike() {
        let current = r#"{"results": [
            {"name": "DC1-FE-LEAF1", "role": {"slug": "leaf"},
             "primary_ip4": {"address": "10.0.0.1/24"}}
        ]}"#;
        let legacy = r#"[
            {"name": "dc1-fe-leaf1.sdn.test", "device_role": {"name": "Leaf"},
             "primary_ip": {"address": "10.0.0.1/24"}}
        ]"#;
        let settings = settings();

        let a = parse_catalog(current).unwrap()[0].normalize(&settings).unwrap();
        let b = parse_catalog(legacy).unwrap()[0].normalize(&settings).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a,
            ImportedSwitch {
                fqdn: "dc1-fe-leaf1.sdn.test".to_string(),
                ip: "10.0.0.1".to_string(),
                role: "leaf".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_ip_falls_back_to_fqdn() {
        let devices =
            parse_catalog(r#"[{"name": "dc1-fe-leaf2", "role": {"name": "leaf"}}]"#).unwrap();
        let imported = devices[0].normalize(&settings()).unwrap();
        assert_eq!(imported.ip, "dc1-fe-leaf2.sdn.test");
    }

    #[test]
    fn test_rejects_unknown_shape() {
        assert!(parse_catalog(r#"{"devices": []}"#).is_err());
        assert!(parse_catalog(r#"[{"name": "x"}]"#).is_err());
    }

    #[tokio::test]
    async fn test_import_creates_and_patches() {
        let store: Arc<dyn StateStore<Switch>> = Arc::new(MemoryStore::new(kinds::SWITCH));
        let importer = SwitchImporter::new(Arc::clone(&store), settings());

        let devices = parse_catalog(
            r#"[{"name": "dc1-fe-leaf1", "role": {"name": "leaf"},
                 "primary_ip4": {"address": "10.0.0.1/24"}},
                {"name": "bad name!", "role": {"name": "leaf"}}]"#,
        )
        .unwrap();
        let report = importer.import(&devices).await.unwrap();
        assert_eq!(report.created, vec!["dc1-fe-leaf1.sdn.test".to_string()]);
        assert_eq!(report.skipped, vec!["bad name!".to_string()]);

        // Unchanged import is a no-op
        let report = importer.import(&devices).await.unwrap();
        assert!(report.created.is_empty());
        assert!(report.updated.is_empty());

        let moved = parse_catalog(
            r#"[{"name": "dc1-fe-leaf1", "role": {"name": "leaf"},
                 "primary_ip4": {"address": "10.0.0.9/24"}}]"#,
        )
        .unwrap();
        let report = importer.import(&moved).await.unwrap();
        assert_eq!(report.updated, vec!["dc1-fe-leaf1.sdn.test".to_string()]);
        let switch = store.get("dc1-fe-leaf1.sdn.test").await.unwrap().unwrap();
        assert_eq!(switch.value.spec.ip, "10.0.0.9");
        assert_eq!(switch.value.meta.label(labels::SWITCH_ROLE), Some("leaf"));
    }
}
