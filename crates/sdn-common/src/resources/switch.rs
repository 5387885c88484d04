use super::ObjectMeta;
use chrono::{DateTime, Utc};
use sdn_types::Managed;
use serde::{Deserialize, Serialize};

/// A managed top-of-rack switch, keyed by FQDN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Switch {
    pub meta: ObjectMeta,
    pub spec: SwitchSpec,
    #[serde(default)]
    pub status: SwitchStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SwitchSpec {
    pub fqdn: String,
    /// Management address from inventory. Falls back to the FQDN when empty.
    #[serde(default)]
    pub ip: String,
    /// Operator-provided address used instead of `ip` when valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_override: Option<String>,
    /// Blocks every device mutation on this switch while set.
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default)]
    pub bgp_community: Managed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SwitchStatus {
    pub reachable: bool,
    /// Address the controller connects to.
    pub resolved_address: Option<String>,
    pub last_pushed_bgp: Managed,
    pub last_observed_bgp: Managed,
    pub last_refresh: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl Switch {
    pub fn new(fqdn: impl Into<String>, ip: impl Into<String>) -> Self {
        let fqdn = fqdn.into();
        Self {
            meta: ObjectMeta::new(fqdn.clone()),
            spec: SwitchSpec {
                fqdn,
                ip: ip.into(),
                ..Default::default()
            },
            status: SwitchStatus::default(),
        }
    }

    pub fn fqdn(&self) -> &str {
        &self.spec.fqdn
    }

    /// Observed BGP community differs from a managed desired value.
    pub fn bgp_drifted(&self) -> bool {
        match self.spec.bgp_community {
            Managed::Unmanaged => false,
            desired => desired != self.status.last_observed_bgp,
        }
    }
}
