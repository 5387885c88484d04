use super::ObjectMeta;
use crate::naming;
use chrono::{DateTime, Utc};
use sdn_types::{LinkStatus, Managed, PortMode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Convergence phase of a SwitchPort or PortChannel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortPhase {
    /// No observed state yet.
    #[default]
    Discovering,
    /// A diff was pushed and has not been observed back yet.
    Syncing,
    Converged,
    /// Every desired field is unmanaged.
    Unmaintained,
    /// Maintenance or read-only mode holds back a pending diff.
    Blocked,
}

impl fmt::Display for PortPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortPhase::Discovering => "discovering",
            PortPhase::Syncing => "syncing",
            PortPhase::Converged => "converged",
            PortPhase::Unmaintained => "unmaintained",
            PortPhase::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// One Ethernet interface of a switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchPort {
    pub meta: ObjectMeta,
    pub spec: SwitchPortSpec,
    #[serde(default)]
    pub status: SwitchPortStatus,
}

/// Desired state. Every field is optional: `None`, `-1` and `""` leave the
/// device value alone.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SwitchPortSpec {
    /// Device interface name (e.g. `Ethernet27/1`).
    pub name: String,
    pub switch_fqdn: String,
    #[serde(default)]
    pub mode: Option<PortMode>,
    #[serde(default)]
    pub vlan: Managed,
    #[serde(default)]
    pub native_vlan: Managed,
    #[serde(default)]
    pub trunk_groups: Option<Vec<String>>,
    /// `0` removes the port from any port-channel, `N` joins `Port-Channel<N>`.
    #[serde(default)]
    pub port_channel: Managed,
    #[serde(default)]
    pub description: String,
}

/// Last observed device state. `0` means "not set on the device".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SwitchPortStatus {
    pub mode: Option<PortMode>,
    pub vlan: i64,
    pub native_vlan: i64,
    pub trunk_groups: Vec<String>,
    pub port_channel: i64,
    pub description: String,
    pub link_status: LinkStatus,
    pub phase: PortPhase,
    /// Field names held back by maintenance or read-only mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<String>,
    pub last_observed: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl SwitchPort {
    pub fn new(switch_fqdn: &str, port: &str) -> Self {
        Self {
            meta: ObjectMeta::new(naming::switch_port_name(port, switch_fqdn)),
            spec: SwitchPortSpec {
                name: port.to_string(),
                switch_fqdn: switch_fqdn.to_string(),
                ..Default::default()
            },
            status: SwitchPortStatus::default(),
        }
    }

    pub fn key(&self) -> &str {
        &self.meta.name
    }
}

impl SwitchPortSpec {
    /// Clears every managed field, leaving the device as it is.
    pub fn reset_to_unmaintained(&mut self) {
        self.mode = None;
        self.vlan = Managed::Unmanaged;
        self.native_vlan = Managed::Unmanaged;
        self.trunk_groups = None;
        self.port_channel = Managed::Unmanaged;
        self.description.clear();
    }

    pub fn is_unmaintained(&self) -> bool {
        self.mode.is_none()
            && self.vlan.is_unmanaged()
            && self.native_vlan.is_unmanaged()
            && self.trunk_groups.is_none()
            && self.port_channel.is_unmanaged()
            && self.description.is_empty()
    }
}

impl SwitchPortStatus {
    pub fn has_observation(&self) -> bool {
        self.last_observed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_port_key() {
        let port = SwitchPort::new("leaf1.sdn.test", "Ethernet27/1");
        assert_eq!(port.key(), "ethernet27-1.leaf1.sdn.test");
        assert!(port.spec.is_unmaintained());
        assert_eq!(port.status.phase, PortPhase::Discovering);
    }

    #[test]
    fn test_reset_to_unmaintained() {
        let mut spec = SwitchPortSpec {
            name: "Ethernet1".to_string(),
            switch_fqdn: "leaf1".to_string(),
            mode: Some(PortMode::Trunk),
            vlan: Managed::Value(100),
            native_vlan: Managed::Value(55),
            trunk_groups: Some(vec!["tg1".to_string()]),
            port_channel: Managed::Value(10),
            description: "server 4".to_string(),
        };
        spec.reset_to_unmaintained();
        assert!(spec.is_unmaintained());
        assert_eq!(spec.name, "Ethernet1");
    }

    #[test]
    fn test_spec_serde_sentinels() {
        let spec: SwitchPortSpec = serde_json::from_str(
            r#"{"name":"Ethernet1","switch_fqdn":"leaf1","vlan":-1,"port_channel":0}"#,
        )
        .unwrap();
        assert_eq!(spec.vlan, Managed::Unmanaged);
        assert_eq!(spec.port_channel, Managed::Value(0));
        assert_eq!(spec.native_vlan, Managed::Unmanaged);
    }
}
