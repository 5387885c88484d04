use super::{ObjectMeta, PortPhase};
use crate::{labels, naming};
use chrono::{DateTime, Utc};
use sdn_types::{InterfaceRole, LinkStatus, Managed, PortMode};
use serde::{Deserialize, Serialize};

/// A port-channel on one switch, keyed `po<N>.<fqdn>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortChannel {
    pub meta: ObjectMeta,
    pub spec: PortChannelSpec,
    #[serde(default)]
    pub status: PortChannelStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortChannelSpec {
    pub id: u32,
    pub switch_fqdn: String,
    #[serde(default)]
    pub mode: Option<PortMode>,
    #[serde(default)]
    pub vlan: Managed,
    #[serde(default)]
    pub native_vlan: Managed,
    #[serde(default)]
    pub trunk_groups: Option<Vec<String>>,
    #[serde(default)]
    pub description: String,
    /// Spine port-channels are status-only.
    #[serde(default)]
    pub role: InterfaceRole,
    /// Record was created from a device scan, not from a desired write.
    #[serde(default)]
    pub autodiscovered: bool,
    /// Set by the API's explicit delete. The only path that removes the
    /// port-channel from the device.
    #[serde(default)]
    pub delete_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortChannelStatus {
    /// Port-channel exists on the device.
    pub present: bool,
    pub mode: Option<PortMode>,
    pub vlan: i64,
    pub native_vlan: i64,
    pub trunk_groups: Vec<String>,
    pub description: String,
    /// Member Ethernet interfaces.
    pub members: Vec<String>,
    pub link_status: LinkStatus,
    pub phase: PortPhase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<String>,
    pub last_observed: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl PortChannel {
    pub fn new(switch_fqdn: &str, id: u32) -> Self {
        Self {
            meta: ObjectMeta::new(naming::port_channel_name(id, switch_fqdn))
                .with_label(labels::SWITCH_FQDN, switch_fqdn),
            spec: PortChannelSpec {
                id,
                switch_fqdn: switch_fqdn.to_string(),
                ..Default::default()
            },
            status: PortChannelStatus::default(),
        }
    }

    /// Status-only record for a port-channel found on the device.
    pub fn autodiscovered(switch_fqdn: &str, id: u32, role: InterfaceRole) -> Self {
        let mut pc = Self::new(switch_fqdn, id);
        pc.meta.set_label(labels::AUTODISCOVERED, "true");
        pc.spec.autodiscovered = true;
        pc.spec.role = role;
        pc
    }

    pub fn key(&self) -> &str {
        &self.meta.name
    }

    pub fn interface(&self) -> String {
        naming::port_channel_interface(self.spec.id)
    }

    pub fn is_spine(&self) -> bool {
        self.spec.role.is_spine()
    }
}

impl PortChannelSpec {
    /// True if any attribute is managed.
    pub fn has_managed_fields(&self) -> bool {
        self.mode.is_some()
            || !self.vlan.is_unmanaged()
            || !self.native_vlan.is_unmanaged()
            || self.trunk_groups.is_some()
            || !self.description.is_empty()
    }
}
