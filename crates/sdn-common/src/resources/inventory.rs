use super::ObjectMeta;
use sdn_types::MacAddress;
use serde::{Deserialize, Serialize};

/// Operational state reported by the bare-metal inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationalStatus {
    #[default]
    Discovered,
    Ok,
    Error,
    Detached,
}

/// One NIC and the switch port its LLDP neighbor reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicFact {
    pub mac: MacAddress,
    /// Neighbor switch system name.
    #[serde(default)]
    pub switch: String,
    /// Neighbor port id.
    #[serde(default)]
    pub port: String,
    /// Neighbor system description.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub lag_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostInventorySpec {
    #[serde(default)]
    pub operational_status: OperationalStatus,
    #[serde(default)]
    pub boot_mac: Option<MacAddress>,
    #[serde(default)]
    pub gpu_macs: Vec<MacAddress>,
    #[serde(default)]
    pub storage_macs: Vec<MacAddress>,
    #[serde(default)]
    pub nics: Vec<NicFact>,
    /// Reserved hosts cannot be moved between pools.
    #[serde(default)]
    pub reserved: bool,
}

/// Bare-metal host facts. The NodeGroup is taken from the
/// [`labels::NODE_GROUP`](crate::labels::NODE_GROUP) label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInventory {
    pub meta: ObjectMeta,
    pub spec: HostInventorySpec,
}

impl HostInventory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: ObjectMeta::new(name),
            spec: HostInventorySpec::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn nic(&self, mac: &MacAddress) -> Option<&NicFact> {
        self.spec.nics.iter().find(|n| &n.mac == mac)
    }
}
