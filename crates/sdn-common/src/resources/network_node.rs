use super::ObjectMeta;
use sdn_types::{FabricType, Managed, PortMode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One physical server and its fabric interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkNode {
    pub meta: ObjectMeta,
    pub spec: NetworkNodeSpec,
    #[serde(default)]
    pub status: NetworkNodeStatus,
}

/// A server NIC and the switch port it is cabled to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FabricInterface {
    pub fabric: FabricType,
    pub switch_fqdn: String,
    pub port: String,
    /// Port-channel the switch port is bundled into.
    #[serde(default)]
    pub port_channel: Managed,
}

/// Desired switchport settings for every interface of one fabric.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FabricSettings {
    #[serde(default)]
    pub mode: Option<PortMode>,
    #[serde(default)]
    pub vlan: Managed,
    #[serde(default)]
    pub native_vlan: Managed,
    #[serde(default)]
    pub trunk_groups: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkNodeSpec {
    /// Ordered interface list: one front-end, any number of accelerator
    /// plies, zero or more storage interfaces.
    pub interfaces: Vec<FabricInterface>,
    #[serde(default)]
    pub settings: BTreeMap<FabricType, FabricSettings>,
    /// Node is handed out to a tenant and may not change pools.
    #[serde(default)]
    pub reserved: bool,
}

/// Observed convergence of one fabric on one node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeFabricStatus {
    /// Observed VLAN when every port of the fabric reports the same one.
    pub vlan: Managed,
    pub ports_ready: usize,
    pub ports_total: usize,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkNodeStatus {
    pub fabrics: BTreeMap<FabricType, NodeFabricStatus>,
    pub message: Option<String>,
}

impl NetworkNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: ObjectMeta::new(name),
            spec: NetworkNodeSpec::default(),
            status: NetworkNodeStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn interfaces_for(&self, fabric: FabricType) -> impl Iterator<Item = &FabricInterface> {
        self.spec.interfaces.iter().filter(move |i| i.fabric == fabric)
    }

    /// Distinct leaf switches the node reaches on `fabric`.
    pub fn switches_for(&self, fabric: FabricType) -> BTreeSet<String> {
        self.interfaces_for(fabric)
            .map(|i| i.switch_fqdn.clone())
            .collect()
    }

    pub fn fabric_settings(&self, fabric: FabricType) -> FabricSettings {
        self.spec.settings.get(&fabric).cloned().unwrap_or_default()
    }

    pub fn fabric_status(&self, fabric: FabricType) -> NodeFabricStatus {
        self.status.fabrics.get(&fabric).cloned().unwrap_or_default()
    }
}
