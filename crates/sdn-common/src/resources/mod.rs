//! Declarative desired-state records and their observed-state mirrors.
//!
//! Each record has a `spec` (desired state, written by operators, the API
//! and the derivers) and a `status` (observed state, written only by
//! reconcilers and the status reporter).

mod inventory;
mod network_node;
mod node_group;
mod pool;
mod port_channel;
mod switch;
mod switch_port;

pub use inventory::{HostInventory, HostInventorySpec, NicFact, OperationalStatus};
pub use network_node::{
    FabricInterface, FabricSettings, NetworkNode, NetworkNodeSpec, NetworkNodeStatus,
    NodeFabricStatus,
};
pub use node_group::{FabricConfig, FabricReadiness, NodeGroup, NodeGroupSpec, NodeGroupStatus};
pub use pool::{NetworkStrategy, Pool, PoolMapping, SchedulableUnit, StrategyKind};
pub use port_channel::{PortChannel, PortChannelSpec, PortChannelStatus};
pub use switch::{Switch, SwitchSpec, SwitchStatus};
pub use switch_port::{PortPhase, SwitchPort, SwitchPortSpec, SwitchPortStatus};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Record kinds, as used for store names, events and dependency constraints.
pub mod kinds {
    pub const SWITCH: &str = "switch";
    pub const SWITCH_PORT: &str = "switchport";
    pub const PORT_CHANNEL: &str = "portchannel";
    pub const NETWORK_NODE: &str = "networknode";
    pub const NODE_GROUP: &str = "nodegroup";
    pub const POOL_MAPPING: &str = "poolmapping";
    pub const HOST_INVENTORY: &str = "hostinventory";
}

/// Reference to the record that owns another one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

impl OwnerRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Name, labels and owner shared by every record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerRef>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }

    pub fn with_owner(mut self, owner: OwnerRef) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn set_label(&mut self, key: &str, value: impl Into<String>) {
        self.labels.insert(key.to_string(), value.into());
    }

    pub fn remove_label(&mut self, key: &str) -> Option<String> {
        self.labels.remove(key)
    }

    pub fn is_owned_by(&self, kind: &str, name: &str) -> bool {
        self.owner
            .as_ref()
            .is_some_and(|o| o.kind == kind && o.name == name)
    }
}
