use super::ObjectMeta;
use crate::labels;
use sdn_types::{FabricType, Managed};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A set of NetworkNodes that share fabric scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub meta: ObjectMeta,
    pub spec: NodeGroupSpec,
    #[serde(default)]
    pub status: NodeGroupStatus,
}

/// Desired value of one fabric for the whole group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FabricConfig {
    #[serde(default)]
    pub vlan: Managed,
    #[serde(default)]
    pub bgp_community: Managed,
}

impl FabricConfig {
    pub fn is_empty(&self) -> bool {
        self.vlan.is_unmanaged() && self.bgp_community.is_unmanaged()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeGroupSpec {
    #[serde(default)]
    pub network_nodes: BTreeSet<String>,
    #[serde(default)]
    pub fabrics: BTreeMap<FabricType, FabricConfig>,
}

/// Per-fabric readiness, reported independently.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FabricReadiness {
    /// `ready/total`, counted in nodes for VLAN fabrics and in switches for
    /// BGP fabrics.
    pub ready: String,
    pub ready_count: usize,
    pub total: usize,
    /// Value last observed on every constituent.
    pub last_ready_vlan: Managed,
    pub last_ready_bgp_community: Managed,
    pub in_sync: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeGroupStatus {
    pub fabrics: BTreeMap<FabricType, FabricReadiness>,
    pub leaf_switches: BTreeMap<FabricType, BTreeSet<String>>,
    pub message: Option<String>,
}

impl NodeGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: ObjectMeta::new(name),
            spec: NodeGroupSpec::default(),
            status: NodeGroupStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn fabric(&self, fabric: FabricType) -> FabricConfig {
        self.spec.fabrics.get(&fabric).copied().unwrap_or_default()
    }

    pub fn pool(&self) -> Option<&str> {
        self.meta.label(labels::POOL)
    }

    pub fn maintenance(&self) -> Option<&str> {
        self.meta.label(labels::MAINTENANCE)
    }

    pub fn is_locked(&self) -> bool {
        self.maintenance() == Some(labels::MAINTENANCE_IN_PROGRESS)
    }

    /// Every fabric reports `in_sync`.
    pub fn all_in_sync(&self) -> bool {
        self.status.fabrics.values().all(|f| f.in_sync)
    }
}
