use super::ObjectMeta;
use sdn_types::FabricType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Smallest unit the pool hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulableUnit {
    /// Fabric values are set once for the whole group.
    #[default]
    NodeGroup,
    /// Fabric values are set per node; group values stay empty.
    NetworkNode,
}

/// How a fabric is isolated inside a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Vlan,
    Bgp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStrategy {
    pub kind: StrategyKind,
    /// VLAN or BGP community applied when a group joins the pool.
    pub default_value: i64,
}

/// A named policy bucket node groups are mapped into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    #[serde(default)]
    pub schedulable_unit: SchedulableUnit,
    #[serde(default)]
    pub strategies: BTreeMap<FabricType, NetworkStrategy>,
}

impl Pool {
    pub fn strategy(&self, fabric: FabricType) -> Option<&NetworkStrategy> {
        self.strategies.get(&fabric)
    }
}

/// Group to pool assignment. Its presence turns fabric propagation on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMapping {
    pub meta: ObjectMeta,
    pub group: String,
    pub pool: String,
}

impl PoolMapping {
    pub fn new(group: impl Into<String>, pool: impl Into<String>) -> Self {
        let group = group.into();
        Self {
            meta: ObjectMeta::new(group.clone()),
            group,
            pool: pool.into(),
        }
    }
}
