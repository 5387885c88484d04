//! Label keys and values attached to records.

/// NetworkNode that owns a SwitchPort, or that a NodeGroup member is.
pub const NETWORK_NODE: &str = "sdn/network-node";

/// Fabric a SwitchPort belongs to.
pub const FABRIC_TYPE: &str = "sdn/fabric-type";

/// Switch a SwitchPort or PortChannel lives on.
pub const SWITCH_FQDN: &str = "sdn/switch-fqdn";

/// NodeGroup a NetworkNode, host or switch is assigned to.
pub const NODE_GROUP: &str = "sdn/node-group";

/// Pool a NodeGroup currently belongs to.
pub const POOL: &str = "sdn/pool";

/// Pool-move state of a NodeGroup.
pub const MAINTENANCE: &str = "sdn/maintenance";

/// Group is being moved between pools; the aggregator leaves it alone.
pub const MAINTENANCE_IN_PROGRESS: &str = "in-progress";

/// Group moved; waiting until fabric readiness matches the pool defaults.
pub const MAINTENANCE_WAITING_FOR_READY: &str = "waiting-for-ready";

/// Record created by device-scan autodiscovery.
pub const AUTODISCOVERED: &str = "sdn/autodiscovered";

/// Role a switch was imported with from the device catalog.
pub const SWITCH_ROLE: &str = "sdn/switch-role";
