//! Reconcilers, one per record kind.

pub mod inventory;
pub mod network_node;
pub mod node_group;
pub mod pool;
pub mod port_channel;
pub mod switch;
pub mod switch_port;

#[cfg(test)]
pub(crate) mod testing;

pub use inventory::InventoryReconciler;
pub use network_node::NetworkNodeReconciler;
pub use node_group::NodeGroupReconciler;
pub use pool::PoolReconciler;
pub use port_channel::PortChannelReconciler;
pub use switch::SwitchReconciler;
pub use switch_port::SwitchPortReconciler;
