//! Switch client capability interface.
//!
//! Reconcilers never talk to a device directly. They go through:
//!
//! - [`SwitchClient`]: get/update/create/delete capability for one switch
//! - [`CountingSwitchClient`]: decorator counting every call by operation category
//! - [`SimulatedSwitch`]: in-memory device used by the `memory` backend and tests
//! - [`DeviceAccessManager`]: bounded-retry connection and per-switch client cache

mod access;
mod client;
mod counting;
mod metrics;
mod simulated;

pub use access::{ConnectPolicy, DeviceAccessManager, SimulatedLab, SwitchConnector};
pub use client::{InterfaceState, OperationCategory, SwitchClient, VlanInfo};
pub use counting::CountingSwitchClient;
pub use metrics::SwitchClientMetrics;
pub use simulated::{DeviceSeed, PortChannelSeed, SimulatedSwitch};
