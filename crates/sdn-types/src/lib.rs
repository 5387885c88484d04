//! Common types for the switch reconciliation controller.
//!
//! This crate provides type-safe representations of the primitives shared by
//! every controller component:
//!
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`Managed`]: the `-1` "unmanaged" sentinel carried by desired-state fields
//! - [`PortMode`], [`LinkStatus`], [`InterfaceRole`]: switch interface attributes
//! - [`FabricType`]: the three independently converging fabrics of a server

mod mac;
mod managed;
mod port;
mod vlan;

pub use mac::MacAddress;
pub use managed::Managed;
pub use port::{FabricType, InterfaceRole, LinkStatus, PortMode};
pub use vlan::VlanId;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(i64),

    #[error("invalid port mode: {0}")]
    InvalidPortMode(String),

    #[error("invalid link status: {0}")]
    InvalidLinkStatus(String),

    #[error("invalid interface role: {0}")]
    InvalidInterfaceRole(String),

    #[error("invalid fabric type: {0}")]
    InvalidFabricType(String),
}
