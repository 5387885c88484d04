//! Shared infrastructure for the switch reconciliation controller.
//!
//! This crate provides functionality used by the switch client and every
//! reconciler:
//!
//! - [`error`]: the [`SdnError`] taxonomy and its mapping onto scheduler outcomes
//! - [`resources`]: desired-state records and their observed-state mirrors
//! - [`naming`]: record and interface naming conventions
//! - [`validation`]: checks applied before anything reaches a device
//! - [`labels`], [`defaults`]: well-known label keys and timing defaults
//!
//! # Example
//!
//! ```
//! use sdn_common::{naming, resources::SwitchPort};
//!
//! let port = SwitchPort::new("leaf1.sdn.test", "Ethernet27/1");
//! assert_eq!(port.key(), naming::switch_port_name("Ethernet27/1", "leaf1.sdn.test"));
//! ```

pub mod defaults;
pub mod error;
pub mod labels;
pub mod naming;
pub mod resources;
pub mod validation;

// Re-export commonly used items at crate root
pub use error::{SdnError, SdnResult};
pub use resources::{kinds, ObjectMeta, OwnerRef};
