//! Integration test infrastructure for the switch reconciliation controller
//!
//! Provides:
//! - A [`TestBed`] running a full controller over simulated switches
//! - Fixtures for hosts, pools and port configurations
//! - Device verification and running-config diff helpers
//! - Bounded waiting for asynchronous convergence

pub mod fixtures;
mod verification;

pub use fixtures::*;
pub use verification::*;
