//! Switch state reconciliation controller.
//!
//! Continuously converges the live configuration of top-of-rack switches
//! (VLANs, trunking, port-channel membership, BGP community tagging) toward
//! declared desired-state records, independently per fabric.
//!
//! - [`config`]: TOML configuration and the derived runtime [`Settings`](config::Settings)
//! - [`context`]: record stores and shared reconciler context
//! - [`diff`]: field-level desired/observed diffs
//! - [`status`]: per-switch observed-state reporter and autodiscovery
//! - [`reconcilers`]: one reconciler per record kind
//! - [`api`]: imperative API performing validated desired-state writes
//! - [`import`]: device catalog normalization
//! - [`manager`]: wiring of stores, watches and schedulers

pub mod api;
pub mod config;
pub mod context;
pub mod diff;
pub mod import;
pub mod manager;
pub mod metrics;
pub mod reconcilers;
pub mod status;

pub use api::{ApiError, ApiErrorCode, ApiResult, PortChannelConfig, PortConfig, SdnApi};
pub use config::{ConfigError, ControllerConfig, Settings};
pub use context::{Context, Stores};
pub use manager::{memory_lab, ControllerManager, ManagerError, Schedulers};
pub use metrics::ControllerMetrics;
pub use status::{RefreshSummary, StatusReporter};
