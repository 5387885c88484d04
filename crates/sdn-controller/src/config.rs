//! Configuration file support for the controller
//!
//! Loads and validates controller configuration from TOML files.
//! Default location: /etc/sdn/controller.toml

use sdn_common::resources::{NetworkStrategy, Pool, SchedulableUnit};
use sdn_common::validation::{FqdnPolicy, VlanSet, DEFAULT_FQDN_PATTERNS};
use sdn_common::{defaults, naming};
use sdn_reconcile::SchedulerConfig;
use sdn_switch_client::{ConnectPolicy, DeviceSeed};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sdn/controller.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Reconcile loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Periodic reconcile interval in seconds
    #[serde(default = "default_resync_period")]
    pub resync_period_secs: u64,

    /// Delay of the accelerated re-check after a device write, in milliseconds
    #[serde(default = "default_accelerated_delay")]
    pub accelerated_delay_ms: u64,

    /// Per-switch observed-state refresh interval in seconds
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,

    /// NodeGroup requeue period while not in sync, in milliseconds
    #[serde(default = "default_node_group_requeue")]
    pub node_group_requeue_ms: u64,

    /// Reconcile passes running at once per reconciler
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_reconciles: usize,

    /// Block every device mutation
    #[serde(default)]
    pub read_only: bool,

    /// Manage port-channel membership of switch ports
    #[serde(default = "default_port_channels_enabled")]
    pub port_channels_enabled: bool,
}

/// Switch access and value policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchClientConfig {
    /// Switch client backend; only `memory` is built in
    #[serde(default = "default_backend")]
    pub backend: String,

    /// VLANs a port may be assigned to
    #[serde(default = "default_allowed_vlans")]
    pub allowed_vlans: String,

    /// VLANs a trunk may use as native VLAN
    #[serde(default = "default_allowed_native_vlans")]
    pub allowed_native_vlans: String,

    /// Trunk group names accepted; empty accepts any well-formed name
    #[serde(default)]
    pub allowed_trunk_groups: Vec<String>,

    /// ASN used to render BGP communities
    #[serde(default = "default_bgp_asn")]
    pub bgp_community_asn: u32,

    /// Connection attempts before a switch is unreachable
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    #[serde(default = "default_connect_backoff_min")]
    pub connect_backoff_min_ms: u64,

    #[serde(default = "default_connect_backoff_max")]
    pub connect_backoff_max_ms: u64,
}

/// Switch import and host enrollment policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Domain appended to bare switch names on import
    #[serde(default)]
    pub fqdn_domain: String,

    /// Accepted switch FQDN regexes
    #[serde(default = "default_fqdn_patterns")]
    pub fqdn_patterns: Vec<String>,

    /// Accepted datacenter prefixes; empty accepts all
    #[serde(default)]
    pub allowed_datacenters: Vec<String>,

    /// Label prefix that enrolls a host
    #[serde(default = "default_enrollment_label_prefix")]
    pub enrollment_label_prefix: String,

    /// LLDP neighbor descriptions that are never managed
    #[serde(default = "default_ignored_lldp_descriptions")]
    pub ignored_lldp_descriptions: Vec<String>,

    /// Accelerator port counts a host may report
    #[serde(default = "default_accelerator_port_counts")]
    pub allowed_accelerator_port_counts: Vec<usize>,
}

/// A switch registered at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchDecl {
    pub fqdn: String,

    #[serde(default)]
    pub ip: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_override: Option<String>,

    /// Initial device contents for the `memory` backend
    #[serde(default)]
    pub seed: DeviceSeed,
}

/// A NodeGroup to pool assignment applied at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMappingDecl {
    pub group: String,
    pub pool: String,
}

/// Complete controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub switch_client: SwitchClientConfig,

    #[serde(default)]
    pub inventory: InventoryConfig,

    #[serde(default)]
    pub pools: Vec<Pool>,

    #[serde(default)]
    pub pool_mappings: Vec<PoolMappingDecl>,

    #[serde(default)]
    pub switches: Vec<SwitchDecl>,
}

// Default functions
fn default_resync_period() -> u64 {
    defaults::RESYNC_PERIOD.as_secs()
}

fn default_accelerated_delay() -> u64 {
    defaults::ACCELERATED_DELAY.as_millis() as u64
}

fn default_report_interval() -> u64 {
    defaults::REPORT_INTERVAL.as_secs()
}

fn default_node_group_requeue() -> u64 {
    defaults::NODE_GROUP_REQUEUE.as_millis() as u64
}

fn default_max_concurrent() -> usize {
    defaults::MAX_CONCURRENT_RECONCILES
}

fn default_port_channels_enabled() -> bool {
    true
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_allowed_vlans() -> String {
    defaults::ALLOWED_VLANS.to_string()
}

fn default_allowed_native_vlans() -> String {
    defaults::ALLOWED_NATIVE_VLANS.to_string()
}

fn default_bgp_asn() -> u32 {
    defaults::BGP_COMMUNITY_ASN
}

fn default_connect_attempts() -> u32 {
    defaults::CONNECT_ATTEMPTS
}

fn default_connect_backoff_min() -> u64 {
    defaults::CONNECT_BACKOFF_MIN.as_millis() as u64
}

fn default_connect_backoff_max() -> u64 {
    defaults::CONNECT_BACKOFF_MAX.as_millis() as u64
}

fn default_fqdn_patterns() -> Vec<String> {
    DEFAULT_FQDN_PATTERNS.iter().map(|p| p.to_string()).collect()
}

fn default_enrollment_label_prefix() -> String {
    defaults::ENROLLMENT_LABEL_PREFIX.to_string()
}

fn default_ignored_lldp_descriptions() -> Vec<String> {
    defaults::IGNORED_LLDP_DESCRIPTIONS
        .iter()
        .map(|d| d.to_string())
        .collect()
}

fn default_accelerator_port_counts() -> Vec<usize> {
    defaults::ALLOWED_ACCELERATOR_PORT_COUNTS.to_vec()
}

// Default implementations
impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            resync_period_secs: default_resync_period(),
            accelerated_delay_ms: default_accelerated_delay(),
            report_interval_secs: default_report_interval(),
            node_group_requeue_ms: default_node_group_requeue(),
            max_concurrent_reconciles: default_max_concurrent(),
            read_only: false,
            port_channels_enabled: default_port_channels_enabled(),
        }
    }
}

impl Default for SwitchClientConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            allowed_vlans: default_allowed_vlans(),
            allowed_native_vlans: default_allowed_native_vlans(),
            allowed_trunk_groups: Vec::new(),
            bgp_community_asn: default_bgp_asn(),
            connect_attempts: default_connect_attempts(),
            connect_backoff_min_ms: default_connect_backoff_min(),
            connect_backoff_max_ms: default_connect_backoff_max(),
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            fqdn_domain: String::new(),
            fqdn_patterns: default_fqdn_patterns(),
            allowed_datacenters: Vec::new(),
            enrollment_label_prefix: default_enrollment_label_prefix(),
            ignored_lldp_descriptions: default_ignored_lldp_descriptions(),
            allowed_accelerator_port_counts: default_accelerator_port_counts(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| match e {
                ConfigError::Parse { message, .. } => ConfigError::Parse {
                    path: path.display().to_string(),
                    message,
                },
                other => other,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.reconcile.resync_period_secs)
    }

    /// Accelerated re-check delay, never below one second
    pub fn accelerated_delay(&self) -> Duration {
        Duration::from_millis(self.reconcile.accelerated_delay_ms)
            .max(defaults::MIN_ACCELERATED_DELAY)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile.report_interval_secs)
    }

    pub fn node_group_requeue(&self) -> Duration {
        Duration::from_millis(self.reconcile.node_group_requeue_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.reconcile.resync_period_secs == 0 {
            return Err(ConfigError::Invalid(
                "resync_period_secs must be > 0".to_string(),
            ));
        }

        if self.reconcile.report_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "report_interval_secs must be > 0".to_string(),
            ));
        }

        if self.reconcile.node_group_requeue_ms == 0 {
            return Err(ConfigError::Invalid(
                "node_group_requeue_ms must be > 0".to_string(),
            ));
        }

        if self.reconcile.max_concurrent_reconciles == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_reconciles must be > 0".to_string(),
            ));
        }

        if self.switch_client.backend != "memory" {
            return Err(ConfigError::Invalid(format!(
                "unknown switch client backend '{}'",
                self.switch_client.backend
            )));
        }

        if self.switch_client.connect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "connect_attempts must be > 0".to_string(),
            ));
        }

        if self.switch_client.connect_backoff_min_ms > self.switch_client.connect_backoff_max_ms {
            return Err(ConfigError::Invalid(
                "connect_backoff_min_ms must not exceed connect_backoff_max_ms".to_string(),
            ));
        }

        for field in [
            &self.switch_client.allowed_vlans,
            &self.switch_client.allowed_native_vlans,
        ] {
            field
                .parse::<VlanSet>()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }

        FqdnPolicy::new(
            &self.inventory.fqdn_patterns,
            &self.inventory.allowed_datacenters,
        )
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let mut pool_names = BTreeSet::new();
        for pool in &self.pools {
            if pool.name.trim().is_empty() {
                return Err(ConfigError::Invalid("pool name must not be empty".to_string()));
            }
            if !pool_names.insert(pool.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "pool '{}' is defined twice",
                    pool.name
                )));
            }
            for (fabric, strategy) in &pool.strategies {
                validate_strategy(&pool.name, fabric.as_str(), strategy)?;
            }
        }

        for mapping in &self.pool_mappings {
            if !pool_names.contains(mapping.pool.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "group '{}' is mapped to unknown pool '{}'",
                    mapping.group, mapping.pool
                )));
            }
        }

        let mut fqdns = BTreeSet::new();
        for switch in &self.switches {
            if switch.fqdn.trim().is_empty() {
                return Err(ConfigError::Invalid("switch fqdn must not be empty".to_string()));
            }
            if !fqdns.insert(switch.fqdn.to_lowercase()) {
                return Err(ConfigError::Invalid(format!(
                    "switch '{}' is declared twice",
                    switch.fqdn
                )));
            }
            for pc in &switch.seed.port_channels {
                if !naming::is_valid_port_channel_id(pc.id) {
                    return Err(ConfigError::Invalid(format!(
                        "switch '{}' seeds invalid port-channel id {}",
                        switch.fqdn, pc.id
                    )));
                }
            }
        }

        Ok(())
    }
}

fn validate_strategy(pool: &str, fabric: &str, strategy: &NetworkStrategy) -> Result<()> {
    if strategy.default_value <= 0 {
        return Err(ConfigError::Invalid(format!(
            "pool '{}' fabric {} default must be positive, got {}",
            pool, fabric, strategy.default_value
        )));
    }
    Ok(())
}

/// Resolved runtime settings shared by every reconciler.
///
/// Built once from a validated [`ControllerConfig`]; only the read-only
/// switch can change afterwards.
#[derive(Debug)]
pub struct Settings {
    pub resync_period: Duration,
    pub accelerated_delay: Duration,
    pub report_interval: Duration,
    pub node_group_requeue: Duration,
    pub max_concurrent_reconciles: usize,
    pub port_channels_enabled: bool,
    pub allowed_vlans: VlanSet,
    pub allowed_native_vlans: VlanSet,
    pub allowed_trunk_groups: Vec<String>,
    pub bgp_community_asn: u32,
    pub connect: ConnectPolicy,
    pub fqdn_domain: String,
    pub fqdn_policy: FqdnPolicy,
    pub enrollment_label_prefix: String,
    pub ignored_lldp_descriptions: Vec<String>,
    pub allowed_accelerator_port_counts: Vec<usize>,
    pub pools: BTreeMap<String, Pool>,
    read_only: AtomicBool,
}

impl Settings {
    pub fn from_config(config: &ControllerConfig) -> Result<Self> {
        config.validate()?;

        let parse_set = |s: &str| {
            s.parse::<VlanSet>()
                .map_err(|e| ConfigError::Invalid(e.to_string()))
        };

        Ok(Self {
            resync_period: config.resync_period(),
            accelerated_delay: config.accelerated_delay(),
            report_interval: config.report_interval(),
            node_group_requeue: config.node_group_requeue(),
            max_concurrent_reconciles: config.reconcile.max_concurrent_reconciles,
            port_channels_enabled: config.reconcile.port_channels_enabled,
            allowed_vlans: parse_set(&config.switch_client.allowed_vlans)?,
            allowed_native_vlans: parse_set(&config.switch_client.allowed_native_vlans)?,
            allowed_trunk_groups: config.switch_client.allowed_trunk_groups.clone(),
            bgp_community_asn: config.switch_client.bgp_community_asn,
            connect: ConnectPolicy {
                attempts: config.switch_client.connect_attempts,
                backoff_min: Duration::from_millis(config.switch_client.connect_backoff_min_ms),
                backoff_max: Duration::from_millis(config.switch_client.connect_backoff_max_ms),
            },
            fqdn_domain: config.inventory.fqdn_domain.trim_matches('.').to_lowercase(),
            fqdn_policy: FqdnPolicy::new(
                &config.inventory.fqdn_patterns,
                &config.inventory.allowed_datacenters,
            )
            .map_err(|e| ConfigError::Invalid(e.to_string()))?,
            enrollment_label_prefix: config.inventory.enrollment_label_prefix.clone(),
            ignored_lldp_descriptions: config
                .inventory
                .ignored_lldp_descriptions
                .iter()
                .map(|d| d.to_lowercase())
                .collect(),
            allowed_accelerator_port_counts: config
                .inventory
                .allowed_accelerator_port_counts
                .clone(),
            pools: config
                .pools
                .iter()
                .map(|p| (p.name.clone(), p.clone()))
                .collect(),
            read_only: AtomicBool::new(config.reconcile.read_only),
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn pool(&self, name: &str) -> Option<&Pool> {
        self.pools.get(name)
    }

    pub fn uses_network_node_unit(&self, pool: &str) -> bool {
        self.pool(pool)
            .is_some_and(|p| p.schedulable_unit == SchedulableUnit::NetworkNode)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            resync_period: self.resync_period,
            accelerated_delay: self.accelerated_delay,
            max_concurrent: self.max_concurrent_reconciles,
        }
    }
}
