//! Switch Client capability interface.

use async_trait::async_trait;
use sdn_common::SdnResult;
use sdn_types::{LinkStatus, Managed, PortMode, VlanId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(test)]
use mockall::automock;

/// One entry of the switch's VLAN table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanInfo {
    pub id: u16,
    pub name: String,
    pub status: String,
    pub interfaces: Vec<String>,
    pub trunk_groups: Vec<String>,
}

/// Observed switchport configuration of one interface.
///
/// Numeric fields use `0` for "not configured".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterfaceState {
    pub name: String,
    pub mode: Option<PortMode>,
    pub vlan: i64,
    pub native_vlan: i64,
    pub trunk_groups: Vec<String>,
    /// Port-channel this interface is bundled into.
    pub port_channel: i64,
    pub description: String,
    pub link_status: LinkStatus,
    /// Member interfaces, for port-channels only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}

/// Call categories counted for observability and rate budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCategory {
    Get,
    Update,
    Create,
    Delete,
    Validate,
    Save,
    Restore,
}

impl OperationCategory {
    pub const ALL: [OperationCategory; 7] = [
        OperationCategory::Get,
        OperationCategory::Update,
        OperationCategory::Create,
        OperationCategory::Delete,
        OperationCategory::Validate,
        OperationCategory::Save,
        OperationCategory::Restore,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationCategory::Get => "get",
            OperationCategory::Update => "update",
            OperationCategory::Create => "create",
            OperationCategory::Delete => "delete",
            OperationCategory::Validate => "validate",
            OperationCategory::Save => "save",
            OperationCategory::Restore => "restore",
        }
    }

    /// True for calls that change device configuration.
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            OperationCategory::Update | OperationCategory::Create | OperationCategory::Delete
        )
    }
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Get/update/create/delete capability for one switch.
///
/// Reconcilers only talk to devices through this trait; a vendor transport
/// plugs in by implementing it.
///
/// `update_vlan` must fail with a validation error, without touching
/// anything else, when the VLAN is absent from the switch's VLAN table.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SwitchClient: Send + Sync {
    /// FQDN of the switch this client talks to.
    fn fqdn(&self) -> String;

    async fn get_running_config(&self) -> SdnResult<String>;

    async fn get_vlans(&self) -> SdnResult<Vec<VlanInfo>>;

    /// Ethernet and port-channel interfaces.
    async fn get_switch_ports(&self) -> SdnResult<Vec<InterfaceState>>;

    async fn get_bgp_community(&self) -> SdnResult<Managed>;

    async fn update_vlan(&self, interface: &str, vlan: VlanId) -> SdnResult<()>;

    async fn update_mode(&self, interface: &str, mode: PortMode) -> SdnResult<()>;

    async fn update_description(&self, interface: &str, description: &str) -> SdnResult<()>;

    async fn update_native_vlan(&self, interface: &str, vlan: VlanId) -> SdnResult<()>;

    async fn update_trunk_groups(&self, interface: &str, groups: &[String]) -> SdnResult<()>;

    async fn update_bgp_community(&self, community: i64) -> SdnResult<()>;

    /// Fails with a conflict error if the port-channel already exists.
    async fn create_port_channel(&self, id: u32) -> SdnResult<()>;

    async fn delete_port_channel(&self, id: u32) -> SdnResult<()>;

    async fn add_to_port_channel(&self, interface: &str, id: u32) -> SdnResult<()>;

    async fn remove_from_port_channel(&self, interface: &str) -> SdnResult<()>;

    async fn validate_connection(&self) -> SdnResult<()>;

    /// Snapshots the configuration under `checkpoint`.
    async fn save_config(&self, checkpoint: &str) -> SdnResult<()>;

    /// Replaces the configuration with the `checkpoint` snapshot.
    async fn restore_config(&self, checkpoint: &str) -> SdnResult<()>;
}
