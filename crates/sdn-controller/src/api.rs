//! Imperative API.
//!
//! Every operation validates its input up front and then performs the same
//! desired-state write a direct record update would. Device changes happen
//! later, in the reconcilers.

use crate::config::Settings;
use crate::context::Stores;
use sdn_common::resources::{
    FabricConfig, NetworkNode, NodeGroup, PoolMapping, PortChannel, Switch, SwitchPort,
};
use sdn_common::validation::{
    validate_bgp_community, validate_description, validate_trunk_groups,
};
use sdn_common::{naming, SdnError};
use sdn_reconcile::{create_if_absent, mutate, Event, EventRecorder, StateStore, StoreError};
use sdn_types::{FabricType, InterfaceRole, Managed, PortMode, VlanId};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    /// Syntactically invalid input.
    Malformed,
    /// The switch or pool the request refers to is unknown.
    UnknownTarget,
    /// The record the request operates on does not exist.
    NotFound,
    /// Well-formed input rejected by policy.
    Validation,
    Internal,
}

impl fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiErrorCode::Malformed => "malformed",
            ApiErrorCode::UnknownTarget => "unknown_target",
            ApiErrorCode::NotFound => "not_found",
            ApiErrorCode::Validation => "validation",
            ApiErrorCode::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

impl ApiError {
    fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn malformed(err: SdnError) -> Self {
        Self::new(ApiErrorCode::Malformed, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let code = if err.is_not_found() {
            ApiErrorCode::NotFound
        } else {
            ApiErrorCode::Internal
        };
        Self::new(code, err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Desired configuration of one switch port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortConfig {
    Access {
        vlan: i64,
    },
    Trunk {
        native_vlan: Option<i64>,
        trunk_groups: Vec<String>,
    },
    /// Join `Port-Channel<id>`; `0` leaves any port-channel.
    PortChannel {
        id: u32,
    },
    /// Stop managing the port.
    Unmaintained,
}

/// Desired configuration of a port-channel. `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortChannelConfig {
    pub mode: Option<PortMode>,
    pub vlan: Option<i64>,
    pub native_vlan: Option<i64>,
    pub trunk_groups: Option<Vec<String>>,
    pub description: Option<String>,
}

pub struct SdnApi {
    stores: Stores,
    settings: Arc<Settings>,
    events: Arc<EventRecorder>,
}

impl SdnApi {
    pub fn new(stores: Stores, settings: Arc<Settings>, events: Arc<EventRecorder>) -> Self {
        Self {
            stores,
            settings,
            events,
        }
    }

    async fn require_switch(&self, fqdn: &str) -> ApiResult<Switch> {
        self.stores
            .switches
            .get(fqdn)
            .await?
            .map(|r| r.value)
            .ok_or_else(|| {
                ApiError::new(ApiErrorCode::UnknownTarget, format!("unknown switch '{}'", fqdn))
            })
    }

    fn check_vlan(&self, resource: &str, vlan: i64) -> ApiResult<i64> {
        VlanId::from_i64(vlan).map_err(|e| {
            ApiError::new(ApiErrorCode::Malformed, format!("{}: {}", resource, e))
        })?;
        if !self.settings.allowed_vlans.contains(vlan) {
            return Err(ApiError::new(
                ApiErrorCode::Validation,
                format!("{}: vlan {} is not in {}", resource, vlan, self.settings.allowed_vlans),
            ));
        }
        Ok(vlan)
    }

    fn check_native_vlan(&self, resource: &str, vlan: i64) -> ApiResult<i64> {
        VlanId::from_i64(vlan).map_err(|e| {
            ApiError::new(ApiErrorCode::Malformed, format!("{}: {}", resource, e))
        })?;
        if !self.settings.allowed_native_vlans.contains(vlan) {
            return Err(ApiError::new(
                ApiErrorCode::Validation,
                format!(
                    "{}: native vlan {} is not in {}",
                    resource, vlan, self.settings.allowed_native_vlans
                ),
            ));
        }
        Ok(vlan)
    }

    fn check_trunk_groups(&self, resource: &str, groups: &[String]) -> ApiResult<Vec<String>> {
        validate_trunk_groups(resource, groups, &self.settings.allowed_trunk_groups)
            .map_err(|e| ApiError::new(ApiErrorCode::Validation, e.to_string()))
    }

    fn check_description(resource: &str, description: &str) -> ApiResult<String> {
        if description.trim().is_empty() {
            return Ok(String::new());
        }
        validate_description(resource, description).map_err(ApiError::malformed)
    }

    fn check_port_channel_id(id: u32) -> ApiResult<u32> {
        if naming::is_valid_port_channel_id(id) {
            Ok(id)
        } else {
            Err(ApiError::new(
                ApiErrorCode::Malformed,
                format!("port-channel id {} is outside 1-999999", id),
            ))
        }
    }

    /// Configures a switch port, creating its record on first use.
    pub async fn configure_port(
        &self,
        fqdn: &str,
        port: &str,
        config: PortConfig,
        description: Option<String>,
    ) -> ApiResult<SwitchPort> {
        if !naming::is_valid_port_name(port) {
            return Err(ApiError::new(
                ApiErrorCode::Malformed,
                format!("invalid port name '{}'", port),
            ));
        }
        self.require_switch(fqdn).await?;
        let key = naming::switch_port_name(port, fqdn);

        let description = description
            .map(|d| Self::check_description(&key, &d))
            .transpose()?;
        let config = match config {
            PortConfig::Access { vlan } => PortConfig::Access {
                vlan: self.check_vlan(&key, vlan)?,
            },
            PortConfig::Trunk {
                native_vlan,
                trunk_groups,
            } => PortConfig::Trunk {
                native_vlan: native_vlan
                    .map(|v| self.check_native_vlan(&key, v))
                    .transpose()?,
                trunk_groups: self.check_trunk_groups(&key, &trunk_groups)?,
            },
            PortConfig::PortChannel { id } => {
                if id != 0 {
                    Self::check_port_channel_id(id)?;
                    let pc_key = naming::port_channel_name(id, fqdn);
                    if self.stores.port_channels.get(&pc_key).await?.is_none() {
                        return Err(ApiError::new(
                            ApiErrorCode::NotFound,
                            format!("port-channel '{}' not found", pc_key),
                        ));
                    }
                }
                PortConfig::PortChannel { id }
            }
            PortConfig::Unmaintained => PortConfig::Unmaintained,
        };
        if config != PortConfig::Unmaintained {
            let join = match config {
                PortConfig::PortChannel { id } if id != 0 => Some(id),
                _ => None,
            };
            if let Some(pc_key) = self.stores.spine_port_channel_for(fqdn, port, join).await? {
                return Err(ApiError::new(
                    ApiErrorCode::Validation,
                    format!("{}: port-channel '{}' faces a spine and is read-only", key, pc_key),
                ));
            }
        }

        let store = self.stores.switch_ports.as_ref();
        create_if_absent(store, &key, SwitchPort::new(fqdn, port)).await?;
        let updated = mutate(store, &key, |p: &mut SwitchPort| {
            match &config {
                PortConfig::Access { vlan } => {
                    p.spec.mode = Some(PortMode::Access);
                    p.spec.vlan = Managed::Value(*vlan);
                }
                PortConfig::Trunk {
                    native_vlan,
                    trunk_groups,
                } => {
                    p.spec.mode = Some(PortMode::Trunk);
                    if let Some(native) = native_vlan {
                        p.spec.native_vlan = Managed::Value(*native);
                    }
                    p.spec.trunk_groups = Some(trunk_groups.clone());
                }
                PortConfig::PortChannel { id } => {
                    p.spec.port_channel = Managed::Value(i64::from(*id));
                }
                PortConfig::Unmaintained => p.spec.reset_to_unmaintained(),
            }
            if config != PortConfig::Unmaintained {
                if let Some(description) = &description {
                    p.spec.description = description.clone();
                }
            }
        })
        .await?;
        info!(port = %key, config = ?config, "configured switchport");
        Ok(updated.value)
    }

    /// Creates a port-channel record. A duplicate create succeeds with `false`.
    pub async fn create_port_channel(&self, fqdn: &str, id: u32) -> ApiResult<bool> {
        Self::check_port_channel_id(id)?;
        self.require_switch(fqdn).await?;
        let pc = PortChannel::new(fqdn, id);
        let key = pc.key().to_string();
        let (existing, created) =
            create_if_absent(self.stores.port_channels.as_ref(), &key, pc).await?;
        if !created && existing.value.spec.delete_requested {
            return Err(ApiError::new(
                ApiErrorCode::Validation,
                format!("port-channel '{}' is being deleted", key),
            ));
        }
        if created {
            info!(port_channel = %key, "created port-channel record");
        }
        Ok(created)
    }

    async fn require_port_channel(&self, fqdn: &str, id: u32) -> ApiResult<PortChannel> {
        Self::check_port_channel_id(id)?;
        self.require_switch(fqdn).await?;
        let key = naming::port_channel_name(id, fqdn);
        let pc = self
            .stores
            .port_channels
            .get(&key)
            .await?
            .map(|r| r.value)
            .ok_or_else(|| {
                ApiError::new(ApiErrorCode::NotFound, format!("port-channel '{}' not found", key))
            })?;
        if pc.is_spine() {
            return Err(ApiError::new(
                ApiErrorCode::Validation,
                format!("port-channel '{}' faces a spine and is read-only", key),
            ));
        }
        Ok(pc)
    }

    pub async fn configure_port_channel(
        &self,
        fqdn: &str,
        id: u32,
        config: PortChannelConfig,
    ) -> ApiResult<PortChannel> {
        let pc = self.require_port_channel(fqdn, id).await?;
        let key = pc.key().to_string();

        let vlan = config.vlan.map(|v| self.check_vlan(&key, v)).transpose()?;
        let native_vlan = config
            .native_vlan
            .map(|v| self.check_native_vlan(&key, v))
            .transpose()?;
        let trunk_groups = config
            .trunk_groups
            .as_deref()
            .map(|g| self.check_trunk_groups(&key, g))
            .transpose()?;
        let description = config
            .description
            .as_deref()
            .map(|d| Self::check_description(&key, d))
            .transpose()?;

        let updated = mutate(self.stores.port_channels.as_ref(), &key, |p: &mut PortChannel| {
            if let Some(mode) = config.mode {
                p.spec.mode = Some(mode);
            }
            if let Some(vlan) = vlan {
                p.spec.vlan = Managed::Value(vlan);
            }
            if let Some(native) = native_vlan {
                p.spec.native_vlan = Managed::Value(native);
            }
            if let Some(groups) = &trunk_groups {
                p.spec.trunk_groups = Some(groups.clone());
            }
            if let Some(description) = &description {
                p.spec.description = description.clone();
            }
        })
        .await?;
        Ok(updated.value)
    }

    /// Requests removal of a port-channel from the device.
    ///
    /// This is the only path that deletes a device port-channel. The record
    /// goes away once the reconciler has removed it.
    pub async fn delete_port_channel(&self, fqdn: &str, id: u32) -> ApiResult<()> {
        let pc = self.require_port_channel(fqdn, id).await?;
        mutate(self.stores.port_channels.as_ref(), pc.key(), |p: &mut PortChannel| {
            p.spec.delete_requested = true
        })
        .await?;
        info!(port_channel = %pc.key(), "port-channel delete requested");
        Ok(())
    }

    pub async fn set_switch_bgp_community(&self, fqdn: &str, community: Managed) -> ApiResult<()> {
        if let Managed::Value(value) = community {
            validate_bgp_community(fqdn, value).map_err(ApiError::malformed)?;
        }
        self.require_switch(fqdn).await?;
        mutate(self.stores.switches.as_ref(), fqdn, |s: &mut Switch| {
            s.spec.bgp_community = community
        })
        .await?;
        Ok(())
    }

    pub async fn set_switch_maintenance(&self, fqdn: &str, maintenance: bool) -> ApiResult<()> {
        self.require_switch(fqdn).await?;
        mutate(self.stores.switches.as_ref(), fqdn, |s: &mut Switch| {
            s.spec.maintenance = maintenance
        })
        .await?;
        info!(switch = fqdn, maintenance, "switch maintenance changed");
        Ok(())
    }

    pub async fn set_node_group_fabric(
        &self,
        group: &str,
        fabric: FabricType,
        config: FabricConfig,
    ) -> ApiResult<NodeGroup> {
        if let Managed::Value(vlan) = config.vlan {
            if vlan == 0 {
                return Err(ApiError::new(ApiErrorCode::Malformed, "fabric vlan 0 is not allowed"));
            }
            self.check_vlan(group, vlan)?;
        }
        if let Managed::Value(community) = config.bgp_community {
            if community == 0 {
                return Err(ApiError::new(
                    ApiErrorCode::Malformed,
                    "fabric bgp community 0 is not allowed",
                ));
            }
            validate_bgp_community(group, community).map_err(ApiError::malformed)?;
        }

        let updated = mutate(self.stores.node_groups.as_ref(), group, |g: &mut NodeGroup| {
            if config.is_empty() {
                g.spec.fabrics.remove(&fabric);
            } else {
                g.spec.fabrics.insert(fabric, config);
            }
        })
        .await?;
        Ok(updated.value)
    }

    pub async fn map_group_to_pool(&self, group: &str, pool: &str) -> ApiResult<()> {
        if self.settings.pool(pool).is_none() {
            return Err(ApiError::new(
                ApiErrorCode::UnknownTarget,
                format!("unknown pool '{}'", pool),
            ));
        }
        let store = self.stores.pool_mappings.as_ref();
        create_if_absent(store, group, PoolMapping::new(group, pool)).await?;
        mutate(store, group, |m: &mut PoolMapping| m.pool = pool.to_string()).await?;
        info!(group, pool, "mapped group to pool");
        Ok(())
    }

    pub async fn unmap_group(&self, group: &str) -> ApiResult<()> {
        match self.stores.pool_mappings.delete(group).await? {
            Some(_) => {
                info!(group, "removed pool mapping");
                Ok(())
            }
            None => Err(ApiError::new(
                ApiErrorCode::NotFound,
                format!("group '{}' has no pool mapping", group),
            )),
        }
    }

    /// Turns global read-only mode on or off.
    pub fn set_read_only(&self, read_only: bool) {
        self.settings.set_read_only(read_only);
        info!(read_only, "read-only mode changed");
    }

    pub async fn switch(&self, fqdn: &str) -> ApiResult<Switch> {
        self.require_switch(fqdn).await
    }

    pub async fn switch_port(&self, fqdn: &str, port: &str) -> ApiResult<SwitchPort> {
        let key = naming::switch_port_name(port, fqdn);
        get(self.stores.switch_ports.as_ref(), &key).await
    }

    pub async fn port_channel(&self, fqdn: &str, id: u32) -> ApiResult<PortChannel> {
        get(self.stores.port_channels.as_ref(), &naming::port_channel_name(id, fqdn)).await
    }

    pub async fn node_group(&self, name: &str) -> ApiResult<NodeGroup> {
        get(self.stores.node_groups.as_ref(), name).await
    }

    pub async fn network_node(&self, name: &str) -> ApiResult<NetworkNode> {
        get(self.stores.network_nodes.as_ref(), name).await
    }

    /// Port-channels of a switch whose role makes them read-only.
    pub async fn spine_port_channels(&self, fqdn: &str) -> ApiResult<Vec<PortChannel>> {
        Ok(self
            .stores
            .port_channels
            .list()
            .await?
            .into_iter()
            .map(|r| r.value)
            .filter(|pc| pc.spec.switch_fqdn == fqdn && pc.spec.role == InterfaceRole::Spine)
            .collect())
    }

    pub fn events_for(&self, kind: &str, name: &str) -> Vec<Event> {
        self.events.events_for(kind, name)
    }
}

async fn get<T>(store: &dyn StateStore<T>, key: &str) -> ApiResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    store
        .get(key)
        .await?
        .map(|r| r.value)
        .ok_or_else(|| ApiError::from(StoreError::not_found(store.kind(), key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    const LEAF: &str = "dc1-fe-leaf1.sdn.test";

    async fn api() -> SdnApi {
        let mut config = ControllerConfig::default();
        config.pools = vec![sdn_common::resources::Pool {
            name: "gpu".to_string(),
            schedulable_unit: Default::default(),
            strategies: Default::default(),
        }];
        let stores = Stores::in_memory();
        stores
            .switches
            .create(LEAF, Switch::new(LEAF, "10.0.0.1"))
            .await
            .unwrap();
        SdnApi::new(
            stores,
            Arc::new(Settings::from_config(&config).unwrap()),
            Arc::new(EventRecorder::new()),
        )
    }

    fn code<T: fmt::Debug>(result: ApiResult<T>) -> ApiErrorCode {
        result.unwrap_err().code
    }

    #[tokio::test]
    async fn test_configure_port_error_codes() {
        let api = api().await;
        let access = |vlan| PortConfig::Access { vlan };

        assert_eq!(
            code(api.configure_port(LEAF, "eth1", access(100), None).await),
            ApiErrorCode::Malformed
        );
        assert_eq!(
            code(api.configure_port("dc9-fe-leaf9.sdn.test", "Ethernet1", access(100), None).await),
            ApiErrorCode::UnknownTarget
        );
        assert_eq!(
            code(api.configure_port(LEAF, "Ethernet1", access(5000), None).await),
            ApiErrorCode::Malformed
        );
        assert_eq!(
            code(api.configure_port(LEAF, "Ethernet1", access(4000), None).await),
            ApiErrorCode::Validation
        );
        assert_eq!(
            code(
                api.configure_port(LEAF, "Ethernet1", access(100), Some("bad;desc".to_string()))
                    .await
            ),
            ApiErrorCode::Malformed
        );
        assert_eq!(
            code(
                api.configure_port(LEAF, "Ethernet1", PortConfig::PortChannel { id: 10 }, None)
                    .await
            ),
            ApiErrorCode::NotFound
        );
    }

    #[tokio::test]
    async fn test_configure_port_writes_desired_state() {
        let api = api().await;
        let port = api
            .configure_port(
                LEAF,
                "Ethernet1",
                PortConfig::Access { vlan: 100 },
                Some("server 4".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(port.spec.mode, Some(PortMode::Access));
        assert_eq!(port.spec.vlan, Managed::Value(100));
        assert_eq!(port.spec.description, "server 4");

        let port = api
            .configure_port(LEAF, "Ethernet1", PortConfig::Unmaintained, None)
            .await
            .unwrap();
        assert!(port.spec.is_unmaintained());
    }

    #[tokio::test]
    async fn test_port_channel_lifecycle() {
        let api = api().await;
        assert_eq!(api.create_port_channel(LEAF, 10).await.unwrap(), true);
        // Duplicate create is success
        assert_eq!(api.create_port_channel(LEAF, 10).await.unwrap(), false);
        assert_eq!(
            code(api.create_port_channel(LEAF, 0).await),
            ApiErrorCode::Malformed
        );

        let pc = api
            .configure_port_channel(
                LEAF,
                10,
                PortChannelConfig {
                    mode: Some(PortMode::Trunk),
                    native_vlan: Some(55),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(pc.spec.native_vlan, Managed::Value(55));

        assert_ok!(api.delete_port_channel(LEAF, 10).await);
        assert!(api.port_channel(LEAF, 10).await.unwrap().spec.delete_requested);
        assert_eq!(
            code(api.delete_port_channel(LEAF, 11).await),
            ApiErrorCode::NotFound
        );
    }

    #[tokio::test]
    async fn test_spine_port_channel_is_read_only() {
        let api = api().await;
        let pc = PortChannel::autodiscovered(LEAF, 20, InterfaceRole::Spine);
        api.stores
            .port_channels
            .create(pc.key(), pc.clone())
            .await
            .unwrap();

        assert_eq!(
            code(api.delete_port_channel(LEAF, 20).await),
            ApiErrorCode::Validation
        );
        assert_err!(
            api.configure_port_channel(LEAF, 20, PortChannelConfig::default())
                .await
        );
        assert_eq!(api.spine_port_channels(LEAF).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_spine_member_port_is_read_only() {
        let api = api().await;
        let mut pc = PortChannel::autodiscovered(LEAF, 30, InterfaceRole::Spine);
        pc.status.members = vec!["Ethernet2".to_string()];
        api.stores
            .port_channels
            .create(pc.key(), pc.clone())
            .await
            .unwrap();

        assert_eq!(
            code(api.configure_port(LEAF, "Ethernet2", PortConfig::Access { vlan: 100 }, None).await),
            ApiErrorCode::Validation
        );
        assert_eq!(
            code(
                api.configure_port(LEAF, "Ethernet3", PortConfig::PortChannel { id: 30 }, None)
                    .await
            ),
            ApiErrorCode::Validation
        );
        assert_eq!(code(api.switch_port(LEAF, "Ethernet2").await), ApiErrorCode::NotFound);
        assert_eq!(code(api.switch_port(LEAF, "Ethernet3").await), ApiErrorCode::NotFound);

        // Ports outside the spine bundle stay configurable
        assert_ok!(
            api.configure_port(LEAF, "Ethernet3", PortConfig::Access { vlan: 100 }, None)
                .await
        );
    }

    #[tokio::test]
    async fn test_group_and_pool_operations() {
        let api = api().await;
        assert_eq!(
            code(api.map_group_to_pool("group-a", "nope").await),
            ApiErrorCode::UnknownTarget
        );
        assert_ok!(api.map_group_to_pool("group-a", "gpu").await);
        assert_ok!(api.unmap_group("group-a").await);
        assert_eq!(code(api.unmap_group("group-a").await), ApiErrorCode::NotFound);

        let vlan = |v| FabricConfig {
            vlan: Managed::Value(v),
            bgp_community: Managed::Unmanaged,
        };
        assert_eq!(
            code(api.set_node_group_fabric("group-a", FabricType::FrontEnd, vlan(100)).await),
            ApiErrorCode::NotFound
        );
        api.stores
            .node_groups
            .create("group-a", NodeGroup::new("group-a"))
            .await
            .unwrap();
        assert_eq!(
            code(api.set_node_group_fabric("group-a", FabricType::FrontEnd, vlan(0)).await),
            ApiErrorCode::Malformed
        );
        let group = api
            .set_node_group_fabric("group-a", FabricType::FrontEnd, vlan(4008))
            .await
            .unwrap();
        assert_eq!(group.fabric(FabricType::FrontEnd).vlan, Managed::Value(4008));
    }

    #[tokio::test]
    async fn test_switch_operations() {
        let api = api().await;
        assert_eq!(
            code(api.set_switch_bgp_community(LEAF, Managed::Value(70000)).await),
            ApiErrorCode::Malformed
        );
        assert_ok!(api.set_switch_bgp_community(LEAF, Managed::Value(42)).await);
        assert_ok!(api.set_switch_maintenance(LEAF, true).await);
        let switch = api.switch(LEAF).await.unwrap();
        assert_eq!(switch.spec.bgp_community, Managed::Value(42));
        assert!(switch.spec.maintenance);

        api.set_read_only(true);
        assert!(api.settings.is_read_only());
    }
}
