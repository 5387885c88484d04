//! NetworkNode reconciler.
//!
//! Materializes the SwitchPort records of a node's fabric interfaces,
//! pushes the node's per-fabric settings onto them and mirrors per-fabric
//! port readiness back into the node status.

use crate::context::Context;
use async_trait::async_trait;
use sdn_common::resources::{
    FabricInterface, FabricSettings, NetworkNode, NodeFabricStatus, OwnerRef, PortChannel,
    SwitchPort, SwitchPortSpec,
};
use sdn_common::validation::normalize_trunk_groups;
use sdn_common::{kinds, labels, naming, SdnError, SdnResult};
use sdn_reconcile::{create_if_absent, mutate, Reconciler, Requeue, TaskResult};
use sdn_types::{FabricType, Managed, PortMode};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct NetworkNodeReconciler {
    ctx: Arc<Context>,
}

impl NetworkNodeReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Removes SwitchPort records owned by `node` whose key is not in `keep`.
    ///
    /// Only the records go away; the device keeps its configuration.
    async fn prune_owned_ports(&self, node: &str, keep: &BTreeSet<String>) -> SdnResult<usize> {
        let mut removed = 0;
        for record in self.ctx.stores.switch_ports.list().await? {
            let port = &record.value;
            if !port.meta.is_owned_by(kinds::NETWORK_NODE, node) || keep.contains(&record.key) {
                continue;
            }
            self.ctx.stores.switch_ports.delete(&record.key).await?;
            debug!(node, port = %record.key, "removed owned switchport record");
            removed += 1;
        }
        Ok(removed)
    }

    /// Releases port-channel records owned by `node` whose key is not in
    /// `keep`. The records stay so the port-channel is not rediscovered as
    /// spine-facing.
    async fn release_port_channels(&self, node: &str, keep: &BTreeSet<String>) -> SdnResult<()> {
        let store = self.ctx.stores.port_channels.as_ref();
        for record in store.list().await? {
            if !record.value.meta.is_owned_by(kinds::NETWORK_NODE, node)
                || keep.contains(&record.key)
            {
                continue;
            }
            mutate(store, &record.key, |pc: &mut PortChannel| {
                pc.meta.owner = None;
                pc.meta.remove_label(labels::NETWORK_NODE);
            })
            .await?;
            debug!(node, port_channel = %record.key, "released port-channel record");
        }
        Ok(())
    }

    /// Creates or adopts the port-channel record a LAG interface is bundled
    /// into and writes the fabric settings onto it.
    async fn sync_port_channel(
        &self,
        node: &NetworkNode,
        iface: &FabricInterface,
        id: i64,
    ) -> SdnResult<String> {
        let id = u32::try_from(id)
            .ok()
            .filter(|id| naming::is_valid_port_channel_id(*id))
            .ok_or_else(|| {
                SdnError::validation(node.name(), format!("invalid port-channel id {}", id))
            })?;
        let owner = OwnerRef::new(kinds::NETWORK_NODE, node.name());
        let mut fresh = PortChannel::new(&iface.switch_fqdn, id);
        fresh.meta.owner = Some(owner.clone());
        let key = fresh.key().to_string();

        let store = self.ctx.stores.port_channels.as_ref();
        let (existing, created) = create_if_absent(store, &key, fresh).await?;
        if created {
            info!(node = node.name(), port_channel = %key, "created port-channel record");
        }
        if existing.value.is_spine() {
            return Err(SdnError::validation(
                &key,
                "port-channel faces a spine and is read-only",
            ));
        }
        if let Some(other) = &existing.value.meta.owner {
            if *other != owner {
                return Err(SdnError::already_owned(&key, other.to_string()));
            }
        }

        let settings = node.fabric_settings(iface.fabric);
        mutate(store, &key, |pc: &mut PortChannel| {
            pc.meta.owner = Some(owner.clone());
            pc.meta.set_label(labels::NETWORK_NODE, node.name());
            if let Some(mode) = settings.mode {
                pc.spec.mode = Some(mode);
            }
            if let Some(vlan) = settings.vlan.positive() {
                if pc.spec.mode.unwrap_or(PortMode::Access) == PortMode::Access {
                    pc.spec.vlan = Managed::Value(vlan);
                }
            }
            if let Some(native) = settings.native_vlan.positive() {
                pc.spec.native_vlan = Managed::Value(native);
            }
            if let Some(groups) = &settings.trunk_groups {
                pc.spec.trunk_groups = Some(normalize_trunk_groups(groups));
            }
        })
        .await?;
        Ok(key)
    }

    /// Creates or adopts the SwitchPort for `iface` and writes the derived values.
    async fn sync_port(&self, node: &NetworkNode, iface: &FabricInterface) -> SdnResult<SwitchPort> {
        let owner = OwnerRef::new(kinds::NETWORK_NODE, node.name());
        let key = naming::switch_port_name(&iface.port, &iface.switch_fqdn);

        let mut fresh = SwitchPort::new(&iface.switch_fqdn, &iface.port);
        fresh.meta.owner = Some(owner.clone());
        let (existing, created) =
            create_if_absent(self.ctx.stores.switch_ports.as_ref(), &key, fresh).await?;
        if created {
            info!(node = node.name(), port = %key, fabric = %iface.fabric, "created switchport record");
        }
        if let Some(other) = &existing.value.meta.owner {
            if *other != owner {
                return Err(SdnError::already_owned(&key, other.to_string()));
            }
        }

        let settings = node.fabric_settings(iface.fabric);
        let updated = mutate(self.ctx.stores.switch_ports.as_ref(), &key, |port| {
            port.meta.owner = Some(owner.clone());
            port.meta.set_label(labels::NETWORK_NODE, node.name());
            port.meta.set_label(labels::FABRIC_TYPE, iface.fabric.as_str());
            port.meta.set_label(labels::SWITCH_FQDN, &iface.switch_fqdn);
            apply_settings(&mut port.spec, &settings, iface);
        })
        .await?;
        Ok(updated.value)
    }
}

/// Writes derived node settings onto a port spec. Unmanaged settings leave
/// the port's own value in place.
pub(crate) fn apply_settings(
    spec: &mut SwitchPortSpec,
    settings: &FabricSettings,
    iface: &FabricInterface,
) {
    if let Some(mode) = settings.mode {
        spec.mode = Some(mode);
    }
    if let Some(vlan) = settings.vlan.positive() {
        if spec.mode.unwrap_or(PortMode::Access) == PortMode::Access {
            spec.vlan = Managed::Value(vlan);
        }
    }
    if let Some(native) = settings.native_vlan.positive() {
        spec.native_vlan = Managed::Value(native);
    }
    if let Some(groups) = &settings.trunk_groups {
        spec.trunk_groups = Some(normalize_trunk_groups(groups));
    }
    if !iface.port_channel.is_unmanaged() {
        spec.port_channel = iface.port_channel;
    }
}

/// Per-fabric readiness of the given ports against the node settings.
fn fabric_status(settings: &FabricSettings, ports: &[SwitchPort]) -> NodeFabricStatus {
    let desired = settings.vlan.positive();
    let ports_ready = ports
        .iter()
        .filter(|p| p.status.has_observation())
        .filter(|p| desired.map_or(true, |v| p.status.vlan == v))
        .count();

    let observed: BTreeSet<i64> = ports
        .iter()
        .filter(|p| p.status.has_observation())
        .map(|p| p.status.vlan)
        .collect();
    let vlan = match observed.iter().next() {
        Some(&v) if observed.len() == 1 && v > 0 => Managed::Value(v),
        _ => Managed::Unmanaged,
    };

    NodeFabricStatus {
        vlan,
        ports_ready,
        ports_total: ports.len(),
        ready: !ports.is_empty() && ports_ready == ports.len(),
    }
}

#[async_trait]
impl Reconciler for NetworkNodeReconciler {
    fn name(&self) -> &str {
        "networknode"
    }

    #[instrument(skip(self))]
    async fn reconcile(&self, key: &str) -> TaskResult<Requeue> {
        let Some(record) = self
            .ctx
            .stores
            .network_nodes
            .get(key)
            .await
            .map_err(SdnError::from)?
        else {
            let removed = self.prune_owned_ports(key, &BTreeSet::new()).await?;
            self.release_port_channels(key, &BTreeSet::new()).await?;
            if removed > 0 {
                info!(node = key, removed, "node removed, dropped its switchport records");
            }
            return Ok(Requeue::Never);
        };
        let node = record.value;

        let mut ports: BTreeMap<FabricType, Vec<SwitchPort>> = BTreeMap::new();
        let mut keep = BTreeSet::new();
        let mut keep_port_channels = BTreeSet::new();
        let mut first_error = None;
        for iface in &node.spec.interfaces {
            if let Some(id) = iface.port_channel.positive() {
                match self.sync_port_channel(&node, iface, id).await {
                    Ok(pc_key) => {
                        keep_port_channels.insert(pc_key);
                    }
                    Err(e) => {
                        warn!(node = key, port_channel = id, switch = %iface.switch_fqdn, error = %e, "port-channel not synced");
                        self.ctx.warn(kinds::NETWORK_NODE, key, &e);
                        first_error.get_or_insert(e);
                    }
                }
            }
            match self.sync_port(&node, iface).await {
                Ok(port) => {
                    keep.insert(port.key().to_string());
                    ports.entry(iface.fabric).or_default().push(port);
                }
                Err(e) => {
                    warn!(node = key, port = %iface.port, switch = %iface.switch_fqdn, error = %e, "switchport not synced");
                    self.ctx.warn(kinds::NETWORK_NODE, key, &e);
                    first_error.get_or_insert(e);
                }
            }
        }
        self.prune_owned_ports(key, &keep).await?;
        self.release_port_channels(key, &keep_port_channels).await?;

        let fabrics: BTreeMap<FabricType, NodeFabricStatus> = ports
            .iter()
            .map(|(fabric, ports)| (*fabric, fabric_status(&node.fabric_settings(*fabric), ports)))
            .collect();
        let message = first_error.as_ref().map(|e| e.to_string());
        mutate(self.ctx.stores.network_nodes.as_ref(), key, |n: &mut NetworkNode| {
            n.status.fabrics = fabrics.clone();
            n.status.message = message.clone();
        })
        .await
        .map_err(SdnError::from)?;

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(Requeue::Resync),
        }
    }
}
