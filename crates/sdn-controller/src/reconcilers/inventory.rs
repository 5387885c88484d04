//! Inventory deriver.
//!
//! Turns enrolled host inventory records into NetworkNode records and keeps
//! NodeGroup membership in step with the host's group label.

use crate::config::Settings;
use crate::context::Context;
use async_trait::async_trait;
use sdn_common::resources::{
    FabricInterface, HostInventory, NetworkNode, NicFact, NodeGroup, OperationalStatus,
};
use sdn_common::{kinds, labels, SdnError, SdnResult};
use sdn_reconcile::{create_if_absent, mutate, Reconciler, Requeue, TaskResult};
use sdn_types::{FabricType, MacAddress, Managed};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct InventoryReconciler {
    ctx: Arc<Context>,
}

/// True once inventory marked the host ready for network configuration.
pub fn is_enrolled(host: &HostInventory, label_prefix: &str) -> bool {
    host.spec.operational_status == OperationalStatus::Ok
        && host.meta.labels.keys().any(|k| k.starts_with(label_prefix))
}

fn is_ignored(nic: &NicFact, settings: &Settings) -> bool {
    let description = nic.description.to_lowercase();
    settings
        .ignored_lldp_descriptions
        .iter()
        .any(|ignored| description.contains(ignored.as_str()))
}

fn neighbor_fqdn(switch: &str, domain: &str) -> String {
    let switch = switch.trim().trim_end_matches('.').to_lowercase();
    if switch.contains('.') || domain.is_empty() {
        switch
    } else {
        format!("{}.{}", switch, domain)
    }
}

/// Fabric interfaces of a host, from its NIC neighbor facts.
///
/// The boot NIC is the front-end interface and must be cabled. GPU NICs
/// form the accelerator plies, storage NICs the storage fabric. NICs
/// without a neighbor or facing an ignored neighbor are skipped and a
/// switch port seen twice is kept once.
pub fn derive_interfaces(
    host: &HostInventory,
    settings: &Settings,
) -> SdnResult<Vec<FabricInterface>> {
    let name = host.name();
    let boot = host
        .spec
        .boot_mac
        .ok_or_else(|| SdnError::validation(name, "host has no boot MAC"))?;

    let classes: [(FabricType, &[MacAddress]); 3] = [
        (FabricType::FrontEnd, std::slice::from_ref(&boot)),
        (FabricType::Accelerator, &host.spec.gpu_macs),
        (FabricType::Storage, &host.spec.storage_macs),
    ];

    let mut seen = BTreeSet::new();
    let mut interfaces = Vec::new();
    for (fabric, macs) in classes {
        for mac in macs {
            let Some(nic) = host.nic(mac) else {
                debug!(host = name, %mac, "no NIC facts for MAC");
                continue;
            };
            if nic.switch.trim().is_empty() || nic.port.trim().is_empty() {
                debug!(host = name, %mac, "NIC has no LLDP neighbor");
                continue;
            }
            if is_ignored(nic, settings) {
                debug!(host = name, %mac, neighbor = %nic.description, "ignored LLDP neighbor");
                continue;
            }
            let switch_fqdn = neighbor_fqdn(&nic.switch, &settings.fqdn_domain);
            let port = nic.port.trim().to_string();
            if !seen.insert((switch_fqdn.clone(), port.clone())) {
                continue;
            }
            interfaces.push(FabricInterface {
                fabric,
                switch_fqdn,
                port,
                port_channel: nic
                    .lag_id
                    .map_or(Managed::Unmanaged, |id| Managed::Value(i64::from(id))),
            });
        }
    }

    if !interfaces.iter().any(|i| i.fabric == FabricType::FrontEnd) {
        return Err(SdnError::validation(
            name,
            format!("front-end NIC {} has no usable LLDP neighbor", boot),
        ));
    }

    let accelerator = interfaces
        .iter()
        .filter(|i| i.fabric == FabricType::Accelerator)
        .count();
    if accelerator != 0
        && (!settings.allowed_accelerator_port_counts.contains(&accelerator)
            || accelerator != host.spec.gpu_macs.len())
    {
        return Err(SdnError::validation(
            name,
            format!(
                "{} accelerator ports observed for {} GPU NICs, allowed counts {:?}",
                accelerator,
                host.spec.gpu_macs.len(),
                settings.allowed_accelerator_port_counts
            ),
        ));
    }

    Ok(interfaces)
}

impl InventoryReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Puts `node` into `group` (if any) and takes it out of every other group.
    async fn sync_membership(&self, node: &str, group: Option<&str>) -> SdnResult<()> {
        let store = self.ctx.stores.node_groups.as_ref();
        if let Some(group) = group {
            let (_, created) = create_if_absent(store, group, NodeGroup::new(group)).await?;
            if created {
                info!(group, "created node group");
            }
            mutate(store, group, |g: &mut NodeGroup| {
                g.spec.network_nodes.insert(node.to_string());
            })
            .await?;
        }

        for record in store.list().await? {
            if Some(record.key.as_str()) == group
                || !record.value.spec.network_nodes.contains(node)
            {
                continue;
            }
            mutate(store, &record.key, |g: &mut NodeGroup| {
                g.spec.network_nodes.remove(node);
            })
            .await?;
            info!(node, group = %record.key, "removed node from previous group");
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for InventoryReconciler {
    fn name(&self) -> &str {
        "inventory"
    }

    #[instrument(skip(self))]
    async fn reconcile(&self, key: &str) -> TaskResult<Requeue> {
        let Some(record) = self.ctx.stores.hosts.get(key).await.map_err(SdnError::from)? else {
            if self
                .ctx
                .stores
                .network_nodes
                .delete(key)
                .await
                .map_err(SdnError::from)?
                .is_some()
            {
                info!(host = key, "host removed, deleted its network node");
            }
            self.sync_membership(key, None).await?;
            return Ok(Requeue::Never);
        };
        let host = record.value;

        if !is_enrolled(&host, &self.ctx.settings.enrollment_label_prefix) {
            debug!(host = key, status = ?host.spec.operational_status, "host not enrolled");
            return Ok(Requeue::Never);
        }

        let interfaces = match derive_interfaces(&host, &self.ctx.settings) {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!(host = key, error = %e, "cannot derive network node");
                self.ctx.warn(kinds::HOST_INVENTORY, key, &e);
                return Err(e.into());
            }
        };

        let mut node = NetworkNode::new(key);
        node.spec.interfaces = interfaces.clone();
        node.spec.reserved = host.spec.reserved;
        let store = self.ctx.stores.network_nodes.as_ref();
        let (_, created) = create_if_absent(store, key, node)
            .await
            .map_err(SdnError::from)?;
        if created {
            info!(host = key, interfaces = interfaces.len(), "derived network node");
            self.ctx.events.normal(
                kinds::HOST_INVENTORY,
                key,
                "NetworkNodeDerived",
                format!("derived network node with {} interfaces", interfaces.len()),
            );
        } else {
            let reserved = host.spec.reserved;
            mutate(store, key, |n: &mut NetworkNode| {
                n.spec.interfaces = interfaces.clone();
                n.spec.reserved = reserved;
            })
            .await
            .map_err(SdnError::from)?;
        }

        self.sync_membership(key, host.meta.label(labels::NODE_GROUP))
            .await?;
        Ok(Requeue::Never)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcilers::testing::{bed, Bed, ACC_LEAF, LEAF};
    use pretty_assertions::assert_eq;
    use sdn_reconcile::TaskError;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn nic(last: u8, switch: &str, port: &str) -> NicFact {
        NicFact {
            mac: mac(last),
            switch: switch.to_string(),
            port: port.to_string(),
            description: "Arista Networks EOS".to_string(),
            lag_id: None,
        }
    }

    fn host(gpus: &[u8]) -> HostInventory {
        let mut host = HostInventory::new("server-1");
        host.meta.set_label("instance-type.sdn/gpu-large", "true");
        host.meta.set_label(labels::NODE_GROUP, "group-a");
        host.spec.operational_status = OperationalStatus::Ok;
        host.spec.boot_mac = Some(mac(1));
        host.spec.gpu_macs = gpus.iter().map(|&g| mac(g)).collect();
        host.spec.nics = vec![
            nic(1, "DC1-FE-LEAF1.sdn.test", "Ethernet1"),
            nic(10, ACC_LEAF, "Ethernet1"),
            nic(11, ACC_LEAF, "Ethernet2"),
        ];
        host
    }

    async fn node(bed: &Bed) -> Option<NetworkNode> {
        bed.ctx
            .stores
            .network_nodes
            .get("server-1")
            .await
            .unwrap()
            .map(|r| r.value)
    }

    #[tokio::test]
    async fn test_unenrolled_host_gets_no_node() {
        let bed = bed().await;
        let mut host = host(&[10, 11]);
        host.spec.operational_status = OperationalStatus::Discovered;
        bed.ctx.stores.hosts.create("server-1", host).await.unwrap();
        let reconciler = InventoryReconciler::new(Arc::clone(&bed.ctx));

        reconciler.reconcile("server-1").await.unwrap();
        assert!(node(&bed).await.is_none());

        let mut unlabelled = self::host(&[10, 11]);
        unlabelled.meta.labels.retain(|k, _| k == labels::NODE_GROUP);
        assert!(!is_enrolled(&unlabelled, &bed.ctx.settings.enrollment_label_prefix));
    }

    #[tokio::test]
    async fn test_derives_node_and_group() {
        let bed = bed().await;
        bed.ctx.stores.hosts.create("server-1", host(&[10, 11])).await.unwrap();
        let reconciler = InventoryReconciler::new(Arc::clone(&bed.ctx));

        reconciler.reconcile("server-1").await.unwrap();

        let node = node(&bed).await.unwrap();
        assert_eq!(node.interfaces_for(FabricType::FrontEnd).count(), 1);
        assert_eq!(node.spec.interfaces[0].switch_fqdn, LEAF);
        assert_eq!(node.interfaces_for(FabricType::Accelerator).count(), 2);
        let group = bed.ctx.stores.node_groups.get("group-a").await.unwrap().unwrap();
        assert!(group.value.spec.network_nodes.contains("server-1"));
    }

    #[test]
    fn test_classification_rules() {
        let settings = Settings::from_config(&Default::default()).unwrap();

        let mut skipped = host(&[10, 11]);
        skipped.spec.nics.push(NicFact {
            description: "Edgecore AS7326".to_string(),
            ..nic(12, "mgmt-sw1", "Ethernet48")
        });
        skipped.spec.nics.push(nic(13, "", ""));
        skipped.spec.storage_macs = vec![mac(12), mac(13), mac(1)];
        let interfaces = derive_interfaces(&skipped, &settings).unwrap();
        // Ignored neighbor, missing neighbor and the duplicate boot port are dropped
        assert!(interfaces.iter().all(|i| i.fabric != FabricType::Storage));
        assert_eq!(interfaces.len(), 3);

        let mismatch = host(&[10, 11, 12]);
        assert!(derive_interfaces(&mismatch, &settings).is_err());

        let mut no_front_end = host(&[10, 11]);
        no_front_end.spec.nics.remove(0);
        assert!(derive_interfaces(&no_front_end, &settings).is_err());

        let mut lag = host(&[]);
        lag.spec.nics[0].lag_id = Some(10);
        let interfaces = derive_interfaces(&lag, &settings).unwrap();
        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0].port_channel, Managed::Value(10));
    }

    #[tokio::test]
    async fn test_invalid_host_emits_event() {
        let bed = bed().await;
        bed.ctx
            .stores
            .hosts
            .create("server-1", host(&[10, 11, 12]))
            .await
            .unwrap();
        let reconciler = InventoryReconciler::new(Arc::clone(&bed.ctx));

        let err = reconciler.reconcile("server-1").await.unwrap_err();
        assert!(matches!(err, TaskError::Validation { .. }));
        assert!(node(&bed).await.is_none());
        assert!(!bed.ctx.events.events_for(kinds::HOST_INVENTORY, "server-1").is_empty());
    }

    #[tokio::test]
    async fn test_host_removal_and_group_move() {
        let bed = bed().await;
        bed.ctx.stores.hosts.create("server-1", host(&[10, 11])).await.unwrap();
        let reconciler = InventoryReconciler::new(Arc::clone(&bed.ctx));
        reconciler.reconcile("server-1").await.unwrap();

        mutate(bed.ctx.stores.hosts.as_ref(), "server-1", |h| {
            h.meta.set_label(labels::NODE_GROUP, "group-b")
        })
        .await
        .unwrap();
        reconciler.reconcile("server-1").await.unwrap();
        let members = |g: Option<sdn_reconcile::Versioned<NodeGroup>>| {
            g.unwrap().value.spec.network_nodes
        };
        assert!(members(bed.ctx.stores.node_groups.get("group-a").await.unwrap()).is_empty());
        assert!(members(bed.ctx.stores.node_groups.get("group-b").await.unwrap())
            .contains("server-1"));

        bed.ctx.stores.hosts.delete("server-1").await.unwrap();
        reconciler.reconcile("server-1").await.unwrap();
        assert!(node(&bed).await.is_none());
        assert!(members(bed.ctx.stores.node_groups.get("group-b").await.unwrap()).is_empty());
    }
}
