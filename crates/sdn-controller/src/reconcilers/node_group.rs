//! NodeGroup aggregator.
//!
//! Derives the per-fabric leaf switch set of a group from its member
//! NetworkNodes, propagates the group's desired fabric values onto the
//! members (VLAN fabrics) or the leaf switches (BGP fabrics) and reports
//! readiness per fabric. Nothing is propagated until the group is mapped to
//! a pool.

use crate::context::Context;
use async_trait::async_trait;
use sdn_common::resources::{
    FabricConfig, FabricReadiness, NetworkNode, NodeGroup, PoolMapping, SchedulableUnit, Switch,
};
use sdn_common::{kinds, labels, SdnError, SdnResult};
use sdn_reconcile::{
    mutate, Constraint, Reconciler, Requeue, TaskError, TaskResult,
};
use sdn_types::{FabricType, Managed, PortMode};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct NodeGroupReconciler {
    ctx: Arc<Context>,
}

/// Ready/total counter for one fabric.
#[derive(Default)]
struct Tally {
    ready: usize,
    total: usize,
}

impl Tally {
    fn add(&mut self, ready: bool) {
        self.total += 1;
        if ready {
            self.ready += 1;
        }
    }
}

impl NodeGroupReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Loads member nodes and keeps their group label in step with membership.
    async fn members(&self, group: &NodeGroup) -> SdnResult<Vec<NetworkNode>> {
        let name = group.name();
        let mut members = Vec::new();
        let store = self.ctx.stores.network_nodes.as_ref();
        for record in store.list().await? {
            let is_member = group.spec.network_nodes.contains(&record.key);
            let labelled = record.value.meta.label(labels::NODE_GROUP) == Some(name);
            if is_member && !labelled {
                let updated = mutate(store, &record.key, |n: &mut NetworkNode| {
                    n.meta.set_label(labels::NODE_GROUP, name)
                })
                .await?;
                members.push(updated.value);
            } else if !is_member && labelled {
                mutate(store, &record.key, |n: &mut NetworkNode| {
                    n.meta.remove_label(labels::NODE_GROUP);
                })
                .await?;
            } else if is_member {
                members.push(record.value);
            }
        }
        if members.len() < group.spec.network_nodes.len() {
            debug!(
                group = name,
                found = members.len(),
                declared = group.spec.network_nodes.len(),
                "some member nodes have no record yet"
            );
        }
        Ok(members)
    }

    async fn label_switch(&self, fqdn: &str, group: &str) -> SdnResult<()> {
        match mutate(self.ctx.stores.switches.as_ref(), fqdn, |s: &mut Switch| {
            s.meta.set_label(labels::NODE_GROUP, group)
        })
        .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(switch = fqdn, group, "leaf switch has no record yet");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Pushes a VLAN onto every member with ports on `fabric` and counts
    /// members whose observed fabric VLAN matches.
    async fn propagate_vlan(
        &self,
        members: &[NetworkNode],
        fabric: FabricType,
        vlan: i64,
    ) -> SdnResult<Tally> {
        let mut tally = Tally::default();
        for node in members.iter().filter(|n| n.interfaces_for(fabric).next().is_some()) {
            let store = self.ctx.stores.network_nodes.as_ref();
            mutate(store, node.name(), |n: &mut NetworkNode| {
                let settings = n.spec.settings.entry(fabric).or_default();
                settings.vlan = Managed::Value(vlan);
                settings.mode.get_or_insert(PortMode::Access);
            })
            .await?;
            let status = node.fabric_status(fabric);
            tally.add(status.ready && status.vlan == Managed::Value(vlan));
        }
        Ok(tally)
    }

    /// Pushes a BGP community onto every leaf switch of `fabric` and counts
    /// switches observed at that community.
    async fn propagate_bgp(&self, switches: &BTreeSet<String>, community: i64) -> SdnResult<Tally> {
        let mut tally = Tally::default();
        for fqdn in switches {
            let result = mutate(self.ctx.stores.switches.as_ref(), fqdn, |s: &mut Switch| {
                s.spec.bgp_community = Managed::Value(community)
            })
            .await;
            match result {
                Ok(record) => {
                    tally.add(record.value.status.last_observed_bgp == Managed::Value(community))
                }
                Err(e) if e.is_not_found() => tally.add(false),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(tally)
    }

    async fn set_message(&self, key: &str, message: Option<String>) -> SdnResult<()> {
        mutate(self.ctx.stores.node_groups.as_ref(), key, |g: &mut NodeGroup| {
            g.status.message = message.clone()
        })
        .await?;
        Ok(())
    }

    async fn propagate(
        &self,
        group: &NodeGroup,
        members: &[NetworkNode],
        leaves: &BTreeMap<FabricType, BTreeSet<String>>,
    ) -> TaskResult<Requeue> {
        let key = group.name();
        let mut fabrics = BTreeMap::new();
        let mut invalid = None;

        for (&fabric, config) in &group.spec.fabrics {
            let FabricConfig { vlan, bgp_community } = *config;
            let mut tally = Tally::default();
            let previous = group.status.fabrics.get(&fabric).cloned().unwrap_or_default();

            for (field, value) in [("vlan", vlan), ("bgp community", bgp_community)] {
                if value == Managed::Value(0) {
                    let err = SdnError::validation(
                        key,
                        format!("{} fabric {} 0 is not allowed", fabric, field),
                    );
                    warn!(group = key, %fabric, field, "rejected zero fabric value");
                    self.ctx.warn(kinds::NODE_GROUP, key, &err);
                    invalid.get_or_insert(err);
                }
            }

            if let Some(vlan) = vlan.positive() {
                let t = self.propagate_vlan(members, fabric, vlan).await?;
                tally.ready += t.ready;
                tally.total += t.total;
            }
            if let Some(community) = bgp_community.positive() {
                let switches = leaves.get(&fabric).cloned().unwrap_or_default();
                let t = self.propagate_bgp(&switches, community).await?;
                tally.ready += t.ready;
                tally.total += t.total;
            }

            let valid = vlan != Managed::Value(0) && bgp_community != Managed::Value(0);
            let in_sync = valid && tally.ready == tally.total;
            let readiness = FabricReadiness {
                ready: format!("{}/{}", tally.ready, tally.total),
                ready_count: tally.ready,
                total: tally.total,
                last_ready_vlan: if in_sync { vlan } else { previous.last_ready_vlan },
                last_ready_bgp_community: if in_sync {
                    bgp_community
                } else {
                    previous.last_ready_bgp_community
                },
                in_sync,
            };
            debug!(group = key, %fabric, ready = %readiness.ready, in_sync, "fabric readiness");
            fabrics.insert(fabric, readiness);
        }

        let all_in_sync = fabrics.values().all(|f: &FabricReadiness| f.in_sync);
        let message = invalid.as_ref().map(|e| e.to_string());
        mutate(self.ctx.stores.node_groups.as_ref(), key, |g: &mut NodeGroup| {
            g.status.fabrics = fabrics.clone();
            g.status.message = message.clone();
        })
        .await
        .map_err(SdnError::from)?;

        if let Some(err) = invalid {
            return Err(err.into());
        }
        if all_in_sync {
            Ok(Requeue::Resync)
        } else {
            Ok(Requeue::After(self.ctx.settings.node_group_requeue))
        }
    }
}

#[async_trait]
impl Reconciler for NodeGroupReconciler {
    fn name(&self) -> &str {
        "nodegroup"
    }

    #[instrument(skip(self))]
    async fn reconcile(&self, key: &str) -> TaskResult<Requeue> {
        let Some(record) = self
            .ctx
            .stores
            .node_groups
            .get(key)
            .await
            .map_err(SdnError::from)?
        else {
            return Ok(Requeue::Never);
        };
        let group = record.value;
        if group.is_locked() {
            debug!(group = key, "pool move in progress, skipping");
            return Ok(Requeue::After(self.ctx.settings.node_group_requeue));
        }

        let members = self.members(&group).await?;
        let leaves: BTreeMap<FabricType, BTreeSet<String>> = FabricType::ALL
            .iter()
            .map(|&fabric| {
                let switches: BTreeSet<String> =
                    members.iter().flat_map(|n| n.switches_for(fabric)).collect();
                (fabric, switches)
            })
            .filter(|(_, switches)| !switches.is_empty())
            .collect();
        for fqdn in leaves.get(&FabricType::Accelerator).into_iter().flatten() {
            self.label_switch(fqdn, key).await?;
        }
        mutate(self.ctx.stores.node_groups.as_ref(), key, |g: &mut NodeGroup| {
            g.status.leaf_switches = leaves.clone()
        })
        .await
        .map_err(SdnError::from)?;

        let mapping: Option<PoolMapping> = self
            .ctx
            .stores
            .pool_mappings
            .get(key)
            .await
            .map_err(SdnError::from)?
            .map(|r| r.value);
        let Some(mapping) = mapping else {
            if !group.spec.fabrics.is_empty() {
                info!(group = key, "no pool mapping, fabric values stay pending");
            }
            self.set_message(key, Some("no pool mapping".to_string())).await?;
            return Err(TaskError::waiting_for(Constraint::new(kinds::POOL_MAPPING, key)));
        };

        let Some(pool) = self.ctx.settings.pool(&mapping.pool) else {
            let err = SdnError::validation(key, format!("unknown pool '{}'", mapping.pool));
            self.ctx.warn(kinds::NODE_GROUP, key, &err);
            self.set_message(key, Some(err.to_string())).await?;
            return Err(err.into());
        };
        if group.pool() != Some(pool.name.as_str()) {
            info!(group = key, pool = %pool.name, "group not assigned to pool yet, fabric values stay pending");
            self.set_message(key, Some(format!("waiting for assignment to pool {}", pool.name)))
                .await?;
            return Ok(Requeue::After(self.ctx.settings.node_group_requeue));
        }
        if pool.schedulable_unit == SchedulableUnit::NetworkNode {
            self.set_message(key, None).await?;
            return Ok(Requeue::Resync);
        }

        self.propagate(&group, &members, &leaves).await
    }
}
