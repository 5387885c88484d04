//! Pool manager.
//!
//! Applies a group's pool mapping: checks the group fits the pool, locks it
//! while the pool defaults are written, then waits until fabric readiness
//! reports those values.

use crate::context::Context;
use async_trait::async_trait;
use sdn_common::resources::{FabricConfig, NodeGroup, Pool, SchedulableUnit, StrategyKind};
use sdn_common::{kinds, labels, SdnError, SdnResult};
use sdn_reconcile::{mutate, Reconciler, Requeue, TaskResult};
use sdn_types::{FabricType, Managed};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct PoolReconciler {
    ctx: Arc<Context>,
}

/// Group fabric values after joining `pool`.
///
/// On a first join values already set on the group are kept and only
/// missing ones come from the pool defaults. A move between pools resets
/// the group to the target defaults. Pools scheduled per network node leave
/// the group without fabric values.
pub fn pool_fabrics(
    current: &BTreeMap<FabricType, FabricConfig>,
    pool: &Pool,
    first_join: bool,
) -> BTreeMap<FabricType, FabricConfig> {
    if pool.schedulable_unit == SchedulableUnit::NetworkNode {
        return BTreeMap::new();
    }
    let mut fabrics = if first_join {
        current.clone()
    } else {
        BTreeMap::new()
    };
    for (&fabric, strategy) in &pool.strategies {
        let config = fabrics.entry(fabric).or_default();
        let slot = match strategy.kind {
            StrategyKind::Vlan => &mut config.vlan,
            StrategyKind::Bgp => &mut config.bgp_community,
        };
        if slot.is_unmanaged() {
            *slot = Managed::Value(strategy.default_value);
        }
    }
    fabrics
}

/// True once every configured fabric reports its desired values as ready.
fn reports_desired(group: &NodeGroup) -> bool {
    group.spec.fabrics.iter().all(|(fabric, config)| {
        group.status.fabrics.get(fabric).is_some_and(|r| {
            r.in_sync
                && r.last_ready_vlan == config.vlan
                && r.last_ready_bgp_community == config.bgp_community
        })
    })
}

impl PoolReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Rejects groups that cannot join `pool`.
    async fn check_fit(&self, group: &NodeGroup, pool: &Pool) -> SdnResult<()> {
        let key = group.name();
        let mut leaves: BTreeMap<FabricType, BTreeSet<String>> = BTreeMap::new();
        for member in &group.spec.network_nodes {
            let Some(node) = self.ctx.stores.network_nodes.get(member).await? else {
                return Err(SdnError::validation(
                    key,
                    format!("member node '{}' has no record", member),
                ));
            };
            if node.value.spec.reserved {
                return Err(SdnError::validation(
                    key,
                    format!("member node '{}' is reserved", member),
                ));
            }
            for fabric in FabricType::ALL {
                leaves.entry(fabric).or_default().extend(node.value.switches_for(fabric));
            }
        }

        for fabric in pool.strategies.keys() {
            if leaves.get(fabric).map_or(true, BTreeSet::is_empty) {
                return Err(SdnError::validation(
                    key,
                    format!("pool '{}' needs {} leaf switches", pool.name, fabric),
                ));
            }
        }
        Ok(())
    }

    async fn assign(&self, group: &NodeGroup, pool: &Pool) -> TaskResult<Requeue> {
        let key = group.name();
        if let Err(e) = self.check_fit(group, pool).await {
            warn!(group = key, pool = %pool.name, error = %e, "group does not fit pool");
            self.ctx.warn(kinds::NODE_GROUP, key, &e);
            return Err(e.into());
        }

        let store = self.ctx.stores.node_groups.as_ref();
        mutate(store, key, |g: &mut NodeGroup| {
            g.meta
                .set_label(labels::MAINTENANCE, labels::MAINTENANCE_IN_PROGRESS)
        })
        .await
        .map_err(SdnError::from)?;

        let first_join = group.pool().is_none();
        let fabrics = pool_fabrics(&group.spec.fabrics, pool, first_join);
        mutate(store, key, |g: &mut NodeGroup| {
            g.spec.fabrics = fabrics.clone();
            g.meta.set_label(labels::POOL, &pool.name);
            g.meta
                .set_label(labels::MAINTENANCE, labels::MAINTENANCE_WAITING_FOR_READY);
        })
        .await
        .map_err(SdnError::from)?;

        info!(group = key, pool = %pool.name, first_join, "assigned group to pool");
        self.ctx.events.normal(
            kinds::NODE_GROUP,
            key,
            "PoolAssigned",
            format!("assigned to pool {}", pool.name),
        );
        Ok(Requeue::After(self.ctx.settings.node_group_requeue))
    }
}

#[async_trait]
impl Reconciler for PoolReconciler {
    fn name(&self) -> &str {
        "pool"
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
        let store = self.ctx.stores.node_groups.as_ref();

        let mapping = self
            .ctx
            .stores
            .pool_mappings
            .get(key)
            .await
            .map_err(SdnError::from)?;
        let Some(mapping) = mapping.map(|r| r.value) else {
            if group.pool().is_some() || group.maintenance().is_some() {
                mutate(store, key, |g: &mut NodeGroup| {
                    g.meta.remove_label(labels::POOL);
                    g.meta.remove_label(labels::MAINTENANCE);
                })
                .await
                .map_err(SdnError::from)?;
                info!(group = key, "pool mapping removed");
            }
            return Ok(Requeue::Never);
        };

        let Some(pool) = self.ctx.settings.pool(&mapping.pool) else {
            let err = SdnError::validation(key, format!("unknown pool '{}'", mapping.pool));
            self.ctx.warn(kinds::NODE_GROUP, key, &err);
            return Err(err.into());
        };

        if group.pool() != Some(pool.name.as_str()) || group.is_locked() {
            return self.assign(&group, pool).await;
        }

        if group.maintenance() != Some(labels::MAINTENANCE_WAITING_FOR_READY) {
            return Ok(Requeue::Never);
        }
        if !reports_desired(&group) {
            debug!(group = key, pool = %pool.name, "waiting for fabric readiness");
            return Ok(Requeue::After(self.ctx.settings.node_group_requeue));
        }
        mutate(store, key, |g: &mut NodeGroup| {
            g.meta.remove_label(labels::MAINTENANCE);
        })
        .await
        .map_err(SdnError::from)?;
        info!(group = key, pool = %pool.name, "group ready in pool");
        self.ctx.events.normal(
            kinds::NODE_GROUP,
            key,
            "PoolReady",
            format!("fabrics ready in pool {}", pool.name),
        );
        Ok(Requeue::Never)
    }
}
