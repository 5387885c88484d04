//! Controller wiring.
//!
//! [`ControllerManager`] owns the record stores, one [`Scheduler`] per
//! reconciler and the watch bridges that turn store changes into scheduler
//! work. Each bridge subscribes before listing so no change is missed, keeps
//! the last value per key and routes a change only to the schedulers whose
//! inputs it touches.

use crate::api::SdnApi;
use crate::config::{ConfigError, ControllerConfig, Settings};
use crate::context::{Context, Stores};
use crate::import::{parse_catalog, ImportReport, SwitchImporter};
use crate::metrics::ControllerMetrics;
use crate::reconcilers::{
    InventoryReconciler, NetworkNodeReconciler, NodeGroupReconciler, PoolReconciler,
    PortChannelReconciler, SwitchPortReconciler, SwitchReconciler,
};
use parking_lot::Mutex;
use prometheus::Registry;
use sdn_common::resources::{
    HostInventory, NetworkNode, NodeGroup, PoolMapping, PortChannel, PortChannelStatus, Switch,
    SwitchPort, SwitchPortStatus,
};
use sdn_common::{kinds, labels, SdnError, SdnResult};
use sdn_reconcile::{
    create_if_absent, Constraint, EventRecorder, Reconciler, Scheduler, StateStore, StoreError,
    WatchEvent,
};
use sdn_switch_client::{
    DeviceAccessManager, SimulatedLab, SimulatedSwitch, SwitchClientMetrics, SwitchConnector,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unsupported switch backend '{0}'")]
    UnsupportedBackend(String),
}

/// One scheduler per reconciler.
#[derive(Clone)]
pub struct Schedulers {
    pub switch: Scheduler,
    pub switch_port: Scheduler,
    pub port_channel: Scheduler,
    pub network_node: Scheduler,
    pub node_group: Scheduler,
    pub pool: Scheduler,
    pub inventory: Scheduler,
}

impl Schedulers {
    fn all(&self) -> [&Scheduler; 7] {
        [
            &self.switch,
            &self.switch_port,
            &self.port_channel,
            &self.network_node,
            &self.node_group,
            &self.pool,
            &self.inventory,
        ]
    }
}

/// Builds the simulated lab for the `memory` backend from declared switches.
pub fn memory_lab(config: &ControllerConfig) -> Arc<SimulatedLab> {
    let lab = Arc::new(SimulatedLab::new());
    for decl in &config.switches {
        lab.add_switch(
            SimulatedSwitch::from_seed(&decl.fqdn, &decl.seed)
                .with_asn(config.switch_client.bgp_community_asn),
        );
    }
    lab
}

pub struct ControllerManager {
    ctx: Arc<Context>,
    api: Arc<SdnApi>,
    metrics: ControllerMetrics,
    schedulers: Schedulers,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ControllerManager {
    pub fn new(
        settings: Arc<Settings>,
        connector: Arc<dyn SwitchConnector>,
    ) -> Result<Self, ManagerError> {
        Self::with_stores(Stores::in_memory(), settings, connector)
    }

    /// Builds a manager for `config`, returning the simulated lab behind it.
    pub fn from_config(
        config: &ControllerConfig,
    ) -> Result<(Self, Arc<SimulatedLab>), ManagerError> {
        if config.switch_client.backend != "memory" {
            return Err(ManagerError::UnsupportedBackend(
                config.switch_client.backend.clone(),
            ));
        }
        let settings = Arc::new(Settings::from_config(config)?);
        let lab = memory_lab(config);
        let manager = Self::new(settings, Arc::clone(&lab) as Arc<dyn SwitchConnector>)?;
        Ok((manager, lab))
    }

    pub fn with_stores(
        stores: Stores,
        settings: Arc<Settings>,
        connector: Arc<dyn SwitchConnector>,
    ) -> Result<Self, ManagerError> {
        let registry = Arc::new(Registry::new());
        let client_metrics = SwitchClientMetrics::with_registry(Arc::clone(&registry))?;
        let metrics = ControllerMetrics::new(&registry)?;

        let access = Arc::new(DeviceAccessManager::new(
            connector,
            client_metrics,
            settings.connect.clone(),
        ));
        let events = Arc::new(EventRecorder::new());
        let ctx = Arc::new(Context::new(
            stores.clone(),
            Arc::clone(&events),
            access,
            Arc::clone(&settings),
        ));
        let api = Arc::new(SdnApi::new(stores, Arc::clone(&settings), events));

        let config = settings.scheduler_config();
        let scheduler = |reconciler: Arc<dyn Reconciler>| {
            Scheduler::with_outcome_hook(reconciler, config.clone(), metrics.outcome_hook())
        };
        let schedulers = Schedulers {
            switch: scheduler(Arc::new(SwitchReconciler::new(Arc::clone(&ctx)))),
            switch_port: scheduler(Arc::new(SwitchPortReconciler::new(Arc::clone(&ctx)))),
            port_channel: scheduler(Arc::new(PortChannelReconciler::new(Arc::clone(&ctx)))),
            network_node: scheduler(Arc::new(NetworkNodeReconciler::new(Arc::clone(&ctx)))),
            node_group: scheduler(Arc::new(NodeGroupReconciler::new(Arc::clone(&ctx)))),
            pool: scheduler(Arc::new(PoolReconciler::new(Arc::clone(&ctx)))),
            inventory: scheduler(Arc::new(InventoryReconciler::new(Arc::clone(&ctx)))),
        };

        Ok(Self {
            ctx,
            api,
            metrics,
            schedulers,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn api(&self) -> &Arc<SdnApi> {
        &self.api
    }

    pub fn stores(&self) -> &Stores {
        &self.ctx.stores
    }

    pub fn schedulers(&self) -> &Schedulers {
        &self.schedulers
    }

    pub fn metrics(&self) -> &ControllerMetrics {
        &self.metrics
    }

    /// Text exposition of every registered counter.
    pub fn gather_metrics(&self) -> String {
        self.ctx.access.metrics().gather_metrics()
    }

    /// Writes the statically declared switches and pool mappings.
    ///
    /// Records that already exist are left as they are.
    pub async fn seed(&self, config: &ControllerConfig) -> Result<(), ManagerError> {
        let stores = &self.ctx.stores;
        for decl in &config.switches {
            let mut switch = Switch::new(&decl.fqdn, &decl.ip);
            switch.spec.ip_override = decl.ip_override.clone();
            let (_, created) =
                create_if_absent(stores.switches.as_ref(), &decl.fqdn, switch).await?;
            if created {
                info!(switch = %decl.fqdn, "seeded switch");
            }
        }
        for decl in &config.pool_mappings {
            let mapping = PoolMapping::new(&decl.group, &decl.pool);
            let (_, created) =
                create_if_absent(stores.pool_mappings.as_ref(), &decl.group, mapping).await?;
            if created {
                info!(group = %decl.group, pool = %decl.pool, "seeded pool mapping");
            }
        }
        Ok(())
    }

    /// Imports switches from a device catalog response body.
    pub async fn import_switches(&self, body: &str) -> SdnResult<ImportReport> {
        let devices = parse_catalog(body)?;
        SwitchImporter::new(
            Arc::clone(&self.ctx.stores.switches),
            Arc::clone(&self.ctx.settings),
        )
        .import(&devices)
        .await
    }

    /// Turns read-only mode on or off. Lifting it re-queues every port so
    /// pending diffs are applied right away.
    pub async fn set_read_only(&self, read_only: bool) -> SdnResult<()> {
        self.api.set_read_only(read_only);
        if !read_only {
            self.requeue_interfaces(None).await?;
        }
        Ok(())
    }

    async fn requeue_interfaces(&self, fqdn: Option<&str>) -> SdnResult<()> {
        requeue_interfaces(&self.ctx.stores, &self.schedulers, fqdn)
            .await
            .map_err(SdnError::from)
    }

    /// Starts every scheduler and watch bridge.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        for scheduler in self.schedulers.all() {
            tasks.push(scheduler.start());
        }

        let stores = &self.ctx.stores;
        let s = &self.schedulers;
        tasks.extend([
            self.bridge(Arc::clone(&stores.switches), switch_router(stores, s)),
            self.bridge(Arc::clone(&stores.switch_ports), switch_port_router(s)),
            self.bridge(Arc::clone(&stores.port_channels), port_channel_router(s)),
            self.bridge(Arc::clone(&stores.network_nodes), network_node_router(s)),
            self.bridge(Arc::clone(&stores.node_groups), node_group_router(s)),
            self.bridge(Arc::clone(&stores.pool_mappings), pool_mapping_router(s)),
            self.bridge(Arc::clone(&stores.hosts), host_router(s)),
        ]);
        info!(schedulers = self.schedulers.all().len(), "controller started");
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for scheduler in self.schedulers.all() {
            scheduler.shutdown();
        }
        self.ctx.reporter.shutdown();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("controller stopped");
    }

    fn bridge<T>(&self, store: Arc<dyn StateStore<T>>, route: Router<T>) -> JoinHandle<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        let token = self.shutdown.child_token();
        tokio::spawn(async move {
            let mut rx = store.watch();
            let mut cache: HashMap<String, T> = HashMap::new();
            relist(store.as_ref(), &mut cache, &route).await;

            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = rx.recv() => event,
                };
                match event {
                    Ok(WatchEvent::Put(record)) => {
                        let previous = cache.insert(record.key.clone(), record.value.clone());
                        route(&record.key, previous.as_ref(), Some(&record.value));
                    }
                    Ok(WatchEvent::Deleted(record)) => {
                        let previous = cache.remove(&record.key).unwrap_or(record.value);
                        route(&record.key, Some(&previous), None);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(kind = store.kind(), missed, "watch lagged, re-listing");
                        relist(store.as_ref(), &mut cache, &route).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(kind = store.kind(), "watch bridge stopped");
        })
    }
}

impl Drop for ControllerManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Routes one change. `previous` is `None` for records seen for the first
/// time, `current` is `None` for deletions.
type Router<T> = Arc<dyn Fn(&str, Option<&T>, Option<&T>) + Send + Sync>;

/// Routes every listed record as new and every vanished cached key as deleted.
async fn relist<T>(store: &dyn StateStore<T>, cache: &mut HashMap<String, T>, route: &Router<T>)
where
    T: Clone + Send + Sync + 'static,
{
    let records = match store.list().await {
        Ok(records) => records,
        Err(e) => {
            warn!(kind = store.kind(), error = %e, "listing records failed");
            return;
        }
    };
    let mut fresh = HashMap::with_capacity(records.len());
    for record in records {
        route(&record.key, None, Some(&record.value));
        fresh.insert(record.key, record.value);
    }
    for (key, value) in cache.drain() {
        if !fresh.contains_key(&key) {
            route(&key, Some(&value), None);
        }
    }
    *cache = fresh;
}

async fn requeue_interfaces(
    stores: &Stores,
    schedulers: &Schedulers,
    fqdn: Option<&str>,
) -> Result<(), StoreError> {
    let on_switch = |switch: &str| fqdn.map_or(true, |f| f == switch);
    for record in stores.switch_ports.list().await? {
        if on_switch(&record.value.spec.switch_fqdn) {
            schedulers.switch_port.enqueue(&record.key);
        }
    }
    for record in stores.port_channels.list().await? {
        if on_switch(&record.value.spec.switch_fqdn) {
            schedulers.port_channel.enqueue(&record.key);
        }
    }
    Ok(())
}

fn switch_router(stores: &Stores, schedulers: &Schedulers) -> Router<Switch> {
    let stores = stores.clone();
    let schedulers = schedulers.clone();
    Arc::new(move |key: &str, previous: Option<&Switch>, current: Option<&Switch>| {
        let Some(current) = current else {
            schedulers.switch.forget(key);
            return;
        };

        let first_refresh = previous.map_or(true, |p| {
            p.status.last_refresh.is_none() && current.status.last_refresh.is_some()
        });
        let changed = previous.map_or(true, |p| {
            p.spec != current.spec
                || p.meta != current.meta
                || p.status.last_observed_bgp != current.status.last_observed_bgp
        });
        if changed || first_refresh {
            schedulers.switch.enqueue(key);
        }

        let constraint = Constraint::new(kinds::SWITCH, key);
        schedulers.switch_port.satisfy(&constraint);
        schedulers.port_channel.satisfy(&constraint);

        if previous.is_some_and(|p| p.spec.maintenance && !current.spec.maintenance) {
            info!(switch = key, "maintenance lifted, re-queueing interfaces");
            let stores = stores.clone();
            let schedulers = schedulers.clone();
            let fqdn = key.to_string();
            tokio::spawn(async move {
                if let Err(e) = requeue_interfaces(&stores, &schedulers, Some(&fqdn)).await {
                    warn!(switch = %fqdn, error = %e, "re-queueing interfaces failed");
                }
            });
        }
    })
}

/// Observed fields only; bookkeeping written by the reconciler is ignored.
fn observed_port(status: &SwitchPortStatus) -> SwitchPortStatus {
    SwitchPortStatus {
        phase: Default::default(),
        pending: Vec::new(),
        message: None,
        last_observed: None,
        ..status.clone()
    }
}

fn observed_port_channel(status: &PortChannelStatus) -> PortChannelStatus {
    PortChannelStatus {
        phase: Default::default(),
        pending: Vec::new(),
        message: None,
        last_observed: None,
        ..status.clone()
    }
}

fn switch_port_router(schedulers: &Schedulers) -> Router<SwitchPort> {
    let schedulers = schedulers.clone();
    Arc::new(move |key: &str, previous: Option<&SwitchPort>, current: Option<&SwitchPort>| {
        let owner = current
            .or(previous)
            .and_then(|p| p.meta.label(labels::NETWORK_NODE))
            .map(str::to_string);

        match (previous, current) {
            (_, None) => schedulers.switch_port.forget(key),
            (None, Some(_)) => schedulers.switch_port.enqueue(key),
            (Some(p), Some(c)) => {
                if p.spec != c.spec
                    || p.meta != c.meta
                    || observed_port(&p.status) != observed_port(&c.status)
                {
                    schedulers.switch_port.enqueue(key);
                }
            }
        }

        let owner_affected = match (previous, current) {
            (Some(p), Some(c)) => p.spec != c.spec || p.status != c.status || p.meta != c.meta,
            _ => true,
        };
        if let (Some(owner), true) = (owner, owner_affected) {
            schedulers.network_node.enqueue(&owner);
        }
    })
}

fn port_channel_router(schedulers: &Schedulers) -> Router<PortChannel> {
    let schedulers = schedulers.clone();
    Arc::new(move |key: &str, previous: Option<&PortChannel>, current: Option<&PortChannel>| {
        let Some(current) = current else {
            schedulers.port_channel.forget(key);
            return;
        };
        let changed = previous.map_or(true, |p| {
            p.spec != current.spec
                || p.meta != current.meta
                || observed_port_channel(&p.status) != observed_port_channel(&current.status)
        });
        if changed {
            schedulers.port_channel.enqueue(key);
        }
        schedulers
            .switch_port
            .satisfy(&Constraint::new(kinds::PORT_CHANNEL, key));
    })
}

fn network_node_router(schedulers: &Schedulers) -> Router<NetworkNode> {
    let schedulers = schedulers.clone();
    Arc::new(move |key: &str, previous: Option<&NetworkNode>, current: Option<&NetworkNode>| {
        match (previous, current) {
            (_, None) => schedulers.network_node.forget(key),
            (Some(p), Some(c)) if p.spec == c.spec && p.meta == c.meta => {}
            _ => schedulers.network_node.enqueue(key),
        }

        let mut groups: Vec<&str> = previous
            .into_iter()
            .chain(current)
            .filter_map(|n| n.meta.label(labels::NODE_GROUP))
            .collect();
        groups.dedup();
        for group in groups {
            schedulers.node_group.enqueue(group);
            schedulers.pool.enqueue(group);
        }
    })
}

fn node_group_router(schedulers: &Schedulers) -> Router<NodeGroup> {
    let schedulers = schedulers.clone();
    Arc::new(move |key: &str, previous: Option<&NodeGroup>, current: Option<&NodeGroup>| {
        match (previous, current) {
            (_, None) => schedulers.node_group.forget(key),
            (Some(p), Some(c)) if p.spec == c.spec && p.meta == c.meta => {}
            _ => schedulers.node_group.enqueue(key),
        }
        schedulers.pool.enqueue(key);
    })
}

fn pool_mapping_router(schedulers: &Schedulers) -> Router<PoolMapping> {
    let schedulers = schedulers.clone();
    Arc::new(move |key: &str, _: Option<&PoolMapping>, current: Option<&PoolMapping>| {
        schedulers.pool.enqueue(key);
        schedulers.node_group.enqueue(key);
        if current.is_some() {
            schedulers
                .node_group
                .satisfy(&Constraint::new(kinds::POOL_MAPPING, key));
        }
    })
}

fn host_router(schedulers: &Schedulers) -> Router<HostInventory> {
    let inventory = schedulers.inventory.clone();
    Arc::new(move |key: &str, _: Option<&HostInventory>, current: Option<&HostInventory>| {
        if current.is_some() {
            inventory.enqueue(key);
        } else {
            inventory.forget(key);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwitchDecl;
    use sdn_switch_client::DeviceSeed;
    use std::time::Duration;

    fn config() -> ControllerConfig {
        let mut config = ControllerConfig::default();
        config.switches = vec![SwitchDecl {
            fqdn: "dc1-fe-leaf1.sdn.test".to_string(),
            ip: "10.0.0.1".to_string(),
            ip_override: None,
            seed: DeviceSeed {
                vlans: vec![100],
                interfaces: vec!["Ethernet1".to_string()],
                ..Default::default()
            },
        }];
        config
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let config = config();
        let (manager, lab) = ControllerManager::from_config(&config).unwrap();
        assert_eq!(lab.fqdns(), vec!["dc1-fe-leaf1.sdn.test".to_string()]);

        manager.seed(&config).await.unwrap();
        manager.seed(&config).await.unwrap();
        assert_eq!(manager.stores().switches.list().await.unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let mut config = config();
        config.switch_client.backend = "grpc".to_string();
        assert!(matches!(
            ControllerManager::from_config(&config),
            Err(ManagerError::UnsupportedBackend(_))
        ));
    }

    #[tokio::test]
    async fn test_started_controller_connects_switch() {
        let config = config();
        let (manager, _lab) = ControllerManager::from_config(&config).unwrap();
        manager.seed(&config).await.unwrap();
        manager.start();

        let fqdn = "dc1-fe-leaf1.sdn.test";
        let mut connected = false;
        for _ in 0..100 {
            let switch = manager.api().switch(fqdn).await.unwrap();
            if switch.status.reachable {
                connected = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(connected);
        assert!(manager.gather_metrics().contains("sdn_switch_client_calls_total"));

        manager.shutdown();
        assert!(manager.schedulers().switch.is_shutdown());
    }
}
