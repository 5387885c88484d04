//! Test fixtures for common controller scenarios
//!
//! [`TestBed`] assembles a full controller over simulated switches. Tests
//! either drive reconcilers by hand (refresh, reconcile, refresh) for exact
//! device call accounting, or start the schedulers and wait for convergence.

use sdn_common::resources::{
    HostInventory, NetworkStrategy, NicFact, OperationalStatus, Pool, SchedulableUnit,
    StrategyKind,
};
use sdn_common::{labels, SdnError, SdnResult};
use sdn_controller::config::{PoolMappingDecl, SwitchDecl};
use sdn_controller::reconcilers::{
    InventoryReconciler, NetworkNodeReconciler, NodeGroupReconciler, PoolReconciler,
    PortChannelReconciler, SwitchPortReconciler, SwitchReconciler,
};
use sdn_controller::{Context, ControllerConfig, ControllerManager, RefreshSummary, SdnApi};
use sdn_reconcile::{Reconciler, Requeue, TaskResult};
use sdn_switch_client::{DeviceSeed, OperationCategory, SimulatedLab, SimulatedSwitch};
use sdn_types::{FabricType, MacAddress};
use std::sync::Arc;

/// Front-end leaf switch.
pub const LEAF: &str = "dc1-fe-leaf1.sdn.test";
/// Accelerator leaf switch.
pub const ACC_LEAF: &str = "dc1-acc-leaf1.sdn.test";
/// Checkpoint taken right after the bed is built.
pub const BASELINE: &str = "baseline";

/// Builder for a [`TestBed`]
#[derive(Debug, Clone)]
pub struct TestBedBuilder {
    config: ControllerConfig,
}

impl Default for TestBedBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBedBuilder {
    /// Two leaves with short timings. The front-end leaf carries VLANs
    /// 55, 100, 102 and 4008 and four Ethernet ports.
    pub fn new() -> Self {
        let mut config = ControllerConfig::default();
        config.reconcile.resync_period_secs = 1;
        config.reconcile.accelerated_delay_ms = 1000;
        config.reconcile.report_interval_secs = 1;
        config.reconcile.node_group_requeue_ms = 100;
        config.inventory.fqdn_domain = "sdn.test".to_string();
        config.switches = vec![
            switch_decl(LEAF, "10.0.0.1", &[55, 100, 102, 4008], 4),
            switch_decl(ACC_LEAF, "10.0.1.1", &[], 2),
        ];
        Self { config }
    }

    pub fn with_pool(mut self, pool: Pool) -> Self {
        self.config.pools.push(pool);
        self
    }

    pub fn with_mapping(mut self, group: &str, pool: &str) -> Self {
        self.config.pool_mappings.push(PoolMappingDecl {
            group: group.to_string(),
            pool: pool.to_string(),
        });
        self
    }

    pub fn with_switch(mut self, decl: SwitchDecl) -> Self {
        self.config.switches.push(decl);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.reconcile.read_only = read_only;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Builds the controller, seeds its records, connects every declared
    /// switch and takes the [`BASELINE`] checkpoint. Schedulers are not
    /// started.
    pub async fn build(self) -> anyhow::Result<TestBed> {
        let (manager, lab) = ControllerManager::from_config(&self.config)?;
        manager.seed(&self.config).await?;

        let ctx = Arc::clone(manager.context());
        for decl in &self.config.switches {
            let client = ctx.access.connect(&decl.fqdn, &decl.ip).await?;
            client.save_config(BASELINE).await?;
        }
        tracing::debug!(switches = self.config.switches.len(), "test bed ready");
        Ok(TestBed {
            manager,
            lab,
            config: self.config,
        })
    }
}

/// Declared switch with a simulated seed.
pub fn switch_decl(fqdn: &str, ip: &str, vlans: &[u16], ports: usize) -> SwitchDecl {
    SwitchDecl {
        fqdn: fqdn.to_string(),
        ip: ip.to_string(),
        ip_override: None,
        seed: DeviceSeed {
            vlans: vlans.to_vec(),
            interfaces: (1..=ports).map(|i| format!("Ethernet{}", i)).collect(),
            ..Default::default()
        },
    }
}

/// A controller over simulated switches
pub struct TestBed {
    pub manager: ControllerManager,
    pub lab: Arc<SimulatedLab>,
    pub config: ControllerConfig,
}

impl TestBed {
    pub async fn new() -> anyhow::Result<Self> {
        TestBedBuilder::new().build().await
    }

    pub fn builder() -> TestBedBuilder {
        TestBedBuilder::new()
    }

    pub fn ctx(&self) -> &Arc<Context> {
        self.manager.context()
    }

    pub fn api(&self) -> &SdnApi {
        self.manager.api()
    }

    /// The simulated device behind `fqdn`.
    pub fn device(&self, fqdn: &str) -> SdnResult<Arc<SimulatedSwitch>> {
        self.lab
            .switch(fqdn)
            .ok_or_else(|| SdnError::not_found("switch", fqdn))
    }

    /// Starts schedulers and watch bridges.
    pub fn start(&self) {
        self.manager.start();
    }

    pub fn calls(&self, fqdn: &str, category: OperationCategory) -> u64 {
        self.ctx().access.metrics().calls(fqdn, category)
    }

    pub fn mutations(&self, fqdn: &str) -> u64 {
        self.ctx().access.metrics().mutations(fqdn)
    }

    pub async fn refresh(&self, fqdn: &str) -> SdnResult<RefreshSummary> {
        self.ctx().reporter.refresh_switch(fqdn).await
    }

    async fn run(&self, reconciler: impl Reconciler, key: &str) -> TaskResult<Requeue> {
        reconciler.reconcile(key).await
    }

    pub async fn reconcile_switch(&self, fqdn: &str) -> TaskResult<Requeue> {
        self.run(SwitchReconciler::new(Arc::clone(self.ctx())), fqdn).await
    }

    pub async fn reconcile_port(&self, key: &str) -> TaskResult<Requeue> {
        self.run(SwitchPortReconciler::new(Arc::clone(self.ctx())), key).await
    }

    pub async fn reconcile_port_channel(&self, key: &str) -> TaskResult<Requeue> {
        self.run(PortChannelReconciler::new(Arc::clone(self.ctx())), key).await
    }

    pub async fn reconcile_network_node(&self, key: &str) -> TaskResult<Requeue> {
        self.run(NetworkNodeReconciler::new(Arc::clone(self.ctx())), key).await
    }

    pub async fn reconcile_node_group(&self, key: &str) -> TaskResult<Requeue> {
        self.run(NodeGroupReconciler::new(Arc::clone(self.ctx())), key).await
    }

    pub async fn reconcile_pool(&self, key: &str) -> TaskResult<Requeue> {
        self.run(PoolReconciler::new(Arc::clone(self.ctx())), key).await
    }

    pub async fn reconcile_inventory(&self, key: &str) -> TaskResult<Requeue> {
        self.run(InventoryReconciler::new(Arc::clone(self.ctx())), key).await
    }

    /// One full manual cycle for a port: observe, reconcile, observe.
    pub async fn cycle_port(&self, fqdn: &str, key: &str) -> TaskResult<Requeue> {
        self.refresh(fqdn).await?;
        let outcome = self.reconcile_port(key).await;
        self.refresh(fqdn).await?;
        outcome
    }

    /// Restores every device to the [`BASELINE`] checkpoint.
    pub async fn reset(&self) -> SdnResult<()> {
        for decl in &self.config.switches {
            self.ctx().access.client(&decl.fqdn)?.restore_config(BASELINE).await?;
        }
        Ok(())
    }
}

impl Drop for TestBed {
    fn drop(&mut self) {
        self.manager.shutdown();
    }
}

/// Common port configuration fixtures
pub mod port_fixtures {
    use sdn_controller::PortConfig;

    pub fn access(vlan: i64) -> PortConfig {
        PortConfig::Access { vlan }
    }

    pub fn trunk(native_vlan: i64, trunk_groups: &[&str]) -> PortConfig {
        PortConfig::Trunk {
            native_vlan: Some(native_vlan),
            trunk_groups: trunk_groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    pub fn port_channel(id: u32) -> PortConfig {
        PortConfig::PortChannel { id }
    }

    pub fn unmaintained() -> PortConfig {
        PortConfig::Unmaintained
    }
}

/// Common pool fixtures
pub mod pool_fixtures {
    use super::*;

    /// Pool isolating the front-end fabric by VLAN.
    pub fn vlan_pool(name: &str, default_vlan: i64) -> Pool {
        pool(name, &[(FabricType::FrontEnd, StrategyKind::Vlan, default_vlan)])
    }

    pub fn pool(name: &str, strategies: &[(FabricType, StrategyKind, i64)]) -> Pool {
        Pool {
            name: name.to_string(),
            schedulable_unit: SchedulableUnit::NodeGroup,
            strategies: strategies
                .iter()
                .map(|(fabric, kind, default_value)| {
                    (
                        *fabric,
                        NetworkStrategy {
                            kind: *kind,
                            default_value: *default_value,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Common host inventory fixtures
pub mod host_fixtures {
    use super::*;

    pub fn mac(host: u8, nic: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, host, nic])
    }

    pub fn nic(mac: MacAddress, switch: &str, port: &str) -> NicFact {
        NicFact {
            mac,
            switch: switch.to_string(),
            port: port.to_string(),
            description: "Arista Networks EOS".to_string(),
            lag_id: None,
        }
    }

    /// Enrolled host in `group`, front-end NIC cabled to `LEAF`/`port`.
    pub fn enrolled_host(name: &str, index: u8, group: &str, port: &str) -> HostInventory {
        let mut host = HostInventory::new(name);
        host.meta.set_label("instance-type.sdn/gpu-large", "true");
        host.meta.set_label(labels::NODE_GROUP, group);
        host.spec.operational_status = OperationalStatus::Ok;
        host.spec.boot_mac = Some(mac(index, 1));
        host.spec.nics = vec![nic(mac(index, 1), LEAF, port)];
        host
    }

    /// Same host as [`enrolled_host`] before inventory marked it ready.
    pub fn discovered_host(name: &str, index: u8, group: &str, port: &str) -> HostInventory {
        let mut host = enrolled_host(name, index, group, port);
        host.spec.operational_status = OperationalStatus::Discovered;
        host
    }
}

/// Device catalog response bodies
pub mod catalog_fixtures {
    /// Paged response in the current schema.
    pub fn current(devices: &[(&str, &str, Option<&str>)]) -> String {
        let results: Vec<serde_json::Value> = devices
            .iter()
            .map(|(name, role, ip)| {
                serde_json::json!({
                    "name": name,
                    "role": { "slug": role },
                    "primary_ip4": ip.map(|a| serde_json::json!({ "address": a })),
                })
            })
            .collect();
        serde_json::json!({ "results": results }).to_string()
    }

    /// Bare list in the legacy schema.
    pub fn legacy(devices: &[(&str, &str, Option<&str>)]) -> String {
        let results: Vec<serde_json::Value> = devices
            .iter()
            .map(|(name, role, ip)| {
                serde_json::json!({
                    "name": name,
                    "device_role": { "name": role },
                    "primary_ip": ip.map(|a| serde_json::json!({ "address": a })),
                })
            })
            .collect();
        serde_json::Value::Array(results).to_string()
    }
}
