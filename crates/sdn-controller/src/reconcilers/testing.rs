//! Shared fixture for reconciler unit tests.

use crate::config::{ControllerConfig, Settings};
use crate::context::{Context, Stores};
use sdn_common::resources::{NetworkStrategy, Pool, SchedulableUnit, StrategyKind, Switch};
use sdn_reconcile::EventRecorder;
use sdn_switch_client::{
    ConnectPolicy, DeviceAccessManager, OperationCategory, SimulatedLab, SimulatedSwitch,
    SwitchClientMetrics,
};
use sdn_types::FabricType;
use std::sync::Arc;

pub const LEAF: &str = "dc1-fe-leaf1.sdn.test";
pub const ACC_LEAF: &str = "dc1-acc-leaf1.sdn.test";

pub struct Bed {
    pub ctx: Arc<Context>,
    pub lab: Arc<SimulatedLab>,
    pub switch: Arc<SimulatedSwitch>,
    pub acc_switch: Arc<SimulatedSwitch>,
}

impl Bed {
    pub fn updates(&self) -> u64 {
        self.access_calls(OperationCategory::Update)
    }

    pub fn access_calls(&self, category: OperationCategory) -> u64 {
        self.ctx.access.metrics().calls(LEAF, category)
    }
}

/// Pool with one strategy per listed fabric.
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

pub async fn bed() -> Bed {
    bed_with_pools(Vec::new()).await
}

pub async fn bed_with_pools(pools: Vec<Pool>) -> Bed {
    let lab = Arc::new(SimulatedLab::new());
    let switch = lab.add_switch(
        SimulatedSwitch::new(LEAF)
            .with_vlan(100)
            .with_vlan(150)
            .with_vlan(4008)
            .with_vlan(55)
            .with_interface("Ethernet1")
            .with_interface("Ethernet2")
            .with_interface("Ethernet3"),
    );
    let acc_switch = lab.add_switch(
        SimulatedSwitch::new(ACC_LEAF)
            .with_interface("Ethernet1")
            .with_interface("Ethernet2"),
    );

    let mut config = ControllerConfig::default();
    config.pools = pools;
    let settings = Arc::new(Settings::from_config(&config).unwrap());
    let access = Arc::new(DeviceAccessManager::new(
        Arc::clone(&lab) as _,
        SwitchClientMetrics::new().unwrap(),
        ConnectPolicy::default(),
    ));
    let stores = Stores::in_memory();
    for (fqdn, ip) in [(LEAF, "10.0.0.1"), (ACC_LEAF, "10.0.1.1")] {
        stores.switches.create(fqdn, Switch::new(fqdn, ip)).await.unwrap();
        access.connect(fqdn, ip).await.unwrap();
    }

    let ctx = Arc::new(Context::new(
        stores,
        Arc::new(EventRecorder::new()),
        access,
        settings,
    ));
    Bed {
        ctx,
        lab,
        switch,
        acc_switch,
    }
}
