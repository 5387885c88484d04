//! Shared state handed to every reconciler.

use crate::config::Settings;
use crate::status::StatusReporter;
use sdn_common::resources::{
    HostInventory, NetworkNode, NodeGroup, PoolMapping, PortChannel, Switch, SwitchPort,
};
use sdn_common::{kinds, SdnError};
use sdn_reconcile::{
    Constraint, EventRecorder, MemoryStore, StateStore, StoreResult, TaskError, TaskResult,
};
use sdn_switch_client::DeviceAccessManager;
use std::sync::Arc;

/// One record store per kind.
#[derive(Clone)]
pub struct Stores {
    pub switches: Arc<dyn StateStore<Switch>>,
    pub switch_ports: Arc<dyn StateStore<SwitchPort>>,
    pub port_channels: Arc<dyn StateStore<PortChannel>>,
    pub network_nodes: Arc<dyn StateStore<NetworkNode>>,
    pub node_groups: Arc<dyn StateStore<NodeGroup>>,
    pub pool_mappings: Arc<dyn StateStore<PoolMapping>>,
    pub hosts: Arc<dyn StateStore<HostInventory>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            switches: Arc::new(MemoryStore::new(kinds::SWITCH)),
            switch_ports: Arc::new(MemoryStore::new(kinds::SWITCH_PORT)),
            port_channels: Arc::new(MemoryStore::new(kinds::PORT_CHANNEL)),
            network_nodes: Arc::new(MemoryStore::new(kinds::NETWORK_NODE)),
            node_groups: Arc::new(MemoryStore::new(kinds::NODE_GROUP)),
            pool_mappings: Arc::new(MemoryStore::new(kinds::POOL_MAPPING)),
            hosts: Arc::new(MemoryStore::new(kinds::HOST_INVENTORY)),
        }
    }

    /// Key of the spine port-channel on `fqdn` that `port` is a member of,
    /// or that it would join through `join`.
    pub async fn spine_port_channel_for(
        &self,
        fqdn: &str,
        port: &str,
        join: Option<u32>,
    ) -> StoreResult<Option<String>> {
        let records = self.port_channels.list().await?;
        Ok(records
            .into_iter()
            .map(|r| r.value)
            .find(|pc| {
                pc.spec.switch_fqdn == fqdn
                    && pc.is_spine()
                    && (join == Some(pc.spec.id) || pc.status.members.iter().any(|m| m == port))
            })
            .map(|pc| pc.key().to_string()))
    }
}

/// Everything a reconcile pass may touch.
pub struct Context {
    pub stores: Stores,
    pub events: Arc<EventRecorder>,
    pub access: Arc<DeviceAccessManager>,
    pub settings: Arc<Settings>,
    pub reporter: Arc<StatusReporter>,
}

impl Context {
    pub fn new(
        stores: Stores,
        events: Arc<EventRecorder>,
        access: Arc<DeviceAccessManager>,
        settings: Arc<Settings>,
    ) -> Self {
        let reporter = Arc::new(StatusReporter::new(
            stores.clone(),
            Arc::clone(&events),
            Arc::clone(&access),
            Arc::clone(&settings),
        ));
        Self {
            stores,
            events,
            access,
            settings,
            reporter,
        }
    }

    /// Loads a switch record, parking the caller until it exists.
    pub async fn switch(&self, fqdn: &str) -> TaskResult<Switch> {
        match self.stores.switches.get(fqdn).await {
            Ok(Some(record)) => Ok(record.value),
            Ok(None) => Err(TaskError::waiting_for(Constraint::new(kinds::SWITCH, fqdn))),
            Err(e) => Err(SdnError::from(e).into()),
        }
    }

    /// Reason device mutations on `switch` are currently blocked, if any.
    pub fn mutation_gate(&self, switch: &Switch) -> Option<&'static str> {
        if self.settings.is_read_only() {
            Some("read-only mode")
        } else if switch.spec.maintenance {
            Some("switch in maintenance")
        } else {
            None
        }
    }

    /// Records `err` as a warning event on `kind/name`.
    pub fn warn(&self, kind: &str, name: &str, err: &SdnError) {
        self.events.warning(kind, name, err.reason(), err.to_string());
    }
}
