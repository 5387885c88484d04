//! Per-switch observed-state reporter.
//!
//! One worker per connected switch refreshes observed state on a fixed
//! interval (with a random start offset so switches do not refresh in
//! lock-step). A refresh costs exactly two device reads: the interface list
//! and the BGP community. Reconcilers call [`StatusReporter::accelerate`]
//! after a device write so the result is observed within seconds rather
//! than at the next interval; concurrent requests collapse into one.
//!
//! Port-channels found on the device without a record are recorded as
//! status-only autodiscovered records. They are never changed on the
//! device because of the discovery.

use crate::config::Settings;
use crate::context::Stores;
use crate::diff::{port_channel_diff, switch_port_diff};
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use sdn_common::resources::{PortChannel, PortChannelStatus, PortPhase, SwitchPortStatus};
use sdn_common::{kinds, naming, SdnError, SdnResult};
use sdn_reconcile::{create_if_absent, mutate, EventRecorder};
use sdn_switch_client::{DeviceAccessManager, InterfaceState};
use sdn_types::{InterfaceRole, LinkStatus, Managed};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Upper bound of the random start offset of a worker.
const MAX_START_JITTER: Duration = Duration::from_secs(5);

/// What one refresh changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub ports_updated: usize,
    pub port_channels_updated: usize,
    pub autodiscovered: Vec<String>,
    pub missing: Vec<String>,
}

struct Worker {
    wake: Arc<Notify>,
    accelerating: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct StatusReporter {
    stores: Stores,
    events: Arc<EventRecorder>,
    access: Arc<DeviceAccessManager>,
    settings: Arc<Settings>,
    workers: Mutex<HashMap<String, Worker>>,
    shutdown: CancellationToken,
}

impl StatusReporter {
    pub fn new(
        stores: Stores,
        events: Arc<EventRecorder>,
        access: Arc<DeviceAccessManager>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            stores,
            events,
            access,
            settings,
            workers: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Starts the refresh worker for `fqdn` unless one is running.
    pub fn ensure_worker(self: &Arc<Self>, fqdn: &str) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let mut workers = self.workers.lock();
        if workers.get(fqdn).is_some_and(|w| !w.handle.is_finished()) {
            return;
        }

        let wake = Arc::new(Notify::new());
        let reporter = Arc::clone(self);
        let worker_wake = Arc::clone(&wake);
        let name = fqdn.to_string();
        let handle = tokio::spawn(async move { reporter.run(name, worker_wake).await });

        info!(switch = fqdn, "started status reporter");
        workers.insert(
            fqdn.to_string(),
            Worker {
                wake,
                accelerating: Arc::new(AtomicBool::new(false)),
                handle,
            },
        );
    }

    async fn run(self: Arc<Self>, fqdn: String, wake: Arc<Notify>) {
        let interval = self.settings.report_interval;
        let jitter_cap = interval.min(MAX_START_JITTER).as_millis() as u64;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap));

        tokio::select! {
            _ = self.shutdown.cancelled() => return,
            _ = tokio::time::sleep(jitter) => {}
            _ = wake.notified() => {}
        }

        loop {
            if let Err(e) = self.refresh_switch(&fqdn).await {
                warn!(switch = %fqdn, error = %e, "status refresh failed");
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
                _ = wake.notified() => {}
            }
        }
        debug!(switch = %fqdn, "status reporter stopped");
    }

    /// Requests one extra refresh of `fqdn` after the accelerated delay.
    ///
    /// Returns false when a request is already pending or no worker runs.
    pub fn accelerate(&self, fqdn: &str) -> bool {
        let workers = self.workers.lock();
        let Some(worker) = workers.get(fqdn) else {
            return false;
        };
        if worker.accelerating.swap(true, Ordering::SeqCst) {
            return false;
        }

        let wake = Arc::clone(&worker.wake);
        let pending = Arc::clone(&worker.accelerating);
        let delay = self.settings.accelerated_delay;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    pending.store(false, Ordering::SeqCst);
                    wake.notify_one();
                }
            }
        });
        debug!(switch = fqdn, ?delay, "accelerated status refresh");
        true
    }

    pub fn has_worker(&self, fqdn: &str) -> bool {
        self.workers.lock().contains_key(fqdn)
    }

    pub fn stop(&self, fqdn: &str) {
        if let Some(worker) = self.workers.lock().remove(fqdn) {
            worker.handle.abort();
            info!(switch = fqdn, "stopped status reporter");
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for (_, worker) in self.workers.lock().drain() {
            worker.handle.abort();
        }
    }

    /// Reads observed state of `fqdn` and mirrors it into status.
    ///
    /// Records are only written when something changed.
    #[instrument(skip(self))]
    pub async fn refresh_switch(&self, fqdn: &str) -> SdnResult<RefreshSummary> {
        let client = self.access.client(fqdn)?;

        let observed = match client.get_switch_ports().await {
            Ok(ports) => ports,
            Err(e) => {
                self.mark_unreachable(fqdn, &e).await;
                return Err(e);
            }
        };
        let bgp = match client.get_bgp_community().await {
            Ok(bgp) => bgp,
            Err(e) => {
                self.mark_unreachable(fqdn, &e).await;
                return Err(e);
            }
        };

        let by_name: HashMap<&str, &InterfaceState> =
            observed.iter().map(|i| (i.name.as_str(), i)).collect();

        let mut summary = RefreshSummary::default();
        self.refresh_ports(fqdn, &by_name, &mut summary).await?;
        self.refresh_port_channels(fqdn, &observed, &mut summary).await?;
        self.refresh_switch_record(fqdn, bgp).await?;

        debug!(
            ports = summary.ports_updated,
            port_channels = summary.port_channels_updated,
            "refreshed observed state"
        );
        Ok(summary)
    }

    async fn refresh_ports(
        &self,
        fqdn: &str,
        observed: &HashMap<&str, &InterfaceState>,
        summary: &mut RefreshSummary,
    ) -> SdnResult<()> {
        let port_channels_enabled = self.settings.port_channels_enabled;
        let records = self.stores.switch_ports.list().await?;

        for record in records.iter().filter(|r| r.value.spec.switch_fqdn == fqdn) {
            let port = &record.value;
            let Some(iface) = observed.get(port.spec.name.as_str()) else {
                let message = format!("interface {} not found on switch", port.spec.name);
                if port.status.message.as_deref() != Some(message.as_str()) {
                    self.events
                        .warning(kinds::SWITCH_PORT, &record.key, "InterfaceNotFound", &message);
                }
                mutate(self.stores.switch_ports.as_ref(), &record.key, |p| {
                    p.status.link_status = LinkStatus::Unknown;
                    p.status.message = Some(message.clone());
                })
                .await?;
                summary.missing.push(port.spec.name.clone());
                continue;
            };

            if let Some(expected) = port.spec.vlan.positive() {
                if port.status.has_observation()
                    && expected == port.status.vlan
                    && iface.vlan != 0
                    && iface.vlan != expected
                {
                    warn!(port = %record.key, expected, observed = iface.vlan, "unexpected vlan");
                    self.events.warning(
                        kinds::SWITCH_PORT,
                        &record.key,
                        "UnexpectedVlan",
                        format!("observed vlan {} but {} was applied", iface.vlan, expected),
                    );
                }
            }

            let now = Utc::now();
            let updated = mutate(self.stores.switch_ports.as_ref(), &record.key, |p| {
                let mut next = SwitchPortStatus {
                    mode: iface.mode,
                    vlan: iface.vlan,
                    native_vlan: iface.native_vlan,
                    trunk_groups: iface.trunk_groups.clone(),
                    port_channel: iface.port_channel,
                    description: iface.description.clone(),
                    link_status: iface.link_status,
                    phase: p.status.phase,
                    pending: p.status.pending.clone(),
                    last_observed: p.status.last_observed,
                    message: p.status.message.clone(),
                };
                if next.message.as_deref().is_some_and(|m| m.contains("not found on switch")) {
                    next.message = None;
                }
                let diff_empty = switch_port_diff(&p.spec, &next, port_channels_enabled).is_empty();
                next.phase = observed_phase(p.spec.is_unmaintained(), diff_empty, p.status.phase);
                if diff_empty {
                    next.pending.clear();
                }
                if next != p.status || next.last_observed.is_none() {
                    next.last_observed = Some(now);
                    p.status = next;
                }
            })
            .await?;
            if updated.version != record.version {
                summary.ports_updated += 1;
            }
        }
        Ok(())
    }

    async fn refresh_port_channels(
        &self,
        fqdn: &str,
        observed: &[InterfaceState],
        summary: &mut RefreshSummary,
    ) -> SdnResult<()> {
        let on_device: BTreeMap<u32, &InterfaceState> = observed
            .iter()
            .filter_map(|i| naming::parse_port_channel_interface(&i.name).map(|id| (id, i)))
            .collect();

        let records = self.stores.port_channels.list().await?;
        let mut known = Vec::new();
        for record in records.iter().filter(|r| r.value.spec.switch_fqdn == fqdn) {
            known.push(record.value.spec.id);
            let now = Utc::now();
            let iface = on_device.get(&record.value.spec.id).copied();
            let updated = mutate(self.stores.port_channels.as_ref(), &record.key, |pc| {
                let mut next = match iface {
                    Some(iface) => observed_port_channel(iface, &pc.status),
                    None => PortChannelStatus {
                        present: false,
                        phase: pc.status.phase,
                        pending: pc.status.pending.clone(),
                        last_observed: pc.status.last_observed,
                        message: Some("port-channel not present on switch".to_string()),
                        ..Default::default()
                    },
                };
                if next.present {
                    let diff_empty = port_channel_diff(&pc.spec, &next).is_empty();
                    next.phase =
                        observed_phase(!pc.spec.has_managed_fields(), diff_empty, pc.status.phase);
                    if diff_empty {
                        next.pending.clear();
                    }
                }
                if next != pc.status || next.last_observed.is_none() {
                    next.last_observed = Some(now);
                    pc.status = next;
                }
            })
            .await?;
            if updated.version != record.version {
                summary.port_channels_updated += 1;
            }
        }

        for (id, iface) in on_device {
            if known.contains(&id) {
                continue;
            }
            let role = self.discovered_role(fqdn, &iface.members).await?;
            let mut pc = PortChannel::autodiscovered(fqdn, id, role);
            pc.status = observed_port_channel(iface, &PortChannelStatus::default());
            pc.status.phase = PortPhase::Unmaintained;
            pc.status.last_observed = Some(Utc::now());

            let key = pc.key().to_string();
            let (_, created) = create_if_absent(self.stores.port_channels.as_ref(), &key, pc).await?;
            if created {
                info!(port_channel = %key, %role, "autodiscovered port-channel");
                self.events.normal(
                    kinds::PORT_CHANNEL,
                    &key,
                    "Autodiscovered",
                    format!("found {} on switch with role {}", naming::port_channel_interface(id), role),
                );
                summary.autodiscovered.push(key);
            }
        }
        Ok(())
    }

    /// Host when any member has a SwitchPort record, otherwise Spine.
    async fn discovered_role(&self, fqdn: &str, members: &[String]) -> SdnResult<InterfaceRole> {
        for member in members {
            let key = naming::switch_port_name(member, fqdn);
            if self.stores.switch_ports.get(&key).await?.is_some() {
                return Ok(InterfaceRole::Host);
            }
        }
        Ok(InterfaceRole::Spine)
    }

    async fn refresh_switch_record(&self, fqdn: &str, bgp: Managed) -> SdnResult<()> {
        let now = Utc::now();
        let updated = mutate(self.stores.switches.as_ref(), fqdn, |s| {
            let changed = s.status.last_observed_bgp != bgp
                || !s.status.reachable
                || s.status.last_refresh.is_none();
            if changed {
                s.status.last_observed_bgp = bgp;
                s.status.reachable = true;
                s.status.last_refresh = Some(now);
            }
        })
        .await;

        match updated {
            Ok(record) => {
                if record.value.bgp_drifted() {
                    debug!(switch = fqdn, observed = ?bgp, "bgp community differs from desired");
                    self.accelerate(fqdn);
                }
                Ok(())
            }
            // Switch record removed while refreshing
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_unreachable(&self, fqdn: &str, err: &SdnError) {
        if !matches!(err, SdnError::Connectivity { .. }) {
            return;
        }
        self.access.disconnect(fqdn);
        let message = err.to_string();
        let result = mutate(self.stores.switches.as_ref(), fqdn, |s| {
            s.status.reachable = false;
            s.status.message = Some(message.clone());
        })
        .await;
        if let Err(e) = result {
            debug!(switch = fqdn, error = %e, "could not record unreachable switch");
        }
        self.events
            .warning(kinds::SWITCH, fqdn, err.reason(), err.to_string());
    }
}

fn observed_port_channel(iface: &InterfaceState, previous: &PortChannelStatus) -> PortChannelStatus {
    let mut members = iface.members.clone();
    members.sort();
    PortChannelStatus {
        present: true,
        mode: iface.mode,
        vlan: iface.vlan,
        native_vlan: iface.native_vlan,
        trunk_groups: iface.trunk_groups.clone(),
        description: iface.description.clone(),
        members,
        link_status: iface.link_status,
        phase: previous.phase,
        pending: previous.pending.clone(),
        last_observed: previous.last_observed,
        message: None,
    }
}

/// Phase after an observation.
fn observed_phase(unmaintained: bool, diff_empty: bool, current: PortPhase) -> PortPhase {
    if unmaintained {
        PortPhase::Unmaintained
    } else if diff_empty {
        PortPhase::Converged
    } else if current == PortPhase::Blocked {
        PortPhase::Blocked
    } else {
        PortPhase::Syncing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use pretty_assertions::assert_eq;
    use sdn_common::resources::{Switch, SwitchPort};
    use sdn_switch_client::{
        ConnectPolicy, OperationCategory, SimulatedLab, SimulatedSwitch, SwitchClientMetrics,
    };
    use sdn_types::PortMode;

    const LEAF: &str = "dc1-fe-leaf1.sdn.test";

    struct Fixture {
        reporter: Arc<StatusReporter>,
        stores: Stores,
        events: Arc<EventRecorder>,
        access: Arc<DeviceAccessManager>,
        switch: Arc<SimulatedSwitch>,
    }

    async fn fixture() -> Fixture {
        let lab = Arc::new(SimulatedLab::new());
        let switch = lab.add_switch(
            SimulatedSwitch::new(LEAF)
                .with_vlan(100)
                .with_interface("Ethernet1")
                .with_interface("Ethernet2")
                .with_interface("Ethernet3")
                .with_port_channel(10, &["Ethernet2"])
                .with_port_channel(20, &["Ethernet3"]),
        );
        let access = Arc::new(DeviceAccessManager::new(
            lab,
            SwitchClientMetrics::new().unwrap(),
            ConnectPolicy::default(),
        ));
        access.connect(LEAF, "10.0.0.1").await.unwrap();

        let stores = Stores::in_memory();
        stores.switches.create(LEAF, Switch::new(LEAF, "10.0.0.1")).await.unwrap();
        let events = Arc::new(EventRecorder::new());
        let settings = Arc::new(Settings::from_config(&ControllerConfig::default()).unwrap());
        let reporter = Arc::new(StatusReporter::new(
            stores.clone(),
            Arc::clone(&events),
            Arc::clone(&access),
            settings,
        ));
        Fixture {
            reporter,
            stores,
            events,
            access,
            switch,
        }
    }

    async fn add_port(stores: &Stores, port: &str, vlan: Managed) -> String {
        let mut record = SwitchPort::new(LEAF, port);
        record.spec.mode = Some(PortMode::Access);
        record.spec.vlan = vlan;
        let key = record.key().to_string();
        stores.switch_ports.create(&key, record).await.unwrap();
        key
    }

    #[tokio::test]
    async fn test_refresh_costs_two_reads() {
        let f = fixture().await;
        let metrics = f.access.metrics();
        let before = metrics.calls(LEAF, OperationCategory::Get);

        f.reporter.refresh_switch(LEAF).await.unwrap();

        assert_eq!(metrics.calls(LEAF, OperationCategory::Get) - before, 2);
        assert_eq!(metrics.mutations(LEAF), 0);
    }

    #[tokio::test]
    async fn test_refresh_mirrors_status_and_phase() {
        let f = fixture().await;
        let key = add_port(&f.stores, "Ethernet1", Managed::Value(100)).await;

        let summary = f.reporter.refresh_switch(LEAF).await.unwrap();
        assert_eq!(summary.ports_updated, 1);

        let port = f.stores.switch_ports.get(&key).await.unwrap().unwrap().value;
        assert_eq!(port.status.vlan, 1);
        assert_eq!(port.status.mode, Some(PortMode::Access));
        assert_eq!(port.status.phase, PortPhase::Syncing);
        assert!(port.status.has_observation());
    }

    #[tokio::test]
    async fn test_unchanged_observation_writes_nothing() {
        let f = fixture().await;
        let key = add_port(&f.stores, "Ethernet1", Managed::Unmanaged).await;

        f.reporter.refresh_switch(LEAF).await.unwrap();
        let first = f.stores.switch_ports.get(&key).await.unwrap().unwrap();
        let summary = f.reporter.refresh_switch(LEAF).await.unwrap();
        let second = f.stores.switch_ports.get(&key).await.unwrap().unwrap();

        assert_eq!(summary.ports_updated, 0);
        assert_eq!(first.version, second.version);
        assert_eq!(second.value.status.phase, PortPhase::Converged);
    }

    #[tokio::test]
    async fn test_autodiscovery_roles() {
        let f = fixture().await;
        add_port(&f.stores, "Ethernet2", Managed::Unmanaged).await;

        let summary = f.reporter.refresh_switch(LEAF).await.unwrap();
        assert_eq!(
            summary.autodiscovered,
            vec![
                naming::port_channel_name(10, LEAF),
                naming::port_channel_name(20, LEAF)
            ]
        );

        let po10 = f
            .stores
            .port_channels
            .get(&naming::port_channel_name(10, LEAF))
            .await
            .unwrap()
            .unwrap()
            .value;
        assert_eq!(po10.spec.role, InterfaceRole::Host);
        assert!(po10.spec.autodiscovered);
        assert!(!po10.spec.has_managed_fields());
        assert_eq!(po10.status.members, vec!["Ethernet2".to_string()]);

        let po20 = f
            .stores
            .port_channels
            .get(&naming::port_channel_name(20, LEAF))
            .await
            .unwrap()
            .unwrap()
            .value;
        assert!(po20.is_spine());

        // Discovery never touches the device
        assert_eq!(f.access.metrics().mutations(LEAF), 0);
        assert!(f.switch.has_port_channel(20));

        let again = f.reporter.refresh_switch(LEAF).await.unwrap();
        assert!(again.autodiscovered.is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_vlan_event() {
        let f = fixture().await;
        let key = add_port(&f.stores, "Ethernet1", Managed::Value(100)).await;
        f.switch.set_manual_vlan("Ethernet1", 100);
        f.reporter.refresh_switch(LEAF).await.unwrap();

        f.switch.set_manual_vlan("Ethernet1", 1);
        f.reporter.refresh_switch(LEAF).await.unwrap();

        let events = f.events.events_for(kinds::SWITCH_PORT, &key);
        assert!(events.iter().any(|e| e.reason == "UnexpectedVlan"));
    }

    #[tokio::test]
    async fn test_missing_interface_is_reported() {
        let f = fixture().await;
        let key = add_port(&f.stores, "Ethernet9", Managed::Value(100)).await;

        let summary = f.reporter.refresh_switch(LEAF).await.unwrap();
        assert_eq!(summary.missing, vec!["Ethernet9".to_string()]);

        let port = f.stores.switch_ports.get(&key).await.unwrap().unwrap().value;
        assert_eq!(port.status.link_status, LinkStatus::Unknown);
        assert!(!port.status.has_observation());
    }

    #[tokio::test]
    async fn test_bgp_mirrored_into_switch() {
        let f = fixture().await;
        f.switch.set_manual_bgp_community(Some(42));
        f.reporter.refresh_switch(LEAF).await.unwrap();

        let switch = f.stores.switches.get(LEAF).await.unwrap().unwrap().value;
        assert_eq!(switch.status.last_observed_bgp, Managed::Value(42));
        assert!(switch.status.last_refresh.is_some());
    }

    #[tokio::test]
    async fn test_bgp_drift_accelerates_refresh() {
        let f = fixture().await;
        f.reporter.ensure_worker(LEAF);
        mutate(f.stores.switches.as_ref(), LEAF, |s| {
            s.spec.bgp_community = Managed::Value(42)
        })
        .await
        .unwrap();

        f.reporter.refresh_switch(LEAF).await.unwrap();
        // Already pending from the drifted refresh
        assert!(!f.reporter.accelerate(LEAF));
        f.reporter.shutdown();
    }

    #[tokio::test]
    async fn test_unreachable_switch_disconnects() {
        let f = fixture().await;
        f.switch.set_reachable(false);

        let err = f.reporter.refresh_switch(LEAF).await.unwrap_err();
        assert!(matches!(err, SdnError::Connectivity { .. }));
        assert!(!f.access.is_connected(LEAF));

        let switch = f.stores.switches.get(LEAF).await.unwrap().unwrap().value;
        assert!(!switch.status.reachable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accelerate_collapses_requests() {
        let f = fixture().await;
        assert!(!f.reporter.accelerate(LEAF));

        f.reporter.ensure_worker(LEAF);
        assert!(f.reporter.accelerate(LEAF));
        assert!(!f.reporter.accelerate(LEAF));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(f.reporter.accelerate(LEAF));
        f.reporter.shutdown();
    }
}
