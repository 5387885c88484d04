//! In-memory switch.
//!
//! [`SimulatedSwitch`] behaves like a small EOS-style device: it keeps a VLAN
//! table, Ethernet and port-channel interfaces and a BGP community, renders
//! a deterministic running configuration and enforces the same rules a real
//! device does (VLANs must exist before assignment, port-channels must exist
//! before members join). It backs the `memory` switch client backend and the
//! test bed.

use crate::client::{InterfaceState, SwitchClient, VlanInfo};
use async_trait::async_trait;
use parking_lot::Mutex;
use sdn_common::validation::render_bgp_community;
use sdn_common::{naming, SdnError, SdnResult};
use sdn_types::{LinkStatus, Managed, PortMode, VlanId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};

/// Initial contents of a simulated switch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSeed {
    #[serde(default)]
    pub vlans: Vec<u16>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub port_channels: Vec<PortChannelSeed>,
    #[serde(default)]
    pub bgp_community: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortChannelSeed {
    pub id: u32,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct VlanEntry {
    name: String,
    trunk_groups: Vec<String>,
}

#[derive(Debug, Clone)]
struct Interface {
    mode: PortMode,
    vlan: u16,
    native_vlan: u16,
    trunk_groups: Vec<String>,
    port_channel: u32,
    description: String,
    link_status: LinkStatus,
}

impl Default for Interface {
    fn default() -> Self {
        Self {
            mode: PortMode::Access,
            vlan: VlanId::DEFAULT.as_u16(),
            native_vlan: VlanId::DEFAULT.as_u16(),
            trunk_groups: Vec::new(),
            port_channel: 0,
            description: String::new(),
            link_status: LinkStatus::Connected,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct DeviceState {
    vlans: BTreeMap<u16, VlanEntry>,
    interfaces: BTreeMap<String, Interface>,
    bgp_community: Option<i64>,
}

impl DeviceState {
    fn interface_mut(&mut self, fqdn: &str, name: &str) -> SdnResult<&mut Interface> {
        self.interfaces
            .get_mut(name)
            .ok_or_else(|| SdnError::not_found("interface", format!("{} on {}", name, fqdn)))
    }

    fn members_of(&self, id: u32) -> Vec<String> {
        self.interfaces
            .iter()
            .filter(|(_, i)| i.port_channel == id)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// A simulated switch.
pub struct SimulatedSwitch {
    fqdn: String,
    asn: u32,
    state: Mutex<DeviceState>,
    checkpoints: Mutex<HashMap<String, DeviceState>>,
    reachable: AtomicBool,
    /// Operation name -> remaining injected failures
    failures: Mutex<HashMap<String, usize>>,
}

impl SimulatedSwitch {
    pub fn new(fqdn: impl Into<String>) -> Self {
        let mut state = DeviceState::default();
        state.vlans.insert(
            VlanId::DEFAULT.as_u16(),
            VlanEntry {
                name: "default".to_string(),
                trunk_groups: Vec::new(),
            },
        );
        Self {
            fqdn: fqdn.into(),
            asn: sdn_common::defaults::BGP_COMMUNITY_ASN,
            state: Mutex::new(state),
            checkpoints: Mutex::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_seed(fqdn: impl Into<String>, seed: &DeviceSeed) -> Self {
        let mut switch = Self::new(fqdn);
        for vlan in &seed.vlans {
            switch = switch.with_vlan(*vlan);
        }
        for interface in &seed.interfaces {
            switch = switch.with_interface(interface);
        }
        for pc in &seed.port_channels {
            let members: Vec<&str> = pc.members.iter().map(String::as_str).collect();
            switch = switch.with_port_channel(pc.id, &members);
        }
        if let Some(community) = seed.bgp_community {
            switch.state.lock().bgp_community = Some(community);
        }
        switch
    }

    pub fn with_asn(mut self, asn: u32) -> Self {
        self.asn = asn;
        self
    }

    pub fn with_vlan(self, id: u16) -> Self {
        self.state.lock().vlans.entry(id).or_insert_with(|| VlanEntry {
            name: format!("VLAN{:04}", id),
            trunk_groups: Vec::new(),
        });
        self
    }

    pub fn with_interface(self, name: &str) -> Self {
        self.state
            .lock()
            .interfaces
            .entry(name.to_string())
            .or_default();
        self
    }

    pub fn with_port_channel(self, id: u32, members: &[&str]) -> Self {
        {
            let mut state = self.state.lock();
            state
                .interfaces
                .entry(naming::port_channel_interface(id))
                .or_insert_with(|| Interface {
                    link_status: LinkStatus::NotConnected,
                    ..Default::default()
                });
            for member in members {
                state
                    .interfaces
                    .entry(member.to_string())
                    .or_default()
                    .port_channel = id;
            }
        }
        self
    }

    /// Makes every subsequent call fail with a connectivity error.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fails the next `count` calls of `operation` with a transient error.
    pub fn fail_next(&self, operation: &str, count: usize) {
        self.failures.lock().insert(operation.to_string(), count);
    }

    /// Changes an interface VLAN out of band, like an operator on the CLI.
    pub fn set_manual_vlan(&self, interface: &str, vlan: u16) {
        if let Some(iface) = self.state.lock().interfaces.get_mut(interface) {
            iface.vlan = vlan;
        }
    }

    pub fn set_manual_bgp_community(&self, community: Option<i64>) {
        self.state.lock().bgp_community = community;
    }

    pub fn set_link_status(&self, interface: &str, status: LinkStatus) {
        if let Some(iface) = self.state.lock().interfaces.get_mut(interface) {
            iface.link_status = status;
        }
    }

    pub fn add_vlan(&self, id: u16) {
        self.state.lock().vlans.entry(id).or_insert_with(|| VlanEntry {
            name: format!("VLAN{:04}", id),
            trunk_groups: Vec::new(),
        });
    }

    /// Observed state of one interface, without counting as a device call.
    pub fn interface(&self, name: &str) -> Option<InterfaceState> {
        let state = self.state.lock();
        state
            .interfaces
            .get(name)
            .map(|iface| Self::observe(&state, name, iface))
    }

    pub fn has_port_channel(&self, id: u32) -> bool {
        self.state
            .lock()
            .interfaces
            .contains_key(&naming::port_channel_interface(id))
    }

    pub fn bgp_community(&self) -> Option<i64> {
        self.state.lock().bgp_community
    }

    /// Running configuration, without counting as a device call.
    pub fn running_config(&self) -> String {
        self.render(&self.state.lock())
    }

    fn check(&self, operation: &str) -> SdnResult<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(SdnError::connectivity(&self.fqdn, "connection refused"));
        }
        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SdnError::transient(&self.fqdn, operation, "injected failure"));
            }
        }
        Ok(())
    }

    fn observe(state: &DeviceState, name: &str, iface: &Interface) -> InterfaceState {
        let members = naming::parse_port_channel_interface(name)
            .map(|id| state.members_of(id))
            .unwrap_or_default();
        InterfaceState {
            name: name.to_string(),
            mode: Some(iface.mode),
            vlan: i64::from(iface.vlan),
            native_vlan: i64::from(iface.native_vlan),
            trunk_groups: iface.trunk_groups.clone(),
            port_channel: i64::from(iface.port_channel),
            description: iface.description.clone(),
            link_status: iface.link_status,
            members,
        }
    }

    fn render(&self, state: &DeviceState) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "hostname {}", self.fqdn);
        for (id, vlan) in &state.vlans {
            let _ = writeln!(out, "!\nvlan {}\n   name {}", id, vlan.name);
            for group in &vlan.trunk_groups {
                let _ = writeln!(out, "   trunk group {}", group);
            }
        }
        for (name, iface) in &state.interfaces {
            let _ = writeln!(out, "!\ninterface {}", name);
            if !iface.description.is_empty() {
                let _ = writeln!(out, "   description {}", iface.description);
            }
            let _ = writeln!(out, "   switchport mode {}", iface.mode);
            let _ = writeln!(out, "   switchport access vlan {}", iface.vlan);
            let _ = writeln!(out, "   switchport trunk native vlan {}", iface.native_vlan);
            for group in &iface.trunk_groups {
                let _ = writeln!(out, "   switchport trunk group {}", group);
            }
            if iface.port_channel > 0 {
                let _ = writeln!(out, "   channel-group {} mode active", iface.port_channel);
            }
        }
        if let Some(community) = state.bgp_community {
            let _ = writeln!(
                out,
                "!\nroute-map RM-COMMUNITY permit 10\n   set community {}",
                render_bgp_community(self.asn, community)
            );
        }
        out
    }
}

#[async_trait]
impl SwitchClient for SimulatedSwitch {
    fn fqdn(&self) -> String {
        self.fqdn.clone()
    }

    async fn get_running_config(&self) -> SdnResult<String> {
        self.check("get_running_config")?;
        Ok(self.running_config())
    }

    async fn get_vlans(&self) -> SdnResult<Vec<VlanInfo>> {
        self.check("get_vlans")?;
        let state = self.state.lock();
        Ok(state
            .vlans
            .iter()
            .map(|(id, vlan)| VlanInfo {
                id: *id,
                name: vlan.name.clone(),
                status: "active".to_string(),
                interfaces: state
                    .interfaces
                    .iter()
                    .filter(|(_, i)| i.vlan == *id)
                    .map(|(name, _)| name.clone())
                    .collect(),
                trunk_groups: vlan.trunk_groups.clone(),
            })
            .collect())
    }

    async fn get_switch_ports(&self) -> SdnResult<Vec<InterfaceState>> {
        self.check("get_switch_ports")?;
        let state = self.state.lock();
        Ok(state
            .interfaces
            .iter()
            .map(|(name, iface)| Self::observe(&state, name, iface))
            .collect())
    }

    async fn get_bgp_community(&self) -> SdnResult<Managed> {
        self.check("get_bgp_community")?;
        Ok(self
            .state
            .lock()
            .bgp_community
            .map(Managed::Value)
            .unwrap_or_default())
    }

    async fn update_vlan(&self, interface: &str, vlan: VlanId) -> SdnResult<()> {
        self.check("update_vlan")?;
        let mut state = self.state.lock();
        if !state.vlans.contains_key(&vlan.as_u16()) {
            return Err(SdnError::validation(
                interface,
                format!("vlan {} does not exist on {}", vlan, self.fqdn),
            ));
        }
        state.interface_mut(&self.fqdn, interface)?.vlan = vlan.as_u16();
        Ok(())
    }

    async fn update_mode(&self, interface: &str, mode: PortMode) -> SdnResult<()> {
        self.check("update_mode")?;
        let mut state = self.state.lock();
        let iface = state.interface_mut(&self.fqdn, interface)?;
        if mode == PortMode::Trunk && iface.mode != PortMode::Trunk {
            iface.vlan = VlanId::DEFAULT.as_u16();
        }
        iface.mode = mode;
        Ok(())
    }

    async fn update_description(&self, interface: &str, description: &str) -> SdnResult<()> {
        self.check("update_description")?;
        self.state
            .lock()
            .interface_mut(&self.fqdn, interface)?
            .description = description.to_string();
        Ok(())
    }

    async fn update_native_vlan(&self, interface: &str, vlan: VlanId) -> SdnResult<()> {
        self.check("update_native_vlan")?;
        let mut state = self.state.lock();
        if !state.vlans.contains_key(&vlan.as_u16()) {
            return Err(SdnError::validation(
                interface,
                format!("native vlan {} does not exist on {}", vlan, self.fqdn),
            ));
        }
        state.interface_mut(&self.fqdn, interface)?.native_vlan = vlan.as_u16();
        Ok(())
    }

    async fn update_trunk_groups(&self, interface: &str, groups: &[String]) -> SdnResult<()> {
        self.check("update_trunk_groups")?;
        let mut sorted = groups.to_vec();
        sorted.sort();
        sorted.dedup();
        self.state
            .lock()
            .interface_mut(&self.fqdn, interface)?
            .trunk_groups = sorted;
        Ok(())
    }

    async fn update_bgp_community(&self, community: i64) -> SdnResult<()> {
        self.check("update_bgp_community")?;
        self.state.lock().bgp_community = Some(community);
        Ok(())
    }

    async fn create_port_channel(&self, id: u32) -> SdnResult<()> {
        self.check("create_port_channel")?;
        let name = naming::port_channel_interface(id);
        let mut state = self.state.lock();
        if state.interfaces.contains_key(&name) {
            return Err(SdnError::conflict(
                format!("{} on {}", name, self.fqdn),
                "port-channel already exists",
            ));
        }
        state.interfaces.insert(
            name,
            Interface {
                link_status: LinkStatus::NotConnected,
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn delete_port_channel(&self, id: u32) -> SdnResult<()> {
        self.check("delete_port_channel")?;
        let name = naming::port_channel_interface(id);
        let mut state = self.state.lock();
        if state.interfaces.remove(&name).is_none() {
            return Err(SdnError::not_found(
                "port-channel",
                format!("{} on {}", name, self.fqdn),
            ));
        }
        for iface in state.interfaces.values_mut() {
            if iface.port_channel == id {
                iface.port_channel = 0;
            }
        }
        Ok(())
    }

    async fn add_to_port_channel(&self, interface: &str, id: u32) -> SdnResult<()> {
        self.check("add_to_port_channel")?;
        let name = naming::port_channel_interface(id);
        let mut state = self.state.lock();
        if !state.interfaces.contains_key(&name) {
            return Err(SdnError::not_found(
                "port-channel",
                format!("{} on {}", name, self.fqdn),
            ));
        }
        state.interface_mut(&self.fqdn, interface)?.port_channel = id;
        Ok(())
    }

    async fn remove_from_port_channel(&self, interface: &str) -> SdnResult<()> {
        self.check("remove_from_port_channel")?;
        self.state
            .lock()
            .interface_mut(&self.fqdn, interface)?
            .port_channel = 0;
        Ok(())
    }

    async fn validate_connection(&self) -> SdnResult<()> {
        self.check("validate_connection")
    }

    async fn save_config(&self, checkpoint: &str) -> SdnResult<()> {
        self.check("save_config")?;
        let snapshot = self.state.lock().clone();
        self.checkpoints
            .lock()
            .insert(checkpoint.to_string(), snapshot);
        Ok(())
    }

    async fn restore_config(&self, checkpoint: &str) -> SdnResult<()> {
        self.check("restore_config")?;
        let snapshot = self
            .checkpoints
            .lock()
            .get(checkpoint)
            .cloned()
            .ok_or_else(|| SdnError::not_found("checkpoint", checkpoint))?;
        *self.state.lock() = snapshot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    fn leaf() -> SimulatedSwitch {
        SimulatedSwitch::new("leaf1.sdn.test")
            .with_vlan(100)
            .with_vlan(4008)
            .with_interface("Ethernet1")
            .with_interface("Ethernet2")
    }

    fn vlan(id: u16) -> VlanId {
        VlanId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_update_vlan_requires_vlan_table_entry() {
        let switch = leaf();
        let before = switch.running_config();

        let err = switch.update_vlan("Ethernet1", vlan(7)).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(switch.running_config(), before);

        assert_ok!(switch.update_vlan("Ethernet1", vlan(4008)).await);
        assert_eq!(switch.interface("Ethernet1").unwrap().vlan, 4008);
    }

    #[tokio::test]
    async fn test_trunk_mode_resets_access_vlan() {
        let switch = leaf();
        assert_ok!(switch.update_vlan("Ethernet1", vlan(100)).await);
        assert_ok!(switch.update_mode("Ethernet1", PortMode::Trunk).await);

        let observed = switch.interface("Ethernet1").unwrap();
        assert_eq!(observed.mode, Some(PortMode::Trunk));
        assert_eq!(observed.vlan, 1);
        assert_eq!(observed.native_vlan, 1);
    }

    #[tokio::test]
    async fn test_port_channel_lifecycle() {
        let switch = leaf();
        assert_ok!(switch.create_port_channel(10).await);
        let err = switch.create_port_channel(10).await.unwrap_err();
        assert!(err.is_success_equivalent());

        assert_err!(switch.add_to_port_channel("Ethernet1", 11).await);
        assert_ok!(switch.add_to_port_channel("Ethernet1", 10).await);
        let pc = switch.interface("Port-Channel10").unwrap();
        assert_eq!(pc.members, vec!["Ethernet1".to_string()]);

        assert_ok!(switch.delete_port_channel(10).await);
        assert!(!switch.has_port_channel(10));
        assert_eq!(switch.interface("Ethernet1").unwrap().port_channel, 0);
    }

    #[tokio::test]
    async fn test_save_and_restore() {
        let switch = leaf();
        assert_ok!(switch.save_config("baseline").await);
        let baseline = switch.running_config();

        assert_ok!(switch.update_description("Ethernet2", "server 7").await);
        assert_ok!(switch.update_bgp_community(5).await);
        assert!(switch.running_config().contains("set community 101:5"));

        assert_ok!(switch.restore_config("baseline").await);
        assert_eq!(switch.running_config(), baseline);
        assert_err!(switch.restore_config("missing").await);
    }

    #[tokio::test]
    async fn test_unreachable_and_injected_failures() {
        let switch = leaf();
        switch.fail_next("get_switch_ports", 1);
        let err = switch.get_switch_ports().await.unwrap_err();
        assert!(err.is_retryable());
        assert_ok!(switch.get_switch_ports().await);

        switch.set_reachable(false);
        let err = switch.validate_connection().await.unwrap_err();
        assert!(matches!(err, SdnError::Connectivity { .. }));
    }

    #[tokio::test]
    async fn test_seed() {
        let seed = DeviceSeed {
            vlans: vec![100, 200],
            interfaces: vec!["Ethernet1".to_string()],
            port_channels: vec![PortChannelSeed {
                id: 20,
                members: vec!["Ethernet48".to_string()],
            }],
            bgp_community: Some(3),
        };
        let switch = SimulatedSwitch::from_seed("leaf2", &seed);

        let vlans: Vec<u16> = switch.get_vlans().await.unwrap().iter().map(|v| v.id).collect();
        assert_eq!(vlans, vec![1, 100, 200]);
        assert_eq!(switch.get_bgp_community().await.unwrap(), Managed::Value(3));
        assert_eq!(
            switch.interface("Port-Channel20").unwrap().members,
            vec!["Ethernet48".to_string()]
        );
    }
}
