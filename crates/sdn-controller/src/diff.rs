//! Desired versus observed switchport configuration.
//!
//! A [`PortDiff`] lists the device calls needed to converge one interface.
//! It is validated as a whole before the first call is made, and applied in
//! a fixed order: mode, description, VLAN, trunk groups, native VLAN,
//! port-channel membership.

use crate::config::Settings;
use sdn_common::resources::{PortChannelSpec, PortChannelStatus, SwitchPortSpec, SwitchPortStatus};
use sdn_common::validation::{normalize_trunk_groups, validate_description, validate_trunk_groups};
use sdn_common::{naming, SdnError, SdnResult};
use sdn_switch_client::{SwitchClient, VlanInfo};
use sdn_types::{Managed, PortMode, VlanId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortChannelChange {
    Join(u32),
    Leave,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortDiff {
    pub mode: Option<PortMode>,
    pub description: Option<String>,
    pub vlan: Option<i64>,
    pub trunk_groups: Option<Vec<String>>,
    pub native_vlan: Option<i64>,
    pub port_channel: Option<PortChannelChange>,
}

/// Diff for a SwitchPort record.
pub fn switch_port_diff(
    spec: &SwitchPortSpec,
    status: &SwitchPortStatus,
    port_channels_enabled: bool,
) -> PortDiff {
    let vlan = spec.vlan.positive().filter(|v| {
        let member_free =
            spec.port_channel.positive().is_none() || status.port_channel == 0;
        (status.vlan != 0 || (spec.mode == Some(PortMode::Access) && member_free))
            && *v != status.vlan
    });

    let port_channel = if port_channels_enabled {
        match spec.port_channel {
            Managed::Unmanaged => None,
            Managed::Value(0) if status.port_channel != 0 => Some(PortChannelChange::Leave),
            Managed::Value(0) => None,
            Managed::Value(id) if id != status.port_channel => {
                u32::try_from(id).ok().map(PortChannelChange::Join)
            }
            Managed::Value(_) => None,
        }
    } else {
        None
    };

    PortDiff {
        mode: mode_change(spec.mode, status.mode),
        description: description_change(&spec.description, &status.description),
        vlan,
        trunk_groups: trunk_group_change(spec.trunk_groups.as_deref(), &status.trunk_groups),
        native_vlan: native_vlan_change(spec.native_vlan, status.native_vlan),
        port_channel,
    }
}

/// Diff for a PortChannel record. Membership is owned by the member ports.
pub fn port_channel_diff(spec: &PortChannelSpec, status: &PortChannelStatus) -> PortDiff {
    let vlan = spec.vlan.positive().filter(|v| {
        (status.vlan != 0 || spec.mode == Some(PortMode::Access)) && *v != status.vlan
    });

    PortDiff {
        mode: mode_change(spec.mode, status.mode),
        description: description_change(&spec.description, &status.description),
        vlan,
        trunk_groups: trunk_group_change(spec.trunk_groups.as_deref(), &status.trunk_groups),
        native_vlan: native_vlan_change(spec.native_vlan, status.native_vlan),
        port_channel: None,
    }
}

fn mode_change(desired: Option<PortMode>, observed: Option<PortMode>) -> Option<PortMode> {
    let desired = desired.filter(|m| !m.is_routed())?;
    if observed.is_some_and(|m| m.is_routed()) || observed == Some(desired) {
        return None;
    }
    Some(desired)
}

fn description_change(desired: &str, observed: &str) -> Option<String> {
    let desired = desired.trim();
    (!desired.is_empty() && desired != observed.trim()).then(|| desired.to_string())
}

fn trunk_group_change(desired: Option<&[String]>, observed: &[String]) -> Option<Vec<String>> {
    let desired = normalize_trunk_groups(desired?);
    (desired != normalize_trunk_groups(observed)).then_some(desired)
}

fn native_vlan_change(desired: Managed, observed: i64) -> Option<i64> {
    desired.positive().filter(|v| *v != observed)
}

impl PortDiff {
    pub fn is_empty(&self) -> bool {
        *self == PortDiff::default()
    }

    /// Field names in push order.
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.mode.is_some() {
            fields.push("mode");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.vlan.is_some() {
            fields.push("vlan");
        }
        if self.trunk_groups.is_some() {
            fields.push("trunk_groups");
        }
        if self.native_vlan.is_some() {
            fields.push("native_vlan");
        }
        if self.port_channel.is_some() {
            fields.push("port_channel");
        }
        fields
    }

    /// True when validation needs the switch's VLAN table.
    pub fn needs_vlan_table(&self) -> bool {
        self.vlan.is_some() || self.native_vlan.is_some()
    }

    /// Checks every field against policy and, when given, the VLAN table.
    ///
    /// Nothing has been written when this fails.
    pub fn validate(
        &self,
        resource: &str,
        settings: &Settings,
        vlan_table: Option<&[VlanInfo]>,
    ) -> SdnResult<()> {
        let on_switch = |vlan: i64| {
            vlan_table.map_or(true, |table| table.iter().any(|v| i64::from(v.id) == vlan))
        };

        if let Some(description) = &self.description {
            validate_description(resource, description)?;
        }
        if let Some(vlan) = self.vlan {
            if !settings.allowed_vlans.contains(vlan) {
                return Err(SdnError::validation(
                    resource,
                    format!("vlan {} is outside the allowed set {}", vlan, settings.allowed_vlans),
                ));
            }
            if !on_switch(vlan) {
                return Err(SdnError::validation(
                    resource,
                    format!("vlan {} does not exist on the switch", vlan),
                ));
            }
        }
        if let Some(groups) = &self.trunk_groups {
            validate_trunk_groups(resource, groups, &settings.allowed_trunk_groups)?;
        }
        if let Some(native) = self.native_vlan {
            if !settings.allowed_native_vlans.contains(native) {
                return Err(SdnError::validation(
                    resource,
                    format!(
                        "native vlan {} is outside the allowed set {}",
                        native, settings.allowed_native_vlans
                    ),
                ));
            }
            if !on_switch(native) {
                return Err(SdnError::validation(
                    resource,
                    format!("native vlan {} does not exist on the switch", native),
                ));
            }
        }
        if let Some(PortChannelChange::Join(id)) = self.port_channel {
            if !naming::is_valid_port_channel_id(id) {
                return Err(SdnError::validation(
                    resource,
                    format!("port-channel id {} is out of range", id),
                ));
            }
        }
        Ok(())
    }

    /// Pushes the diff to `interface`, stopping at the first failed call.
    pub async fn apply(&self, client: &dyn SwitchClient, interface: &str) -> SdnResult<()> {
        let vlan_id = |v: i64| {
            VlanId::from_i64(v).map_err(|e| SdnError::validation(interface, e.to_string()))
        };

        if let Some(mode) = self.mode {
            client.update_mode(interface, mode).await?;
        }
        if let Some(description) = &self.description {
            client.update_description(interface, description).await?;
        }
        if let Some(vlan) = self.vlan {
            client.update_vlan(interface, vlan_id(vlan)?).await?;
        }
        if let Some(groups) = &self.trunk_groups {
            client.update_trunk_groups(interface, groups).await?;
        }
        if let Some(native) = self.native_vlan {
            client.update_native_vlan(interface, vlan_id(native)?).await?;
        }
        match self.port_channel {
            Some(PortChannelChange::Join(id)) => client.add_to_port_channel(interface, id).await?,
            Some(PortChannelChange::Leave) => client.remove_from_port_channel(interface).await?,
            None => {}
        }
        Ok(())
    }
}
