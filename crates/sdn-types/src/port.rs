//! Switch interface attribute types.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Switchport mode of an Ethernet or Port-Channel interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortMode {
    /// Untagged member of a single VLAN.
    Access,
    /// Tagged carrier of trunk-group VLANs plus a native VLAN.
    Trunk,
    /// Layer 3 interface. Conversions to and from routed are never pushed.
    Routed,
}

impl PortMode {
    pub const fn is_routed(&self) -> bool {
        matches!(self, PortMode::Routed)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            PortMode::Access => "access",
            PortMode::Trunk => "trunk",
            PortMode::Routed => "routed",
        }
    }
}

impl fmt::Display for PortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "access" => Ok(PortMode::Access),
            "trunk" => Ok(PortMode::Trunk),
            "routed" => Ok(PortMode::Routed),
            _ => Err(ParseError::InvalidPortMode(s.to_string())),
        }
    }
}

/// Link state as reported by the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Connected,
    #[serde(rename = "notconnect")]
    NotConnected,
    Disabled,
    #[serde(rename = "errdisabled")]
    ErrDisabled,
    #[default]
    Unknown,
}

impl LinkStatus {
    pub const fn is_up(&self) -> bool {
        matches!(self, LinkStatus::Connected)
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkStatus::Connected => "connected",
            LinkStatus::NotConnected => "notconnect",
            LinkStatus::Disabled => "disabled",
            LinkStatus::ErrDisabled => "errdisabled",
            LinkStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for LinkStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "connected" | "up" => Ok(LinkStatus::Connected),
            "notconnect" | "notconnected" | "down" => Ok(LinkStatus::NotConnected),
            "disabled" => Ok(LinkStatus::Disabled),
            "errdisabled" => Ok(LinkStatus::ErrDisabled),
            "unknown" => Ok(LinkStatus::Unknown),
            _ => Err(ParseError::InvalidLinkStatus(s.to_string())),
        }
    }
}

/// Role of an interface in the fabric topology.
///
/// Spine-facing interfaces are visible in status but are never created,
/// mutated or deleted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceRole {
    /// Server-facing interface (default).
    #[default]
    Host,
    /// Uplink towards the spine layer.
    Spine,
}

impl InterfaceRole {
    pub const fn is_spine(&self) -> bool {
        matches!(self, InterfaceRole::Spine)
    }
}

impl fmt::Display for InterfaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceRole::Host => write!(f, "host"),
            InterfaceRole::Spine => write!(f, "spine"),
        }
    }
}

impl FromStr for InterfaceRole {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "host" => Ok(InterfaceRole::Host),
            "spine" => Ok(InterfaceRole::Spine),
            _ => Err(ParseError::InvalidInterfaceRole(s.to_string())),
        }
    }
}

/// An independently configured logical network spanning one or more switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FabricType {
    /// Front-end L2 fabric. Exactly one interface per server.
    #[serde(rename = "frontend")]
    FrontEnd,
    /// Accelerator L3/BGP fabric. One interface per accelerator ply.
    #[serde(rename = "accelerator")]
    Accelerator,
    /// Storage L2 fabric. Zero or more interfaces per server.
    #[serde(rename = "storage")]
    Storage,
}

impl FabricType {
    /// All fabrics, in the order they are reported.
    pub const ALL: [FabricType; 3] = [
        FabricType::FrontEnd,
        FabricType::Accelerator,
        FabricType::Storage,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            FabricType::FrontEnd => "frontend",
            FabricType::Accelerator => "accelerator",
            FabricType::Storage => "storage",
        }
    }
}

impl fmt::Display for FabricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FabricType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "frontend" | "fe" => Ok(FabricType::FrontEnd),
            "accelerator" | "acc" => Ok(FabricType::Accelerator),
            "storage" | "strg" => Ok(FabricType::Storage),
            _ => Err(ParseError::InvalidFabricType(s.to_string())),
        }
    }
}
