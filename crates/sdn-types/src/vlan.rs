//! 802.1Q VLAN identifiers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A VLAN id a switch will accept on a port (1-4094).
///
/// Desired-state records carry VLANs as signed integers so they can hold the
/// unmanaged sentinel; [`VlanId::from_i64`] is the only way from there to a
/// value that may be pushed to a device.
///
/// ```
/// use sdn_types::VlanId;
///
/// assert_eq!(VlanId::from_i64(4008).unwrap().as_u16(), 4008);
/// assert!(VlanId::from_i64(-1).is_err());
/// assert!(VlanId::new(4095).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = 4094;

    /// Access VLAN a port falls back to when it is reset.
    pub const DEFAULT: VlanId = VlanId(1);

    pub const fn new(id: u16) -> Result<Self, ParseError> {
        if id >= Self::MIN && id <= Self::MAX {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id as i64))
        }
    }

    pub fn from_i64(id: i64) -> Result<Self, ParseError> {
        match u16::try_from(id) {
            Ok(narrowed) => VlanId::new(narrowed),
            Err(_) => Err(ParseError::InvalidVlanId(id)),
        }
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    pub const fn as_i64(&self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reserved_ids_rejected() {
        assert!(VlanId::new(1).is_ok());
        assert!(VlanId::new(4094).is_ok());
        assert_eq!(VlanId::new(0), Err(ParseError::InvalidVlanId(0)));
        assert_eq!(VlanId::new(4095), Err(ParseError::InvalidVlanId(4095)));
    }

    #[test]
    fn test_signed_value_keeps_offending_id() {
        assert_eq!(VlanId::from_i64(4008).unwrap().as_u16(), 4008);
        assert_eq!(VlanId::from_i64(-1), Err(ParseError::InvalidVlanId(-1)));

        let err = VlanId::from_i64(70000).unwrap_err();
        assert_eq!(err, ParseError::InvalidVlanId(70000));
        assert_eq!(err.to_string(), "invalid VLAN ID: 70000 (must be 1-4094)");
    }

    #[test]
    fn test_serde_rejects_reserved() {
        assert!(serde_json::from_str::<VlanId>("0").is_err());
        let vlan: VlanId = serde_json::from_str("55").unwrap();
        assert_eq!(vlan, VlanId::new(55).unwrap());
    }
}
