//! The universal "unmanaged" sentinel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A desired-state integer field that may be left unmanaged.
///
/// On the wire (records, config, API payloads) the field is a plain signed
/// integer where `-1` (or any negative value) means "do not touch". In code
/// the distinction is explicit so an unmanaged value can never be pushed to
/// a device by accident.
///
/// ```
/// use sdn_types::Managed;
///
/// let vlan: Managed = serde_json::from_str("-1").unwrap();
/// assert!(vlan.is_unmanaged());
///
/// let vlan = Managed::Value(4008);
/// assert_eq!(serde_json::to_string(&vlan).unwrap(), "4008");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Managed {
    #[default]
    Unmanaged,
    Value(i64),
}

impl Managed {
    /// Wire representation of [`Managed::Unmanaged`].
    pub const SENTINEL: i64 = -1;

    pub const fn is_unmanaged(&self) -> bool {
        matches!(self, Managed::Unmanaged)
    }

    /// The managed value, if any.
    pub const fn value(&self) -> Option<i64> {
        match self {
            Managed::Unmanaged => None,
            Managed::Value(v) => Some(*v),
        }
    }

    /// The managed value when it is strictly positive.
    ///
    /// VLAN and BGP community fields treat `0` as "never set", so only
    /// positive values are candidates for a device push.
    pub const fn positive(&self) -> Option<i64> {
        match self {
            Managed::Value(v) if *v > 0 => Some(*v),
            _ => None,
        }
    }

    pub const fn as_i64(&self) -> i64 {
        match self {
            Managed::Unmanaged => Self::SENTINEL,
            Managed::Value(v) => *v,
        }
    }
}

impl From<i64> for Managed {
    fn from(v: i64) -> Self {
        if v < 0 {
            Managed::Unmanaged
        } else {
            Managed::Value(v)
        }
    }
}

impl From<Managed> for i64 {
    fn from(m: Managed) -> i64 {
        m.as_i64()
    }
}

impl fmt::Display for Managed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}
