//! Input validation for desired-state values.
//!
//! Everything a reconciler is about to push to a device, and everything the
//! API accepts, passes through these checks first.

use crate::error::{SdnError, SdnResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Maximum length of a trunk group name.
pub const MAX_TRUNK_GROUP_LEN: usize = 32;

/// Maximum length of an interface description.
pub const MAX_DESCRIPTION_LEN: usize = 100;

/// Highest BGP community value.
pub const MAX_BGP_COMMUNITY: i64 = 65_535;

static TRUNK_GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Invalid regex pattern"));

static DESCRIPTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9\s_\-/,]+$").expect("Invalid regex pattern"));

static HOSTNAME_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").expect("Invalid regex pattern")
});

/// Default accepted switch FQDN shapes.
pub const DEFAULT_FQDN_PATTERNS: &[&str] = &[
    r"^[a-z0-9]+-[a-z0-9]+-[a-z0-9-]+\.[a-z0-9.-]+$",
    r"^clab-[A-Za-z0-9-]+$",
];

/// A set of VLAN ids parsed from `100-3999,4008` style strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlanSet {
    ranges: Vec<(i64, i64)>,
}

impl VlanSet {
    pub fn contains(&self, vlan: i64) -> bool {
        self.ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&vlan))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl FromStr for VlanSet {
    type Err = SdnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ranges = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let range = match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo = parse_vlan_bound(lo.trim(), s)?;
                    let hi = parse_vlan_bound(hi.trim(), s)?;
                    if lo >= hi {
                        return Err(SdnError::invalid_config(
                            "vlan range",
                            format!("'{}': start {} is not below end {}", s, lo, hi),
                        ));
                    }
                    (lo, hi)
                }
                None => {
                    let id = parse_vlan_bound(part, s)?;
                    (id, id)
                }
            };
            ranges.push(range);
        }
        Ok(Self { ranges })
    }
}

impl fmt::Display for VlanSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .ranges
            .iter()
            .map(|(lo, hi)| {
                if lo == hi {
                    lo.to_string()
                } else {
                    format!("{}-{}", lo, hi)
                }
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}

fn parse_vlan_bound(value: &str, whole: &str) -> SdnResult<i64> {
    let id: i64 = value.parse().map_err(|_| {
        SdnError::invalid_config("vlan range", format!("'{}': '{}' is not a number", whole, value))
    })?;
    if !(1..=4094).contains(&id) {
        return Err(SdnError::invalid_config(
            "vlan range",
            format!("'{}': {} is outside 1-4094", whole, id),
        ));
    }
    Ok(id)
}

/// Trims, sorts and de-duplicates a trunk group list.
pub fn normalize_trunk_groups(groups: &[String]) -> Vec<String> {
    groups
        .iter()
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Validates and normalizes a trunk group list.
///
/// `allowed` restricts the accepted names when non-empty.
pub fn validate_trunk_groups(
    resource: &str,
    groups: &[String],
    allowed: &[String],
) -> SdnResult<Vec<String>> {
    let normalized = normalize_trunk_groups(groups);
    for group in &normalized {
        if group.len() > MAX_TRUNK_GROUP_LEN {
            return Err(SdnError::validation(
                resource,
                format!("trunk group '{}' exceeds {} characters", group, MAX_TRUNK_GROUP_LEN),
            ));
        }
        if !TRUNK_GROUP_RE.is_match(group) {
            return Err(SdnError::validation(
                resource,
                format!("trunk group '{}' contains invalid characters", group),
            ));
        }
        if !allowed.is_empty() && !allowed.iter().any(|a| a == group) {
            return Err(SdnError::validation(
                resource,
                format!("trunk group '{}' is not allowed", group),
            ));
        }
    }
    Ok(normalized)
}

/// Validates an interface description, returning it trimmed.
pub fn validate_description(resource: &str, description: &str) -> SdnResult<String> {
    let trimmed = description.trim();
    if trimmed.len() > MAX_DESCRIPTION_LEN {
        return Err(SdnError::validation(
            resource,
            format!("description exceeds {} characters", MAX_DESCRIPTION_LEN),
        ));
    }
    if !DESCRIPTION_RE.is_match(trimmed) {
        return Err(SdnError::validation(
            resource,
            format!("description '{}' contains invalid characters", trimmed),
        ));
    }
    Ok(trimmed.to_string())
}

pub fn validate_bgp_community(resource: &str, value: i64) -> SdnResult<i64> {
    if !(0..=MAX_BGP_COMMUNITY).contains(&value) {
        return Err(SdnError::validation(
            resource,
            format!("bgp community {} is outside 0-{}", value, MAX_BGP_COMMUNITY),
        ));
    }
    Ok(value)
}

/// Renders a BGP community as `<asn>:<value>`.
pub fn render_bgp_community(asn: u32, value: i64) -> String {
    format!("{}:{}", asn, value)
}

/// Parses the value part of `<asn>:<value>`.
pub fn parse_bgp_community(s: &str) -> Option<i64> {
    let (_, value) = s.trim().split_once(':')?;
    value.parse().ok()
}

/// Accepted switch FQDN shapes and datacenters.
#[derive(Debug, Clone)]
pub struct FqdnPolicy {
    patterns: Vec<Regex>,
    allowed_datacenters: Vec<String>,
}

impl FqdnPolicy {
    pub fn new(patterns: &[String], allowed_datacenters: &[String]) -> SdnResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    SdnError::invalid_config("fqdn_patterns", format!("'{}': {}", p, e))
                })
            })
            .collect::<SdnResult<Vec<_>>>()?;
        Ok(Self {
            patterns,
            allowed_datacenters: allowed_datacenters.to_vec(),
        })
    }

    pub fn validate(&self, fqdn: &str) -> SdnResult<()> {
        if fqdn.trim().is_empty() {
            return Err(SdnError::validation("switch", "fqdn is empty"));
        }
        if !self.allowed_datacenters.is_empty() {
            let datacenter = fqdn.split('-').next().unwrap_or_default();
            if !self.allowed_datacenters.iter().any(|dc| dc == datacenter) {
                return Err(SdnError::validation(
                    fqdn,
                    format!("datacenter '{}' is not allowed", datacenter),
                ));
            }
        }
        if !self.patterns.is_empty() && !self.patterns.iter().any(|re| re.is_match(fqdn)) {
            return Err(SdnError::validation(
                fqdn,
                "fqdn does not match any accepted pattern",
            ));
        }
        Ok(())
    }
}

impl Default for FqdnPolicy {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_FQDN_PATTERNS
                .iter()
                .map(|p| Regex::new(p).expect("Invalid regex pattern"))
                .collect(),
            allowed_datacenters: Vec::new(),
        }
    }
}

pub fn validate_ipv4(resource: &str, ip: &str) -> SdnResult<Ipv4Addr> {
    ip.trim()
        .parse()
        .map_err(|_| SdnError::validation(resource, format!("'{}' is not an IPv4 address", ip)))
}

/// Returns true for syntactically valid RFC 1123 host names.
pub fn is_valid_hostname(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    !name.is_empty()
        && name.len() <= 253
        && !name.split('.').all(|l| l.chars().all(|c| c.is_ascii_digit()))
        && name.split('.').all(|label| HOSTNAME_LABEL_RE.is_match(label))
}

/// Validates an address override: an IPv4 literal, or a host name the
/// switch FQDN policy accepts.
pub fn validate_address_override(
    resource: &str,
    value: &str,
    policy: &FqdnPolicy,
) -> SdnResult<String> {
    let value = value.trim();
    if value.parse::<Ipv4Addr>().is_ok() {
        return Ok(value.to_string());
    }
    if !is_valid_hostname(value) {
        return Err(SdnError::validation(
            resource,
            format!("address override '{}' is neither an IPv4 address nor a host name", value),
        ));
    }
    let host = value.strip_suffix('.').unwrap_or(value);
    if let Err(e) = policy.validate(host) {
        return Err(SdnError::validation(
            resource,
            format!("address override '{}' is not an accepted switch name: {}", value, e),
        ));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_vlan_set() {
        let set: VlanSet = "100-3999,4008".parse().unwrap();
        assert!(set.contains(100));
        assert!(set.contains(3999));
        assert!(set.contains(4008));
        assert!(!set.contains(99));
        assert!(!set.contains(4000));
        assert_eq!(set.to_string(), "100-3999,4008");

        assert!("200-100".parse::<VlanSet>().is_err());
        assert!("100-100".parse::<VlanSet>().is_err());
        assert!("abc".parse::<VlanSet>().is_err());
        assert!("5000".parse::<VlanSet>().is_err());
        assert!("".parse::<VlanSet>().unwrap().is_empty());
    }

    #[test]
    fn test_trunk_groups() {
        let groups = vec![" tg-b".to_string(), "tg_a".to_string(), "tg-b".to_string()];
        assert_eq!(
            validate_trunk_groups("p", &groups, &[]).unwrap(),
            vec!["tg-b".to_string(), "tg_a".to_string()]
        );

        let bad = vec!["tg b".to_string()];
        assert!(validate_trunk_groups("p", &bad, &[]).is_err());

        let long = vec!["x".repeat(33)];
        assert!(validate_trunk_groups("p", &long, &[]).is_err());

        let allowed = vec!["tg_a".to_string()];
        assert!(validate_trunk_groups("p", &groups, &allowed).is_err());
    }

    #[test]
    fn test_description() {
        assert_eq!(validate_description("p", "  rack 4, row/2 ").unwrap(), "rack 4, row/2");
        assert!(validate_description("p", "bad;desc").is_err());
        assert!(validate_description("p", &"a".repeat(101)).is_err());
    }

    #[test]
    fn test_bgp_community() {
        assert_eq!(render_bgp_community(101, 5), "101:5");
        assert_eq!(parse_bgp_community("101:5"), Some(5));
        assert_eq!(parse_bgp_community("garbage"), None);
        assert!(validate_bgp_community("s", 65535).is_ok());
        assert!(validate_bgp_community("s", 65536).is_err());
    }

    #[test]
    fn test_fqdn_policy() {
        let policy = FqdnPolicy::default();
        assert!(policy.validate("dc1-r12-leaf1.sdn.test").is_ok());
        assert!(policy.validate("clab-fabric-leaf1").is_ok());
        assert!(policy.validate("").is_err());
        assert!(policy.validate("leaf1").is_err());

        let strict = FqdnPolicy::new(&[], &["dc1".to_string()]).unwrap();
        assert!(strict.validate("dc1-r12-leaf1.sdn.test").is_ok());
        assert!(strict.validate("dc2-r12-leaf1.sdn.test").is_err());

        assert!(FqdnPolicy::new(&["(".to_string()], &[]).is_err());
    }

    #[test]
    fn test_address_override() {
        let policy = FqdnPolicy::default();
        let check = |value| validate_address_override("s", value, &policy);
        assert_eq!(check("10.0.0.1").unwrap(), "10.0.0.1");
        assert!(check("dc1-r12-leaf1-mgmt.sdn.test").is_ok());
        assert!(check("clab-frontendonly-frontend-leaf1").is_ok());
        assert!(check("999.1.1.1").is_err());
        assert!(check("bad host!").is_err());
        assert!(check("").is_err());

        // Well-formed host names outside the switch naming policy
        let err = check("invalid-clab-frontendonly-frontend-leaf1").unwrap_err();
        assert!(err.to_string().contains("not an accepted switch name"));
        assert!(check("leaf1-mgmt").is_err());

        let strict = FqdnPolicy::new(&[], &["dc1".to_string()]).unwrap();
        assert!(validate_address_override("s", "dc2-r1-leaf1.sdn.test", &strict).is_err());
        assert!(validate_ipv4("s", "10.0.0.1/24").is_err());
    }
}
