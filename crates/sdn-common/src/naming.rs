//! Record and interface naming conventions.
//!
//! SwitchPort records are keyed `lower(port).lower(fqdn)` with `/` replaced
//! by `-`, so `Ethernet27/1` on `leaf1.sdn.test` becomes
//! `ethernet27-1.leaf1.sdn.test`. Port-channels are keyed `po<N>.<fqdn>`
//! and named `Port-Channel<N>` on the device.

use once_cell::sync::Lazy;
use regex::Regex;

/// Highest port-channel number accepted by the device.
pub const MAX_PORT_CHANNEL_ID: u32 = 999_999;

const PORT_CHANNEL_PREFIX: &str = "Port-Channel";

static ETHERNET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Ethernet[1-9][0-9]{0,2}(/[1-9][0-9]{0,2})*$").expect("Invalid regex pattern")
});

/// Record name of the SwitchPort for `port` on `fqdn`.
pub fn switch_port_name(port: &str, fqdn: &str) -> String {
    format!("{}.{}", port.to_lowercase(), fqdn.to_lowercase()).replace('/', "-")
}

/// Splits a SwitchPort record name back into `(interface, fqdn)`.
///
/// Returns `None` if the name has no FQDN part.
pub fn parse_switch_port_name(name: &str) -> Option<(String, String)> {
    let (port, fqdn) = name.split_once('.')?;
    if port.is_empty() || fqdn.is_empty() {
        return None;
    }

    let mut chars = port.chars();
    let first = chars.next()?;
    let interface = format!("{}{}", first.to_uppercase(), chars.as_str()).replace('-', "/");
    Some((interface, fqdn.to_string()))
}

/// Device interface name of port-channel `id`.
pub fn port_channel_interface(id: u32) -> String {
    format!("{}{}", PORT_CHANNEL_PREFIX, id)
}

/// Record name of port-channel `id` on `fqdn`.
pub fn port_channel_name(id: u32, fqdn: &str) -> String {
    format!("po{}.{}", id, fqdn.to_lowercase())
}

/// Parses `Port-Channel<N>` into `N`.
pub fn parse_port_channel_interface(name: &str) -> Option<u32> {
    let id: u32 = name.strip_prefix(PORT_CHANNEL_PREFIX)?.parse().ok()?;
    is_valid_port_channel_id(id).then_some(id)
}

pub fn is_valid_port_channel_id(id: u32) -> bool {
    (1..=MAX_PORT_CHANNEL_ID).contains(&id)
}

/// Returns true for `EthernetN[/M...]` names and valid port-channel names.
pub fn is_valid_port_name(name: &str) -> bool {
    ETHERNET_RE.is_match(name) || parse_port_channel_interface(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_switch_port_name() {
        assert_eq!(
            switch_port_name("Ethernet27/1", "Leaf1.SDN.test"),
            "ethernet27-1.leaf1.sdn.test"
        );
        assert_eq!(
            parse_switch_port_name("ethernet27-1.leaf1.sdn.test"),
            Some(("Ethernet27/1".to_string(), "leaf1.sdn.test".to_string()))
        );
        assert_eq!(parse_switch_port_name("ethernet1"), None);
    }

    #[test]
    fn test_port_channel_names() {
        assert_eq!(port_channel_interface(10), "Port-Channel10");
        assert_eq!(port_channel_name(10, "leaf1.sdn.test"), "po10.leaf1.sdn.test");
        assert_eq!(parse_port_channel_interface("Port-Channel10"), Some(10));
        assert_eq!(parse_port_channel_interface("Port-Channel0"), None);
        assert_eq!(parse_port_channel_interface("Port-Channel1000000"), None);
        assert_eq!(parse_port_channel_interface("Ethernet1"), None);
    }

    #[test]
    fn test_port_name_validation() {
        assert!(is_valid_port_name("Ethernet1"));
        assert!(is_valid_port_name("Ethernet27/1"));
        assert!(is_valid_port_name("Ethernet3/1/4"));
        assert!(is_valid_port_name("Port-Channel999999"));
        assert!(!is_valid_port_name("Ethernet0"));
        assert!(!is_valid_port_name("ethernet1"));
        assert!(!is_valid_port_name("Ethernet1/"));
        assert!(!is_valid_port_name("Management1"));
    }
}
