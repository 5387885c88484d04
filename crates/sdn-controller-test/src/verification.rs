//! Verification helpers for controller tests
//!
//! Assertions against simulated devices, running-config diffs and bounded
//! waiting for asynchronous convergence.

use sdn_switch_client::{InterfaceState, SimulatedSwitch, SwitchClient};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Interface '{interface}' not found on {switch}")]
    InterfaceNotFound { switch: String, interface: String },

    #[error("Value mismatch for {interface}.{field}: expected '{expected}', got '{actual}'")]
    ValueMismatch {
        interface: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Running config changed:\n{diff}")]
    ConfigChanged { diff: String },

    #[error("Condition '{what}' not met within {timeout:?}")]
    Timeout { what: String, timeout: Duration },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// One changed line of a running config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Removed(String),
    Added(String),
}

/// Line diff between two running configs, ignoring line order within the
/// config. Each line present in one config but not the other is reported
/// once per missing occurrence.
pub fn config_diff(before: &str, after: &str) -> Vec<DiffLine> {
    let mut remaining: Vec<&str> = after.lines().collect();
    let mut diff = Vec::new();
    for line in before.lines() {
        match remaining.iter().position(|l| *l == line) {
            Some(i) => {
                remaining.remove(i);
            }
            None => diff.push(DiffLine::Removed(line.to_string())),
        }
    }
    diff.extend(remaining.into_iter().map(|l| DiffLine::Added(l.to_string())));
    diff
}

/// Device state verifier
pub struct DeviceVerifier {
    device: Arc<SimulatedSwitch>,
}

impl DeviceVerifier {
    pub fn new(device: Arc<SimulatedSwitch>) -> Self {
        Self { device }
    }

    fn interface(&self, name: &str) -> VerifyResult<InterfaceState> {
        self.device
            .interface(name)
            .ok_or_else(|| VerificationError::InterfaceNotFound {
                switch: self.device.fqdn(),
                interface: name.to_string(),
            })
    }

    fn check(interface: &str, field: &str, expected: String, actual: String) -> VerifyResult<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(VerificationError::ValueMismatch {
                interface: interface.to_string(),
                field: field.to_string(),
                expected,
                actual,
            })
        }
    }

    /// Verify the access VLAN of an interface
    pub fn assert_vlan(&self, interface: &str, vlan: i64) -> VerifyResult<()> {
        let actual = self.interface(interface)?.vlan;
        Self::check(interface, "vlan", vlan.to_string(), actual.to_string())
    }

    /// Verify the description of an interface
    pub fn assert_description(&self, interface: &str, description: &str) -> VerifyResult<()> {
        let actual = self.interface(interface)?.description;
        Self::check(interface, "description", description.to_string(), actual)
    }

    /// Verify the port-channel an interface is bundled into (`0` for none)
    pub fn assert_port_channel(&self, interface: &str, id: i64) -> VerifyResult<()> {
        let actual = self.interface(interface)?.port_channel;
        Self::check(interface, "port_channel", id.to_string(), actual.to_string())
    }

    /// Verify the running config still equals `baseline`
    pub fn assert_unchanged(&self, baseline: &str) -> VerifyResult<()> {
        let diff = config_diff(baseline, &self.device.running_config());
        if diff.is_empty() {
            Ok(())
        } else {
            Err(VerificationError::ConfigChanged {
                diff: format!("{:#?}", diff),
            })
        }
    }

    /// Current running config (not counted as a device call)
    pub fn running_config(&self) -> String {
        self.device.running_config()
    }
}

/// Polls `condition` every 20ms until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(what: &str, timeout: Duration, mut condition: F) -> VerifyResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let poll = async {
        loop {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| VerificationError::Timeout {
            what: what.to_string(),
            timeout,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_diff() {
        let before = "interface Ethernet1\n   switchport access vlan 1\n";
        let after = "interface Ethernet1\n   switchport access vlan 4008\n";

        assert_eq!(
            config_diff(before, after),
            vec![
                DiffLine::Removed("   switchport access vlan 1".to_string()),
                DiffLine::Added("   switchport access vlan 4008".to_string()),
            ]
        );
        assert!(config_diff(before, before).is_empty());
    }

    #[test]
    fn test_device_verifier() {
        let device = Arc::new(SimulatedSwitch::new("leaf1.sdn.test").with_interface("Ethernet1"));
        let verifier = DeviceVerifier::new(Arc::clone(&device));
        let baseline = verifier.running_config();

        assert!(verifier.assert_vlan("Ethernet1", 1).is_ok());
        assert!(verifier.assert_vlan("Ethernet1", 100).is_err());
        assert!(verifier.assert_description("Ethernet1", "").is_ok());
        assert!(verifier.assert_port_channel("Ethernet1", 0).is_ok());
        assert!(matches!(
            verifier.assert_vlan("Ethernet9", 1),
            Err(VerificationError::InterfaceNotFound { .. })
        ));

        device.add_vlan(100);
        device.set_manual_vlan("Ethernet1", 100);
        assert!(verifier.assert_unchanged(&baseline).is_err());
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let result = wait_until("never", Duration::from_millis(50), || async { false }).await;
        assert!(matches!(result, Err(VerificationError::Timeout { .. })));
        assert!(wait_until("now", Duration::from_millis(50), || async { true })
            .await
            .is_ok());
    }
}
