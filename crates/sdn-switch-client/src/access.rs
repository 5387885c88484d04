//! Device access manager.
//!
//! Owns one counted client per switch. Connecting retries with bounded
//! exponential back-off; once a client is cached every caller shares it
//! until [`DeviceAccessManager::disconnect`] drops it.

use crate::client::SwitchClient;
use crate::counting::CountingSwitchClient;
use crate::metrics::SwitchClientMetrics;
use crate::simulated::SimulatedSwitch;
use async_trait::async_trait;
use dashmap::DashMap;
use sdn_common::{defaults, SdnError, SdnResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Opens a transport to one switch.
#[async_trait]
pub trait SwitchConnector: Send + Sync {
    async fn connect(&self, fqdn: &str, address: &str) -> SdnResult<Arc<dyn SwitchClient>>;
}

/// Connection retry bounds.
#[derive(Debug, Clone)]
pub struct ConnectPolicy {
    pub attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: defaults::CONNECT_ATTEMPTS,
            backoff_min: defaults::CONNECT_BACKOFF_MIN,
            backoff_max: defaults::CONNECT_BACKOFF_MAX,
        }
    }
}

impl ConnectPolicy {
    /// Delay before attempt `attempt + 1` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_min
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

/// Connector for the `memory` backend: hands out registered simulated switches.
#[derive(Default)]
pub struct SimulatedLab {
    switches: DashMap<String, Arc<SimulatedSwitch>>,
}

impl SimulatedLab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_switch(&self, switch: SimulatedSwitch) -> Arc<SimulatedSwitch> {
        let switch = Arc::new(switch);
        self.switches.insert(switch.fqdn(), Arc::clone(&switch));
        switch
    }

    pub fn switch(&self, fqdn: &str) -> Option<Arc<SimulatedSwitch>> {
        self.switches.get(fqdn).map(|s| Arc::clone(s.value()))
    }

    pub fn fqdns(&self) -> Vec<String> {
        let mut fqdns: Vec<String> = self.switches.iter().map(|e| e.key().clone()).collect();
        fqdns.sort();
        fqdns
    }
}

#[async_trait]
impl SwitchConnector for SimulatedLab {
    async fn connect(&self, fqdn: &str, address: &str) -> SdnResult<Arc<dyn SwitchClient>> {
        if address.is_empty() {
            return Err(SdnError::connectivity(fqdn, "no address"));
        }
        match self.switch(fqdn) {
            Some(switch) => Ok(switch as Arc<dyn SwitchClient>),
            None => Err(SdnError::connectivity(
                fqdn,
                format!("no route to host {}", address),
            )),
        }
    }
}

/// Per-switch client cache with bounded connection retry.
pub struct DeviceAccessManager {
    connector: Arc<dyn SwitchConnector>,
    metrics: SwitchClientMetrics,
    policy: ConnectPolicy,
    clients: DashMap<String, Arc<dyn SwitchClient>>,
}

impl DeviceAccessManager {
    pub fn new(
        connector: Arc<dyn SwitchConnector>,
        metrics: SwitchClientMetrics,
        policy: ConnectPolicy,
    ) -> Self {
        Self {
            connector,
            metrics,
            policy,
            clients: DashMap::new(),
        }
    }

    pub fn metrics(&self) -> &SwitchClientMetrics {
        &self.metrics
    }

    /// Returns the cached client or connects to `address`.
    ///
    /// Each attempt opens the transport and validates the connection. After
    /// `attempts` failures the last error is returned as a connectivity
    /// error.
    pub async fn connect(&self, fqdn: &str, address: &str) -> SdnResult<Arc<dyn SwitchClient>> {
        if let Some(client) = self.get(fqdn) {
            return Ok(client);
        }

        let attempts = self.policy.attempts.max(1);
        let mut last_error = String::new();
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.policy.backoff(attempt - 1)).await;
            }
            match self.try_connect(fqdn, address).await {
                Ok(client) => {
                    info!(switch = fqdn, address, attempt, "connected to switch");
                    self.clients.insert(fqdn.to_string(), Arc::clone(&client));
                    return Ok(client);
                }
                Err(e) => {
                    warn!(switch = fqdn, address, attempt, error = %e, "switch connection failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(SdnError::connectivity(
            fqdn,
            format!("gave up after {} attempts: {}", attempts, last_error),
        ))
    }

    async fn try_connect(&self, fqdn: &str, address: &str) -> SdnResult<Arc<dyn SwitchClient>> {
        let raw = self.connector.connect(fqdn, address).await?;
        let client: Arc<dyn SwitchClient> =
            Arc::new(CountingSwitchClient::new(raw, self.metrics.clone()));
        client.validate_connection().await?;
        Ok(client)
    }

    pub fn get(&self, fqdn: &str) -> Option<Arc<dyn SwitchClient>> {
        self.clients.get(fqdn).map(|c| Arc::clone(c.value()))
    }

    /// Cached client, or a connectivity error if the switch is not connected.
    pub fn client(&self, fqdn: &str) -> SdnResult<Arc<dyn SwitchClient>> {
        self.get(fqdn)
            .ok_or_else(|| SdnError::connectivity(fqdn, "not connected"))
    }

    pub fn disconnect(&self, fqdn: &str) -> bool {
        self.clients.remove(fqdn).is_some()
    }

    pub fn is_connected(&self, fqdn: &str) -> bool {
        self.clients.contains_key(fqdn)
    }

    pub fn connected(&self) -> Vec<String> {
        let mut fqdns: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        fqdns.sort();
        fqdns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::OperationCategory;

    fn manager(lab: Arc<SimulatedLab>, attempts: u32) -> DeviceAccessManager {
        DeviceAccessManager::new(
            lab,
            SwitchClientMetrics::new().unwrap(),
            ConnectPolicy {
                attempts,
                backoff_min: Duration::from_millis(100),
                backoff_max: Duration::from_millis(400),
            },
        )
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = ConnectPolicy {
            attempts: 10,
            backoff_min: Duration::from_millis(200),
            backoff_max: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(400));
        assert_eq!(policy.backoff(2), Duration::from_millis(800));
        assert_eq!(policy.backoff(3), Duration::from_secs(1));
        assert_eq!(policy.backoff(40), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_connect_caches_client() {
        let lab = Arc::new(SimulatedLab::new());
        lab.add_switch(SimulatedSwitch::new("leaf1"));
        let access = manager(Arc::clone(&lab), 3);

        access.connect("leaf1", "10.0.0.1").await.unwrap();
        access.connect("leaf1", "10.0.0.1").await.unwrap();

        assert_eq!(access.connected(), vec!["leaf1".to_string()]);
        assert_eq!(
            access.metrics().calls("leaf1", OperationCategory::Validate),
            1
        );
        assert!(access.disconnect("leaf1"));
        assert!(access.client("leaf1").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_until_reachable() {
        let lab = Arc::new(SimulatedLab::new());
        let switch = lab.add_switch(SimulatedSwitch::new("leaf1"));
        switch.fail_next("validate_connection", 2);
        let access = manager(Arc::clone(&lab), 3);

        access.connect("leaf1", "10.0.0.1").await.unwrap();
        assert_eq!(
            access.metrics().calls("leaf1", OperationCategory::Validate),
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up() {
        let lab = Arc::new(SimulatedLab::new());
        let access = manager(Arc::clone(&lab), 2);

        let err = match access.connect("leaf9", "10.0.0.9").await {
            Ok(_) => panic!("connect to an unknown switch should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, SdnError::Connectivity { .. }));
        assert!(err.to_string().contains("gave up after 2 attempts"));
        assert!(!access.is_connected("leaf9"));
    }
}
