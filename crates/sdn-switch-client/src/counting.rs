//! Counting decorator around any [`SwitchClient`].

use crate::client::{InterfaceState, OperationCategory, SwitchClient, VlanInfo};
use crate::metrics::SwitchClientMetrics;
use async_trait::async_trait;
use sdn_common::SdnResult;
use sdn_types::{Managed, PortMode, VlanId};
use std::sync::Arc;
use tracing::{debug, info};

/// Counts every call, then forwards it.
pub struct CountingSwitchClient {
    inner: Arc<dyn SwitchClient>,
    metrics: SwitchClientMetrics,
    fqdn: String,
}

impl CountingSwitchClient {
    pub fn new(inner: Arc<dyn SwitchClient>, metrics: SwitchClientMetrics) -> Self {
        let fqdn = inner.fqdn();
        Self {
            inner,
            metrics,
            fqdn,
        }
    }

    fn count(&self, category: OperationCategory, operation: &str) {
        self.metrics.record(&self.fqdn, category, operation);
        if category.is_mutation() {
            info!(switch = %self.fqdn, operation, "device mutation");
        } else {
            debug!(switch = %self.fqdn, operation, category = %category, "device call");
        }
    }
}

#[async_trait]
impl SwitchClient for CountingSwitchClient {
    fn fqdn(&self) -> String {
        self.fqdn.clone()
    }

    async fn get_running_config(&self) -> SdnResult<String> {
        self.count(OperationCategory::Get, "get_running_config");
        self.inner.get_running_config().await
    }

    async fn get_vlans(&self) -> SdnResult<Vec<VlanInfo>> {
        self.count(OperationCategory::Get, "get_vlans");
        self.inner.get_vlans().await
    }

    async fn get_switch_ports(&self) -> SdnResult<Vec<InterfaceState>> {
        self.count(OperationCategory::Get, "get_switch_ports");
        self.inner.get_switch_ports().await
    }

    async fn get_bgp_community(&self) -> SdnResult<Managed> {
        self.count(OperationCategory::Get, "get_bgp_community");
        self.inner.get_bgp_community().await
    }

    async fn update_vlan(&self, interface: &str, vlan: VlanId) -> SdnResult<()> {
        self.count(OperationCategory::Update, "update_vlan");
        self.inner.update_vlan(interface, vlan).await
    }

    async fn update_mode(&self, interface: &str, mode: PortMode) -> SdnResult<()> {
        self.count(OperationCategory::Update, "update_mode");
        self.inner.update_mode(interface, mode).await
    }

    async fn update_description(&self, interface: &str, description: &str) -> SdnResult<()> {
        self.count(OperationCategory::Update, "update_description");
        self.inner.update_description(interface, description).await
    }

    async fn update_native_vlan(&self, interface: &str, vlan: VlanId) -> SdnResult<()> {
        self.count(OperationCategory::Update, "update_native_vlan");
        self.inner.update_native_vlan(interface, vlan).await
    }

    async fn update_trunk_groups(&self, interface: &str, groups: &[String]) -> SdnResult<()> {
        self.count(OperationCategory::Update, "update_trunk_groups");
        self.inner.update_trunk_groups(interface, groups).await
    }

    async fn update_bgp_community(&self, community: i64) -> SdnResult<()> {
        self.count(OperationCategory::Update, "update_bgp_community");
        self.inner.update_bgp_community(community).await
    }

    async fn create_port_channel(&self, id: u32) -> SdnResult<()> {
        self.count(OperationCategory::Create, "create_port_channel");
        self.inner.create_port_channel(id).await
    }

    async fn delete_port_channel(&self, id: u32) -> SdnResult<()> {
        self.count(OperationCategory::Delete, "delete_port_channel");
        self.inner.delete_port_channel(id).await
    }

    async fn add_to_port_channel(&self, interface: &str, id: u32) -> SdnResult<()> {
        self.count(OperationCategory::Update, "add_to_port_channel");
        self.inner.add_to_port_channel(interface, id).await
    }

    async fn remove_from_port_channel(&self, interface: &str) -> SdnResult<()> {
        self.count(OperationCategory::Update, "remove_from_port_channel");
        self.inner.remove_from_port_channel(interface).await
    }

    async fn validate_connection(&self) -> SdnResult<()> {
        self.count(OperationCategory::Validate, "validate_connection");
        self.inner.validate_connection().await
    }

    async fn save_config(&self, checkpoint: &str) -> SdnResult<()> {
        self.count(OperationCategory::Save, "save_config");
        self.inner.save_config(checkpoint).await
    }

    async fn restore_config(&self, checkpoint: &str) -> SdnResult<()> {
        self.count(OperationCategory::Restore, "restore_config");
        self.inner.restore_config(checkpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockSwitchClient;
    use sdn_common::SdnError;

    fn mock(fqdn: &str) -> MockSwitchClient {
        let mut mock = MockSwitchClient::new();
        mock.expect_fqdn().return_const(fqdn.to_string());
        mock
    }

    #[tokio::test]
    async fn test_counts_success_and_failure() {
        let mut inner = mock("leaf1");
        inner
            .expect_get_switch_ports()
            .times(1)
            .returning(|| Ok(Vec::new()));
        inner
            .expect_update_vlan()
            .withf(|iface, vlan| iface.to_string() == "Ethernet1" && vlan.as_u16() == 7)
            .times(1)
            .returning(|_, _| Err(SdnError::validation("Ethernet1", "vlan 7 absent")));

        let metrics = SwitchClientMetrics::new().unwrap();
        let client = CountingSwitchClient::new(Arc::new(inner), metrics.clone());

        client.get_switch_ports().await.unwrap();
        let err = client
            .update_vlan("Ethernet1", VlanId::new(7).unwrap())
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(metrics.calls("leaf1", OperationCategory::Get), 1);
        assert_eq!(metrics.calls("leaf1", OperationCategory::Update), 1);
        assert_eq!(metrics.operation_calls("leaf1", "update_vlan"), 1);
    }

    #[tokio::test]
    async fn test_categories() {
        let mut inner = mock("leaf2");
        inner.expect_create_port_channel().returning(|_| Ok(()));
        inner.expect_delete_port_channel().returning(|_| Ok(()));
        inner.expect_validate_connection().returning(|| Ok(()));
        inner.expect_save_config().returning(|_| Ok(()));
        inner.expect_restore_config().returning(|_| Ok(()));
        inner
            .expect_add_to_port_channel()
            .returning(|_, _| Ok(()));

        let metrics = SwitchClientMetrics::new().unwrap();
        let client = CountingSwitchClient::new(Arc::new(inner), metrics.clone());

        client.create_port_channel(10).await.unwrap();
        client.add_to_port_channel("Ethernet1", 10).await.unwrap();
        client.delete_port_channel(10).await.unwrap();
        client.validate_connection().await.unwrap();
        client.save_config("baseline").await.unwrap();
        client.restore_config("baseline").await.unwrap();

        for category in OperationCategory::ALL {
            let expected = if category == OperationCategory::Get { 0 } else { 1 };
            assert_eq!(metrics.calls("leaf2", category), expected, "{}", category);
        }
        assert_eq!(metrics.mutations("leaf2"), 3);
    }
}
