//! End-to-end controller scenarios
//!
//! Host inventory flows through NetworkNodes and NodeGroups down to switch
//! ports, and a started controller converges on its own.

use pretty_assertions::assert_eq;
use sdn_common::resources::FabricConfig;
use sdn_common::{kinds, labels, naming};
use sdn_controller::ApiErrorCode;
use sdn_controller_test::{
    catalog_fixtures, host_fixtures, pool_fixtures, port_fixtures, wait_until, DeviceVerifier,
    TestBed, LEAF,
};
use sdn_reconcile::{Requeue, TaskError};
use sdn_types::{FabricType, Managed};
use std::sync::Arc;
use std::time::Duration;

const CONVERGE_TIMEOUT: Duration = Duration::from_secs(15);

fn vlan(v: i64) -> FabricConfig {
    FabricConfig {
        vlan: Managed::Value(v),
        bgp_community: Managed::Unmanaged,
    }
}

/// Bed with one enrolled host in `group-a`, cabled to `LEAF`/Ethernet2, and
/// its NetworkNode and NodeGroup derived.
async fn bed_with_host() -> TestBed {
    let bed = TestBed::builder()
        .with_pool(pool_fixtures::vlan_pool("gpu", 4008))
        .build()
        .await
        .unwrap();
    let host = host_fixtures::enrolled_host("server-1", 1, "group-a", "Ethernet2");
    bed.ctx().stores.hosts.create("server-1", host).await.unwrap();
    assert_eq!(bed.reconcile_inventory("server-1").await.unwrap(), Requeue::Never);
    bed
}

#[tokio::test]
async fn test_unmapped_group_stays_inert_until_mapped() {
    let bed = bed_with_host().await;
    let verifier = DeviceVerifier::new(bed.device(LEAF).unwrap());
    let before = verifier.running_config();
    let port_key = naming::switch_port_name("Ethernet2", LEAF);

    bed.api()
        .set_node_group_fabric("group-a", FabricType::FrontEnd, vlan(102))
        .await
        .unwrap();
    let err = bed.reconcile_node_group("group-a").await.unwrap_err();
    assert!(matches!(err, TaskError::WaitingForDependency { .. }));

    bed.reconcile_network_node("server-1").await.unwrap();
    let port = bed.api().switch_port(LEAF, "Ethernet2").await.unwrap();
    assert!(port.meta.is_owned_by(kinds::NETWORK_NODE, "server-1"));
    assert!(port.spec.is_unmaintained());
    bed.cycle_port(LEAF, &port_key).await.unwrap();
    verifier.assert_unchanged(&before).unwrap();

    bed.api().map_group_to_pool("group-a", "gpu").await.unwrap();
    bed.reconcile_pool("group-a").await.unwrap();
    let group = bed.api().node_group("group-a").await.unwrap();
    assert_eq!(group.pool(), Some("gpu"));
    // First join keeps the value that was waiting for the mapping
    assert_eq!(group.fabric(FabricType::FrontEnd).vlan, Managed::Value(102));

    bed.reconcile_node_group("group-a").await.unwrap();
    bed.reconcile_network_node("server-1").await.unwrap();
    bed.cycle_port(LEAF, &port_key).await.unwrap();
    verifier.assert_vlan("Ethernet2", 102).unwrap();

    bed.reconcile_network_node("server-1").await.unwrap();
    bed.reconcile_node_group("group-a").await.unwrap();
    let readiness = bed.api().node_group("group-a").await.unwrap().status.fabrics
        [&FabricType::FrontEnd]
        .clone();
    assert_eq!(readiness.ready, "1/1");
    assert!(readiness.in_sync);
}

#[tokio::test]
async fn test_refused_pool_keeps_group_values_off_the_device() {
    let bed = TestBed::builder()
        .with_pool(pool_fixtures::vlan_pool("gpu", 4008))
        .build()
        .await
        .unwrap();
    let mut host = host_fixtures::enrolled_host("server-1", 1, "group-a", "Ethernet2");
    host.spec.reserved = true;
    bed.ctx().stores.hosts.create("server-1", host).await.unwrap();
    bed.reconcile_inventory("server-1").await.unwrap();
    let verifier = DeviceVerifier::new(bed.device(LEAF).unwrap());
    let before = verifier.running_config();
    let port_key = naming::switch_port_name("Ethernet2", LEAF);

    bed.api()
        .set_node_group_fabric("group-a", FabricType::FrontEnd, vlan(102))
        .await
        .unwrap();
    bed.api().map_group_to_pool("group-a", "gpu").await.unwrap();
    let err = bed.reconcile_pool("group-a").await.unwrap_err();
    assert!(matches!(err, TaskError::Validation { .. }));
    assert_eq!(bed.api().node_group("group-a").await.unwrap().pool(), None);

    bed.reconcile_node_group("group-a").await.unwrap();
    bed.reconcile_network_node("server-1").await.unwrap();
    let node = bed.api().network_node("server-1").await.unwrap();
    assert_eq!(node.fabric_settings(FabricType::FrontEnd).vlan, Managed::Unmanaged);
    bed.cycle_port(LEAF, &port_key).await.unwrap();
    verifier.assert_unchanged(&before).unwrap();
}

#[tokio::test]
async fn test_lag_host_converges_through_its_port_channel() {
    let bed = TestBed::builder()
        .with_pool(pool_fixtures::vlan_pool("gpu", 4008))
        .build()
        .await
        .unwrap();
    let mut host = host_fixtures::enrolled_host("server-1", 1, "group-a", "Ethernet2");
    host.spec.nics[0].lag_id = Some(10);
    bed.ctx().stores.hosts.create("server-1", host).await.unwrap();
    bed.reconcile_inventory("server-1").await.unwrap();
    let device = bed.device(LEAF).unwrap();
    let verifier = DeviceVerifier::new(Arc::clone(&device));

    bed.api()
        .set_node_group_fabric("group-a", FabricType::FrontEnd, vlan(102))
        .await
        .unwrap();
    bed.api().map_group_to_pool("group-a", "gpu").await.unwrap();
    bed.reconcile_pool("group-a").await.unwrap();
    bed.reconcile_node_group("group-a").await.unwrap();
    bed.reconcile_network_node("server-1").await.unwrap();

    let pc = bed.api().port_channel(LEAF, 10).await.unwrap();
    assert!(pc.meta.is_owned_by(kinds::NETWORK_NODE, "server-1"));
    assert_eq!(pc.spec.vlan, Managed::Value(102));

    let pc_key = naming::port_channel_name(10, LEAF);
    bed.refresh(LEAF).await.unwrap();
    bed.reconcile_port_channel(&pc_key).await.unwrap();
    bed.refresh(LEAF).await.unwrap();
    bed.reconcile_port_channel(&pc_key).await.unwrap();
    assert!(device.has_port_channel(10));

    let port_key = naming::switch_port_name("Ethernet2", LEAF);
    bed.cycle_port(LEAF, &port_key).await.unwrap();
    verifier.assert_port_channel("Ethernet2", 10).unwrap();
    verifier.assert_vlan("Ethernet2", 102).unwrap();
    assert_eq!(device.interface("Port-Channel10").unwrap().vlan, 102);
}

#[tokio::test]
async fn test_unenrolled_host_is_ignored() {
    let bed = TestBed::new().await.unwrap();
    let host = host_fixtures::discovered_host("server-2", 2, "group-b", "Ethernet3");
    bed.ctx().stores.hosts.create("server-2", host).await.unwrap();

    assert_eq!(bed.reconcile_inventory("server-2").await.unwrap(), Requeue::Never);
    let err = bed.api().network_node("server-2").await.unwrap_err();
    assert_eq!(err.code, ApiErrorCode::NotFound);
    assert!(bed.ctx().stores.node_groups.get("group-b").await.unwrap().is_none());
}

#[tokio::test]
async fn test_api_rejects_before_any_write() {
    let bed = TestBed::new().await.unwrap();
    let api = bed.api();

    let err = api
        .configure_port("dc9-fe-leaf9.sdn.test", "Ethernet1", port_fixtures::access(100), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ApiErrorCode::UnknownTarget);

    let err = api
        .configure_port(LEAF, "Ethernet1", port_fixtures::access(5000), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ApiErrorCode::Malformed);

    let err = api
        .configure_port(LEAF, "Ethernet1", port_fixtures::access(4001), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ApiErrorCode::Validation);

    let err = api.map_group_to_pool("group-a", "nonexistent").await.unwrap_err();
    assert_eq!(err.code, ApiErrorCode::UnknownTarget);

    assert_eq!(api.switch_port(LEAF, "Ethernet1").await.unwrap_err().code, ApiErrorCode::NotFound);
}

#[tokio::test]
async fn test_catalog_import_adds_switches() {
    let bed = TestBed::new().await.unwrap();
    let body = catalog_fixtures::current(&[
        ("dc1-fe-leaf2", "leaf", Some("10.0.0.2/24")),
        ("bad name!", "leaf", None),
    ]);

    let report = bed.manager.import_switches(&body).await.unwrap();
    assert_eq!(report.created, vec!["dc1-fe-leaf2.sdn.test".to_string()]);
    assert_eq!(report.skipped, vec!["bad name!".to_string()]);

    let switch = bed.api().switch("dc1-fe-leaf2.sdn.test").await.unwrap();
    assert_eq!(switch.meta.label(labels::SWITCH_ROLE), Some("leaf"));

    let legacy = catalog_fixtures::legacy(&[("dc1-fe-leaf2", "leaf", Some("10.0.0.2/24"))]);
    let report = bed.manager.import_switches(&legacy).await.unwrap();
    assert!(report.created.is_empty());
    assert!(report.updated.is_empty());
}

#[tokio::test]
async fn test_started_controller_converges_port() {
    let bed = TestBed::new().await.unwrap();
    bed.start();
    let device = bed.device(LEAF).unwrap();

    bed.api()
        .configure_port(LEAF, "Ethernet1", port_fixtures::access(100), Some("server 1".into()))
        .await
        .unwrap();

    wait_until("vlan 100 on Ethernet1", CONVERGE_TIMEOUT, || {
        let device = Arc::clone(&device);
        async move { device.interface("Ethernet1").is_some_and(|i| i.vlan == 100) }
    })
    .await
    .unwrap();
    DeviceVerifier::new(device)
        .assert_description("Ethernet1", "server 1")
        .unwrap();
}

#[tokio::test]
async fn test_started_controller_reports_rejected_value() {
    let bed = TestBed::new().await.unwrap();
    bed.start();
    let key = naming::switch_port_name("Ethernet1", LEAF);
    let verifier = DeviceVerifier::new(bed.device(LEAF).unwrap());
    let before = verifier.running_config();

    bed.api()
        .configure_port(LEAF, "Ethernet1", port_fixtures::access(3000), Some("server 1".into()))
        .await
        .unwrap();

    let (api, key) = (bed.api(), key.as_str());
    wait_until("rejection event", CONVERGE_TIMEOUT, move || async move {
        api.events_for(kinds::SWITCH_PORT, key)
            .iter()
            .any(|e| e.message.contains("vlan 3000 does not exist"))
    })
    .await
    .unwrap();
    verifier.assert_unchanged(&before).unwrap();
}

#[tokio::test]
async fn test_lifting_read_only_applies_pending_change() {
    let bed = TestBed::builder().read_only(true).build().await.unwrap();
    bed.start();
    let device = bed.device(LEAF).unwrap();
    let verifier = DeviceVerifier::new(Arc::clone(&device));
    let before = verifier.running_config();

    bed.api()
        .configure_port(LEAF, "Ethernet3", port_fixtures::access(102), None)
        .await
        .unwrap();
    let api = bed.api();
    wait_until("port blocked", CONVERGE_TIMEOUT, move || async move {
        api.switch_port(LEAF, "Ethernet3")
            .await
            .is_ok_and(|p| p.status.pending == vec!["vlan".to_string()])
    })
    .await
    .unwrap();
    verifier.assert_unchanged(&before).unwrap();

    bed.manager.set_read_only(false).await.unwrap();
    wait_until("vlan 102 on Ethernet3", CONVERGE_TIMEOUT, || {
        let device = Arc::clone(&device);
        async move { device.interface("Ethernet3").is_some_and(|i| i.vlan == 102) }
    })
    .await
    .unwrap();
}
