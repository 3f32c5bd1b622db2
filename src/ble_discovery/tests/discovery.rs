
use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use parking_lot::Mutex;
use serde_json::json;
use ble_discovery::errors::{DiscoveryError, WaitError};
use ble_discovery::{to_uuid, Discovery, DiscoveryConfig, DiscoveryEvent, DiscoveryEventKind, DiscoveryStatus, LifecycleState};
use helper::{settle, MockRadio, RadioCall, GROUP};

async fn enabled_discovery(radio: &Arc<MockRadio>, config: DiscoveryConfig) -> Discovery {
    let discovery = Discovery::new(radio.clone());
    discovery.setup(config).expect("Failed to set up discovery");
    discovery.enable().await.expect("Failed to enable discovery");

    return discovery;
}

fn observe(discovery: &Discovery, address: &str) {
    discovery.scanner().on_device_observed(address.to_string(), format!("Device {address}"), -50);
}

#[test]
fn setup_validates_parameters() {
    let discovery = Discovery::new(MockRadio::new());

    assert_eq!(discovery.setup(DiscoveryConfig::new("")), Err(DiscoveryError::MissingParameter { name: "group_identifier".to_string() }));
    assert!(matches!(discovery.setup(DiscoveryConfig::new(GROUP).with_packet_size(0)), Err(DiscoveryError::InvalidParameter { .. })));
    assert!(matches!(discovery.setup(DiscoveryConfig::new(GROUP).with_max_packets(0)), Err(DiscoveryError::InvalidParameter { .. })));
    assert_eq!(discovery.lifecycle_state(), LifecycleState::Unconfigured);

    discovery.setup(DiscoveryConfig::new(GROUP)).expect("Failed to set up discovery");

    assert_eq!(discovery.setup(DiscoveryConfig::new(GROUP)), Err(DiscoveryError::AlreadyConfigured));
    assert_eq!(discovery.service_uuid(), Some(MockRadio::group_service()));
    assert!(discovery.device_identifier().is_some_and(|identifier| !identifier.is_empty()));
}

#[test]
fn device_identifier_is_kept() {
    let discovery = Discovery::new(MockRadio::new());
    discovery.setup(DiscoveryConfig::new(GROUP).with_device_identifier("device-1")).expect("Failed to set up discovery");

    assert_eq!(discovery.device_identifier().as_deref(), Some("device-1"));
}

#[tokio::test]
async fn enable_and_save_require_setup() {
    let discovery = Discovery::new(MockRadio::new());

    assert_eq!(discovery.enable().await, Err(DiscoveryError::NotConfigured));
    assert_eq!(discovery.save().await, Err(DiscoveryError::NotConfigured));
    discovery.advertise(MockRadio::document(json!({ "id": "abc" }))).await.expect("Advertise should only store the document");
}

#[tokio::test]
async fn status_follows_lifecycle() {
    let radio = MockRadio::new();
    let discovery = Discovery::new(radio.clone());
    assert_eq!(discovery.status().to_string(), "not configured");

    discovery.setup(DiscoveryConfig::new(GROUP)).expect("Failed to set up discovery");
    assert_eq!(discovery.status().to_string(), "disabled");

    discovery.enable().await.expect("Failed to enable discovery");
    assert_eq!(discovery.status(), DiscoveryStatus::Enabled);
    assert_eq!(discovery.status().to_string(), "enabled");

    discovery.scanner().on_scan_ended(Some("Bluetooth turned off".to_string()));
    assert_eq!(discovery.status(), DiscoveryStatus::Error("Bluetooth turned off".to_string()));

    discovery.disable().await.expect("Failed to disable discovery");
    assert_eq!(discovery.status().to_string(), "disabled");
    assert_eq!(discovery.lifecycle_state(), LifecycleState::Inactive);
}

#[tokio::test]
async fn enable_publishes_document_and_scans() -> anyhow::Result<()> {
    let radio = MockRadio::new();
    let discovery = Discovery::new(radio.clone());
    discovery.setup(DiscoveryConfig::new(GROUP))?;
    discovery.advertise(MockRadio::document(json!({ "id": "abc", "msg": "hi" }))).await?;

    discovery.enable().await?;

    let service = MockRadio::group_service();
    let published = radio.published(service).context("Document should be published")?;

    assert_eq!(published.len(), 3);
    assert_eq!(published[0].uuid, to_uuid("data:0"));
    assert_eq!(published[0].value.as_ref().map(|value| value[0]), Some(0x01));
    assert_eq!(published[1].uuid, to_uuid("data:1"));
    assert_eq!(published[1].value.as_ref().map(|value| value[0]), Some(0x00));
    assert_eq!(published[2].uuid, to_uuid("msg"));
    assert!(published[2].writable);
    assert!(radio.calls().contains(&RadioCall::Scan(vec![service])));

    discovery.enable().await?;
    assert_eq!(radio.count(|call| matches!(call, RadioCall::Scan(_))), 1);

    return Ok(());
}

#[tokio::test]
async fn advertise_republishes_while_enabled() {
    let radio = MockRadio::new();
    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP)).await;

    discovery.advertise(MockRadio::document(json!({ "id": "abc", "bio": "a much longer document than before" }))).await.expect("Failed to advertise");

    let published = radio.published(MockRadio::group_service()).expect("Document should be published");
    assert_eq!(published.len(), 4);
    assert_eq!(discovery.document().id(), Some("abc"));
}

#[tokio::test]
async fn failed_scan_keeps_discovery_inactive() {
    let radio = MockRadio::new();
    radio.set_fail_scan(true);
    let discovery = Discovery::new(radio.clone());
    discovery.setup(DiscoveryConfig::new(GROUP)).expect("Failed to set up discovery");

    let result = discovery.enable().await;

    assert!(matches!(result, Err(DiscoveryError::Radio(_))));
    assert_eq!(discovery.lifecycle_state(), LifecycleState::Configured);
    assert!(discovery.last_error().is_some());
    assert!(radio.published(MockRadio::group_service()).is_none());

    radio.set_fail_scan(false);
    discovery.enable().await.expect("Failed to enable discovery");
    assert_eq!(discovery.status(), DiscoveryStatus::Enabled);
}

#[tokio::test]
async fn finds_document_of_peer() {
    let peer_radio = MockRadio::new();
    let peer = enabled_discovery(&peer_radio, DiscoveryConfig::new(GROUP)).await;
    peer.advertise(MockRadio::document(json!({ "id": "peer", "name": "A document spanning several packets" }))).await.expect("Failed to advertise");

    let radio = MockRadio::new();
    radio.serve_published("AA", &peer_radio);
    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP)).await;

    let found = Arc::new(Mutex::new(Vec::new()));
    let sink = found.clone();
    let _subscription = discovery.events().subscribe(DiscoveryEventKind::DocumentFound, move |event| {
        if let DiscoveryEvent::DocumentFound(device) = event {
            sink.lock().push(device.clone());
        }
    });

    observe(&discovery, "AA");
    settle().await;

    let found = found.lock().clone();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].address, "AA");
    assert_eq!(found[0].document, Some(peer.document()));

    let reads = radio.reads_from("AA");
    let expected: Vec<_> = (0..reads.len()).map(|index| to_uuid(format!("data:{index}"))).collect();
    assert!(reads.len() > 1);
    assert_eq!(reads, expected);

    assert_eq!(discovery.discovered_devices().len(), 1);
    assert!(discovery.scanner().device("AA").and_then(|device| device.document).is_some());
}

#[tokio::test(start_paused = true)]
async fn failing_peer_is_not_reread_within_window() {
    let radio = MockRadio::new();
    radio.fail_reads_from("AA");
    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP)).await;

    observe(&discovery, "AA");
    settle().await;
    observe(&discovery, "AA");
    settle().await;

    assert_eq!(radio.reads_from("AA").len(), 1);
    assert!(discovery.discovered_devices().is_empty());
    assert!(discovery.scanner().device("AA").is_some_and(|device| device.document.is_none()));
    assert_eq!(discovery.status(), DiscoveryStatus::Enabled);

    tokio::time::advance(Duration::from_secs(301)).await;
    observe(&discovery, "AA");
    settle().await;

    assert_eq!(radio.reads_from("AA").len(), 2);
}

#[tokio::test]
async fn one_failing_peer_does_not_block_others() {
    let radio = MockRadio::new();
    radio.fail_reads_from("AA");
    radio.serve_document("BB", &MockRadio::document(json!({ "id": "bb" })), 20);
    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP)).await;

    observe(&discovery, "AA");
    observe(&discovery, "BB");
    settle().await;

    let discovered = discovery.discovered_devices();
    assert_eq!(discovered.len(), 1);
    assert_eq!(discovered[0].address, "BB");
}

#[tokio::test]
async fn discovered_documents_are_unique_by_id() {
    let radio = MockRadio::new();
    radio.serve_document("AA", &MockRadio::document(json!({ "id": "shared", "from": "AA" })), 20);
    radio.serve_document("BB", &MockRadio::document(json!({ "id": "shared", "from": "BB" })), 20);
    radio.serve_document("CC", &MockRadio::document(json!({ "from": "CC" })), 20);
    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP)).await;

    observe(&discovery, "AA");
    settle().await;
    observe(&discovery, "BB");
    settle().await;
    observe(&discovery, "CC");
    settle().await;

    let discovered = discovery.discovered_devices();
    let addresses: Vec<&str> = discovered.iter().map(|device| device.address.as_str()).collect();

    assert_eq!(addresses, vec!["BB", "CC"]);
}

#[tokio::test]
async fn malformed_document_is_isolated() {
    let radio = MockRadio::new();
    let service = MockRadio::group_service();
    radio.serve_frame("AA", service, to_uuid("data:0"), b"\x00{not json".to_vec());
    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP)).await;

    observe(&discovery, "AA");
    settle().await;

    assert!(discovery.discovered_devices().is_empty());
    assert_eq!(discovery.status(), DiscoveryStatus::Enabled);
}

#[tokio::test]
async fn endless_peer_hits_packet_limit() {
    let radio = MockRadio::new();
    let service = MockRadio::group_service();

    for index in 0..8 {
        radio.serve_frame("AA", service, to_uuid(format!("data:{index}")), b"\x01{".to_vec());
    }

    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP).with_max_packets(4)).await;

    observe(&discovery, "AA");
    settle().await;

    assert_eq!(radio.reads_from("AA").len(), 4);
    assert!(discovery.discovered_devices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_reads_time_out() {
    let radio = MockRadio::new();
    radio.serve_document("AA", &MockRadio::document(json!({ "id": "slow" })), 20);
    radio.set_read_delay(Duration::from_secs(30));
    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP).with_read_timeout(Duration::from_secs(5))).await;

    observe(&discovery, "AA");
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(radio.reads_from("AA").len(), 1);
    assert!(discovery.discovered_devices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn read_finishing_after_disable_is_discarded() {
    let radio = MockRadio::new();
    radio.serve_document("AA", &MockRadio::document(json!({ "id": "late" })), 20);
    radio.set_read_delay(Duration::from_secs(1));
    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP)).await;

    let found = Arc::new(Mutex::new(0));
    let sink = found.clone();
    let _subscription = discovery.events().subscribe(DiscoveryEventKind::DocumentFound, move |_| *sink.lock() += 1);

    observe(&discovery, "AA");
    settle().await;
    assert_eq!(radio.reads_from("AA").len(), 1);

    discovery.disable().await.expect("Failed to disable discovery");
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(*found.lock(), 0);
    assert!(discovery.discovered_devices().is_empty());
    assert!(radio.calls().contains(&RadioCall::StopScan));
    assert!(radio.published(MockRadio::group_service()).is_none());
}

#[tokio::test]
async fn lost_device_leaves_discovered_registry() {
    let radio = MockRadio::new();
    radio.serve_document("AA", &MockRadio::document(json!({ "id": "aa" })), 20);
    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP)).await;

    observe(&discovery, "AA");
    settle().await;
    assert_eq!(discovery.discovered_devices().len(), 1);

    let updates = Arc::new(Mutex::new(0));
    let sink = updates.clone();
    let _subscription = discovery.events().subscribe(DiscoveryEventKind::Updated, move |_| *sink.lock() += 1);

    discovery.scanner().on_device_lost("AA");

    assert!(discovery.discovered_devices().is_empty());
    assert_eq!(*updates.lock(), 1);
}

#[tokio::test]
async fn disable_drops_scanner_subscriptions() {
    let radio = MockRadio::new();
    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP)).await;
    assert_eq!(discovery.scanner().events().listener_count(), 4);

    discovery.disable().await.expect("Failed to disable discovery");
    discovery.disable().await.expect("Second disable should be a no-op");

    assert_eq!(discovery.scanner().events().listener_count(), 0);
    assert_eq!(radio.count(|call| *call == RadioCall::StopScan), 1);

    discovery.enable().await.expect("Failed to re-enable discovery");
    assert_eq!(discovery.lifecycle_state(), LifecycleState::Active);
    assert_eq!(discovery.scanner().events().listener_count(), 4);
}

#[tokio::test]
async fn messages_are_forwarded_as_events() {
    let radio = MockRadio::new();
    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP)).await;

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let _subscription = discovery.events().subscribe(DiscoveryEventKind::MessageReceived, move |event| {
        if let DiscoveryEvent::MessageReceived { data, from } = event {
            sink.lock().push((data.to_vec(), from.clone()));
        }
    });

    let service = MockRadio::group_service();
    assert!(discovery.publisher().on_characteristic_written(service, to_uuid("msg"), b"hello".to_vec(), "AA".to_string()));

    assert_eq!(*received.lock(), vec![(b"hello".to_vec(), "AA".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn wait_for_document_matches_predicate() {
    let radio = MockRadio::new();
    radio.serve_document("AA", &MockRadio::document(json!({ "id": "first" })), 20);
    radio.serve_document("BB", &MockRadio::document(json!({ "id": "second" })), 20);
    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP)).await;

    let scanner = discovery.scanner().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        scanner.on_device_observed("AA".to_string(), "A".to_string(), -50);
        scanner.on_device_observed("BB".to_string(), "B".to_string(), -50);
    });

    let device = discovery
        .wait_for_document(Duration::from_secs(5), |device| device.document.as_ref().and_then(|document| document.id()) == Some("second"))
        .await
        .expect("Expected the second document");

    assert_eq!(device.address, "BB");
    assert_eq!(discovery.events().listener_count(), 0);

    let result = discovery.wait_for_document(Duration::from_secs(1), |_| true).await;
    assert!(matches!(result, Err(WaitError::Timeout { .. })));
    assert_eq!(discovery.events().listener_count(), 0);
}

#[tokio::test]
async fn failed_publication_is_not_replayed() {
    let radio = MockRadio::new();
    radio.set_fail_create_service(true);
    let discovery = Discovery::new(radio.clone());
    discovery.setup(DiscoveryConfig::new(GROUP)).expect("Failed to set up discovery");

    assert!(matches!(discovery.enable().await, Err(DiscoveryError::Radio(_))));
    assert_eq!(discovery.status().to_string(), "disabled");
    assert_eq!(radio.count(|call| matches!(call, RadioCall::Scan(_))), 0);

    radio.set_fail_create_service(false);
    discovery.publisher().on_ready_state_changed(false).await;
    discovery.publisher().on_ready_state_changed(true).await;

    assert!(discovery.publisher().services().is_empty());
    assert!(radio.published(MockRadio::group_service()).is_none());
}

#[tokio::test]
async fn unreadable_document_is_rejected() {
    let radio = MockRadio::new();
    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP).with_max_packets(4)).await;
    discovery.advertise(MockRadio::document(json!({ "id": "small" }))).await.expect("Failed to advertise");

    let bio = "x".repeat(200);
    let result = discovery.advertise(MockRadio::document(json!({ "id": "large", "bio": bio }))).await;

    assert!(matches!(result, Err(DiscoveryError::DocumentTooLarge { limit: 4, .. })));
    assert_eq!(discovery.document().id(), Some("small"));

    let published = radio.published(MockRadio::group_service()).expect("Document should be published");
    assert_eq!(published.len(), 2);
}

#[tokio::test]
async fn largest_readable_document_round_trips() {
    let config = DiscoveryConfig::new(GROUP).with_max_packets(8);

    let peer_radio = MockRadio::new();
    let peer = enabled_discovery(&peer_radio, config.clone()).await;
    let oversized = MockRadio::document(json!({ "id": "peer", "bio": "x".repeat(400) }));
    assert!(peer.advertise(oversized).await.is_err());
    peer.advertise(MockRadio::document(json!({ "id": "peer", "bio": "x".repeat(130) }))).await.expect("Failed to advertise");

    let radio = MockRadio::new();
    radio.serve_published("AA", &peer_radio);
    let discovery = enabled_discovery(&radio, config).await;

    observe(&discovery, "AA");
    settle().await;

    let discovered = discovery.discovered_devices();
    assert_eq!(discovered.len(), 1);
    assert_eq!(discovered[0].document, Some(peer.document()));
}

#[tokio::test]
async fn disable_before_enable_is_noop() {
    let radio = MockRadio::new();
    let discovery = Discovery::new(radio.clone());
    discovery.setup(DiscoveryConfig::new(GROUP)).expect("Failed to set up discovery");

    discovery.disable().await.expect("Disable should be a no-op");

    assert!(radio.calls().is_empty());
    assert_eq!(discovery.lifecycle_state(), LifecycleState::Configured);
}

#[tokio::test]
async fn save_republishes_while_enabled() {
    let radio = MockRadio::new();
    let discovery = Discovery::new(radio.clone());
    discovery.setup(DiscoveryConfig::new(GROUP)).expect("Failed to set up discovery");

    discovery.save().await.expect("Save before enable should only keep the document");
    assert!(radio.calls().is_empty());

    discovery.enable().await.expect("Failed to enable discovery");
    discovery.save().await.expect("Failed to save");

    let creations = radio.count(|call| matches!(call, RadioCall::CreateService(service, _) if *service == MockRadio::group_service()));
    assert_eq!(creations, 2);
}

#[tokio::test(start_paused = true)]
async fn peer_changing_id_replaces_its_entry() {
    let radio = MockRadio::new();
    radio.serve_document("AA", &MockRadio::document(json!({ "id": "old" })), 20);
    radio.serve_document("BB", &MockRadio::document(json!({ "from": "BB" })), 20);
    radio.serve_document("CC", &MockRadio::document(json!({ "id": "BB" })), 20);
    let discovery = enabled_discovery(&radio, DiscoveryConfig::new(GROUP)).await;

    observe(&discovery, "AA");
    observe(&discovery, "BB");
    observe(&discovery, "CC");
    settle().await;
    assert_eq!(discovery.discovered_devices().len(), 3);

    radio.serve_document("AA", &MockRadio::document(json!({ "id": "new" })), 20);
    tokio::time::advance(Duration::from_secs(301)).await;
    observe(&discovery, "AA");
    settle().await;

    let discovered = discovery.discovered_devices();
    let aa: Vec<_> = discovered.iter().filter(|device| device.address == "AA").collect();

    assert_eq!(discovered.len(), 3);
    assert_eq!(aa.len(), 1);
    assert_eq!(aa[0].document.as_ref().and_then(|document| document.id()), Some("new"));
}
