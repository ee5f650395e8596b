#![allow(clippy::unwrap_used)]

// Integration tests for `Engine` against wiremock-backed fake devices.
//
// Each fake device listens on its own loopback address (127.0.0.x), so
// address-based behaviour (range sweeps, extender ports) can be exercised
// without a real network.

use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use shellyscan_core::{
    Candidate, CandidateSource, DeviceStatus, Engine, EngineConfig, Generation, GhostRecord,
    Locator, MacAddress, NoCredentials, RegistryEventKind, ScanMode,
};
use tokio::sync::broadcast;
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

async fn device_at(ip: [u8; 4], port: u16) -> MockServer {
    let listener = TcpListener::bind((Ipv4Addr::from(ip), port)).unwrap();
    MockServer::builder().listener(listener).start().await
}

async fn mount_plus1(server: &MockServer, mac: &str, extender: bool, auth: bool) {
    Mock::given(method("GET"))
        .and(path("/shelly"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": format!("shellyplus1-{}", mac.to_lowercase()),
            "mac": mac,
            "model": "SNSW-001X16EU",
            "gen": 2,
            "app": "Plus1",
            "auth_en": auth,
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rpc/Shelly.GetConfig"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sys": {"device": {"name": "Porch"}},
            "wifi": {"sta": {"ssid": "home"}, "ap": {"range_extender": {"enable": extender}}},
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rpc/Shelly.GetStatus"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sys": {"uptime": 42}})))
        .mount(server)
        .await;
}

fn config(scan: ScanMode, probe_port: u16) -> EngineConfig {
    EngineConfig {
        scan,
        probe_port,
        refresh_interval: Duration::from_secs(3600),
        query_delay: Duration::from_millis(1),
        liveness_timeout: Duration::from_secs(2),
        auto_reconnect: None,
        ..EngineConfig::default()
    }
}

/// Range mode over an empty range: `start` schedules nothing.
fn idle_config() -> EngineConfig {
    config(
        ScanMode::Range {
            base: Ipv4Addr::new(127, 0, 0, 0),
            first: 1,
            last: 0,
        },
        80,
    )
}

async fn wait_for(events: &mut broadcast::Receiver<shellyscan_core::RegistryEvent>, kind: RegistryEventKind) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if events.recv().await.unwrap().kind == kind {
                return;
            }
        }
    })
    .await
    .unwrap();
}

// ── Active sweep ────────────────────────────────────────────────────

#[tokio::test]
async fn range_sweep_registers_only_the_live_device() {
    let server = device_at([127, 0, 0, 11], 0).await;
    mount_plus1(&server, "A8032AB1E2F4", false, false).await;
    let port = server.address().port();

    let engine = Engine::new(
        config(
            ScanMode::Range {
                base: Ipv4Addr::new(127, 0, 0, 0),
                first: 10,
                last: 12,
            },
            port,
        ),
        Arc::new(NoCredentials),
    )
    .unwrap();
    let mut events = engine.subscribe();
    engine.start().await.unwrap();

    wait_for(&mut events, RegistryEventKind::Add).await;
    // Give the unreachable neighbours time to be skipped.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let devices = engine.devices();
    assert_eq!(devices.len(), 1);
    let device = &devices[0];
    assert_eq!(device.mac(), &MacAddress::new("A8032AB1E2F4"));
    assert!(device.is_managed());
    assert_eq!(device.status(), DeviceStatus::OnLine);
    assert_eq!(device.display_name(), "Porch");
    assert_eq!(device.state().ssid.as_deref(), Some("home"));
    engine.close();
}

// ── Identification outcomes ─────────────────────────────────────────

#[tokio::test]
async fn protected_device_without_credentials_is_not_logged() {
    let server = device_at([127, 0, 0, 31], 0).await;
    mount_plus1(&server, "441793D69718", false, true).await;
    let address = *server.address();

    let engine = Engine::new(idle_config(), Arc::new(NoCredentials)).unwrap();
    let mut events = engine.subscribe();
    engine.discover(Candidate::new(
        Locator::new(address.ip(), address.port(), "shellyplus1-441793d69718"),
        CandidateSource::Mdns,
    ));
    wait_for(&mut events, RegistryEventKind::Add).await;

    let device = engine.get(0).unwrap();
    assert_eq!(device.status(), DeviceStatus::NotLogged);
    assert!(device.is_degraded());
    engine.close();
}

#[tokio::test]
async fn forced_candidate_that_is_not_a_device_becomes_placeholder() {
    let server = device_at([127, 0, 0, 41], 0).await;
    Mock::given(method("GET"))
        .and(path("/shelly"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let address = *server.address();
    let locator = Locator::new(address.ip(), address.port(), "shelly-mystery");

    let engine = Engine::new(idle_config(), Arc::new(NoCredentials)).unwrap();
    let mut events = engine.subscribe();

    // Not forced: dropped silently.
    engine.discover(Candidate::new(locator.clone(), CandidateSource::Range));
    // Forced: tracked with the error attached.
    engine.discover(Candidate::new(locator, CandidateSource::Mdns));
    wait_for(&mut events, RegistryEventKind::Add).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(engine.devices().len(), 1);
    let device = engine.get(0).unwrap();
    assert_eq!(device.status(), DeviceStatus::Error);
    assert!(device.error().is_some());
    assert!(!device.mac().is_valid());
    engine.close();
}

#[tokio::test]
async fn forced_refresh_upgrades_placeholder_in_place() {
    let server = device_at([127, 0, 0, 51], 0).await;
    let address = *server.address();
    let locator = Locator::new(address.ip(), address.port(), "shellyplus1-c45bbe6a0002");

    Mock::given(method("GET"))
        .and(path("/shelly"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_plus1(&server, "C45BBE6A0002", false, false).await;

    let engine = Engine::new(idle_config(), Arc::new(NoCredentials)).unwrap();
    let mut events = engine.subscribe();
    engine.discover(Candidate::new(locator, CandidateSource::Mdns));
    wait_for(&mut events, RegistryEventKind::Add).await;
    assert!(engine.get(0).unwrap().error().is_some());

    assert!(engine.refresh(0, true).unwrap());
    wait_for(&mut events, RegistryEventKind::Substitute).await;

    assert_eq!(engine.devices().len(), 1);
    let device = engine.get(0).unwrap();
    assert!(device.is_managed());
    assert_eq!(device.mac(), &MacAddress::new("C45BBE6A0002"));
    assert!(engine.registry().has_schedule(0));
    engine.close();
}

// ── Range extender ──────────────────────────────────────────────────

#[tokio::test]
async fn extender_children_are_probed_on_their_ports() {
    let child = device_at([127, 0, 0, 61], 0).await;
    mount_plus1(&child, "C45BBE6A0003", false, false).await;
    let child_port = child.address().port();

    let parent = device_at([127, 0, 0, 61], 0).await;
    mount_plus1(&parent, "A8032AB1E2F5", true, false).await;
    Mock::given(method("GET"))
        .and(path("/rpc/WiFi.ListAPClients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ts": 1_700_000_000,
            "ap_clients": [{"mac": "C4:5B:BE:6A:00:03", "ip": "192.168.33.2", "mport": child_port}],
        })))
        .mount(&parent)
        .await;
    let address = *parent.address();

    let engine = Engine::new(idle_config(), Arc::new(NoCredentials)).unwrap();
    let mut events = engine.subscribe();
    engine.discover(Candidate::new(
        Locator::new(address.ip(), address.port(), "shellyplus1-a8032ab1e2f5"),
        CandidateSource::Mdns,
    ));
    wait_for(&mut events, RegistryEventKind::Add).await;
    wait_for(&mut events, RegistryEventKind::Add).await;

    let child_device = engine
        .devices()
        .into_iter()
        .find(|d| d.mac() == &MacAddress::new("C45BBE6A0003"))
        .unwrap();
    assert_eq!(child_device.port(), child_port);
    assert_eq!(
        child_device.hostname(),
        format!("shellyplus1-a8032ab1e2f5-EX:{child_port}")
    );
    engine.close();
}

// ── Ghost store ─────────────────────────────────────────────────────

#[tokio::test]
async fn store_round_trip_adds_no_duplicates_of_live_devices() {
    let server = device_at([127, 0, 0, 71], 0).await;
    mount_plus1(&server, "A8032AB1E2F6", false, false).await;
    let address = *server.address();
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("ghosts.json");

    let engine = Engine::new(idle_config(), Arc::new(NoCredentials)).unwrap();
    let mut events = engine.subscribe();
    engine.discover(Candidate::new(
        Locator::new(address.ip(), address.port(), "shellyplus1-a8032ab1e2f6"),
        CandidateSource::Mdns,
    ));
    wait_for(&mut events, RegistryEventKind::Add).await;
    engine.set_note(0, "kitchen").unwrap();

    assert_eq!(engine.save_store(&store).await.unwrap(), 1);
    assert_eq!(engine.load_store(&store).await.unwrap(), 0);
    assert_eq!(engine.devices().len(), 1);
    assert_eq!(engine.ghost(0).unwrap().note, "kitchen");
    engine.close();

    let offline = Engine::new(idle_config(), Arc::new(NoCredentials)).unwrap();
    assert_eq!(offline.load_store(&store).await.unwrap(), 1);
    let ghost = offline.get(0).unwrap();
    assert!(ghost.is_ghost());
    assert_eq!(ghost.status(), DeviceStatus::Ghost);
    assert_eq!(ghost.display_name(), "Porch");
    assert_eq!(offline.ghost(0).unwrap().note, "kitchen");
}

// ── Ghost reconnect ─────────────────────────────────────────────────

fn ghost(mac: &str, ip: [u8; 4], port: u16, battery: bool) -> GhostRecord {
    GhostRecord {
        type_id: "Plus1".into(),
        type_name: "Shelly Plus 1".into(),
        hostname: format!("shellyplus1-{}", mac.to_lowercase()),
        mac: MacAddress::new(mac),
        address: Ipv4Addr::from(ip).into(),
        port,
        name: String::new(),
        ssid: String::new(),
        last_contact: 0,
        battery,
        generation: Generation::Gen2,
        note: String::new(),
    }
}

#[tokio::test]
async fn ghost_reconnect_skips_battery_devices() {
    let mains = device_at([127, 0, 0, 81], 0).await;
    let port = mains.address().port();
    mount_plus1(&mains, "A8032AB1E2F4", false, false).await;

    let battery = device_at([127, 0, 0, 82], port).await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&battery)
        .await;

    let engine = Engine::new(
        EngineConfig {
            probe_port: port,
            ..idle_config()
        },
        Arc::new(NoCredentials),
    )
    .unwrap();
    engine
        .registry()
        .insert_ghost(&ghost("A8032AB1E2F4", [127, 0, 0, 81], port, false));
    engine
        .registry()
        .insert_ghost(&ghost("A8032AB1E2F5", [127, 0, 0, 82], port, true));

    let mut events = engine.subscribe();
    engine.reconnect_ghosts();
    wait_for(&mut events, RegistryEventKind::Substitute).await;

    let revived = engine.get(0).unwrap();
    assert!(revived.is_managed());
    assert_eq!(revived.status(), DeviceStatus::OnLine);
    assert!(engine.get(1).unwrap().is_ghost());

    tokio::time::sleep(Duration::from_millis(100)).await;
    battery.verify().await;
    engine.close();
}
