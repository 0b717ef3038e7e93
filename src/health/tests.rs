use super::*;
use crate::error::HealthCheckError;
use crate::lifecycle::{FailureThresholds, LifecycleStateMachine, ProcessEvent, ProcessState};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FakeNode {
    name: String,
    machine: LifecycleStateMachine,
    alive: AtomicBool,
    client: Option<Arc<dyn ClusterHealthClient>>,
    leader: Mutex<Option<bool>>,
    samples_seen: AtomicUsize,
}

impl FakeNode {
    fn new(client: Option<Arc<dyn ClusterHealthClient>>) -> Arc<Self> {
        Arc::new(Self {
            name: "node1".to_string(),
            machine: LifecycleStateMachine::with_thresholds(
                "node1",
                FailureThresholds {
                    startup: 2,
                    transient: 2,
                    reboot: 3,
                },
            ),
            alive: AtomicBool::new(true),
            client,
            leader: Mutex::new(None),
            samples_seen: AtomicUsize::new(0),
        })
    }

    fn drive(&self, events: &[ProcessEvent]) {
        for event in events {
            self.machine.fire(*event).unwrap();
        }
    }
}

#[async_trait]
impl HealthTarget for FakeNode {
    fn node_name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcessState {
        self.machine.current()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn cluster_client(&self) -> Option<Arc<dyn ClusterHealthClient>> {
        self.client.clone()
    }

    fn fire(&self, event: ProcessEvent) {
        self.machine.fire(event).unwrap();
    }

    fn fire_if_defined(&self, event: ProcessEvent) -> bool {
        self.machine.fire_if_defined(event).is_some()
    }

    fn record_leader(&self, leader: bool) {
        *self.leader.lock() = Some(leader);
    }

    async fn after_health_sample(&self, _health: &ClusterHealth) {
        self.samples_seen.fetch_add(1, Ordering::SeqCst);
    }
}

fn health_body(status: &str, leader: bool, relocating: u64) -> serde_json::Value {
    json!({
        "cluster_name": "datanode-cluster",
        "status": status,
        "timed_out": false,
        "number_of_nodes": 1,
        "discovered_cluster_manager": leader,
        "relocating_shards": relocating,
    })
}

async fn server_with_status(status: &str, leader: bool) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_body(status, leader, 0)))
        .mount(&server)
        .await;
    server
}

fn client_for(server: &MockServer) -> Arc<dyn ClusterHealthClient> {
    Arc::new(RestClusterClient::new(server.uri(), Duration::from_secs(2), None, &[]).unwrap())
}

fn monitor_with(node: Arc<FakeNode>) -> HealthMonitor {
    let monitor = HealthMonitor::new(Duration::from_millis(20), Duration::from_millis(50));
    monitor.register(node);
    monitor
}

#[tokio::test]
async fn test_green_health_makes_starting_node_available() {
    let server = server_with_status("green", true).await;
    let node = FakeNode::new(Some(client_for(&server)));
    node.drive(&[ProcessEvent::Prepared, ProcessEvent::Started]);
    let monitor = monitor_with(node.clone());

    let samples = monitor.run_health_sweep().await;

    assert_eq!(samples, vec![("node1".to_string(), HealthSample::Healthy)]);
    assert_eq!(node.state(), ProcessState::Available);
    assert_eq!(*node.leader.lock(), Some(true));
}

#[tokio::test]
async fn test_yellow_counts_as_healthy() {
    let server = server_with_status("yellow", false).await;
    let node = FakeNode::new(Some(client_for(&server)));
    node.drive(&[ProcessEvent::Started]);
    let monitor = monitor_with(node.clone());

    monitor.run_health_sweep().await;

    assert_eq!(node.state(), ProcessState::Available);
    assert_eq!(*node.leader.lock(), Some(false));
}

#[tokio::test]
async fn test_red_status_fails_startup_after_threshold() {
    let server = server_with_status("red", true).await;
    let node = FakeNode::new(Some(client_for(&server)));
    node.drive(&[ProcessEvent::Started]);
    let monitor = monitor_with(node.clone());

    monitor.run_health_sweep().await;
    assert_eq!(node.state(), ProcessState::Starting);
    monitor.run_health_sweep().await;
    assert_eq!(node.state(), ProcessState::Failed);
}

#[tokio::test]
async fn test_error_status_is_a_health_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let node = FakeNode::new(Some(client_for(&server)));
    node.drive(&[ProcessEvent::Started, ProcessEvent::HealthOk]);
    let monitor = monitor_with(node.clone());

    let samples = monitor.run_health_sweep().await;

    assert_eq!(samples[0].1, HealthSample::Unhealthy);
    assert_eq!(node.state(), ProcessState::NotResponding);
    assert_eq!(*node.leader.lock(), Some(false));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_health_failure() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);
    let client: Arc<dyn ClusterHealthClient> =
        Arc::new(RestClusterClient::new(uri, Duration::from_millis(500), None, &[]).unwrap());
    let node = FakeNode::new(Some(client));
    node.drive(&[ProcessEvent::Started, ProcessEvent::HealthOk]);
    let monitor = monitor_with(node.clone());

    monitor.run_health_sweep().await;
    assert_eq!(node.state(), ProcessState::NotResponding);
}

#[tokio::test]
async fn test_idle_nodes_are_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_body("green", true, 0)))
        .expect(0)
        .mount(&server)
        .await;
    let node = FakeNode::new(Some(client_for(&server)));
    let monitor = monitor_with(node.clone());

    let samples = monitor.run_health_sweep().await;

    assert_eq!(samples[0].1, HealthSample::Skipped);
    assert_eq!(node.state(), ProcessState::AwaitingConfiguration);
}

#[tokio::test]
async fn test_node_without_client_is_skipped() {
    let node = FakeNode::new(None);
    node.drive(&[ProcessEvent::Started]);
    let monitor = monitor_with(node.clone());

    let samples = monitor.run_health_sweep().await;
    assert_eq!(samples[0].1, HealthSample::Skipped);
    assert_eq!(node.state(), ProcessState::Starting);
}

#[tokio::test]
async fn test_samples_are_handed_back_while_removing() {
    let server = server_with_status("green", true).await;
    let node = FakeNode::new(Some(client_for(&server)));
    node.drive(&[ProcessEvent::Started, ProcessEvent::HealthOk, ProcessEvent::Remove]);
    let monitor = monitor_with(node.clone());

    monitor.run_health_sweep().await;

    assert_eq!(node.state(), ProcessState::Removing);
    assert_eq!(node.samples_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_liveness_sweep_reports_dead_process() {
    let node = FakeNode::new(None);
    node.drive(&[ProcessEvent::Started, ProcessEvent::HealthOk]);
    let monitor = monitor_with(node.clone());

    assert_eq!(monitor.run_liveness_sweep(), 0);
    node.alive.store(false, Ordering::SeqCst);
    assert_eq!(monitor.run_liveness_sweep(), 1);
    assert_eq!(node.state(), ProcessState::Terminated);
    // already terminated, nothing left to report
    assert_eq!(monitor.run_liveness_sweep(), 0);
}

#[tokio::test]
async fn test_liveness_sweep_leaves_removing_node_alone() {
    let node = FakeNode::new(None);
    node.drive(&[ProcessEvent::Started, ProcessEvent::HealthOk, ProcessEvent::Remove]);
    node.alive.store(false, Ordering::SeqCst);
    let monitor = monitor_with(node.clone());

    assert_eq!(monitor.run_liveness_sweep(), 0);
    assert_eq!(node.state(), ProcessState::Removing);
}

#[tokio::test]
async fn test_started_monitor_observes_exit_and_shuts_down() {
    let node = FakeNode::new(None);
    node.drive(&[ProcessEvent::Started]);
    let monitor = Arc::new(monitor_with(node.clone()));
    monitor.start();

    node.alive.store(false, Ordering::SeqCst);
    for _ in 0..100 {
        if node.state() == ProcessState::Terminated {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(node.state(), ProcessState::Terminated);

    tokio::time::timeout(Duration::from_secs(2), monitor.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_basic_auth_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_body("green", true, 2)))
        .mount(&server)
        .await;

    let client = RestClusterClient::new(
        format!("{}/", server.uri()),
        Duration::from_secs(2),
        Some(("admin".to_string(), "secret".to_string())),
        &[],
    )
    .unwrap();

    let health = client.cluster_health().await.unwrap();
    assert_eq!(health.status, ClusterStatus::Green);
    assert_eq!(health.relocating_shards, 2);
    assert_eq!(client.base_url(), server.uri());
}

#[tokio::test]
async fn test_legacy_leader_flag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "green",
            "discovered_master": true,
        })))
        .mount(&server)
        .await;

    let health = client_for(&server).cluster_health().await.unwrap();
    assert!(health.has_leader());
}

#[tokio::test]
async fn test_malformed_health_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "purple" })))
        .mount(&server)
        .await;

    let result = client_for(&server).cluster_health().await;
    assert!(matches!(result, Err(HealthCheckError::Decode(_))));
}

#[tokio::test]
async fn test_allocation_exclusion_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/settings"))
        .and(query_param("flat_settings", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "persistent": {},
            "transient": { ALLOCATION_EXCLUDE_SETTING: "node1" },
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/_cluster/settings"))
        .and(body_json(json!({ "transient": { ALLOCATION_EXCLUDE_SETTING: null } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert_eq!(
        client.allocation_exclusion().await.unwrap(),
        Some("node1".to_string())
    );
    client.set_allocation_exclusion(None).await.unwrap();
}

#[tokio::test]
async fn test_unacknowledged_settings_update() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/_cluster/settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": false })))
        .mount(&server)
        .await;

    let result = client_for(&server).set_allocation_exclusion(Some("node1")).await;
    assert!(matches!(result, Err(HealthCheckError::Decode(_))));
}
