//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::config::Config;
use api::routes::load_balancers::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{ErrorCode, ResourceId};
use domain::{L3Network, LB_NETWORK_SERVICE_TYPE, Vip, VmNic};
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::BackendOperation;
use resource_store::{InMemoryResourceStore, ResourceStore};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (axum::Router, Arc<AppState>) {
    let state = api::create_default_state(Arc::new(InMemoryResourceStore::new()), &Config::default());
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(serde_json::to_string(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

async fn create_lb(app: &axum::Router) -> String {
    let (status, json) = send(
        app,
        "POST",
        "/load-balancers",
        Some(serde_json::json!({ "name": "web" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    json["id"].as_str().unwrap().to_string()
}

/// Seeds a NIC on a network served by the bundled backend.
async fn seed_nic(state: &AppState) -> ResourceId {
    let store = &state.manager.services().store;
    let l3 = L3Network::new("public").with_service(LB_NETWORK_SERVICE_TYPE, "VirtualRouter");
    store.insert_l3_network(&l3).await.unwrap();
    let nic = VmNic::new(ResourceId::new(), l3.id, "fa:16:3e:00:00:01");
    store.insert_vm_nic(&nic).await.unwrap();
    nic.id
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["providers"], serde_json::json!(["VirtualRouter"]));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_create_and_get_load_balancer() {
    let (app, _) = setup();
    let id = create_lb(&app).await;

    let (status, json) = send(&app, "GET", &format!("/load-balancers/{id}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "web");
    assert!(json["provider_type"].is_null());
    assert_eq!(json["vm_nic_refs"], serde_json::json!([]));
}

#[tokio::test]
async fn test_list_load_balancers() {
    let (app, _) = setup();
    let first = create_lb(&app).await;
    let second = create_lb(&app).await;

    let (status, json) = send(&app, "GET", "/load-balancers", None).await;

    assert_eq!(status, StatusCode::OK);
    let ids: Vec<_> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|lb| lb["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first) && ids.contains(&second));
}

#[tokio::test]
async fn test_get_invalid_and_missing_ids() {
    let (app, _) = setup();

    let (status, _) = send(&app, "GET", "/load-balancers/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = uuid::Uuid::new_v4();
    let (status, json) = send(&app, "GET", &format!("/load-balancers/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], ErrorCode::RESOURCE_NOT_FOUND);
}

#[tokio::test]
async fn test_attach_nic_binds_provider() {
    let (app, state) = setup();
    let id = create_lb(&app).await;
    let nic = seed_nic(&state).await;

    let (status, json) = send(&app, "POST", &format!("/load-balancers/{id}/vm-nics/{nic}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["provider_type"], "VirtualRouter");
    assert_eq!(json["vm_nic_refs"][0]["status"], "Active");
    assert_eq!(state.backend.calls_for(BackendOperation::AddVmNic).len(), 1);

    let (status, json) = send(&app, "DELETE", &format!("/load-balancers/{id}/vm-nics/{nic}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["vm_nic_refs"], serde_json::json!([]));
}

#[tokio::test]
async fn test_backend_failure_is_bad_gateway() {
    let (app, state) = setup();
    let id = create_lb(&app).await;
    let nic = seed_nic(&state).await;
    send(&app, "POST", &format!("/load-balancers/{id}/vm-nics/{nic}"), None).await;
    state.backend.set_failure(
        BackendOperation::AddListener,
        ErrorCode::new("E_PORT_CONFLICT", "port 80 in use"),
    );

    let (status, json) = send(
        &app,
        "POST",
        &format!("/load-balancers/{id}/listeners"),
        Some(serde_json::json!({
            "instance_port": 8080,
            "load_balancer_port": 80,
            "protocol": "tcp"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], "E_PORT_CONFLICT");
    assert_eq!(json["error"], "port 80 in use");

    let (_, json) = send(&app, "GET", &format!("/load-balancers/{id}"), None).await;
    assert_eq!(json["listeners"], serde_json::json!([]));
}

#[tokio::test]
async fn test_create_listener_on_inactive_lb() {
    let (app, state) = setup();
    let id = create_lb(&app).await;
    let listener_id = ResourceId::new();

    let (status, json) = send(
        &app,
        "POST",
        &format!("/load-balancers/{id}/listeners"),
        Some(serde_json::json!({
            "resource_id": listener_id.to_string(),
            "name": "http",
            "instance_port": 8080,
            "load_balancer_port": 80,
            "protocol": "http"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["listeners"][0]["id"], listener_id.to_string());
    assert_eq!(state.backend.call_count(), 0);

    let (status, json) = send(
        &app,
        "DELETE",
        &format!("/load-balancers/{id}/listeners/{listener_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["listeners"], serde_json::json!([]));
}

#[tokio::test]
async fn test_invalid_listener_is_bad_request() {
    let (app, _) = setup();
    let id = create_lb(&app).await;

    let (status, json) = send(
        &app,
        "POST",
        &format!("/load-balancers/{id}/listeners"),
        Some(serde_json::json!({
            "instance_port": 70000,
            "load_balancer_port": 80,
            "protocol": "tcp"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_vip_lifecycle() {
    let (app, state) = setup();
    let id = create_lb(&app).await;
    let vip = Vip::new("vip", "172.20.0.10", ResourceId::new());
    state.manager.services().store.insert_vip(&vip).await.unwrap();

    let (status, json) = send(&app, "POST", &format!("/load-balancers/{id}/vips/{}", vip.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["vip_refs"][0]["vip_id"], vip.id.to_string());

    let (status, json) = send(&app, "DELETE", &format!("/load-balancers/{id}/vips/{}", vip.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["vip_refs"], serde_json::json!([]));
}

#[tokio::test]
async fn test_missing_vip_is_operation_failure() {
    let (app, _) = setup();
    let id = create_lb(&app).await;
    let vip_id = ResourceId::new();

    let (status, json) = send(&app, "POST", &format!("/load-balancers/{id}/vips/{vip_id}"), None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], ErrorCode::OPERATION_FAILURE);
}

#[tokio::test]
async fn test_removing_unknown_vip_succeeds() {
    let (app, state) = setup();
    let id = create_lb(&app).await;
    let vip_id = ResourceId::new();

    let (status, _) = send(&app, "DELETE", &format!("/load-balancers/{id}/vips/{vip_id}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.backend.call_count(), 0);
}

#[tokio::test]
async fn test_delete_load_balancer_is_not_implemented() {
    let (app, state) = setup();
    let id = create_lb(&app).await;

    let (status, json) = send(&app, "DELETE", &format!("/load-balancers/{id}"), None).await;

    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(json["code"], ErrorCode::UNKNOWN_MESSAGE);
    assert_eq!(state.bus.published().len(), 1);
}
