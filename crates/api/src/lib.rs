//! HTTP API server for the load balancer orchestrator.
//!
//! Exposes each load balancer command as a REST endpoint, with structured
//! logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::{
    BackendRegistry, InMemoryBackend, InMemoryMessageBus, LoadBalancerManager,
    LoadBalancerServices, QueueConfig,
};
use resource_store::ResourceStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::load_balancers::{self as lb, AppState};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/load-balancers", get(lb::list).post(lb::create))
        .route("/load-balancers/{id}", get(lb::get).delete(lb::delete))
        .route("/load-balancers/{id}/listeners", post(lb::create_listener))
        .route(
            "/load-balancers/{id}/listeners/{listener_id}",
            delete(lb::delete_listener),
        )
        .route(
            "/load-balancers/{id}/vips/{vip_id}",
            post(lb::add_vip).delete(lb::remove_vip),
        )
        .route(
            "/load-balancers/{id}/vm-nics/{nic_id}",
            post(lb::add_vm_nic).delete(lb::remove_vm_nic),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the manager around `store` with the bundled in-memory backend and
/// message bus.
pub fn create_default_state(store: Arc<dyn ResourceStore>, config: &Config) -> Arc<AppState> {
    let backend = InMemoryBackend::new(config.provider_type.clone());
    let bus = InMemoryMessageBus::new();

    let services = LoadBalancerServices::from_store(
        store,
        BackendRegistry::new().with(Arc::new(backend.clone())),
        Arc::new(bus.clone()),
    );
    let manager = LoadBalancerManager::new(
        services,
        QueueConfig {
            idle_timeout: config.queue_idle_timeout,
        },
    );

    Arc::new(AppState {
        manager,
        backend,
        bus,
    })
}
