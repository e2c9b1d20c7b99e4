//! Load balancer endpoints. Every mutating route is sent through the
//! manager's queue and answered from the command's reply.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{AggregateId, ResourceId};
use domain::{
    CommandEnvelope, CommandOutcome, CreateListener, LoadBalancerCommand, LoadBalancerInventory,
};
use orchestrator::{InMemoryBackend, InMemoryMessageBus, LoadBalancerManager};
use serde::Deserialize;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub manager: LoadBalancerManager,
    /// The bundled backend, registered under the configured provider type.
    pub backend: InMemoryBackend,
    pub bus: InMemoryMessageBus,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateLoadBalancerRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateListenerRequest {
    pub resource_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub instance_port: i64,
    pub load_balancer_port: i64,
    pub protocol: String,
}

// -- Handlers --

/// POST /load-balancers
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateLoadBalancerRequest>,
) -> Result<(StatusCode, Json<LoadBalancerInventory>), ApiError> {
    let inventory = state
        .manager
        .create_load_balancer(&req.name, req.description)
        .await?;
    Ok((StatusCode::CREATED, Json(inventory)))
}

/// GET /load-balancers
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LoadBalancerInventory>>, ApiError> {
    Ok(Json(state.manager.list_inventories().await?))
}

/// GET /load-balancers/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LoadBalancerInventory>, ApiError> {
    let id = parse_aggregate_id(&id)?;
    Ok(Json(state.manager.get_inventory(id).await?))
}

/// DELETE /load-balancers/{id}
#[tracing::instrument(skip(state))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LoadBalancerInventory>, ApiError> {
    let id = parse_aggregate_id(&id)?;
    dispatch(&state, id, LoadBalancerCommand::DeleteLoadBalancer).await
}

/// POST /load-balancers/{id}/listeners
#[tracing::instrument(skip(state, req))]
pub async fn create_listener(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateListenerRequest>,
) -> Result<Json<LoadBalancerInventory>, ApiError> {
    let id = parse_aggregate_id(&id)?;

    let mut cmd = CreateListener::new(req.instance_port, req.load_balancer_port, &req.protocol)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if let Some(resource_id) = req.resource_id.as_deref() {
        cmd = cmd.with_resource_id(parse_resource_id(resource_id)?);
    }
    if let Some(name) = req.name {
        cmd = cmd.with_name(name);
    }
    if let Some(description) = req.description {
        cmd = cmd.with_description(description);
    }

    dispatch(&state, id, LoadBalancerCommand::CreateListener(cmd)).await
}

/// DELETE /load-balancers/{id}/listeners/{listener_id}
#[tracing::instrument(skip(state))]
pub async fn delete_listener(
    State(state): State<Arc<AppState>>,
    Path((id, listener_id)): Path<(String, String)>,
) -> Result<Json<LoadBalancerInventory>, ApiError> {
    let id = parse_aggregate_id(&id)?;
    let listener_id = parse_resource_id(&listener_id)?;
    dispatch(&state, id, LoadBalancerCommand::DeleteListener { listener_id }).await
}

/// POST /load-balancers/{id}/vips/{vip_id}
#[tracing::instrument(skip(state))]
pub async fn add_vip(
    State(state): State<Arc<AppState>>,
    Path((id, vip_id)): Path<(String, String)>,
) -> Result<Json<LoadBalancerInventory>, ApiError> {
    let id = parse_aggregate_id(&id)?;
    let vip_id = parse_resource_id(&vip_id)?;
    dispatch(&state, id, LoadBalancerCommand::AddVip { vip_id }).await
}

/// DELETE /load-balancers/{id}/vips/{vip_id}
#[tracing::instrument(skip(state))]
pub async fn remove_vip(
    State(state): State<Arc<AppState>>,
    Path((id, vip_id)): Path<(String, String)>,
) -> Result<Json<LoadBalancerInventory>, ApiError> {
    let id = parse_aggregate_id(&id)?;
    let vip_id = parse_resource_id(&vip_id)?;
    dispatch(&state, id, LoadBalancerCommand::RemoveVip { vip_id }).await
}

/// POST /load-balancers/{id}/vm-nics/{nic_id}
#[tracing::instrument(skip(state))]
pub async fn add_vm_nic(
    State(state): State<Arc<AppState>>,
    Path((id, nic_id)): Path<(String, String)>,
) -> Result<Json<LoadBalancerInventory>, ApiError> {
    let id = parse_aggregate_id(&id)?;
    let vm_nic_id = parse_resource_id(&nic_id)?;
    dispatch(&state, id, LoadBalancerCommand::AddVmNic { vm_nic_id }).await
}

/// DELETE /load-balancers/{id}/vm-nics/{nic_id}
#[tracing::instrument(skip(state))]
pub async fn remove_vm_nic(
    State(state): State<Arc<AppState>>,
    Path((id, nic_id)): Path<(String, String)>,
) -> Result<Json<LoadBalancerInventory>, ApiError> {
    let id = parse_aggregate_id(&id)?;
    let vm_nic_id = parse_resource_id(&nic_id)?;
    dispatch(&state, id, LoadBalancerCommand::RemoveVmNic { vm_nic_id }).await
}

// -- Helpers --

/// Runs a command through the queue and turns its reply into a response.
async fn dispatch(
    state: &AppState,
    id: AggregateId,
    command: LoadBalancerCommand,
) -> Result<Json<LoadBalancerInventory>, ApiError> {
    let event = state
        .manager
        .execute(CommandEnvelope::new(id, command))
        .await?;

    match event.outcome {
        CommandOutcome::Success { inventory } => Ok(Json(inventory)),
        CommandOutcome::Failure { error } => Err(ApiError::Rejected(error)),
    }
}

fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(AggregateId::from(uuid))
}

fn parse_resource_id(id: &str) -> Result<ResourceId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
