use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::automations::{
    ActionStep, DispatchOutcome, EntityEvent, ExecutionLog, StepResult, SweepOutcome,
    TriggerCondition, TriggerType, WorkflowDefinition,
};
use crate::error::{ApiResult, AppError};
use crate::AppState;

pub fn automation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", post(ingest_event))
        .route("/dispatch", post(dispatch))
        .route("/dispatch-pending", post(dispatch_pending))
        .route("/retry-sweep", post(retry_sweep))
        .route("/executions", get(list_executions))
        .route("/executions/exhausted", get(exhausted_executions))
        .route("/workflows", get(list_workflows).post(create_workflow))
        .route("/workflows/:id/active", put(set_workflow_active))
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub enqueued: Vec<Uuid>,
}

/// Trigger ingress: classify the mutation, enqueue matching workflows, and
/// dispatch the enqueued executions on detached tasks.
async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<EntityEvent>,
) -> ApiResult<Json<IngestResponse>> {
    let enqueued = state.engine.process_event(&event).await?;

    for execution_id in &enqueued {
        let state = state.clone();
        let execution_id = *execution_id;
        tokio::spawn(async move {
            if let Err(e) = state.dispatcher.dispatch(execution_id).await {
                error!(execution = %execution_id, error = %e, "dispatch failed");
            }
        });
    }

    Ok(Json(IngestResponse { enqueued }))
}

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub workflow_id: Uuid,
    pub execution_id: Option<Uuid>,
    #[serde(default)]
    pub context: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub execution_id: Uuid,
    pub status: &'static str,
    pub results: Vec<StepResult>,
}

/// Execution invocation: run one pending execution, or an ad-hoc context
/// against a workflow when no execution id is given.
async fn dispatch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DispatchRequest>,
) -> ApiResult<Json<DispatchResponse>> {
    let (execution_id, outcome) = match request.execution_id {
        Some(execution_id) => {
            let outcome = state.dispatcher.dispatch(execution_id).await?;
            (execution_id, outcome)
        }
        None => {
            state
                .dispatcher
                .dispatch_manual(request.workflow_id, request.context)
                .await?
        }
    };

    let (status, results) = match outcome {
        DispatchOutcome::NotClaimed => ("not_claimed", Vec::new()),
        DispatchOutcome::Completed { results } => ("completed", results),
        DispatchOutcome::Failed { results, .. } => ("failed", results),
    };

    Ok(Json(DispatchResponse {
        execution_id,
        status,
        results,
    }))
}

#[derive(Debug, Serialize)]
pub struct DispatchPendingResponse {
    pub dispatched: usize,
}

async fn dispatch_pending(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<DispatchPendingResponse>> {
    let dispatched = state.dispatcher.run_pending(100).await?;
    Ok(Json(DispatchPendingResponse { dispatched }))
}

/// Retry sweep invocation, driven by an external scheduler.
async fn retry_sweep(State(state): State<Arc<AppState>>) -> ApiResult<Json<SweepOutcome>> {
    let outcome = state.retry.sweep().await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

async fn list_executions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListExecutionsQuery>,
) -> ApiResult<Json<Vec<ExecutionLog>>> {
    let limit = query.limit.unwrap_or(50).min(500);

    let executions = match query.status.as_deref() {
        Some(raw) => {
            let status = crate::automations::ExecutionStatus::parse(raw)
                .ok_or_else(|| AppError::BadRequest(format!("unknown status '{}'", raw)))?;
            state.automations.list_by_status(status, limit).await?
        }
        None => state.automations.list_recent(limit).await?,
    };

    Ok(Json(executions))
}

/// Operator report: executions that exhausted their retry budget.
async fn exhausted_executions(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ExecutionLog>>> {
    let executions = state.retry.exhausted_report().await?;
    Ok(Json(executions))
}

async fn list_workflows(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<WorkflowDefinition>>> {
    let workflows = state.automations.list_workflows().await?;
    Ok(Json(workflows))
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub description: Option<String>,
    pub entity_type: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_config: serde_json::Value,
    #[serde(default)]
    pub conditions: Vec<TriggerCondition>,
    pub steps: Vec<ActionStep>,
    pub active: Option<bool>,
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateWorkflowRequest>,
) -> ApiResult<Json<WorkflowDefinition>> {
    let active = request.active.unwrap_or(true);
    if active && request.steps.is_empty() {
        return Err(AppError::ValidationError(
            "an active workflow must have at least one step".to_string(),
        ));
    }
    if !crate::automations::triggers::TRACKED_TABLES.contains(&request.entity_type.as_str()) {
        return Err(AppError::ValidationError(format!(
            "'{}' is not a tracked entity type",
            request.entity_type
        )));
    }

    let mut workflow = WorkflowDefinition::new(
        &request.name,
        &request.entity_type,
        request.trigger_type,
    )
    .with_trigger_config(request.trigger_config)
    .with_steps(request.steps);
    workflow.description = request.description;
    workflow.conditions = request.conditions;
    workflow.active = active;

    state.automations.insert_workflow(&workflow).await?;
    Ok(Json(workflow))
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

async fn set_workflow_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SetActiveRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let updated = state
        .automations
        .set_workflow_active(id, request.active)
        .await?;
    if !updated {
        return Err(AppError::NotFound(format!("Workflow {}", id)));
    }

    Ok(Json(serde_json::json!({
        "id": id,
        "active": request.active,
    })))
}
