// Execution Log Store - durable record of each triggering event
//
// The execution log is the unit of the at-most-one-processing guarantee.
// Every status transition is a single-row atomic conditional update; claim
// contention between dispatchers is settled by the row count of the
// conditional UPDATE, never by read-then-write.
//
// Legal transitions: pending -> running -> {completed | failed};
// failed -> pending only through the retry coordinator and only below the
// retry ceiling. completed and exhausted failed rows are terminal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::actions::StepResult;
use super::engine::WorkflowDefinition;
use super::triggers::TRACKED_TABLES;
use super::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Failed, Self::Pending)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the retry failure history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousError {
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub attempt: i32,
}

/// Structured bag on the execution row: retry bookkeeping and the full
/// failure history across attempts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDetails {
    #[serde(default)]
    pub retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub previous_errors: Vec<PreviousError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub trigger_event_id: Uuid,
    pub trigger_data: serde_json::Value,
    pub status: ExecutionStatus,
    pub attempts: i32,
    pub error_message: Option<String>,
    pub details: ExecutionDetails,
    pub step_results: Vec<StepResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Enqueue request from the trigger detector.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub workflow_id: Uuid,
    pub trigger_event_id: Uuid,
    pub trigger_data: serde_json::Value,
}

impl ExecutionLog {
    fn from_new(new: NewExecution) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: new.workflow_id,
            trigger_event_id: new.trigger_event_id,
            trigger_data: new.trigger_data,
            status: ExecutionStatus::Pending,
            attempts: 0,
            error_message: None,
            details: ExecutionDetails::default(),
            step_results: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Persistence port for workflow definitions and the execution log.
#[async_trait]
pub trait AutomationStore: Send + Sync {
    // Workflow definitions (read-only to the engine; mutated by the
    // configuration surface)
    async fn insert_workflow(&self, workflow: &WorkflowDefinition) -> EngineResult<()>;
    async fn list_workflows(&self) -> EngineResult<Vec<WorkflowDefinition>>;
    async fn get_workflow(&self, id: Uuid) -> EngineResult<Option<WorkflowDefinition>>;
    async fn set_workflow_active(&self, id: Uuid, active: bool) -> EngineResult<bool>;
    async fn active_workflows(&self) -> EngineResult<Vec<WorkflowDefinition>>;

    /// Insert one pending execution; returns None when the
    /// (workflow, event) pair was already enqueued.
    async fn enqueue(&self, new: NewExecution) -> EngineResult<Option<Uuid>>;
    async fn get_execution(&self, id: Uuid) -> EngineResult<Option<ExecutionLog>>;

    /// Atomically claim a pending row for execution. Exactly one of any
    /// number of racing claimers observes `true`.
    async fn claim(&self, id: Uuid) -> EngineResult<bool>;
    async fn complete(&self, id: Uuid, results: &[StepResult]) -> EngineResult<()>;
    async fn fail(&self, id: Uuid, error: &str, results: &[StepResult]) -> EngineResult<()>;

    /// Atomically move a failed row back to pending, guarded by the retry
    /// ceiling: appends the current error to the failure history, increments
    /// attempts, clears error_message. Returns false when the row was not
    /// failed or already at the ceiling.
    async fn requeue_for_retry(&self, id: Uuid, max_retries: i32) -> EngineResult<bool>;

    async fn list_by_status(
        &self,
        status: ExecutionStatus,
        limit: i64,
    ) -> EngineResult<Vec<ExecutionLog>>;
    async fn list_recent(&self, limit: i64) -> EngineResult<Vec<ExecutionLog>>;

    /// Failed rows past the cool-down and under the ceiling.
    async fn retry_candidates(
        &self,
        cool_down: std::time::Duration,
        max_retries: i32,
        limit: i64,
    ) -> EngineResult<Vec<ExecutionLog>>;

    /// Terminally failed rows (ceiling reached), for the operator report.
    async fn exhausted(&self, max_retries: i32) -> EngineResult<Vec<ExecutionLog>>;

    /// Fetch one tracked entity as JSON for context enrichment.
    async fn load_entity(&self, table: &str, id: &str) -> EngineResult<Option<serde_json::Value>>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-memory store used by tests and local development. Enforces the same
/// transition graph as the Postgres store; atomicity comes from holding the
/// write lock across each check-and-set.
#[derive(Default)]
pub struct MemoryAutomationStore {
    workflows: RwLock<Vec<WorkflowDefinition>>,
    executions: RwLock<HashMap<Uuid, ExecutionLog>>,
    enqueued_keys: RwLock<HashSet<(Uuid, Uuid)>>,
    entities: RwLock<HashMap<(String, String), serde_json::Value>>,
}

impl MemoryAutomationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context entity (tests / local development).
    pub async fn insert_entity(&self, table: &str, id: &str, value: serde_json::Value) {
        self.entities
            .write()
            .await
            .insert((table.to_string(), id.to_string()), value);
    }
}

#[async_trait]
impl AutomationStore for MemoryAutomationStore {
    async fn insert_workflow(&self, workflow: &WorkflowDefinition) -> EngineResult<()> {
        self.workflows.write().await.push(workflow.clone());
        Ok(())
    }

    async fn list_workflows(&self) -> EngineResult<Vec<WorkflowDefinition>> {
        Ok(self.workflows.read().await.clone())
    }

    async fn get_workflow(&self, id: Uuid) -> EngineResult<Option<WorkflowDefinition>> {
        Ok(self
            .workflows
            .read()
            .await
            .iter()
            .find(|w| w.id == id)
            .cloned())
    }

    async fn set_workflow_active(&self, id: Uuid, active: bool) -> EngineResult<bool> {
        let mut workflows = self.workflows.write().await;
        match workflows.iter_mut().find(|w| w.id == id) {
            Some(workflow) => {
                workflow.active = active;
                workflow.updated_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn active_workflows(&self) -> EngineResult<Vec<WorkflowDefinition>> {
        Ok(self
            .workflows
            .read()
            .await
            .iter()
            .filter(|w| w.active)
            .cloned()
            .collect())
    }

    async fn enqueue(&self, new: NewExecution) -> EngineResult<Option<Uuid>> {
        let key = (new.workflow_id, new.trigger_event_id);
        let mut keys = self.enqueued_keys.write().await;
        if keys.contains(&key) {
            return Ok(None);
        }
        keys.insert(key);

        let log = ExecutionLog::from_new(new);
        let id = log.id;
        self.executions.write().await.insert(id, log);
        Ok(Some(id))
    }

    async fn get_execution(&self, id: Uuid) -> EngineResult<Option<ExecutionLog>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn claim(&self, id: Uuid) -> EngineResult<bool> {
        let mut executions = self.executions.write().await;
        let log = executions
            .get_mut(&id)
            .ok_or(EngineError::ExecutionNotFound(id))?;
        if log.status != ExecutionStatus::Pending {
            return Ok(false);
        }
        log.status = ExecutionStatus::Running;
        log.started_at = Some(Utc::now());
        Ok(true)
    }

    async fn complete(&self, id: Uuid, results: &[StepResult]) -> EngineResult<()> {
        let mut executions = self.executions.write().await;
        let log = executions
            .get_mut(&id)
            .ok_or(EngineError::ExecutionNotFound(id))?;
        if !log.status.can_transition_to(ExecutionStatus::Completed) {
            return Err(EngineError::IllegalTransition {
                id,
                to: ExecutionStatus::Completed,
            });
        }
        log.status = ExecutionStatus::Completed;
        log.step_results = results.to_vec();
        log.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str, results: &[StepResult]) -> EngineResult<()> {
        let mut executions = self.executions.write().await;
        let log = executions
            .get_mut(&id)
            .ok_or(EngineError::ExecutionNotFound(id))?;
        if !log.status.can_transition_to(ExecutionStatus::Failed) {
            return Err(EngineError::IllegalTransition {
                id,
                to: ExecutionStatus::Failed,
            });
        }
        log.status = ExecutionStatus::Failed;
        log.error_message = Some(error.to_string());
        log.step_results = results.to_vec();
        log.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn requeue_for_retry(&self, id: Uuid, max_retries: i32) -> EngineResult<bool> {
        let mut executions = self.executions.write().await;
        let log = executions
            .get_mut(&id)
            .ok_or(EngineError::ExecutionNotFound(id))?;
        if log.status != ExecutionStatus::Failed || log.attempts >= max_retries {
            return Ok(false);
        }

        let now = Utc::now();
        log.details.previous_errors.push(PreviousError {
            error: log.error_message.clone().unwrap_or_default(),
            failed_at: log.completed_at.unwrap_or(now),
            attempt: log.attempts,
        });
        log.details.retry_at = Some(now);
        log.attempts += 1;
        log.error_message = None;
        log.status = ExecutionStatus::Pending;
        log.started_at = None;
        log.completed_at = None;
        Ok(true)
    }

    async fn list_by_status(
        &self,
        status: ExecutionStatus,
        limit: i64,
    ) -> EngineResult<Vec<ExecutionLog>> {
        let mut rows: Vec<ExecutionLog> = self
            .executions
            .read()
            .await
            .values()
            .filter(|log| log.status == status)
            .cloned()
            .collect();
        rows.sort_by_key(|log| log.created_at);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn list_recent(&self, limit: i64) -> EngineResult<Vec<ExecutionLog>> {
        let mut rows: Vec<ExecutionLog> = self.executions.read().await.values().cloned().collect();
        rows.sort_by_key(|log| std::cmp::Reverse(log.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn retry_candidates(
        &self,
        cool_down: std::time::Duration,
        max_retries: i32,
        limit: i64,
    ) -> EngineResult<Vec<ExecutionLog>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(cool_down).unwrap_or_else(|_| chrono::Duration::zero());
        let mut rows: Vec<ExecutionLog> = self
            .executions
            .read()
            .await
            .values()
            .filter(|log| {
                log.status == ExecutionStatus::Failed
                    && log.attempts < max_retries
                    && log.completed_at.map(|t| t <= cutoff).unwrap_or(false)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|log| log.completed_at);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn exhausted(&self, max_retries: i32) -> EngineResult<Vec<ExecutionLog>> {
        let mut rows: Vec<ExecutionLog> = self
            .executions
            .read()
            .await
            .values()
            .filter(|log| log.status == ExecutionStatus::Failed && log.attempts >= max_retries)
            .cloned()
            .collect();
        rows.sort_by_key(|log| std::cmp::Reverse(log.completed_at));
        Ok(rows)
    }

    async fn load_entity(&self, table: &str, id: &str) -> EngineResult<Option<serde_json::Value>> {
        Ok(self
            .entities
            .read()
            .await
            .get(&(table.to_string(), id.to_string()))
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Postgres store
// ---------------------------------------------------------------------------

type WorkflowRow = (
    Uuid,                     // id
    String,                   // name
    Option<String>,           // description
    String,                   // entity_type
    String,                   // trigger_type
    serde_json::Value,        // trigger_config
    serde_json::Value,        // conditions
    serde_json::Value,        // steps
    bool,                     // active
    DateTime<Utc>,            // created_at
    Option<DateTime<Utc>>,    // updated_at
);

type ExecutionRow = (
    Uuid,                     // id
    Uuid,                     // workflow_id
    Uuid,                     // trigger_event_id
    serde_json::Value,        // trigger_data
    String,                   // status
    i32,                      // attempts
    Option<String>,           // error_message
    serde_json::Value,        // details
    serde_json::Value,        // step_results
    DateTime<Utc>,            // created_at
    Option<DateTime<Utc>>,    // started_at
    Option<DateTime<Utc>>,    // completed_at
);

const WORKFLOW_COLUMNS: &str = "id, name, description, entity_type, trigger_type, trigger_config, conditions, steps, active, created_at, updated_at";
const EXECUTION_COLUMNS: &str = "id, workflow_id, trigger_event_id, trigger_data, status, attempts, error_message, details, step_results, created_at, started_at, completed_at";

/// PostgreSQL-backed automation store.
#[derive(Clone)]
pub struct PgAutomationStore {
    pool: PgPool,
}

impl PgAutomationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_workflow_row(row: WorkflowRow) -> Option<WorkflowDefinition> {
        let trigger_type = super::triggers::TriggerType::parse(&row.4)?;
        let conditions = serde_json::from_value(row.6).ok()?;
        let steps = serde_json::from_value(row.7).ok()?;

        Some(WorkflowDefinition {
            id: row.0,
            name: row.1,
            description: row.2,
            entity_type: row.3,
            trigger_type,
            trigger_config: row.5,
            conditions,
            steps,
            active: row.8,
            created_at: row.9,
            updated_at: row.10,
        })
    }

    fn map_execution_row(row: ExecutionRow) -> Option<ExecutionLog> {
        let status = ExecutionStatus::parse(&row.4)?;

        Some(ExecutionLog {
            id: row.0,
            workflow_id: row.1,
            trigger_event_id: row.2,
            trigger_data: row.3,
            status,
            attempts: row.5,
            error_message: row.6,
            details: serde_json::from_value(row.7).unwrap_or_default(),
            step_results: serde_json::from_value(row.8).unwrap_or_default(),
            created_at: row.9,
            started_at: row.10,
            completed_at: row.11,
        })
    }

    fn map_execution_rows(rows: Vec<ExecutionRow>) -> Vec<ExecutionLog> {
        rows.into_iter().filter_map(Self::map_execution_row).collect()
    }
}

#[async_trait]
impl AutomationStore for PgAutomationStore {
    async fn insert_workflow(&self, workflow: &WorkflowDefinition) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflows
            (id, name, description, entity_type, trigger_type, trigger_config, conditions, steps, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(&workflow.entity_type)
        .bind(workflow.trigger_type.as_str())
        .bind(&workflow.trigger_config)
        .bind(serde_json::to_value(&workflow.conditions)?)
        .bind(serde_json::to_value(&workflow.steps)?)
        .bind(workflow.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_workflows(&self) -> EngineResult<Vec<WorkflowDefinition>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows ORDER BY created_at ASC",
            WORKFLOW_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(Self::map_workflow_row).collect())
    }

    async fn get_workflow(&self, id: Uuid) -> EngineResult<Option<WorkflowDefinition>> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows WHERE id = $1",
            WORKFLOW_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(Self::map_workflow_row))
    }

    async fn set_workflow_active(&self, id: Uuid, active: bool) -> EngineResult<bool> {
        let result =
            sqlx::query("UPDATE workflows SET active = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(active)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn active_workflows(&self) -> EngineResult<Vec<WorkflowDefinition>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows WHERE active = true ORDER BY created_at ASC",
            WORKFLOW_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(Self::map_workflow_row).collect())
    }

    async fn enqueue(&self, new: NewExecution) -> EngineResult<Option<Uuid>> {
        let id = Uuid::new_v4();

        let result = sqlx::query(
            r#"
            INSERT INTO automation_executions
            (id, workflow_id, trigger_event_id, trigger_data, status, attempts, details, step_results, created_at)
            VALUES ($1, $2, $3, $4, 'pending', 0, '{}'::jsonb, '[]'::jsonb, NOW())
            ON CONFLICT (workflow_id, trigger_event_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(new.workflow_id)
        .bind(new.trigger_event_id)
        .bind(&new.trigger_data)
        .execute(&self.pool)
        .await?;

        Ok((result.rows_affected() == 1).then_some(id))
    }

    async fn get_execution(&self, id: Uuid) -> EngineResult<Option<ExecutionLog>> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM automation_executions WHERE id = $1",
            EXECUTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(Self::map_execution_row))
    }

    async fn claim(&self, id: Uuid) -> EngineResult<bool> {
        let result = sqlx::query(
            "UPDATE automation_executions SET status = 'running', started_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(&self, id: Uuid, results: &[StepResult]) -> EngineResult<()> {
        let result = sqlx::query(
            "UPDATE automation_executions \
             SET status = 'completed', completed_at = NOW(), step_results = $2 \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(serde_json::to_value(results)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_execution(id).await? {
                None => Err(EngineError::ExecutionNotFound(id)),
                Some(_) => Err(EngineError::IllegalTransition {
                    id,
                    to: ExecutionStatus::Completed,
                }),
            };
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str, results: &[StepResult]) -> EngineResult<()> {
        let result = sqlx::query(
            "UPDATE automation_executions \
             SET status = 'failed', completed_at = NOW(), error_message = $2, step_results = $3 \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(error)
        .bind(serde_json::to_value(results)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_execution(id).await? {
                None => Err(EngineError::ExecutionNotFound(id)),
                Some(_) => Err(EngineError::IllegalTransition {
                    id,
                    to: ExecutionStatus::Failed,
                }),
            };
        }
        Ok(())
    }

    async fn requeue_for_retry(&self, id: Uuid, max_retries: i32) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE automation_executions
            SET status = 'pending',
                attempts = attempts + 1,
                error_message = NULL,
                started_at = NULL,
                completed_at = NULL,
                details = jsonb_set(
                    jsonb_set(details, '{retry_at}', to_jsonb(NOW()), true),
                    '{previous_errors}',
                    COALESCE(details->'previous_errors', '[]'::jsonb) || jsonb_build_array(
                        jsonb_build_object(
                            'error', COALESCE(error_message, ''),
                            'failed_at', COALESCE(to_jsonb(completed_at), to_jsonb(NOW())),
                            'attempt', attempts
                        )
                    ),
                    true
                )
            WHERE id = $1 AND status = 'failed' AND attempts < $2
            "#,
        )
        .bind(id)
        .bind(max_retries)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_by_status(
        &self,
        status: ExecutionStatus,
        limit: i64,
    ) -> EngineResult<Vec<ExecutionLog>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM automation_executions WHERE status = $1 ORDER BY created_at ASC LIMIT $2",
            EXECUTION_COLUMNS
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::map_execution_rows(rows))
    }

    async fn list_recent(&self, limit: i64) -> EngineResult<Vec<ExecutionLog>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM automation_executions ORDER BY created_at DESC LIMIT $1",
            EXECUTION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::map_execution_rows(rows))
    }

    async fn retry_candidates(
        &self,
        cool_down: std::time::Duration,
        max_retries: i32,
        limit: i64,
    ) -> EngineResult<Vec<ExecutionLog>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM automation_executions \
             WHERE status = 'failed' AND attempts < $1 \
               AND completed_at IS NOT NULL \
               AND completed_at <= NOW() - make_interval(secs => $2) \
             ORDER BY completed_at ASC LIMIT $3",
            EXECUTION_COLUMNS
        ))
        .bind(max_retries)
        .bind(cool_down.as_secs_f64())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::map_execution_rows(rows))
    }

    async fn exhausted(&self, max_retries: i32) -> EngineResult<Vec<ExecutionLog>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM automation_executions \
             WHERE status = 'failed' AND attempts >= $1 \
             ORDER BY completed_at DESC",
            EXECUTION_COLUMNS
        ))
        .bind(max_retries)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::map_execution_rows(rows))
    }

    async fn load_entity(&self, table: &str, id: &str) -> EngineResult<Option<serde_json::Value>> {
        // Whitelisted tables only; the table name is interpolated
        if !TRACKED_TABLES.contains(&table) {
            return Ok(None);
        }
        let Ok(entity_id) = Uuid::parse_str(id) else {
            return Ok(None);
        };

        let query = format!(
            "SELECT row_to_json(t)::jsonb FROM (SELECT * FROM {} WHERE id = $1) t",
            table
        );
        let row = sqlx::query_scalar::<_, serde_json::Value>(&query)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }
}
