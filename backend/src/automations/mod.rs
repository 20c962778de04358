// Automation Workflow Engine
//
// Watches entity state transitions, matches them against user-defined
// workflow definitions, runs the matched action pipelines exactly once per
// trigger with a durable execution log, and recovers failures with bounded
// exponential-backoff retry.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod retry;
pub mod store;
pub mod template;
pub mod triggers;

pub use actions::{ActionStep, StepKind, StepResult, StepStatus};
pub use conditions::TriggerCondition;
pub use engine::{AutomationEngine, WorkflowDefinition};
pub use executor::{DispatchOutcome, Dispatcher};
pub use retry::{RetryCoordinator, RetryPolicy, SweepOutcome};
pub use store::{
    AutomationStore, ExecutionLog, ExecutionStatus, MemoryAutomationStore, PgAutomationStore,
};
pub use triggers::{EntityEvent, MutationKind, TriggerType};

use thiserror::Error;
use uuid::Uuid;

/// Engine-internal error taxonomy.
///
/// Failures during dispatch are additionally captured into the execution
/// log's `error_message`/`previous_errors` so every failure stays queryable
/// after the fact.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("could not classify mutation event: {0}")]
    Classification(String),
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),
    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),
    #[error("illegal status transition to {to} for execution {id}")]
    IllegalTransition { id: Uuid, to: ExecutionStatus },
    #[error(transparent)]
    Sender(#[from] crate::services::SendError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
