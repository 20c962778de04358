// Retry Coordinator - bounded exponential-backoff recovery
//
// The coordinator holds no timer of its own: an external scheduler (cron,
// supervisor, operator) invokes the sweep on whatever interval it likes.
// Eligibility is failed + past the cool-down + under the retry ceiling; the
// backoff delay is honored here, by the coordinator waiting before it
// transitions the row, not by the dispatcher.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::executor::{DispatchOutcome, Dispatcher};
use super::store::{AutomationStore, ExecutionLog};
use super::EngineResult;
use crate::config::AutomationConfig;

/// Sweep batch size per invocation.
const SWEEP_LIMIT: i64 = 100;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub cool_down: Duration,
    pub base_delay: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            cool_down: Duration::from_secs(300),
            base_delay: Duration::from_secs(5),
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AutomationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            cool_down: Duration::from_secs(config.cool_down_secs),
            base_delay: Duration::from_secs(config.retry_base_delay_secs),
            backoff_multiplier: config.retry_backoff_multiplier,
        }
    }

    /// Delay before re-invoking a row on its next attempt:
    /// `base_delay * backoff_multiplier ^ attempts`.
    pub fn backoff_delay(&self, attempts: i32) -> Duration {
        let exponent = attempts.max(0).min(16) as u32;
        self.base_delay * self.backoff_multiplier.saturating_pow(exponent)
    }
}

/// Result of one retry sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub retried: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct RetryCoordinator {
    store: Arc<dyn AutomationStore>,
    dispatcher: Dispatcher,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(store: Arc<dyn AutomationStore>, dispatcher: Dispatcher, policy: RetryPolicy) -> Self {
        Self {
            store,
            dispatcher,
            policy,
        }
    }

    /// Find failed executions eligible for retry and replay them.
    ///
    /// `retried` counts rows requeued and re-dispatched by this sweep;
    /// `errors` counts rows the sweep itself could not process. A replay
    /// that fails again is not a sweep error, it lands back in the log.
    pub async fn sweep(&self) -> EngineResult<SweepOutcome> {
        let candidates = self
            .store
            .retry_candidates(self.policy.cool_down, self.policy.max_retries, SWEEP_LIMIT)
            .await?;

        let mut retried = 0;
        let mut errors = 0;

        for log in candidates {
            let delay = self.policy.backoff_delay(log.attempts);
            tokio::time::sleep(delay).await;

            match self
                .store
                .requeue_for_retry(log.id, self.policy.max_retries)
                .await
            {
                Ok(true) => {
                    info!(
                        execution = %log.id,
                        attempt = log.attempts + 1,
                        delay_ms = delay.as_millis() as u64,
                        "requeued failed execution"
                    );
                    match self.dispatcher.dispatch(log.id).await {
                        Ok(DispatchOutcome::Failed { error, .. }) => {
                            warn!(execution = %log.id, error = %error, "retry attempt failed again");
                            retried += 1;
                        }
                        Ok(_) => retried += 1,
                        Err(e) => {
                            error!(execution = %log.id, error = %e, "retry dispatch error");
                            errors += 1;
                        }
                    }
                }
                // Lost a race or hit the ceiling between scan and requeue
                Ok(false) => {}
                Err(e) => {
                    error!(execution = %log.id, error = %e, "requeue error");
                    errors += 1;
                }
            }
        }

        Ok(SweepOutcome { retried, errors })
    }

    /// Terminally failed executions for the operator report.
    pub async fn exhausted_report(&self) -> EngineResult<Vec<ExecutionLog>> {
        self.store.exhausted(self.policy.max_retries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automations::actions::ActionStep;
    use crate::automations::engine::WorkflowDefinition;
    use crate::automations::executor::tests::{harness, Harness};
    use crate::automations::store::NewExecution;
    use crate::automations::triggers::TriggerType;
    use crate::automations::ExecutionStatus;
    use serde_json::json;
    use uuid::Uuid;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            cool_down: Duration::ZERO,
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 2,
        }
    }

    fn coordinator(h: &Harness, policy: RetryPolicy) -> RetryCoordinator {
        RetryCoordinator::new(h.store.clone(), h.dispatcher.clone(), policy)
    }

    async fn failed_execution(h: &Harness) -> Uuid {
        let workflow = WorkflowDefinition::new("notify", "jobs", TriggerType::StatusChangedTo)
            .with_steps(vec![ActionStep::send_email(
                "{{client.email}}",
                "Done",
                "Job complete",
            )]);
        h.store.insert_workflow(&workflow).await.unwrap();
        h.store
            .enqueue(NewExecution {
                workflow_id: workflow.id,
                trigger_event_id: Uuid::new_v4(),
                trigger_data: json!({"entity": {"title": "Job"}}),
            })
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_backoff_is_strictly_monotonic() {
        let policy = RetryPolicy::default();
        let delays: Vec<Duration> = (0..4).map(|a| policy.backoff_delay(a)).collect();

        assert_eq!(delays[0], Duration::from_secs(5));
        assert_eq!(delays[1], Duration::from_secs(10));
        assert_eq!(delays[2], Duration::from_secs(20));
        assert_eq!(delays[3], Duration::from_secs(40));
        for pair in delays.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[tokio::test]
    async fn test_failed_then_retried_then_completed() {
        let h = harness();
        // First dispatch fails on the email step, the retry succeeds
        *h.email.fail_first.lock().await = 1;
        let id = failed_execution(&h).await;

        let outcome = h.dispatcher.dispatch(id).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
        let log = h.store.get_execution(id).await.unwrap().unwrap();
        assert_eq!(log.status, ExecutionStatus::Failed);
        assert_eq!(log.attempts, 0);

        let coordinator = coordinator(&h, fast_policy());
        let outcome = coordinator.sweep().await.unwrap();
        assert_eq!(outcome, SweepOutcome { retried: 1, errors: 0 });

        let log = h.store.get_execution(id).await.unwrap().unwrap();
        assert_eq!(log.status, ExecutionStatus::Completed);
        assert_eq!(log.attempts, 1);
        assert_eq!(log.details.previous_errors.len(), 1);
        assert_eq!(h.email.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cool_down_defers_retry() {
        let h = harness();
        *h.email.fail_first.lock().await = 1;
        let id = failed_execution(&h).await;
        h.dispatcher.dispatch(id).await.unwrap();

        let policy = RetryPolicy {
            cool_down: Duration::from_secs(3600),
            ..fast_policy()
        };
        let coordinator = coordinator(&h, policy);
        let outcome = coordinator.sweep().await.unwrap();
        assert_eq!(outcome, SweepOutcome { retried: 0, errors: 0 });

        let log = h.store.get_execution(id).await.unwrap().unwrap();
        assert_eq!(log.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_exhausted_row_is_never_requeued() {
        let h = harness();
        // Every send fails: the row burns through the full retry budget
        *h.email.fail_first.lock().await = u32::MAX;
        let id = failed_execution(&h).await;
        h.dispatcher.dispatch(id).await.unwrap();

        let coordinator = coordinator(&h, fast_policy());
        for _ in 0..3 {
            coordinator.sweep().await.unwrap();
        }

        let log = h.store.get_execution(id).await.unwrap().unwrap();
        assert_eq!(log.status, ExecutionStatus::Failed);
        assert_eq!(log.attempts, 3);
        assert_eq!(log.details.previous_errors.len(), 3);

        // Ceiling reached: further sweeps never touch the row
        let outcome = coordinator.sweep().await.unwrap();
        assert_eq!(outcome, SweepOutcome { retried: 0, errors: 0 });
        let log_after = h.store.get_execution(id).await.unwrap().unwrap();
        assert_eq!(log_after.attempts, 3);

        let report = coordinator.exhausted_report().await.unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].id, id);
    }

    #[tokio::test]
    async fn test_whole_pipeline_reruns_on_retry() {
        let h = harness();
        // SMS succeeds, email fails: on retry the SMS is sent again
        // (documented at-least-once side-effect behavior)
        *h.email.fail_first.lock().await = 1;

        let workflow = WorkflowDefinition::new("two-step", "jobs", TriggerType::StatusChangedTo)
            .with_steps(vec![
                ActionStep::send_sms("+15550001111", "step one"),
                ActionStep::send_email("ops@fieldhub.app", "step two", "body"),
            ]);
        h.store.insert_workflow(&workflow).await.unwrap();
        let id = h
            .store
            .enqueue(NewExecution {
                workflow_id: workflow.id,
                trigger_event_id: Uuid::new_v4(),
                trigger_data: json!({}),
            })
            .await
            .unwrap()
            .unwrap();

        h.dispatcher.dispatch(id).await.unwrap();
        assert_eq!(h.sms.sent.lock().await.len(), 1);

        let coordinator = coordinator(&h, fast_policy());
        coordinator.sweep().await.unwrap();

        let log = h.store.get_execution(id).await.unwrap().unwrap();
        assert_eq!(log.status, ExecutionStatus::Completed);
        assert_eq!(h.sms.sent.lock().await.len(), 2);
    }
}
