// Execution Dispatcher - claims pending executions and runs their pipelines
//
// The claim transition (pending -> running) happens before any external
// call, so a crash mid-run leaves the row observably running rather than
// untouched. Steps run strictly sequentially; a retried execution re-runs
// the whole pipeline from step 1, which makes side-effect delivery
// at-least-once across retries.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::actions::{ActionStep, StepKind, StepResult};
use super::store::{AutomationStore, NewExecution};
use super::template::render;
use super::{EngineError, EngineResult};
use crate::services::{EmailSender, SmsSender};

/// Outcome of one dispatch pass over one execution row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Another dispatcher won the claim; nothing was executed.
    NotClaimed,
    Completed {
        results: Vec<StepResult>,
    },
    Failed {
        error: String,
        results: Vec<StepResult>,
    },
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn AutomationStore>,
    sms: Arc<dyn SmsSender>,
    email: Arc<dyn EmailSender>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        sms: Arc<dyn SmsSender>,
        email: Arc<dyn EmailSender>,
    ) -> Self {
        Self { store, sms, email }
    }

    /// Claim and run one pending execution.
    pub async fn dispatch(&self, execution_id: Uuid) -> EngineResult<DispatchOutcome> {
        let log = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;
        let workflow = self
            .store
            .get_workflow(log.workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(log.workflow_id))?;

        if !self.store.claim(execution_id).await? {
            info!(execution = %execution_id, "claim lost, row already taken");
            return Ok(DispatchOutcome::NotClaimed);
        }

        let context = self.build_context(&log.trigger_data).await?;

        let mut results = Vec::new();
        match self.run_steps(&workflow.steps, &context, &mut results).await {
            Ok(()) => {
                self.store.complete(execution_id, &results).await?;
                info!(
                    execution = %execution_id,
                    workflow = %workflow.name,
                    steps = results.len(),
                    "execution completed"
                );
                Ok(DispatchOutcome::Completed { results })
            }
            Err(e) => {
                let error = e.to_string();
                self.store.fail(execution_id, &error, &results).await?;
                warn!(
                    execution = %execution_id,
                    workflow = %workflow.name,
                    error = %error,
                    "execution failed"
                );
                Ok(DispatchOutcome::Failed { error, results })
            }
        }
    }

    /// Enqueue and immediately dispatch an ad-hoc execution (manual
    /// trigger). The event identity is fresh, so manual runs never collide
    /// with detector-enqueued rows.
    pub async fn dispatch_manual(
        &self,
        workflow_id: Uuid,
        context: serde_json::Value,
    ) -> EngineResult<(Uuid, DispatchOutcome)> {
        if self.store.get_workflow(workflow_id).await?.is_none() {
            return Err(EngineError::WorkflowNotFound(workflow_id));
        }

        let execution_id = self
            .store
            .enqueue(NewExecution {
                workflow_id,
                trigger_event_id: Uuid::new_v4(),
                trigger_data: context,
            })
            .await?
            .ok_or(EngineError::ExecutionNotFound(workflow_id))?;

        let outcome = self.dispatch(execution_id).await?;
        Ok((execution_id, outcome))
    }

    /// Periodic-scan entry point: claim and run pending rows. Returns how
    /// many rows this pass actually executed.
    pub async fn run_pending(&self, limit: i64) -> EngineResult<usize> {
        let pending = self
            .store
            .list_by_status(super::ExecutionStatus::Pending, limit)
            .await?;

        let outcomes = futures::future::join_all(
            pending.iter().map(|log| self.dispatch(log.id)),
        )
        .await;

        let mut dispatched = 0;
        for outcome in outcomes {
            match outcome {
                Ok(DispatchOutcome::NotClaimed) => {}
                Ok(_) => dispatched += 1,
                Err(e) => warn!(error = %e, "pending dispatch failed"),
            }
        }
        Ok(dispatched)
    }

    /// Execution context: the trigger snapshot merged with the entity
    /// lookups the action runner needs. The owning client record is merged
    /// under "client" when the entity carries a client_id.
    async fn build_context(&self, trigger_data: &serde_json::Value) -> EngineResult<serde_json::Value> {
        let mut context = trigger_data.clone();

        let client_id = trigger_data
            .pointer("/entity/client_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        if let Some(client_id) = client_id {
            if let Some(client) = self.store.load_entity("clients", &client_id).await? {
                if let Some(object) = context.as_object_mut() {
                    object.insert("client".to_string(), client);
                }
            }
        }

        Ok(context)
    }

    /// Run a step sequence in order. Critical step failures abort the
    /// pipeline; continue_on_error steps record their failure and let it
    /// proceed.
    fn run_steps<'a>(
        &'a self,
        steps: &'a [ActionStep],
        context: &'a serde_json::Value,
        results: &'a mut Vec<StepResult>,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            for step in steps {
                match self.run_step(step, context, results).await {
                    Ok(()) => {}
                    Err(e) if step.continue_on_error => {
                        warn!(step = %step.name, error = %e, "non-critical step failed");
                        results.push(StepResult::failure(step, &e.to_string()));
                    }
                    Err(e) => {
                        results.push(StepResult::failure(step, &e.to_string()));
                        return Err(e);
                    }
                }
            }
            Ok(())
        })
    }

    async fn run_step(
        &self,
        step: &ActionStep,
        context: &serde_json::Value,
        results: &mut Vec<StepResult>,
    ) -> EngineResult<()> {
        match &step.kind {
            StepKind::SendSms { to, message } => {
                let to = render(to, context);
                let body = render(message, context);
                self.sms.send(&to, &body).await?;
                results.push(StepResult::success(step, serde_json::json!({"to": to})));
            }
            StepKind::SendEmail { to, subject, body } => {
                let to = render(to, context);
                let subject = render(subject, context);
                let body = render(body, context);
                self.email.send(&to, &subject, &body).await?;
                results.push(StepResult::success(
                    step,
                    serde_json::json!({"to": to, "subject": subject}),
                ));
            }
            StepKind::Wait { seconds } => {
                // Execution-local suspension; other executions keep running
                tokio::time::sleep(std::time::Duration::from_secs(*seconds)).await;
                results.push(StepResult::success(
                    step,
                    serde_json::json!({"waited_seconds": seconds}),
                ));
            }
            StepKind::Branch {
                predicate,
                when_true,
                when_false,
            } => {
                let taken = predicate.matches(context);
                results.push(StepResult::success(step, serde_json::json!({"branch": taken})));
                let arm = if taken { when_true } else { when_false };
                self.run_steps(arm, context, results).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::automations::conditions::TriggerCondition;
    use crate::automations::engine::WorkflowDefinition;
    use crate::automations::store::MemoryAutomationStore;
    use crate::automations::triggers::TriggerType;
    use crate::automations::{ExecutionStatus, StepStatus};
    use crate::services::SendError;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;

    /// Recording fake sender; optionally fails the first N sends.
    #[derive(Default)]
    pub(crate) struct FakeSms {
        pub sent: Mutex<Vec<(String, String)>>,
        pub fail_first: Mutex<u32>,
    }

    #[async_trait]
    impl SmsSender for FakeSms {
        async fn send(&self, to: &str, body: &str) -> Result<(), SendError> {
            let mut fail = self.fail_first.lock().await;
            if *fail > 0 {
                *fail -= 1;
                return Err(SendError::new("sms", "gateway returned 500"));
            }
            self.sent.lock().await.push((to.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeEmail {
        pub sent: Mutex<Vec<(String, String, String)>>,
        pub fail_first: Mutex<u32>,
    }

    #[async_trait]
    impl EmailSender for FakeEmail {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), SendError> {
            let mut fail = self.fail_first.lock().await;
            if *fail > 0 {
                *fail -= 1;
                return Err(SendError::new("smtp", "connection refused"));
            }
            self.sent
                .lock()
                .await
                .push((to.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    pub(crate) struct Harness {
        pub store: Arc<MemoryAutomationStore>,
        pub sms: Arc<FakeSms>,
        pub email: Arc<FakeEmail>,
        pub dispatcher: Dispatcher,
    }

    pub(crate) fn harness() -> Harness {
        let store = Arc::new(MemoryAutomationStore::new());
        let sms = Arc::new(FakeSms::default());
        let email = Arc::new(FakeEmail::default());
        let dispatcher = Dispatcher::new(store.clone(), sms.clone(), email.clone());
        Harness {
            store,
            sms,
            email,
            dispatcher,
        }
    }

    fn notify_workflow() -> WorkflowDefinition {
        WorkflowDefinition::new("Completion notices", "jobs", TriggerType::StatusChangedTo)
            .with_trigger_config(json!({"status": "completed"}))
            .with_steps(vec![
                ActionStep::send_sms("{{client.phone}}", "Hi {{client.name}}, {{entity.title}} is done"),
                ActionStep::send_email(
                    "{{client.email}}",
                    "{{entity.title}} completed",
                    "Hi {{client.name}}, your job is complete.",
                ),
            ])
    }

    fn trigger_data() -> serde_json::Value {
        json!({
            "entity_id": "11111111-1111-1111-1111-111111111111",
            "entity_type": "jobs",
            "entity": {
                "id": "11111111-1111-1111-1111-111111111111",
                "client_id": "22222222-2222-2222-2222-222222222222",
                "title": "Fence install",
                "status": "completed",
            },
            "old_status": "scheduled",
            "new_status": "completed",
        })
    }

    async fn seed_client(store: &MemoryAutomationStore) {
        store
            .insert_entity(
                "clients",
                "22222222-2222-2222-2222-222222222222",
                json!({
                    "id": "22222222-2222-2222-2222-222222222222",
                    "name": "Ann",
                    "phone": "+15550001111",
                    "email": "ann@example.com",
                }),
            )
            .await;
    }

    async fn enqueue(h: &Harness, workflow: &WorkflowDefinition) -> Uuid {
        h.store.insert_workflow(workflow).await.unwrap();
        h.store
            .enqueue(NewExecution {
                workflow_id: workflow.id,
                trigger_event_id: Uuid::new_v4(),
                trigger_data: trigger_data(),
            })
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_two_step_pipeline_completes_with_per_step_results() {
        let h = harness();
        seed_client(&h.store).await;
        let workflow = notify_workflow();
        let id = enqueue(&h, &workflow).await;

        let outcome = h.dispatcher.dispatch(id).await.unwrap();
        let DispatchOutcome::Completed { results } = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == StepStatus::Success));

        let log = h.store.get_execution(id).await.unwrap().unwrap();
        assert_eq!(log.status, ExecutionStatus::Completed);
        assert_eq!(log.step_results.len(), 2);
        assert!(log.started_at.is_some());
        assert!(log.completed_at.is_some());

        // Templates resolved against the merged context
        let sms = h.sms.sent.lock().await;
        assert_eq!(sms[0].0, "+15550001111");
        assert_eq!(sms[0].1, "Hi Ann, Fence install is done");
        let email = h.email.sent.lock().await;
        assert_eq!(email[0].0, "ann@example.com");
        assert_eq!(email[0].1, "Fence install completed");
    }

    #[tokio::test]
    async fn test_critical_step_failure_aborts_and_fails_the_row() {
        let h = harness();
        seed_client(&h.store).await;
        *h.email.fail_first.lock().await = 1;
        let workflow = notify_workflow();
        let id = enqueue(&h, &workflow).await;

        let outcome = h.dispatcher.dispatch(id).await.unwrap();
        let DispatchOutcome::Failed { error, results } = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert!(error.contains("smtp"));
        // First step succeeded, second recorded its failure
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, StepStatus::Success);
        assert_eq!(results[1].status, StepStatus::Failed);

        let log = h.store.get_execution(id).await.unwrap().unwrap();
        assert_eq!(log.status, ExecutionStatus::Failed);
        assert_eq!(log.attempts, 0);
        assert!(log.error_message.is_some());
    }

    #[tokio::test]
    async fn test_continue_on_error_step_lets_pipeline_proceed() {
        let h = harness();
        seed_client(&h.store).await;
        *h.sms.fail_first.lock().await = 1;

        let workflow = WorkflowDefinition::new("lenient", "jobs", TriggerType::StatusChangedTo)
            .with_trigger_config(json!({"status": "completed"}))
            .with_steps(vec![
                ActionStep::send_sms("{{client.phone}}", "first").continue_on_error(),
                ActionStep::send_email("{{client.email}}", "second", "body"),
            ]);
        let id = enqueue(&h, &workflow).await;

        let outcome = h.dispatcher.dispatch(id).await.unwrap();
        let DispatchOutcome::Completed { results } = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, StepStatus::Failed);
        assert_eq!(results[1].status, StepStatus::Success);
        assert_eq!(h.email.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_template_key_is_not_an_error() {
        let h = harness();
        // No client entity seeded: {{client.phone}} stays literal
        let workflow = WorkflowDefinition::new("literal", "jobs", TriggerType::StatusChangedTo)
            .with_steps(vec![ActionStep::send_sms("{{client.phone}}", "Hi {{client.name}}")]);
        let id = enqueue(&h, &workflow).await;

        let outcome = h.dispatcher.dispatch(id).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Completed { .. }));

        let sms = h.sms.sent.lock().await;
        assert_eq!(sms[0].0, "{{client.phone}}");
        assert_eq!(sms[0].1, "Hi {{client.name}}");
    }

    #[tokio::test]
    async fn test_branch_routes_exactly_one_arm() {
        let h = harness();
        seed_client(&h.store).await;
        let workflow = WorkflowDefinition::new("branching", "jobs", TriggerType::StatusChangedTo)
            .with_steps(vec![ActionStep::branch(
                TriggerCondition::equals("new_status", json!("completed")),
                vec![ActionStep::send_sms("{{client.phone}}", "done")],
                vec![ActionStep::send_email("{{client.email}}", "not done", "body")],
            )]);
        let id = enqueue(&h, &workflow).await;

        let outcome = h.dispatcher.dispatch(id).await.unwrap();
        let DispatchOutcome::Completed { results } = outcome else {
            panic!("expected completion");
        };
        // Branch result + the taken arm's step
        assert_eq!(results.len(), 2);
        assert_eq!(h.sms.sent.lock().await.len(), 1);
        assert!(h.email.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_branch_invalid_predicate_takes_false_arm() {
        let h = harness();
        seed_client(&h.store).await;
        let workflow = WorkflowDefinition::new("branching", "jobs", TriggerType::StatusChangedTo)
            .with_steps(vec![ActionStep::branch(
                TriggerCondition::new("new_status", "some_future_operator", json!("completed")),
                vec![ActionStep::send_sms("{{client.phone}}", "true arm")],
                vec![ActionStep::send_sms("{{client.phone}}", "false arm")],
            )]);
        let id = enqueue(&h, &workflow).await;

        h.dispatcher.dispatch(id).await.unwrap();
        let sms = h.sms.sent.lock().await;
        assert_eq!(sms.len(), 1);
        assert_eq!(sms[0].1, "false arm");
    }

    #[tokio::test]
    async fn test_lost_claim_performs_no_side_effects() {
        let h = harness();
        seed_client(&h.store).await;
        let workflow = notify_workflow();
        let id = enqueue(&h, &workflow).await;

        // First dispatch wins and completes
        let first = h.dispatcher.dispatch(id).await.unwrap();
        assert!(matches!(first, DispatchOutcome::Completed { .. }));
        let sent_after_first = h.sms.sent.lock().await.len();

        // Second dispatch loses the claim and sends nothing
        let second = h.dispatcher.dispatch(id).await.unwrap();
        assert_eq!(second, DispatchOutcome::NotClaimed);
        assert_eq!(h.sms.sent.lock().await.len(), sent_after_first);
    }

    #[tokio::test]
    async fn test_wait_step_is_execution_local() {
        let h = harness();
        seed_client(&h.store).await;
        let slow = WorkflowDefinition::new("slow", "jobs", TriggerType::StatusChangedTo)
            .with_steps(vec![
                ActionStep::wait(2),
                ActionStep::send_sms("{{client.phone}}", "slow done"),
            ]);
        let fast = WorkflowDefinition::new("fast", "jobs", TriggerType::StatusChangedTo)
            .with_steps(vec![ActionStep::send_sms("{{client.phone}}", "fast done")]);

        let slow_id = enqueue(&h, &slow).await;
        let fast_id = enqueue(&h, &fast).await;

        tokio::time::pause();
        let slow_dispatch = {
            let dispatcher = h.dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch(slow_id).await })
        };
        tokio::task::yield_now().await;

        // The unrelated execution is not blocked by the suspended one
        let fast_outcome = h.dispatcher.dispatch(fast_id).await.unwrap();
        assert!(matches!(fast_outcome, DispatchOutcome::Completed { .. }));

        tokio::time::advance(std::time::Duration::from_secs(3)).await;
        let slow_outcome = slow_dispatch.await.unwrap().unwrap();
        assert!(matches!(slow_outcome, DispatchOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_run_pending_scan_dispatches_all() {
        let h = harness();
        seed_client(&h.store).await;
        let workflow = notify_workflow();
        h.store.insert_workflow(&workflow).await.unwrap();
        for _ in 0..3 {
            h.store
                .enqueue(NewExecution {
                    workflow_id: workflow.id,
                    trigger_event_id: Uuid::new_v4(),
                    trigger_data: trigger_data(),
                })
                .await
                .unwrap()
                .unwrap();
        }

        let dispatched = h.dispatcher.run_pending(10).await.unwrap();
        assert_eq!(dispatched, 3);
        assert_eq!(h.sms.sent.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn test_end_to_end_job_completion() {
        use crate::automations::engine::AutomationEngine;
        use crate::automations::triggers::{EntityEvent, MutationKind};
        use chrono::Utc;
        use fieldhub_shared::{Client, Job, JobStatus};

        let h = harness();
        let engine = AutomationEngine::new(h.store.clone());

        let client = Client {
            id: Uuid::new_v4(),
            name: "Ann".to_string(),
            email: Some("ann@example.com".to_string()),
            phone: Some("+15550001111".to_string()),
            address: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: None,
        };
        h.store
            .insert_entity(
                "clients",
                &client.id.to_string(),
                serde_json::to_value(&client).unwrap(),
            )
            .await;

        let job = Job {
            id: Uuid::new_v4(),
            client_id: client.id,
            title: "Fence install".to_string(),
            description: None,
            status: JobStatus::Completed,
            assigned_to: None,
            scheduled_for: None,
            created_at: Utc::now(),
            updated_at: None,
        };
        let before = {
            let mut snapshot = serde_json::to_value(&job).unwrap();
            snapshot["status"] = json!("scheduled");
            snapshot
        };
        let after = serde_json::to_value(&job).unwrap();

        h.store.insert_workflow(&notify_workflow()).await.unwrap();

        // scheduled -> completed fires the status-changed-to workflow
        let event = EntityEvent::new(MutationKind::Update, "jobs")
            .with_before(before)
            .with_after(after);
        let enqueued = engine.process_event(&event).await.unwrap();
        assert_eq!(enqueued.len(), 1);

        let outcome = h.dispatcher.dispatch(enqueued[0]).await.unwrap();
        let DispatchOutcome::Completed { results } = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == StepStatus::Success));

        let log = h.store.get_execution(enqueued[0]).await.unwrap().unwrap();
        assert_eq!(log.status, ExecutionStatus::Completed);
        assert_eq!(h.sms.sent.lock().await.len(), 1);
        assert_eq!(h.email.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_manual_runs_ad_hoc_context() {
        let h = harness();
        let workflow = WorkflowDefinition::new("manual", "jobs", TriggerType::EntityUpdated)
            .with_steps(vec![ActionStep::send_sms("{{phone}}", "manual {{note}}")]);
        h.store.insert_workflow(&workflow).await.unwrap();

        let (execution_id, outcome) = h
            .dispatcher
            .dispatch_manual(workflow.id, json!({"phone": "+15559998888", "note": "run"}))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Completed { .. }));

        let log = h.store.get_execution(execution_id).await.unwrap().unwrap();
        assert_eq!(log.status, ExecutionStatus::Completed);
        assert_eq!(h.sms.sent.lock().await[0].1, "manual run");
    }
}
