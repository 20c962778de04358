// Automation Engine - trigger detection and workflow matching
//
// Classifies entity mutations, finds the active workflow definitions they
// satisfy, and enqueues exactly one pending execution per (workflow, event)
// pair. Definitions are read-only here; the execution log rows are the only
// mutable state the engine touches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::actions::ActionStep;
use super::conditions::{all_match, TriggerCondition};
use super::store::{AutomationStore, NewExecution};
use super::triggers::{Classification, EntityEvent, TriggerType};
use super::EngineResult;

/// A user-defined automation: trigger, match conditions, action pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Tracked table this workflow watches.
    pub entity_type: String,
    pub trigger_type: TriggerType,
    /// Trigger-type-specific filter: `status` for the changed-to/from
    /// variants, `from`/`to` for the transition variant.
    #[serde(default)]
    pub trigger_config: serde_json::Value,
    #[serde(default)]
    pub conditions: Vec<TriggerCondition>,
    pub steps: Vec<ActionStep>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowDefinition {
    pub fn new(name: &str, entity_type: &str, trigger_type: TriggerType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            entity_type: entity_type.to_string(),
            trigger_type,
            trigger_config: serde_json::json!({}),
            conditions: Vec::new(),
            steps: Vec::new(),
            active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_trigger_config(mut self, config: serde_json::Value) -> Self {
        self.trigger_config = config;
        self
    }

    pub fn with_condition(mut self, condition: TriggerCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_steps(mut self, steps: Vec<ActionStep>) -> Self {
        self.steps = steps;
        self
    }
}

pub struct AutomationEngine {
    store: Arc<dyn AutomationStore>,
}

impl AutomationEngine {
    pub fn new(store: Arc<dyn AutomationStore>) -> Self {
        Self { store }
    }

    /// Process one entity mutation: classify it, match it against the
    /// active workflow definitions, and enqueue one execution per match.
    ///
    /// All matching workflows fire independently, including when several
    /// status-trigger variants match the same event. Returns the ids of the
    /// executions enqueued by this call; redelivered events enqueue nothing.
    pub async fn process_event(&self, event: &EntityEvent) -> EngineResult<Vec<Uuid>> {
        let classifications = event.classify();
        if classifications.is_empty() {
            debug!(
                table = %event.table_name,
                "mutation produced no triggers"
            );
            return Ok(Vec::new());
        }

        let workflows = self.store.active_workflows().await?;
        let event_id = event.identity();
        let snapshot = event.after.clone().unwrap_or(serde_json::Value::Null);
        let mut enqueued = Vec::new();

        for classification in &classifications {
            for workflow in &workflows {
                if workflow.entity_type != event.table_name
                    || workflow.trigger_type != classification.trigger_type
                {
                    continue;
                }
                // Active definitions with no steps are malformed; skip them
                if workflow.steps.is_empty() {
                    continue;
                }
                if !matches_trigger_config(workflow, classification) {
                    continue;
                }
                if !all_match(&workflow.conditions, &snapshot) {
                    continue;
                }

                let new = NewExecution {
                    workflow_id: workflow.id,
                    trigger_event_id: event_id,
                    trigger_data: event.trigger_data(classification),
                };
                match self.store.enqueue(new).await? {
                    Some(id) => {
                        info!(
                            workflow = %workflow.name,
                            execution = %id,
                            trigger = workflow.trigger_type.as_str(),
                            "enqueued automation execution"
                        );
                        enqueued.push(id);
                    }
                    None => {
                        debug!(
                            workflow = %workflow.name,
                            event = %event_id,
                            "duplicate trigger delivery ignored"
                        );
                    }
                }
            }
        }

        Ok(enqueued)
    }
}

/// Check the trigger-type-specific filter. A filter value the config does
/// not set matches everything.
fn matches_trigger_config(workflow: &WorkflowDefinition, classification: &Classification) -> bool {
    let config = &workflow.trigger_config;

    match classification.trigger_type {
        TriggerType::StatusChangedTo => {
            config_matches(config.get("status"), classification.new_status.as_deref())
        }
        TriggerType::StatusChangedFrom => {
            config_matches(config.get("status"), classification.old_status.as_deref())
        }
        TriggerType::StatusTransition => {
            config_matches(config.get("from"), classification.old_status.as_deref())
                && config_matches(config.get("to"), classification.new_status.as_deref())
        }
        TriggerType::EntityCreated | TriggerType::EntityUpdated => true,
    }
}

fn config_matches(filter: Option<&serde_json::Value>, actual: Option<&str>) -> bool {
    match filter.and_then(|v| v.as_str()) {
        Some(wanted) => actual == Some(wanted),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automations::store::MemoryAutomationStore;
    use crate::automations::triggers::MutationKind;
    use serde_json::json;

    fn job_event(old_status: &str, new_status: &str) -> EntityEvent {
        let snapshot = |status: &str| {
            json!({
                "id": "7be1d52e-0000-0000-0000-00000000aaaa",
                "client_id": "7be1d52e-0000-0000-0000-00000000bbbb",
                "title": "Gutter cleaning",
                "status": status,
            })
        };
        EntityEvent::new(MutationKind::Update, "jobs")
            .with_before(snapshot(old_status))
            .with_after(snapshot(new_status))
    }

    fn completed_workflow() -> WorkflowDefinition {
        WorkflowDefinition::new("Job completed follow-up", "jobs", TriggerType::StatusChangedTo)
            .with_trigger_config(json!({"status": "completed"}))
            .with_steps(vec![ActionStep::send_sms(
                "{{client.phone}}",
                "Your job {{entity.title}} is complete",
            )])
    }

    async fn engine_with(workflows: Vec<WorkflowDefinition>) -> (AutomationEngine, Arc<MemoryAutomationStore>) {
        let store = Arc::new(MemoryAutomationStore::new());
        for workflow in &workflows {
            store.insert_workflow(workflow).await.unwrap();
        }
        (AutomationEngine::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_matching_event_enqueues_exactly_one_execution() {
        let (engine, store) = engine_with(vec![completed_workflow()]).await;

        let enqueued = engine.process_event(&job_event("scheduled", "completed")).await.unwrap();
        assert_eq!(enqueued.len(), 1);

        let log = store.get_execution(enqueued[0]).await.unwrap().unwrap();
        assert_eq!(log.trigger_data["new_status"], "completed");
        assert_eq!(log.trigger_data["entity_type"], "jobs");
    }

    #[tokio::test]
    async fn test_redelivered_event_does_not_enqueue_twice() {
        let (engine, store) = engine_with(vec![completed_workflow()]).await;
        let event = job_event("scheduled", "completed");

        let first = engine.process_event(&event).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = engine.process_event(&event).await.unwrap();
        assert!(second.is_empty());

        let pending = store
            .list_by_status(crate::automations::ExecutionStatus::Pending, 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_non_matching_status_is_skipped() {
        let (engine, _) = engine_with(vec![completed_workflow()]).await;

        let enqueued = engine.process_event(&job_event("scheduled", "cancelled")).await.unwrap();
        assert!(enqueued.is_empty());
    }

    #[tokio::test]
    async fn test_inactive_workflow_never_fires() {
        let mut workflow = completed_workflow();
        workflow.active = false;
        let (engine, _) = engine_with(vec![workflow]).await;

        let enqueued = engine.process_event(&job_event("scheduled", "completed")).await.unwrap();
        assert!(enqueued.is_empty());
    }

    #[tokio::test]
    async fn test_active_workflow_without_steps_is_skipped() {
        let workflow = WorkflowDefinition::new("broken", "jobs", TriggerType::StatusChangedTo)
            .with_trigger_config(json!({"status": "completed"}));
        let (engine, _) = engine_with(vec![workflow]).await;

        let enqueued = engine.process_event(&job_event("scheduled", "completed")).await.unwrap();
        assert!(enqueued.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_status_variants_all_fire() {
        let to_wf = completed_workflow();
        let from_wf = WorkflowDefinition::new("left scheduled", "jobs", TriggerType::StatusChangedFrom)
            .with_trigger_config(json!({"status": "scheduled"}))
            .with_steps(vec![ActionStep::send_email("ops@fieldhub.app", "Job moved", "moved")]);
        let transition_wf = WorkflowDefinition::new("exact transition", "jobs", TriggerType::StatusTransition)
            .with_trigger_config(json!({"from": "scheduled", "to": "completed"}))
            .with_steps(vec![ActionStep::wait(0)]);

        let (engine, _) = engine_with(vec![to_wf, from_wf, transition_wf]).await;

        let enqueued = engine.process_event(&job_event("scheduled", "completed")).await.unwrap();
        assert_eq!(enqueued.len(), 3, "all matching trigger variants fire independently");
    }

    #[tokio::test]
    async fn test_conditions_gate_the_match() {
        let gated = completed_workflow()
            .with_condition(TriggerCondition::equals("title", json!("Gutter cleaning")));
        let blocked = completed_workflow()
            .with_condition(TriggerCondition::equals("title", json!("Another job")));
        let (engine, _) = engine_with(vec![gated, blocked]).await;

        let enqueued = engine.process_event(&job_event("scheduled", "completed")).await.unwrap();
        assert_eq!(enqueued.len(), 1);
    }

    #[tokio::test]
    async fn test_entity_created_trigger() {
        let workflow = WorkflowDefinition::new("welcome", "clients", TriggerType::EntityCreated)
            .with_steps(vec![ActionStep::send_email(
                "{{entity.email}}",
                "Welcome",
                "Hi {{entity.name}}",
            )]);
        let (engine, _) = engine_with(vec![workflow]).await;

        let event = EntityEvent::new(MutationKind::Insert, "clients")
            .with_after(json!({"id": "x", "name": "Ann", "email": "ann@example.com"}));
        let enqueued = engine.process_event(&event).await.unwrap();
        assert_eq!(enqueued.len(), 1);
    }

    #[tokio::test]
    async fn test_unclassifiable_event_fires_nothing() {
        let (engine, _) = engine_with(vec![completed_workflow()]).await;

        let event = EntityEvent::new(MutationKind::Update, "mystery_table")
            .with_after(json!({"status": "completed"}));
        assert!(engine.process_event(&event).await.unwrap().is_empty());
    }
}
