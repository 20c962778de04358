// Trigger Detection - classifying entity mutations into semantic triggers
//
// Mutation events arrive from the platform's change feed as raw
// insert/update/delete payloads with before/after snapshots. Classification
// fails closed: an event without a recognizable tracked table, or without
// the snapshot its mutation kind requires, produces no triggers at all.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entity tables the automation engine watches.
pub const TRACKED_TABLES: &[&str] = &["jobs", "clients", "estimates", "invoices"];

/// The designated status field on tracked entities.
pub const STATUS_FIELD: &str = "status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

/// A raw entity mutation observed on a tracked table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEvent {
    /// Event identity assigned by the ingress, when it has one. Absent ids
    /// get a deterministic identity derived from the mutation itself so a
    /// redelivered event enqueues idempotently.
    #[serde(default)]
    pub event_id: Option<Uuid>,
    pub event_type: MutationKind,
    pub table_name: String,
    #[serde(default)]
    pub before: Option<serde_json::Value>,
    #[serde(default)]
    pub after: Option<serde_json::Value>,
}

/// Semantic classification of an entity mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerType {
    EntityCreated,
    EntityUpdated,
    StatusChangedTo,
    StatusChangedFrom,
    StatusTransition,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityCreated => "entity-created",
            Self::EntityUpdated => "entity-updated",
            Self::StatusChangedTo => "status-changed-to",
            Self::StatusChangedFrom => "status-changed-from",
            Self::StatusTransition => "status-transition",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "entity-created" => Some(Self::EntityCreated),
            "entity-updated" => Some(Self::EntityUpdated),
            "status-changed-to" => Some(Self::StatusChangedTo),
            "status-changed-from" => Some(Self::StatusChangedFrom),
            "status-transition" => Some(Self::StatusTransition),
            _ => None,
        }
    }
}

/// One semantic trigger derived from a mutation, with the status pair when
/// the mutation was a status change.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub trigger_type: TriggerType,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
}

impl Classification {
    fn plain(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            old_status: None,
            new_status: None,
        }
    }
}

impl EntityEvent {
    pub fn new(event_type: MutationKind, table_name: &str) -> Self {
        Self {
            event_id: None,
            event_type,
            table_name: table_name.to_string(),
            before: None,
            after: None,
        }
    }

    pub fn with_before(mut self, before: serde_json::Value) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_after(mut self, after: serde_json::Value) -> Self {
        self.after = Some(after);
        self
    }

    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = Some(event_id);
        self
    }

    fn status_of(snapshot: Option<&serde_json::Value>) -> Option<String> {
        snapshot
            .and_then(|s| s.get(STATUS_FIELD))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// Classify this mutation into zero or more semantic triggers.
    ///
    /// A status-field change yields all three status variants; any other
    /// update yields the generic entity-updated trigger. Deletes have no
    /// trigger type and classify to nothing.
    pub fn classify(&self) -> Vec<Classification> {
        if !TRACKED_TABLES.contains(&self.table_name.as_str()) {
            return Vec::new();
        }

        match self.event_type {
            MutationKind::Insert => {
                if self.after.is_none() {
                    return Vec::new();
                }
                vec![Classification::plain(TriggerType::EntityCreated)]
            }
            MutationKind::Delete => Vec::new(),
            MutationKind::Update => {
                if self.after.is_none() {
                    return Vec::new();
                }
                let old_status = Self::status_of(self.before.as_ref());
                let new_status = Self::status_of(self.after.as_ref());

                match (&old_status, &new_status) {
                    (Some(old), Some(new)) if old != new => {
                        [
                            TriggerType::StatusChangedTo,
                            TriggerType::StatusChangedFrom,
                            TriggerType::StatusTransition,
                        ]
                        .into_iter()
                        .map(|trigger_type| Classification {
                            trigger_type,
                            old_status: old_status.clone(),
                            new_status: new_status.clone(),
                        })
                        .collect()
                    }
                    _ => vec![Classification::plain(TriggerType::EntityUpdated)],
                }
            }
        }
    }

    /// Stable identity for this event, used as half of the idempotent
    /// enqueue key. Falls back to a UUIDv5 over the mutation content when
    /// the ingress did not assign an id.
    pub fn identity(&self) -> Uuid {
        if let Some(id) = self.event_id {
            return id;
        }

        let fingerprint = format!(
            "{}:{}:{:?}:{}:{}",
            self.table_name,
            self.entity_id().unwrap_or_default(),
            self.event_type,
            self.before
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default(),
            self.after
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default(),
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, fingerprint.as_bytes())
    }

    /// Entity id from the freshest snapshot that carries one.
    pub fn entity_id(&self) -> Option<String> {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .and_then(|s| s.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// Normalized context snapshot captured at trigger time.
    pub fn trigger_data(&self, classification: &Classification) -> serde_json::Value {
        serde_json::json!({
            "entity_id": self.entity_id(),
            "entity_type": self.table_name,
            "entity": self.after.clone().unwrap_or(serde_json::Value::Null),
            "old_status": classification.old_status,
            "new_status": classification.new_status,
        })
    }
}
