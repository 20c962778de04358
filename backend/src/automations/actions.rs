// Workflow Actions - the step pipeline vocabulary
//
// Steps are a closed sum type with one interpreter case each: send an SMS,
// send an email, wait, or branch on a predicate. Each step is owned by
// exactly one workflow definition and never shared.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conditions::TriggerCondition;

/// One unit of work inside a workflow's action pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub id: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
    /// Non-critical steps log their failure and let the pipeline proceed.
    #[serde(default)]
    pub continue_on_error: bool,
}

/// Step variants. Message, subject, and recipient fields are templates
/// resolved against the execution context at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    SendSms {
        to: String,
        message: String,
    },
    SendEmail {
        to: String,
        subject: String,
        body: String,
    },
    Wait {
        seconds: u64,
    },
    Branch {
        predicate: TriggerCondition,
        #[serde(default)]
        when_true: Vec<ActionStep>,
        #[serde(default)]
        when_false: Vec<ActionStep>,
    },
}

impl ActionStep {
    pub fn new(name: &str, kind: StepKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            kind,
            continue_on_error: false,
        }
    }

    pub fn send_sms(to: &str, message: &str) -> Self {
        Self::new(
            "Send SMS",
            StepKind::SendSms {
                to: to.to_string(),
                message: message.to_string(),
            },
        )
    }

    pub fn send_email(to: &str, subject: &str, body: &str) -> Self {
        Self::new(
            "Send Email",
            StepKind::SendEmail {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            },
        )
    }

    pub fn wait(seconds: u64) -> Self {
        Self::new(&format!("Wait {} seconds", seconds), StepKind::Wait { seconds })
    }

    pub fn branch(
        predicate: TriggerCondition,
        when_true: Vec<ActionStep>,
        when_false: Vec<ActionStep>,
    ) -> Self {
        Self::new(
            "Branch",
            StepKind::Branch {
                predicate,
                when_true,
                when_false,
            },
        )
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }
}

/// Outcome of one step within one dispatch pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: Uuid,
    pub name: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
}

impl StepResult {
    pub fn success(step: &ActionStep, detail: serde_json::Value) -> Self {
        Self {
            step_id: step.id,
            name: step.name.clone(),
            status: StepStatus::Success,
            detail: Some(detail),
            error: None,
        }
    }

    pub fn failure(step: &ActionStep, error: &str) -> Self {
        Self {
            step_id: step.id,
            name: step.name.clone(),
            status: StepStatus::Failed,
            detail: None,
            error: Some(error.to_string()),
        }
    }
}
