// Workflow Conditions - trigger match predicates
//
// A workflow's conditions are a conjunctive list evaluated against the
// entity snapshot of the triggering event. A malformed or unknown condition
// is a non-match: the workflow is skipped, never crashed.

use serde::{Deserialize, Serialize};

/// A single condition to evaluate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCondition {
    /// Field to evaluate (supports dot notation for nested fields)
    pub field: String,
    /// Operator for comparison
    pub operator: String,
    /// Value to compare against
    #[serde(default)]
    pub value: serde_json::Value,
}

impl TriggerCondition {
    pub fn new(field: &str, operator: &str, value: serde_json::Value) -> Self {
        Self {
            field: field.to_string(),
            operator: operator.to_string(),
            value,
        }
    }

    pub fn equals(field: &str, value: serde_json::Value) -> Self {
        Self::new(field, "equals", value)
    }

    pub fn not_equals(field: &str, value: serde_json::Value) -> Self {
        Self::new(field, "not_equals", value)
    }

    pub fn contains(field: &str, value: &str) -> Self {
        Self::new(field, "contains", serde_json::Value::String(value.to_string()))
    }

    pub fn is_null(field: &str) -> Self {
        Self::new(field, "is_null", serde_json::Value::Null)
    }

    pub fn is_not_null(field: &str) -> Self {
        Self::new(field, "is_not_null", serde_json::Value::Null)
    }

    /// Evaluate this condition against a payload.
    pub fn matches(&self, payload: &serde_json::Value) -> bool {
        let field_value = lookup_path(payload, &self.field);

        match self.operator.as_str() {
            "equals" | "eq" | "==" => {
                field_value.map(|v| v == &self.value).unwrap_or(false)
            }
            "not_equals" | "ne" | "!=" => {
                field_value.map(|v| v != &self.value).unwrap_or(true)
            }
            "contains" => {
                if let Some(val) = field_value {
                    if let (Some(s), Some(pattern)) = (val.as_str(), self.value.as_str()) {
                        return s.to_lowercase().contains(&pattern.to_lowercase());
                    }
                }
                false
            }
            "is_null" | "is_empty" => {
                field_value.is_none() || field_value == Some(&serde_json::Value::Null)
            }
            "is_not_null" | "is_not_empty" => {
                field_value.is_some() && field_value != Some(&serde_json::Value::Null)
            }
            // Unknown operator: non-match by policy
            _ => false,
        }
    }
}

/// Every condition in the conjunctive list must hold.
pub fn all_match(conditions: &[TriggerCondition], payload: &serde_json::Value) -> bool {
    conditions.iter().all(|c| c.matches(payload))
}

/// Case-sensitive dot-path lookup into a nested JSON value.
pub fn lookup_path<'a>(json: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = json;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}
