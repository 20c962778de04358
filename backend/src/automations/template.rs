// Message template resolution
//
// Substitutes `{{path}}` placeholders with values looked up in the execution
// context by case-sensitive dot path. A placeholder whose path resolves to
// nothing is left as the literal placeholder text; template misses are a
// documented leniency, not an error.

use regex::Regex;

use super::conditions::lookup_path;

const PLACEHOLDER: &str = r"\{\{([^}]+)\}\}";

/// Render a template against a context object.
pub fn render(template: &str, context: &serde_json::Value) -> String {
    let re = Regex::new(PLACEHOLDER).unwrap();

    re.replace_all(template, |caps: &regex::Captures| {
        let path = &caps[1];
        match lookup_path(context, path) {
            Some(value) => value_to_string(value),
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
