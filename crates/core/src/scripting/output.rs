//! Interpretation of a plugin's return value.

use serde_json::Value;

/// Message used when a plugin rejects a value without explaining why.
pub const DEFAULT_REJECTION: &str = "Rejected by plugin";

/// What a successful plugin run asks the pipeline to do with the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginVerdict {
    /// Continue with the current value.
    Keep,
    /// Continue with this value instead.
    Replace(String),
    /// Stop the submission with this message.
    Reject(String),
}

/// Map a plugin output onto a verdict.
///
/// * a string replaces the value
/// * a map with `bool: false` rejects, using `env` as the message
/// * any other map with a string `env` replaces the value
/// * a number replaces the value with its text form
/// * `false` rejects; unit, `true` and arrays keep the value
pub fn interpret_output(output: Option<&Value>) -> PluginVerdict {
    let Some(output) = output else {
        return PluginVerdict::Keep;
    };

    match output {
        Value::String(s) => PluginVerdict::Replace(s.clone()),
        Value::Number(n) => PluginVerdict::Replace(n.to_string()),
        Value::Bool(false) => PluginVerdict::Reject(DEFAULT_REJECTION.to_string()),
        Value::Object(map) => {
            let env = map.get("env").and_then(Value::as_str);
            if map.get("bool") == Some(&Value::Bool(false)) {
                let message = env
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or(DEFAULT_REJECTION);
                return PluginVerdict::Reject(message.to_string());
            }
            match env {
                Some(env) => PluginVerdict::Replace(env.to_string()),
                None => PluginVerdict::Keep,
            }
        }
        Value::Null | Value::Bool(true) | Value::Array(_) => PluginVerdict::Keep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_replaces() {
        assert_eq!(
            interpret_output(Some(&json!("new"))),
            PluginVerdict::Replace("new".into())
        );
    }

    #[test]
    fn env_map_replaces() {
        assert_eq!(
            interpret_output(Some(&json!({ "bool": true, "env": "x=1" }))),
            PluginVerdict::Replace("x=1".into())
        );
    }

    #[test]
    fn bool_false_rejects_with_env_as_message() {
        assert_eq!(
            interpret_output(Some(&json!({ "bool": false, "env": "account banned" }))),
            PluginVerdict::Reject("account banned".into())
        );
        assert_eq!(
            interpret_output(Some(&json!({ "bool": false }))),
            PluginVerdict::Reject(DEFAULT_REJECTION.into())
        );
    }

    #[test]
    fn number_replaces_with_its_text() {
        assert_eq!(
            interpret_output(Some(&json!(42))),
            PluginVerdict::Replace("42".into())
        );
    }

    #[test]
    fn bare_false_rejects_with_default_message() {
        assert_eq!(
            interpret_output(Some(&json!(false))),
            PluginVerdict::Reject(DEFAULT_REJECTION.into())
        );
    }

    #[test]
    fn nothing_keeps() {
        assert_eq!(interpret_output(None), PluginVerdict::Keep);
        assert_eq!(interpret_output(Some(&json!({ "note": 1 }))), PluginVerdict::Keep);
        assert_eq!(interpret_output(Some(&json!(true))), PluginVerdict::Keep);
        assert_eq!(interpret_output(Some(&json!([1, 2]))), PluginVerdict::Keep);
    }
}
