//! Parameter extraction out of a job's `variables` map (job runtime step 2,
//! §4.6): a handler declares the parameters it wants by name; unknown keys
//! are ignored and missing ones fall back to a caller-supplied default.

use relay_core::Variables;
use serde_json::Value;

pub fn str_param(vars: &Variables, key: &str, default: &str) -> String {
    vars.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| default.to_string())
}

/// A required string parameter; absence is a caller bug, not a runtime
/// condition, so this panics in the same spirit as `Job` field access.
pub fn require_str(vars: &Variables, key: &str) -> relay_core::Result<String> {
    vars.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| relay_core::RelayError::Validation(format!("missing required variable {key:?}")))
}

pub fn i64_param(vars: &Variables, key: &str, default: i64) -> i64 {
    vars.get(key).and_then(Value::as_i64).unwrap_or(default)
}

pub fn bool_param(vars: &Variables, key: &str, default: bool) -> bool {
    vars.get(key).and_then(Value::as_bool).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn falls_back_to_default_on_missing_key() {
        let vars = Variables::new();
        assert_eq!(str_param(&vars, "branch", "main"), "main");
    }

    #[test]
    fn reads_declared_key_and_ignores_others() {
        let mut vars = Variables::new();
        vars.insert("branch".into(), json!("staging"));
        vars.insert("unused".into(), json!("noise"));
        assert_eq!(str_param(&vars, "branch", "main"), "staging");
    }

    #[test]
    fn require_str_errors_when_absent() {
        let vars = Variables::new();
        assert!(require_str(&vars, "pr_url").is_err());
    }
}
