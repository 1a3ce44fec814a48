//! S1 JSON contract validation: every key in `expected` must be present in
//! `actual` with a compatible type. Grounded in the original
//! `JSONContractValidator`.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ContractOutcome {
    Pass,
    /// `quality_fail`: missing required keys and/or type mismatches.
    QualityFail { reasons: Vec<String> },
    /// Either side failed to parse as JSON.
    BadJson,
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Numbers are interchangeable (int/float); booleans must match exactly
/// (integer 0/1 is not accepted as a bool); other types must match by kind.
fn types_compatible(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(_), Value::Number(_)) => true,
        (Value::Bool(_), Value::Bool(_)) => true,
        (Value::Bool(_), _) | (_, Value::Bool(_)) => false,
        _ => type_name(expected) == type_name(actual),
    }
}

/// Validate `actual` against the contract implied by `expected`'s top-level
/// keys. Extra keys in `actual` are allowed. Either side not a JSON object
/// (already-parsed) is treated as the caller's concern — this function
/// assumes both sides parsed successfully; parse failures are reported by
/// the caller as `BadJson` before reaching here.
pub fn validate(expected: &Value, actual: &Value) -> ContractOutcome {
    let (Some(expected_obj), Some(actual_obj)) = (expected.as_object(), actual.as_object()) else {
        return ContractOutcome::BadJson;
    };

    let mut missing = Vec::new();
    let mut mismatches = Vec::new();

    for (key, expected_value) in expected_obj {
        match actual_obj.get(key) {
            None => missing.push(key.clone()),
            Some(actual_value) => {
                if !types_compatible(expected_value, actual_value) {
                    mismatches.push(format!(
                        "{key}: expected {}, got {}",
                        type_name(expected_value),
                        type_name(actual_value)
                    ));
                }
            }
        }
    }

    if missing.is_empty() && mismatches.is_empty() {
        return ContractOutcome::Pass;
    }

    let mut reasons = Vec::new();
    if !missing.is_empty() {
        reasons.push(format!("Missing required keys: {}", missing.join(", ")));
    }
    if !mismatches.is_empty() {
        reasons.push(format!("Type mismatches: {}", mismatches.join(", ")));
    }
    ContractOutcome::QualityFail { reasons }
}

/// Parse `text` as JSON, returning `BadJson` on failure, then validate.
pub fn validate_text(expected: &Value, actual_text: &str) -> ContractOutcome {
    match serde_json::from_str::<Value>(actual_text) {
        Ok(actual) => validate(expected, &actual),
        Err(_) => ContractOutcome::BadJson,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_match_passes() {
        let expected = json!({"a": 1, "b": "x"});
        let actual = json!({"a": 1, "b": "x"});
        assert_eq!(validate(&expected, &actual), ContractOutcome::Pass);
    }

    #[test]
    fn extra_keys_are_allowed() {
        let expected = json!({"a": 1});
        let actual = json!({"a": 1, "b": "extra"});
        assert_eq!(validate(&expected, &actual), ContractOutcome::Pass);
    }

    #[test]
    fn missing_key_is_quality_fail() {
        let expected = json!({"a": 1, "b": 2});
        let actual = json!({"a": 1});
        match validate(&expected, &actual) {
            ContractOutcome::QualityFail { reasons } => {
                assert!(reasons[0].contains("Missing required keys: b"));
            }
            other => panic!("expected QualityFail, got {other:?}"),
        }
    }

    #[test]
    fn numbers_are_interchangeable() {
        let expected = json!({"a": 1});
        let actual = json!({"a": 1.5});
        assert_eq!(validate(&expected, &actual), ContractOutcome::Pass);
    }

    #[test]
    fn boolean_does_not_accept_integer_zero_or_one() {
        let expected = json!({"a": true});
        let actual = json!({"a": 1});
        match validate(&expected, &actual) {
            ContractOutcome::QualityFail { reasons } => {
                assert!(reasons[0].contains("Type mismatches"));
            }
            other => panic!("expected QualityFail, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_actual_text_is_bad_json() {
        let expected = json!({"a": 1});
        assert_eq!(validate_text(&expected, "not json"), ContractOutcome::BadJson);
    }

    #[test]
    fn validation_is_idempotent() {
        let expected = json!({"a": 1, "b": 2});
        let actual = json!({"a": 1});
        assert_eq!(validate(&expected, &actual), validate(&expected, &actual));
    }
}
