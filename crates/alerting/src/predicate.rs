//! Alert predicate - field path + matching value set
//!
//! Values are compared in a normalized text form so `500`, `500.0` and
//! `"500"` are the same value. Non-numeric strings compare verbatim.

use std::collections::HashSet;

use contracts::{AlertEvent, AlertPredicateConfig, AlertValue, Record};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct AlertPredicate {
    field: String,
    path: Vec<String>,
    values: HashSet<String>,
}

impl AlertPredicate {
    pub fn new(field: impl Into<String>, values: &[AlertValue]) -> Self {
        let field = field.into();
        let path = field.split('.').map(str::to_string).collect();
        let values = values.iter().map(normalize_config_value).collect();
        Self {
            field,
            path,
            values,
        }
    }

    pub fn from_config(config: &AlertPredicateConfig) -> Self {
        Self::new(config.field.clone(), &config.values)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Return an alert when the record's field holds one of the values.
    /// Payloads that are not JSON objects, or lack the field, never match.
    pub fn evaluate(&self, record: &Record, source: &str) -> Option<AlertEvent> {
        let root: Value = serde_json::from_slice(&record.payload).ok()?;
        let leaf = self
            .path
            .iter()
            .try_fold(&root, |node, key| node.as_object()?.get(key))?;
        let value = normalize_json(leaf)?;
        self.values
            .contains(&value)
            .then(|| AlertEvent::new(source, record.clone(), self.field.clone(), value))
    }
}

fn normalize_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn normalize_text(s: &str) -> String {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return i.to_string();
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => normalize_number(f),
        _ => s.to_string(),
    }
}

fn normalize_config_value(value: &AlertValue) -> String {
    match value {
        AlertValue::Int(i) => i.to_string(),
        AlertValue::Float(f) => normalize_number(*f),
        AlertValue::Text(s) => normalize_text(s),
        AlertValue::Bool(b) => b.to_string(),
    }
}

fn normalize_json(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(i.to_string()),
            None => n.as_f64().map(normalize_number),
        },
        Value::String(s) => Some(normalize_text(s)),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contracts::SequenceToken;

    fn record(payload: &str) -> Record {
        Record::new(payload.to_string(), Utc::now(), SequenceToken(7))
    }

    fn default_predicate() -> AlertPredicate {
        AlertPredicate::from_config(&AlertPredicateConfig::default())
    }

    #[test]
    fn test_default_matches_5xx_numbers_and_strings() {
        let p = default_predicate();
        for payload in [
            r#"{"status": 500}"#,
            r#"{"status": "502"}"#,
            r#"{"status": 503.0}"#,
            r#"{"status": " 504 "}"#,
        ] {
            assert!(p.evaluate(&record(payload), "src").is_some(), "{payload}");
        }
        for payload in [r#"{"status": 200}"#, r#"{"status": "501"}"#, r#"{"other": 500}"#, "500", "not json"] {
            assert!(p.evaluate(&record(payload), "src").is_none(), "{payload}");
        }
    }

    #[test]
    fn test_event_carries_context() {
        let event = default_predicate()
            .evaluate(&record(r#"{"status": 503}"#), "web")
            .unwrap();
        assert_eq!(event.source, "web");
        assert_eq!(event.field, "status");
        assert_eq!(event.value, "503");
        assert_eq!(event.attempts, 0);
        assert_eq!(event.sequence(), SequenceToken(7));
    }

    #[test]
    fn test_dotted_path() {
        let p = AlertPredicate::new("response.code", &[AlertValue::Text("E42".into())]);
        assert!(p
            .evaluate(&record(r#"{"response": {"code": "E42"}}"#), "s")
            .is_some());
        assert!(p.evaluate(&record(r#"{"response": "E42"}"#), "s").is_none());
    }

    #[test]
    fn test_bool_values() {
        let p = AlertPredicate::new("error", &[AlertValue::Bool(true)]);
        assert!(p.evaluate(&record(r#"{"error": true}"#), "s").is_some());
        assert!(p.evaluate(&record(r#"{"error": false}"#), "s").is_none());
    }
}
