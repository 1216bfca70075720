//! Query payload shapes carried through intercepted application traffic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Serialized body substituted into an intercepted application request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryPayload {
    /// Query document text.
    pub query: String,
    /// Named query variables.
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl QueryPayload {
    /// Creates a payload from a query document and its variables.
    pub fn new(query: impl Into<String>, variables: Map<String, Value>) -> Self {
        Self {
            query: query.into(),
            variables,
        }
    }

    /// Serializes the payload to the on-wire JSON body.
    pub fn to_body(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Returns `true` when a parsed response body carries a non-empty data payload.
///
/// Application responses and background traffic share the same destination
/// host, so correlation filters on body shape: an object with a `data` member
/// that is neither null nor an empty object/array.
pub fn has_data_payload(body: &Value) -> bool {
    match body.get("data") {
        Some(Value::Null) | None => false,
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_serializes_query_and_variables() {
        let mut variables = Map::new();
        variables.insert("first".to_string(), json!(10));
        let payload = QueryPayload::new("query Jobs { jobs { id } }", variables);

        let body: Value = serde_json::from_str(&payload.to_body().unwrap()).unwrap();
        assert_eq!(body["query"], "query Jobs { jobs { id } }");
        assert_eq!(body["variables"]["first"], 10);
    }

    #[test]
    fn data_payload_filter_accepts_populated_objects() {
        assert!(has_data_payload(&json!({"data": {"jobs": []}})));
        assert!(has_data_payload(&json!({"data": [1, 2]})));
    }

    #[test]
    fn data_payload_filter_rejects_empty_and_missing_data() {
        assert!(!has_data_payload(&json!({"data": null})));
        assert!(!has_data_payload(&json!({"data": {}})));
        assert!(!has_data_payload(&json!({"data": []})));
        assert!(!has_data_payload(&json!({"errors": [{"message": "denied"}]})));
        assert!(!has_data_payload(&json!("not an object")));
    }
}
