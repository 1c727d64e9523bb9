//! Serverless request/response envelope.
//!
//! The hosting platform hands every invocation over as a JSON event and
//! expects a JSON envelope back. Only the fields the handler reads are
//! modelled; everything else in the event is ignored.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const CONTENT_TYPE: &str = "Content-Type";
const APPLICATION_JSON: &str = "application/json";

/// One inbound invocation.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    #[serde(default = "default_method")]
    pub http_method: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub query_string_parameters: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<HashMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl InboundEvent {
    #[allow(dead_code)]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            http_method: method.into(),
            query_string_parameters: HashMap::new(),
            body: None,
        }
    }

    #[allow(dead_code)]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_string_parameters.insert(key.into(), value.into());
        self
    }

    #[allow(dead_code)]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query_string_parameters.get(key).map(String::as_str)
    }

    /// Request body, `{}` when the platform sent none.
    pub fn body_or_empty(&self) -> &str {
        self.body.as_deref().unwrap_or("{}")
    }
}

/// Response envelope returned to the hosting platform.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl HttpResponse {
    pub fn new(status_code: u16, headers: BTreeMap<String, String>, body: String) -> Self {
        Self {
            status_code,
            headers,
            body,
            is_base64_encoded: false,
        }
    }

    /// JSON response with `Content-Type: application/json`.
    pub fn json(status_code: u16, value: &serde_json::Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(CONTENT_TYPE.to_string(), APPLICATION_JSON.to_string());
        Self::new(status_code, headers, value.to_string())
    }

    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::json(status_code, &serde_json::json!({ "error": message }))
    }

    #[allow(dead_code)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_defaults() {
        let event: InboundEvent = serde_json::from_str("{}").unwrap();
        assert_eq!(event.http_method, "POST");
        assert!(event.query_string_parameters.is_empty());
        assert_eq!(event.body_or_empty(), "{}");
    }

    #[test]
    fn test_event_null_query_parameters() {
        let event: InboundEvent = serde_json::from_str(
            r#"{"httpMethod":"GET","queryStringParameters":null,"headers":{"Host":"x"},"body":null}"#,
        )
        .unwrap();
        assert_eq!(event.http_method, "GET");
        assert!(event.query_string_parameters.is_empty());
        assert_eq!(event.body, None);
    }

    #[test]
    fn test_event_query_lookup() {
        let event: InboundEvent = serde_json::from_str(
            r#"{"httpMethod":"GET","queryStringParameters":{"stats":"true"}}"#,
        )
        .unwrap();
        assert_eq!(event.query("stats"), Some("true"));
        assert_eq!(event.query("other"), None);
    }

    #[test]
    fn test_response_wire_shape() {
        let response = HttpResponse::error(405, "Method not allowed");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["statusCode"], 405);
        assert_eq!(value["headers"]["Content-Type"], "application/json");
        assert_eq!(value["body"], r#"{"error":"Method not allowed"}"#);
        assert_eq!(value["isBase64Encoded"], false);
    }
}
