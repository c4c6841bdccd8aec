use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        })
    }
}

/// One call against the warehouse REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub method: Method,
    /// Resource path relative to the REST root, or an absolute `href`
    /// returned by an earlier response.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<(String, String)>,
}

impl RemoteRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
            query: Vec::new(),
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
            query: Vec::new(),
        }
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            body: Some(body),
            query: Vec::new(),
        }
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Status code plus the decoded `response` part of a warehouse reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    pub status: u16,
    #[serde(default)]
    pub body: Value,
}

impl RemoteResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Splits the reply into the body or a typed error.
    pub fn into_result(self, path: &str) -> Result<Value, RemoteError> {
        if self.is_success() {
            return Ok(self.body);
        }
        if self.status == 404 {
            return Err(RemoteError::NotFound {
                path: path.to_string(),
            });
        }
        let code = self
            .body
            .get("status")
            .map(display_value)
            .unwrap_or_else(|| format!("HTTP {}", self.status));
        let message = self
            .body
            .get("message")
            .or_else(|| self.body.get("errorMessage"))
            .map(display_value)
            .unwrap_or_default();
        Err(RemoteError::Status {
            status: self.status,
            code,
            message,
        })
    }
}

/// Contract for the HTTP transport that reaches the warehouse.
///
/// Implementations return `Ok` for any reply that arrived, whatever its
/// status, and `Err(RemoteError::Transport)` when nothing arrived at all.
pub trait RemoteResourceClient {
    fn request(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError>;

    /// Sends a request and keeps only successful bodies.
    fn send(&self, request: &RemoteRequest) -> Result<Value, RemoteError> {
        self.request(request)?.into_result(&request.path)
    }
}

impl<T: RemoteResourceClient + ?Sized> RemoteResourceClient for &T {
    fn request(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        (**self).request(request)
    }
}

/// Rows of a collection or report reply.
///
/// Accepts a bare array or `{"data": [...]}`; rows wrapped as
/// `{"values": {...}}` are unwrapped.
pub fn rows(body: &Value) -> Vec<&Map<String, Value>> {
    let items: &[Value] = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };
    items.iter().filter_map(row_values).collect()
}

/// The `values` of a single resource reply, or the object itself.
pub fn row_values(item: &Value) -> Option<&Map<String, Value>> {
    let map = item.as_object()?;
    match map.get("values") {
        Some(Value::Object(values)) => Some(values),
        _ => Some(map),
    }
}

pub fn id_field(values: &Map<String, Value>, key: &str) -> Option<i64> {
    values.get(key).and_then(crate::spec::page::value_i64)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_reply_carries_status_and_message() {
        let reply = RemoteResponse::new(
            400,
            json!({"status": "Bad Request", "message": "caption required"}),
        );
        let err = reply.into_result("sample_attributes").unwrap_err();
        assert_eq!(
            err,
            RemoteError::Status {
                status: 400,
                code: "Bad Request".into(),
                message: "caption required".into(),
            }
        );
    }

    #[test]
    fn not_found_is_typed() {
        let err = RemoteResponse::new(404, Value::Null)
            .into_result("surveys")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn rows_unwrap_values_and_data() {
        let wrapped = json!([{ "values": { "id": 1 } }, { "values": { "id": 2 } }]);
        assert_eq!(rows(&wrapped).len(), 2);
        assert_eq!(id_field(rows(&wrapped)[1], "id"), Some(2));

        let report = json!({ "data": [{ "path": "a", "group_title": "G" }] });
        assert_eq!(rows(&report)[0]["path"], "a");
        assert!(rows(&json!({"message": "x"})).is_empty());
    }
}
