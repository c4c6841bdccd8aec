use std::cell::RefCell;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RemoteError;
use crate::remote::{Method, RemoteRequest, RemoteResourceClient, RemoteResponse};

fn default_status() -> u16 {
    200
}

/// One scripted warehouse reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedExchange {
    pub method: Method,
    pub path: String,
    /// Query parameters the request must carry for this reply to match.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub query: Map<String, Value>,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub body: Value,
}

impl RecordedExchange {
    pub fn new(method: Method, path: impl Into<String>, status: u16, body: Value) -> Self {
        Self {
            method,
            path: path.into(),
            query: Map::new(),
            status,
            body,
        }
    }

    pub fn with_query(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.query.insert(key.to_string(), value.into());
        self
    }

    fn matches(&self, request: &RemoteRequest) -> bool {
        self.method == request.method
            && self.path == request.path
            && self.query.iter().all(|(key, expected)| {
                let expected = match expected {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                request.query_value(key) == Some(expected.as_str())
            })
    }
}

/// Warehouse stand-in answering from a script and recording every request.
///
/// Matching replies are served in script order; once all matches for a
/// request have been used the last one keeps answering. Requests without
/// any match get a 404.
#[derive(Debug, Default)]
pub struct RecordedWarehouse {
    exchanges: Vec<RecordedExchange>,
    used: RefCell<Vec<bool>>,
    log: RefCell<Vec<RemoteRequest>>,
}

impl RecordedWarehouse {
    pub fn new(exchanges: Vec<RecordedExchange>) -> Self {
        let used = RefCell::new(vec![false; exchanges.len()]);
        Self {
            exchanges,
            used,
            log: RefCell::new(Vec::new()),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        let exchanges: Vec<RecordedExchange> = serde_json::from_str(raw)?;
        Ok(Self::new(exchanges))
    }

    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.log.borrow().clone()
    }

    pub fn count(&self, method: Method, path_prefix: &str) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|request| request.method == method && request.path.starts_with(path_prefix))
            .count()
    }

    pub fn count_method(&self, method: Method) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|request| request.method == method)
            .count()
    }
}

impl RemoteResourceClient for RecordedWarehouse {
    fn request(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        self.log.borrow_mut().push(request.clone());
        let mut used = self.used.borrow_mut();
        let matching: Vec<usize> = self
            .exchanges
            .iter()
            .enumerate()
            .filter(|(_, exchange)| exchange.matches(request))
            .map(|(index, _)| index)
            .collect();
        let chosen = matching
            .iter()
            .copied()
            .find(|index| !used[*index])
            .or_else(|| matching.last().copied());
        match chosen {
            Some(index) => {
                used[index] = true;
                let exchange = &self.exchanges[index];
                Ok(RemoteResponse::new(exchange.status, exchange.body.clone()))
            }
            None => Ok(RemoteResponse::new(
                404,
                serde_json::json!({"status": "Not Found", "message": "No recorded reply"}),
            )),
        }
    }
}
