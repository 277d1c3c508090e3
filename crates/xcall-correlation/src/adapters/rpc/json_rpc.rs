//! JSON-RPC 2.0 and REST transport shared by the network ledger clients.

use crate::domain::{Result, XCallError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// Per-request HTTP timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<JsonRpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Optional detail
    #[serde(default)]
    pub data: Option<Value>,
}

/// Outcome of a call whose error object the caller wants to inspect.
pub enum RpcReply<R> {
    /// Result payload
    Ok(R),
    /// Node-reported error object
    Err(JsonRpcError),
}

/// HTTP client for one chain endpoint.
pub struct JsonRpcClient {
    chain: String,
    http: reqwest::Client,
    url: String,
    request_id: AtomicU64,
}

impl JsonRpcClient {
    /// Client for `url`; errors are labelled with `chain`.
    pub fn new(chain: impl Into<String>, url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            chain: chain.into(),
            http,
            url: url.into().trim_end_matches('/').to_string(),
            request_id: AtomicU64::new(1),
        }
    }

    /// Chain label.
    pub fn chain(&self) -> &str {
        &self.chain
    }

    fn transport(&self, e: impl std::fmt::Display) -> XCallError {
        XCallError::rpc(&self.chain, e)
    }

    /// Call `method`, returning the node's error object instead of failing
    /// on it.
    pub async fn try_call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<RpcReply<R>> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };
        trace!(chain = %self.chain, method, id, "JSON-RPC request");

        let response: JsonRpcResponse = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport(format!("{} send failed: {}", method, e)))?
            .json()
            .await
            .map_err(|e| self.transport(format!("{} response unreadable: {}", method, e)))?;

        if let Some(error) = response.error {
            return Ok(RpcReply::Err(error));
        }
        serde_json::from_value(response.result)
            .map(RpcReply::Ok)
            .map_err(|e| self.transport(format!("{} result malformed: {}", method, e)))
    }

    /// Call `method`; a node error object becomes [`XCallError::Rpc`].
    ///
    /// A `null` result deserializes into `Option<T>` as `None`.
    pub async fn call<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R> {
        match self.try_call(method, params).await? {
            RpcReply::Ok(value) => Ok(value),
            RpcReply::Err(error) => Err(self.transport(format!(
                "{} error {}: {}",
                method, error.code, error.message
            ))),
        }
    }

    /// REST `GET <url><path>`. `404` is `None`.
    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<Option<R>> {
        let response = self
            .http
            .get(format!("{}{}", self.url, path))
            .send()
            .await
            .map_err(|e| self.transport(format!("GET {} failed: {}", path, e)))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.transport(format!("GET {} returned {}", path, response.status())));
        }
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| self.transport(format!("GET {} body malformed: {}", path, e)))
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| XCallError::InvalidValue(format!("hex quantity {:?}: {}", s, e)))
}

/// Parse a quantity that nodes render as either a JSON number or a
/// decimal / hex string.
pub fn parse_quantity(value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| XCallError::InvalidValue(format!("quantity {}", n))),
        Value::String(s) if s.starts_with("0x") => parse_hex_u64(s),
        Value::String(s) => s
            .parse()
            .map_err(|e| XCallError::InvalidValue(format!("quantity {:?}: {}", s, e))),
        other => Err(XCallError::InvalidValue(format!("quantity {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_quantity_forms() {
        assert_eq!(parse_quantity(&json!(12)).unwrap(), 12);
        assert_eq!(parse_quantity(&json!("0x1f")).unwrap(), 31);
        assert_eq!(parse_quantity(&json!("42")).unwrap(), 42);
        assert!(parse_quantity(&json!(null)).is_err());
        assert!(parse_quantity(&json!("0xzz")).is_err());
    }

    #[test]
    fn test_null_result_reads_as_none() {
        let response: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        let parsed: Option<u64> = serde_json::from_value(response.result).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_error_object_is_kept() {
        let response: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-31002,"message":"Pending"}}"#,
        )
        .unwrap();
        assert_eq!(response.error.unwrap().code, -31002);
    }
}
