//! JSON-RPC 2.0 envelope and the error code table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// An inbound request frame. `params` defaults to `null` when absent
/// so handlers can always treat it as a `Value`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

impl RpcRequest {
    /// Envelope validation: `jsonrpc == "2.0"` and a non-empty `method`.
    pub fn is_valid_envelope(&self) -> bool {
        self.jsonrpc == "2.0" && !self.method.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC reserved parse-error code; used before a request can even
/// be deserialized into [`RpcRequest`], so it carries no `id`.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const AUTHENTICATION_REQUIRED: i64 = -32001;
pub const RATE_LIMIT_EXCEEDED: i64 = -32002;
pub const INSUFFICIENT_PERMISSIONS: i64 = -32003;
pub const CAMERA_NOT_FOUND: i64 = -32004;
pub const RECORDING_IN_PROGRESS: i64 = -32005;
pub const MEDIAMTX_UNAVAILABLE: i64 = -32006;
pub const INSUFFICIENT_STORAGE: i64 = -32007;
pub const CAPABILITY_NOT_SUPPORTED: i64 = -32008;

impl RpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    pub fn error_with_data(id: Option<Value>, code: i64, message: impl Into<String>, data: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: Some(data),
            }),
            id,
        }
    }

    /// Maps an [`AppError`] to its numeric code, carrying a
    /// correlation id in `error.data`.
    pub fn from_app_error(id: Option<Value>, correlation_id: &str, err: &AppError) -> Self {
        Self::error_with_data(
            id,
            err.rpc_code(),
            err.to_string(),
            serde_json::json!({ "correlation_id": correlation_id }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_envelope_requires_version_and_method() {
        let req = RpcRequest {
            jsonrpc: "2.0".to_string(),
            method: "ping".to_string(),
            params: Value::Null,
            id: Some(Value::from(1)),
        };
        assert!(req.is_valid_envelope());

        let bad_version = RpcRequest {
            jsonrpc: "1.0".to_string(),
            ..req.clone()
        };
        assert!(!bad_version.is_valid_envelope());

        let empty_method = RpcRequest {
            method: String::new(),
            ..req
        };
        assert!(!empty_method.is_valid_envelope());
    }

    #[test]
    fn response_carries_exactly_one_of_result_or_error() {
        let ok = RpcResponse::success(Some(Value::from(1)), serde_json::json!("pong"));
        assert!(ok.result.is_some() && ok.error.is_none());

        let err = RpcResponse::error(Some(Value::from(1)), METHOD_NOT_FOUND, "unknown method");
        assert!(err.result.is_none() && err.error.is_some());
    }

    #[test]
    fn response_serializes_with_snake_case_jsonrpc_envelope() {
        let ok = RpcResponse::success(Some(Value::from(7)), serde_json::json!("pong"));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["result"], "pong");
        assert!(json.get("error").is_none());
    }
}
