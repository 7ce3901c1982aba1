//! JSON-RPC protocol representations and formatting utilities
//!
//! Provides standardized mapping of internal AppErrors to valid JSON-RPC payloads.

use rust_mcp_sdk::schema::{
    JsonrpcErrorResponse, JsonrpcResultResponse, RequestId, Result as McpResult, RpcError,
};
use serde_json::{json, Value};

use crate::{client::ClientError, errors::AppError};

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const UNAUTHORIZED: i32 = -32001;
pub const RESOURCE_NOT_FOUND: i32 = -32002;
pub const UPSTREAM_UNAVAILABLE: i32 = -32003;
pub const UPSTREAM_TIMEOUT: i32 = -32004;
pub const UPSTREAM_REJECTED: i32 = -32005;
pub const REQUEST_CANCELLED: i32 = -32800;

pub fn app_error_to_json_rpc(id: Option<Value>, err: AppError) -> Value {
    match err {
        AppError::BadRequest {
            code,
            message,
            details,
        } => json_rpc_error_with_data(
            id,
            INVALID_PARAMS,
            "Invalid params",
            Some(json!({
                "code": code,
                "message": message,
                "details": details
            })),
        ),
        AppError::InvalidRequest { code, message } => json_rpc_error_with_data(
            id,
            INVALID_REQUEST,
            "Invalid Request",
            Some(json!({
                "code": code,
                "message": message,
                "details": {}
            })),
        ),
        AppError::NotFound {
            code,
            message,
            details,
        } => json_rpc_error_with_data(
            id,
            RESOURCE_NOT_FOUND,
            "Resource not found",
            Some(json!({
                "code": code,
                "message": message,
                "details": details
            })),
        ),
        AppError::Unauthorized { code, message } => json_rpc_error_with_data(
            id,
            UNAUTHORIZED,
            "Unauthorized",
            Some(json!({
                "code": code,
                "message": message,
                "details": {}
            })),
        ),
        AppError::Cancelled => json_rpc_error(id, REQUEST_CANCELLED, "Request cancelled"),
        AppError::Upstream(err) => client_error_to_json_rpc(id, err),
        AppError::Internal { message, .. } => {
            tracing::error!(error = %message, "request failed with internal error");
            json_rpc_error(id, INTERNAL_ERROR, "Internal error")
        }
    }
}

fn client_error_to_json_rpc(id: Option<Value>, err: ClientError) -> Value {
    let retry_after_ms = err
        .retry_after()
        .map(|delay| u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));

    match err {
        ClientError::Cancelled { .. } => {
            json_rpc_error(id, REQUEST_CANCELLED, "Request cancelled")
        }
        ClientError::Rejected { status, body, .. } => json_rpc_error_with_data(
            id,
            UPSTREAM_REJECTED,
            &format!("Upstream rejected request with status {status}"),
            Some(body),
        ),
        ClientError::Timeout { ref target, .. } => json_rpc_error_with_data(
            id,
            UPSTREAM_TIMEOUT,
            "Upstream timeout",
            Some(json!({
                "target": target,
                "attempts": 1,
                "retryAfterMs": retry_after_ms
            })),
        ),
        ClientError::Exhausted {
            ref target,
            attempts,
            ref cause,
            ..
        } => {
            let (code, message) = if cause.is_timeout() {
                (UPSTREAM_TIMEOUT, "Upstream timeout")
            } else {
                (UPSTREAM_UNAVAILABLE, "Upstream unavailable")
            };
            json_rpc_error_with_data(
                id,
                code,
                message,
                Some(json!({
                    "target": target,
                    "attempts": attempts,
                    "retryAfterMs": retry_after_ms,
                    "cause": cause.to_string()
                })),
            )
        }
        ClientError::Network { ref target, .. }
        | ClientError::Status { ref target, .. }
        | ClientError::Decode { ref target, .. } => json_rpc_error_with_data(
            id,
            UPSTREAM_UNAVAILABLE,
            "Upstream unavailable",
            Some(json!({
                "target": target,
                "attempts": 1,
                "cause": err.to_string()
            })),
        ),
    }
}

pub fn json_rpc_error(id: Option<Value>, code: i32, message: &str) -> Value {
    json_rpc_error_with_data(id, code, message, None)
}

pub fn json_rpc_error_with_data(
    id: Option<Value>,
    code: i32,
    message: &str,
    data: Option<Value>,
) -> Value {
    let raw = || {
        let mut error = json!({ "code": code, "message": message });
        if let Some(data) = &data {
            error["data"] = data.clone();
        }
        json!({ "jsonrpc": "2.0", "id": id, "error": error })
    };

    // Ids outside string/i64 (fractions, u64 beyond i64::MAX) are echoed verbatim.
    let request_id = match id.as_ref().map(value_to_request_id) {
        Some(None) => return raw(),
        Some(request_id) => request_id,
        None => None,
    };

    let response = JsonrpcErrorResponse::new(
        RpcError {
            code: i64::from(code),
            data: data.clone(),
            message: message.to_string(),
        },
        request_id,
    );

    serde_json::to_value(response).unwrap_or_else(|_| raw())
}

pub fn json_rpc_result(id: Option<Value>, result: Value) -> Value {
    if let Some(request_id) = id.as_ref().and_then(value_to_request_id) {
        let extra = result.as_object().cloned();
        let response = JsonrpcResultResponse::new(request_id, McpResult { meta: None, extra });
        if let Ok(value) = serde_json::to_value(response) {
            return value;
        }
    }

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn value_to_request_id(value: &Value) -> Option<RequestId> {
    if let Some(string_id) = value.as_str() {
        return Some(RequestId::String(string_id.to_string()));
    }

    value.as_i64().map(RequestId::Integer)
}

pub fn request_id_to_value(id: RequestId) -> Value {
    match id {
        RequestId::String(value) => Value::String(value),
        RequestId::Integer(value) => Value::Number(value.into()),
    }
}
