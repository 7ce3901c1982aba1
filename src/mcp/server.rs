//! The central Model Context Protocol engine
//!
//! Decodes JSON-RPC messages, registers cancellable requests, negotiates capabilities
//! (`initialize`) and routes every [`McpMethod`] to its handler.
//!
//! Dispatch is split in two. [`begin_json_rpc`] runs synchronously on the transport's read path:
//! it validates the message, answers what can be answered immediately and registers cancellable
//! requests with the session tracker. The returned [`PendingCall`] does the actual work and can
//! be spawned, so a `notifications/cancelled` read right after a request always finds it.

use std::sync::Arc;

use rust_mcp_sdk::schema::{
    Implementation, InitializeResult, JsonrpcMessage, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, ServerCapabilities,
    ServerCapabilitiesPrompts, ServerCapabilitiesResources, ServerCapabilitiesTools,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::CallerContext;
use crate::backend::CallContext;
use crate::domain::{
    prompts::{build_prompts_list, handle_prompts_get},
    resources::{build_resource_templates_list, build_resources_list, handle_resources_read},
    tools::{build_tools_list, handle_tools_call},
};
use crate::mcp::completion::handle_completion_complete;
use crate::mcp::lifecycle::{request_key, ActiveRequestGuard};
use crate::mcp::method::McpMethod;
use crate::mcp::rpc::{
    app_error_to_json_rpc, json_rpc_error, json_rpc_result, request_id_to_value, INVALID_REQUEST,
    METHOD_NOT_FOUND,
};
use crate::mcp::session::Session;
use crate::{errors::AppError, AppState};

pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];
pub const LATEST_PROTOCOL_VERSION: &str = SUPPORTED_PROTOCOL_VERSIONS[0];

/// Everything a handler may touch while serving one request.
#[derive(Clone)]
pub struct RequestContext {
    pub state: AppState,
    pub session: Arc<Session>,
    pub caller: CallerContext,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn call_context(&self) -> CallContext {
        CallContext {
            caller: self.caller.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

pub enum Dispatch {
    /// Answered on the read path; `None` for notifications.
    Complete(Option<Value>),
    Pending(PendingCall),
}

impl Dispatch {
    pub async fn finish(self) -> Option<Value> {
        match self {
            Self::Complete(response) => response,
            Self::Pending(call) => call.run().await,
        }
    }
}

pub struct PendingCall {
    ctx: RequestContext,
    id: Option<Value>,
    method: McpMethod,
    params: Option<Value>,
    guard: Option<ActiveRequestGuard>,
}

impl PendingCall {
    pub fn method(&self) -> McpMethod {
        self.method
    }

    pub async fn run(self) -> Option<Value> {
        let Self {
            ctx,
            id,
            method,
            params,
            guard,
        } = self;
        let audit_params = redact_audit_params(params.as_ref());

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(AppError::Cancelled),
            outcome = dispatch(&ctx, method, params) => outcome,
        };
        drop(guard);

        let outcome_label = match &outcome {
            Ok(_) => "success",
            Err(err) if err.is_cancellation() => "cancelled",
            Err(_) => "failure",
        };
        info!(
            method = %method,
            session = %ctx.session.id(),
            params = %audit_params,
            outcome = outcome_label,
            "mcp action audited"
        );

        let id = id?;
        Some(match outcome {
            Ok(result) => json_rpc_result(Some(id), result),
            Err(err) => app_error_to_json_rpc(Some(id), err),
        })
    }
}

pub fn to_result<T: Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|err| AppError::internal(format!("result serialization failed: {err}")))
}

pub async fn handle_json_rpc_value(
    state: &AppState,
    session: &Arc<Session>,
    caller: &CallerContext,
    payload: Value,
) -> Option<Value> {
    begin_json_rpc(state, session, caller, payload).finish().await
}

pub fn begin_json_rpc(
    state: &AppState,
    session: &Arc<Session>,
    caller: &CallerContext,
    payload: Value,
) -> Dispatch {
    if !payload.is_object() {
        return Dispatch::Complete(Some(json_rpc_error(
            None,
            INVALID_REQUEST,
            "Invalid Request",
        )));
    }

    let request_id = payload.get("id").cloned().filter(|id| !id.is_null());
    if payload.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Dispatch::Complete(Some(json_rpc_error(
            request_id,
            INVALID_REQUEST,
            "Invalid Request",
        )));
    }

    let parsed: JsonrpcMessage = match serde_json::from_value(payload) {
        Ok(message) => message,
        Err(_) => {
            return Dispatch::Complete(Some(json_rpc_error(
                request_id,
                INVALID_REQUEST,
                "Invalid Request",
            )))
        }
    };

    match parsed {
        JsonrpcMessage::Request(request) => {
            let id = request_id_to_value(request.id);
            if request.method.trim().is_empty() {
                return Dispatch::Complete(Some(json_rpc_error(
                    Some(id),
                    INVALID_REQUEST,
                    "Invalid Request",
                )));
            }

            let Some(method) = McpMethod::parse(&request.method) else {
                info!(method = %request.method, outcome = "failure", "mcp action audited");
                return Dispatch::Complete(Some(json_rpc_error(
                    Some(id),
                    METHOD_NOT_FOUND,
                    "Method not found",
                )));
            };

            let params = request.params.map(Value::Object);
            if method == McpMethod::CancelledNotification {
                cancel_in_flight(session, params.as_ref());
            }

            let (cancel, guard) = if method.is_cancellable() {
                let key = request_key(&id).unwrap_or_else(|| id.to_string());
                match session.tracker().register(key) {
                    Ok(guard) => (guard.token().clone(), Some(guard)),
                    Err(err) => {
                        return Dispatch::Complete(Some(app_error_to_json_rpc(Some(id), err)))
                    }
                }
            } else {
                (CancellationToken::new(), None)
            };

            Dispatch::Pending(PendingCall {
                ctx: RequestContext {
                    state: state.clone(),
                    session: Arc::clone(session),
                    caller: caller.clone(),
                    cancel,
                },
                id: Some(id),
                method,
                params,
                guard,
            })
        }
        JsonrpcMessage::Notification(notification) => {
            let Some(method) = McpMethod::parse(notification.method.trim()) else {
                debug!(method = %notification.method, "ignoring unknown notification");
                return Dispatch::Complete(None);
            };

            let params = notification.params.map(Value::Object);
            match method {
                McpMethod::CancelledNotification => {
                    cancel_in_flight(session, params.as_ref());
                    Dispatch::Complete(None)
                }
                McpMethod::InitializedNotification => {
                    info!(session = %session.id(), "client completed initialization handshake");
                    Dispatch::Complete(None)
                }
                other => Dispatch::Pending(PendingCall {
                    ctx: RequestContext {
                        state: state.clone(),
                        session: Arc::clone(session),
                        caller: caller.clone(),
                        cancel: CancellationToken::new(),
                    },
                    id: None,
                    method: other,
                    params,
                    guard: None,
                }),
            }
        }
        JsonrpcMessage::ResultResponse(_) | JsonrpcMessage::ErrorResponse(_) => Dispatch::Complete(
            Some(json_rpc_error(request_id, INVALID_REQUEST, "Invalid Request")),
        ),
    }
}

fn cancel_in_flight(session: &Session, params: Option<&Value>) {
    let request_id = params.and_then(|params| params.get("requestId"));
    let Some(key) = request_id.and_then(request_key) else {
        debug!(session = %session.id(), "cancellation without a usable requestId");
        return;
    };

    let reason = params
        .and_then(|params| params.get("reason"))
        .and_then(Value::as_str)
        .unwrap_or("unspecified");

    if session.tracker().cancel(&key) {
        info!(session = %session.id(), request_id = %key, reason, "request cancelled by client");
    } else {
        debug!(
            session = %session.id(),
            request_id = %key,
            "cancellation for unknown or finished request"
        );
    }
}

async fn dispatch(
    ctx: &RequestContext,
    method: McpMethod,
    params: Option<Value>,
) -> Result<Value, AppError> {
    match method {
        McpMethod::Initialize => {
            let protocol_version = negotiate_protocol_version(params.as_ref())?;
            to_result(&initialize_result(protocol_version))
        }
        McpMethod::Ping => Ok(json!({})),
        McpMethod::ToolsList => to_result(&ListToolsResult {
            meta: None,
            next_cursor: None,
            tools: build_tools_list(),
        }),
        McpMethod::ToolsCall => handle_tools_call(ctx, params).await,
        McpMethod::ResourcesList => to_result(&ListResourcesResult {
            meta: None,
            next_cursor: None,
            resources: build_resources_list(),
        }),
        McpMethod::ResourceTemplatesList => to_result(&ListResourceTemplatesResult {
            meta: None,
            next_cursor: None,
            resource_templates: build_resource_templates_list(),
        }),
        McpMethod::ResourcesRead => handle_resources_read(ctx, params).await,
        McpMethod::PromptsList => to_result(&ListPromptsResult {
            meta: None,
            next_cursor: None,
            prompts: build_prompts_list(),
        }),
        McpMethod::PromptsGet => handle_prompts_get(params),
        // Notification methods sent with an id were already handled on the read path.
        McpMethod::InitializedNotification | McpMethod::CancelledNotification => Ok(json!({})),
        McpMethod::LoggingSetLevel => handle_set_level(ctx, params),
        McpMethod::CompletionComplete => handle_completion_complete(params),
    }
}

fn initialize_result(protocol_version: &str) -> InitializeResult {
    InitializeResult {
        server_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Content Discovery".to_string()),
            description: None,
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(false),
            }),
            resources: Some(ServerCapabilitiesResources {
                subscribe: Some(false),
                list_changed: Some(false),
            }),
            prompts: Some(ServerCapabilitiesPrompts {
                list_changed: Some(false),
            }),
            logging: Some(Map::new()),
            completions: Some(Map::new()),
            ..Default::default()
        },
        protocol_version: protocol_version.to_string(),
        instructions: Some(
            "Search the streaming catalog with search_content, then use check_availability or \
             get_content_details for a specific title."
                .to_string(),
        ),
        meta: None,
    }
}

fn handle_set_level(ctx: &RequestContext, params: Option<Value>) -> Result<Value, AppError> {
    let level = params
        .as_ref()
        .and_then(|params| params.get("level"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let change = ctx.state.logger.set_level(level)?;
    to_result(&change)
}

/// Echoes a supported version; anything else is answered with the latest one we speak.
pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<&'static str, AppError> {
    let offered_version = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| {
            AppError::bad_request(
                "invalid_protocol_version",
                "initialize params.protocolVersion is required",
            )
        })?;

    Ok(SUPPORTED_PROTOCOL_VERSIONS
        .into_iter()
        .find(|supported| *supported == offered_version)
        .unwrap_or(LATEST_PROTOCOL_VERSION))
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}
