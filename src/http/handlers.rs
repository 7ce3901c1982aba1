//! Axum HTTP handlers for the web server
//!
//! Provides the JSON-RPC endpoint, the per-session SSE push channel and general metadata endpoints.

use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Extension, Json,
};
use futures::{future::join_all, stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

use crate::auth::CallerContext;
use crate::errors::AppError;
use crate::mcp::rpc::{json_rpc_error, json_rpc_error_with_data, INVALID_REQUEST, PARSE_ERROR};
use crate::mcp::server::{begin_json_rpc, Dispatch, SUPPORTED_PROTOCOL_VERSIONS};
use crate::mcp::session::{Session, SessionStore, ANONYMOUS_SESSION_ID};
use crate::AppState;

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const MCP_ENDPOINT: &str = "/mcp";
pub const EVENTS_ENDPOINT: &str = "/mcp/events";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub mcp_endpoint: &'static str,
    pub events_endpoint: &'static str,
    pub session_header: &'static str,
    pub protocol_versions: &'static [&'static str],
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub session_id: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.sessions.len(),
    })
}

pub async fn discovery() -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        mcp_endpoint: MCP_ENDPOINT,
        events_endpoint: EVENTS_ENDPOINT,
        session_header: SESSION_HEADER,
        protocol_versions: &SUPPORTED_PROTOCOL_VERSIONS,
    })
}

fn header_session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn is_initialize(payload: &Value) -> bool {
    let is_initialize_message =
        |message: &Value| message.get("method").and_then(Value::as_str) == Some("initialize");

    match payload {
        Value::Array(batch) => batch.iter().any(is_initialize_message),
        message => is_initialize_message(message),
    }
}

fn unknown_session_response(id: &str, payload: &Value) -> Response {
    let request_id = payload.get("id").cloned().filter(|id| !id.is_null());
    (
        StatusCode::NOT_FOUND,
        Json(json_rpc_error_with_data(
            request_id,
            INVALID_REQUEST,
            "Unknown session",
            Some(json!({ "code": "session_not_found", "sessionId": id })),
        )),
    )
        .into_response()
}

fn with_session_header(mut response: Response, session: &Session) -> Response {
    if session.id() == ANONYMOUS_SESSION_ID {
        return response;
    }
    if let Ok(value) = HeaderValue::from_str(session.id()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

pub async fn mcp_endpoint(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return (
                StatusCode::OK,
                Json(json_rpc_error(None, PARSE_ERROR, "Parse error")),
            )
                .into_response()
        }
    };

    let session = match header_session_id(&headers) {
        Some(id) => match state.sessions.get(id) {
            Some(session) => session,
            None => return unknown_session_response(id, &payload),
        },
        None if is_initialize(&payload) => state.sessions.create(),
        // Session-less requests get their own request-id namespace.
        None => Session::ephemeral(),
    };

    let response = if let Some(batch) = payload.as_array() {
        if batch.is_empty() {
            return (
                StatusCode::OK,
                Json(vec![json_rpc_error(None, INVALID_REQUEST, "Invalid Request")]),
            )
                .into_response();
        }

        // Register every element before running any, so cancellations inside the batch resolve.
        let dispatches: Vec<Dispatch> = batch
            .iter()
            .cloned()
            .map(|item| begin_json_rpc(&state, &session, &caller, item))
            .collect();
        let responses: Vec<Value> = join_all(dispatches.into_iter().map(Dispatch::finish))
            .await
            .into_iter()
            .flatten()
            .collect();

        if responses.is_empty() {
            StatusCode::NO_CONTENT.into_response()
        } else {
            (StatusCode::OK, Json(Value::Array(responses))).into_response()
        }
    } else {
        match begin_json_rpc(&state, &session, &caller, payload)
            .finish()
            .await
        {
            Some(response) => (StatusCode::OK, Json(response)).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        }
    };

    with_session_header(response, &session)
}

pub async fn close_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let Some(id) = header_session_id(&headers) else {
        return Err(AppError::bad_request(
            "missing_session",
            "mcp-session-id header is required",
        ));
    };

    if !state.sessions.close(id) {
        return Err(AppError::not_found(
            "session_not_found",
            "unknown session",
            json!({ "sessionId": id }),
        ));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Closes a session when the SSE stream that created it is dropped.
struct SessionGuard {
    sessions: SessionStore,
    id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        debug!(session = %self.id, "event stream dropped");
        self.sessions.close(&self.id);
    }
}

fn notification_events(
    session: &Session,
    guard: Option<SessionGuard>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(session.subscribe()).filter_map(move |message| {
        let _owned = &guard;
        let event = match message {
            Ok(notification) => Some(Ok(Event::default()
                .event("message")
                .data(notification.to_string()))),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "sse client lagged behind");
                None
            }
        };
        futures::future::ready(event)
    })
}

pub async fn events_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> Result<Response, AppError> {
    let requested = header_session_id(&headers)
        .map(str::to_string)
        .or(query.session_id);

    let (session, guard) = match requested {
        Some(id) => match state.sessions.get(&id) {
            Some(session) => (session, None),
            None => {
                return Err(AppError::not_found(
                    "session_not_found",
                    "unknown session",
                    json!({ "sessionId": id }),
                ))
            }
        },
        None => {
            let session = state.sessions.create();
            let guard = SessionGuard {
                sessions: state.sessions.clone(),
                id: session.id().to_string(),
            };
            (session, Some(guard))
        }
    };

    let announcement = Event::default()
        .event("session")
        .data(json!({ "sessionId": session.id() }).to_string());
    let events = stream::once(futures::future::ready(Ok(announcement)))
        .chain(notification_events(&session, guard))
        .take_until(state.shutdown.clone().cancelled_owned());

    let response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    Ok(with_session_header(response, &session))
}
