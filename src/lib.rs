use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;

pub mod auth;
pub mod backend;
pub mod client;
pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod transport;

#[cfg(test)]
mod test_support;

use backend::BackendProvider;
use logging::Logger;
use mcp::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub api_token: Option<Arc<str>>,
    pub logger: Logger,
    pub backend: Arc<dyn BackendProvider>,
    pub sessions: SessionStore,
    /// Fired on process shutdown; ends open event streams.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        api_token: Option<String>,
        logger: Logger,
        backend: Arc<dyn BackendProvider>,
    ) -> Self {
        Self {
            api_token: api_token.map(Arc::<str>::from),
            logger,
            backend,
            sessions: SessionStore::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            http::handlers::MCP_ENDPOINT,
            post(http::handlers::mcp_endpoint).delete(http::handlers::close_session),
        )
        .route(
            http::handlers::EVENTS_ENDPOINT,
            get(http::handlers::events_endpoint),
        )
        .route_layer(middleware::from_fn(auth::resolve_caller_context))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer_token,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .merge(protected)
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{header, Request, Response, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::http::handlers::SESSION_HEADER;
    use crate::test_support::{test_state, test_state_with_token, MockBackend};

    use super::*;

    const TOKEN: &str = "token-1234567890ab";

    fn app() -> Router {
        build_app(test_state(MockBackend::default()))
    }

    fn mcp_request(body: &str) -> Request<Body> {
        Request::builder()
            .uri("/mcp")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request build")
    }

    async fn json_body(response: Response<Body>) -> Value {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&body).expect("valid json response")
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "status": "ok", "sessions": 0 })
        );
    }

    #[tokio::test]
    async fn discovery_is_public() {
        let response = build_app(test_state_with_token(MockBackend::default(), TOKEN))
            .oneshot(
                Request::builder()
                    .uri("/.well-known/mcp")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body_json = json_body(response).await;
        assert_eq!(body_json["mcp_endpoint"], "/mcp");
        assert_eq!(body_json["events_endpoint"], "/mcp/events");
        assert_eq!(body_json["protocol_versions"][0], "2025-06-18");
    }

    #[tokio::test]
    async fn root_get_is_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mcp_requires_token_when_configured() {
        let app = build_app(test_state_with_token(MockBackend::default(), TOKEN));
        let ping = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;

        let response = app
            .clone()
            .oneshot(mcp_request(ping))
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut request = mcp_request(ping);
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {TOKEN}").parse().expect("header value"),
        );
        let response = app.oneshot(request).await.expect("request execution");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn mcp_unknown_method_returns_method_not_found() {
        let response = app()
            .oneshot(mcp_request(r#"{"jsonrpc":"2.0","id":1,"method":"unknown"}"#))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32601, "message": "Method not found" }
            })
        );
    }

    #[tokio::test]
    async fn mcp_parse_error_returns_parse_error() {
        let response = app()
            .oneshot(mcp_request("{\"jsonrpc\":"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn mcp_echoes_fractional_request_ids() {
        let response = app()
            .oneshot(mcp_request(r#"{"jsonrpc":"2.0","id":1.5,"method":"unknown"}"#))
            .await
            .expect("request execution");

        let body_json = json_body(response).await;
        assert_eq!(body_json["id"], 1.5);
        assert_eq!(body_json["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn mcp_initialize_opens_session() {
        let state = test_state(MockBackend::default());
        let response = build_app(state.clone())
            .oneshot(mcp_request(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","clientInfo":{"name":"test-client","version":"1.0.0"},"capabilities":{}}}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .expect("session header");
        assert!(state.sessions.get(&session_id).is_some());

        let body_json = json_body(response).await;
        assert_eq!(body_json["id"], 1);
        assert_eq!(body_json["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(
            body_json["result"]["serverInfo"]["name"],
            env!("CARGO_PKG_NAME")
        );
        for capability in ["tools", "resources", "prompts", "logging", "completions"] {
            assert!(
                body_json["result"]["capabilities"][capability].is_object(),
                "missing capability {capability}"
            );
        }
    }

    #[tokio::test]
    async fn mcp_session_header_routes_to_session_and_can_be_closed() {
        let state = test_state(MockBackend::default());
        let app = build_app(state.clone());
        let session = state.sessions.create();

        let mut request = mcp_request(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#);
        request.headers_mut().insert(
            SESSION_HEADER,
            session.id().parse().expect("header value"),
        );
        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|value| value.to_str().ok()),
            Some(session.id())
        );
        let body_json = json_body(response).await;
        assert_eq!(body_json["result"]["tools"][0]["name"], "search_content");

        let close = || {
            Request::builder()
                .uri("/mcp")
                .method("DELETE")
                .header(SESSION_HEADER, session.id())
                .body(Body::empty())
                .expect("request build")
        };
        let response = app
            .clone()
            .oneshot(close())
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.sessions.is_empty());

        let response = app.oneshot(close()).await.expect("request execution");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mcp_unknown_session_is_not_found() {
        let mut request = mcp_request(r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#);
        request
            .headers_mut()
            .insert(SESSION_HEADER, "no-such-session".parse().expect("header value"));

        let response = app().oneshot(request).await.expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body_json = json_body(response).await;
        assert_eq!(body_json["id"], 3);
        assert_eq!(body_json["error"]["code"], -32600);
        assert_eq!(body_json["error"]["data"]["code"], "session_not_found");
    }

    #[tokio::test]
    async fn sessionless_callers_do_not_share_request_ids() {
        let app = build_app(test_state(MockBackend::hanging()));
        let call = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"search_content","arguments":{"query":"dune"}}}"#;

        let mut first = tokio::spawn(app.clone().oneshot(mcp_request(call)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let response = app
            .clone()
            .oneshot(mcp_request(
                r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":1}}"#,
            ))
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let mut second = tokio::spawn(app.oneshot(mcp_request(call)));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut second)
                .await
                .is_err(),
            "same id from another caller must not be rejected as a duplicate"
        );
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut first)
                .await
                .is_err(),
            "another caller's cancellation must not reach this call"
        );

        first.abort();
        second.abort();
    }

    #[tokio::test]
    async fn mcp_tools_call_forwards_caller_context() {
        let request = Request::builder()
            .uri("/mcp")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-caller-id", "user-7")
            .body(Body::from(
                r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"search_content","arguments":{"query":"dune"}}}"#,
            ))
            .expect("request build");

        let response = app().oneshot(request).await.expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body_json = json_body(response).await;
        assert_eq!(body_json["id"], 4);
        assert_eq!(body_json["result"]["structuredContent"]["caller"], "user-7");
        assert_eq!(
            body_json["result"]["structuredContent"]["tool"],
            "search_content"
        );
        assert!(body_json["result"]["content"].is_array());
    }

    #[tokio::test]
    async fn mcp_tools_call_passes_domain_rejection_through() {
        let response = build_app(test_state(MockBackend::rejected()))
            .oneshot(mcp_request(
                r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"get_content_details","arguments":{"content_id":"tt-1"}}}"#,
            ))
            .await
            .expect("request execution");

        let body_json = json_body(response).await;
        assert_eq!(body_json["error"]["code"], -32005);
        assert_eq!(body_json["error"]["data"], json!({ "error": "unprocessable" }));
    }

    #[tokio::test]
    async fn mcp_resources_read_serves_local_vocabulary() {
        let response = app()
            .oneshot(mcp_request(
                r#"{"jsonrpc":"2.0","id":6,"method":"resources/read","params":{"uri":"catalog://genres"}}"#,
            ))
            .await
            .expect("request execution");

        let body_json = json_body(response).await;
        let text = body_json["result"]["contents"][0]["text"]
            .as_str()
            .expect("text content");
        let content_json: Value = serde_json::from_str(text).expect("valid json content");
        assert!(content_json["values"]
            .as_array()
            .expect("values")
            .contains(&json!("action")));
    }

    #[tokio::test]
    async fn mcp_stale_resource_reports_freshness() {
        let response = build_app(test_state(MockBackend::stale()))
            .oneshot(mcp_request(
                r#"{"jsonrpc":"2.0","id":7,"method":"resources/read","params":{"uri":"catalog://trending/gb"}}"#,
            ))
            .await
            .expect("request execution");

        let body_json = json_body(response).await;
        assert_eq!(
            body_json["result"]["contents"][0]["uri"],
            "catalog://trending/GB"
        );
        assert_eq!(body_json["result"]["_meta"]["stale"], true);
        assert!(body_json["result"]["_meta"]["cachedAt"].is_string());
    }

    #[tokio::test]
    async fn mcp_notification_returns_no_content() {
        let response = app()
            .oneshot(mcp_request(
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn mcp_batch_returns_responses_for_requests_only() {
        let response = app()
            .oneshot(mcp_request(
                r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"notifications/initialized"},{"jsonrpc":"2.0","id":2,"method":"prompts/list"}]"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body_json = json_body(response).await;
        let responses = body_json.as_array().expect("batch response");
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(
            responses[1]["result"]["prompts"][0]["name"],
            "content_search"
        );
    }

    #[tokio::test]
    async fn mcp_batch_notifications_return_no_content() {
        let response = app()
            .oneshot(mcp_request(
                r#"[{"jsonrpc":"2.0","method":"notifications/initialized"},{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":"x"}}]"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn mcp_empty_batch_is_invalid_request() {
        let response = app()
            .oneshot(mcp_request("[]"))
            .await
            .expect("request execution");

        let body_json = json_body(response).await;
        assert_eq!(body_json[0]["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn events_stream_announces_session_and_closes_it_when_dropped() {
        let state = test_state(MockBackend::default());
        let response = build_app(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/mcp/events")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some("text/event-stream")
        );
        assert_eq!(state.sessions.len(), 1);

        let mut body = response.into_body();
        let frame = body
            .frame()
            .await
            .expect("first frame")
            .expect("frame ok")
            .into_data()
            .expect("data frame");
        let text = String::from_utf8(frame.to_vec()).expect("utf8 frame");
        assert!(text.starts_with("event: session\n"));
        assert!(text.contains("sessionId"));

        drop(body);
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn events_stream_ends_on_shutdown() {
        let state = test_state(MockBackend::default());
        let response = build_app(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/mcp/events")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        let mut body = response.into_body();
        body.frame()
            .await
            .expect("announcement frame")
            .expect("frame ok");

        state.shutdown.cancel();
        let next = tokio::time::timeout(Duration::from_secs(1), body.frame())
            .await
            .expect("stream ends promptly");
        assert!(next.is_none());

        drop(body);
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn events_for_unknown_session_are_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/mcp/events?session_id=missing")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
