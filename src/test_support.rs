use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::{
    backend::{BackendProvider, CallContext},
    client::{ClientError, Fetched, Freshness},
    errors::AppError,
    logging::{LogLevel, Logger},
    AppState,
};

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Echo,
    Stale,
    Hang,
    Exhausted,
    Rejected,
}

/// Backend double that answers every call according to a fixed behavior.
pub struct MockBackend {
    behavior: Behavior,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::with_behavior(Behavior::Echo)
    }
}

impl MockBackend {
    fn with_behavior(behavior: Behavior) -> Self {
        Self { behavior }
    }

    pub fn stale() -> Self {
        Self::with_behavior(Behavior::Stale)
    }

    /// Never answers until the call is cancelled.
    pub fn hanging() -> Self {
        Self::with_behavior(Behavior::Hang)
    }

    pub fn exhausted() -> Self {
        Self::with_behavior(Behavior::Exhausted)
    }

    pub fn rejected() -> Self {
        Self::with_behavior(Behavior::Rejected)
    }

    async fn respond(
        &self,
        target: &str,
        data: Value,
        context: &CallContext,
    ) -> Result<Fetched<Value>, AppError> {
        match self.behavior {
            Behavior::Echo => Ok(Fetched::live(data, 1)),
            Behavior::Stale => Ok(Fetched {
                data,
                freshness: Freshness::Stale {
                    cached_at: Utc::now(),
                },
                attempts: 3,
            }),
            Behavior::Hang => {
                context.cancel.cancelled().await;
                Err(AppError::Upstream(ClientError::cancelled(target)))
            }
            Behavior::Exhausted => Err(AppError::Upstream(ClientError::Exhausted {
                target: target.to_string(),
                attempts: 4,
                cause: Box::new(ClientError::Network {
                    target: target.to_string(),
                    message: "connection refused".to_string(),
                }),
                retry_after: Duration::from_secs(30),
            })),
            Behavior::Rejected => Err(AppError::Upstream(ClientError::Rejected {
                target: target.to_string(),
                status: 422,
                body: json!({ "error": "unprocessable" }),
            })),
        }
    }
}

#[async_trait::async_trait]
impl BackendProvider for MockBackend {
    async fn invoke(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        context: &CallContext,
    ) -> Result<Fetched<Value>, AppError> {
        let data = json!({
            "tool": name,
            "arguments": arguments,
            "caller": context.caller.identity,
        });
        self.respond(name, data, context).await
    }

    async fn read(&self, uri: &str, context: &CallContext) -> Result<Fetched<Value>, AppError> {
        self.respond(uri, json!({ "uri": uri, "items": [] }), context)
            .await
    }
}

pub fn test_state(backend: MockBackend) -> AppState {
    AppState::new(None, Logger::new(LogLevel::Info), Arc::new(backend))
}

pub fn test_state_with_token(backend: MockBackend, token: &str) -> AppState {
    AppState::new(
        Some(token.to_string()),
        Logger::new(LogLevel::Info),
        Arc::new(backend),
    )
}
