use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Serialize;

use crate::{errors::AppError, AppState};

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const CALLER_SCOPES_HEADER: &str = "x-caller-scopes";
pub const CALLER_TIER_HEADER: &str = "x-caller-tier";

/// Identity resolved by the upstream gateway. Opaque to the engine, forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallerContext {
    pub identity: Option<String>,
    pub scopes: Vec<String>,
    pub tier: Option<String>,
}

impl CallerContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let scopes = header(CALLER_SCOPES_HEADER)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|scope| !scope.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            identity: header(CALLER_ID_HEADER),
            scopes,
            tier: header(CALLER_TIER_HEADER),
        }
    }

    pub fn forwarded_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(identity) = &self.identity {
            headers.push((CALLER_ID_HEADER, identity.clone()));
        }
        if !self.scopes.is_empty() {
            headers.push((CALLER_SCOPES_HEADER, self.scopes.join(",")));
        }
        if let Some(tier) = &self.tier {
            headers.push((CALLER_TIER_HEADER, tier.clone()));
        }
        headers
    }
}

pub async fn require_bearer_token(
    State(state): State<AppState>,
    auth_header: Option<TypedHeader<Authorization<Bearer>>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let Some(TypedHeader(auth)) = auth_header else {
        return Err(AppError::unauthorized(
            "missing_token",
            "missing authorization header",
        ));
    };

    if auth.token() != expected {
        return Err(AppError::unauthorized(
            "invalid_token",
            "invalid bearer token",
        ));
    }

    Ok(next.run(request).await)
}

pub async fn resolve_caller_context(mut request: Request, next: Next) -> Response {
    let caller = CallerContext::from_headers(request.headers());
    request.extensions_mut().insert(caller);
    next.run(request).await
}
