use async_trait::async_trait;
use reqwest::Url;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::CallerContext,
    client::{CallOptions, Fetched, ResilientClient},
    errors::AppError,
};

pub const TRENDING_URI_PREFIX: &str = "catalog://trending/";

/// Per-call inputs handed to the backend alongside the operation arguments.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub caller: CallerContext,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait BackendProvider: Send + Sync {
    async fn invoke(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        context: &CallContext,
    ) -> Result<Fetched<Value>, AppError>;

    async fn read(&self, uri: &str, context: &CallContext) -> Result<Fetched<Value>, AppError>;
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: Url,
    client: ResilientClient,
}

impl HttpBackend {
    pub fn new(base_url: Url, client: ResilientClient) -> Self {
        Self { base_url, client }
    }

    fn endpoint(&self, segments: &[&str], query: &[(String, String)]) -> Result<Url, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::internal("backend base url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);

        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        Ok(url)
    }

    fn options(context: &CallContext) -> CallOptions {
        context.caller.forwarded_headers().into_iter().fold(
            CallOptions::new(context.cancel.clone()),
            |options, (name, value)| options.with_header(name, value),
        )
    }

    async fn get(
        &self,
        segments: &[&str],
        query: &[(String, String)],
        context: &CallContext,
    ) -> Result<Fetched<Value>, AppError> {
        let url = self.endpoint(segments, query)?;
        Ok(self.client.get_json(&url, &Self::options(context)).await?)
    }
}

#[async_trait]
impl BackendProvider for HttpBackend {
    async fn invoke(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        context: &CallContext,
    ) -> Result<Fetched<Value>, AppError> {
        match name {
            "search_content" => self.get(&["search"], &query_pairs(arguments), context).await,
            "check_availability" => {
                self.get(&["availability"], &query_pairs(arguments), context)
                    .await
            }
            "get_content_details" => {
                let content_id = arguments
                    .get("content_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        AppError::bad_request("missing_argument", "content_id is required")
                    })?;
                self.get(&["content", content_id], &[], context).await
            }
            other => Err(AppError::bad_request_with_details(
                "unknown_tool",
                "unknown tool name",
                json!({ "name": other }),
            )),
        }
    }

    async fn read(&self, uri: &str, context: &CallContext) -> Result<Fetched<Value>, AppError> {
        match uri.strip_prefix(TRENDING_URI_PREFIX) {
            Some(region) if !region.is_empty() && !region.contains('/') => {
                let query = [("region".to_string(), region.to_string())];
                self.get(&["trending"], &query, context).await
            }
            _ => Err(AppError::not_found(
                "resource_not_found",
                "unknown resource uri",
                json!({ "uri": uri }),
            )),
        }
    }
}

/// Scalar arguments as query pairs, in key order so equal calls share a cache entry.
fn query_pairs(arguments: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = arguments
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => return None,
            };
            Some((key.clone(), value))
        })
        .collect();
    pairs.sort();
    pairs
}
