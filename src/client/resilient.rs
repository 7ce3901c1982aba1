use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::client::{
    cache::ResponseCache,
    error::{ClientError, EXHAUSTED_RETRY_AFTER},
    retry::{RetryConfig, RetryOverrides},
};
use crate::logging::{LogLevel, Logger};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Live,
    /// Served from cache after every attempt failed.
    Stale { cached_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub data: T,
    pub freshness: Freshness,
    pub attempts: u32,
}

impl<T> Fetched<T> {
    pub fn live(data: T, attempts: u32) -> Self {
        Self {
            data,
            freshness: Freshness::Live,
            attempts,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.freshness, Freshness::Stale { .. })
    }

    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        match self.freshness {
            Freshness::Live => None,
            Freshness::Stale { cached_at } => Some(cached_at),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub cancel: CancellationToken,
    pub retry: RetryOverrides,
    pub cache_ttl: Option<Duration>,
    pub headers: Vec<(String, String)>,
}

impl CallOptions {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryOverrides) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct ResilientClient {
    http: reqwest::Client,
    cache: ResponseCache<Value>,
    defaults: RetryConfig,
    cache_ttl: Duration,
    logger: Logger,
}

impl ResilientClient {
    pub fn new(defaults: RetryConfig, cache_ttl: Duration, logger: Logger) -> Self {
        Self {
            http: reqwest::Client::new(),
            cache: ResponseCache::new(),
            defaults,
            cache_ttl,
            logger,
        }
    }

    pub fn cache(&self) -> &ResponseCache<Value> {
        &self.cache
    }

    /// GET a JSON document. Successful responses are cached per URL and forwarded headers.
    pub async fn get_json(
        &self,
        url: &Url,
        options: &CallOptions,
    ) -> Result<Fetched<Value>, ClientError> {
        let target = url.to_string();
        let http = self.http.clone();
        let url = url.clone();
        let headers = options.headers.clone();
        let request_target = target.clone();

        self.execute(&target, true, options, move |_attempt| {
            let mut request = http.get(url.clone());
            for (name, value) in &headers {
                request = request.header(name.as_str(), value.as_str());
            }
            send_json(request, request_target.clone())
        })
        .await
    }

    /// Runs `operation` under the retry schedule. `operation` receives the 0-based attempt index.
    pub async fn execute<F, Fut>(
        &self,
        target: &str,
        cacheable: bool,
        options: &CallOptions,
        mut operation: F,
    ) -> Result<Fetched<Value>, ClientError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Value, ClientError>>,
    {
        let config = self.defaults.merged(&options.retry);
        let total_attempts = config.total_attempts();
        let key = cache_key(target, &options.headers);
        let mut last_error = None;

        for attempt in 0..total_attempts {
            let outcome = tokio::select! {
                biased;
                _ = options.cancel.cancelled() => return Err(ClientError::cancelled(target)),
                outcome = tokio::time::timeout(config.timeout(), operation(attempt)) => outcome,
            };

            let error = match outcome {
                Ok(Ok(data)) => {
                    if cacheable {
                        self.store(&key, &data, options.cache_ttl);
                    }
                    return Ok(Fetched::live(data, attempt + 1));
                }
                Ok(Err(error)) => error,
                Err(_elapsed) => ClientError::timeout(target, config.timeout_ms),
            };

            if !error.is_retryable() {
                return Err(error);
            }

            if attempt + 1 < total_attempts {
                let delay = config.delay_after(attempt);
                self.logger.log(
                    LogLevel::Warn,
                    "retrying upstream call",
                    Some(&json!({
                        "target": target,
                        "attempt": attempt + 1,
                        "maxRetries": config.max_retries,
                        "delayMs": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "error": error.to_string(),
                    })),
                );

                tokio::select! {
                    biased;
                    _ = options.cancel.cancelled() => return Err(ClientError::cancelled(target)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            last_error = Some(error);
        }

        let Some(cause) = last_error else {
            return Err(ClientError::Network {
                target: target.to_string(),
                message: "no attempts were made".to_string(),
            });
        };

        if let Some(entry) = self.cache.get_any(&key) {
            self.logger.log(
                LogLevel::Warn,
                "serving stale cached response",
                Some(&json!({
                    "target": target,
                    "attempts": total_attempts,
                    "cachedAt": entry.timestamp.to_rfc3339(),
                    "error": cause.to_string(),
                })),
            );
            return Ok(Fetched {
                data: entry.data,
                freshness: Freshness::Stale {
                    cached_at: entry.timestamp,
                },
                attempts: total_attempts,
            });
        }

        self.logger.log(
            LogLevel::Error,
            "upstream call exhausted retries",
            Some(&json!({
                "target": target,
                "attempts": total_attempts,
                "error": cause.to_string(),
            })),
        );

        Err(ClientError::Exhausted {
            target: target.to_string(),
            attempts: total_attempts,
            cause: Box::new(cause),
            retry_after: EXHAUSTED_RETRY_AFTER,
        })
    }

    // In-memory insert: never blocks on I/O and cannot fail the caller's response.
    fn store(&self, key: &str, data: &Value, ttl: Option<Duration>) {
        self.cache
            .insert(key, data.clone(), ttl.unwrap_or(self.cache_ttl));
    }
}

/// Cache key for a call: the target plus every forwarded header, so callers never share entries.
fn cache_key(target: &str, headers: &[(String, String)]) -> String {
    if headers.is_empty() {
        return target.to_string();
    }

    let mut pairs: Vec<String> = headers
        .iter()
        .map(|(name, value)| format!("{}={value}", name.to_ascii_lowercase()))
        .collect();
    pairs.sort();
    format!("{target} [{}]", pairs.join("; "))
}

async fn send_json(request: RequestBuilder, target: String) -> Result<Value, ClientError> {
    let response = request.send().await.map_err(|err| ClientError::Network {
        target: target.clone(),
        message: err.to_string(),
    })?;

    let status = response.status();
    let body = response.bytes().await.map_err(|err| ClientError::Network {
        target: target.clone(),
        message: err.to_string(),
    })?;

    if status.is_success() {
        return serde_json::from_slice(&body).map_err(|err| ClientError::Decode {
            target,
            message: err.to_string(),
        });
    }

    if is_retryable_status(status) {
        return Err(ClientError::Status {
            target,
            status: status.as_u16(),
        });
    }

    let body = serde_json::from_slice(&body).unwrap_or_else(|_| {
        json!({
            "status": status.as_u16(),
            "message": String::from_utf8_lossy(&body),
        })
    });

    Err(ClientError::Rejected {
        target,
        status: status.as_u16(),
        body,
    })
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}
