//! Log level control and tracing setup
//!
//! The [`Logger`] handle carries the server's current minimum severity. It is cloned into every
//! component that logs instead of living in a global, so tests can run isolated thresholds.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Instant,
};

use axum::{extract::Request, middleware::Next, response::Response};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, reload, EnvFilter, Registry};

use crate::errors::AppError;

pub type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const ALL: [LogLevel; 4] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == value.trim())
    }

    /// Name used by the MCP `notifications/message` level vocabulary.
    pub fn mcp_name(self) -> &'static str {
        match self {
            Self::Warn => "warning",
            other => other.as_str(),
        }
    }

    fn rank(self) -> u8 {
        self as u8
    }

    fn from_rank(rank: u8) -> Self {
        match rank {
            0 => Self::Debug,
            1 => Self::Info,
            2 => Self::Warn,
            _ => Self::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelChange {
    pub previous_level: LogLevel,
    pub current_level: LogLevel,
}

#[derive(Debug)]
struct LoggerInner {
    threshold: AtomicU8,
    filter: Option<FilterHandle>,
}

#[derive(Debug, Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    pub fn new(level: LogLevel) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                threshold: AtomicU8::new(level.rank()),
                filter: None,
            }),
        }
    }

    /// Logger whose level changes are also pushed into the installed tracing filter.
    pub fn with_filter_handle(level: LogLevel, filter: FilterHandle) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                threshold: AtomicU8::new(level.rank()),
                filter: Some(filter),
            }),
        }
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_rank(self.inner.threshold.load(Ordering::Relaxed))
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level()
    }

    pub fn set_level(&self, raw: &str) -> Result<LevelChange, AppError> {
        let Some(level) = LogLevel::parse(raw) else {
            let valid = LogLevel::ALL.map(LogLevel::as_str);
            return Err(AppError::bad_request_with_details(
                "invalid_log_level",
                format!("level must be one of: {}", valid.join(", ")),
                json!({ "validLevels": valid }),
            ));
        };

        let previous_rank = self.inner.threshold.swap(level.rank(), Ordering::Relaxed);
        let previous = LogLevel::from_rank(previous_rank);

        if let Some(filter) = &self.inner.filter {
            if let Err(err) = filter.reload(EnvFilter::new(level.as_str())) {
                warn!(error = %err, "failed to reload tracing filter");
            }
        }

        info!(previous = %previous, current = %level, "log level changed");

        Ok(LevelChange {
            previous_level: previous,
            current_level: level,
        })
    }

    /// Emits a structured entry when `level` passes the threshold; returns whether it did.
    pub fn log(&self, level: LogLevel, message: &str, data: Option<&Value>) -> bool {
        if !self.enabled(level) {
            return false;
        }

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let data = data.map(Value::to_string).unwrap_or_default();

        match level {
            LogLevel::Debug => debug!(timestamp = %timestamp, data = %data, "{message}"),
            LogLevel::Info => info!(timestamp = %timestamp, data = %data, "{message}"),
            LogLevel::Warn => warn!(timestamp = %timestamp, data = %data, "{message}"),
            LogLevel::Error => error!(timestamp = %timestamp, data = %data, "{message}"),
        }

        true
    }
}

/// Installs the global subscriber. Output goes to stderr so stdout stays free for stdio framing.
pub fn init_logging(level: LogLevel) -> FilterHandle {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();

    handle
}

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis();

    info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = elapsed_ms,
        "request summary"
    );

    if status.as_u16() == 401 {
        warn!(method = %method, path = %path, "authentication failure");
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn set_level_reports_previous_level() {
        let logger = Logger::new(LogLevel::Info);

        let change = logger.set_level("debug").expect("valid level");
        assert_eq!(change.previous_level, LogLevel::Info);
        assert_eq!(change.current_level, LogLevel::Debug);

        let change = logger.set_level("error").expect("valid level");
        assert_eq!(change.previous_level, LogLevel::Debug);
        assert_eq!(logger.level(), LogLevel::Error);
    }

    #[test]
    fn set_level_rejects_unknown_level_and_lists_valid_values() {
        let logger = Logger::new(LogLevel::Warn);

        let error = logger.set_level("verbose").expect_err("unknown level");
        match error {
            AppError::BadRequest { message, .. } => {
                for level in ["debug", "info", "warn", "error"] {
                    assert!(message.contains(level), "missing {level} in {message}");
                }
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(logger.level(), LogLevel::Warn);
    }

    #[test]
    fn log_is_filtered_below_threshold() {
        let logger = Logger::new(LogLevel::Warn);

        assert!(!logger.log(LogLevel::Debug, "hidden", None));
        assert!(!logger.log(LogLevel::Info, "hidden", None));
        assert!(logger.log(LogLevel::Warn, "shown", Some(&json!({ "attempt": 1 }))));
        assert!(logger.log(LogLevel::Error, "shown", None));
    }

    #[test]
    fn clones_share_the_threshold() {
        let logger = Logger::new(LogLevel::Info);
        let clone = logger.clone();

        logger.set_level("error").expect("valid level");
        assert_eq!(clone.level(), LogLevel::Error);
    }

    #[test]
    fn serializes_level_change_in_camel_case() {
        let change = LevelChange {
            previous_level: LogLevel::Info,
            current_level: LogLevel::Debug,
        };

        assert_eq!(
            serde_json::to_value(change).expect("serialize"),
            json!({ "previousLevel": "info", "currentLevel": "debug" })
        );
    }
}
