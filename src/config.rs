use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use reqwest::Url;
use thiserror::Error;

use crate::client::{RetryConfig, DEFAULT_CACHE_TTL};
use crate::logging::LogLevel;

const DEFAULT_BACKEND_BASE_URL: &str = "http://127.0.0.1:9000";
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            _ => Err(ConfigError::InvalidTransport),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportKind,
    pub bind_addr: String,
    pub bind_port: u16,
    pub api_token: Option<String>,
    pub backend_base_url: Url,
    pub retry: RetryConfig,
    pub cache_ttl: Duration,
    pub log_level: LogLevel,
    pub shutdown_grace: Duration,
    pub session_idle: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_TRANSPORT must be one of: stdio, http")]
    InvalidTransport,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("invalid bind address or port")]
    InvalidSocket,
    #[error("BACKEND_BASE_URL must be an absolute http(s) url")]
    InvalidBackendUrl,
    #[error("{0} must be a non-negative integer")]
    InvalidNumber(&'static str),
    #[error("MCP_LOG_LEVEL must be one of: debug, info, warn, error")]
    InvalidLogLevel,
    #[error("SESSION_IDLE_SECS must be greater than zero")]
    InvalidSessionIdle,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |key: &'static str| {
            var(key)
                .map(|value| {
                    value
                        .parse::<u64>()
                        .map_err(|_| ConfigError::InvalidNumber(key))
                })
                .transpose()
        };

        let transport = var("MCP_TRANSPORT")
            .map(|value| value.parse::<TransportKind>())
            .transpose()?
            .unwrap_or(TransportKind::Stdio);

        let bind_addr = var("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = var("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);

        let backend_base_url = var("BACKEND_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BACKEND_BASE_URL.to_string());
        let backend_base_url = Url::parse(&backend_base_url)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or(ConfigError::InvalidBackendUrl)?;

        let defaults = RetryConfig::default();
        let max_retries = match number("BACKEND_MAX_RETRIES")? {
            Some(value) => u32::try_from(value)
                .map_err(|_| ConfigError::InvalidNumber("BACKEND_MAX_RETRIES"))?,
            None => defaults.max_retries,
        };
        let retry = RetryConfig {
            timeout_ms: number("BACKEND_TIMEOUT_MS")?.unwrap_or(defaults.timeout_ms),
            max_retries,
            base_delay_ms: number("BACKEND_BASE_DELAY_MS")?.unwrap_or(defaults.base_delay_ms),
        };

        let cache_ttl = number("CACHE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CACHE_TTL);
        let shutdown_grace = number("SHUTDOWN_GRACE_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE);
        let session_idle = match number("SESSION_IDLE_SECS")? {
            Some(0) => return Err(ConfigError::InvalidSessionIdle),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_SESSION_IDLE,
        };

        let log_level = var("MCP_LOG_LEVEL")
            .map(|value| LogLevel::parse(&value).ok_or(ConfigError::InvalidLogLevel))
            .transpose()?
            .unwrap_or(LogLevel::Info);

        let config = Self {
            transport,
            bind_addr,
            bind_port,
            api_token: var("MCP_API_TOKEN"),
            backend_base_url,
            retry,
            cache_ttl,
            log_level,
            shutdown_grace,
            session_idle,
        };

        if config.transport == TransportKind::Http {
            let _ = config.bind_socket()?;
        }
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}
