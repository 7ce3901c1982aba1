use std::sync::Arc;

use content_discovery_mcp::{
    backend::HttpBackend,
    build_app,
    client::ResilientClient,
    config::{Config, TransportKind},
    logging::{self, Logger},
    mcp::session::spawn_idle_sweeper,
    transport::{shutdown_signal, stdio::serve_stdio},
    AppState,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let filter = logging::init_logging(config.log_level);
    let logger = Logger::with_filter_handle(config.log_level, filter);

    let client = ResilientClient::new(config.retry, config.cache_ttl, logger.clone());
    let backend = Arc::new(HttpBackend::new(config.backend_base_url.clone(), client));
    let shutdown = CancellationToken::new();
    let state = AppState::new(config.api_token.clone(), logger, backend)
        .with_shutdown(shutdown.clone());

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    match config.transport {
        TransportKind::Stdio => {
            info!(
                backend = %config.backend_base_url,
                "server starting on stdio"
            );
            serve_stdio(state, shutdown, config.shutdown_grace).await?;
        }
        TransportKind::Http => {
            let bind_socket = config.bind_socket()?;
            let listener = tokio::net::TcpListener::bind(bind_socket).await?;

            info!(
                bind_addr = %config.bind_addr,
                bind_port = config.bind_port,
                backend = %config.backend_base_url,
                "server starting"
            );

            spawn_idle_sweeper(state.sessions.clone(), config.session_idle, shutdown.clone());

            axum::serve(listener, build_app(state).into_make_service())
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await?;
        }
    }

    info!("server stopped");
    Ok(())
}
