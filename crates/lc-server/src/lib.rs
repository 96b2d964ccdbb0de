//! lc-server: HTTP control panel and stream supervision.
//!
//! This crate ties the lc-* crates together into a running server:
//!
//! - Axum-based HTTP API for media selection and stream control, with SSE
//! - A [`session::SessionController`] owning the single ffmpeg worker
//! - Optional one-shot auto-start from configuration
//! - Graceful shutdown that stops the encoder on the way out

pub mod context;
pub mod error;
pub mod media;
pub mod middleware;
pub mod router;
pub mod routes;
pub mod session;
pub mod worker;

use std::net::SocketAddr;
use std::sync::Arc;

use lc_av::{StreamConfig, ToolRegistry};
use lc_core::config::{AutoStartConfig, Config};
use lc_core::events::{EventBus, EventPayload};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Knobs for [`start`] that do not belong in the config file.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Print every encoder log line to stdout (headless mode).
    pub echo_logs: bool,
}

/// Start the loopcast server.
///
/// Discovers ffmpeg, builds the [`AppContext`], runs the configured
/// auto-start (if any) and serves HTTP until a shutdown signal arrives or
/// `cancel` fires. The active stream, if any, is stopped before returning.
pub async fn start(
    config: Config,
    options: StartOptions,
    cancel: CancellationToken,
) -> lc_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let tools = discover_tools(&config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| lc_core::Error::Internal(format!("Invalid server address: {e}")))?;
    let static_dir = config.server.static_dir.clone();
    let autostart = config.autostart.clone();

    let ctx = AppContext::new(config, tools);

    let echo = options
        .echo_logs
        .then(|| spawn_log_echo(ctx.event_bus.clone(), cancel.clone()));

    if let Some(auto) = autostart {
        auto_start(&ctx, auto);
    }

    let app = router::build_router(ctx.clone(), static_dir);

    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| lc_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    let shutdown = ctx.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal(cancel).await;
            shutdown.cancel();
        })
        .await
        .map_err(|e| lc_core::Error::Internal(format!("Server error: {e}")))?;

    let report = ctx.session.stop().await;
    if report.stopped {
        tracing::info!("Stopped active stream during shutdown");
    }
    if let Some(echo) = echo {
        echo.abort();
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Discover external tools and log what was found.
pub fn discover_tools(config: &Config) -> ToolRegistry {
    let tools = ToolRegistry::discover(&config.tools);
    for info in tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}; streams cannot start", info.name);
        }
    }
    tools
}

/// Run the one-shot auto-start. Failures are logged, never fatal.
pub fn auto_start(ctx: &AppContext, auto: AutoStartConfig) {
    let request = StreamConfig::new(auto.media, auto.key, auto.shorts);
    match ctx.session.try_auto_start(request) {
        Ok(Some(summary)) => {
            tracing::info!(run_id = %summary.run_id, "Auto-start launched stream");
        }
        Ok(None) => {}
        Err(e) => tracing::error!("Auto-start failed: {e}"),
    }
}

/// Print encoder output to stdout as it arrives.
pub fn spawn_log_echo(event_bus: Arc<EventBus>, cancel: CancellationToken) -> JoinHandle<()> {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = rx.recv() => event,
                _ = cancel.cancelled() => break,
            };
            match event {
                Ok(event) => match event.payload {
                    EventPayload::StreamLog { line } => println!("{}", line.text),
                    EventPayload::StreamFailed { error, .. } => {
                        tracing::error!("Stream failed: {error}");
                    }
                    _ => {}
                },
                Err(RecvError::Lagged(n)) => tracing::debug!("Log echo lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or cancellation.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
