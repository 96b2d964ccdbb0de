//! Application context shared by all route handlers via Axum state.

use std::sync::Arc;

use lc_av::ToolRegistry;
use lc_core::config::Config;
use lc_core::events::EventBus;
use tokio_util::sync::CancellationToken;

use crate::session::SessionController;

/// Cheaply cloneable handle to everything a request handler may touch.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    /// External tool registry.
    pub tools: Arc<ToolRegistry>,
    /// Broadcast event bus for SSE.
    pub event_bus: Arc<EventBus>,
    /// The process-wide streaming session.
    pub session: Arc<SessionController>,
    /// Fired once the server begins shutting down; long-lived responses
    /// end when it does.
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Wire a context from a config and an already discovered tool registry.
    pub fn new(config: Config, tools: ToolRegistry) -> Self {
        let tools = Arc::new(tools);
        let event_bus = Arc::new(EventBus::default());
        let session = Arc::new(SessionController::new(
            &config,
            tools.clone(),
            event_bus.clone(),
        ));
        Self {
            config: Arc::new(config),
            tools,
            event_bus,
            session,
            shutdown: CancellationToken::new(),
        }
    }
}
