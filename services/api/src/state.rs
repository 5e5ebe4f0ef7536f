//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the shared
//! resources every handler and WebSocket session needs.

use crate::{config::Config, ws::registry::SessionRegistry};
use gemini_realtime::Connector;
use liverelay_core::ToolCoordinator;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    /// Opens upstream transports; one connection per session.
    pub connector: Arc<dyn Connector>,
    pub tools: ToolCoordinator,
}
