//! Live Relay API Library Crate
//!
//! This library contains the web-facing half of the relay: configuration,
//! application state, the REST handlers, the WebSocket session logic and the
//! routing. The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
