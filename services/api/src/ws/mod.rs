//! WebSocket Session Management
//!
//! This module contains the logic for relaying a browser session to the
//! upstream realtime model. It is structured into submodules:
//!
//! - `protocol`: The JSON frames exchanged with the browser.
//! - `registry`: The process-wide session map.
//! - `session`: The connection lifecycle, from configuration to teardown.
//! - `relay`: The two pumps that move frames in each direction.
//! - `tools`: Tool declaration lookup and tool-call dispatch.

pub mod protocol;
pub mod registry;
pub mod relay;
pub mod session;
mod tools;

pub use session::ws_handler;
