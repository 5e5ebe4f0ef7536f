//! Client side of the Gemini Live bidirectional streaming protocol.

pub mod connection;
#[cfg(any(test, feature = "test-util"))]
pub mod loopback;
pub mod setup;
pub mod types;

pub use connection::{
    ConnectionError, ConnectionState, Connector, UpstreamConnection, WebSocketConnector,
};
pub use setup::build_setup;
pub use types::{ClientMessage, FunctionCall, UpstreamEvent, UpstreamMessage};
