//! Domain types shared by the relay: the per-session configuration and the
//! tool-execution interface.

pub mod executors;
pub mod session_config;
pub mod tools;

pub use session_config::{InteractionMode, SessionConfig, StructuredOutputConfig};
pub use tools::{ToolCoordinator, ToolDeclaration, ToolExecutor, ToolOutcome};
