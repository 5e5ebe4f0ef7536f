//! Concrete tool providers behind the `ToolExecutor` trait.

pub mod http;
pub mod mcp;

pub use http::HttpToolExecutor;
pub use mcp::McpToolExecutor;
