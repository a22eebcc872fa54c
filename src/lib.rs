//! Google Cloud Logging MCP 服务核心库
//! 工具分发、会话状态与两种传输（stdio / SSE）。

pub mod auth;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod gcp;
pub mod http;
pub mod log_store;
pub mod mcp;
pub mod model;
pub mod session;
pub mod tools;
