//! Tools served by remote Model Context Protocol servers.

pub mod client;
pub mod tool;

pub use client::{McpClient, McpSession, McpToolSchema};
pub use tool::{load_mcp_tools, tools_from_session, McpTool};
