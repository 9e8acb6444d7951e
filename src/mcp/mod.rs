//! MCP server for the knowledge base
//!
//! Exposes search, grounded answers and the link graph as tools over stdio.

mod server;

pub use server::run_mcp_server;
