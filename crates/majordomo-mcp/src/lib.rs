//! Majordomo MCP — the per-butler tool surface.
//!
//! Every butler exposes its tools over JSON-RPC 2.0 (the MCP wire
//! protocol): `initialize`, `tools/list`, and `tools/call`. Ephemeral
//! sessions and the switchboard's routing both speak this surface.
//!
//! - [`ToolRegistry`] holds the butler's tools and runs per-call tracing
//!   and sensitivity gating.
//! - [`McpServer`] serves the registry on a socket.
//! - [`McpClient`] dials another butler's endpoint, reconnecting lazily.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod approvals;
pub mod client;
pub mod error;
pub mod registry;
pub mod server;
pub mod types;

pub use approvals::{ApprovalLedger, StandingRule};
pub use client::McpClient;
pub use error::{McpError, McpResult};
pub use registry::{ButlerTool, CallContext, ToolRegistry};
pub use server::McpServer;
pub use types::{ToolCallResult, ToolContent, ToolDefinition};
