//! The butler tool server.
//!
//! Serves the MCP methods (`initialize`, `tools/list`, `tools/call`) over
//! JSON-RPC on a local socket. Ephemeral sessions and the switchboard's
//! routing connect here.

use std::net::SocketAddr;

use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;
use serde_json::Value;
use tracing::info;

use crate::error::{to_rpc_error, McpError, McpResult};
use crate::registry::ToolRegistry;
use crate::types::{InitializeResult, ServerInfo, ToolCallParams, ToolListResult};

/// Protocol revision served to clients.
const PROTOCOL_VERSION: &str = "2025-06-18";

/// A running tool server.
#[derive(Debug)]
pub struct McpServer {
    addr: SocketAddr,
    handle: ServerHandle,
}

impl McpServer {
    /// Bind and serve a registry.
    ///
    /// Binding to port 0 picks a free port; [`local_addr`](Self::local_addr)
    /// reports the bound one.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::BindFailed`] when the socket cannot be bound.
    pub async fn serve(addr: SocketAddr, registry: ToolRegistry) -> McpResult<Self> {
        let server = Server::builder()
            .build(addr)
            .await
            .map_err(|e| McpError::BindFailed(e.to_string()))?;
        let bound = server
            .local_addr()
            .map_err(|e| McpError::BindFailed(e.to_string()))?;

        let butler = registry.butler().to_owned();
        let mut module = RpcModule::new(registry);

        module
            .register_async_method("initialize", |_params, registry, _ext| async move {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_owned(),
                    server_info: ServerInfo {
                        name: registry.butler().to_owned(),
                        version: env!("CARGO_PKG_VERSION").to_owned(),
                    },
                    capabilities: serde_json::json!({"tools": {}}),
                };
                Ok::<_, ErrorObjectOwned>(serde_json::to_value(result).unwrap_or(Value::Null))
            })
            .map_err(|e| McpError::BindFailed(e.to_string()))?;

        module
            .register_async_method("tools/list", |_params, registry, _ext| async move {
                let result = ToolListResult {
                    tools: registry.definitions(),
                };
                Ok::<_, ErrorObjectOwned>(serde_json::to_value(result).unwrap_or(Value::Null))
            })
            .map_err(|e| McpError::BindFailed(e.to_string()))?;

        module
            .register_async_method("tools/call", |params, registry, _ext| async move {
                let call: ToolCallParams = params.parse()?;
                match registry.call(&call.name, call.arguments).await {
                    Ok(result) => Ok(serde_json::to_value(result).unwrap_or(Value::Null)),
                    Err(e) => Err(to_rpc_error(&e)),
                }
            })
            .map_err(|e| McpError::BindFailed(e.to_string()))?;

        let handle = server.start(module);
        info!(butler = %butler, addr = %bound, "tool server listening");
        Ok(Self {
            addr: bound,
            handle,
        })
    }

    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Endpoint URL clients dial.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Stop accepting connections and wait for in-flight calls.
    pub async fn shutdown(self) {
        let _stopped = self.handle.stop();
        self.handle.stopped().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::McpClient;
    use crate::registry::{ButlerTool, CallContext};
    use majordomo_core::FleetResult;
    use std::sync::Arc;

    struct Ping;

    #[async_trait::async_trait]
    impl ButlerTool for Ping {
        fn name(&self) -> &str {
            "ping"
        }
        fn description(&self) -> &str {
            "Replies with pong"
        }
        async fn execute(&self, _args: Value, _ctx: &CallContext) -> FleetResult<Value> {
            Ok(serde_json::json!({"pong": true}))
        }
    }

    #[tokio::test]
    async fn serve_list_and_call() {
        let registry = ToolRegistry::new("health", vec![Arc::new(Ping)]);
        let server = McpServer::serve("127.0.0.1:0".parse().unwrap(), registry)
            .await
            .unwrap();

        let client = McpClient::new(server.endpoint_url(), std::time::Duration::from_secs(5));
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "ping");

        let result = client
            .call_tool("ping", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result.structured.unwrap()["pong"], true);

        let err = client
            .call_tool("missing", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");

        server.shutdown().await;
    }
}
