//! Tool-server client.
//!
//! Dials a butler's endpoint lazily and reconnects after transport
//! failures. One client per endpoint; the switchboard caches them per
//! butler.

use std::sync::Arc;
use std::time::Duration;

use jsonrpsee::core::client::{ClientT, Error as RpcClientError};
use jsonrpsee::core::params::ObjectParams;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use majordomo_core::{FleetError, FleetResult};

use crate::error::from_rpc_error;
use crate::types::{ToolCallParams, ToolCallResult, ToolDefinition, ToolListResult};

/// Client for one butler's tool server.
pub struct McpClient {
    endpoint: String,
    request_timeout: Duration,
    connection: RwLock<Option<Arc<WsClient>>>,
}

impl McpClient {
    /// Create a lazy client. Nothing is dialed until the first call.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout,
            connection: RwLock::new(None),
        }
    }

    /// The endpoint this client dials.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// List the tools the remote butler serves.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Unreachable`] for transport failures.
    pub async fn list_tools(&self) -> FleetResult<Vec<ToolDefinition>> {
        let result: ToolListResult = self
            .request("tools/list", ObjectParams::new())
            .await?;
        Ok(result.tools)
    }

    /// Call a remote tool.
    ///
    /// # Errors
    ///
    /// Server-side failures come back as their original taxonomy code;
    /// transport failures as [`FleetError::Unreachable`]; a client-side
    /// timeout as [`FleetError::DeadlineExceeded`].
    pub async fn call_tool(&self, name: &str, arguments: Value) -> FleetResult<ToolCallResult> {
        let call = ToolCallParams {
            name: name.to_owned(),
            arguments,
        };
        let mut params = ObjectParams::new();
        params
            .insert("name", call.name)
            .map_err(|e| FleetError::Internal(e.to_string()))?;
        params
            .insert("arguments", call.arguments)
            .map_err(|e| FleetError::Internal(e.to_string()))?;
        self.request("tools/call", params).await
    }

    async fn request<R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: ObjectParams,
    ) -> FleetResult<R> {
        let client = self.get_or_connect().await?;
        match client.request(method, params).await {
            Ok(result) => Ok(result),
            Err(RpcClientError::Call(e)) => Err(from_rpc_error(&e.into_owned())),
            Err(RpcClientError::RequestTimeout) => {
                self.reset().await;
                Err(FleetError::DeadlineExceeded {
                    timeout_ms: u64::try_from(self.request_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                })
            },
            Err(other) => {
                warn!(endpoint = %self.endpoint, error = %other, "tool call transport failure");
                self.reset().await;
                Err(FleetError::Unreachable {
                    endpoint: self.endpoint.clone(),
                    reason: other.to_string(),
                })
            },
        }
    }

    async fn get_or_connect(&self) -> FleetResult<Arc<WsClient>> {
        {
            let connection = self.connection.read().await;
            if let Some(client) = connection.as_ref() {
                if client.is_connected() {
                    return Ok(Arc::clone(client));
                }
            }
        }

        let mut connection = self.connection.write().await;
        // Another caller may have reconnected while we waited.
        if let Some(client) = connection.as_ref() {
            if client.is_connected() {
                return Ok(Arc::clone(client));
            }
        }
        debug!(endpoint = %self.endpoint, "dialing tool server");
        let client = WsClientBuilder::default()
            .request_timeout(self.request_timeout)
            .build(&self.endpoint)
            .await
            .map_err(|e| FleetError::Unreachable {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;
        let client = Arc::new(client);
        *connection = Some(Arc::clone(&client));
        Ok(client)
    }

    async fn reset(&self) {
        let mut connection = self.connection.write().await;
        *connection = None;
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
