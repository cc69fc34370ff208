//! The ingress RPC contract and its reconnecting client.
//!
//! The trait generates both sides: connectors use the client, the
//! switchboard implements the server. Every call is idempotent at the
//! application level via the dedupe key, so reconnect-and-retry is safe.

use std::sync::Arc;
use std::time::Duration;

use jsonrpsee::core::client::Error as RpcClientError;
use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use majordomo_core::{AcceptResponse, Eligibility, HeartbeatEnvelope, IngestEnvelope};

use crate::error::{ConnectorError, ConnectorResult};

/// Acknowledgement of a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAck {
    /// The connector's eligibility as the registry now sees it.
    pub eligibility: Eligibility,
}

/// One granted backfill slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillJob {
    /// Cursor to resume backfill from.
    pub from_cursor: Option<String>,
    /// How many items to submit before reporting progress.
    pub batch_limit: usize,
}

/// The RPC surface the switchboard ingress serves.
#[rpc(server, client)]
pub trait IngressRpc {
    /// Submit one envelope. Duplicates are accepted, never errors.
    #[method(name = "ingestion.ingest")]
    async fn ingest(&self, envelope: IngestEnvelope) -> RpcResult<AcceptResponse>;

    /// Report liveness and counters.
    #[method(name = "connector.heartbeat")]
    async fn heartbeat(&self, envelope: HeartbeatEnvelope) -> RpcResult<HeartbeatAck>;

    /// Ask for backfill work, when the connector supports it.
    #[method(name = "backfill.poll")]
    async fn backfill_poll(
        &self,
        connector_type: String,
        endpoint_identity: String,
    ) -> RpcResult<Option<BackfillJob>>;

    /// Report backfill progress.
    #[method(name = "backfill.progress")]
    async fn backfill_progress(
        &self,
        connector_type: String,
        endpoint_identity: String,
        cursor: String,
    ) -> RpcResult<()>;
}

/// Lazy, reconnecting client for the ingress surface.
pub struct SwitchboardClient {
    endpoint: String,
    request_timeout: Duration,
    connection: RwLock<Option<Arc<WsClient>>>,
}

impl SwitchboardClient {
    /// Create a lazy client; nothing is dialed until the first call.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout,
            connection: RwLock::new(None),
        }
    }

    /// Submit one envelope.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::Rejected`] for terminal validation failures,
    /// [`ConnectorError::IngressUnreachable`] for transport failures.
    pub async fn ingest(&self, envelope: IngestEnvelope) -> ConnectorResult<AcceptResponse> {
        let client = self.get_or_connect().await?;
        match IngressRpcClient::ingest(client.as_ref(), envelope).await {
            Ok(response) => Ok(response),
            Err(RpcClientError::Call(e)) => Err(ConnectorError::Rejected(e.message().to_owned())),
            Err(other) => {
                self.reset().await;
                Err(ConnectorError::IngressUnreachable(other.to_string()))
            },
        }
    }

    /// Report a heartbeat. Failures are returned, never fatal — the
    /// caller logs and continues.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::IngressUnreachable`] for transport failures.
    pub async fn heartbeat(&self, envelope: HeartbeatEnvelope) -> ConnectorResult<HeartbeatAck> {
        let client = self.get_or_connect().await?;
        match IngressRpcClient::heartbeat(client.as_ref(), envelope).await {
            Ok(ack) => Ok(ack),
            Err(RpcClientError::Call(e)) => Err(ConnectorError::Rejected(e.message().to_owned())),
            Err(other) => {
                self.reset().await;
                Err(ConnectorError::IngressUnreachable(other.to_string()))
            },
        }
    }

    /// Ask for backfill work.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::IngressUnreachable`] for transport failures.
    pub async fn backfill_poll(
        &self,
        connector_type: &str,
        endpoint_identity: &str,
    ) -> ConnectorResult<Option<BackfillJob>> {
        let client = self.get_or_connect().await?;
        IngressRpcClient::backfill_poll(
            client.as_ref(),
            connector_type.to_owned(),
            endpoint_identity.to_owned(),
        )
        .await
        .map_err(|e| self.map_transport(e))
    }

    /// Report backfill progress.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::IngressUnreachable`] for transport failures.
    pub async fn backfill_progress(
        &self,
        connector_type: &str,
        endpoint_identity: &str,
        cursor: &str,
    ) -> ConnectorResult<()> {
        let client = self.get_or_connect().await?;
        IngressRpcClient::backfill_progress(
            client.as_ref(),
            connector_type.to_owned(),
            endpoint_identity.to_owned(),
            cursor.to_owned(),
        )
        .await
        .map_err(|e| self.map_transport(e))
    }

    fn map_transport(&self, e: RpcClientError) -> ConnectorError {
        match e {
            RpcClientError::Call(e) => ConnectorError::Rejected(e.message().to_owned()),
            other => ConnectorError::IngressUnreachable(other.to_string()),
        }
    }

    async fn get_or_connect(&self) -> ConnectorResult<Arc<WsClient>> {
        {
            let connection = self.connection.read().await;
            if let Some(client) = connection.as_ref() {
                if client.is_connected() {
                    return Ok(Arc::clone(client));
                }
            }
        }
        let mut connection = self.connection.write().await;
        if let Some(client) = connection.as_ref() {
            if client.is_connected() {
                return Ok(Arc::clone(client));
            }
        }
        debug!(endpoint = %self.endpoint, "dialing switchboard");
        let client = WsClientBuilder::default()
            .request_timeout(self.request_timeout)
            .build(&self.endpoint)
            .await
            .map_err(|e| {
                warn!(endpoint = %self.endpoint, error = %e, "switchboard dial failed");
                ConnectorError::IngressUnreachable(e.to_string())
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

impl std::fmt::Debug for SwitchboardClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchboardClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_ingress_is_retryable() {
        let client = SwitchboardClient::new("ws://127.0.0.1:1", Duration::from_millis(200));
        let hb_err = client
            .backfill_poll("telegram", "telegram:bot:b1")
            .await
            .unwrap_err();
        assert!(hb_err.is_retryable());
    }
}
