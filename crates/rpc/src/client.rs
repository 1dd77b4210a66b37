//! An RPC client that matches responses to outstanding requests.
//!
//! The one place the system needs a concurrent map: callers park on a
//! oneshot keyed by request id while the pump task routes inbound
//! responses. Everything else in the node is single-writer.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{trace, warn};

use crate::types::{JsonRpcRequest, RequestMethod};

/// Errors surfaced by RPC calls.
#[derive(Debug, Error)]
pub enum RpcClientError {
    /// The transport refused the request.
    #[error("transport closed")]
    TransportClosed,

    /// The server answered with an error envelope.
    #[error("rpc error {code}: {message}")]
    Server {
        /// Stable error code.
        code: i64,
        /// Human-readable description.
        message: String,
    },

    /// The response payload did not decode to the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

type Pending = Arc<RwLock<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

/// A client for issuing RPC requests over a byte transport.
pub struct RpcClient {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    pending: Pending,
    next_id: AtomicU64,
    _pump: tokio::task::JoinHandle<()>,
}

impl RpcClient {
    /// Connects the client to a transport: an outbound byte sink and an
    /// inbound byte stream.
    pub fn new(
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        mut inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        let pending: Pending = Arc::new(RwLock::new(HashMap::new()));
        let routing = pending.clone();
        let pump = tokio::spawn(async move {
            while let Some(raw) = inbound.recv().await {
                let value: serde_json::Value = match serde_json::from_slice(&raw) {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(%err, "dropping unparseable rpc frame");
                        continue;
                    }
                };
                let Some(id) = value.get("id").and_then(|id| id.as_u64()) else {
                    warn!("dropping rpc frame without an id");
                    continue;
                };
                match routing.write().await.remove(&id) {
                    Some(reply) => {
                        let _ = reply.send(value);
                    }
                    None => trace!(id, "response for unknown request"),
                }
            }
        });
        RpcClient {
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            _pump: pump,
        }
    }

    /// Issues `method` with `params` and waits for the matching response.
    pub async fn request<P, R>(
        &self,
        method: RequestMethod,
        params: P,
    ) -> Result<R, RpcClientError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = JsonRpcRequest { id, method, params };
        let raw = serde_json::to_vec(&envelope)
            .map_err(|e| RpcClientError::MalformedResponse(e.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.write().await.insert(id, reply_tx);
        if self.outbound.send(raw).is_err() {
            self.pending.write().await.remove(&id);
            return Err(RpcClientError::TransportClosed);
        }

        let value = reply_rx
            .await
            .map_err(|_| RpcClientError::TransportClosed)?;
        if let Some(error) = value.get("error") {
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(RpcClientError::Server { code, message });
        }
        let result = value
            .get("result")
            .cloned()
            .ok_or_else(|| RpcClientError::MalformedResponse("missing result".into()))?;
        serde_json::from_value(result).map_err(|e| RpcClientError::MalformedResponse(e.to_string()))
    }
}
