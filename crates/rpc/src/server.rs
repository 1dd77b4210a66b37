//! Server-side dispatch of the five recognised methods onto a client.

use conduit_client::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::{
    DirectDefundParams, DirectFundParams, JsonRpcError, JsonRpcErrorResponse, JsonRpcResponse,
    PayParams, RequestMethod, SpawnedObjective, VirtualDefundParams, VirtualFundParams,
};

const PARSE_ERROR: i64 = -32700;
const INVALID_PARAMS: i64 = -32602;
const METHOD_FAILED: i64 = -32000;

/// Handles one raw request frame against `client`, producing the response
/// frame. Malformed input yields an error envelope, never a dropped frame.
pub async fn handle_request(client: &Client, raw: &[u8]) -> Vec<u8> {
    let value: Value = match serde_json::from_slice(raw) {
        Ok(v) => v,
        Err(err) => return error_frame(0, PARSE_ERROR, &err.to_string()),
    };
    let id = value.get("id").and_then(|id| id.as_u64()).unwrap_or(0);
    let Some(method) = value
        .get("method")
        .cloned()
        .and_then(|m| serde_json::from_value::<RequestMethod>(m).ok())
    else {
        return error_frame(id, PARSE_ERROR, "unknown method");
    };
    let params = value.get("params").cloned().unwrap_or(Value::Null);
    debug!(id, %method, "rpc request");

    match dispatch(client, method, params).await {
        Ok(result) => ok_frame(id, result),
        Err(frame) => {
            warn!(id, %method, code = frame.0, message = %frame.1, "rpc request failed");
            error_frame(id, frame.0, &frame.1)
        }
    }
}

async fn dispatch(
    client: &Client,
    method: RequestMethod,
    params: Value,
) -> Result<Value, (i64, String)> {
    match method {
        RequestMethod::DirectFund => {
            let params: DirectFundParams = parse(params)?;
            let response = client
                .create_ledger_channel(
                    params.counterparty,
                    params.challenge_duration,
                    params.outcome,
                )
                .await
                .map_err(method_failed)?;
            encode(SpawnedObjective {
                id: response.id,
                channel_id: response.channel_id,
            })
        }
        RequestMethod::DirectDefund => {
            let params: DirectDefundParams = parse(params)?;
            let id = client
                .close_ledger_channel(params.channel_id)
                .await
                .map_err(method_failed)?;
            encode(id)
        }
        RequestMethod::VirtualFund => {
            let params: VirtualFundParams = parse(params)?;
            let response = client
                .create_virtual_channel(
                    params.intermediaries,
                    params.counterparty,
                    params.challenge_duration,
                    params.outcome,
                )
                .await
                .map_err(method_failed)?;
            encode(SpawnedObjective {
                id: response.id,
                channel_id: response.channel_id,
            })
        }
        RequestMethod::VirtualDefund => {
            let params: VirtualDefundParams = parse(params)?;
            let id = client
                .close_virtual_channel(params.channel_id)
                .await
                .map_err(method_failed)?;
            encode(id)
        }
        RequestMethod::Pay => {
            let params: PayParams = parse(params)?;
            let id = client
                .pay(params.channel_id, params.amount)
                .await
                .map_err(method_failed)?;
            encode(id)
        }
    }
}

/// Serves requests arriving on `requests` against `client`, writing each
/// response to `responses`. An in-process transport for tests and
/// embedding; a network server would pump sockets into the same pair.
pub fn serve_duplex(
    client: Client,
    mut requests: mpsc::UnboundedReceiver<Vec<u8>>,
    responses: mpsc::UnboundedSender<Vec<u8>>,
) -> tokio::task::JoinHandle<Client> {
    tokio::spawn(async move {
        while let Some(raw) = requests.recv().await {
            let frame = handle_request(&client, &raw).await;
            if responses.send(frame).is_err() {
                break;
            }
        }
        client
    })
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, (i64, String)> {
    serde_json::from_value(params).map_err(|e| (INVALID_PARAMS, e.to_string()))
}

fn encode<T: Serialize>(value: T) -> Result<Value, (i64, String)> {
    serde_json::to_value(value).map_err(|e| (METHOD_FAILED, e.to_string()))
}

fn method_failed<E: std::fmt::Display>(err: E) -> (i64, String) {
    (METHOD_FAILED, err.to_string())
}

fn ok_frame(id: u64, result: Value) -> Vec<u8> {
    serde_json::to_vec(&JsonRpcResponse { id, result }).unwrap_or_default()
}

fn error_frame(id: u64, code: i64, message: &str) -> Vec<u8> {
    serde_json::to_vec(&JsonRpcErrorResponse {
        id,
        error: JsonRpcError {
            code,
            message: message.to_string(),
        },
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RpcClient;
    use std::sync::Arc;
    use std::time::Duration;

    use alloy_primitives::{Address, U256};
    use conduit_chain::{ChainService, MockChainService};
    use conduit_crypto::{address_from_secret_key, SecretKey};
    use conduit_messaging::{Broker, TestMessageService};
    use conduit_primitives::Destination;
    use conduit_state::{Allocation, Exit};
    use conduit_store::{MemStore, Store};

    async fn start_client(
        secret_key: SecretKey,
        broker: Broker,
        chain: Arc<MockChainService>,
    ) -> Client {
        let address = address_from_secret_key(&secret_key);
        let store: Arc<dyn Store> = Arc::new(MemStore::new(secret_key));
        let (messenger, inbox) = TestMessageService::new(address, broker, Duration::ZERO).await;
        let chain: Arc<dyn ChainService> = chain;
        Client::new(Arc::new(messenger), inbox, chain, store, 1337)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn direct_fund_round_trips_over_the_duplex_transport() {
        let broker = Broker::new();
        let chain = Arc::new(MockChainService::new());
        let sk_alice = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let sk_bob = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let alice = start_client(sk_alice, broker.clone(), chain.clone()).await;
        let _bob = start_client(sk_bob, broker.clone(), chain.clone()).await;
        let bob_address = address_from_secret_key(&sk_bob);
        let alice_address = alice.address();

        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let _server = serve_duplex(alice, req_rx, resp_tx);

        let rpc = RpcClient::new(req_tx, resp_rx);
        let spawned: SpawnedObjective = rpc
            .request(
                RequestMethod::DirectFund,
                DirectFundParams {
                    counterparty: bob_address,
                    challenge_duration: 60,
                    outcome: Exit::single_asset(
                        Address::ZERO,
                        vec![
                            Allocation::simple(
                                Destination::from(alice_address),
                                U256::from(100),
                            ),
                            Allocation::simple(Destination::from(bob_address), U256::from(100)),
                        ],
                    ),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            spawned.id.kind,
            conduit_protocols::ObjectiveKind::DirectFund
        );
        assert_eq!(spawned.id.channel_id, spawned.channel_id);
    }

    #[tokio::test]
    async fn unknown_channel_surfaces_on_the_error_channel() {
        let broker = Broker::new();
        let chain = Arc::new(MockChainService::new());
        let sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let client = start_client(sk, broker, chain).await;

        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let _server = serve_duplex(client, req_rx, resp_tx);
        let rpc = RpcClient::new(req_tx, resp_rx);

        let result: Result<conduit_protocols::ObjectiveId, _> = rpc
            .request(
                RequestMethod::Pay,
                PayParams {
                    channel_id: Destination::ZERO,
                    amount: U256::from(1),
                },
            )
            .await;
        assert!(matches!(result, Err(crate::RpcClientError::Server { .. })));
    }
}
