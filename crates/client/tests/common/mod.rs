//! Shared rig for the end-to-end scenarios: clients wired through one
//! in-process broker and one mock adjudicator.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use conduit_chain::{ChainService, MockChainService};
use conduit_client::Client;
use conduit_crypto::{address_from_secret_key, SecretKey};
use conduit_messaging::{Broker, TestMessageService};
use conduit_primitives::Destination;
use conduit_protocols::{ObjectiveId, Voucher};
use conduit_state::{Allocation, Exit};
use conduit_store::{MemStore, Store};
use tokio::time::timeout;

pub const TEST_CHAIN_ID: u64 = 1337;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn alice_key() -> SecretKey {
    SecretKey::from_slice(&[0x11; 32]).unwrap()
}

pub fn irene_key() -> SecretKey {
    SecretKey::from_slice(&[0x33; 32]).unwrap()
}

pub fn bob_key() -> SecretKey {
    SecretKey::from_slice(&[0x22; 32]).unwrap()
}

/// Constructs a client over a fresh in-memory store.
pub async fn setup_client(
    secret_key: SecretKey,
    broker: Broker,
    chain: Arc<MockChainService>,
) -> Client {
    let store: Arc<dyn Store> = Arc::new(MemStore::new(secret_key));
    setup_client_with_store(secret_key, broker, chain, store).await
}

/// Installs a test-friendly tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Constructs a client over the given store, registering its address with
/// the broker.
pub async fn setup_client_with_store(
    secret_key: SecretKey,
    broker: Broker,
    chain: Arc<MockChainService>,
    store: Arc<dyn Store>,
) -> Client {
    init_tracing();
    let address = address_from_secret_key(&secret_key);
    let (messenger, inbox) = TestMessageService::new(address, broker, Duration::ZERO).await;
    let chain: Arc<dyn ChainService> = chain;
    Client::new(Arc::new(messenger), inbox, chain, store, TEST_CHAIN_ID)
        .await
        .expect("client must start")
}

/// A two-party 100/100 outcome between `first` and `second`.
pub fn fifty_fifty_outcome(first: Address, second: Address) -> Exit {
    Exit::single_asset(
        Address::ZERO,
        vec![
            Allocation::simple(Destination::from(first), U256::from(100)),
            Allocation::simple(Destination::from(second), U256::from(100)),
        ],
    )
}

/// Waits until `client`'s completed stream has emitted every id in `ids`.
pub async fn wait_for_completed_objectives(client: &mut Client, ids: &[ObjectiveId]) {
    let mut remaining: Vec<ObjectiveId> = ids.to_vec();
    let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
    while !remaining.is_empty() {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            panic!(
                "objectives {remaining:?} failed to complete on client {} in time",
                client.address()
            );
        }
        match timeout(deadline - now, client.completed_objectives().recv()).await {
            Ok(Some(done)) => remaining.retain(|id| *id != done),
            Ok(None) | Err(_) => panic!(
                "objectives {remaining:?} failed to complete on client {} in time",
                client.address()
            ),
        }
    }
}

/// Waits for the next voucher on `client`'s received stream.
pub async fn wait_for_voucher(client: &mut Client) -> Voucher {
    timeout(DEFAULT_TIMEOUT, client.received_vouchers().recv())
        .await
        .expect("voucher must arrive in time")
        .expect("voucher stream must stay open")
}

/// Funds a ledger channel between the two clients and waits for both
/// direct-fund objectives to complete. Returns the ledger channel id.
pub async fn open_ledger_channel(proposer: &mut Client, acceptor: &mut Client) -> Destination {
    let outcome = fifty_fifty_outcome(proposer.address(), acceptor.address());
    let response = proposer
        .create_ledger_channel(acceptor.address(), 60, outcome)
        .await
        .expect("proposer must accept the request");
    wait_for_completed_objectives(proposer, &[response.id]).await;
    wait_for_completed_objectives(acceptor, &[response.id]).await;
    response.channel_id
}
