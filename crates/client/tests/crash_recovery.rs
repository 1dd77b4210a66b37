//! Crash recovery: a restarted node resumes its persisted objectives
//! without any new API call.

mod common;

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use conduit_chain::MockChainService;
use conduit_client::ChannelStatus;
use conduit_crypto::address_from_secret_key;
use conduit_messaging::Broker;
use conduit_primitives::Destination;
use conduit_protocols::{DirectFund, Objective, ObjectiveEvent};
use conduit_state::{Allocation, Exit, SignedState, State};
use conduit_store::{DurableStore, Store};

use common::*;

/// Builds the store state of a node that crashed after both prefund
/// signatures were persisted but before any deposit was submitted.
async fn seed_prefund_signed_store(
    store: &dyn Store,
    prefund: &State,
    my_address: Address,
) -> conduit_protocols::ObjectiveId {
    let mut signed = SignedState::new(prefund.clone());
    signed.sign(&alice_key()).unwrap();
    signed.sign(&bob_key()).unwrap();

    let objective = DirectFund::from_prefund(prefund.clone(), my_address).unwrap();
    let objective = Objective::DirectFund(objective).approve().unwrap();
    let objective = objective
        .update(&ObjectiveEvent::SignedStates(vec![signed]))
        .unwrap();
    store.set_objective(&objective).await.unwrap();
    objective.id()
}

#[tokio::test]
async fn engine_resumes_the_deposit_after_a_restart() {
    let broker = Broker::new();
    let chain = Arc::new(MockChainService::new());
    let alice = address_from_secret_key(&alice_key());
    let bob = address_from_secret_key(&bob_key());

    let prefund = State {
        chain_id: TEST_CHAIN_ID,
        participants: vec![alice, bob],
        channel_nonce: 5,
        app_definition: Address::ZERO,
        challenge_duration: 60,
        app_data: Bytes::new(),
        outcome: Exit::single_asset(
            Address::ZERO,
            vec![
                Allocation::simple(Destination::from(alice), U256::from(100)),
                Allocation::simple(Destination::from(bob), U256::from(100)),
            ],
        ),
        turn_num: 0,
        is_final: false,
    };
    let channel_id = prefund.channel_id();

    let dir = tempfile::tempdir().unwrap();
    let alice_store: Arc<dyn Store> =
        Arc::new(DurableStore::open(&dir.path().join("alice.db")).await.unwrap());
    let bob_store: Arc<dyn Store> =
        Arc::new(DurableStore::open(&dir.path().join("bob.db")).await.unwrap());
    alice_store
        .set_channel_secret_key(&alice_key())
        .await
        .unwrap();
    bob_store.set_channel_secret_key(&bob_key()).await.unwrap();

    // both nodes crashed right after persisting the fully signed prefund
    let objective_id = seed_prefund_signed_store(alice_store.as_ref(), &prefund, alice).await;
    seed_prefund_signed_store(bob_store.as_ref(), &prefund, bob).await;

    // restart: no API calls follow
    let mut alice_client =
        setup_client_with_store(alice_key(), broker.clone(), chain.clone(), alice_store).await;
    let mut bob_client =
        setup_client_with_store(bob_key(), broker.clone(), chain.clone(), bob_store).await;

    wait_for_completed_objectives(&mut alice_client, &[objective_id]).await;
    wait_for_completed_objectives(&mut bob_client, &[objective_id]).await;

    for client in [&alice_client, &bob_client] {
        let info = client.get_ledger_channel(channel_id).await.unwrap();
        assert_eq!(info.status, ChannelStatus::Open);
        assert_eq!(info.balance.client_balance, U256::from(100));
        assert_eq!(info.balance.hub_balance, U256::from(100));
    }
}

/// Persisted state carries the whole signature set: an engine restarted
/// mid-protocol reconstructs exactly what it had observed.
#[tokio::test]
async fn a_reopened_store_reconstructs_every_signature() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let alice = address_from_secret_key(&alice_key());
    let bob = address_from_secret_key(&bob_key());

    let prefund = State {
        chain_id: TEST_CHAIN_ID,
        participants: vec![alice, bob],
        channel_nonce: 6,
        app_definition: Address::ZERO,
        challenge_duration: 60,
        app_data: Bytes::new(),
        outcome: fifty_fifty_outcome(alice, bob),
        turn_num: 0,
        is_final: false,
    };

    let before = {
        let store = DurableStore::open(&path).await.unwrap();
        let id = seed_prefund_signed_store(&store, &prefund, alice).await;
        store.get_objective(&id).await.unwrap().unwrap()
    };

    let store = DurableStore::open(&path).await.unwrap();
    let after = store.get_objective(&before.id()).await.unwrap().unwrap();
    assert_eq!(after, before);
    match after {
        Objective::DirectFund(df) => {
            assert!(df.channel().complete(0), "both prefund signatures survive");
        }
        _ => unreachable!(),
    }
}
