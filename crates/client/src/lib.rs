//! The client façade: a thin API over the engine.
//!
//! A client owns one engine task. API calls enqueue events and resolve to
//! the deterministic objective id once the engine accepts them; completion
//! is observed on the completed-objectives stream, payments on the
//! received-vouchers stream.

pub mod query;

pub use query::{
    ChannelStatus, LedgerChannelBalance, LedgerChannelInfo, PaymentChannelBalance,
    PaymentChannelInfo,
};

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use conduit_chain::ChainService;
use conduit_engine::{ApiEvent, Engine, EngineError, EngineHandles};
use conduit_messaging::MessageService;
use conduit_primitives::{ChainId, Destination};
use conduit_protocols::{Message, ObjectiveId, ObjectiveRequest, Voucher};
use conduit_state::Exit;
use conduit_store::Store;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

/// Errors surfaced by client calls.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The engine failed to start.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The store failed while serving a query.
    #[error(transparent)]
    Store(#[from] conduit_store::StoreError),

    /// The engine has stopped and no longer accepts API events.
    #[error("the engine is no longer running")]
    EngineStopped,

    /// The engine refused the request; nothing was spawned.
    #[error("request refused: {0}")]
    Refused(String),

    /// The queried channel is not in the store.
    #[error("no channel found with id {0}")]
    UnknownChannel(Destination),
}

/// What an asynchronous objective-spawning call resolves to: the objective
/// to await on the completed stream, and the channel it concerns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectiveResponse {
    /// The spawned objective's id.
    pub id: ObjectiveId,
    /// The id of the channel the objective is about.
    pub channel_id: Destination,
}

/// A state-channel client node.
pub struct Client {
    my_address: Address,
    chain_id: ChainId,
    store: Arc<dyn Store>,
    api: mpsc::UnboundedSender<ApiEvent>,
    completed: mpsc::UnboundedReceiver<ObjectiveId>,
    vouchers: mpsc::UnboundedReceiver<Voucher>,
    _engine_task: JoinHandle<Result<(), EngineError>>,
}

impl Client {
    /// Builds a client over its three services and spawns the engine task.
    pub async fn new(
        messenger: Arc<dyn MessageService>,
        inbox: mpsc::UnboundedReceiver<Message>,
        chain: Arc<dyn ChainService>,
        store: Arc<dyn Store>,
        chain_id: ChainId,
    ) -> Result<Client, ClientError> {
        let (engine, handles) = Engine::new(store.clone(), chain, messenger, inbox, chain_id).await?;
        let my_address = engine.address();
        let EngineHandles {
            api,
            completed_objectives,
            received_vouchers,
        } = handles;
        let engine_task = tokio::spawn(engine.run());
        Ok(Client {
            my_address,
            chain_id,
            store,
            api,
            completed: completed_objectives,
            vouchers: received_vouchers,
            _engine_task: engine_task,
        })
    }

    /// The address this client signs as.
    pub fn address(&self) -> Address {
        self.my_address
    }

    /// The stream of completed objective ids. Each id appears at most once.
    pub fn completed_objectives(&mut self) -> &mut mpsc::UnboundedReceiver<ObjectiveId> {
        &mut self.completed
    }

    /// The stream of validated vouchers received from peers.
    pub fn received_vouchers(&mut self) -> &mut mpsc::UnboundedReceiver<Voucher> {
        &mut self.vouchers
    }

    /// Opens a directly funded ledger channel with `counterparty`.
    pub async fn create_ledger_channel(
        &self,
        counterparty: Address,
        challenge_duration: u32,
        outcome: Exit,
    ) -> Result<ObjectiveResponse, ClientError> {
        let request = ObjectiveRequest::DirectFund {
            counterparty,
            challenge_duration,
            outcome,
            app_definition: Address::ZERO,
            channel_nonce: rand::random(),
        };
        self.spawn(request).await
    }

    /// Concludes and defunds a ledger channel.
    pub async fn close_ledger_channel(
        &self,
        channel_id: Destination,
    ) -> Result<ObjectiveId, ClientError> {
        self.spawn(ObjectiveRequest::DirectDefund { channel_id })
            .await
            .map(|r| r.id)
    }

    /// Opens a virtual channel to `counterparty` through `intermediaries`.
    pub async fn create_virtual_channel(
        &self,
        intermediaries: Vec<Address>,
        counterparty: Address,
        challenge_duration: u32,
        outcome: Exit,
    ) -> Result<ObjectiveResponse, ClientError> {
        let request = ObjectiveRequest::VirtualFund {
            intermediaries,
            counterparty,
            challenge_duration,
            outcome,
            app_definition: Address::ZERO,
            channel_nonce: rand::random(),
        };
        self.spawn(request).await
    }

    /// Collapses a virtual channel back into its ledgers, settling the
    /// latest voucher.
    pub async fn close_virtual_channel(
        &self,
        channel_id: Destination,
    ) -> Result<ObjectiveId, ClientError> {
        self.spawn(ObjectiveRequest::VirtualDefund { channel_id })
            .await
            .map(|r| r.id)
    }

    /// Pays `amount` over a virtual channel by minting the next cumulative
    /// voucher.
    pub async fn pay(
        &self,
        channel_id: Destination,
        amount: U256,
    ) -> Result<ObjectiveId, ClientError> {
        self.spawn(ObjectiveRequest::Pay { channel_id, amount })
            .await
            .map(|r| r.id)
    }

    /// Approves an objective proposed by a peer.
    pub fn approve_objective(&self, id: ObjectiveId) -> Result<(), ClientError> {
        self.api
            .send(ApiEvent::approve(id))
            .map_err(|_| ClientError::EngineStopped)
    }

    /// Rejects an objective. Terminal.
    pub fn reject_objective(&self, id: ObjectiveId) -> Result<(), ClientError> {
        self.api
            .send(ApiEvent::reject(id))
            .map_err(|_| ClientError::EngineStopped)
    }

    /// Describes a ledger channel from the store's current view.
    pub async fn get_ledger_channel(
        &self,
        channel_id: Destination,
    ) -> Result<LedgerChannelInfo, ClientError> {
        query::ledger_channel_info(self.store.as_ref(), channel_id).await
    }

    /// Describes a payment (virtual) channel from the store's current view.
    pub async fn get_payment_channel(
        &self,
        channel_id: Destination,
    ) -> Result<PaymentChannelInfo, ClientError> {
        query::payment_channel_info(self.store.as_ref(), channel_id).await
    }

    async fn spawn(&self, request: ObjectiveRequest) -> Result<ObjectiveResponse, ClientError> {
        let id = request.id(self.my_address, self.chain_id);
        let channel_id = request.channel_id(self.my_address, self.chain_id);
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .api
            .send(ApiEvent::spawn_with_ack(request, ack_tx))
            .is_err()
        {
            warn!(%id, "api event dropped: engine stopped");
            return Err(ClientError::EngineStopped);
        }
        match ack_rx.await {
            Ok(Ok(spawned)) => Ok(ObjectiveResponse {
                id: spawned,
                channel_id,
            }),
            Ok(Err(reason)) => Err(ClientError::Refused(reason)),
            Err(_) => Err(ClientError::EngineStopped),
        }
    }
}
