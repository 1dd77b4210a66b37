//! The engine: a single-threaded event reactor.
//!
//! One cooperative task pulls from three inbound queues (API calls, chain
//! events, peer messages) through a fair select and processes each event to
//! completion: route to the target objective, `update`, `crank`, persist
//! the result, and only then dispatch the declared side-effects. Persisting
//! before dispatching is what makes crash recovery sound: a restarted
//! engine re-cranks its stored objectives and resumes where it left off.

pub mod errors;
pub mod events;
mod spawn;

pub use errors::EngineError;
pub use events::ApiEvent;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use alloy_primitives::Address;
use conduit_chain::{ChainEvent, ChainService};
use conduit_crypto::{address_from_secret_key, SecretKey};
use conduit_messaging::MessageService;
use conduit_primitives::ChainId;
use conduit_protocols::{
    Message, Objective, ObjectiveEvent, ObjectiveId, ObjectiveStatus, SideEffects, Voucher,
    WaitingFor,
};
use conduit_store::Store;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// The sending/receiving ends the engine hands back to its owner.
pub struct EngineHandles {
    /// Enqueue API events here.
    pub api: mpsc::UnboundedSender<ApiEvent>,
    /// Ids of objectives that reached completion, each emitted once.
    pub completed_objectives: mpsc::UnboundedReceiver<ObjectiveId>,
    /// Validated vouchers received from peers.
    pub received_vouchers: mpsc::UnboundedReceiver<Voucher>,
}

/// The event reactor. Owns the inbound queues and all objective mutation.
pub struct Engine {
    my_address: Address,
    chain_id: ChainId,
    /// Loaded once from the store; never leaves this task.
    secret_key: SecretKey,
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainService>,
    messenger: Arc<dyn MessageService>,
    from_api: mpsc::UnboundedReceiver<ApiEvent>,
    from_chain: mpsc::UnboundedReceiver<ChainEvent>,
    from_msg: mpsc::UnboundedReceiver<Message>,
    completed_tx: mpsc::UnboundedSender<ObjectiveId>,
    vouchers_tx: mpsc::UnboundedSender<Voucher>,
    /// Completion ids already emitted; the stream sees each id at most once.
    emitted_completions: HashSet<ObjectiveId>,
}

impl Engine {
    /// Binds an engine to its services. The secret key must already be in
    /// the store; a missing key is a fatal startup error.
    pub async fn new(
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainService>,
        messenger: Arc<dyn MessageService>,
        from_msg: mpsc::UnboundedReceiver<Message>,
        chain_id: ChainId,
    ) -> Result<(Engine, EngineHandles), EngineError> {
        let secret_key = store.get_channel_secret_key().await?;
        let my_address = address_from_secret_key(&secret_key);
        let from_chain = chain.subscribe().await;

        let (api_tx, from_api) = mpsc::unbounded_channel();
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let (vouchers_tx, vouchers_rx) = mpsc::unbounded_channel();

        let engine = Engine {
            my_address,
            chain_id,
            secret_key,
            store,
            chain,
            messenger,
            from_api,
            from_chain,
            from_msg,
            completed_tx,
            vouchers_tx,
            emitted_completions: HashSet::new(),
        };
        let handles = EngineHandles {
            api: api_tx,
            completed_objectives: completed_rx,
            received_vouchers: vouchers_rx,
        };
        Ok((engine, handles))
    }

    /// The address this engine signs as.
    pub fn address(&self) -> Address {
        self.my_address
    }

    /// Runs the reactor until every inbound queue closes or a fatal error
    /// occurs. Resumes stored objectives first, so a restarted node picks
    /// up exactly where the persisted state left off.
    pub async fn run(mut self) -> Result<(), EngineError> {
        info!(address = %self.my_address, chain_id = self.chain_id, "engine starting");
        self.resume_stored_objectives().await?;

        loop {
            let result = tokio::select! {
                Some(api_event) = self.from_api.recv() => self.handle_api_event(api_event).await,
                Some(chain_event) = self.from_chain.recv() => self.handle_chain_event(chain_event).await,
                Some(message) = self.from_msg.recv() => self.handle_message(message).await,
                else => {
                    info!("all inbound queues closed; engine stopping");
                    return Ok(());
                }
            };
            if let Err(err) = result {
                if err.is_fatal() {
                    error!(%err, "fatal engine error");
                    return Err(err);
                }
                warn!(%err, "event dropped");
            }
        }
    }

    /// Cranks every approved, non-terminal stored objective once. This is
    /// the crash-recovery path: side-effects persisted-but-undispatched at
    /// the time of a crash are re-derived and re-sent.
    async fn resume_stored_objectives(&mut self) -> Result<(), EngineError> {
        let stored = self.store.list_objectives().await?;
        for objective in stored {
            if objective.status() == ObjectiveStatus::Completed {
                self.emitted_completions.insert(objective.id());
                continue;
            }
            if !objective.is_terminal() && objective.status() == ObjectiveStatus::Approved {
                debug!(id = %objective.id(), "resuming stored objective");
                self.progress_objective(objective, None).await?;
            }
        }
        Ok(())
    }

    /// Handles a message from a peer: verify signatures on ingest, process
    /// vouchers, then route signed states to every non-terminal objective
    /// whose related channels overlap them.
    async fn handle_message(&mut self, message: Message) -> Result<(), EngineError> {
        if let Err(err) = message.verify() {
            warn!(objective = %message.objective_id, %err, "dropping message with bad signatures");
            return Ok(());
        }
        debug!(
            objective = %message.objective_id,
            states = message.signed_states.len(),
            vouchers = message.vouchers.len(),
            "handling message"
        );

        for voucher in &message.vouchers {
            self.handle_voucher(voucher).await?;
        }
        if message.signed_states.is_empty() {
            return Ok(());
        }

        // route to the named objective plus every objective that shares a
        // channel with the payload (the virtual-fund-via-ledger case)
        let mut targets: BTreeMap<ObjectiveId, Objective> = BTreeMap::new();
        if let Some(objective) = self.store.get_objective(&message.objective_id).await? {
            if !objective.is_terminal() {
                targets.insert(objective.id(), objective);
            }
        } else if let Some(objective) =
            spawn::from_message(self.store.as_ref(), &message, self.my_address).await?
        {
            // a new objective proposed by a peer: permissive policy approves
            let objective = objective.approve()?;
            info!(id = %objective.id(), "constructed objective from peer message");
            self.store.set_objective(&objective).await?;
            targets.insert(objective.id(), objective);
        }
        for ss in &message.signed_states {
            let cid = ss.state().channel_id();
            for objective in self.store.objectives_by_channel(&cid).await? {
                targets.entry(objective.id()).or_insert(objective);
            }
        }
        if targets.is_empty() {
            // replays for terminal objectives land here; they are a no-op
            debug!(objective = %message.objective_id, "no live objective for message");
            return Ok(());
        }

        let event = ObjectiveEvent::SignedStates(message.signed_states.clone());
        for (_, objective) in targets {
            self.progress_objective(objective, Some(event.clone()))
                .await?;
        }
        Ok(())
    }

    /// Handles one chain event: route to the unique non-terminal objective
    /// owning the channel.
    async fn handle_chain_event(&mut self, event: ChainEvent) -> Result<(), EngineError> {
        debug!(channel = %event.channel_id, block = event.block_num, "handling chain event");
        let objective_event = ObjectiveEvent::ChainUpdate {
            channel_id: event.channel_id,
            holdings: event.holdings.clone(),
            status: event.status,
            block_num: event.block_num,
        };
        match self.store.get_objective_by_channel(&event.channel_id).await? {
            Some(objective) => {
                self.progress_objective(objective, Some(objective_event))
                    .await
            }
            None => {
                // no live objective: still fold the observation into the
                // stored channel so queries stay accurate
                if let Some(mut channel) = self.store.get_channel(&event.channel_id).await? {
                    channel.set_holdings(event.holdings);
                    channel.update_adjudication_status(event.status);
                    self.store.set_channel(&channel).await?;
                } else {
                    debug!(channel = %event.channel_id, "chain event for unknown channel");
                }
                Ok(())
            }
        }
    }

    /// Handles one API event. Rejection takes precedence over approval of
    /// the same id.
    async fn handle_api_event(&mut self, event: ApiEvent) -> Result<(), EngineError> {
        if let Some(id) = event.objective_to_reject {
            let objective = self
                .store
                .get_objective(&id)
                .await?
                .ok_or(EngineError::UnknownObjective(id))?;
            let rejected = objective.reject()?;
            self.store.set_objective(&rejected).await?;
            info!(%id, "objective rejected");
        }

        if let Some(id) = event.objective_to_approve {
            if event.objective_to_reject == Some(id) {
                warn!(%id, "approve and reject for the same id; rejection wins");
            } else {
                let objective = self
                    .store
                    .get_objective(&id)
                    .await?
                    .ok_or(EngineError::UnknownObjective(id))?;
                let approved = objective.approve()?;
                self.progress_objective(approved, None).await?;
            }
        }

        if let Some(request) = event.objective_to_spawn {
            let ack = event.spawn_ack;
            match spawn::from_request(self.store.as_ref(), &request, self.my_address, self.chain_id)
                .await
            {
                Ok(objective) => {
                    // locally spawned objectives are pre-approved
                    let objective = objective.approve()?;
                    let id = objective.id();
                    info!(%id, "spawned objective");

                    // a payment advances the cumulative voucher total before
                    // any side-effect leaves the node
                    if let Objective::Payment(payment) = &objective {
                        let cid = id.channel_id;
                        let mut info = self.store.get_voucher_info(&cid).await?;
                        info.largest_sent = payment.cumulative();
                        self.store.set_voucher_info(&cid, &info).await?;
                    }

                    self.progress_objective(objective, None).await?;
                    if let Some(ack) = ack {
                        let _ = ack.send(Ok(id));
                    }
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(%err, "objective spawn refused");
                    if let Some(ack) = ack {
                        let _ = ack.send(Err(err.to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validates a received voucher, persists the new cumulative total, and
    /// surfaces the voucher on the received-voucher stream.
    async fn handle_voucher(&mut self, voucher: &Voucher) -> Result<(), EngineError> {
        let Some(channel) = self.store.get_channel(&voucher.channel_id).await? else {
            warn!(channel = %voucher.channel_id, "voucher for unknown channel");
            return Ok(());
        };
        let payer = *channel
            .participants()
            .first()
            .expect("channels always have participants");
        match voucher.recover_signer() {
            Ok(signer) if signer == payer => {}
            Ok(signer) => {
                warn!(channel = %voucher.channel_id, %signer, "voucher not signed by the payer");
                return Ok(());
            }
            Err(err) => {
                warn!(channel = %voucher.channel_id, %err, "voucher signature invalid");
                return Ok(());
            }
        }

        let mut info = self.store.get_voucher_info(&voucher.channel_id).await?;
        if voucher.amount <= info.largest_received {
            debug!(channel = %voucher.channel_id, amount = %voucher.amount, "stale voucher ignored");
            return Ok(());
        }
        let capacity = spawn::capacity_of(&channel, payer);
        if voucher.amount > capacity {
            warn!(channel = %voucher.channel_id, amount = %voucher.amount, %capacity, "voucher exceeds channel capacity");
            return Ok(());
        }

        info.largest_received = voucher.amount;
        self.store
            .set_voucher_info(&voucher.channel_id, &info)
            .await?;
        let _ = self.vouchers_tx.send(*voucher);
        Ok(())
    }

    /// The uniform progression path: update with the event (if any), crank,
    /// persist the updated objective and its channels, dispatch the
    /// side-effects, record progress, and emit completion once.
    async fn progress_objective(
        &mut self,
        objective: Objective,
        event: Option<ObjectiveEvent>,
    ) -> Result<(), EngineError> {
        let id = objective.id();

        let objective = match event {
            Some(event) => match objective.update(&event) {
                Ok(updated) => updated,
                Err(err) if err.is_validation() => {
                    // drop the offending input, leave the objective as it was
                    warn!(%id, %err, "invalid input dropped");
                    return Ok(());
                }
                Err(err) => {
                    warn!(%id, %err, "objective cannot continue; rejecting");
                    let rejected = objective.reject()?;
                    self.store.set_objective(&rejected).await?;
                    return Ok(());
                }
            },
            None => objective,
        };

        if objective.status() != ObjectiveStatus::Approved {
            self.store.set_objective(&objective).await?;
            return Ok(());
        }

        let (objective, effects, waiting_for) = match objective.crank(&self.secret_key) {
            Ok(result) => result,
            Err(err) if err.is_validation() => {
                warn!(%id, %err, "crank made no progress");
                self.store.set_objective(&objective).await?;
                return Ok(());
            }
            Err(err) => {
                warn!(%id, %err, "objective cannot continue; rejecting");
                let rejected = objective.reject()?;
                self.store.set_objective(&rejected).await?;
                return Ok(());
            }
        };

        // persist before any side-effect leaves the node
        self.store.set_objective(&objective).await?;
        for channel in objective.channels() {
            self.store.set_channel(channel).await?;
        }

        self.dispatch(effects).await;

        let prior = self.store.get_progress(&id).await?;
        if prior.map(|p| p.waiting_for) != Some(waiting_for) {
            self.store.progress_last_made_at(&id, waiting_for).await?;
        }

        if waiting_for == WaitingFor::Completed && self.emitted_completions.insert(id) {
            info!(%id, "objective completed");
            let _ = self.completed_tx.send(id);
        }
        Ok(())
    }

    /// Dispatches side-effects. Sends are non-blocking submissions to the
    /// services; transient failures are the services' concern.
    async fn dispatch(&mut self, effects: SideEffects) {
        for message in effects.messages_to_send {
            debug!(to = %message.to, objective = %message.objective_id, "sending message");
            if let Err(err) = self.messenger.send(message).await {
                warn!(%err, "message submission failed");
            }
        }
        for transaction in effects.transactions_to_submit {
            debug!(channel = %transaction.channel_id(), "submitting chain transaction");
            if let Err(err) = self.chain.submit(transaction).await {
                warn!(%err, "chain submission failed");
            }
        }
    }
}
