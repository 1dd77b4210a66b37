//! An in-process adjudicator for tests and local development.
//!
//! One `MockChainService` is shared by every client in a test network, the
//! way the nodes of a real deployment share one blockchain. A single
//! background task owns the ledger, so all events carry strictly
//! increasing block numbers and per-channel event order equals submission
//! order.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use conduit_primitives::{AdjudicationStatus, Destination, Funds};
use conduit_protocols::ChainTransaction;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::{ChainError, ChainEvent, ChainService};

enum Command {
    Submit(ChainTransaction),
    Subscribe(oneshot::Sender<mpsc::UnboundedReceiver<ChainEvent>>),
}

/// The shared mock adjudicator.
#[derive(Debug)]
pub struct MockChainService {
    commands: mpsc::UnboundedSender<Command>,
    /// Keeps the ledger task alive for the service's lifetime.
    _driver: tokio::task::JoinHandle<()>,
}

#[derive(Default)]
struct Ledger {
    holdings: HashMap<Destination, Funds>,
    finalized: HashSet<Destination>,
    block_num: u64,
    subscribers: Vec<mpsc::UnboundedSender<ChainEvent>>,
}

impl Ledger {
    fn broadcast(&mut self, event: ChainEvent) {
        debug!(channel = %event.channel_id, block = event.block_num, status = %event.status, "chain event");
        self.subscribers
            .retain(|sub| sub.send(event.clone()).is_ok());
    }

    fn handle(&mut self, tx: ChainTransaction) {
        self.block_num += 1;
        match tx {
            ChainTransaction::Deposit {
                channel_id,
                deposit,
            } => {
                let holdings = self.holdings.entry(channel_id).or_default();
                for (asset, amount) in &deposit.0 {
                    holdings.add(*asset, *amount);
                }
                let status = if self.finalized.contains(&channel_id) {
                    AdjudicationStatus::Finalized
                } else {
                    AdjudicationStatus::Active
                };
                let event = ChainEvent {
                    channel_id,
                    holdings: holdings.clone(),
                    status,
                    block_num: self.block_num,
                };
                self.broadcast(event);
            }
            ChainTransaction::Conclude {
                channel_id,
                final_state,
            } => {
                if !final_state.complete() || !final_state.state().is_final {
                    warn!(channel = %channel_id, "rejecting conclude without a complete final signature set");
                    return;
                }
                // a second conclude for the same channel is a no-op
                if self.finalized.insert(channel_id) {
                    let holdings = self.holdings.entry(channel_id).or_default().clone();
                    let event = ChainEvent {
                        channel_id,
                        holdings,
                        status: AdjudicationStatus::Finalized,
                        block_num: self.block_num,
                    };
                    self.broadcast(event);
                }
            }
        }
    }
}

impl MockChainService {
    /// Starts the adjudicator task.
    pub fn new() -> Self {
        let (commands, mut command_rx) = mpsc::unbounded_channel::<Command>();
        let driver = tokio::spawn(async move {
            let mut ledger = Ledger::default();
            while let Some(command) = command_rx.recv().await {
                match command {
                    Command::Submit(tx) => ledger.handle(tx),
                    Command::Subscribe(reply) => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        ledger.subscribers.push(tx);
                        let _ = reply.send(rx);
                    }
                }
            }
        });
        MockChainService {
            commands,
            _driver: driver,
        }
    }
}

impl Default for MockChainService {
    fn default() -> Self {
        MockChainService::new()
    }
}

#[async_trait]
impl ChainService for MockChainService {
    async fn subscribe(&self) -> mpsc::UnboundedReceiver<ChainEvent> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Subscribe(reply)).is_err() {
            // driver gone: hand back a receiver that never yields
            let (_tx, rx) = mpsc::unbounded_channel();
            return rx;
        }
        rx.await.unwrap_or_else(|_| {
            let (_tx, rx) = mpsc::unbounded_channel();
            rx
        })
    }

    async fn submit(&self, tx: ChainTransaction) -> Result<(), ChainError> {
        if let ChainTransaction::Conclude {
            channel_id,
            final_state,
        } = &tx
        {
            if !final_state.complete() {
                return Err(ChainError::IncompleteConclude(*channel_id));
            }
        }
        self.commands
            .send(Command::Submit(tx))
            .map_err(|_| ChainError::ServiceAborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};

    #[tokio::test]
    async fn deposits_accumulate_and_broadcast_in_block_order() {
        let chain = MockChainService::new();
        let mut events_a = chain.subscribe().await;
        let mut events_b = chain.subscribe().await;

        let cid = Destination(alloy_primitives::B256::repeat_byte(0x01));
        let eth = Address::ZERO;
        chain
            .submit(ChainTransaction::Deposit {
                channel_id: cid,
                deposit: Funds::single(eth, U256::from(100)),
            })
            .await
            .unwrap();
        chain
            .submit(ChainTransaction::Deposit {
                channel_id: cid,
                deposit: Funds::single(eth, U256::from(100)),
            })
            .await
            .unwrap();

        for events in [&mut events_a, &mut events_b] {
            let first = events.recv().await.unwrap();
            assert_eq!(first.holdings.amount(&eth), U256::from(100));
            let second = events.recv().await.unwrap();
            assert_eq!(second.holdings.amount(&eth), U256::from(200));
            assert!(second.block_num > first.block_num);
            assert_eq!(second.status, AdjudicationStatus::Active);
        }
    }
}
