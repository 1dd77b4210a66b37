//! The chain service: submits adjudicator transactions and relays chain
//! events.
//!
//! Submission is fire-and-forget: the service retries internally and
//! confirms success by emitting the corresponding event. Events for any one
//! channel are delivered strictly in block order.

pub mod mock;

pub use mock::MockChainService;

use async_trait::async_trait;
use conduit_primitives::{AdjudicationStatus, BlockHeight, Destination, Funds};
use conduit_protocols::ChainTransaction;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by chain submissions.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// The service has shut down and no more events will be delivered.
    #[error("chain service has been aborted, no more events should be expected")]
    ServiceAborted,

    /// A conclude transaction did not carry a complete signature set.
    #[error("conclude for channel {0} is missing signatures")]
    IncompleteConclude(Destination),
}

/// An observation of the adjudicator's record for one channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainEvent {
    /// The channel the observation concerns.
    pub channel_id: Destination,
    /// Cumulative funds held against the channel, per asset.
    pub holdings: Funds,
    /// The adjudicator's status for the channel.
    pub status: AdjudicationStatus,
    /// The block the observation was made at.
    pub block_num: BlockHeight,
}

/// A chain service: an outbound ordered event stream and an inbound
/// transaction sink.
#[async_trait]
pub trait ChainService: Send + Sync {
    /// Registers a new subscriber. Every event after the subscription is
    /// delivered to every subscriber, in block order.
    async fn subscribe(&self) -> mpsc::UnboundedReceiver<ChainEvent>;

    /// Submits a transaction to the adjudicator. Fire-and-forget.
    async fn submit(&self, tx: ChainTransaction) -> Result<(), ChainError>;
}
