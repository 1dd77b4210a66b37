//! Unified error type for everything that can happen in the engine.

use alloy_primitives::{Address, U256};
use conduit_chain::ChainError;
use conduit_messaging::MessageError;
use conduit_primitives::Destination;
use conduit_protocols::{ObjectiveId, TransitionError};
use conduit_store::StoreError;
use thiserror::Error;

/// Everything the engine's handlers can fail with.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The store failed. Fatal: the engine aborts before dispatching any
    /// side-effect for the current event.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// The chain service refused a submission.
    #[error("chain service failure: {0}")]
    Chain(#[from] ChainError),

    /// The message service refused a submission.
    #[error("message service failure: {0}")]
    Message(#[from] MessageError),

    /// An objective could not process an event or crank.
    #[error("objective transition failed: {0}")]
    Transition(#[from] TransitionError),

    /// An API event named an objective the store does not hold.
    #[error("no objective found with id {0}")]
    UnknownObjective(ObjectiveId),

    /// An API event named a channel the store does not hold.
    #[error("no channel found with id {0}")]
    UnknownChannel(Destination),

    /// No open ledger channel connects the two peers.
    #[error("no ledger channel between {0} and {1}")]
    NoLedgerBetween(Address, Address),

    /// A payment would exceed the channel's spending capacity.
    #[error(
        "payment over {channel_id} would raise the cumulative total to {requested}, above the capacity {capacity}"
    )]
    PaymentExceedsCapacity {
        /// The channel being paid over.
        channel_id: Destination,
        /// The cumulative total the payment would reach.
        requested: U256,
        /// The payer's total allocation in the channel.
        capacity: U256,
    },

    /// A payment was requested over a channel I am not the payer of.
    #[error("local address is not the payer of channel {0}")]
    NotThePayer(Destination),

    /// A request named a participant path that does not include me.
    #[error("local address {0} is not on the requested path")]
    NotOnPath(Address),
}

impl EngineError {
    /// True for errors that must stop the engine rather than drop the
    /// event: persistence failures leave no safe way to continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Store(_))
    }
}
