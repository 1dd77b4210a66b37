//! Error types for objective state transitions.

use alloy_primitives::U256;
use conduit_channel::ChannelError;
use conduit_primitives::Destination;
use conduit_state::StateError;
use thiserror::Error;

use crate::objective::ObjectiveId;

/// Errors raised by objective `update` and `crank` calls.
///
/// Validation errors leave the objective unchanged; the caller drops the
/// offending input and logs. Protocol errors mean the objective cannot make
/// further progress.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// Cranked an objective that is not in the Approved status.
    #[error("objective {0} is not approved and cannot be cranked")]
    NotApproved(ObjectiveId),

    /// Attempted to approve an objective that was already rejected.
    #[error("objective {0} is rejected; rejection is terminal")]
    CannotApproveRejected(ObjectiveId),

    /// Attempted to reject an objective that already completed.
    #[error("objective {0} already completed and cannot be rejected")]
    CannotRejectCompleted(ObjectiveId),

    /// The channel has no supported state to build on.
    #[error("channel {0} has no supported state")]
    NoSupportedState(Destination),

    /// A ledger channel required for a virtual channel is missing or not
    /// yet open.
    #[error("ledger channel {0} is not ready to fund a virtual channel")]
    LedgerNotReady(Destination),

    /// The ledger's supported outcome cannot cover the requested guarantee.
    #[error("ledger channel {0} holds insufficient funds for the guarantee")]
    InsufficientLedgerFunds(Destination),

    /// My address does not appear in the channel's participant list.
    #[error("local address is not a participant of channel {0}")]
    NotMyChannel(Destination),

    /// A proposed final outcome pays less than vouchers already received.
    #[error("final outcome pays {got}, but vouchers total {expected}")]
    PaidAmountTooLow {
        /// The cumulative amount redeemed by received vouchers.
        expected: U256,
        /// The amount the proposed final outcome pays.
        got: U256,
    },

    /// A received message proposed a malformed objective.
    #[error("bad proposal: {0}")]
    BadProposal(String),

    /// Channel-level validation failed (conflicting state, holdings
    /// regression, wrong channel, bad signature).
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// State encoding or signature handling failed.
    #[error(transparent)]
    State(#[from] StateError),
}

impl TransitionError {
    /// True for errors that should drop the offending input and leave the
    /// objective unchanged, rather than abort the objective.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TransitionError::Channel(_)
                | TransitionError::State(_)
                | TransitionError::BadProposal(_)
                | TransitionError::PaidAmountTooLow { .. }
        )
    }
}
