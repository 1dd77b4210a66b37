//! Side-effects declared by cranking an objective.

use conduit_primitives::{Destination, Funds};
use conduit_state::SignedState;
use serde::{Deserialize, Serialize};

use crate::Message;

/// A transaction for the chain service to submit to the adjudicator.
///
/// Submission is fire-and-forget from the objective's viewpoint: the chain
/// service retries internally and success is confirmed by the corresponding
/// chain event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainTransaction {
    /// Deposit funds into the adjudicator against a channel.
    Deposit {
        /// The channel to fund.
        channel_id: Destination,
        /// The amount to add per asset.
        deposit: Funds,
    },
    /// Conclude a channel with a fully signed final state.
    Conclude {
        /// The channel to conclude.
        channel_id: Destination,
        /// The final state with its complete signature set.
        final_state: SignedState,
    },
}

impl ChainTransaction {
    /// The channel the transaction concerns.
    pub fn channel_id(&self) -> Destination {
        match self {
            ChainTransaction::Deposit { channel_id, .. } => *channel_id,
            ChainTransaction::Conclude { channel_id, .. } => *channel_id,
        }
    }
}

/// Everything a crank asks the engine to do on its behalf: messages for the
/// message service and transactions for the chain service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SideEffects {
    /// Messages to deliver to peers.
    pub messages_to_send: Vec<Message>,
    /// Transactions to submit to the adjudicator.
    pub transactions_to_submit: Vec<ChainTransaction>,
}

impl SideEffects {
    /// No side-effects.
    pub fn none() -> Self {
        SideEffects::default()
    }

    /// True iff there is nothing to dispatch.
    pub fn is_empty(&self) -> bool {
        self.messages_to_send.is_empty() && self.transactions_to_submit.is_empty()
    }

    /// Appends all of `other`'s effects to `self`.
    pub fn merge(&mut self, other: SideEffects) {
        self.messages_to_send.extend(other.messages_to_send);
        self.transactions_to_submit
            .extend(other.transactions_to_submit);
    }
}
