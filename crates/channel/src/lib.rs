//! A node's local view of one channel.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use conduit_crypto::{SecretKey, Signature};
use conduit_primitives::{AdjudicationStatus, Destination, Funds, ParticipantIdx};
use conduit_state::{FixedPart, SignedState, State, StateError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The turn number of the prefund state every channel starts from.
pub const PREFUND_TURN_NUM: u64 = 0;
/// The turn number of the postfund state acknowledging on-chain funding.
pub const POSTFUND_TURN_NUM: u64 = 1;

/// Errors raised while folding observations into a channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel was constructed from a state that is not a prefund state.
    #[error("a channel must be constructed from a turn-0 prefund state, got turn {0}")]
    NotAPrefundState(u64),

    /// `my_index` fell outside the participant list.
    #[error("participant index {index} out of range for {participants} participants")]
    ParticipantIndexOutOfRange {
        /// The out-of-range index.
        index: ParticipantIdx,
        /// Number of participants in the channel.
        participants: usize,
    },

    /// A signed state for a different channel was offered.
    #[error("signed state for channel {got} offered to channel {want}")]
    WrongChannel {
        /// The id the signed state belongs to.
        got: Destination,
        /// The id of this channel.
        want: Destination,
    },

    /// A state with an already-signed turn number but a different hash was
    /// offered. Accepting it would let a signer equivocate.
    #[error("conflicting state for turn {turn}: a different state is already signed")]
    ConflictingState {
        /// The contested turn number.
        turn: u64,
    },

    /// Reported holdings fell below a previously observed amount.
    #[error("holdings for channel {0} regressed below an observed amount")]
    HoldingsRegressed(Destination),

    /// No state is recorded at the requested turn number.
    #[error("no state recorded at turn {0}")]
    MissingState(u64),

    /// Signature verification or state encoding failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// A local view of one channel: its signed states keyed by turn number, the
/// latest supported state, and the funds the adjudicator holds against it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    id: Destination,
    my_index: ParticipantIdx,
    signed_states: BTreeMap<u64, SignedState>,
    /// Highest turn number with a complete signature set. Never decreases.
    supported_turn: Option<u64>,
    holdings: Funds,
    adjudication_status: AdjudicationStatus,
}

impl Channel {
    /// Creates a channel from its prefund state. The prefund (turn 0) and
    /// postfund (turn 1) states are seeded immediately, unsigned.
    pub fn new(prefund: State, my_index: ParticipantIdx) -> Result<Self, ChannelError> {
        if prefund.turn_num != PREFUND_TURN_NUM {
            return Err(ChannelError::NotAPrefundState(prefund.turn_num));
        }
        let participants = prefund.participants.len();
        if my_index as usize >= participants {
            return Err(ChannelError::ParticipantIndexOutOfRange {
                index: my_index,
                participants,
            });
        }
        let id = prefund.channel_id();
        let postfund = prefund.clone_as_turn(POSTFUND_TURN_NUM);
        let mut signed_states = BTreeMap::new();
        signed_states.insert(PREFUND_TURN_NUM, SignedState::new(prefund));
        signed_states.insert(POSTFUND_TURN_NUM, SignedState::new(postfund));
        Ok(Channel {
            id,
            my_index,
            signed_states,
            supported_turn: None,
            holdings: Funds::new(),
            adjudication_status: AdjudicationStatus::Unknown,
        })
    }

    /// The channel id.
    pub fn id(&self) -> Destination {
        self.id
    }

    /// My position in the participant list.
    pub fn my_index(&self) -> ParticipantIdx {
        self.my_index
    }

    /// The participant list, in signing order.
    pub fn participants(&self) -> &[Address] {
        &self.prefund().state().participants
    }

    /// My on-chain address.
    pub fn my_address(&self) -> Address {
        self.participants()[self.my_index as usize]
    }

    /// The channel's fixed parameters.
    pub fn fixed_part(&self) -> FixedPart {
        self.prefund().state().fixed_part()
    }

    /// The prefund signed state. Always present.
    pub fn prefund(&self) -> &SignedState {
        self.signed_states
            .get(&PREFUND_TURN_NUM)
            .expect("channels are constructed with a prefund state")
    }

    /// The postfund signed state. Always present.
    pub fn postfund(&self) -> &SignedState {
        self.signed_states
            .get(&POSTFUND_TURN_NUM)
            .expect("channels are constructed with a postfund state")
    }

    /// The signed state at `turn`, if any.
    pub fn state_at(&self, turn: u64) -> Option<&SignedState> {
        self.signed_states.get(&turn)
    }

    /// The funds the adjudicator currently holds against this channel.
    pub fn holdings(&self) -> &Funds {
        &self.holdings
    }

    /// The adjudicator's status for this channel.
    pub fn adjudication_status(&self) -> AdjudicationStatus {
        self.adjudication_status
    }

    /// The turn number of the latest supported state, if any state is
    /// supported yet.
    pub fn supported_turn(&self) -> Option<u64> {
        self.supported_turn
    }

    /// The latest supported state: the highest turn number carrying a
    /// complete, verified signature set.
    pub fn latest_supported_state(&self) -> Option<&SignedState> {
        self.supported_turn.and_then(|t| self.signed_states.get(&t))
    }

    /// True iff every participant has signed the state at `turn`.
    pub fn complete(&self, turn: u64) -> bool {
        self.signed_states
            .get(&turn)
            .map(SignedState::complete)
            .unwrap_or(false)
    }

    /// True iff my signature is recorded for the state at `turn`.
    pub fn signed_by_me(&self, turn: u64) -> bool {
        self.signed_states
            .get(&turn)
            .map(|ss| ss.signed_by(self.my_index))
            .unwrap_or(false)
    }

    /// Folds an inbound signed state into the channel.
    ///
    /// A state for an already-recorded turn number must hash identically;
    /// otherwise some signer is equivocating and the whole input is rejected
    /// with [`ChannelError::ConflictingState`], leaving the channel
    /// untouched. Signatures are verified during the merge.
    pub fn add_signed_state(&mut self, incoming: &SignedState) -> Result<(), ChannelError> {
        let cid = incoming.state().channel_id();
        if cid != self.id {
            return Err(ChannelError::WrongChannel {
                got: cid,
                want: self.id,
            });
        }
        let turn = incoming.state().turn_num;
        match self.signed_states.get_mut(&turn) {
            Some(existing) => {
                if !existing.state().equal(incoming.state()) {
                    return Err(ChannelError::ConflictingState { turn });
                }
                existing.merge(incoming)?;
            }
            None => {
                incoming.verify()?;
                self.signed_states.insert(turn, incoming.clone());
            }
        }
        self.refresh_supported(turn);
        Ok(())
    }

    /// Signs the state recorded at `turn` and returns the updated signed
    /// state for transmission to peers.
    pub fn sign_turn(
        &mut self,
        turn: u64,
        secret_key: &SecretKey,
    ) -> Result<SignedState, ChannelError> {
        let ss = self
            .signed_states
            .get_mut(&turn)
            .ok_or(ChannelError::MissingState(turn))?;
        ss.sign(secret_key)?;
        let signed = ss.clone();
        self.refresh_supported(turn);
        Ok(signed)
    }

    /// Records a successor state proposal and signs it in one step.
    pub fn propose_state(
        &mut self,
        state: State,
        secret_key: &SecretKey,
    ) -> Result<SignedState, ChannelError> {
        let turn = state.turn_num;
        self.add_signed_state(&SignedState::new(state))?;
        self.sign_turn(turn, secret_key)
    }

    /// Adds a signature to the state at `turn` without signing locally.
    pub fn add_signature(&mut self, turn: u64, signature: Signature) -> Result<(), ChannelError> {
        let ss = self
            .signed_states
            .get_mut(&turn)
            .ok_or(ChannelError::MissingState(turn))?;
        ss.add_signature(signature)?;
        self.refresh_supported(turn);
        Ok(())
    }

    /// Folds a holdings observation into the channel. Holdings are
    /// cumulative, so observations merge by pointwise max; an observation
    /// strictly below a recorded amount is an error.
    pub fn update_holdings(&mut self, observed: &Funds) -> Result<(), ChannelError> {
        if observed.regressed_from(&self.holdings) {
            return Err(ChannelError::HoldingsRegressed(self.id));
        }
        self.holdings.merge_max(observed);
        Ok(())
    }

    /// Overwrites the recorded holdings. Used while defunding, when the
    /// adjudicator pays funds out and holdings legitimately decrease.
    pub fn set_holdings(&mut self, observed: Funds) {
        self.holdings = observed;
    }

    /// Adopts a non-unknown adjudication status.
    pub fn update_adjudication_status(&mut self, status: AdjudicationStatus) {
        if status != AdjudicationStatus::Unknown {
            self.adjudication_status = status;
        }
    }

    /// Total funds the prefund outcome requires on chain.
    pub fn total_to_fund(&self) -> Funds {
        self.prefund().state().outcome.total()
    }

    /// True iff the adjudicator holds enough to cover the prefund outcome.
    pub fn fully_funded(&self) -> bool {
        self.prefund().state().outcome.affords(&self.holdings)
    }

    fn refresh_supported(&mut self, touched_turn: u64) {
        if self.complete(touched_turn) {
            // the ratchet only ever moves up
            if self.supported_turn.map(|t| touched_turn > t).unwrap_or(true) {
                self.supported_turn = Some(touched_turn);
            }
        }
    }
}
