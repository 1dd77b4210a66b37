//! The closed set of objective variants and their uniform dispatch.

use conduit_channel::Channel;
use conduit_crypto::SecretKey;
use conduit_primitives::Destination;
use serde::{Deserialize, Serialize};

use crate::{
    DirectDefund, DirectFund, ObjectiveEvent, Payment, SideEffects, TransitionError,
    VirtualDefund, VirtualFund,
};

/// Discriminates the five built-in protocols.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectiveKind {
    /// Fund a channel directly on chain.
    DirectFund,
    /// Conclude and defund a directly-funded channel.
    DirectDefund,
    /// Fund a virtual channel through ledger guarantees.
    VirtualFund,
    /// Collapse a virtual channel back into its ledgers.
    VirtualDefund,
    /// Send a payment voucher over a virtual channel.
    Payment,
}

impl std::fmt::Display for ObjectiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectiveKind::DirectFund => write!(f, "direct-fund"),
            ObjectiveKind::DirectDefund => write!(f, "direct-defund"),
            ObjectiveKind::VirtualFund => write!(f, "virtual-fund"),
            ObjectiveKind::VirtualDefund => write!(f, "virtual-defund"),
            ObjectiveKind::Payment => write!(f, "payment"),
        }
    }
}

/// The globally unique id of an objective: its kind plus the id of the
/// channel the objective is primarily about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectiveId {
    /// Which protocol this objective runs.
    pub kind: ObjectiveKind,
    /// The primary channel of the objective.
    pub channel_id: Destination,
}

impl ObjectiveId {
    /// Builds the id for `kind` over `channel_id`.
    pub fn new(kind: ObjectiveKind, channel_id: Destination) -> Self {
        ObjectiveId { kind, channel_id }
    }
}

impl std::fmt::Display for ObjectiveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.kind, self.channel_id)
    }
}

/// Lifecycle status of an objective.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectiveStatus {
    /// Known but not yet approved for cranking.
    #[default]
    Unapproved,
    /// Actively cranked by the engine.
    Approved,
    /// Declined. Terminal.
    Rejected,
    /// Ran to completion. Terminal.
    Completed,
}

/// The condition an objective reported itself blocked on after its last
/// crank. Used for diagnostics and progress tracking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaitingFor {
    /// Waiting for the prefund signature set to complete.
    PrefundSignatures,
    /// Waiting for lower-indexed participants to deposit first.
    MyTurnToFund,
    /// Waiting for on-chain holdings to reach the funding target.
    Deposit,
    /// Waiting for the postfund signature set to complete.
    PostfundSignatures,
    /// Waiting for guarantee states on the funding ledgers to be supported.
    LedgerFunding,
    /// Waiting for the final state signature set to complete.
    FinalSignatures,
    /// Waiting for guarantee-collapsing ledger states to be supported.
    LedgerDefunding,
    /// Waiting for the adjudicator to finalize the channel.
    Finalization,
    /// Nothing: the objective has completed.
    Completed,
}

impl std::fmt::Display for WaitingFor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitingFor::PrefundSignatures => write!(f, "awaiting-prefund-signatures"),
            WaitingFor::MyTurnToFund => write!(f, "awaiting-my-turn-to-fund"),
            WaitingFor::Deposit => write!(f, "awaiting-deposit"),
            WaitingFor::PostfundSignatures => write!(f, "awaiting-postfund-signatures"),
            WaitingFor::LedgerFunding => write!(f, "awaiting-ledger-funding"),
            WaitingFor::FinalSignatures => write!(f, "awaiting-final-signatures"),
            WaitingFor::LedgerDefunding => write!(f, "awaiting-ledger-defunding"),
            WaitingFor::Finalization => write!(f, "awaiting-final-state-on-chain"),
            WaitingFor::Completed => write!(f, "completed"),
        }
    }
}

/// A polymorphic objective: a closed set of tagged variants, one per
/// protocol, dispatched by exhaustive matching.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::large_enum_variant)]
pub enum Objective {
    /// See [`DirectFund`].
    DirectFund(DirectFund),
    /// See [`DirectDefund`].
    DirectDefund(DirectDefund),
    /// See [`VirtualFund`].
    VirtualFund(VirtualFund),
    /// See [`VirtualDefund`].
    VirtualDefund(VirtualDefund),
    /// See [`Payment`].
    Payment(Payment),
}

impl Objective {
    /// The objective's globally unique id.
    pub fn id(&self) -> ObjectiveId {
        match self {
            Objective::DirectFund(o) => o.id(),
            Objective::DirectDefund(o) => o.id(),
            Objective::VirtualFund(o) => o.id(),
            Objective::VirtualDefund(o) => o.id(),
            Objective::Payment(o) => o.id(),
        }
    }

    /// The objective's lifecycle status.
    pub fn status(&self) -> ObjectiveStatus {
        match self {
            Objective::DirectFund(o) => o.status(),
            Objective::DirectDefund(o) => o.status(),
            Objective::VirtualFund(o) => o.status(),
            Objective::VirtualDefund(o) => o.status(),
            Objective::Payment(o) => o.status(),
        }
    }

    /// True once the objective can never be cranked again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status(),
            ObjectiveStatus::Rejected | ObjectiveStatus::Completed
        )
    }

    /// True iff `channel_id` is primary to this objective. Chain events for
    /// a channel are routed to the objective that owns it.
    pub fn owns(&self, channel_id: &Destination) -> bool {
        match self {
            Objective::DirectFund(o) => o.owns(channel_id),
            Objective::DirectDefund(o) => o.owns(channel_id),
            Objective::VirtualFund(o) => o.owns(channel_id),
            Objective::VirtualDefund(o) => o.owns(channel_id),
            Objective::Payment(o) => o.owns(channel_id),
        }
    }

    /// Every channel id this objective accumulates signatures for. Used to
    /// route inbound messages, including signatures on a ledger channel that
    /// unlock progress on a virtual-fund objective.
    pub fn related_channels(&self) -> Vec<Destination> {
        match self {
            Objective::DirectFund(o) => o.related_channels(),
            Objective::DirectDefund(o) => o.related_channels(),
            Objective::VirtualFund(o) => o.related_channels(),
            Objective::VirtualDefund(o) => o.related_channels(),
            Objective::Payment(o) => o.related_channels(),
        }
    }

    /// The working copies of channels held by this objective, for mirroring
    /// into the store after each crank.
    pub fn channels(&self) -> Vec<&Channel> {
        match self {
            Objective::DirectFund(o) => vec![o.channel()],
            Objective::DirectDefund(o) => vec![o.channel()],
            Objective::VirtualFund(o) => o.channels(),
            Objective::VirtualDefund(o) => o.channels(),
            Objective::Payment(_) => vec![],
        }
    }

    /// Pure merge of one observed event into the objective.
    pub fn update(&self, event: &ObjectiveEvent) -> Result<Objective, TransitionError> {
        match self {
            Objective::DirectFund(o) => o.update(event).map(Objective::DirectFund),
            Objective::DirectDefund(o) => o.update(event).map(Objective::DirectDefund),
            Objective::VirtualFund(o) => o.update(event).map(Objective::VirtualFund),
            Objective::VirtualDefund(o) => o.update(event).map(Objective::VirtualDefund),
            Objective::Payment(o) => o.update(event).map(Objective::Payment),
        }
    }

    /// Pure advance: returns the updated objective, the side-effects to
    /// dispatch, and the condition now blocking further progress.
    pub fn crank(
        &self,
        secret_key: &SecretKey,
    ) -> Result<(Objective, SideEffects, WaitingFor), TransitionError> {
        match self {
            Objective::DirectFund(o) => o
                .crank(secret_key)
                .map(|(o, fx, w)| (Objective::DirectFund(o), fx, w)),
            Objective::DirectDefund(o) => o
                .crank(secret_key)
                .map(|(o, fx, w)| (Objective::DirectDefund(o), fx, w)),
            Objective::VirtualFund(o) => o
                .crank(secret_key)
                .map(|(o, fx, w)| (Objective::VirtualFund(o), fx, w)),
            Objective::VirtualDefund(o) => o
                .crank(secret_key)
                .map(|(o, fx, w)| (Objective::VirtualDefund(o), fx, w)),
            Objective::Payment(o) => o
                .crank(secret_key)
                .map(|(o, fx, w)| (Objective::Payment(o), fx, w)),
        }
    }

    /// Marks the objective approved for cranking. Approving a rejected
    /// objective is an error: rejection is terminal.
    pub fn approve(&self) -> Result<Objective, TransitionError> {
        match self.status() {
            ObjectiveStatus::Rejected => Err(TransitionError::CannotApproveRejected(self.id())),
            ObjectiveStatus::Completed => Ok(self.clone()),
            ObjectiveStatus::Unapproved | ObjectiveStatus::Approved => {
                let mut updated = self.clone();
                *updated.status_mut() = ObjectiveStatus::Approved;
                Ok(updated)
            }
        }
    }

    /// Marks the objective rejected. Terminal.
    pub fn reject(&self) -> Result<Objective, TransitionError> {
        match self.status() {
            ObjectiveStatus::Completed => Err(TransitionError::CannotRejectCompleted(self.id())),
            _ => {
                let mut updated = self.clone();
                *updated.status_mut() = ObjectiveStatus::Rejected;
                Ok(updated)
            }
        }
    }

    fn status_mut(&mut self) -> &mut ObjectiveStatus {
        match self {
            Objective::DirectFund(o) => o.status_mut(),
            Objective::DirectDefund(o) => o.status_mut(),
            Objective::VirtualFund(o) => o.status_mut(),
            Objective::VirtualDefund(o) => o.status_mut(),
            Objective::Payment(o) => o.status_mut(),
        }
    }
}
