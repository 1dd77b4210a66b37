//! Durable storage for objectives, channels, vouchers, and key material.
//!
//! The store is the single point of mutation authority for objectives and
//! channels. The engine persists an objective *before* dispatching any of
//! its side-effects, so after a crash and restart every objective can be
//! reconstructed with every signature it observed.

pub mod durable;
pub mod memory;

pub use durable::DurableStore;
pub use memory::MemStore;

use async_trait::async_trait;
use conduit_channel::{Channel, ChannelError};
use conduit_crypto::SecretKey;
use conduit_primitives::{Destination, ParticipantIdx};
use conduit_protocols::{Objective, ObjectiveId, VoucherInfo, WaitingFor};
use conduit_state::State;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key prefix for objective records.
pub const OBJECTIVE_PREFIX: &str = "obj/";
/// Key prefix for channel records.
pub const CHANNEL_PREFIX: &str = "chan/";
/// Key prefix for voucher bookkeeping records.
pub const VOUCHER_PREFIX: &str = "voucher/";
/// Key prefix for progress records.
pub const PROGRESS_PREFIX: &str = "progress/";
/// Key of the channel secret key singleton.
pub const SECRET_KEY_KEY: &str = "sk";

/// Errors raised by store operations. All of them are fatal to the event
/// being processed: the engine aborts before dispatching any side-effect,
/// preserving the pre-event state on disk.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store has no secret key; the node cannot operate.
    #[error("the store holds no channel secret key")]
    MissingSecretKey,

    /// A channel could not be constructed from the offered prefund state.
    #[error("cannot create channel: {0}")]
    BadChannel(#[from] ChannelError),

    /// A stored value failed to decode; the store is corrupt.
    #[error("corrupt store value under key {key}: {reason}")]
    Corrupt {
        /// The key whose value failed to decode.
        key: String,
        /// Decoder error text.
        reason: String,
    },

    /// The persistence engine failed. Fatal for the current event.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// A progress record: the blocking condition last reported by an objective
/// and when it was reported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// What the objective reported itself blocked on.
    pub waiting_for: WaitingFor,
    /// Seconds since the unix epoch at the time of the report.
    pub updated_at_secs: u64,
}

/// The durable mapping from ids to objectives and channels, plus the
/// singleton key material.
///
/// `set_objective` is atomic: once it returns, a crash followed by a
/// restart yields a store from which the same objective, including every
/// signature it observed, is reconstructed.
#[async_trait]
pub trait Store: Send + Sync {
    /// Loads an objective by id.
    async fn get_objective(&self, id: &ObjectiveId) -> Result<Option<Objective>, StoreError>;

    /// Atomically persists an objective, replacing any prior version.
    async fn set_objective(&self, objective: &Objective) -> Result<(), StoreError>;

    /// The single non-terminal objective that *owns* `channel_id`. Chain
    /// events for the channel are routed to this objective.
    async fn get_objective_by_channel(
        &self,
        channel_id: &Destination,
    ) -> Result<Option<Objective>, StoreError>;

    /// Every non-terminal objective whose related channels include
    /// `channel_id`. Message routing uses this, which is what lets a ledger
    /// signature reach the virtual-fund objective embedded around it.
    async fn objectives_by_channel(
        &self,
        channel_id: &Destination,
    ) -> Result<Vec<Objective>, StoreError>;

    /// Every stored objective.
    async fn list_objectives(&self) -> Result<Vec<Objective>, StoreError>;

    /// Loads a channel by id.
    async fn get_channel(&self, channel_id: &Destination) -> Result<Option<Channel>, StoreError>;

    /// Persists a channel, replacing any prior version.
    async fn set_channel(&self, channel: &Channel) -> Result<(), StoreError>;

    /// Every stored channel. Used to locate the ledger between two peers
    /// when constructing virtual-channel objectives.
    async fn list_channels(&self) -> Result<Vec<Channel>, StoreError>;

    /// Returns the stored channel for the prefund's id, creating and
    /// persisting a fresh one when none exists yet.
    async fn get_or_create_channel(
        &self,
        prefund: State,
        my_index: ParticipantIdx,
    ) -> Result<Channel, StoreError> {
        if let Some(existing) = self.get_channel(&prefund.channel_id()).await? {
            return Ok(existing);
        }
        let channel = Channel::new(prefund, my_index)?;
        self.set_channel(&channel).await?;
        Ok(channel)
    }

    /// Loads the voucher bookkeeping for a channel, defaulting to zeroes.
    async fn get_voucher_info(&self, channel_id: &Destination)
        -> Result<VoucherInfo, StoreError>;

    /// Persists the voucher bookkeeping for a channel.
    async fn set_voucher_info(
        &self,
        channel_id: &Destination,
        info: &VoucherInfo,
    ) -> Result<(), StoreError>;

    /// The channel secret key this node signs with.
    async fn get_channel_secret_key(&self) -> Result<SecretKey, StoreError>;

    /// Installs the channel secret key. Called once at bootstrap.
    async fn set_channel_secret_key(&self, secret_key: &SecretKey) -> Result<(), StoreError>;

    /// Records that `id` made progress, together with its new blocking
    /// condition. Long-blocked objectives are detectable by this timestamp.
    async fn progress_last_made_at(
        &self,
        id: &ObjectiveId,
        waiting_for: WaitingFor,
    ) -> Result<(), StoreError>;

    /// The last recorded progress for `id`, if any.
    async fn get_progress(&self, id: &ObjectiveId) -> Result<Option<ProgressRecord>, StoreError>;
}

pub(crate) fn objective_key(id: &ObjectiveId) -> String {
    format!("{OBJECTIVE_PREFIX}{id}")
}

pub(crate) fn channel_key(id: &Destination) -> String {
    format!("{CHANNEL_PREFIX}{id}")
}

pub(crate) fn voucher_key(id: &Destination) -> String {
    format!("{VOUCHER_PREFIX}{id}")
}

pub(crate) fn progress_key(id: &ObjectiveId) -> String {
    format!("{PROGRESS_PREFIX}{id}")
}

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
