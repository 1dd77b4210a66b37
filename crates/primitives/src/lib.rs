//! Types that are used across the conduit state-channel client.

pub mod destination;
pub mod funds;

pub use destination::Destination;
pub use funds::Funds;

pub use alloy_primitives::{Address, B256, U256};

/// The chain id of the blockchain backing the channels.
pub type ChainId = u64;

/// The height of a block on the backing chain.
pub type BlockHeight = u64;

/// The index of a participant within a channel's participant list.
pub type ParticipantIdx = u32;

/// Status of a channel as reported by the on-chain adjudicator.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize, Hash,
)]
pub enum AdjudicationStatus {
    /// No adjudicator record has been observed for the channel.
    #[default]
    Unknown,
    /// The adjudicator holds funds for the channel and no finalization has occurred.
    Active,
    /// The adjudicator has finalized the channel outcome.
    Finalized,
}

impl std::fmt::Display for AdjudicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdjudicationStatus::Unknown => write!(f, "Unknown"),
            AdjudicationStatus::Active => write!(f, "Active"),
            AdjudicationStatus::Finalized => write!(f, "Finalized"),
        }
    }
}
