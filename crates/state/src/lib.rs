//! The immutable channel state value, its outcome, and the canonical ABI
//! encodings both are hashed and signed under.

pub mod outcome;
pub mod signed_state;
pub mod state;

pub use outcome::{
    Allocation, AllocationType, Exit, GuaranteeMetadata, SingleAssetExit,
};
pub use signed_state::SignedState;
pub use state::{FixedPart, State};

use thiserror::Error;

/// Errors arising from encoding, decoding, or signature accumulation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    /// An ABI blob did not decode to the expected shape.
    #[error("abi decoding failed: {0}")]
    AbiDecode(String),

    /// An allocation carried an unknown allocation-type byte.
    #[error("unknown allocation type: {0}")]
    UnknownAllocationType(u8),

    /// A numeric field exceeded its native width.
    #[error("numeric field out of range: {0}")]
    NumericOverflow(String),

    /// A signature did not recover to any participant of the state.
    #[error("signature recovered to {0}, which is not a participant")]
    NotAParticipant(alloy_primitives::Address),

    /// A signature claimed a participant index it does not recover to.
    #[error("signature for participant {claimed} recovered to a different participant")]
    WrongParticipant {
        /// The index the signature was presented under.
        claimed: u32,
    },

    /// Two signed states for different state hashes were merged.
    #[error("cannot merge signatures gathered over different states")]
    StateMismatch,

    /// An error bubbled up from signing or recovery.
    #[error(transparent)]
    Crypto(#[from] conduit_crypto::CryptoError),
}
