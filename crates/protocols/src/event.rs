//! Events folded into objectives by `update`.

use conduit_primitives::{AdjudicationStatus, BlockHeight, Destination, Funds};
use conduit_state::SignedState;

/// A single fact observed by the engine and handed to an objective.
///
/// `update` is a pure merge: it unions signatures, takes the per-asset max
/// of holdings, and adopts any non-unknown adjudication status. It never
/// produces a side-effect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectiveEvent {
    /// Newly received signed states, already signature-verified on ingest.
    SignedStates(Vec<SignedState>),

    /// A chain observation for one channel.
    ChainUpdate {
        /// The channel the adjudicator event concerns.
        channel_id: Destination,
        /// Cumulative funds held by the adjudicator for the channel.
        holdings: Funds,
        /// The adjudicator's status for the channel.
        status: AdjudicationStatus,
        /// The block the observation was made at.
        block_num: BlockHeight,
    },
}
