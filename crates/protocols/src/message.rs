//! The peer-to-peer message envelope.

use alloy_primitives::Address;
use conduit_state::{SignedState, StateError};
use serde::{Deserialize, Serialize};

use crate::{objective::ObjectiveId, voucher::Voucher};

/// A message between two channel clients.
///
/// Delivery is unordered and may duplicate; messages are small and
/// self-identifying, and objectives are idempotent under duplicate
/// signatures, so receivers tolerate reordering and replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The recipient.
    pub to: Address,
    /// The objective the payload pertains to.
    pub objective_id: ObjectiveId,
    /// Signed states for channels related to the objective.
    pub signed_states: Vec<SignedState>,
    /// Payment vouchers.
    pub vouchers: Vec<Voucher>,
}

impl Message {
    /// A message carrying a single signed state.
    pub fn with_signed_state(to: Address, objective_id: ObjectiveId, ss: SignedState) -> Self {
        Message {
            to,
            objective_id,
            signed_states: vec![ss],
            vouchers: Vec::new(),
        }
    }

    /// A message carrying a single voucher.
    pub fn with_voucher(to: Address, objective_id: ObjectiveId, voucher: Voucher) -> Self {
        Message {
            to,
            objective_id,
            signed_states: Vec::new(),
            vouchers: vec![voucher],
        }
    }

    /// Verifies every signature carried by the message against its claimed
    /// signer. Performed on ingest, before the engine routes the message.
    pub fn verify(&self) -> Result<(), StateError> {
        for ss in &self.signed_states {
            ss.verify()?;
        }
        for voucher in &self.vouchers {
            voucher.recover_signer()?;
        }
        Ok(())
    }
}
