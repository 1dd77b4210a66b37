//! The payment protocol: mint and deliver one voucher.
//!
//! A lightweight objective. Cranking signs a voucher for the new cumulative
//! amount and addresses it to the payee; the objective completes
//! immediately. Cumulative bookkeeping lives in the store's voucher info,
//! which the engine consults when constructing the objective.

use alloy_primitives::{Address, U256};
use conduit_crypto::SecretKey;
use conduit_primitives::Destination;
use serde::{Deserialize, Serialize};

use crate::{
    objective::{ObjectiveId, ObjectiveKind, ObjectiveStatus, WaitingFor},
    Message, ObjectiveEvent, SideEffects, TransitionError, Voucher,
};

/// The payment objective.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    status: ObjectiveStatus,
    /// The virtual channel the payment moves over.
    channel_id: Destination,
    /// The recipient of the voucher.
    payee: Address,
    /// The cumulative amount the minted voucher will carry: the channel's
    /// previous cumulative total plus this payment.
    cumulative: U256,
    /// The minted voucher, once cranked.
    voucher: Option<Voucher>,
}

impl Payment {
    /// Creates a payment objective. `cumulative` must already include this
    /// payment on top of the channel's previous total; the engine checks
    /// channel capacity before construction.
    pub fn new(channel_id: Destination, payee: Address, cumulative: U256) -> Self {
        Payment {
            status: ObjectiveStatus::Unapproved,
            channel_id,
            payee,
            cumulative,
            voucher: None,
        }
    }

    /// The objective id: `payment` over the channel id.
    pub fn id(&self) -> ObjectiveId {
        ObjectiveId::new(ObjectiveKind::Payment, self.channel_id)
    }

    /// Lifecycle status.
    pub fn status(&self) -> ObjectiveStatus {
        self.status
    }

    pub(crate) fn status_mut(&mut self) -> &mut ObjectiveStatus {
        &mut self.status
    }

    /// The cumulative amount the voucher carries.
    pub fn cumulative(&self) -> U256 {
        self.cumulative
    }

    /// The minted voucher, once the objective has been cranked.
    pub fn voucher(&self) -> Option<&Voucher> {
        self.voucher.as_ref()
    }

    /// Payments never own a channel; the virtual channel's fund and defund
    /// objectives do.
    pub fn owns(&self, _channel_id: &Destination) -> bool {
        false
    }

    /// The channel the payment moves over.
    pub fn related_channels(&self) -> Vec<Destination> {
        vec![self.channel_id]
    }

    /// Payments carry no inbound protocol state; events are absorbed.
    pub fn update(&self, _event: &ObjectiveEvent) -> Result<Payment, TransitionError> {
        Ok(self.clone())
    }

    /// Mints and signs the voucher, emits it to the payee, and completes.
    pub fn crank(
        &self,
        secret_key: &SecretKey,
    ) -> Result<(Payment, SideEffects, WaitingFor), TransitionError> {
        match self.status {
            ObjectiveStatus::Approved => {}
            // completion is absorbing
            ObjectiveStatus::Completed => {
                return Ok((self.clone(), SideEffects::none(), WaitingFor::Completed))
            }
            _ => return Err(TransitionError::NotApproved(self.id())),
        }
        let mut updated = self.clone();
        let mut effects = SideEffects::none();
        if updated.voucher.is_none() {
            let voucher = Voucher::new_signed(updated.channel_id, updated.cumulative, secret_key)?;
            updated.voucher = Some(voucher);
            effects
                .messages_to_send
                .push(Message::with_voucher(updated.payee, updated.id(), voucher));
        }
        updated.status = ObjectiveStatus::Completed;
        Ok((updated, effects, WaitingFor::Completed))
    }
}
