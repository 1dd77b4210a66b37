//! The direct-defund protocol: conclude a directly-funded channel.
//!
//! Requires a mutually signed final state. The conclude transaction is
//! submitted only if no peer is observed to have done so already; the
//! objective completes once the adjudicator reports the channel finalized.

use conduit_channel::Channel;
use conduit_crypto::SecretKey;
use conduit_primitives::{AdjudicationStatus, Destination};
use conduit_state::SignedState;
use serde::{Deserialize, Serialize};

use crate::{
    objective::{ObjectiveId, ObjectiveKind, ObjectiveStatus, WaitingFor},
    ChainTransaction, Message, ObjectiveEvent, SideEffects, TransitionError,
};

/// The direct-defund objective.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectDefund {
    status: ObjectiveStatus,
    channel: Channel,
    /// Turn number of the final state being gathered.
    final_turn: u64,
    /// Set when the conclude transaction is handed to the chain service, so
    /// it is submitted at most once.
    conclude_submitted: bool,
}

impl DirectDefund {
    /// Creates the objective from the channel's current supported state.
    ///
    /// The final state is the supported state with the next turn number and
    /// `is_final` set. Both peers derive the identical final state, so a
    /// received proposal merges into the locally constructed one.
    pub fn new(mut channel: Channel) -> Result<Self, TransitionError> {
        let supported = channel
            .latest_supported_state()
            .ok_or(TransitionError::NoSupportedState(channel.id()))?;
        let supported_state = supported.state().clone();
        let final_turn = if supported_state.is_final {
            supported_state.turn_num
        } else {
            let mut final_state = supported_state.clone_as_turn(supported_state.turn_num + 1);
            final_state.is_final = true;
            let turn = final_state.turn_num;
            channel.add_signed_state(&SignedState::new(final_state))?;
            turn
        };
        Ok(DirectDefund {
            status: ObjectiveStatus::Unapproved,
            channel,
            final_turn,
            conclude_submitted: false,
        })
    }

    /// The objective id: `direct-defund` over the channel id.
    pub fn id(&self) -> ObjectiveId {
        ObjectiveId::new(ObjectiveKind::DirectDefund, self.channel.id())
    }

    /// Lifecycle status.
    pub fn status(&self) -> ObjectiveStatus {
        self.status
    }

    pub(crate) fn status_mut(&mut self) -> &mut ObjectiveStatus {
        &mut self.status
    }

    /// The channel being concluded.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// True iff `channel_id` is the concluded channel.
    pub fn owns(&self, channel_id: &Destination) -> bool {
        self.channel.id() == *channel_id
    }

    /// The channels this objective accumulates signatures for.
    pub fn related_channels(&self) -> Vec<Destination> {
        vec![self.channel.id()]
    }

    /// Folds an observed event into the objective. Pure.
    pub fn update(&self, event: &ObjectiveEvent) -> Result<DirectDefund, TransitionError> {
        let mut updated = self.clone();
        match event {
            ObjectiveEvent::SignedStates(states) => {
                for ss in states {
                    if ss.state().channel_id() == updated.channel.id() {
                        updated.channel.add_signed_state(ss)?;
                    }
                }
            }
            ObjectiveEvent::ChainUpdate {
                channel_id,
                holdings,
                status,
                ..
            } => {
                if *channel_id == updated.channel.id() {
                    // holdings may only shrink while the adjudicator pays out
                    updated.channel.set_holdings(holdings.clone());
                    updated.channel.update_adjudication_status(*status);
                }
            }
        }
        Ok(updated)
    }

    /// Advances the protocol as far as local information permits. Pure.
    pub fn crank(
        &self,
        secret_key: &SecretKey,
    ) -> Result<(DirectDefund, SideEffects, WaitingFor), TransitionError> {
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

        // final state signatures
        if !updated.channel.signed_by_me(updated.final_turn) {
            let ss = updated.channel.sign_turn(updated.final_turn, secret_key)?;
            let id = updated.id();
            let me = updated.channel.my_address();
            for peer in updated.channel.participants().iter().filter(|p| **p != me) {
                effects
                    .messages_to_send
                    .push(Message::with_signed_state(*peer, id, ss.clone()));
            }
        }
        if !updated.channel.complete(updated.final_turn) {
            return Ok((updated, effects, WaitingFor::FinalSignatures));
        }

        // conclude, unless a peer already has
        if updated.channel.adjudication_status() != AdjudicationStatus::Finalized {
            if !updated.conclude_submitted {
                let final_state = updated
                    .channel
                    .state_at(updated.final_turn)
                    .expect("the final state was just completed")
                    .clone();
                effects
                    .transactions_to_submit
                    .push(ChainTransaction::Conclude {
                        channel_id: updated.channel.id(),
                        final_state,
                    });
                updated.conclude_submitted = true;
            }
            return Ok((updated, effects, WaitingFor::Finalization));
        }

        updated.status = ObjectiveStatus::Completed;
        Ok((updated, effects, WaitingFor::Completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};
    use conduit_crypto::address_from_secret_key;
    use conduit_primitives::Funds;
    use conduit_state::{Allocation, Exit, State};

    fn open_channel() -> (Channel, Channel, SecretKey, SecretKey) {
        let sk_a = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let sk_b = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let alice = address_from_secret_key(&sk_a);
        let bob = address_from_secret_key(&sk_b);
        let prefund = State {
            chain_id: 1337,
            participants: vec![alice, bob],
            channel_nonce: 9,
            app_definition: Address::ZERO,
            challenge_duration: 60,
            app_data: Bytes::new(),
            outcome: Exit::single_asset(
                Address::ZERO,
                vec![
                    Allocation::simple(Destination::from(alice), U256::from(100)),
                    Allocation::simple(Destination::from(bob), U256::from(100)),
                ],
            ),
            turn_num: 0,
            is_final: false,
        };
        let mut ch_a = Channel::new(prefund.clone(), 0).unwrap();
        let mut ch_b = Channel::new(prefund, 1).unwrap();
        for turn in [0u64, 1] {
            let ss_a = ch_a.sign_turn(turn, &sk_a).unwrap();
            ch_b.add_signed_state(&ss_a).unwrap();
            let ss_b = ch_b.sign_turn(turn, &sk_b).unwrap();
            ch_a.add_signed_state(&ss_b).unwrap();
        }
        let funds = Funds::single(Address::ZERO, U256::from(200));
        ch_a.update_holdings(&funds).unwrap();
        ch_b.update_holdings(&funds).unwrap();
        (ch_a, ch_b, sk_a, sk_b)
    }

    fn approve(dd: DirectDefund) -> DirectDefund {
        match crate::Objective::DirectDefund(dd).approve().unwrap() {
            crate::Objective::DirectDefund(o) => o,
            _ => unreachable!(),
        }
    }

    #[test]
    fn requires_a_supported_state() {
        let sk = SecretKey::from_slice(&[0x33; 32]).unwrap();
        let me = address_from_secret_key(&sk);
        let prefund = State {
            chain_id: 1,
            participants: vec![me, Address::repeat_byte(0x01)],
            channel_nonce: 1,
            app_definition: Address::ZERO,
            challenge_duration: 60,
            app_data: Bytes::new(),
            outcome: Exit::single_asset(Address::ZERO, vec![]),
            turn_num: 0,
            is_final: false,
        };
        let channel = Channel::new(prefund, 0).unwrap();
        assert!(matches!(
            DirectDefund::new(channel),
            Err(TransitionError::NoSupportedState(_))
        ));
    }

    #[test]
    fn concludes_once_and_completes_on_finalization() {
        let (ch_a, ch_b, sk_a, sk_b) = open_channel();
        let dd_a = approve(DirectDefund::new(ch_a).unwrap());
        let dd_b = approve(DirectDefund::new(ch_b).unwrap());

        // both sign the final state and exchange
        let (dd_a, fx_a, w_a) = dd_a.crank(&sk_a).unwrap();
        assert_eq!(w_a, WaitingFor::FinalSignatures);
        let (dd_b, fx_b, _) = dd_b.crank(&sk_b).unwrap();
        let dd_a = dd_a
            .update(&ObjectiveEvent::SignedStates(
                fx_b.messages_to_send[0].signed_states.clone(),
            ))
            .unwrap();
        let dd_b = dd_b
            .update(&ObjectiveEvent::SignedStates(
                fx_a.messages_to_send[0].signed_states.clone(),
            ))
            .unwrap();

        // alice cranks first and submits the conclude
        let (dd_a, fx_a, w_a) = dd_a.crank(&sk_a).unwrap();
        assert_eq!(w_a, WaitingFor::Finalization);
        assert!(matches!(
            fx_a.transactions_to_submit[0],
            ChainTransaction::Conclude { .. }
        ));
        let (dd_a, fx_again, _) = dd_a.crank(&sk_a).unwrap();
        assert!(fx_again.transactions_to_submit.is_empty());

        // bob observes finalization before cranking: no second conclude
        let finalized = ObjectiveEvent::ChainUpdate {
            channel_id: dd_b.channel.id(),
            holdings: Funds::single(Address::ZERO, U256::from(200)),
            status: AdjudicationStatus::Finalized,
            block_num: 3,
        };
        let dd_b = dd_b.update(&finalized).unwrap();
        let (dd_b, fx_b, w_b) = dd_b.crank(&sk_b).unwrap();
        assert!(fx_b.transactions_to_submit.is_empty());
        assert_eq!(w_b, WaitingFor::Completed);
        assert_eq!(dd_b.status(), ObjectiveStatus::Completed);

        let dd_a = dd_a.update(&finalized).unwrap();
        let (dd_a, _, w_a) = dd_a.crank(&sk_a).unwrap();
        assert_eq!(w_a, WaitingFor::Completed);
        assert_eq!(dd_a.status(), ObjectiveStatus::Completed);
    }
}
