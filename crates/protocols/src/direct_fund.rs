//! The direct-fund protocol: open a channel funded straight on chain.
//!
//! Phases: exchange prefund signatures, deposit in ascending
//! participant-index order (a participant only deposits once every
//! lower-indexed participant's share is on chain), wait for full funding,
//! exchange postfund signatures, complete.

use alloy_primitives::Address;
use conduit_channel::{Channel, POSTFUND_TURN_NUM, PREFUND_TURN_NUM};
use conduit_crypto::SecretKey;
use conduit_primitives::{Destination, Funds, ParticipantIdx};
use conduit_state::{Exit, SignedState, State};
use serde::{Deserialize, Serialize};

use crate::{
    objective::{ObjectiveId, ObjectiveKind, ObjectiveStatus, WaitingFor},
    ChainTransaction, Message, ObjectiveEvent, SideEffects, TransitionError,
};

/// The direct-fund objective.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectFund {
    status: ObjectiveStatus,
    channel: Channel,
    /// Funds that must be on chain before it is safe for me to deposit:
    /// the sum of all lower-indexed participants' shares.
    my_deposit_safety_threshold: Funds,
    /// Holdings after my own deposit lands: safety threshold plus my share.
    my_deposit_target: Funds,
    /// The channel's full funding level: the outcome total.
    fully_funded_threshold: Funds,
    /// Set once the deposit transaction has been handed to the chain
    /// service, and persisted before dispatch, so the deposit is submitted
    /// at most once.
    transaction_submitted: bool,
}

impl DirectFund {
    /// Creates the objective on the proposing side. The proposer takes
    /// participant index 0.
    pub fn new(prefund: State, my_address: Address) -> Result<Self, TransitionError> {
        DirectFund::from_prefund(prefund, my_address)
    }

    /// Creates the objective from a received (or locally built) prefund
    /// state. My participant index is my position in the participant list.
    pub fn from_prefund(prefund: State, my_address: Address) -> Result<Self, TransitionError> {
        let channel_id = prefund.channel_id();
        let my_index = prefund
            .participants
            .iter()
            .position(|p| *p == my_address)
            .ok_or(TransitionError::NotMyChannel(channel_id))? as ParticipantIdx;
        let (safety, target, full) =
            funding_milestones(&prefund.outcome, &prefund.participants, my_index);
        let channel = Channel::new(prefund, my_index)?;
        Ok(DirectFund {
            status: ObjectiveStatus::Unapproved,
            channel,
            my_deposit_safety_threshold: safety,
            my_deposit_target: target,
            fully_funded_threshold: full,
            transaction_submitted: false,
        })
    }

    /// The objective id: `direct-fund` over the channel id.
    pub fn id(&self) -> ObjectiveId {
        ObjectiveId::new(ObjectiveKind::DirectFund, self.channel.id())
    }

    /// Lifecycle status.
    pub fn status(&self) -> ObjectiveStatus {
        self.status
    }

    pub(crate) fn status_mut(&mut self) -> &mut ObjectiveStatus {
        &mut self.status
    }

    /// The channel being funded.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// True iff `channel_id` is the funded channel: chain events for it are
    /// routed here.
    pub fn owns(&self, channel_id: &Destination) -> bool {
        self.channel.id() == *channel_id
    }

    /// The channels this objective accumulates signatures for.
    pub fn related_channels(&self) -> Vec<Destination> {
        vec![self.channel.id()]
    }

    /// Folds an observed event into the objective. Pure.
    pub fn update(&self, event: &ObjectiveEvent) -> Result<DirectFund, TransitionError> {
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
                    updated.channel.update_holdings(holdings)?;
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
    ) -> Result<(DirectFund, SideEffects, WaitingFor), TransitionError> {
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

        // prefund
        if !updated.channel.signed_by_me(PREFUND_TURN_NUM) {
            let ss = updated.channel.sign_turn(PREFUND_TURN_NUM, secret_key)?;
            effects
                .messages_to_send
                .extend(updated.broadcast(ss.clone()));
        }
        if !updated.channel.complete(PREFUND_TURN_NUM) {
            return Ok((updated, effects, WaitingFor::PrefundSignatures));
        }

        // funding
        if !updated
            .channel
            .holdings()
            .covers(&updated.fully_funded_threshold)
        {
            let holdings = updated.channel.holdings().clone();
            if !holdings.covers(&updated.my_deposit_safety_threshold) {
                return Ok((updated, effects, WaitingFor::MyTurnToFund));
            }
            if !holdings.covers(&updated.my_deposit_target) && !updated.transaction_submitted {
                let deposit = updated.my_deposit_target.saturating_sub(&holdings);
                effects
                    .transactions_to_submit
                    .push(ChainTransaction::Deposit {
                        channel_id: updated.channel.id(),
                        deposit,
                    });
                updated.transaction_submitted = true;
            }
            return Ok((updated, effects, WaitingFor::Deposit));
        }

        // postfund
        if !updated.channel.signed_by_me(POSTFUND_TURN_NUM) {
            let ss = updated.channel.sign_turn(POSTFUND_TURN_NUM, secret_key)?;
            effects
                .messages_to_send
                .extend(updated.broadcast(ss.clone()));
        }
        if !updated.channel.complete(POSTFUND_TURN_NUM) {
            return Ok((updated, effects, WaitingFor::PostfundSignatures));
        }

        updated.status = ObjectiveStatus::Completed;
        Ok((updated, effects, WaitingFor::Completed))
    }

    fn broadcast(&self, ss: SignedState) -> Vec<Message> {
        let id = self.id();
        let me = self.channel.my_address();
        self.channel
            .participants()
            .iter()
            .filter(|p| **p != me)
            .map(|peer| Message::with_signed_state(*peer, id, ss.clone()))
            .collect()
    }
}

/// Computes the three funding milestones for `my_index` from the prefund
/// outcome: the holdings that make my deposit safe, the holdings after my
/// deposit, and the fully funded level.
fn funding_milestones(
    outcome: &Exit,
    participants: &[Address],
    my_index: ParticipantIdx,
) -> (Funds, Funds, Funds) {
    let mut safety = Funds::new();
    for participant in participants.iter().take(my_index as usize) {
        let dest = Destination::from(*participant);
        for (asset, amount) in outcome.total_for(&dest).0 {
            safety.add(asset, amount);
        }
    }
    let mut target = safety.clone();
    let my_dest = Destination::from(participants[my_index as usize]);
    for (asset, amount) in outcome.total_for(&my_dest).0 {
        target.add(asset, amount);
    }
    (safety, target, outcome.total())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Bytes, U256};
    use conduit_crypto::address_from_secret_key;
    use conduit_primitives::AdjudicationStatus;
    use conduit_state::Allocation;

    fn keys() -> (SecretKey, SecretKey) {
        (
            SecretKey::from_slice(&[0x11; 32]).unwrap(),
            SecretKey::from_slice(&[0x22; 32]).unwrap(),
        )
    }

    fn prefund(alice: Address, bob: Address) -> State {
        State {
            chain_id: 1337,
            participants: vec![alice, bob],
            channel_nonce: 1,
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
        }
    }

    fn approved_pair() -> (DirectFund, DirectFund, SecretKey, SecretKey) {
        let (sk_a, sk_b) = keys();
        let alice = address_from_secret_key(&sk_a);
        let bob = address_from_secret_key(&sk_b);
        let state = prefund(alice, bob);
        let df_a = DirectFund::new(state.clone(), alice).unwrap();
        let df_b = DirectFund::from_prefund(state, bob).unwrap();
        let df_a = match Objective::DirectFund(df_a).approve().unwrap() {
            Objective::DirectFund(o) => o,
            _ => unreachable!(),
        };
        let df_b = match Objective::DirectFund(df_b).approve().unwrap() {
            Objective::DirectFund(o) => o,
            _ => unreachable!(),
        };
        (df_a, df_b, sk_a, sk_b)
    }

    use crate::Objective;

    #[test]
    fn milestones_follow_participant_index_order() {
        let (df_a, df_b, _, _) = approved_pair();
        let eth = Address::ZERO;
        assert_eq!(df_a.my_deposit_safety_threshold.amount(&eth), U256::ZERO);
        assert_eq!(df_a.my_deposit_target.amount(&eth), U256::from(100));
        assert_eq!(df_b.my_deposit_safety_threshold.amount(&eth), U256::from(100));
        assert_eq!(df_b.my_deposit_target.amount(&eth), U256::from(200));
        assert_eq!(df_b.fully_funded_threshold.amount(&eth), U256::from(200));
    }

    #[test]
    fn unapproved_objective_refuses_to_crank() {
        let (sk_a, sk_b) = keys();
        let alice = address_from_secret_key(&sk_a);
        let bob = address_from_secret_key(&sk_b);
        let df = DirectFund::new(prefund(alice, bob), alice).unwrap();
        assert!(matches!(
            df.crank(&sk_a),
            Err(TransitionError::NotApproved(_))
        ));
    }

    #[test]
    fn full_protocol_run_between_two_parties() {
        let (df_a, df_b, sk_a, sk_b) = approved_pair();
        let eth = Address::ZERO;

        // both sign the prefund
        let (df_a, fx_a, w_a) = df_a.crank(&sk_a).unwrap();
        assert_eq!(w_a, WaitingFor::PrefundSignatures);
        assert_eq!(fx_a.messages_to_send.len(), 1);
        let (df_b, fx_b, _) = df_b.crank(&sk_b).unwrap();

        // exchange prefund signatures
        let df_a = df_a
            .update(&ObjectiveEvent::SignedStates(
                fx_b.messages_to_send[0].signed_states.clone(),
            ))
            .unwrap();
        let df_b = df_b
            .update(&ObjectiveEvent::SignedStates(
                fx_a.messages_to_send[0].signed_states.clone(),
            ))
            .unwrap();

        // alice deposits first
        let (df_a, fx_a, w_a) = df_a.crank(&sk_a).unwrap();
        assert_eq!(w_a, WaitingFor::Deposit);
        assert!(matches!(
            &fx_a.transactions_to_submit[0],
            ChainTransaction::Deposit { deposit, .. } if deposit.amount(&eth) == U256::from(100)
        ));

        // bob must wait for alice's holdings to land
        let (df_b, fx_b, w_b) = df_b.crank(&sk_b).unwrap();
        assert_eq!(w_b, WaitingFor::MyTurnToFund);
        assert!(fx_b.transactions_to_submit.is_empty());

        // alice's deposit confirms
        let after_alice = ObjectiveEvent::ChainUpdate {
            channel_id: df_a.channel.id(),
            holdings: Funds::single(eth, U256::from(100)),
            status: AdjudicationStatus::Active,
            block_num: 1,
        };
        let df_b = df_b.update(&after_alice).unwrap();
        let df_a = df_a.update(&after_alice).unwrap();

        // now bob deposits
        let (df_b, fx_b, w_b) = df_b.crank(&sk_b).unwrap();
        assert_eq!(w_b, WaitingFor::Deposit);
        assert!(matches!(
            &fx_b.transactions_to_submit[0],
            ChainTransaction::Deposit { deposit, .. } if deposit.amount(&eth) == U256::from(100)
        ));

        // a re-crank does not resubmit
        let (df_b, fx_b2, _) = df_b.crank(&sk_b).unwrap();
        assert!(fx_b2.transactions_to_submit.is_empty());

        // full funding confirms, postfund exchange completes both sides
        let funded = ObjectiveEvent::ChainUpdate {
            channel_id: df_a.channel.id(),
            holdings: Funds::single(eth, U256::from(200)),
            status: AdjudicationStatus::Active,
            block_num: 2,
        };
        let df_a = df_a.update(&funded).unwrap();
        let df_b = df_b.update(&funded).unwrap();

        let (df_a, fx_a, w_a) = df_a.crank(&sk_a).unwrap();
        assert_eq!(w_a, WaitingFor::PostfundSignatures);
        let (df_b, fx_b, _) = df_b.crank(&sk_b).unwrap();

        let df_a = df_a
            .update(&ObjectiveEvent::SignedStates(
                fx_b.messages_to_send[0].signed_states.clone(),
            ))
            .unwrap();
        let df_b = df_b
            .update(&ObjectiveEvent::SignedStates(
                fx_a.messages_to_send[0].signed_states.clone(),
            ))
            .unwrap();

        let (df_a, _, w_a) = df_a.crank(&sk_a).unwrap();
        let (df_b, _, w_b) = df_b.crank(&sk_b).unwrap();
        assert_eq!(w_a, WaitingFor::Completed);
        assert_eq!(w_b, WaitingFor::Completed);
        assert_eq!(df_a.status(), ObjectiveStatus::Completed);
        assert_eq!(df_b.status(), ObjectiveStatus::Completed);
    }

    #[test]
    fn holdings_regression_is_an_error() {
        let (df_a, _, _, _) = approved_pair();
        let eth = Address::ZERO;
        let df_a = df_a
            .update(&ObjectiveEvent::ChainUpdate {
                channel_id: df_a.channel.id(),
                holdings: Funds::single(eth, U256::from(100)),
                status: AdjudicationStatus::Active,
                block_num: 1,
            })
            .unwrap();
        let err = df_a
            .update(&ObjectiveEvent::ChainUpdate {
                channel_id: df_a.channel.id(),
                holdings: Funds::single(eth, U256::from(10)),
                status: AdjudicationStatus::Active,
                block_num: 2,
            })
            .unwrap_err();
        assert!(err.is_validation());
    }
}
