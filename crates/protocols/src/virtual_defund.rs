//! The virtual-defund protocol: collapse a virtual channel into its ledgers.
//!
//! The final outcome of the virtual channel is the prefund outcome shifted
//! by the cumulative amount paid (the latest voucher). Once the final state
//! is supported, each ledger replaces its guarantee with plain allocations
//! paying each hop participant their net share.

use alloy_primitives::{Address, U256};
use conduit_channel::Channel;
use conduit_crypto::SecretKey;
use conduit_primitives::Destination;
use conduit_state::{Allocation, AllocationType, SignedState, State};
use serde::{Deserialize, Serialize};

use crate::{
    objective::{ObjectiveId, ObjectiveKind, ObjectiveStatus, WaitingFor},
    Message, ObjectiveEvent, SideEffects, TransitionError,
};

/// Turn number of the final state closing a virtual channel.
pub const VIRTUAL_FINAL_TURN_NUM: u64 = 2;

/// One hop of the defunding path, mirroring
/// [`virtual_fund::Connection`](crate::virtual_fund::Connection).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    channel: Channel,
    left: Address,
    right: Address,
    expected_turn: Option<u64>,
}

impl Connection {
    fn counterparty(&self, me: Address) -> Address {
        if self.left == me {
            self.right
        } else {
            self.left
        }
    }
}

/// The virtual-defund objective.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDefund {
    status: ObjectiveStatus,
    /// The virtual channel being closed.
    v: Channel,
    /// The cumulative amount paid over the channel, fixed at construction.
    paid: U256,
    to_my_left: Option<Connection>,
    to_my_right: Option<Connection>,
}

impl VirtualDefund {
    /// Creates the objective over an open virtual channel.
    ///
    /// `paid` is the cumulative voucher amount being settled. The final
    /// state is derived deterministically from the prefund outcome and
    /// `paid`, so every participant who agrees on the voucher derives the
    /// identical final state.
    pub fn new(
        mut v: Channel,
        paid: U256,
        left_ledger: Option<Channel>,
        right_ledger: Option<Channel>,
    ) -> Result<Self, TransitionError> {
        if v.latest_supported_state().is_none() {
            return Err(TransitionError::NoSupportedState(v.id()));
        }
        let final_state = final_state(v.prefund().state(), paid)?;
        v.add_signed_state(&SignedState::new(final_state))?;

        let participants = v.participants().to_vec();
        let my_role = v.my_index() as usize;
        let me = participants[my_role];
        let to_my_left = match (my_role, left_ledger) {
            (0, _) => None,
            (_, Some(ledger)) => Some(Connection {
                channel: ledger,
                left: participants[my_role - 1],
                right: me,
                expected_turn: None,
            }),
            (_, None) => {
                return Err(TransitionError::BadProposal(
                    "missing ledger to my left".into(),
                ))
            }
        };
        let to_my_right = if my_role == participants.len() - 1 {
            None
        } else {
            let ledger = right_ledger.ok_or_else(|| {
                TransitionError::BadProposal("missing ledger to my right".into())
            })?;
            Some(Connection {
                channel: ledger,
                left: me,
                right: participants[my_role + 1],
                expected_turn: None,
            })
        };

        Ok(VirtualDefund {
            status: ObjectiveStatus::Unapproved,
            v,
            paid,
            to_my_left,
            to_my_right,
        })
    }

    /// Derives the cumulative paid amount encoded in a proposed final state,
    /// by comparing the payee's allocation against the prefund outcome.
    pub fn paid_from_final_state(
        v: &Channel,
        proposed: &State,
    ) -> Result<U256, TransitionError> {
        let prefund = v.prefund().state();
        if proposed.turn_num != VIRTUAL_FINAL_TURN_NUM || !proposed.is_final {
            return Err(TransitionError::BadProposal(
                "not a final virtual state".into(),
            ));
        }
        let payee = Destination::from(
            prefund.participants[prefund.participants.len() - 1],
        );
        let asset = prefund
            .outcome
            .0
            .first()
            .map(|e| e.asset)
            .ok_or_else(|| TransitionError::BadProposal("empty outcome".into()))?;
        let before = prefund.outcome.total_for(&payee).amount(&asset);
        let after = proposed.outcome.total_for(&payee).amount(&asset);
        after
            .checked_sub(before)
            .ok_or_else(|| TransitionError::BadProposal("payee allocation shrank".into()))
    }

    /// The objective id: `virtual-defund` over the virtual channel id.
    pub fn id(&self) -> ObjectiveId {
        ObjectiveId::new(ObjectiveKind::VirtualDefund, self.v.id())
    }

    /// Lifecycle status.
    pub fn status(&self) -> ObjectiveStatus {
        self.status
    }

    pub(crate) fn status_mut(&mut self) -> &mut ObjectiveStatus {
        &mut self.status
    }

    /// The virtual channel being closed.
    pub fn virtual_channel(&self) -> &Channel {
        &self.v
    }

    /// The cumulative amount this close settles.
    pub fn paid(&self) -> U256 {
        self.paid
    }

    /// True iff `channel_id` is the virtual channel itself.
    pub fn owns(&self, channel_id: &Destination) -> bool {
        self.v.id() == *channel_id
    }

    /// The virtual channel plus every adjacent ledger.
    pub fn related_channels(&self) -> Vec<Destination> {
        let mut ids = vec![self.v.id()];
        if let Some(c) = &self.to_my_left {
            ids.push(c.channel.id());
        }
        if let Some(c) = &self.to_my_right {
            ids.push(c.channel.id());
        }
        ids
    }

    /// Working copies of every channel this objective mutates.
    pub fn channels(&self) -> Vec<&Channel> {
        let mut out = vec![&self.v];
        if let Some(c) = &self.to_my_left {
            out.push(&c.channel);
        }
        if let Some(c) = &self.to_my_right {
            out.push(&c.channel);
        }
        out
    }

    /// Folds an observed event into the objective. Pure.
    pub fn update(&self, event: &ObjectiveEvent) -> Result<VirtualDefund, TransitionError> {
        let mut updated = self.clone();
        match event {
            ObjectiveEvent::SignedStates(states) => {
                for ss in states {
                    let cid = ss.state().channel_id();
                    if cid == updated.v.id() {
                        updated.v.add_signed_state(ss)?;
                    } else if let Some(c) = updated.connection_mut(&cid) {
                        c.channel.add_signed_state(ss)?;
                    }
                }
            }
            ObjectiveEvent::ChainUpdate {
                channel_id,
                holdings,
                status,
                ..
            } => {
                if let Some(c) = updated.connection_mut(channel_id) {
                    c.channel.update_holdings(holdings)?;
                    c.channel.update_adjudication_status(*status);
                }
            }
        }
        Ok(updated)
    }

    /// Advances the protocol as far as local information permits. Pure.
    pub fn crank(
        &self,
        secret_key: &SecretKey,
    ) -> Result<(VirtualDefund, SideEffects, WaitingFor), TransitionError> {
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
        let id = updated.id();
        let me = updated.v.my_address();

        // final state signatures
        if !updated.v.signed_by_me(VIRTUAL_FINAL_TURN_NUM) {
            let ss = updated.v.sign_turn(VIRTUAL_FINAL_TURN_NUM, secret_key)?;
            for peer in updated.v.participants().iter().filter(|p| **p != me) {
                effects
                    .messages_to_send
                    .push(Message::with_signed_state(*peer, id, ss.clone()));
            }
        }
        if !updated.v.complete(VIRTUAL_FINAL_TURN_NUM) {
            return Ok((updated, effects, WaitingFor::FinalSignatures));
        }

        // collapse the guarantee on each adjacent ledger
        let final_outcome = updated
            .v
            .state_at(VIRTUAL_FINAL_TURN_NUM)
            .expect("the final state was just completed")
            .state()
            .clone();
        let v_id = updated.v.id();
        let mut defunding_pending = false;
        for side in [Side::Left, Side::Right] {
            let Some(connection) = updated.connection_on_mut(side) else {
                continue;
            };
            let turn = match connection.expected_turn {
                None => {
                    let successor =
                        collapse_successor(&connection.channel, &final_outcome, v_id)?;
                    let turn = successor.turn_num;
                    let ss = connection.channel.propose_state(successor, secret_key)?;
                    connection.expected_turn = Some(turn);
                    let to = connection.counterparty(me);
                    effects
                        .messages_to_send
                        .push(Message::with_signed_state(to, id, ss));
                    turn
                }
                Some(turn) => {
                    if !connection.channel.signed_by_me(turn) {
                        let ss = connection.channel.sign_turn(turn, secret_key)?;
                        let to = connection.counterparty(me);
                        effects
                            .messages_to_send
                            .push(Message::with_signed_state(to, id, ss));
                    }
                    turn
                }
            };
            if !connection.channel.complete(turn) {
                defunding_pending = true;
            }
        }
        if defunding_pending {
            return Ok((updated, effects, WaitingFor::LedgerDefunding));
        }

        updated.status = ObjectiveStatus::Completed;
        Ok((updated, effects, WaitingFor::Completed))
    }

    fn connection_mut(&mut self, channel_id: &Destination) -> Option<&mut Connection> {
        if let Some(c) = &mut self.to_my_left {
            if c.channel.id() == *channel_id {
                return Some(c);
            }
        }
        if let Some(c) = &mut self.to_my_right {
            if c.channel.id() == *channel_id {
                return Some(c);
            }
        }
        None
    }

    fn connection_on_mut(&mut self, side: Side) -> Option<&mut Connection> {
        match side {
            Side::Left => self.to_my_left.as_mut(),
            Side::Right => self.to_my_right.as_mut(),
        }
    }
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

/// Builds the final state for a virtual channel: the prefund outcome with
/// `paid` moved from the payer's allocation to the payee's.
fn final_state(prefund: &State, paid: U256) -> Result<State, TransitionError> {
    let mut state = prefund.clone_as_turn(VIRTUAL_FINAL_TURN_NUM);
    state.is_final = true;
    let payer = Destination::from(prefund.participants[0]);
    let payee = Destination::from(prefund.participants[prefund.participants.len() - 1]);
    let exit = state
        .outcome
        .0
        .first_mut()
        .ok_or_else(|| TransitionError::BadProposal("empty outcome".into()))?;
    shift(exit, &payer, &payee, paid)?;
    Ok(state)
}

fn shift(
    exit: &mut conduit_state::SingleAssetExit,
    payer: &Destination,
    payee: &Destination,
    paid: U256,
) -> Result<(), TransitionError> {
    let payer_alloc = exit
        .allocations
        .iter_mut()
        .find(|a| a.destination == *payer)
        .ok_or_else(|| TransitionError::BadProposal("payer has no allocation".into()))?;
    payer_alloc.amount = payer_alloc.amount.checked_sub(paid).ok_or(
        TransitionError::PaidAmountTooLow {
            expected: paid,
            got: payer_alloc.amount,
        },
    )?;
    let payee_alloc = exit
        .allocations
        .iter_mut()
        .find(|a| a.destination == *payee)
        .ok_or_else(|| TransitionError::BadProposal("payee has no allocation".into()))?;
    payee_alloc.amount = payee_alloc.amount.saturating_add(paid);
    Ok(())
}

/// Builds the ledger successor state that replaces the guarantee funding
/// `v_id` with plain allocations paying each hop participant their share of
/// the virtual channel's final outcome.
fn collapse_successor(
    ledger: &Channel,
    v_final: &State,
    v_id: Destination,
) -> Result<State, TransitionError> {
    let supported = ledger
        .latest_supported_state()
        .ok_or(TransitionError::LedgerNotReady(ledger.id()))?;
    let mut successor = supported
        .state()
        .clone_as_turn(supported.state().turn_num + 1);

    let payer_dest = Destination::from(v_final.participants[0]);
    let payee_dest = Destination::from(v_final.participants[v_final.participants.len() - 1]);

    for exit in &mut successor.outcome.0 {
        let Some(pos) = exit.allocations.iter().position(|a| {
            a.allocation_type == AllocationType::Guarantee && a.destination == v_id
        }) else {
            continue;
        };
        let guarantee = exit.allocations.remove(pos);
        let meta = guarantee.guarantee_metadata()?;
        let left_share = v_final.outcome.total_for(&payer_dest).amount(&exit.asset);
        let right_share = v_final.outcome.total_for(&payee_dest).amount(&exit.asset);
        credit(exit, &Destination::from(meta.left), left_share);
        credit(exit, &Destination::from(meta.right), right_share);
    }
    Ok(successor)
}

fn credit(exit: &mut conduit_state::SingleAssetExit, to: &Destination, amount: U256) {
    if amount == U256::ZERO {
        return;
    }
    match exit.allocations.iter_mut().find(|a| a.destination == *to) {
        Some(allocation) => allocation.amount = allocation.amount.saturating_add(amount),
        None => exit
            .allocations
            .push(Allocation::simple(*to, amount)),
    }
}

#[cfg(test)]
mod tests;
