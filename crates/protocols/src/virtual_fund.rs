//! The virtual-fund protocol: open a channel funded by ledger guarantees.
//!
//! A virtual channel `V` between a payer and a payee is funded indirectly: a
//! guarantee allocation targeting `V` is added to each ledger channel along
//! the path. Endpoints span one ledger, intermediaries two. Ledger updates
//! are driven by *this* objective, so inbound signatures on a ledger channel
//! are routed here, not to the ledger's (long completed) direct-fund
//! objective.

use alloy_primitives::{Address, U256};
use conduit_channel::{Channel, POSTFUND_TURN_NUM, PREFUND_TURN_NUM};
use conduit_crypto::SecretKey;
use conduit_primitives::{Destination, ParticipantIdx};
use conduit_state::{Allocation, State};
use serde::{Deserialize, Serialize};

use crate::{
    objective::{ObjectiveId, ObjectiveKind, ObjectiveStatus, WaitingFor},
    Message, ObjectiveEvent, SideEffects, TransitionError,
};

/// One hop of the funding path: a working copy of the ledger channel between
/// two adjacent path participants, and the guarantee proposal made on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Working copy of the ledger channel. The authoritative copy lives in
    /// the store; the engine mirrors this one back after every crank.
    channel: Channel,
    /// The hop participant closer to the virtual channel's first peer.
    left: Address,
    /// The hop participant closer to the virtual channel's last peer.
    right: Address,
    /// Turn number of the guarantee successor once proposed.
    expected_turn: Option<u64>,
}

impl Connection {
    fn new(channel: Channel, left: Address, right: Address) -> Result<Self, TransitionError> {
        let participants = channel.participants();
        if participants.len() != 2
            || !participants.contains(&left)
            || !participants.contains(&right)
        {
            return Err(TransitionError::BadProposal(format!(
                "ledger channel {} does not connect {left} and {right}",
                channel.id()
            )));
        }
        Ok(Connection {
            channel,
            left,
            right,
            expected_turn: None,
        })
    }

    /// The ledger peer on the other side of this hop.
    fn counterparty(&self, me: Address) -> Address {
        if self.left == me {
            self.right
        } else {
            self.left
        }
    }

    /// The working copy of the ledger channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

/// The virtual-fund objective.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFund {
    status: ObjectiveStatus,
    /// The virtual channel being opened.
    v: Channel,
    /// The ledger between me and the path participant to my left.
    to_my_left: Option<Connection>,
    /// The ledger between me and the path participant to my right.
    to_my_right: Option<Connection>,
}

impl VirtualFund {
    /// Creates the objective from the virtual channel's prefund state and
    /// the adjacent ledger channels.
    ///
    /// The first participant of `v_prefund` supplies only `right_ledger`,
    /// the last only `left_ledger`, intermediaries both.
    pub fn new(
        v_prefund: State,
        my_address: Address,
        left_ledger: Option<Channel>,
        right_ledger: Option<Channel>,
    ) -> Result<Self, TransitionError> {
        let participants = v_prefund.participants.clone();
        if participants.len() < 3 {
            return Err(TransitionError::BadProposal(
                "a virtual channel needs at least one intermediary".into(),
            ));
        }
        let my_role = participants
            .iter()
            .position(|p| *p == my_address)
            .ok_or_else(|| TransitionError::NotMyChannel(v_prefund.channel_id()))?;

        let to_my_left = if my_role == 0 {
            None
        } else {
            let ledger = left_ledger.ok_or_else(|| {
                TransitionError::BadProposal("missing ledger to my left".into())
            })?;
            Some(Connection::new(
                ledger,
                participants[my_role - 1],
                participants[my_role],
            )?)
        };
        let to_my_right = if my_role == participants.len() - 1 {
            None
        } else {
            let ledger = right_ledger.ok_or_else(|| {
                TransitionError::BadProposal("missing ledger to my right".into())
            })?;
            Some(Connection::new(
                ledger,
                participants[my_role],
                participants[my_role + 1],
            )?)
        };

        let v = Channel::new(v_prefund, my_role as ParticipantIdx)?;
        Ok(VirtualFund {
            status: ObjectiveStatus::Unapproved,
            v,
            to_my_left,
            to_my_right,
        })
    }

    /// The objective id: `virtual-fund` over the virtual channel id.
    pub fn id(&self) -> ObjectiveId {
        ObjectiveId::new(ObjectiveKind::VirtualFund, self.v.id())
    }

    /// Lifecycle status.
    pub fn status(&self) -> ObjectiveStatus {
        self.status
    }

    pub(crate) fn status_mut(&mut self) -> &mut ObjectiveStatus {
        &mut self.status
    }

    /// The virtual channel being opened.
    pub fn virtual_channel(&self) -> &Channel {
        &self.v
    }

    /// True iff `channel_id` is the virtual channel itself. The ledgers are
    /// owned by their own direct objectives.
    pub fn owns(&self, channel_id: &Destination) -> bool {
        self.v.id() == *channel_id
    }

    /// The virtual channel plus every adjacent ledger: signatures on any of
    /// them are routed to this objective.
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
    pub fn update(&self, event: &ObjectiveEvent) -> Result<VirtualFund, TransitionError> {
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
    ) -> Result<(VirtualFund, SideEffects, WaitingFor), TransitionError> {
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

        // virtual prefund
        if !updated.v.signed_by_me(PREFUND_TURN_NUM) {
            let ss = updated.v.sign_turn(PREFUND_TURN_NUM, secret_key)?;
            for peer in updated.v.participants().iter().filter(|p| **p != me) {
                effects
                    .messages_to_send
                    .push(Message::with_signed_state(*peer, id, ss.clone()));
            }
        }
        if !updated.v.complete(PREFUND_TURN_NUM) {
            return Ok((updated, effects, WaitingFor::PrefundSignatures));
        }

        // guarantee funding on each adjacent ledger
        let v_prefund = updated.v.prefund().state().clone();
        let v_id = updated.v.id();
        let mut funding_pending = false;
        for side in [Side::Left, Side::Right] {
            let Some(connection) = updated.connection_on_mut(side) else {
                continue;
            };
            let turn = match connection.expected_turn {
                None => {
                    let successor = guarantee_successor(
                        &connection.channel,
                        &v_prefund,
                        v_id,
                        connection.left,
                        connection.right,
                    )?;
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
                funding_pending = true;
            }
        }
        if funding_pending {
            return Ok((updated, effects, WaitingFor::LedgerFunding));
        }

        // virtual postfund
        if !updated.v.signed_by_me(POSTFUND_TURN_NUM) {
            let ss = updated.v.sign_turn(POSTFUND_TURN_NUM, secret_key)?;
            for peer in updated.v.participants().iter().filter(|p| **p != me) {
                effects
                    .messages_to_send
                    .push(Message::with_signed_state(*peer, id, ss.clone()));
            }
        }
        if !updated.v.complete(POSTFUND_TURN_NUM) {
            return Ok((updated, effects, WaitingFor::PostfundSignatures));
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

/// Builds the ledger successor state that adds a guarantee funding `v_id`.
///
/// Every party on the hop derives this state from the ledger's supported
/// state and the virtual prefund outcome alone, so all derivations hash
/// identically and signatures merge.
pub(crate) fn guarantee_successor(
    ledger: &Channel,
    v_prefund: &State,
    v_id: Destination,
    left: Address,
    right: Address,
) -> Result<State, TransitionError> {
    let supported = ledger
        .latest_supported_state()
        .ok_or(TransitionError::LedgerNotReady(ledger.id()))?;
    let mut successor = supported
        .state()
        .clone_as_turn(supported.state().turn_num + 1);

    let payer_dest = Destination::from(v_prefund.participants[0]);
    let payee_dest = Destination::from(
        v_prefund.participants[v_prefund.participants.len() - 1],
    );

    for v_exit in &v_prefund.outcome.0 {
        let left_share = v_exit.total_for(&payer_dest);
        let right_share = v_exit.total_for(&payee_dest);
        let total = v_exit.total();
        if total == U256::ZERO {
            continue;
        }
        if left_share.saturating_add(right_share) != total {
            return Err(TransitionError::BadProposal(
                "virtual outcome allocates funds to a non-endpoint".into(),
            ));
        }
        let ledger_exit = successor
            .outcome
            .0
            .iter_mut()
            .find(|e| e.asset == v_exit.asset)
            .ok_or(TransitionError::InsufficientLedgerFunds(ledger.id()))?;
        deduct(ledger_exit, &Destination::from(left), left_share, ledger.id())?;
        deduct(ledger_exit, &Destination::from(right), right_share, ledger.id())?;
        ledger_exit
            .allocations
            .push(Allocation::guarantee(v_id, total, left, right));
    }
    Ok(successor)
}

fn deduct(
    exit: &mut conduit_state::SingleAssetExit,
    from: &Destination,
    amount: U256,
    ledger_id: Destination,
) -> Result<(), TransitionError> {
    if amount == U256::ZERO {
        return Ok(());
    }
    let allocation = exit
        .allocations
        .iter_mut()
        .find(|a| a.destination == *from)
        .ok_or(TransitionError::InsufficientLedgerFunds(ledger_id))?;
    allocation.amount = allocation
        .amount
        .checked_sub(amount)
        .ok_or(TransitionError::InsufficientLedgerFunds(ledger_id))?;
    Ok(())
}
