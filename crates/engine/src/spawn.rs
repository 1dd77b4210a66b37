//! Objective construction: from local API requests and from inbound
//! messages that name an unknown objective id.

use alloy_primitives::{Address, Bytes};
use conduit_channel::Channel;
use conduit_primitives::{ChainId, Destination};
use conduit_protocols::{
    DirectDefund, DirectFund, Message, Objective, ObjectiveKind, ObjectiveRequest, Payment,
    VirtualDefund, VirtualFund,
};
use conduit_state::{SignedState, State};
use conduit_store::Store;

use crate::EngineError;

/// Builds an objective for a local API request, reading channels and
/// voucher bookkeeping from the store as needed.
pub(crate) async fn from_request(
    store: &dyn Store,
    request: &ObjectiveRequest,
    my_address: Address,
    chain_id: ChainId,
) -> Result<Objective, EngineError> {
    match request {
        ObjectiveRequest::DirectFund {
            counterparty,
            challenge_duration,
            outcome,
            app_definition,
            channel_nonce,
        } => {
            let prefund = State {
                chain_id,
                participants: vec![my_address, *counterparty],
                channel_nonce: *channel_nonce,
                app_definition: *app_definition,
                challenge_duration: *challenge_duration,
                app_data: Bytes::new(),
                outcome: outcome.clone(),
                turn_num: 0,
                is_final: false,
            };
            Ok(Objective::DirectFund(DirectFund::new(prefund, my_address)?))
        }

        ObjectiveRequest::DirectDefund { channel_id } => {
            let channel = store
                .get_channel(channel_id)
                .await?
                .ok_or(EngineError::UnknownChannel(*channel_id))?;
            Ok(Objective::DirectDefund(DirectDefund::new(channel)?))
        }

        ObjectiveRequest::VirtualFund {
            intermediaries,
            counterparty,
            challenge_duration,
            outcome,
            app_definition,
            channel_nonce,
        } => {
            let mut participants = Vec::with_capacity(intermediaries.len() + 2);
            participants.push(my_address);
            participants.extend_from_slice(intermediaries);
            participants.push(*counterparty);
            let prefund = State {
                chain_id,
                participants: participants.clone(),
                channel_nonce: *channel_nonce,
                app_definition: *app_definition,
                challenge_duration: *challenge_duration,
                app_data: Bytes::new(),
                outcome: outcome.clone(),
                turn_num: 0,
                is_final: false,
            };
            let (left, right) = adjacent_ledgers(store, &participants, my_address).await?;
            Ok(Objective::VirtualFund(VirtualFund::new(
                prefund, my_address, left, right,
            )?))
        }

        ObjectiveRequest::VirtualDefund { channel_id } => {
            let v = store
                .get_channel(channel_id)
                .await?
                .ok_or(EngineError::UnknownChannel(*channel_id))?;
            let info = store.get_voucher_info(channel_id).await?;
            let participants = v.participants().to_vec();
            let paid = if participants.first() == Some(&my_address) {
                info.largest_sent
            } else {
                info.largest_received
            };
            let (left, right) = adjacent_ledgers(store, &participants, my_address).await?;
            Ok(Objective::VirtualDefund(VirtualDefund::new(
                v, paid, left, right,
            )?))
        }

        ObjectiveRequest::Pay { channel_id, amount } => {
            let v = store
                .get_channel(channel_id)
                .await?
                .ok_or(EngineError::UnknownChannel(*channel_id))?;
            let participants = v.participants();
            if participants.first() != Some(&my_address) {
                return Err(EngineError::NotThePayer(*channel_id));
            }
            let payee = *participants
                .last()
                .expect("channels always have participants");
            let info = store.get_voucher_info(channel_id).await?;
            let requested = info.largest_sent.saturating_add(*amount);
            let capacity = capacity_of(&v, my_address);
            if requested > capacity {
                return Err(EngineError::PaymentExceedsCapacity {
                    channel_id: *channel_id,
                    requested,
                    capacity,
                });
            }
            Ok(Objective::Payment(Payment::new(
                *channel_id,
                payee,
                requested,
            )))
        }
    }
}

/// Builds an objective for an inbound message whose objective id is not in
/// the store. Returns `None` for kinds that never spawn remotely.
pub(crate) async fn from_message(
    store: &dyn Store,
    message: &Message,
    my_address: Address,
) -> Result<Option<Objective>, EngineError> {
    let target_cid = message.objective_id.channel_id;
    match message.objective_id.kind {
        ObjectiveKind::DirectFund => {
            let Some(prefund) = prefund_for(message, target_cid) else {
                return Ok(None);
            };
            let objective = DirectFund::from_prefund(prefund.state().clone(), my_address)?;
            Ok(Some(Objective::DirectFund(objective)))
        }

        ObjectiveKind::DirectDefund => {
            let channel = store
                .get_channel(&target_cid)
                .await?
                .ok_or(EngineError::UnknownChannel(target_cid))?;
            Ok(Some(Objective::DirectDefund(DirectDefund::new(channel)?)))
        }

        ObjectiveKind::VirtualFund => {
            let Some(prefund) = prefund_for(message, target_cid) else {
                return Ok(None);
            };
            let participants = prefund.state().participants.clone();
            let (left, right) = adjacent_ledgers(store, &participants, my_address).await?;
            let objective =
                VirtualFund::new(prefund.state().clone(), my_address, left, right)?;
            Ok(Some(Objective::VirtualFund(objective)))
        }

        ObjectiveKind::VirtualDefund => {
            let v = store
                .get_channel(&target_cid)
                .await?
                .ok_or(EngineError::UnknownChannel(target_cid))?;
            let Some(proposed) = message
                .signed_states
                .iter()
                .find(|ss| ss.state().channel_id() == target_cid)
            else {
                return Ok(None);
            };
            let paid = VirtualDefund::paid_from_final_state(&v, proposed.state())?;
            let info = store.get_voucher_info(&target_cid).await?;
            let participants = v.participants().to_vec();
            // the payee refuses a close that settles less than it is owed
            if participants.last() == Some(&my_address) && paid < info.largest_received {
                return Err(EngineError::Transition(
                    conduit_protocols::TransitionError::PaidAmountTooLow {
                        expected: info.largest_received,
                        got: paid,
                    },
                ));
            }
            let (left, right) = adjacent_ledgers(store, &participants, my_address).await?;
            Ok(Some(Objective::VirtualDefund(VirtualDefund::new(
                v, paid, left, right,
            )?)))
        }

        // vouchers are processed directly; no objective spawns on receipt
        ObjectiveKind::Payment => Ok(None),
    }
}

fn prefund_for(message: &Message, channel_id: Destination) -> Option<&SignedState> {
    message
        .signed_states
        .iter()
        .find(|ss| ss.state().channel_id() == channel_id && ss.state().turn_num == 0)
}

/// The payer's total allocation in the channel's prefund outcome: the
/// channel's spending capacity.
pub(crate) fn capacity_of(v: &Channel, payer: Address) -> alloy_primitives::U256 {
    let dest = Destination::from(payer);
    v.prefund()
        .state()
        .outcome
        .0
        .first()
        .map(|exit| exit.total_for(&dest))
        .unwrap_or_default()
}

/// Finds the open ledger channels between me and my path neighbours.
async fn adjacent_ledgers(
    store: &dyn Store,
    participants: &[Address],
    my_address: Address,
) -> Result<(Option<Channel>, Option<Channel>), EngineError> {
    let my_role = participants
        .iter()
        .position(|p| *p == my_address)
        .ok_or(EngineError::NotOnPath(my_address))?;
    let left = if my_role == 0 {
        None
    } else {
        Some(ledger_between(store, my_address, participants[my_role - 1]).await?)
    };
    let right = if my_role == participants.len() - 1 {
        None
    } else {
        Some(ledger_between(store, my_address, participants[my_role + 1]).await?)
    };
    Ok((left, right))
}

async fn ledger_between(
    store: &dyn Store,
    me: Address,
    peer: Address,
) -> Result<Channel, EngineError> {
    let channels = store.list_channels().await?;
    channels
        .into_iter()
        .filter(|c| {
            let p = c.participants();
            p.len() == 2 && p.contains(&me) && p.contains(&peer)
        })
        // an open ledger has a supported postfund (or later) state
        .find(|c| c.supported_turn().is_some())
        .ok_or(EngineError::NoLedgerBetween(me, peer))
}
