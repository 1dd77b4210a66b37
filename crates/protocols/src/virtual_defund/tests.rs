use alloy_primitives::Address;
use conduit_state::AllocationType;

use super::*;
use crate::virtual_fund::tests::{three_party_setup, v_prefund_state};
use crate::{Objective, ObjectiveStatus};

fn approve(vd: VirtualDefund) -> VirtualDefund {
    match Objective::VirtualDefund(vd).approve().unwrap() {
        Objective::VirtualDefund(o) => o,
        _ => unreachable!(),
    }
}

/// Runs virtual funding to completion and returns the three parties'
/// channels, ready for defunding.
fn funded_virtual_channels() -> (
    Vec<(Address, Channel, Option<Channel>, Option<Channel>)>,
    Vec<SecretKey>,
) {
    let (vf_a, vf_i, vf_b, sk_a, sk_i, sk_b) = three_party_setup();
    let mut parties = vec![
        (vf_a.virtual_channel().my_address(), vf_a, sk_a.clone()),
        (vf_i.virtual_channel().my_address(), vf_i, sk_i.clone()),
        (vf_b.virtual_channel().my_address(), vf_b, sk_b.clone()),
    ];
    // drive the fund objectives to completion by hand
    let mut inboxes: Vec<Vec<Message>> = vec![Vec::new(); parties.len()];
    for _ in 0..10 {
        let mut outgoing = Vec::new();
        for (idx, (_, vf, sk)) in parties.iter_mut().enumerate() {
            let pending = std::mem::take(&mut inboxes[idx]);
            let mut updated = vf.clone();
            for msg in pending {
                updated = updated
                    .update(&ObjectiveEvent::SignedStates(msg.signed_states))
                    .unwrap();
            }
            let (cranked, effects, _) = updated.crank(sk).unwrap();
            *vf = cranked;
            outgoing.extend(effects.messages_to_send);
        }
        if outgoing.is_empty() {
            break;
        }
        for msg in outgoing {
            let slot = parties
                .iter()
                .position(|(addr, _, _)| *addr == msg.to)
                .unwrap();
            inboxes[slot].push(msg);
        }
    }
    let out = parties
        .iter()
        .map(|(addr, vf, _)| {
            let mut channels = vf.channels().into_iter();
            let v = channels.next().unwrap().clone();
            let ledgers: Vec<Channel> = channels.cloned().collect();
            let (left, right) = match vf.virtual_channel().my_index() {
                0 => (None, Some(ledgers[0].clone())),
                2 => (Some(ledgers[0].clone()), None),
                _ => (Some(ledgers[0].clone()), Some(ledgers[1].clone())),
            };
            (*addr, v, left, right)
        })
        .collect();
    (out, vec![sk_a, sk_i, sk_b])
}

#[test]
fn final_state_shifts_the_paid_amount() {
    let (sk_a, sk_i, sk_b) = crate::virtual_fund::tests::keys();
    let prefund = v_prefund_state(
        conduit_crypto::address_from_secret_key(&sk_a),
        conduit_crypto::address_from_secret_key(&sk_i),
        conduit_crypto::address_from_secret_key(&sk_b),
    );
    let state = final_state(&prefund, U256::from(3)).unwrap();
    assert!(state.is_final);
    assert_eq!(state.turn_num, VIRTUAL_FINAL_TURN_NUM);
    let allocations = &state.outcome.0[0].allocations;
    assert_eq!(allocations[0].amount, U256::from(7));
    assert_eq!(allocations[1].amount, U256::from(3));
}

#[test]
fn paying_more_than_the_deposit_is_rejected() {
    let (sk_a, sk_i, sk_b) = crate::virtual_fund::tests::keys();
    let prefund = v_prefund_state(
        conduit_crypto::address_from_secret_key(&sk_a),
        conduit_crypto::address_from_secret_key(&sk_i),
        conduit_crypto::address_from_secret_key(&sk_b),
    );
    assert!(matches!(
        final_state(&prefund, U256::from(11)),
        Err(TransitionError::PaidAmountTooLow { .. })
    ));
}

#[test]
fn paid_amount_round_trips_through_the_final_state() {
    let (channels, _) = funded_virtual_channels();
    let (_, v, _, _) = &channels[0];
    let proposed = final_state(v.prefund().state(), U256::from(3)).unwrap();
    assert_eq!(
        VirtualDefund::paid_from_final_state(v, &proposed).unwrap(),
        U256::from(3)
    );
}

#[test]
fn three_party_defunding_collapses_both_guarantees() {
    let (channels, sks) = funded_virtual_channels();
    let paid = U256::from(3);

    let mut parties: Vec<(Address, VirtualDefund, SecretKey)> = channels
        .into_iter()
        .zip(sks)
        .map(|((addr, v, left, right), sk)| {
            (addr, approve(VirtualDefund::new(v, paid, left, right).unwrap()), sk)
        })
        .collect();

    let mut inboxes: Vec<Vec<Message>> = vec![Vec::new(); parties.len()];
    for _ in 0..10 {
        let mut outgoing = Vec::new();
        for (idx, (_, vd, sk)) in parties.iter_mut().enumerate() {
            let pending = std::mem::take(&mut inboxes[idx]);
            let mut updated = vd.clone();
            for msg in pending {
                updated = updated
                    .update(&ObjectiveEvent::SignedStates(msg.signed_states))
                    .unwrap();
            }
            let (cranked, effects, _) = updated.crank(sk).unwrap();
            *vd = cranked;
            outgoing.extend(effects.messages_to_send);
        }
        if outgoing.is_empty() {
            break;
        }
        for msg in outgoing {
            let slot = parties
                .iter()
                .position(|(addr, _, _)| *addr == msg.to)
                .unwrap();
            inboxes[slot].push(msg);
        }
    }

    for (_, vd, _) in &parties {
        assert_eq!(vd.status(), ObjectiveStatus::Completed);
        // every ledger's supported state has no guarantee left, nets the
        // final outcome onto the hop participants, and conserves funds
        for connection in [&vd.to_my_left, &vd.to_my_right].into_iter().flatten() {
            let supported = connection.channel.latest_supported_state().unwrap();
            let exit = &supported.state().outcome.0[0];
            assert!(exit
                .allocations
                .iter()
                .all(|a| a.allocation_type != AllocationType::Guarantee));
            let left_amount = exit
                .total_for(&Destination::from(connection.left));
            let right_amount = exit
                .total_for(&Destination::from(connection.right));
            assert_eq!(left_amount, U256::from(97));
            assert_eq!(right_amount, U256::from(103));
            assert_eq!(exit.total(), U256::from(200));
        }
    }
}
