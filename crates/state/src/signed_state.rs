//! A state together with the signatures gathered for it so far.

use std::collections::BTreeMap;

use conduit_crypto::{SecretKey, Signature};
use conduit_primitives::ParticipantIdx;
use serde::{Deserialize, Serialize};

use crate::{State, StateError};

/// A [`State`] plus a partial mapping from participant index to signature.
///
/// The accumulator only ever stores verified signatures: every insertion
/// recovers the signer and checks it against the participant list, so a
/// persisted `SignedState` never contains an unverified signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedState {
    state: State,
    signatures: BTreeMap<ParticipantIdx, Signature>,
}

impl SignedState {
    /// A signed state with no signatures yet.
    pub fn new(state: State) -> Self {
        SignedState {
            state,
            signatures: BTreeMap::new(),
        }
    }

    /// The underlying state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The verified signatures gathered so far, by participant index.
    pub fn signatures(&self) -> &BTreeMap<ParticipantIdx, Signature> {
        &self.signatures
    }

    /// Verifies `signature` against the state and records it under the
    /// recovered participant's index.
    ///
    /// Duplicate signatures are idempotent. A signature that does not
    /// recover to any participant is rejected and the accumulator is left
    /// unchanged.
    pub fn add_signature(&mut self, signature: Signature) -> Result<ParticipantIdx, StateError> {
        let signer = self.state.recover_signer(&signature)?;
        let index = self
            .state
            .participants
            .iter()
            .position(|p| *p == signer)
            .ok_or(StateError::NotAParticipant(signer))?
            as ParticipantIdx;
        self.signatures.insert(index, signature);
        Ok(index)
    }

    /// Signs the state with `secret_key` and records the signature.
    pub fn sign(&mut self, secret_key: &SecretKey) -> Result<Signature, StateError> {
        let signature = self.state.sign(secret_key)?;
        self.add_signature(signature)?;
        Ok(signature)
    }

    /// Unions the signatures of `other` into `self`.
    ///
    /// Fails without modification when the two accumulators are not for the
    /// same state, or when any incoming signature fails verification.
    pub fn merge(&mut self, other: &SignedState) -> Result<(), StateError> {
        if !self.state.equal(&other.state) {
            return Err(StateError::StateMismatch);
        }
        for (claimed, signature) in &other.signatures {
            let recovered = self.state.recover_signer(signature)?;
            let expected = self
                .state
                .participants
                .get(*claimed as usize)
                .ok_or(StateError::WrongParticipant { claimed: *claimed })?;
            if recovered != *expected {
                return Err(StateError::WrongParticipant { claimed: *claimed });
            }
        }
        for (claimed, signature) in &other.signatures {
            self.signatures.insert(*claimed, *signature);
        }
        Ok(())
    }

    /// Verifies every carried signature against its claimed participant.
    pub fn verify(&self) -> Result<(), StateError> {
        for (claimed, signature) in &self.signatures {
            let recovered = self.state.recover_signer(signature)?;
            let expected = self
                .state
                .participants
                .get(*claimed as usize)
                .ok_or(StateError::WrongParticipant { claimed: *claimed })?;
            if recovered != *expected {
                return Err(StateError::WrongParticipant { claimed: *claimed });
            }
        }
        Ok(())
    }

    /// True iff a verified signature is held for `index`.
    pub fn signed_by(&self, index: ParticipantIdx) -> bool {
        self.signatures.contains_key(&index)
    }

    /// True iff every participant has signed.
    pub fn complete(&self) -> bool {
        self.signatures.len() == self.state.participants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Allocation, Exit};
    use alloy_primitives::{Address, Bytes, U256};
    use conduit_crypto::address_from_secret_key;
    use conduit_primitives::Destination;

    fn keys() -> (SecretKey, SecretKey) {
        (
            SecretKey::from_slice(&[0x11; 32]).unwrap(),
            SecretKey::from_slice(&[0x22; 32]).unwrap(),
        )
    }

    fn two_party_state(alice: Address, bob: Address) -> State {
        State {
            chain_id: 1337,
            participants: vec![alice, bob],
            channel_nonce: 7,
            app_definition: Address::ZERO,
            challenge_duration: 60,
            app_data: Bytes::new(),
            outcome: Exit::single_asset(
                Address::ZERO,
                vec![
                    Allocation::simple(Destination::from(alice), U256::from(1)),
                    Allocation::simple(Destination::from(bob), U256::from(1)),
                ],
            ),
            turn_num: 0,
            is_final: false,
        }
    }

    #[test]
    fn accumulates_to_completion() {
        let (sk_a, sk_b) = keys();
        let state = two_party_state(address_from_secret_key(&sk_a), address_from_secret_key(&sk_b));
        let mut ss = SignedState::new(state);
        assert!(!ss.complete());

        ss.sign(&sk_a).unwrap();
        assert!(ss.signed_by(0));
        assert!(!ss.complete());

        ss.sign(&sk_b).unwrap();
        assert!(ss.complete());
    }

    #[test]
    fn rejects_a_stranger() {
        let (sk_a, sk_b) = keys();
        let stranger = SecretKey::from_slice(&[0x99; 32]).unwrap();
        let state = two_party_state(address_from_secret_key(&sk_a), address_from_secret_key(&sk_b));
        let mut ss = SignedState::new(state.clone());
        let sig = state.sign(&stranger).unwrap();
        assert!(matches!(
            ss.add_signature(sig),
            Err(StateError::NotAParticipant(_))
        ));
        assert!(ss.signatures().is_empty());
    }

    #[test]
    fn merge_is_order_independent() {
        let (sk_a, sk_b) = keys();
        let state = two_party_state(address_from_secret_key(&sk_a), address_from_secret_key(&sk_b));

        let mut signed_by_a = SignedState::new(state.clone());
        signed_by_a.sign(&sk_a).unwrap();
        let mut signed_by_b = SignedState::new(state.clone());
        signed_by_b.sign(&sk_b).unwrap();

        let mut ab = signed_by_a.clone();
        ab.merge(&signed_by_b).unwrap();
        let mut ba = signed_by_b.clone();
        ba.merge(&signed_by_a).unwrap();

        assert_eq!(ab, ba);
        assert!(ab.complete());
    }

    #[test]
    fn merge_rejects_a_different_state() {
        let (sk_a, sk_b) = keys();
        let state = two_party_state(address_from_secret_key(&sk_a), address_from_secret_key(&sk_b));
        let mut ss = SignedState::new(state.clone());
        let other = SignedState::new(state.clone_as_turn(1));
        assert!(matches!(ss.merge(&other), Err(StateError::StateMismatch)));
    }
}
