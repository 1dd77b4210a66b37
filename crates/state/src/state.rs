//! The full state tuple agreed by channel participants, and its hash.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use conduit_crypto::{
    recover_ethereum_message_signer, sign_ethereum_message, SecretKey, Signature,
};
use conduit_primitives::{ChainId, Destination};
use serde::{Deserialize, Serialize};

use crate::{Exit, StateError};

/// The parameters that never change over a channel's lifetime. Their hash is
/// the channel id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct FixedPart {
    /// Id of the chain the adjudicator lives on.
    pub chain_id: ChainId,
    /// The channel participants, in signing order.
    pub participants: Vec<Address>,
    /// Disambiguates channels with otherwise identical parameters.
    pub channel_nonce: u64,
    /// The on-chain application contract governing state transitions.
    pub app_definition: Address,
    /// Seconds a counterparty has to respond to an on-chain challenge.
    pub challenge_duration: u32,
}

impl FixedPart {
    /// The channel id: the hash of the canonical encoding of the fixed part.
    pub fn channel_id(&self) -> Destination {
        let encoded = (
            U256::from(self.chain_id),
            self.participants.clone(),
            U256::from(self.channel_nonce),
            self.app_definition,
            U256::from(self.challenge_duration),
        )
            .abi_encode_params();
        Destination(keccak256(&encoded))
    }
}

/// One version of a channel's state. Two states are equal iff their hashes
/// are equal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct State {
    /// Id of the chain the adjudicator lives on.
    pub chain_id: ChainId,
    /// The channel participants, in signing order.
    pub participants: Vec<Address>,
    /// Disambiguates channels with otherwise identical parameters.
    pub channel_nonce: u64,
    /// The on-chain application contract governing state transitions.
    pub app_definition: Address,
    /// Seconds a counterparty has to respond to an on-chain challenge.
    pub challenge_duration: u32,
    /// Application data, opaque to the framework.
    pub app_data: Bytes,
    /// Who gets what if this state is finalized.
    pub outcome: Exit,
    /// Monotone version counter.
    pub turn_num: u64,
    /// True for states that may be concluded on chain without a challenge.
    pub is_final: bool,
}

impl State {
    /// The fixed parameters of this state's channel.
    pub fn fixed_part(&self) -> FixedPart {
        FixedPart {
            chain_id: self.chain_id,
            participants: self.participants.clone(),
            channel_nonce: self.channel_nonce,
            app_definition: self.app_definition,
            challenge_duration: self.challenge_duration,
        }
    }

    /// The id of this state's channel.
    pub fn channel_id(&self) -> Destination {
        self.fixed_part().channel_id()
    }

    /// A successor state identical up to the turn number.
    pub fn clone_as_turn(&self, turn_num: u64) -> State {
        State { turn_num, ..self.clone() }
    }

    /// Canonical ABI encoding of the full state tuple. Signatures are
    /// verified against the hash of these bytes, so the encoding must match
    /// the adjudicator byte-for-byte.
    pub fn encode(&self) -> Bytes {
        (
            U256::from(self.chain_id),
            self.participants.clone(),
            U256::from(self.channel_nonce),
            self.app_definition,
            U256::from(self.challenge_duration),
            self.app_data.clone(),
            self.outcome.encode(),
            U256::from(self.turn_num),
            self.is_final,
        )
            .abi_encode_params()
            .into()
    }

    /// Decodes the encoding produced by [`State::encode`].
    pub fn decode(bytes: &[u8]) -> Result<State, StateError> {
        type SolState = (
            U256,
            Vec<Address>,
            U256,
            Address,
            U256,
            Bytes,
            Bytes,
            U256,
            bool,
        );
        let (
            chain_id,
            participants,
            channel_nonce,
            app_definition,
            challenge_duration,
            app_data,
            outcome,
            turn_num,
            is_final,
        ) = SolState::abi_decode_params(bytes, true)
            .map_err(|e| StateError::AbiDecode(e.to_string()))?;
        Ok(State {
            chain_id: to_u64(chain_id, "chain_id")?,
            participants,
            channel_nonce: to_u64(channel_nonce, "channel_nonce")?,
            app_definition,
            challenge_duration: to_u64(challenge_duration, "challenge_duration")? as u32,
            app_data,
            outcome: Exit::decode(&outcome)?,
            turn_num: to_u64(turn_num, "turn_num")?,
            is_final,
        })
    }

    /// The canonical state hash.
    pub fn hash(&self) -> B256 {
        keccak256(self.encode())
    }

    /// True iff the two states hash identically.
    pub fn equal(&self, other: &State) -> bool {
        self.hash() == other.hash()
    }

    /// Signs the state hash under the Ethereum signed-message scheme.
    pub fn sign(&self, secret_key: &SecretKey) -> Result<Signature, StateError> {
        Ok(sign_ethereum_message(self.hash().as_slice(), secret_key)?)
    }

    /// Recovers the address that produced `signature` over this state.
    pub fn recover_signer(&self, signature: &Signature) -> Result<Address, StateError> {
        Ok(recover_ethereum_message_signer(
            self.hash().as_slice(),
            signature,
        )?)
    }
}

fn to_u64(value: U256, field: &str) -> Result<u64, StateError> {
    u64::try_from(value).map_err(|_| StateError::NumericOverflow(field.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Allocation;
    use conduit_crypto::address_from_secret_key;

    fn test_state() -> State {
        let alice = Address::repeat_byte(0xaa);
        let bob = Address::repeat_byte(0xbb);
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

    #[test]
    fn encode_decode_round_trip() {
        let state = test_state();
        let decoded = State::decode(&state.encode()).unwrap();
        assert!(decoded.equal(&state));
        assert_eq!(decoded, state);
    }

    #[test]
    fn channel_id_ignores_the_variable_part() {
        let state = test_state();
        let mut successor = state.clone_as_turn(5);
        successor.is_final = true;
        assert_eq!(state.channel_id(), successor.channel_id());
        assert_ne!(state.hash(), successor.hash());
    }

    #[test]
    fn channel_id_depends_on_every_fixed_field() {
        let state = test_state();
        let base = state.channel_id();

        let mut other = state.clone();
        other.channel_nonce += 1;
        assert_ne!(other.channel_id(), base);

        let mut other = state.clone();
        other.chain_id += 1;
        assert_ne!(other.channel_id(), base);

        let mut other = state.clone();
        other.challenge_duration += 1;
        assert_ne!(other.channel_id(), base);
    }

    #[test]
    fn sign_and_recover() {
        let sk = SecretKey::from_slice(&[0x33; 32]).unwrap();
        let state = test_state();
        let sig = state.sign(&sk).unwrap();
        assert_eq!(
            state.recover_signer(&sig).unwrap(),
            address_from_secret_key(&sk)
        );
    }
}
