//! Objective requests: what the client API asks the engine to start.

use alloy_primitives::{Address, U256};
use conduit_primitives::{ChainId, Destination};
use conduit_state::{Exit, FixedPart};
use serde::{Deserialize, Serialize};

use crate::objective::{ObjectiveId, ObjectiveKind};

/// A request to spawn a new objective, carried by an API event.
///
/// Fund requests describe the channel to open; defund and pay requests name
/// an existing channel. The objective id is deterministic, so the caller
/// can compute it before the engine has processed the request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveRequest {
    /// Open a directly funded (ledger) channel with `counterparty`.
    DirectFund {
        /// The peer to open the channel with.
        counterparty: Address,
        /// Seconds a counterparty has to respond to an on-chain challenge.
        challenge_duration: u32,
        /// The initial outcome; also the funding obligations.
        outcome: Exit,
        /// The application governing the channel.
        app_definition: Address,
        /// Disambiguates otherwise identical channels.
        channel_nonce: u64,
    },
    /// Conclude and defund a directly funded channel.
    DirectDefund {
        /// The channel to close.
        channel_id: Destination,
    },
    /// Open a virtual channel to `counterparty` through `intermediaries`.
    VirtualFund {
        /// The hop(s) between me and the counterparty, in path order.
        intermediaries: Vec<Address>,
        /// The far end of the virtual channel.
        counterparty: Address,
        /// Seconds a counterparty has to respond to an on-chain challenge.
        challenge_duration: u32,
        /// The initial outcome; the payer's allocation is the channel's
        /// spending capacity.
        outcome: Exit,
        /// The application governing the channel.
        app_definition: Address,
        /// Disambiguates otherwise identical channels.
        channel_nonce: u64,
    },
    /// Collapse a virtual channel back into its ledgers.
    VirtualDefund {
        /// The virtual channel to close.
        channel_id: Destination,
    },
    /// Send a payment over a virtual channel.
    Pay {
        /// The virtual channel to pay over.
        channel_id: Destination,
        /// The increment to pay, on top of all previous payments.
        amount: U256,
    },
}

impl ObjectiveRequest {
    /// The id of the channel the request concerns. For fund requests this
    /// is derived from the fixed parameters, with the requester as the
    /// first participant.
    pub fn channel_id(&self, my_address: Address, chain_id: ChainId) -> Destination {
        match self {
            ObjectiveRequest::DirectFund {
                counterparty,
                challenge_duration,
                app_definition,
                channel_nonce,
                ..
            } => FixedPart {
                chain_id,
                participants: vec![my_address, *counterparty],
                channel_nonce: *channel_nonce,
                app_definition: *app_definition,
                challenge_duration: *challenge_duration,
            }
            .channel_id(),
            ObjectiveRequest::VirtualFund {
                intermediaries,
                counterparty,
                challenge_duration,
                app_definition,
                channel_nonce,
                ..
            } => {
                let mut participants = Vec::with_capacity(intermediaries.len() + 2);
                participants.push(my_address);
                participants.extend_from_slice(intermediaries);
                participants.push(*counterparty);
                FixedPart {
                    chain_id,
                    participants,
                    channel_nonce: *channel_nonce,
                    app_definition: *app_definition,
                    challenge_duration: *challenge_duration,
                }
                .channel_id()
            }
            ObjectiveRequest::DirectDefund { channel_id }
            | ObjectiveRequest::VirtualDefund { channel_id }
            | ObjectiveRequest::Pay { channel_id, .. } => *channel_id,
        }
    }

    /// The kind of objective the request spawns.
    pub fn kind(&self) -> ObjectiveKind {
        match self {
            ObjectiveRequest::DirectFund { .. } => ObjectiveKind::DirectFund,
            ObjectiveRequest::DirectDefund { .. } => ObjectiveKind::DirectDefund,
            ObjectiveRequest::VirtualFund { .. } => ObjectiveKind::VirtualFund,
            ObjectiveRequest::VirtualDefund { .. } => ObjectiveKind::VirtualDefund,
            ObjectiveRequest::Pay { .. } => ObjectiveKind::Payment,
        }
    }

    /// The deterministic id of the objective the request spawns.
    pub fn id(&self, my_address: Address, chain_id: ChainId) -> ObjectiveId {
        ObjectiveId::new(self.kind(), self.channel_id(my_address, chain_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fund_request_id_is_deterministic() {
        let me = Address::repeat_byte(0x01);
        let them = Address::repeat_byte(0x02);
        let request = ObjectiveRequest::DirectFund {
            counterparty: them,
            challenge_duration: 60,
            outcome: Exit::default(),
            app_definition: Address::ZERO,
            channel_nonce: 42,
        };
        let id_1 = request.id(me, 1337);
        let id_2 = request.id(me, 1337);
        assert_eq!(id_1, id_2);
        assert_eq!(id_1.kind, ObjectiveKind::DirectFund);
        assert_ne!(request.id(me, 1338), id_1);
    }
}
