//! Payment vouchers: signed cumulative-amount records.

use alloy_primitives::{keccak256, Address, FixedBytes, B256, U256};
use alloy_sol_types::SolValue;
use conduit_crypto::{
    recover_ethereum_message_signer, sign_ethereum_message, SecretKey, Signature,
};
use conduit_primitives::Destination;
use conduit_state::StateError;
use serde::{Deserialize, Serialize};

/// A signed `(channel id, cumulative amount)` record conveying a payment.
///
/// Amounts are cumulative per channel: a voucher for 5 supersedes a voucher
/// for 3, and redeeming is idempotent under replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    /// The virtual channel the payment moves over.
    pub channel_id: Destination,
    /// The cumulative amount paid over the channel's lifetime.
    pub amount: U256,
    /// The payer's signature over the voucher hash.
    pub signature: Signature,
}

impl Voucher {
    /// The canonical voucher hash: `keccak256(abi.encode(channel_id, amount))`.
    pub fn hash(channel_id: Destination, amount: U256) -> B256 {
        let encoded =
            (FixedBytes::<32>::from(*channel_id.as_bytes()), amount).abi_encode_params();
        keccak256(&encoded)
    }

    /// Creates and signs a voucher.
    pub fn new_signed(
        channel_id: Destination,
        amount: U256,
        secret_key: &SecretKey,
    ) -> Result<Voucher, StateError> {
        let digest = Voucher::hash(channel_id, amount);
        let signature = sign_ethereum_message(digest.as_slice(), secret_key)
            .map_err(StateError::Crypto)?;
        Ok(Voucher {
            channel_id,
            amount,
            signature,
        })
    }

    /// Recovers the address that signed the voucher.
    pub fn recover_signer(&self) -> Result<Address, StateError> {
        let digest = Voucher::hash(self.channel_id, self.amount);
        recover_ethereum_message_signer(digest.as_slice(), &self.signature)
            .map_err(StateError::Crypto)
    }
}

/// Per-channel voucher bookkeeping, persisted so cumulative monotonicity
/// survives a restart.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherInfo {
    /// The largest cumulative amount sent over the channel.
    pub largest_sent: U256,
    /// The largest cumulative amount received over the channel.
    pub largest_received: U256,
}
