//! ECDSA signing and public-key recovery for channel states.
//!
//! Messages are hashed with the `"\x19Ethereum Signed Message:\n" + len`
//! prefix before signing so that signatures produced here verify against the
//! adjudicator's `ecrecover` precompile.

pub mod signature;

pub use secp256k1::SecretKey;
pub use signature::Signature;

use alloy_primitives::{keccak256, Address, B256};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, SECP256K1,
};
use thiserror::Error;

/// Errors arising from signature creation, decoding, or recovery.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The serialized signature was neither 65 bytes nor the zero sentinel.
    #[error("signature must be 65 bytes long or all zero, received {0} bytes")]
    BadSignatureLength(usize),

    /// The recovery byte was outside {0, 1, 27, 28}.
    #[error("invalid recovery byte: {0}")]
    BadRecoveryByte(u8),

    /// Recovery was attempted with the empty ("absent") signature.
    #[error("cannot recover a signer from an absent signature")]
    AbsentSignature,

    /// The hex serialization could not be parsed.
    #[error("invalid hex signature encoding: {0}")]
    BadHex(String),

    /// An error bubbled up from the secp256k1 backend.
    #[error("secp256k1: {0}")]
    Secp(#[from] secp256k1::Error),
}

/// Computes `keccak256("\x19Ethereum Signed Message:\n" + len(m) + m)`.
pub fn ethereum_signed_message_digest(message: &[u8]) -> B256 {
    let mut buf = Vec::with_capacity(32 + message.len());
    buf.extend_from_slice(b"\x19Ethereum Signed Message:\n");
    buf.extend_from_slice(message.len().to_string().as_bytes());
    buf.extend_from_slice(message);
    keccak256(&buf)
}

/// Signs an arbitrary message under the Ethereum signed-message scheme.
///
/// The recovery byte of the returned signature is normalised to {27, 28} for
/// compatibility with the `ecrecover` precompile.
pub fn sign_ethereum_message(
    message: &[u8],
    secret_key: &SecretKey,
) -> Result<Signature, CryptoError> {
    let digest = ethereum_signed_message_digest(message);
    let msg = Message::from_digest(digest.0);
    let recoverable = SECP256K1.sign_ecdsa_recoverable(&msg, secret_key);
    let (recovery_id, compact) = recoverable.serialize_compact();

    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&compact[..32]);
    s.copy_from_slice(&compact[32..]);
    Ok(Signature {
        r: B256::from(r),
        s: B256::from(s),
        v: recovery_id.to_i32() as u8 + 27,
    })
}

/// Recovers the address that produced `signature` over `message`.
pub fn recover_ethereum_message_signer(
    message: &[u8],
    signature: &Signature,
) -> Result<Address, CryptoError> {
    if signature.is_absent() {
        return Err(CryptoError::AbsentSignature);
    }
    let v = match signature.v {
        0 | 1 => signature.v,
        27 | 28 => signature.v - 27,
        other => return Err(CryptoError::BadRecoveryByte(other)),
    };
    let recovery_id = RecoveryId::from_i32(v as i32)?;

    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(signature.r.as_slice());
    compact[32..].copy_from_slice(signature.s.as_slice());
    let recoverable = RecoverableSignature::from_compact(&compact, recovery_id)?;

    let digest = ethereum_signed_message_digest(message);
    let msg = Message::from_digest(digest.0);
    let public_key = SECP256K1.recover_ecdsa(&msg, &recoverable)?;
    Ok(address_from_public_key(&public_key))
}

/// Derives the 20-byte address of a secp256k1 public key.
pub fn address_from_public_key(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    Address::from_slice(&hash[12..])
}

/// Derives the node address corresponding to a channel secret key.
pub fn address_from_secret_key(secret_key: &SecretKey) -> Address {
    address_from_public_key(&secret_key.public_key(SECP256K1))
}
