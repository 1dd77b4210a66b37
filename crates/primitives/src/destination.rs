//! The 32-byte destination type used as the recipient of funds in outcomes.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when converting a [`Destination`] back to an [`Address`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("destination {0} is a channel id, not a zero-padded external address")]
pub struct NotAnExternalAddress(pub Destination);

/// A 32-byte identifier for the recipient of funds.
///
/// A destination is either an external destination (a 20-byte [`Address`]
/// left-padded with twelve zero bytes) or the id of another channel. Channel
/// ids are statistically guaranteed to have a nonzero prefix, so the two
/// cases do not collide.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Destination(pub B256);

impl Destination {
    /// The zero destination. Used as a placeholder, never as a real recipient.
    pub const ZERO: Destination = Destination(B256::ZERO);

    /// Returns true iff the destination is a zero-padded external address.
    pub fn is_external(&self) -> bool {
        self.0[..12].iter().all(|b| *b == 0)
    }

    /// Extracts the external [`Address`], failing for channel ids.
    pub fn to_address(&self) -> Result<Address, NotAnExternalAddress> {
        if !self.is_external() {
            return Err(NotAnExternalAddress(*self));
        }
        Ok(Address::from_slice(&self.0[12..]))
    }

    /// Raw access to the underlying 32 bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0 .0
    }
}

impl From<Address> for Destination {
    fn from(addr: Address) -> Self {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(addr.as_slice());
        Destination(B256::from(bytes))
    }
}

impl From<B256> for Destination {
    fn from(b: B256) -> Self {
        Destination(b)
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_address_round_trips() {
        let addr = Address::repeat_byte(0xaa);
        let dest = Destination::from(addr);
        assert!(dest.is_external());
        assert_eq!(dest.to_address().unwrap(), addr);
    }

    #[test]
    fn channel_id_is_not_external() {
        let dest = Destination(B256::repeat_byte(0x17));
        assert!(!dest.is_external());
        assert!(dest.to_address().is_err());
    }
}
