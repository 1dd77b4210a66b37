//! The 65-byte `r || s || v` signature wire form.

use alloy_primitives::{hex, B256};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::CryptoError;

/// An ECDSA signature in the `r || s || v` layout used on the wire and by
/// the adjudicator.
///
/// The default value (all zero) is the sentinel for "no signature": it
/// serializes to 65 zero bytes and deserializes back without error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature {
    /// The r component.
    pub r: B256,
    /// The s component.
    pub s: B256,
    /// The recovery byte, {27, 28} on the wire.
    pub v: u8,
}

impl Signature {
    /// True iff this is the all-zero "absent" sentinel.
    pub fn is_absent(&self) -> bool {
        self.r == B256::ZERO && self.s == B256::ZERO && self.v == 0
    }

    /// Serializes to the concatenated 65-byte `r || s || v` form.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(self.r.as_slice());
        out[32..64].copy_from_slice(self.s.as_slice());
        out[64] = self.v;
        out
    }

    /// Parses the concatenated form. All-zero input of any length decodes to
    /// the absent signature.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.iter().all(|b| *b == 0) {
            return Ok(Signature::default());
        }
        if bytes.len() != 65 {
            return Err(CryptoError::BadSignatureLength(bytes.len()));
        }
        Ok(Signature {
            r: B256::from_slice(&bytes[..32]),
            s: B256::from_slice(&bytes[32..64]),
            v: bytes[64],
        })
    }

    /// Hex serialization with a `0x` prefix.
    pub fn to_hex_string(&self) -> String {
        hex::encode_prefixed(self.to_bytes())
    }

    /// Parses the `0x`-prefixed hex serialization.
    pub fn from_hex_string(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::BadHex(e.to_string()))?;
        Signature::from_bytes(&bytes)
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex_string())
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex_string())
        } else {
            serializer.serialize_bytes(&self.to_bytes())
        }
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Signature::from_hex_string(&s).map_err(de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            Signature::from_bytes(&bytes).map_err(de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let sig = Signature {
            r: B256::repeat_byte(0x11),
            s: B256::repeat_byte(0x22),
            v: 27,
        };
        let hex = sig.to_hex_string();
        assert!(hex.starts_with("0x"));
        assert_eq!(hex.len(), 2 + 65 * 2);
        assert_eq!(Signature::from_hex_string(&hex).unwrap(), sig);
    }

    #[test]
    fn zero_bytes_decode_to_absent() {
        let sig = Signature::from_bytes(&[0u8; 65]).unwrap();
        assert!(sig.is_absent());
        let sig = Signature::from_hex_string(&format!("0x{}", "00".repeat(65))).unwrap();
        assert!(sig.is_absent());
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = Signature::from_bytes(&[1u8; 64]).unwrap_err();
        assert!(matches!(err, CryptoError::BadSignatureLength(64)));
    }

    #[test]
    fn json_round_trip() {
        let sig = Signature {
            r: B256::repeat_byte(0xab),
            s: B256::repeat_byte(0xcd),
            v: 28,
        };
        let json = serde_json::to_string(&sig).unwrap();
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }
}
