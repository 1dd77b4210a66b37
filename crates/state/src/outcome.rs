//! Outcomes: who gets what when a channel is finalized.
//!
//! An outcome is an ordered list of single-asset exits. Each exit names an
//! asset and an ordered list of allocations of that asset. The encoding is
//! the two-level ABI tuple the adjudicator consumes, so it must be canonical
//! byte-for-byte.

use alloy_primitives::{Address, Bytes, FixedBytes, U256};
use alloy_sol_types::{sol, SolValue};
use conduit_primitives::{Destination, Funds};
use serde::{Deserialize, Serialize};

use crate::StateError;

sol! {
    /// ABI shape of a single allocation: `(bytes32, uint256, uint8, bytes)`.
    struct SolAllocation {
        bytes32 destination;
        uint256 amount;
        uint8 allocationType;
        bytes metadata;
    }

    /// ABI shape of a single-asset exit: `(address, bytes, Allocation[])`.
    struct SolSingleAssetExit {
        address asset;
        bytes metadata;
        SolAllocation[] allocations;
    }
}

/// ABI shape of the outcome: `(address, bytes, Allocation[])[]`.
type SolExit = Vec<SolSingleAssetExit>;

/// Discriminates plain allocations from guarantees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum AllocationType {
    /// Funds are paid straight to the destination.
    #[default]
    Simple,
    /// Funds follow the destinations named in the guarantee metadata.
    Guarantee,
}

impl AllocationType {
    /// The wire byte for this allocation type.
    pub fn to_byte(self) -> u8 {
        match self {
            AllocationType::Simple => 0,
            AllocationType::Guarantee => 1,
        }
    }

    /// Parses the wire byte.
    pub fn from_byte(b: u8) -> Result<Self, StateError> {
        match b {
            0 => Ok(AllocationType::Simple),
            1 => Ok(AllocationType::Guarantee),
            other => Err(StateError::UnknownAllocationType(other)),
        }
    }
}

/// The metadata carried by a guarantee allocation: funds are reclaimable by
/// `left` first, then `right`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct GuaranteeMetadata {
    /// The participant closer to the channel's first peer.
    pub left: Address,
    /// The participant closer to the channel's last peer.
    pub right: Address,
}

impl GuaranteeMetadata {
    /// ABI-encodes the metadata for packing into an allocation.
    pub fn encode(&self) -> Bytes {
        (self.left, self.right).abi_encode_params().into()
    }

    /// Decodes the ABI encoding produced by [`GuaranteeMetadata::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, StateError> {
        let (left, right) = <(Address, Address)>::abi_decode_params(bytes, true)
            .map_err(|e| StateError::AbiDecode(e.to_string()))?;
        Ok(GuaranteeMetadata { left, right })
    }
}

/// A single payout entry within a single-asset exit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Allocation {
    /// Recipient of the funds: an external address or another channel.
    pub destination: Destination,
    /// The amount allocated.
    pub amount: U256,
    /// Plain payout or guarantee.
    pub allocation_type: AllocationType,
    /// Opaque except for guarantees, which carry [`GuaranteeMetadata`].
    pub metadata: Bytes,
}

impl Allocation {
    /// A simple allocation with empty metadata.
    pub fn simple(destination: Destination, amount: U256) -> Self {
        Allocation {
            destination,
            amount,
            allocation_type: AllocationType::Simple,
            metadata: Bytes::new(),
        }
    }

    /// A guarantee allocation targeting `target`, reclaimable by `left` then
    /// `right`.
    pub fn guarantee(target: Destination, amount: U256, left: Address, right: Address) -> Self {
        Allocation {
            destination: target,
            amount,
            allocation_type: AllocationType::Guarantee,
            metadata: GuaranteeMetadata { left, right }.encode(),
        }
    }

    /// Parses the guarantee metadata, failing for simple allocations.
    pub fn guarantee_metadata(&self) -> Result<GuaranteeMetadata, StateError> {
        GuaranteeMetadata::decode(&self.metadata)
    }
}

/// The payouts of one asset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct SingleAssetExit {
    /// The asset contract; the zero address is the chain's native asset.
    pub asset: Address,
    /// Asset-level metadata, opaque to the client.
    pub metadata: Bytes,
    /// Ordered payouts of this asset.
    pub allocations: Vec<Allocation>,
}

impl SingleAssetExit {
    /// The sum of all allocation amounts for this asset.
    pub fn total(&self) -> U256 {
        self.allocations
            .iter()
            .fold(U256::ZERO, |acc, a| acc.saturating_add(a.amount))
    }

    /// The sum of amounts allocated to `destination` in this exit.
    pub fn total_for(&self, destination: &Destination) -> U256 {
        self.allocations
            .iter()
            .filter(|a| a.destination == *destination)
            .fold(U256::ZERO, |acc, a| acc.saturating_add(a.amount))
    }
}

/// A full outcome: ordered list of single-asset exits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Exit(pub Vec<SingleAssetExit>);

impl Exit {
    /// A single-asset outcome with the given allocations.
    pub fn single_asset(asset: Address, allocations: Vec<Allocation>) -> Self {
        Exit(vec![SingleAssetExit {
            asset,
            metadata: Bytes::new(),
            allocations,
        }])
    }

    /// Total allocated funds across all assets.
    pub fn total(&self) -> Funds {
        self.0
            .iter()
            .map(|exit| (exit.asset, exit.total()))
            .collect()
    }

    /// Total funds allocated to `destination` across all assets.
    pub fn total_for(&self, destination: &Destination) -> Funds {
        self.0
            .iter()
            .map(|exit| (exit.asset, exit.total_for(destination)))
            .filter(|(_, amount)| *amount > U256::ZERO)
            .collect()
    }

    /// True iff `holdings` cover every allocation in the outcome.
    pub fn affords(&self, holdings: &Funds) -> bool {
        holdings.covers(&self.total())
    }

    /// Canonical ABI encoding of the outcome.
    pub fn encode(&self) -> Bytes {
        let sol: SolExit = self
            .0
            .iter()
            .map(|exit| SolSingleAssetExit {
                asset: exit.asset,
                metadata: exit.metadata.clone(),
                allocations: exit
                    .allocations
                    .iter()
                    .map(|a| SolAllocation {
                        destination: FixedBytes::<32>::from(*a.destination.as_bytes()),
                        amount: a.amount,
                        allocationType: a.allocation_type.to_byte(),
                        metadata: a.metadata.clone(),
                    })
                    .collect(),
            })
            .collect();
        sol.abi_encode().into()
    }

    /// Decodes the encoding produced by [`Exit::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, StateError> {
        let sol =
            SolExit::abi_decode(bytes, true).map_err(|e| StateError::AbiDecode(e.to_string()))?;
        let mut exits = Vec::with_capacity(sol.len());
        for exit in sol {
            let mut out = Vec::with_capacity(exit.allocations.len());
            for allocation in exit.allocations {
                out.push(Allocation {
                    destination: Destination(allocation.destination.into()),
                    amount: allocation.amount,
                    allocation_type: AllocationType::from_byte(allocation.allocationType)?,
                    metadata: allocation.metadata,
                });
            }
            exits.push(SingleAssetExit {
                asset: exit.asset,
                metadata: exit.metadata,
                allocations: out,
            });
        }
        Ok(Exit(exits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_party_outcome() -> Exit {
        Exit::single_asset(
            Address::ZERO,
            vec![
                Allocation::simple(Destination::from(Address::repeat_byte(0xaa)), U256::from(100)),
                Allocation::simple(Destination::from(Address::repeat_byte(0xbb)), U256::from(100)),
            ],
        )
    }

    #[test]
    fn encode_decode_round_trip() {
        let outcome = two_party_outcome();
        let encoded = outcome.encode();
        assert_eq!(Exit::decode(&encoded).unwrap(), outcome);
    }

    #[test]
    fn guarantee_metadata_round_trip() {
        let left = Address::repeat_byte(0x01);
        let right = Address::repeat_byte(0x02);
        let alloc = Allocation::guarantee(
            Destination::from(Address::repeat_byte(0xcc)),
            U256::from(10),
            left,
            right,
        );
        let meta = alloc.guarantee_metadata().unwrap();
        assert_eq!(meta, GuaranteeMetadata { left, right });
        // guarantee metadata is a static two-address tuple
        assert_eq!(alloc.metadata.len(), 64);
    }

    #[test]
    fn totals_and_affordance() {
        let outcome = two_party_outcome();
        assert_eq!(outcome.total().amount(&Address::ZERO), U256::from(200));
        assert!(!outcome.affords(&Funds::single(Address::ZERO, U256::from(150))));
        assert!(outcome.affords(&Funds::single(Address::ZERO, U256::from(200))));
    }

    #[test]
    fn unknown_allocation_type_is_rejected() {
        let outcome = two_party_outcome();
        // flip the type byte at the decoded level rather than hunting for
        // its offset in the blob
        let mut raw = SolExit::abi_decode(&outcome.encode(), true).unwrap();
        raw[0].allocations[0].allocationType = 7;
        let encoded = raw.abi_encode();
        assert!(matches!(
            Exit::decode(&encoded),
            Err(StateError::UnknownAllocationType(7))
        ));
    }
}
