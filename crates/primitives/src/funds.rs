//! Per-asset fund amounts, used for outcome totals and on-chain holdings.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// A map from asset address to an amount of that asset.
///
/// The zero address denotes the chain's native asset. Assets absent from the
/// map are treated as having a zero amount.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Funds(pub BTreeMap<Address, U256>);

impl Funds {
    /// An empty set of funds.
    pub fn new() -> Self {
        Funds(BTreeMap::new())
    }

    /// Funds holding a single asset amount.
    pub fn single(asset: Address, amount: U256) -> Self {
        let mut m = BTreeMap::new();
        m.insert(asset, amount);
        Funds(m)
    }

    /// The amount held for `asset`, zero if absent.
    pub fn amount(&self, asset: &Address) -> U256 {
        self.0.get(asset).copied().unwrap_or(U256::ZERO)
    }

    /// Adds `amount` of `asset` to the held funds.
    pub fn add(&mut self, asset: Address, amount: U256) {
        let entry = self.0.entry(asset).or_insert(U256::ZERO);
        *entry = entry.saturating_add(amount);
    }

    /// Takes the per-asset maximum of `self` and `other`.
    ///
    /// Chain events report cumulative holdings, so merging observations is a
    /// pointwise max, never a sum.
    pub fn merge_max(&mut self, other: &Funds) {
        for (asset, amount) in &other.0 {
            let entry = self.0.entry(*asset).or_insert(U256::ZERO);
            if amount > entry {
                *entry = *amount;
            }
        }
    }

    /// True iff `self` holds at least `other`'s amount of every asset.
    pub fn covers(&self, other: &Funds) -> bool {
        other
            .0
            .iter()
            .all(|(asset, amount)| self.amount(asset) >= *amount)
    }

    /// True iff any asset amount in `self` is strictly below the amount
    /// already recorded in `other`.
    pub fn regressed_from(&self, other: &Funds) -> bool {
        other
            .0
            .iter()
            .any(|(asset, amount)| self.amount(asset) < *amount)
    }

    /// Per-asset difference `self - other`, saturating at zero.
    pub fn saturating_sub(&self, other: &Funds) -> Funds {
        let mut out = Funds::new();
        for (asset, amount) in &self.0 {
            let deficit = amount.saturating_sub(other.amount(asset));
            if deficit > U256::ZERO {
                out.0.insert(*asset, deficit);
            }
        }
        out
    }

    /// True iff no asset has a nonzero amount.
    pub fn is_zero(&self) -> bool {
        self.0.values().all(|v| *v == U256::ZERO)
    }
}

impl FromIterator<(Address, U256)> for Funds {
    fn from_iter<T: IntoIterator<Item = (Address, U256)>>(iter: T) -> Self {
        let mut funds = Funds::new();
        for (asset, amount) in iter {
            funds.add(asset, amount);
        }
        funds
    }
}

impl std::fmt::Display for Funds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (asset, amount)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{asset}: {amount}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth() -> Address {
        Address::ZERO
    }

    #[test]
    fn merge_max_is_pointwise() {
        let mut a = Funds::single(eth(), U256::from(100));
        let b = Funds::single(eth(), U256::from(60));
        a.merge_max(&b);
        assert_eq!(a.amount(&eth()), U256::from(100));

        let c = Funds::single(eth(), U256::from(250));
        a.merge_max(&c);
        assert_eq!(a.amount(&eth()), U256::from(250));
    }

    #[test]
    fn covers_and_deficit() {
        let holdings = Funds::single(eth(), U256::from(150));
        let target = Funds::single(eth(), U256::from(200));
        assert!(!holdings.covers(&target));
        assert!(target.covers(&holdings));

        let deficit = target.saturating_sub(&holdings);
        assert_eq!(deficit.amount(&eth()), U256::from(50));
    }

    #[test]
    fn regression_detection() {
        let prior = Funds::single(eth(), U256::from(100));
        let lower = Funds::single(eth(), U256::from(40));
        assert!(lower.regressed_from(&prior));
        assert!(!prior.regressed_from(&lower));
    }
}
