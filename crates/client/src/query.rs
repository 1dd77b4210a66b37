//! Channel queries: human-facing summaries derived from the store.

use alloy_primitives::{Address, U256};
use conduit_channel::{Channel, POSTFUND_TURN_NUM};
use conduit_primitives::{AdjudicationStatus, Destination};
use conduit_protocols::{ObjectiveId, ObjectiveKind};
use conduit_store::Store;
use serde::{Deserialize, Serialize};

use crate::ClientError;

/// Coarse lifecycle status of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    /// Proposed but not yet fully funded and acknowledged.
    Proposed,
    /// Open for business.
    Open,
    /// A defund objective is in flight.
    Closing,
    /// Concluded; funds follow the final outcome.
    Complete,
}

/// Balances of a two-party ledger channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerChannelBalance {
    /// The asset the balances are denominated in.
    pub asset_address: Address,
    /// The owner of the first allocation.
    pub client: Address,
    /// The owner of the second allocation.
    pub hub: Address,
    /// The first allocation's amount in the latest supported state.
    pub client_balance: U256,
    /// The second allocation's amount in the latest supported state.
    pub hub_balance: U256,
}

/// A ledger channel summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerChannelInfo {
    /// The channel id.
    pub id: Destination,
    /// Coarse lifecycle status.
    pub status: ChannelStatus,
    /// Balances in the latest supported state.
    pub balance: LedgerChannelBalance,
}

/// Balances of a virtual payment channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentChannelBalance {
    /// The asset the balances are denominated in.
    pub asset_address: Address,
    /// The participant paying.
    pub payer: Address,
    /// The participant being paid.
    pub payee: Address,
    /// The cumulative amount paid so far.
    pub paid_so_far: U256,
    /// What the payer can still spend.
    pub remaining_funds: U256,
}

/// A payment channel summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentChannelInfo {
    /// The channel id.
    pub id: Destination,
    /// Coarse lifecycle status.
    pub status: ChannelStatus,
    /// Voucher-adjusted balances.
    pub balance: PaymentChannelBalance,
}

pub(crate) async fn ledger_channel_info(
    store: &dyn Store,
    channel_id: Destination,
) -> Result<LedgerChannelInfo, ClientError> {
    let channel = store
        .get_channel(&channel_id)
        .await?
        .ok_or(ClientError::UnknownChannel(channel_id))?;
    let status = status_of(store, &channel).await?;

    let state = channel
        .latest_supported_state()
        .unwrap_or_else(|| channel.prefund())
        .state()
        .clone();
    let exit = state.outcome.0.first();
    let (asset, allocations) = match exit {
        Some(e) => (e.asset, e.allocations.as_slice()),
        None => (Address::ZERO, &[][..]),
    };
    let client = allocations
        .first()
        .and_then(|a| a.destination.to_address().ok())
        .unwrap_or(Address::ZERO);
    let hub = allocations
        .get(1)
        .and_then(|a| a.destination.to_address().ok())
        .unwrap_or(Address::ZERO);
    Ok(LedgerChannelInfo {
        id: channel_id,
        status,
        balance: LedgerChannelBalance {
            asset_address: asset,
            client,
            hub,
            client_balance: allocations.first().map(|a| a.amount).unwrap_or_default(),
            hub_balance: allocations.get(1).map(|a| a.amount).unwrap_or_default(),
        },
    })
}

pub(crate) async fn payment_channel_info(
    store: &dyn Store,
    channel_id: Destination,
) -> Result<PaymentChannelInfo, ClientError> {
    let channel = store
        .get_channel(&channel_id)
        .await?
        .ok_or(ClientError::UnknownChannel(channel_id))?;
    let status = status_of(store, &channel).await?;
    let info = store.get_voucher_info(&channel_id).await?;

    let participants = channel.participants();
    let payer = *participants.first().unwrap_or(&Address::ZERO);
    let payee = *participants.last().unwrap_or(&Address::ZERO);

    let prefund = channel.prefund().state();
    let asset = prefund
        .outcome
        .0
        .first()
        .map(|e| e.asset)
        .unwrap_or(Address::ZERO);
    let capacity = prefund
        .outcome
        .total_for(&Destination::from(payer))
        .amount(&asset);
    let paid_so_far = info.largest_sent.max(info.largest_received);
    Ok(PaymentChannelInfo {
        id: channel_id,
        status,
        balance: PaymentChannelBalance {
            asset_address: asset,
            payer,
            payee,
            paid_so_far,
            remaining_funds: capacity.saturating_sub(paid_so_far),
        },
    })
}

/// Derives the coarse status from the channel and any live defund
/// objective.
async fn status_of(store: &dyn Store, channel: &Channel) -> Result<ChannelStatus, ClientError> {
    if channel.adjudication_status() == AdjudicationStatus::Finalized {
        return Ok(ChannelStatus::Complete);
    }
    // a supported final state closes a virtual channel without the chain
    if let Some(supported) = channel.latest_supported_state() {
        if supported.state().is_final {
            return Ok(ChannelStatus::Complete);
        }
    }
    for kind in [ObjectiveKind::DirectDefund, ObjectiveKind::VirtualDefund] {
        let id = ObjectiveId::new(kind, channel.id());
        if let Some(objective) = store.get_objective(&id).await? {
            if !objective.is_terminal() {
                return Ok(ChannelStatus::Closing);
            }
        }
    }
    match channel.supported_turn() {
        Some(turn) if turn >= POSTFUND_TURN_NUM => Ok(ChannelStatus::Open),
        _ => Ok(ChannelStatus::Proposed),
    }
}
