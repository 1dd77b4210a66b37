//! Envelope and method types for the JSON-RPC surface.

use alloy_primitives::{Address, U256};
use conduit_primitives::Destination;
use conduit_protocols::ObjectiveId;
use conduit_state::Exit;
use serde::{Deserialize, Serialize};

/// The methods recognised by the server side of the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMethod {
    /// Open a directly funded ledger channel.
    DirectFund,
    /// Conclude and defund a ledger channel.
    DirectDefund,
    /// Open a virtual channel through intermediaries.
    VirtualFund,
    /// Collapse a virtual channel.
    VirtualDefund,
    /// Send a payment voucher.
    Pay,
}

impl std::fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestMethod::DirectFund => "direct_fund",
            RequestMethod::DirectDefund => "direct_defund",
            RequestMethod::VirtualFund => "virtual_fund",
            RequestMethod::VirtualDefund => "virtual_defund",
            RequestMethod::Pay => "pay",
        };
        write!(f, "{name}")
    }
}

/// A request envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcRequest<P> {
    /// Correlates the response with the request.
    pub id: u64,
    /// The method to invoke.
    pub method: RequestMethod,
    /// Method parameters.
    pub params: P,
}

/// A success envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcResponse<R> {
    /// Echoes the request id.
    pub id: u64,
    /// The method result.
    pub result: R,
}

/// The error payload of a failure envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// A stable error code.
    pub code: i64,
    /// Human-readable description.
    pub message: String,
}

/// A failure envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    /// Echoes the request id.
    pub id: u64,
    /// What went wrong.
    pub error: JsonRpcError,
}

/// Parameters of `direct_fund`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectFundParams {
    /// The peer to open the channel with.
    pub counterparty: Address,
    /// Challenge duration in seconds.
    pub challenge_duration: u32,
    /// The initial outcome; amounts are hex strings on the wire.
    pub outcome: Exit,
}

/// Parameters of `direct_defund`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectDefundParams {
    /// The channel to close.
    pub channel_id: Destination,
}

/// Parameters of `virtual_fund`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFundParams {
    /// The hops between me and the counterparty, in path order.
    pub intermediaries: Vec<Address>,
    /// The far end of the channel.
    pub counterparty: Address,
    /// Challenge duration in seconds.
    pub challenge_duration: u32,
    /// The initial outcome.
    pub outcome: Exit,
}

/// Parameters of `virtual_defund`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDefundParams {
    /// The virtual channel to close.
    pub channel_id: Destination,
}

/// Parameters of `pay`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayParams {
    /// The virtual channel to pay over.
    pub channel_id: Destination,
    /// The increment to pay; a hex string on the wire.
    pub amount: U256,
}

/// What a spawning method returns: the objective to await and its channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnedObjective {
    /// The spawned objective's id.
    pub id: ObjectiveId,
    /// The channel the objective concerns.
    pub channel_id: Destination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let request = JsonRpcRequest {
            id: 7,
            method: RequestMethod::Pay,
            params: PayParams {
                channel_id: Destination::ZERO,
                amount: U256::from(5),
            },
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: JsonRpcRequest<PayParams> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn method_names_match_the_wire() {
        let json = serde_json::to_string(&RequestMethod::VirtualDefund).unwrap();
        assert_eq!(json, r#""virtual_defund""#);
    }

    #[test]
    fn large_amounts_are_string_encoded() {
        let params = PayParams {
            channel_id: Destination::ZERO,
            // far beyond 2^53 - 1
            amount: U256::from(1u128 << 120),
        };
        let json = serde_json::to_value(&params).unwrap();
        assert!(json["amount"].is_string(), "amounts must not be JSON numbers");
    }
}
