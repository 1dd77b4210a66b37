//! The JSON-RPC surface of the client.
//!
//! This crate pins the wire envelope (`{id, method, params}` requests,
//! `{id, result}` responses, `{id, error}` failures) and the five methods
//! the server recognises. The network transport itself is pluggable; an
//! in-process duplex transport is provided for tests and embedding.
//!
//! Numeric fields that can exceed 2^53 - 1 (amounts, balances) travel as
//! strings: `U256` serializes to `0x`-prefixed hex in human-readable
//! formats, which keeps every JSON number within the transport's safe
//! integer range.

pub mod client;
pub mod server;
pub mod types;

pub use client::{RpcClient, RpcClientError};
pub use server::serve_duplex;
pub use types::{
    DirectDefundParams, DirectFundParams, JsonRpcError, JsonRpcErrorResponse, JsonRpcRequest,
    JsonRpcResponse, PayParams, RequestMethod, SpawnedObjective, VirtualDefundParams,
    VirtualFundParams,
};
