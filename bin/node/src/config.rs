//! The per-node TOML configuration.

use std::path::PathBuf;

use serde::Deserialize;

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/conduit.db")
}

fn default_chain_id() -> u64 {
    1337
}

/// Contents of the file passed with `--config`.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Hex-encoded 32-byte channel secret key.
    pub secret_key: String,

    /// Where the durable store lives.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Id of the chain the adjudicator is deployed on.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}
