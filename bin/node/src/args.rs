//! Command-line arguments for the node.

use std::path::PathBuf;

use alloy_primitives::Address;
use clap::Parser;

/// The conduit state-channel node.
#[derive(Debug, Parser)]
#[command(name = "conduit-node", version, about)]
pub struct Cli {
    /// Path to the per-node TOML config file.
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,

    /// Address of the on-chain adjudicator contract.
    #[arg(long = "na-address", value_name = "ADDRESS")]
    pub na_address: Address,

    /// Address of the virtual payment application contract.
    #[arg(long = "vpa-address", value_name = "ADDRESS")]
    pub vpa_address: Address,

    /// Address of the consensus application contract.
    #[arg(long = "ca-address", value_name = "ADDRESS")]
    pub ca_address: Address,
}
