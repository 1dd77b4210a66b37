//! The conduit state-channel node.
//!
//! Boots the durable store, the chain and message services, and the client
//! engine, then runs until interrupted. Network transports for messages
//! and chain access are deployment concerns; this binary wires the
//! in-process implementations, which is enough to run a local network of
//! nodes inside one process or drive the engine from the RPC surface.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::hex;
use anyhow::Context;
use clap::Parser;
use conduit_chain::{ChainService, MockChainService};
use conduit_client::Client;
use conduit_crypto::{address_from_secret_key, SecretKey};
use conduit_messaging::{Broker, TestMessageService};
use conduit_store::{DurableStore, Store, StoreError};
use serde::de::DeserializeOwned;
use tracing::info;

mod args;
mod config;

use args::Cli;
use config::Config;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(
        adjudicator = %cli.na_address,
        virtual_payment_app = %cli.vpa_address,
        consensus_app = %cli.ca_address,
        "starting conduit node"
    );
    let config = parse_toml::<Config>(&cli.config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("must be able to create the runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    let secret_key = parse_secret_key(&config.secret_key)?;
    let my_address = address_from_secret_key(&secret_key);

    if let Some(parent) = config.store_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating store directory {}", parent.display()))?;
    }
    let store = DurableStore::open(&config.store_path)
        .await
        .context("opening the durable store")?;
    match store.get_channel_secret_key().await {
        Ok(_) => {}
        Err(StoreError::MissingSecretKey) => {
            store.set_channel_secret_key(&secret_key).await?;
        }
        Err(err) => return Err(err.into()),
    }
    let store: Arc<dyn Store> = Arc::new(store);

    let chain: Arc<dyn ChainService> = Arc::new(MockChainService::new());
    let broker = Broker::new();
    let (messenger, inbox) = TestMessageService::new(my_address, broker, Duration::ZERO).await;

    let _client = Client::new(
        Arc::new(messenger),
        inbox,
        chain,
        store,
        config.chain_id,
    )
    .await
    .context("starting the client engine")?;
    info!(address = %my_address, chain_id = config.chain_id, "node running");

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown")?;
    info!("shutdown requested");
    Ok(())
}

fn parse_secret_key(raw: &str) -> anyhow::Result<SecretKey> {
    let bytes = hex::decode(raw).context("secret_key must be hex")?;
    SecretKey::from_slice(&bytes).context("secret_key must be a valid 32-byte scalar")
}

/// Reads and parses a TOML file into `T`.
fn parse_toml<T>(path: &Path) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}
