//! brook-cli: command-line front end for the Brook chain-index client.
//!
//! Watch-only address discovery and balances, fee estimates, transaction
//! lookup and broadcast against an Electrum server.

mod config;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bitcoin::Txid;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::{debug, info};

use brook_core::traits::ChainIndex;
use brook_core::types::{AssetId, Chain};
use brook_electrum::ElectrumClient;
use brook_liquid::{AssetRegistry, HttpAssetFetcher};
use brook_wallet::hd_index::HdAddressIndex;

use crate::config::{ChainKind, CliConfig};

/// Brook command-line client.
#[derive(Parser)]
#[command(name = "brook-cli")]
#[command(version, about = "Chain-index client and watch-only wallet tools")]
struct Cli {
    /// Configuration file (default: <config dir>/brook/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Chain to talk to.
    #[arg(long, global = true, value_enum)]
    network: Option<ChainKind>,

    /// Electrum server as host:port; repeat to rotate between several.
    #[arg(long = "server", global = true)]
    servers: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format ("text" or "json").
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and report the server banner, capabilities and tip.
    Ping,
    /// Fee-rate estimates and the relay fee.
    Fees,
    /// Next unused address of a watch-only account.
    Address(AddressArgs),
    /// Balance of a watch-only account.
    Balance(BalanceArgs),
    /// Fetch a transaction.
    Tx(TxArgs),
    /// Broadcast a raw transaction.
    Broadcast(BroadcastArgs),
    /// Look up issued-asset metadata in the asset registry.
    Asset(AssetArgs),
}

#[derive(Args)]
struct XpubArg {
    /// Account-level xpub/ypub/zpub (default: `xpub` from the config).
    #[arg(long)]
    xpub: Option<String>,
}

#[derive(Args)]
struct AddressArgs {
    #[command(flatten)]
    account: XpubArg,

    /// Return a change address instead of a receive address.
    #[arg(long)]
    change: bool,
}

#[derive(Args)]
struct BalanceArgs {
    #[command(flatten)]
    account: XpubArg,

    /// Also list unspent outputs.
    #[arg(long)]
    utxos: bool,
}

#[derive(Args)]
struct TxArgs {
    txid: String,

    /// Print the raw hex instead of the decoded transaction.
    #[arg(long)]
    raw: bool,
}

#[derive(Args)]
struct BroadcastArgs {
    /// Hex-encoded transaction.
    hex: String,
}

#[derive(Args)]
struct AssetArgs {
    /// 64-character asset id.
    asset_id: String,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    fn settings(&self) -> Result<CliConfig> {
        let mut cfg = CliConfig::load(self.config.as_deref())?;
        if let Some(network) = self.network {
            cfg.network = network;
        }
        if !self.servers.is_empty() {
            cfg.peers = self.servers.clone();
        }
        if let Some(level) = &self.log_level {
            cfg.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            cfg.log_format = format.clone();
        }
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = cli.settings()?;
    init_logging(&cfg.log_level, &cfg.log_format);
    debug!(network = ?cfg.network, peers = ?cfg.peers, "configuration loaded");

    match cli.command {
        Commands::Ping => ping(&cfg).await,
        Commands::Fees => fees(&cfg).await,
        Commands::Address(args) => address(&cfg, args).await,
        Commands::Balance(args) => balance(&cfg, args).await,
        Commands::Tx(args) => transaction(&cfg, args).await,
        Commands::Broadcast(args) => broadcast(&cfg, args).await,
        Commands::Asset(args) => asset(&cfg, args).await,
    }
}

async fn connect(cfg: &CliConfig) -> Result<ElectrumClient> {
    let client = ElectrumClient::with_tcp(cfg.electrum()?);
    client
        .connect()
        .await
        .context("Failed to connect to any Electrum server")?;
    Ok(client)
}

fn watch_only(cfg: &CliConfig, account: XpubArg) -> Result<HdAddressIndex> {
    let Some(xpub) = account.xpub.or_else(|| cfg.xpub.clone()) else {
        bail!("No account key: pass --xpub or set `xpub` in the config");
    };
    HdAddressIndex::from_xpub(&xpub, &cfg.wallet()?).context("Invalid extended public key")
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn ping(cfg: &CliConfig) -> Result<()> {
    let client = connect(cfg).await?;
    let started = std::time::Instant::now();
    client.ping().await.context("Ping failed")?;
    let state = client.connection_state();
    print_json(&json!({
        "server": state.server_name,
        "peer": state.peer.map(|p| p.to_string()),
        "batching": state.batching,
        "tip_height": client.block_clock().latest().0,
        "estimated_height": client.estimate_current_height(),
        "round_trip_ms": started.elapsed().as_millis() as u64,
    }))
}

async fn fees(cfg: &CliConfig) -> Result<()> {
    let client = connect(cfg).await?;
    let estimates = client.estimate_fees().await.context("Fee estimation failed")?;
    let relay = client.relay_fee().await.context("Relay fee query failed")?;
    print_json(&json!({
        "fast_sat_vb": estimates.fast,
        "medium_sat_vb": estimates.medium,
        "slow_sat_vb": estimates.slow,
        "relay_sat_kvb": relay,
    }))
}

async fn address(cfg: &CliConfig, args: AddressArgs) -> Result<()> {
    let mut wallet = watch_only(cfg, args.account)?;
    let client = connect(cfg).await?;
    wallet.rescan(&client).await.context("Address discovery failed")?;
    let address = if args.change {
        wallet.next_change_address(&client).await?
    } else {
        wallet.next_receive_address(&client).await?
    };
    let chain = if args.change { Chain::Internal } else { Chain::External };
    info!(?chain, index = wallet.next_free_index(chain), "next unused address");
    println!("{address}");
    Ok(())
}

async fn balance(cfg: &CliConfig, args: BalanceArgs) -> Result<()> {
    let mut wallet = watch_only(cfg, args.account)?;
    let client = connect(cfg).await?;
    wallet.rescan(&client).await.context("Address discovery failed")?;
    let total = wallet.fetch_balance(&client).await.context("Balance query failed")?;

    let mut out = json!({
        "confirmed": total.confirmed,
        "unconfirmed": total.unconfirmed,
        "funded_addresses": wallet.balances().len(),
        "next_receive_index": wallet.next_free_index(Chain::External),
        "next_change_index": wallet.next_free_index(Chain::Internal),
    });
    if args.utxos {
        let utxos = wallet.fetch_utxos(&client).await.context("Unspent query failed")?;
        out["utxos"] = serde_json::to_value(utxos)?;
    }
    print_json(&out)
}

async fn transaction(cfg: &CliConfig, args: TxArgs) -> Result<()> {
    let txid = Txid::from_str(&args.txid).context("Invalid txid")?;
    let client = connect(cfg).await?;
    if args.raw {
        println!("{}", client.get_raw_transaction_hex(&txid).await?);
        return Ok(());
    }
    let tx = client.get_transaction(&txid).await?;
    print_json(&serde_json::to_value(tx)?)
}

async fn broadcast(cfg: &CliConfig, args: BroadcastArgs) -> Result<()> {
    let hex = args.hex.trim();
    if hex.is_empty() || hex.len() % 2 != 0 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("Transaction must be hex-encoded");
    }
    let client = connect(cfg).await?;
    let txid = client.broadcast(hex).await.context("Broadcast rejected")?;
    println!("{txid}");
    Ok(())
}

async fn asset(cfg: &CliConfig, args: AssetArgs) -> Result<()> {
    if cfg.network != ChainKind::Liquid {
        debug!(network = ?cfg.network, "asset lookup ignores the configured network");
    }
    let asset = AssetId::from_str(&args.asset_id).map_err(|e| anyhow::anyhow!(e))?;
    let registry = AssetRegistry::liquid(Arc::new(HttpAssetFetcher::new(cfg.registry_url.clone())));
    let metadata = tokio::time::timeout(Duration::from_secs(30), registry.get(&asset))
        .await
        .context("Asset registry timed out")??;
    match metadata {
        Some(metadata) => print_json(&serde_json::to_value(metadata)?),
        None => bail!("Asset {asset} is not registered"),
    }
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `RUST_LOG` takes precedence over `level`. Pass `format = "json"` for
/// structured JSON lines; anything else gives human-readable text.
fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so command output stays machine-readable.
    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
