//! CLI configuration: optional TOML file, then `BROOK_*` environment
//! variables, then command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use brook_core::types::{AddressType, Peer};
use brook_electrum::ElectrumConfig;
use brook_liquid::registry::DEFAULT_REGISTRY_URL;
use brook_wallet::config::WalletConfig;

/// Which chain the CLI talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Bitcoin,
    Testnet,
    Liquid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub network: ChainKind,
    /// `host:port` entries; empty means the network preset.
    pub peers: Vec<String>,
    pub saved_peer: Option<String>,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub gap_limit: u32,
    pub address_type: String,
    /// Account-level extended public key for watch-only commands.
    pub xpub: Option<String>,
    pub registry_url: String,
    pub log_level: String,
    /// `text` or `json`.
    pub log_format: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        let electrum = ElectrumConfig::default();
        let wallet = WalletConfig::default();
        Self {
            network: ChainKind::Bitcoin,
            peers: Vec::new(),
            saved_peer: None,
            request_timeout_secs: electrum.request_timeout.as_secs(),
            connect_timeout_secs: electrum.connect_timeout.as_secs(),
            gap_limit: wallet.gap_limit,
            address_type: "native-segwit".to_string(),
            xpub: None,
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            log_level: "warn".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl CliConfig {
    /// `<config dir>/brook/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("brook").join("config.toml"))
    }

    /// Layer the file at `path` (or the default path, if it exists) and
    /// the environment over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        match path {
            Some(path) => {
                if !path.exists() {
                    bail!("config file not found: {}", path.display());
                }
                builder = builder.add_source(config::File::from(path));
            }
            None => {
                if let Some(default) = Self::default_path() {
                    builder = builder.add_source(config::File::from(default).required(false));
                }
            }
        }
        builder = builder.add_source(
            config::Environment::with_prefix("BROOK")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("peers"),
        );

        builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")
    }

    pub fn address_type(&self) -> Result<AddressType> {
        self.address_type
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
    }

    /// Chain-index settings: the network preset with configured overrides.
    pub fn electrum(&self) -> Result<ElectrumConfig> {
        let mut config = match self.network {
            ChainKind::Bitcoin => ElectrumConfig::mainnet(),
            ChainKind::Testnet => ElectrumConfig::testnet(),
            ChainKind::Liquid => ElectrumConfig::liquid(),
        };
        if !self.peers.is_empty() {
            config.peers = self
                .peers
                .iter()
                .map(|p| p.parse::<Peer>().map_err(|e| anyhow::anyhow!(e)))
                .collect::<Result<_>>()?;
        }
        config.saved_peer = self
            .saved_peer
            .as_deref()
            .map(|p| p.parse::<Peer>().map_err(|e| anyhow::anyhow!(e)))
            .transpose()?;
        config.request_timeout = Duration::from_secs(self.request_timeout_secs);
        config.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        Ok(config)
    }

    pub fn wallet(&self) -> Result<WalletConfig> {
        let address_type = self.address_type()?;
        let mut config = match self.network {
            ChainKind::Bitcoin => WalletConfig::mainnet(address_type),
            ChainKind::Testnet => WalletConfig::testnet(address_type),
            ChainKind::Liquid => bail!("confidential wallets need a proof backend"),
        };
        config.gap_limit = self.gap_limit;
        Ok(config)
    }
}
