//! Issued-asset metadata (name, ticker, precision).
//!
//! [`AssetRegistry`] caches what the fetcher returns. Assets the registry
//! does not know are locked out for an hour so wallets holding many
//! unregistered assets do not hammer the endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use brook_core::constants::{ASSET_NEGATIVE_LOCK, LIQUID_POLICY_ASSET};
use brook_core::types::AssetId;

use crate::error::LiquidError;

pub const DEFAULT_REGISTRY_URL: &str = "https://assets.blockstream.info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntity {
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub asset_id: AssetId,
    pub name: String,
    #[serde(default)]
    pub ticker: Option<String>,
    /// Decimal places shown to users.
    #[serde(default)]
    pub precision: u8,
    #[serde(default)]
    pub entity: Option<AssetEntity>,
}

impl AssetMetadata {
    pub fn policy() -> Self {
        Self {
            asset_id: LIQUID_POLICY_ASSET,
            name: "Liquid Bitcoin".into(),
            ticker: Some("L-BTC".into()),
            precision: 8,
            entity: Some(AssetEntity {
                domain: "blockstream.com".into(),
            }),
        }
    }
}

/// Source of asset metadata. `Ok(None)` means the asset is not registered.
#[async_trait]
pub trait AssetMetadataFetcher: Send + Sync {
    async fn fetch(&self, asset: &AssetId) -> Result<Option<AssetMetadata>, LiquidError>;
}

/// Fetches `GET {base_url}/{asset_id}` from a JSON asset registry.
#[derive(Debug, Clone)]
pub struct HttpAssetFetcher {
    client: Client,
    base_url: String,
}

impl HttpAssetFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, asset: &AssetId) -> String {
        format!("{}/{asset}", self.base_url)
    }
}

impl Default for HttpAssetFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_URL)
    }
}

#[async_trait]
impl AssetMetadataFetcher for HttpAssetFetcher {
    async fn fetch(&self, asset: &AssetId) -> Result<Option<AssetMetadata>, LiquidError> {
        let url = self.url_for(asset);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LiquidError::Registry(format!("{url}: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<AssetMetadata>()
                .await
                .map(Some)
                .map_err(|e| LiquidError::Registry(format!("{url}: {e}"))),
            status => Err(LiquidError::Registry(format!("{url}: HTTP {status}"))),
        }
    }
}

pub struct AssetRegistry {
    fetcher: Arc<dyn AssetMetadataFetcher>,
    negative_lock: Duration,
    known: Mutex<HashMap<AssetId, AssetMetadata>>,
    missing: Mutex<HashMap<AssetId, Instant>>,
}

impl AssetRegistry {
    pub fn new(fetcher: Arc<dyn AssetMetadataFetcher>) -> Self {
        Self {
            fetcher,
            negative_lock: ASSET_NEGATIVE_LOCK,
            known: Mutex::new(HashMap::new()),
            missing: Mutex::new(HashMap::new()),
        }
    }

    /// Registry with the policy asset pre-seeded.
    pub fn liquid(fetcher: Arc<dyn AssetMetadataFetcher>) -> Self {
        let registry = Self::new(fetcher);
        registry.insert(AssetMetadata::policy());
        registry
    }

    pub fn with_negative_lock(mut self, lock: Duration) -> Self {
        self.negative_lock = lock;
        self
    }

    pub fn insert(&self, metadata: AssetMetadata) {
        self.missing.lock().remove(&metadata.asset_id);
        self.known.lock().insert(metadata.asset_id, metadata);
    }

    pub fn cached(&self, asset: &AssetId) -> Option<AssetMetadata> {
        self.known.lock().get(asset).cloned()
    }

    /// Metadata for `asset`, from cache or the fetcher.
    pub async fn get(&self, asset: &AssetId) -> Result<Option<AssetMetadata>, LiquidError> {
        if let Some(found) = self.cached(asset) {
            return Ok(Some(found));
        }
        if self.is_locked(asset) {
            debug!(%asset, "asset recently unknown, not re-querying");
            return Ok(None);
        }

        match self.fetcher.fetch(asset).await? {
            Some(metadata) => {
                if metadata.asset_id != *asset {
                    warn!(%asset, returned = %metadata.asset_id, "registry returned another asset");
                    return Err(LiquidError::Registry(format!(
                        "asked for {asset}, got {}",
                        metadata.asset_id
                    )));
                }
                self.insert(metadata.clone());
                Ok(Some(metadata))
            }
            None => {
                debug!(%asset, "asset not registered");
                self.missing.lock().insert(*asset, Instant::now());
                Ok(None)
            }
        }
    }

    /// Metadata for every registered asset in `assets`. Fetch errors for
    /// individual assets are logged and skipped.
    pub async fn get_many(&self, assets: &[AssetId]) -> HashMap<AssetId, AssetMetadata> {
        let mut found = HashMap::new();
        for asset in assets {
            match self.get(asset).await {
                Ok(Some(metadata)) => {
                    found.insert(*asset, metadata);
                }
                Ok(None) => {}
                Err(e) => warn!(%asset, error = %e, "asset metadata fetch failed"),
            }
        }
        found
    }

    fn is_locked(&self, asset: &AssetId) -> bool {
        let mut missing = self.missing.lock();
        match missing.get(asset) {
            Some(since) if since.elapsed() < self.negative_lock => true,
            Some(_) => {
                missing.remove(asset);
                false
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for AssetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRegistry")
            .field("known", &self.known.lock().len())
            .field("missing", &self.missing.lock().len())
            .field("negative_lock", &self.negative_lock)
            .finish_non_exhaustive()
    }
}
