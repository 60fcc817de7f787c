//! Seed handling and BIP32 account key derivation.
//!
//! An [`AccountKeys`] is built either from a mnemonic (full signing wallet)
//! or from an extended public key (watch-only). Addresses are derived as
//! `account/chain/index` with non-hardened steps below the account node.

use std::fmt;
use std::str::FromStr;

use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv, Xpub};
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Address, CompressedPublicKey, Network, NetworkKind, PrivateKey, ScriptBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

use brook_core::types::{AddressType, Chain};

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::mnemonic::mnemonic_to_seed;

/// SLIP-132 version bytes for extended public keys.
const VERSION_XPUB: [u8; 4] = [0x04, 0x88, 0xb2, 0x1e];
const VERSION_YPUB: [u8; 4] = [0x04, 0x9d, 0x7c, 0xb2];
const VERSION_ZPUB: [u8; 4] = [0x04, 0xb2, 0x47, 0x46];
const VERSION_TPUB: [u8; 4] = [0x04, 0x35, 0x87, 0xcf];
const VERSION_UPUB: [u8; 4] = [0x04, 0x4a, 0x52, 0x62];
const VERSION_VPUB: [u8; 4] = [0x04, 0x5f, 0x1c, 0xf6];

/// A 64-byte BIP-39 seed.
///
/// Secret material is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Seed {
    bytes: [u8; 64],
}

impl Seed {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self { bytes }
    }

    /// Get the raw seed bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed").field("bytes", &"[REDACTED]").finish()
    }
}

/// Keys of one BIP44-style account.
#[derive(Clone)]
pub struct AccountKeys {
    xpriv: Option<Xpriv>,
    xpub: Xpub,
    address_type: AddressType,
    network: Network,
    secp: Secp256k1<All>,
}

impl AccountKeys {
    pub fn from_seed(seed: &Seed, config: &WalletConfig) -> Result<Self, WalletError> {
        let secp = Secp256k1::new();
        let master = Xpriv::new_master(config.network, seed.as_bytes())
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        let path = DerivationPath::from_str(&config.account_path())
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        let xpriv = master
            .derive_priv(&secp, &path)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        let xpub = Xpub::from_priv(&secp, &xpriv);
        Ok(Self {
            xpriv: Some(xpriv),
            xpub,
            address_type: config.address_type,
            network: config.network,
            secp,
        })
    }

    pub fn from_mnemonic(
        phrase: &str,
        passphrase: &str,
        config: &WalletConfig,
    ) -> Result<Self, WalletError> {
        let seed = mnemonic_to_seed(phrase, passphrase)?;
        Self::from_seed(&seed, config)
    }

    /// Watch-only keys from an account-level xpub/ypub/zpub (or the
    /// tpub/upub/vpub testnet forms).
    pub fn from_xpub(encoded: &str, config: &WalletConfig) -> Result<Self, WalletError> {
        let xpub = parse_any_xpub(encoded)?;
        if xpub.network != NetworkKind::from(config.network) {
            return Err(WalletError::KeyDerivation(format!(
                "extended key is for {:?}, wallet is on {}",
                xpub.network, config.network
            )));
        }
        Ok(Self {
            xpriv: None,
            xpub,
            address_type: config.address_type,
            network: config.network,
            secp: Secp256k1::new(),
        })
    }

    pub fn is_watch_only(&self) -> bool {
        self.xpriv.is_none()
    }

    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn account_xpub(&self) -> &Xpub {
        &self.xpub
    }

    /// Account xpub with the SLIP-132 prefix of the address type
    /// (`zpub`/`vpub` for native segwit, `ypub`/`upub` for nested).
    pub fn account_xpub_slip132(&self) -> String {
        let mut bytes = self.xpub.encode();
        let version = match (self.address_type, self.xpub.network) {
            (AddressType::NativeSegwit, NetworkKind::Main) => VERSION_ZPUB,
            (AddressType::NativeSegwit, NetworkKind::Test) => VERSION_VPUB,
            (AddressType::NestedSegwit, NetworkKind::Main) => VERSION_YPUB,
            (AddressType::NestedSegwit, NetworkKind::Test) => VERSION_UPUB,
        };
        bytes[..4].copy_from_slice(&version);
        bitcoin::base58::encode_check(&bytes)
    }

    pub fn public_key(&self, chain: Chain, index: u32) -> Result<CompressedPublicKey, WalletError> {
        let path = child_path(chain, index)?;
        let child = self
            .xpub
            .derive_pub(&self.secp, &path)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        Ok(child.to_pub())
    }

    pub fn address(&self, chain: Chain, index: u32) -> Result<Address, WalletError> {
        let pk = self.public_key(chain, index)?;
        Ok(address_for_key(&pk, self.address_type, self.network))
    }

    pub fn private_key(&self, chain: Chain, index: u32) -> Result<PrivateKey, WalletError> {
        let xpriv = self.xpriv.as_ref().ok_or(WalletError::WatchOnly)?;
        let path = child_path(chain, index)?;
        let child = xpriv
            .derive_priv(&self.secp, &path)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        Ok(PrivateKey::new(child.private_key, self.network))
    }

    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }
}

impl fmt::Debug for AccountKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKeys")
            .field("xpub", &self.xpub.to_string())
            .field("address_type", &self.address_type)
            .field("network", &self.network)
            .field("watch_only", &self.is_watch_only())
            .finish()
    }
}

/// Address of `pk` for the wallet's script type.
pub fn address_for_key(pk: &CompressedPublicKey, address_type: AddressType, network: Network) -> Address {
    match address_type {
        AddressType::NativeSegwit => Address::p2wpkh(pk, network),
        AddressType::NestedSegwit => Address::p2shwpkh(pk, network),
    }
}

/// The p2wpkh program nested inside a p2sh-p2wpkh output.
pub fn nested_redeem_script(pk: &CompressedPublicKey) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&pk.wpubkey_hash())
}

fn child_path(chain: Chain, index: u32) -> Result<[ChildNumber; 2], WalletError> {
    let chain = ChildNumber::from_normal_idx(chain.index())
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
    let index = ChildNumber::from_normal_idx(index)
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
    Ok([chain, index])
}

/// Parse an extended public key in any SLIP-132 flavour.
pub fn parse_any_xpub(encoded: &str) -> Result<Xpub, WalletError> {
    let mut bytes = bitcoin::base58::decode_check(encoded.trim())
        .map_err(|e| WalletError::KeyDerivation(format!("bad extended key: {e}")))?;
    if bytes.len() != 78 {
        return Err(WalletError::KeyDerivation(format!(
            "extended key has {} bytes, expected 78",
            bytes.len()
        )));
    }
    let version: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
    let canonical = match version {
        VERSION_XPUB | VERSION_YPUB | VERSION_ZPUB => VERSION_XPUB,
        VERSION_TPUB | VERSION_UPUB | VERSION_VPUB => VERSION_TPUB,
        other => {
            return Err(WalletError::KeyDerivation(format!(
                "unknown extended key version {}",
                hex::encode(other)
            )));
        }
    };
    bytes[..4].copy_from_slice(&canonical);
    Xpub::decode(&bytes).map_err(|e| WalletError::KeyDerivation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    const ZPUB: &str = "zpub6rFR7y4Q2AijBEqTUquhVz398htDFrtymD9xYYfG1m4wAcvPhXNfE3EfH1r1ADqtfSdVCToUG868RvUUkgDKf31mGDtKsAYz2oz2AGutZYs";
    const XPUB: &str = "xpub6CatWdiZiodmUeTDp8LT5or8nmbKNcuyvz7WyksVFkKB4RHwCD3XyuvPEbvqAQY3rAPshWcMLoP2fMFMKHPJ4ZeZXYVUhLv1VMrjPC7PW6V";

    fn native() -> AccountKeys {
        AccountKeys::from_mnemonic(ABANDON, "", &WalletConfig::mainnet(AddressType::NativeSegwit))
            .unwrap()
    }

    #[test]
    fn bip84_vectors() {
        let keys = native();
        assert_eq!(
            keys.address(Chain::External, 0).unwrap().to_string(),
            "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"
        );
        assert_eq!(
            keys.address(Chain::External, 1).unwrap().to_string(),
            "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g"
        );
        assert_eq!(
            keys.address(Chain::Internal, 0).unwrap().to_string(),
            "bc1q8c6fshw2dlwun7ekn9qwf37cu2rn755upcp6el"
        );
        assert_eq!(
            keys.private_key(Chain::External, 0).unwrap().to_wif(),
            "KyZpNDKnfs94vbrwhJneDi77V6jF64PWPF8x5cdJb8ifgg2DUc9d"
        );
    }

    #[test]
    fn account_xpub_encodings() {
        let keys = native();
        assert_eq!(keys.account_xpub().to_string(), XPUB);
        assert_eq!(keys.account_xpub_slip132(), ZPUB);
    }

    #[test]
    fn bip49_vectors() {
        let main = AccountKeys::from_mnemonic(
            ABANDON,
            "",
            &WalletConfig::mainnet(AddressType::NestedSegwit),
        )
        .unwrap();
        assert_eq!(
            main.address(Chain::External, 0).unwrap().to_string(),
            "37VucYSaXLCAsxYyAPfbSi9eh4iEcbShgf"
        );

        let test = AccountKeys::from_mnemonic(
            ABANDON,
            "",
            &WalletConfig::testnet(AddressType::NestedSegwit),
        )
        .unwrap();
        assert_eq!(
            test.address(Chain::External, 0).unwrap().to_string(),
            "2Mww8dCYPUpKHofjgcXcBCEGmniw9CoaiD2"
        );
    }

    #[test]
    fn watch_only_from_zpub_matches_full_wallet() {
        let cfg = WalletConfig::mainnet(AddressType::NativeSegwit);
        let watch = AccountKeys::from_xpub(ZPUB, &cfg).unwrap();
        let full = native();
        assert!(watch.is_watch_only());
        assert!(!full.is_watch_only());
        for i in 0..5 {
            assert_eq!(
                watch.address(Chain::External, i).unwrap(),
                full.address(Chain::External, i).unwrap()
            );
        }
        assert_eq!(
            watch.private_key(Chain::External, 0).unwrap_err(),
            WalletError::WatchOnly
        );
    }

    #[test]
    fn xpub_network_mismatch_rejected() {
        let cfg = WalletConfig::testnet(AddressType::NativeSegwit);
        assert!(matches!(
            AccountKeys::from_xpub(ZPUB, &cfg),
            Err(WalletError::KeyDerivation(_))
        ));
    }

    #[test]
    fn garbage_xpub_rejected() {
        assert!(parse_any_xpub("zpubnotreally").is_err());
    }

    #[test]
    fn hardened_child_index_rejected() {
        assert!(native().address(Chain::External, 0x8000_0000).is_err());
    }

    #[test]
    fn seed_debug_redacts() {
        let seed = Seed::from_bytes([7u8; 64]);
        assert!(format!("{seed:?}").contains("REDACTED"));
    }
}
