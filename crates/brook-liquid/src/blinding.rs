//! SLIP-77 blinding keys.
//!
//! The master blinding key is the SLIP-21 node `m/"SLIP-0077"` of the
//! wallet seed. Each output script gets its own blinding key:
//! `HMAC-SHA256(master, script_pubkey)`.

use std::fmt;

use bitcoin::Script;
use bitcoin::hashes::hmac::{Hmac, HmacEngine};
use bitcoin::hashes::{Hash, HashEngine, sha256, sha512};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, Signing};
use zeroize::{Zeroize, ZeroizeOnDrop};

use brook_wallet::keys::Seed;

use crate::error::LiquidError;

const SLIP21_ROOT_KEY: &[u8] = b"Symmetric key seed";
const SLIP77_LABEL: &[u8] = b"SLIP-0077";

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterBlindingKey([u8; 32]);

impl MasterBlindingKey {
    pub fn from_seed(seed: &Seed) -> Self {
        let mut root = hmac_sha512(SLIP21_ROOT_KEY, seed.as_bytes());

        let mut label = Vec::with_capacity(1 + SLIP77_LABEL.len());
        label.push(0u8);
        label.extend_from_slice(SLIP77_LABEL);
        let mut node = hmac_sha512(&root[..32], &label);

        let mut key = [0u8; 32];
        key.copy_from_slice(&node[32..]);
        root.zeroize();
        node.zeroize();
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse the hex form used in `slip77(...)` descriptors.
    pub fn from_hex(s: &str) -> Result<Self, LiquidError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| LiquidError::Blinding(format!("bad master blinding key: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| LiquidError::Blinding("master blinding key must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Blinding private key for outputs paying to `script`.
    pub fn blinding_private_key(&self, script: &Script) -> Result<SecretKey, LiquidError> {
        let mut engine = HmacEngine::<sha256::Hash>::new(&self.0);
        engine.input(script.as_bytes());
        let digest = Hmac::<sha256::Hash>::from_engine(engine).to_byte_array();
        SecretKey::from_slice(&digest).map_err(|e| LiquidError::Blinding(e.to_string()))
    }

    pub fn blinding_public_key<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        script: &Script,
    ) -> Result<PublicKey, LiquidError> {
        let sk = self.blinding_private_key(script)?;
        Ok(PublicKey::from_secret_key(secp, &sk))
    }
}

impl fmt::Debug for MasterBlindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterBlindingKey([REDACTED])")
    }
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut engine = HmacEngine::<sha512::Hash>::new(key);
    engine.input(data);
    Hmac::<sha512::Hash>::from_engine(engine).to_byte_array()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::ScriptBuf;
    use brook_wallet::mnemonic::mnemonic_to_seed;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn master() -> MasterBlindingKey {
        MasterBlindingKey::from_seed(&mnemonic_to_seed(ABANDON, "").unwrap())
    }

    #[test]
    fn slip77_master_key_vector() {
        assert_eq!(
            master().to_hex(),
            "9c8e4f05c7711a98c838be228bcb84924d4570ca53f35fa1c793e58841d47023"
        );
    }

    #[test]
    fn per_script_blinding_key() {
        let script = ScriptBuf::from_hex("0014c0cebcd6c3d3ca8c75dc5ec62ebe55330ef910e2").unwrap();
        let sk = master().blinding_private_key(&script).unwrap();
        assert_eq!(
            hex::encode(sk.secret_bytes()),
            "47cf69442ee3cc914af34504c2060a31e2d72d8827c5e8da460cd8fd4702d090"
        );

        let secp = Secp256k1::new();
        let pk = master().blinding_public_key(&secp, &script).unwrap();
        assert_eq!(pk, PublicKey::from_secret_key(&secp, &sk));

        let other = ScriptBuf::from_hex("0014751e76e8199196d454941c45d1b3a323f1433bd6").unwrap();
        assert_ne!(master().blinding_private_key(&other).unwrap(), sk);
    }

    #[test]
    fn hex_roundtrip() {
        let key = MasterBlindingKey::from_hex(&master().to_hex()).unwrap();
        assert_eq!(key.to_hex(), master().to_hex());
        assert!(MasterBlindingKey::from_hex("abcd").is_err());
    }

    #[test]
    fn debug_redacts() {
        assert!(!format!("{:?}", master()).contains("9c8e"));
    }
}
