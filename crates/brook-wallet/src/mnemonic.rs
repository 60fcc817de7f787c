//! BIP-39 mnemonic handling.

use bip39::{Language, Mnemonic};
use rand::RngCore;

use crate::error::WalletError;
use crate::keys::Seed;

/// Generate a fresh 24-word English mnemonic from OS randomness.
pub fn generate_mnemonic() -> Result<String, WalletError> {
    let mut entropy = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    let m = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    zeroize::Zeroize::zeroize(&mut entropy);
    Ok(m.to_string())
}

/// Collapse whitespace and lowercase, as users paste phrases in every shape.
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Parse a BIP-39 phrase and stretch it into a 64-byte seed.
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<Seed, WalletError> {
    let m = Mnemonic::parse_in(Language::English, normalize_phrase(phrase))
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    Ok(Seed::from_bytes(m.to_seed(passphrase)))
}

pub fn is_valid_mnemonic(phrase: &str) -> bool {
    Mnemonic::parse_in(Language::English, normalize_phrase(phrase)).is_ok()
}
