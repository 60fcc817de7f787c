//! Script-size strategies for fee estimation during coin selection.
//!
//! The selector's size model assumes legacy p2pkh scripts unless told
//! otherwise. A [`ScriptSizing`] supplies the per-input and per-output script
//! lengths for the wallet's real script type.

use std::str::FromStr;

use bitcoin::Address;
use bitcoin::address::NetworkUnchecked;

use brook_core::constants::{
    BECH32_OUTPUT_SCRIPT_OVERHEAD, NATIVE_SEGWIT_INPUT_SCRIPT_LEN, NESTED_SEGWIT_INPUT_SCRIPT_LEN,
    TX_INPUT_PUBKEYHASH, TX_OUTPUT_PUBKEYHASH,
};
use brook_core::types::AddressType;

use crate::coin_selection::Destination;

pub trait ScriptSizing: Send + Sync {
    /// Estimated script length of one wallet input.
    fn input_script_len(&self) -> u64;

    /// Estimated script length of an output paying to `destination`.
    fn output_script_len(&self, destination: &Destination) -> u64;
}

/// Legacy p2pkh sizes for everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacySizing;

impl ScriptSizing for LegacySizing {
    fn input_script_len(&self) -> u64 {
        TX_INPUT_PUBKEYHASH
    }

    fn output_script_len(&self, _destination: &Destination) -> u64 {
        TX_OUTPUT_PUBKEYHASH
    }
}

impl ScriptSizing for AddressType {
    fn input_script_len(&self) -> u64 {
        match self {
            AddressType::NativeSegwit => NATIVE_SEGWIT_INPUT_SCRIPT_LEN,
            AddressType::NestedSegwit => NESTED_SEGWIT_INPUT_SCRIPT_LEN,
        }
    }

    fn output_script_len(&self, destination: &Destination) -> u64 {
        match destination {
            Destination::Address(address) if is_bech32(address) => {
                bech32_script_len(address).unwrap_or(TX_OUTPUT_PUBKEYHASH)
            }
            Destination::Script(script) => (script.len() as u64).saturating_sub(4),
            _ => TX_OUTPUT_PUBKEYHASH,
        }
    }
}

fn is_bech32(address: &str) -> bool {
    let lower = address.to_ascii_lowercase();
    ["bc1", "tb1", "bcrt1"].iter().any(|hrp| lower.starts_with(hrp))
}

/// Decoded script length plus the fixed bech32 overhead.
fn bech32_script_len(address: &str) -> Option<u64> {
    let parsed = Address::<NetworkUnchecked>::from_str(address).ok()?;
    let script = parsed.assume_checked().script_pubkey();
    Some(script.len() as u64 + BECH32_OUTPUT_SCRIPT_OVERHEAD)
}
