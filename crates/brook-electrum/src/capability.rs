//! Server capability detection from the `server.version` banner.

use brook_core::error::RpcError;

/// Whether the server implementation handles JSON-RPC batches correctly.
///
/// Known-broken implementations:
/// - ElectrumPersonalServer: never
/// - electrs before 0.9.0
/// - electrs-esplora: never
/// - Fulcrum before 1.9.0
pub fn batching_supported(server_version: &str) -> bool {
    let (family, version) = split_banner(server_version);
    let version = version.map(parse_version);
    match family.to_ascii_lowercase().as_str() {
        "electrumpersonalserver" => false,
        "electrs-esplora" => false,
        "electrs" => version.is_some_and(|v| v >= (0, 9, 0)),
        "fulcrum" => version.is_some_and(|v| v >= (1, 9, 0)),
        _ => true,
    }
}

/// `"Fulcrum 1.9.1"` or `"electrs/0.9.10"` into family and version text.
fn split_banner(banner: &str) -> (&str, Option<&str>) {
    let banner = banner.trim();
    match banner.split_once([' ', '/']) {
        Some((family, rest)) => (family, Some(rest.trim())),
        None => (banner, None),
    }
}

/// Leading `major.minor.patch`; missing or non-numeric parts count as 0.
fn parse_version(text: &str) -> (u32, u32, u32) {
    let mut parts = text.trim_start_matches('v').split('.').map(|p| {
        let digits: String = p.chars().take_while(char::is_ascii_digit).collect();
        digits.parse::<u32>().unwrap_or(0)
    });
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// True if `err` is a server refusing verbose transaction output.
pub fn is_verbose_unsupported(err: &RpcError) -> bool {
    err.protocol_message().is_some_and(|msg| {
        let msg = msg.to_ascii_lowercase();
        msg.contains("verbose") && (msg.contains("unsupported") || msg.contains("not supported"))
    })
}
