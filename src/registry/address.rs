//! Miner address extraction
//!
//! Miners publish free-form connection strings on chain. The first
//! `a.b.c.d:port` found anywhere in the string is taken; anything without
//! one is left out of the result. Octets are not range checked.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::types::{PeerAddress, PeerId};

/// Pattern of an IPv4 socket address embedded in arbitrary text
const IP_PORT_PATTERN: &str = r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d+)";

fn ip_port_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(IP_PORT_PATTERN).expect("static pattern compiles"))
}

/// Extract the first `ip:port` from a raw connection string
///
/// A port that does not fit in a `u16` makes the string unusable.
pub fn extract_address(raw: &str) -> Option<PeerAddress> {
    let caps = ip_port_regex().captures(raw)?;
    let host = caps.get(1)?.as_str().to_string();
    let port = caps.get(2)?.as_str().parse::<u16>().ok()?;
    Some(PeerAddress { host, port })
}

/// Resolve every raw address that contains a recognizable `ip:port`
pub fn resolve_addresses(raw: &HashMap<PeerId, String>) -> HashMap<PeerId, PeerAddress> {
    raw.iter()
        .filter_map(|(id, addr)| extract_address(addr).map(|resolved| (*id, resolved)))
        .collect()
}
