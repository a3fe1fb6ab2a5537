// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/pool/messages.rs
// Version: 0.3.1
//
// This file defines the pool client's wire-level data model, located in the
// pool subdirectory: connection states, protocol variants, endpoints,
// request tracking, the event stream surfaced to the rest of the miner, and
// the pool URL parser.
//
// Tree Location:
// - src/pool/messages.rs (pool data model)
// - Depends on: regex, thiserror

use regex::Regex;
use std::time::Instant;
use thiserror::Error;

/// Pool client error taxonomy.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Fatal at boot, no retry
    #[error("configuration error: {0}")]
    Config(String),

    /// Connect/read/write failures; trigger reconnect with backoff
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed JSON, unexpected shapes, handshake rejection
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Stale connection (request timeouts, work absence)
    #[error("timeout: {0}")]
    Timeout(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum StratumState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Subscribed = 3,
    Authorized = 4,
}

impl StratumState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => StratumState::Connecting,
            2 => StratumState::Connected,
            3 => StratumState::Subscribed,
            4 => StratumState::Authorized,
            _ => StratumState::Disconnected,
        }
    }
}

/// Stratum protocol variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    /// Standard stratum (TOS native)
    Stratum,
    /// Simplified proxy protocol: no subscribe, eth_submitLogin
    EthProxy,
    /// Nicehash variant with the extended subscribe
    EthereumStratum,
}

impl ProtocolVariant {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "ethproxy" => ProtocolVariant::EthProxy,
            "ethereumstratum" => ProtocolVariant::EthereumStratum,
            _ => ProtocolVariant::Stratum,
        }
    }
}

/// One pool endpoint. The client owns an ordered list (primary first,
/// failovers after) and a current index.
#[derive(Debug, Clone)]
pub struct PoolEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub use_tls: bool,
}

impl PoolEndpoint {
    pub fn new(host: &str, port: u16, use_tls: bool) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: String::new(),
            pass: String::new(),
            use_tls,
        }
    }
}

/// An outbound request awaiting its response, keyed by id in the pending
/// map.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub method: String,
    pub issued_at: Instant,
}

/// Subscription data extracted from the mining.subscribe response.
#[derive(Debug, Clone, Default)]
pub struct SubscribeInfo {
    pub session_id: String,
    pub extranonce1: String,
    pub extranonce2_size: usize,
}

/// Events surfaced to the wiring layer (share results + connection state).
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Connected,
    Disconnected,
    ShareAccepted,
    ShareRejected { reason: String },
}

/// Parse a pool URL of the form stratum+tcp://host:port or
/// stratum+ssl://host:port.
pub fn parse_pool_url(url: &str) -> Result<(String, u16, bool), PoolError> {
    let re = Regex::new(r"^stratum\+(tcp|ssl)://([^:]+):(\d+)$").expect("static regex");
    let caps = re.captures(url).ok_or_else(|| {
        PoolError::Config(format!(
            "invalid pool URL '{}' (expected stratum+tcp://host:port or stratum+ssl://host:port)",
            url
        ))
    })?;

    let use_tls = &caps[1] == "ssl";
    let host = caps[2].to_string();
    let port: u16 = caps[3]
        .parse()
        .map_err(|_| PoolError::Config(format!("invalid port in pool URL '{}'", url)))?;

    Ok((host, port, use_tls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_url() {
        let (host, port, tls) = parse_pool_url("stratum+tcp://pool.example.com:3333").unwrap();
        assert_eq!(host, "pool.example.com");
        assert_eq!(port, 3333);
        assert!(!tls);
    }

    #[test]
    fn test_parse_ssl_url() {
        let (host, port, tls) = parse_pool_url("stratum+ssl://10.0.0.5:443").unwrap();
        assert_eq!(host, "10.0.0.5");
        assert_eq!(port, 443);
        assert!(tls);
    }

    #[test]
    fn test_reject_bad_urls() {
        assert!(parse_pool_url("http://pool:3333").is_err());
        assert!(parse_pool_url("stratum+tcp://pool").is_err());
        assert!(parse_pool_url("stratum+tcp://pool:notaport").is_err());
        assert!(parse_pool_url("stratum+tls://pool:3333").is_err());
        assert!(parse_pool_url("stratum+tcp://pool:99999").is_err(), "port out of range");
    }

    #[test]
    fn test_protocol_variant_parse() {
        assert_eq!(ProtocolVariant::parse("stratum"), ProtocolVariant::Stratum);
        assert_eq!(ProtocolVariant::parse("ETHPROXY"), ProtocolVariant::EthProxy);
        assert_eq!(
            ProtocolVariant::parse("EthereumStratum"),
            ProtocolVariant::EthereumStratum
        );
        assert_eq!(ProtocolVariant::parse("anything"), ProtocolVariant::Stratum);
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            StratumState::Disconnected,
            StratumState::Connecting,
            StratumState::Connected,
            StratumState::Subscribed,
            StratumState::Authorized,
        ] {
            assert_eq!(StratumState::from_u8(state as u8), state);
        }
        assert!(StratumState::Connected < StratumState::Authorized);
    }
}
