// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/pool/protocol.rs
// Version: 0.3.1
//
// This file implements the Stratum protocol for communication with the
// mining pool, located in the pool subdirectory. It constructs the JSON-RPC
// requests (subscribe, authorize, submit, ping) and parses the subscribe
// response and job notifications.
//
// Tree Location:
// - src/pool/protocol.rs (Stratum protocol logic)
// - Depends on: serde_json, hex, crate::core

use crate::core::toshash::{HASH_SIZE, INPUT_SIZE};
use crate::core::types::{Hash256, Nonce};
use crate::core::work::WorkPackage;
use crate::pool::messages::{PoolError, ProtocolVariant, SubscribeInfo};
use crate::MINER_VERSION;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, warn};

const LOG_TARGET: &str = "tosminer::pool::protocol";

/// Extranonce2 sizes outside this range are clamped with a warning. Below 4
/// bytes the per-worker nonce space collapses; above 8 does not fit a u64.
pub const MIN_EXTRANONCE2_SIZE: usize = 4;
pub const MAX_EXTRANONCE2_SIZE: usize = 8;

/// Constructs and parses messages for the Stratum protocol.
pub struct StratumProtocol;

impl StratumProtocol {
    /// mining.subscribe request. EthProxy skips subscribe entirely, so this
    /// returns None for that variant.
    pub fn subscribe_request(id: u64, variant: ProtocolVariant) -> Option<Value> {
        let params = match variant {
            ProtocolVariant::EthProxy => return None,
            ProtocolVariant::EthereumStratum => json!([MINER_VERSION, "EthereumStratum/1.0.0"]),
            ProtocolVariant::Stratum => json!([MINER_VERSION]),
        };

        Some(json!({
            "id": id,
            "method": "mining.subscribe",
            "params": params,
        }))
    }

    /// Authorization request; EthProxy uses eth_submitLogin and omits a
    /// placeholder password. Returns (method, message).
    pub fn authorize_request(
        id: u64,
        variant: ProtocolVariant,
        user: &str,
        pass: &str,
    ) -> (String, Value) {
        let (method, params) = match variant {
            ProtocolVariant::EthProxy => {
                let params = if pass.is_empty() || pass == "x" {
                    json!([user])
                } else {
                    json!([user, pass])
                };
                ("eth_submitLogin".to_string(), params)
            }
            _ => ("mining.authorize".to_string(), json!([user, pass])),
        };

        let message = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        (method, message)
    }

    /// mining.submit request:
    /// params = [user, job_id, extranonce2_hex, nonce_hex].
    pub fn submit_request(
        id: u64,
        user: &str,
        job_id: &str,
        extranonce2_hex: &str,
        nonce_hex: &str,
    ) -> Value {
        json!({
            "id": id,
            "method": "mining.submit",
            "params": [user, job_id, extranonce2_hex, nonce_hex],
        })
    }

    /// mining.ping keepalive with empty params.
    pub fn ping_request(id: u64) -> Value {
        json!({
            "id": id,
            "method": "mining.ping",
            "params": [],
        })
    }

    /// Nonce encoded for submission: 8 bytes, big-endian, 16 hex chars.
    pub fn nonce_hex(nonce: Nonce) -> String {
        hex::encode(nonce.to_be_bytes())
    }

    /// Clamp an extranonce2 size into the supported range, warning when the
    /// pool's value is adjusted.
    pub fn clamp_extranonce2_size(size: usize) -> usize {
        if size < MIN_EXTRANONCE2_SIZE {
            warn!(
                target: LOG_TARGET,
                "Pool extranonce2_size={} is too small, using minimum of {}",
                size,
                MIN_EXTRANONCE2_SIZE
            );
            MIN_EXTRANONCE2_SIZE
        } else if size > MAX_EXTRANONCE2_SIZE {
            warn!(
                target: LOG_TARGET,
                "Pool extranonce2_size={} exceeds maximum, using {}", size, MAX_EXTRANONCE2_SIZE
            );
            MAX_EXTRANONCE2_SIZE
        } else {
            size
        }
    }

    /// Parse a mining.subscribe response result. Two shapes are accepted:
    ///
    /// Nested: `[[["mining.notify", id], ...], extranonce1, extranonce2_size]`
    /// Flat:   `[["mining.notify", id], extranonce1, extranonce2_size]`
    pub fn parse_subscribe_result(result: &Value) -> Result<SubscribeInfo, PoolError> {
        let array = result
            .as_array()
            .ok_or_else(|| PoolError::Protocol("subscribe result is not an array".to_string()))?;
        if array.len() < 2 {
            return Err(PoolError::Protocol(format!(
                "subscribe result too short ({} elements)",
                array.len()
            )));
        }

        let mut info = SubscribeInfo {
            extranonce2_size: MIN_EXTRANONCE2_SIZE,
            ..Default::default()
        };

        if let Some(subscriptions) = array[0].as_array() {
            if let Some(first) = subscriptions.first() {
                if let Some(pair) = first.as_array() {
                    // Nested: [["mining.notify", id], ...]
                    if let Some(session) = pair.get(1).and_then(Value::as_str) {
                        info.session_id = session.to_string();
                    }
                } else if first.is_string() {
                    // Flat: ["mining.notify", id]
                    if let Some(session) = subscriptions.get(1).and_then(Value::as_str) {
                        info.session_id = session.to_string();
                    }
                }
            }
        }

        info.extranonce1 = array[1]
            .as_str()
            .ok_or_else(|| PoolError::Protocol("extranonce1 is not a string".to_string()))?
            .to_string();

        if let Some(size) = array.get(2).and_then(Value::as_u64) {
            info.extranonce2_size = Self::clamp_extranonce2_size(size as usize);
        }

        Ok(info)
    }

    /// Parse a mining.notify notification into a work package.
    ///
    /// The simplified TOS format `[job_id, header_hex, target_hex, height,
    /// clean_jobs]` is detected by a boolean at index 4. Anything else falls
    /// back to the standard-stratum stub, which only uses the prev-hash
    /// prefix. Returns the package and whether the pool sent its own target.
    pub fn parse_notify(
        params: &Value,
        fallback_target: &Hash256,
    ) -> Result<(WorkPackage, bool), PoolError> {
        let params = params
            .as_array()
            .ok_or_else(|| PoolError::Protocol("notify params is not an array".to_string()))?;
        if params.len() < 2 {
            return Err(PoolError::Protocol(format!(
                "notify params too short ({} elements)",
                params.len()
            )));
        }

        let mut work = WorkPackage::default();
        work.job_id = params[0]
            .as_str()
            .ok_or_else(|| PoolError::Protocol("job_id is not a string".to_string()))?
            .to_string();
        if work.job_id.is_empty() {
            return Err(PoolError::Protocol("empty job_id".to_string()));
        }

        let mut has_pool_target = false;

        if params.len() >= 5 && params[4].is_boolean() {
            // Simplified TOS format
            let header_hex = params[1].as_str().unwrap_or_default();
            let target_hex = params[2].as_str().unwrap_or_default();
            work.height = params[3].as_u64().unwrap_or(0);
            let clean_jobs = params[4].as_bool().unwrap_or(false);

            let header_bytes = hex::decode(header_hex)
                .map_err(|e| PoolError::Protocol(format!("bad header hex: {}", e)))?;
            if header_bytes.len() >= INPUT_SIZE {
                work.set_header(&header_bytes[..INPUT_SIZE]);
            } else {
                work.set_header(&header_bytes);
            }

            if !target_hex.is_empty() {
                let target_bytes = hex::decode(target_hex)
                    .map_err(|e| PoolError::Protocol(format!("bad target hex: {}", e)))?;
                // Pad on the right when shorter (most significant bytes first)
                let len = target_bytes.len().min(HASH_SIZE);
                work.target[..len].copy_from_slice(&target_bytes[..len]);
                has_pool_target = true;
                debug!(target: LOG_TARGET, "Using pool-sent target");
            } else {
                work.target = *fallback_target;
            }

            if clean_jobs {
                debug!(target: LOG_TARGET, "New job (clean): {}", work.job_id);
            }
        } else {
            // Standard stratum: only the prev-hash prefix is used
            let prev_hash = params[1].as_str().unwrap_or_default();
            let prev_bytes = hex::decode(prev_hash)
                .map_err(|e| PoolError::Protocol(format!("bad prev_hash hex: {}", e)))?;
            let len = prev_bytes.len().min(32);
            work.set_header(&prev_bytes[..len]);
            work.target = *fallback_target;
        }

        work.received_at = Instant::now();
        work.valid = true;
        Ok((work, has_pool_target))
    }

    /// Derive the job's starting nonce from extranonce1 (little-endian).
    pub fn start_nonce_from_extranonce1(extranonce1: &str) -> Nonce {
        let bytes = match hex::decode(extranonce1) {
            Ok(b) => b,
            Err(_) => return 0,
        };
        let mut le = [0u8; 8];
        let len = bytes.len().min(8);
        le[..len].copy_from_slice(&bytes[..len]);
        u64::from_le_bytes(le)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_request_variants() {
        let msg = StratumProtocol::subscribe_request(1, ProtocolVariant::Stratum).unwrap();
        assert_eq!(msg["method"], "mining.subscribe");
        assert_eq!(msg["params"][0], MINER_VERSION);

        let msg = StratumProtocol::subscribe_request(1, ProtocolVariant::EthereumStratum).unwrap();
        assert_eq!(msg["params"][1], "EthereumStratum/1.0.0");

        assert!(StratumProtocol::subscribe_request(1, ProtocolVariant::EthProxy).is_none());
    }

    #[test]
    fn test_authorize_request_variants() {
        let (method, msg) =
            StratumProtocol::authorize_request(2, ProtocolVariant::Stratum, "wallet.rig", "x");
        assert_eq!(method, "mining.authorize");
        assert_eq!(msg["params"], json!(["wallet.rig", "x"]));

        let (method, msg) =
            StratumProtocol::authorize_request(2, ProtocolVariant::EthProxy, "wallet", "x");
        assert_eq!(method, "eth_submitLogin");
        assert_eq!(msg["params"], json!(["wallet"]), "placeholder password omitted");

        let (_, msg) =
            StratumProtocol::authorize_request(2, ProtocolVariant::EthProxy, "wallet", "secret");
        assert_eq!(msg["params"], json!(["wallet", "secret"]));
    }

    #[test]
    fn test_parse_subscribe_nested() {
        let result = json!([
            [["mining.notify", "abc"], ["mining.set_difficulty", "abc"]],
            "0102",
            4
        ]);
        let info = StratumProtocol::parse_subscribe_result(&result).unwrap();
        assert_eq!(info.session_id, "abc");
        assert_eq!(info.extranonce1, "0102");
        assert_eq!(info.extranonce2_size, 4);
    }

    #[test]
    fn test_parse_subscribe_flat() {
        let result = json!([["mining.notify", "abc"], "0102", 4]);
        let info = StratumProtocol::parse_subscribe_result(&result).unwrap();
        assert_eq!(info.session_id, "abc");
        assert_eq!(info.extranonce1, "0102");
        assert_eq!(info.extranonce2_size, 4);
    }

    #[test]
    fn test_extranonce2_size_clamped() {
        let result = json!([[["mining.notify", "s"]], "00", 2]);
        let info = StratumProtocol::parse_subscribe_result(&result).unwrap();
        assert_eq!(info.extranonce2_size, 4);

        let result = json!([[["mining.notify", "s"]], "00", 16]);
        let info = StratumProtocol::parse_subscribe_result(&result).unwrap();
        assert_eq!(info.extranonce2_size, 8);
    }

    #[test]
    fn test_parse_subscribe_rejects_garbage() {
        assert!(StratumProtocol::parse_subscribe_result(&json!(true)).is_err());
        assert!(StratumProtocol::parse_subscribe_result(&json!([[]])).is_err());
        assert!(StratumProtocol::parse_subscribe_result(&json!([[], 7])).is_err());
    }

    #[test]
    fn test_parse_notify_simplified() {
        let header_hex = "ab".repeat(INPUT_SIZE);
        let target_hex = "00000000ffff0000".to_string() + &"00".repeat(24);
        let params = json!([ "job-9", header_hex, target_hex, 1234, true ]);

        let (work, pool_target) =
            StratumProtocol::parse_notify(&params, &[0u8; 32]).unwrap();
        assert!(work.valid);
        assert!(pool_target);
        assert_eq!(work.job_id, "job-9");
        assert_eq!(work.height, 1234);
        assert_eq!(work.header, [0xAB; INPUT_SIZE]);
        assert_eq!(work.target[4], 0xFF);
        assert_eq!(work.target[5], 0xFF);
    }

    #[test]
    fn test_parse_notify_short_target_padded_right() {
        let params = json!([ "job-9", "00".repeat(INPUT_SIZE), "00000000ffff", 1, false ]);
        let (work, pool_target) =
            StratumProtocol::parse_notify(&params, &[0u8; 32]).unwrap();
        assert!(pool_target);
        assert_eq!(&work.target[..6], &[0, 0, 0, 0, 0xFF, 0xFF]);
        assert!(work.target[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_parse_notify_empty_target_uses_fallback() {
        let fallback = {
            let mut t = [0u8; 32];
            t[4] = 0x7F;
            t
        };
        let params = json!([ "job-9", "00".repeat(INPUT_SIZE), "", 1, false ]);
        let (work, pool_target) = StratumProtocol::parse_notify(&params, &fallback).unwrap();
        assert!(!pool_target);
        assert_eq!(work.target, fallback);
    }

    #[test]
    fn test_parse_notify_standard_fallback() {
        let params = json!([ "job-1", "11".repeat(32), "c0ffee" ]);
        let (work, pool_target) = StratumProtocol::parse_notify(&params, &[0x42; 32]).unwrap();
        assert!(!pool_target);
        assert_eq!(&work.header[..32], &[0x11; 32][..]);
        assert!(work.header[32..].iter().all(|&b| b == 0));
        assert_eq!(work.target, [0x42; 32]);
        assert_eq!(work.height, 0);
    }

    #[test]
    fn test_parse_notify_rejects_bad_params() {
        assert!(StratumProtocol::parse_notify(&json!("nope"), &[0u8; 32]).is_err());
        assert!(StratumProtocol::parse_notify(&json!(["only-job"]), &[0u8; 32]).is_err());
        assert!(StratumProtocol::parse_notify(&json!(["", "aa", "bb", 1, true]), &[0u8; 32]).is_err());
    }

    #[test]
    fn test_nonce_hex_big_endian() {
        assert_eq!(StratumProtocol::nonce_hex(0x0102030405060708), "0102030405060708");
        assert_eq!(StratumProtocol::nonce_hex(0xFF), "00000000000000ff");
    }

    #[test]
    fn test_start_nonce_from_extranonce1() {
        assert_eq!(StratumProtocol::start_nonce_from_extranonce1("0102"), 0x0201);
        assert_eq!(StratumProtocol::start_nonce_from_extranonce1(""), 0);
        assert_eq!(StratumProtocol::start_nonce_from_extranonce1("zz"), 0);
    }

    #[test]
    fn test_submit_request_shape() {
        let msg = StratumProtocol::submit_request(7, "wallet.rig", "job-1", "02010000", "00000000000000ff");
        assert_eq!(msg["id"], 7);
        assert_eq!(msg["method"], "mining.submit");
        assert_eq!(
            msg["params"],
            json!(["wallet.rig", "job-1", "02010000", "00000000000000ff"])
        );
    }
}
