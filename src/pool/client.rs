// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/pool/client.rs
// Version: 0.3.1
//
// This file implements the stratum pool client, located in the pool
// subdirectory. One tokio task owns the socket reader and every timer in a
// single select loop; writes from device threads are serialized through the
// writer mutex so frames never interleave. Reconnects use exponential
// backoff and rotate to failover endpoints after repeated failures.
//
// Tree Location:
// - src/pool/client.rs (stratum client state machine + I/O loop)
// - Depends on: tokio, tokio-util, futures-util, serde_json, core, pool

use crate::core::difficulty::difficulty_to_target;
use crate::core::types::{Hash256, Solution};
use crate::core::work::WorkPackage;
use crate::pool::messages::{
    parse_pool_url, PendingRequest, PoolEndpoint, PoolError, PoolEvent, ProtocolVariant,
    StratumState, SubscribeInfo,
};
use crate::pool::protocol::StratumProtocol;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error, info, warn};

const LOG_TARGET: &str = "tosminer::pool::client";

/// Keepalive ping interval while authorized.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// Pending requests older than this are dropped.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// How often the pending map is swept.
pub const REQUEST_CLEANUP_INTERVAL: Duration = Duration::from_secs(10);
/// No new work for this long forces a reconnect.
pub const WORK_TIMEOUT: Duration = Duration::from_secs(60);
/// Reconnect attempts before giving up (halved before failover rotation).
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Base reconnect delay; doubles per attempt, capped at base * 2^5.
const RECONNECT_BASE_DELAY_SECS: u64 = 5;
/// Protocol line ceiling; longer lines terminate the connection.
pub const MAX_LINE_LENGTH: usize = 8192;

/// Simultaneous request timeouts implying a dead connection.
const STALE_TIMEOUT_COUNT: usize = 3;

trait PoolStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> PoolStream for T {}

type Writer = WriteHalf<Box<dyn PoolStream>>;

struct Shared {
    pools: Mutex<Vec<PoolEndpoint>>,
    current_pool: AtomicUsize,

    state: AtomicU8,
    running: AtomicBool,

    user: Mutex<String>,
    pass: Mutex<String>,
    variant: Mutex<ProtocolVariant>,
    tls_strict: AtomicBool,

    next_request_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,

    // The send lock: one in-flight socket write at a time
    writer: tokio::sync::Mutex<Option<Writer>>,

    work_tx: Mutex<Option<UnboundedSender<WorkPackage>>>,
    event_tx: Mutex<Option<UnboundedSender<PoolEvent>>>,

    current_work: Mutex<WorkPackage>,
    difficulty: Mutex<f64>,
    target: Mutex<Hash256>,
    has_pool_target: AtomicBool,
    subscription: Mutex<SubscribeInfo>,

    accepted_shares: AtomicU64,
    rejected_shares: AtomicU64,

    last_work_at: Mutex<Instant>,
    reconnect_attempts: AtomicU32,
    disconnect: Notify,
}

/// Stratum pool client. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct StratumClient {
    shared: Arc<Shared>,
}

impl StratumClient {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                pools: Mutex::new(Vec::new()),
                current_pool: AtomicUsize::new(0),
                state: AtomicU8::new(StratumState::Disconnected as u8),
                running: AtomicBool::new(false),
                user: Mutex::new(String::new()),
                pass: Mutex::new(String::new()),
                variant: Mutex::new(ProtocolVariant::Stratum),
                tls_strict: AtomicBool::new(false),
                next_request_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                writer: tokio::sync::Mutex::new(None),
                work_tx: Mutex::new(None),
                event_tx: Mutex::new(None),
                current_work: Mutex::new(WorkPackage::default()),
                difficulty: Mutex::new(1.0),
                // Max target until the pool says otherwise (difficulty 1)
                target: Mutex::new([0xFF; 32]),
                has_pool_target: AtomicBool::new(false),
                subscription: Mutex::new(SubscribeInfo {
                    extranonce2_size: 4,
                    ..Default::default()
                }),
                accepted_shares: AtomicU64::new(0),
                rejected_shares: AtomicU64::new(0),
                last_work_at: Mutex::new(Instant::now()),
                reconnect_attempts: AtomicU32::new(0),
                disconnect: Notify::new(),
            }),
        }
    }

    // ---- configuration -------------------------------------------------

    /// Append an endpoint from a stratum+tcp:// or stratum+ssl:// URL.
    /// The first one added is the primary, the rest are failovers.
    pub fn add_endpoint_url(&self, url: &str) -> Result<(), PoolError> {
        let (host, port, use_tls) = parse_pool_url(url)?;

        #[cfg(not(feature = "tls"))]
        if use_tls {
            return Err(PoolError::Config(
                "TLS pool requested but tosminer was built without the tls feature".to_string(),
            ));
        }

        let mut endpoint = PoolEndpoint::new(&host, port, use_tls);
        endpoint.user = self.shared.user.lock().unwrap().clone();
        endpoint.pass = self.shared.pass.lock().unwrap().clone();
        self.shared.pools.lock().unwrap().push(endpoint);
        Ok(())
    }

    pub fn set_credentials(&self, user: &str, pass: &str) {
        *self.shared.user.lock().unwrap() = user.to_string();
        *self.shared.pass.lock().unwrap() = pass.to_string();
        for pool in self.shared.pools.lock().unwrap().iter_mut() {
            pool.user = user.to_string();
            pool.pass = pass.to_string();
        }
    }

    pub fn set_protocol(&self, variant: ProtocolVariant) {
        *self.shared.variant.lock().unwrap() = variant;
    }

    /// Strict mode fails on invalid certificate chains; the permissive
    /// default accepts any peer certificate (pools commonly self-sign).
    pub fn set_tls_verification(&self, strict: bool) {
        self.shared.tls_strict.store(strict, Ordering::Relaxed);
    }

    pub fn set_work_sender(&self, tx: UnboundedSender<WorkPackage>) {
        *self.shared.work_tx.lock().unwrap() = Some(tx);
    }

    pub fn set_event_sender(&self, tx: UnboundedSender<PoolEvent>) {
        *self.shared.event_tx.lock().unwrap() = Some(tx);
    }

    // ---- introspection -------------------------------------------------

    pub fn state(&self) -> StratumState {
        StratumState::from_u8(self.shared.state.load(Ordering::Relaxed))
    }

    pub fn is_connected(&self) -> bool {
        self.state() >= StratumState::Connected
    }

    pub fn is_authorized(&self) -> bool {
        self.state() == StratumState::Authorized
    }

    pub fn difficulty(&self) -> f64 {
        *self.shared.difficulty.lock().unwrap()
    }

    pub fn accepted_shares(&self) -> u64 {
        self.shared.accepted_shares.load(Ordering::Relaxed)
    }

    pub fn rejected_shares(&self) -> u64 {
        self.shared.rejected_shares.load(Ordering::Relaxed)
    }

    pub fn pending_request_count(&self) -> usize {
        self.shared.pending.lock().unwrap().len()
    }

    fn set_state(&self, state: StratumState) {
        self.shared.state.store(state as u8, Ordering::Relaxed);
    }

    fn emit(&self, event: PoolEvent) {
        if let Some(tx) = self.shared.event_tx.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    // ---- lifecycle -----------------------------------------------------

    /// Run the client until disconnect() or the retry budget is exhausted.
    /// Owns the reconnect/backoff/failover policy.
    pub async fn run(&self) -> Result<(), PoolError> {
        if self.shared.pools.lock().unwrap().is_empty() {
            return Err(PoolError::Config("no pool configured".to_string()));
        }

        self.shared.running.store(true, Ordering::Relaxed);
        self.shared.reconnect_attempts.store(0, Ordering::Relaxed);

        while self.shared.running.load(Ordering::Relaxed) {
            self.set_state(StratumState::Connecting);

            let result = self.run_connection().await;
            self.teardown_connection().await;

            match result {
                Ok(()) => break, // requested disconnect
                Err(e) => error!(target: LOG_TARGET, "Connection ended: {}", e),
            }

            if !self.shared.running.load(Ordering::Relaxed) {
                break;
            }

            let mut attempts = self.shared.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let pool_count = self.shared.pools.lock().unwrap().len();

            if attempts >= MAX_RECONNECT_ATTEMPTS / 2 && pool_count > 1 {
                let next =
                    (self.shared.current_pool.load(Ordering::Relaxed) + 1) % pool_count;
                self.shared.current_pool.store(next, Ordering::Relaxed);
                info!(
                    target: LOG_TARGET,
                    "Switching to failover pool {}/{}", next + 1, pool_count
                );
                self.shared.reconnect_attempts.store(0, Ordering::Relaxed);
                attempts = 0;
            }

            if attempts >= MAX_RECONNECT_ATTEMPTS {
                error!(target: LOG_TARGET, "Max reconnect attempts reached");
                self.shared.running.store(false, Ordering::Relaxed);
                break;
            }

            let delay = RECONNECT_BASE_DELAY_SECS * (1u64 << attempts.min(5));
            info!(target: LOG_TARGET, "Reconnecting in {} seconds...", delay);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                _ = self.shared.disconnect.notified() => break,
            }
        }

        self.set_state(StratumState::Disconnected);
        Ok(())
    }

    /// Unconditional disconnect: stops the run loop and cancels its timers.
    pub fn disconnect(&self) {
        self.shared.running.store(false, Ordering::Relaxed);
        self.shared.disconnect.notify_waiters();
    }

    /// Wait (up to `timeout_ms`) for pending requests to drain, then
    /// disconnect. Returns how many pending requests completed.
    pub async fn graceful_disconnect(&self, timeout_ms: u64) -> usize {
        if self.state() == StratumState::Disconnected {
            return 0;
        }

        let initial = self.pending_request_count();
        if initial > 0 {
            info!(
                target: LOG_TARGET,
                "Waiting for {} pending request(s) to complete...", initial
            );
        }

        let mut waited = 0u64;
        while waited < timeout_ms {
            if self.pending_request_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            waited += 100;
        }

        let remaining = self.pending_request_count();
        if remaining > 0 {
            warn!(
                target: LOG_TARGET,
                "Timeout waiting for {} pending request(s), disconnecting anyway", remaining
            );
        } else if initial > 0 {
            info!(target: LOG_TARGET, "All pending requests completed");
        }

        self.disconnect();
        initial.saturating_sub(remaining)
    }

    // ---- connection ----------------------------------------------------

    async fn run_connection(&self) -> Result<(), PoolError> {
        let endpoint = {
            let pools = self.shared.pools.lock().unwrap();
            let index = self.shared.current_pool.load(Ordering::Relaxed) % pools.len();
            pools[index].clone()
        };

        info!(
            target: LOG_TARGET,
            "Connecting to {}:{} ({})...",
            endpoint.host,
            endpoint.port,
            if endpoint.use_tls { "TLS" } else { "TCP" }
        );

        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| PoolError::Transport(format!("connect failed: {}", e)))?;
        tcp.set_nodelay(true)?;

        let stream: Box<dyn PoolStream> = if endpoint.use_tls {
            #[cfg(feature = "tls")]
            {
                Box::new(self.tls_connect(tcp, &endpoint.host).await?)
            }
            #[cfg(not(feature = "tls"))]
            {
                return Err(PoolError::Config(
                    "TLS not supported (built without the tls feature)".to_string(),
                ));
            }
        } else {
            Box::new(tcp)
        };

        let (read_half, write_half) = tokio::io::split(stream);
        *self.shared.writer.lock().await = Some(write_half);

        info!(target: LOG_TARGET, "✅ Connected to {}:{}", endpoint.host, endpoint.port);
        self.set_state(StratumState::Connected);
        self.shared.reconnect_attempts.store(0, Ordering::Relaxed);
        *self.shared.last_work_at.lock().unwrap() = Instant::now();
        self.emit(PoolEvent::Connected);

        // Handshake: EthProxy has no subscribe step
        let variant = *self.shared.variant.lock().unwrap();
        match StratumProtocol::subscribe_request(self.next_id(), variant) {
            Some(message) => {
                let id = message["id"].as_u64().unwrap_or(0);
                self.send_message(id, "mining.subscribe", &message, true).await?;
            }
            None => {
                self.set_state(StratumState::Subscribed);
                self.send_authorize().await?;
            }
        }

        let mut lines = FramedRead::new(
            read_half,
            LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        );

        // All timers live on this loop; expiry and reads are serialized
        let start = tokio::time::Instant::now();
        let mut keepalive =
            tokio::time::interval_at(start + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
        let mut cleanup = tokio::time::interval_at(
            start + REQUEST_CLEANUP_INTERVAL,
            REQUEST_CLEANUP_INTERVAL,
        );
        let work_poll = Duration::from_secs(5);
        let mut work_check = tokio::time::interval_at(start + work_poll, work_poll);

        loop {
            tokio::select! {
                maybe_line = lines.next() => {
                    match maybe_line {
                        Some(Ok(line)) => self.process_line(&line).await?,
                        Some(Err(e)) => {
                            return Err(PoolError::Protocol(format!("line framing: {}", e)));
                        }
                        None => {
                            return Err(PoolError::Transport(
                                "connection closed by pool".to_string(),
                            ));
                        }
                    }
                }
                _ = keepalive.tick() => {
                    if self.is_authorized() {
                        let id = self.next_id();
                        let message = StratumProtocol::ping_request(id);
                        // Response shape (or an unknown-method error) is ignored
                        if let Err(e) = self.send_message(id, "mining.ping", &message, false).await {
                            return Err(e);
                        }
                    }
                }
                _ = cleanup.tick() => {
                    self.cleanup_pending()?;
                }
                _ = work_check.tick() => {
                    if self.is_authorized() {
                        let elapsed = self.shared.last_work_at.lock().unwrap().elapsed();
                        if elapsed >= WORK_TIMEOUT {
                            return Err(PoolError::Timeout(format!(
                                "no new work received for {} seconds",
                                elapsed.as_secs()
                            )));
                        }
                    }
                }
                _ = self.shared.disconnect.notified() => {
                    return Ok(());
                }
            }
        }
    }

    #[cfg(feature = "tls")]
    async fn tls_connect(
        &self,
        tcp: TcpStream,
        host: &str,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, PoolError> {
        use rustls::pki_types::ServerName;

        let strict = self.shared.tls_strict.load(Ordering::Relaxed);
        let config = if strict {
            info!(target: LOG_TARGET, "TLS strict verification enabled");
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        } else {
            debug!(target: LOG_TARGET, "TLS permissive mode (accepting any certificate)");
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(tls::AcceptAnyCert::new()))
                .with_no_client_auth()
        };

        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| PoolError::Config(format!("invalid TLS hostname '{}'", host)))?;

        connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| PoolError::Transport(format!("TLS handshake failed: {}", e)))
    }

    async fn teardown_connection(&self) {
        self.set_state(StratumState::Disconnected);
        *self.shared.writer.lock().await = None;
        self.shared.pending.lock().unwrap().clear();
        self.emit(PoolEvent::Disconnected);
    }

    // ---- outbound ------------------------------------------------------

    fn next_id(&self) -> u64 {
        self.shared.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Write one request line. When `track` is set the pending entry is
    /// registered before the bytes leave the socket, so a response can
    /// never arrive for an unknown id.
    async fn send_message(
        &self,
        id: u64,
        method: &str,
        message: &Value,
        track: bool,
    ) -> Result<(), PoolError> {
        if track {
            self.shared.pending.lock().unwrap().insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    issued_at: Instant::now(),
                },
            );
        }

        let line = format!("{}\n", message);
        debug!(target: LOG_TARGET, "Send: {}", line.trim_end());

        let mut guard = self.shared.writer.lock().await;
        let result = match guard.as_mut() {
            Some(writer) => {
                let write = writer.write_all(line.as_bytes()).await;
                match write {
                    Ok(()) => writer.flush().await.map_err(PoolError::Io),
                    Err(e) => Err(PoolError::Io(e)),
                }
            }
            None => Err(PoolError::Transport("not connected".to_string())),
        };
        drop(guard);

        if result.is_err() && track {
            self.shared.pending.lock().unwrap().remove(&id);
        }
        result
    }

    async fn send_authorize(&self) -> Result<(), PoolError> {
        let variant = *self.shared.variant.lock().unwrap();
        let (user, pass) = {
            let pools = self.shared.pools.lock().unwrap();
            let index = self.shared.current_pool.load(Ordering::Relaxed) % pools.len();
            let pool = &pools[index];
            let user = if pool.user.is_empty() {
                self.shared.user.lock().unwrap().clone()
            } else {
                pool.user.clone()
            };
            let pass = if pool.pass.is_empty() {
                self.shared.pass.lock().unwrap().clone()
            } else {
                pool.pass.clone()
            };
            (user, pass)
        };

        let id = self.next_id();
        let (method, message) = StratumProtocol::authorize_request(id, variant, &user, &pass);
        self.send_message(id, &method, &message, true).await
    }

    /// Submit a verified solution. Called from the solution-forwarding
    /// task; concurrent submissions serialize on the writer lock.
    pub async fn submit_solution(&self, solution: &Solution, job_id: &str) {
        if !self.is_authorized() {
            warn!(target: LOG_TARGET, "Cannot submit: not authorized");
            return;
        }

        let work = self.shared.current_work.lock().unwrap().clone();
        let extranonce2 = work.extranonce2_hex(solution.nonce);
        let nonce_hex = StratumProtocol::nonce_hex(solution.nonce);
        let user = self.shared.user.lock().unwrap().clone();

        let id = self.next_id();
        let message = StratumProtocol::submit_request(id, &user, job_id, &extranonce2, &nonce_hex);

        info!(
            target: LOG_TARGET,
            "📤 Submitting share (job={}, dev={}, en2={}, nonce={})",
            job_id,
            solution.device_index,
            extranonce2,
            nonce_hex
        );

        if let Err(e) = self.send_message(id, "mining.submit", &message, true).await {
            error!(target: LOG_TARGET, "Failed to submit share: {}", e);
        }
    }

    // ---- inbound -------------------------------------------------------

    async fn process_line(&self, line: &str) -> Result<(), PoolError> {
        debug!(target: LOG_TARGET, "Recv: {}", line);

        let message: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                // Malformed JSON is logged and dropped; the connection lives
                error!(target: LOG_TARGET, "JSON parse error: {}", e);
                return Ok(());
            }
        };

        let has_id = message.get("id").map_or(false, |id| !id.is_null());
        let has_method = message.get("method").is_some();

        if has_id && !has_method {
            self.handle_response(&message).await
        } else if has_method {
            self.handle_notification(&message)
        } else {
            warn!(target: LOG_TARGET, "Unknown message format: {}", line);
            Ok(())
        }
    }

    fn extract_error(message: &Value) -> Option<String> {
        let error = message.get("error")?;
        if error.is_null() {
            return None;
        }
        let text = if let Some(arr) = error.as_array() {
            arr.get(1)
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string()
        } else if let Some(s) = error.as_str() {
            s.to_string()
        } else if let Some(msg) = error.get("message").and_then(Value::as_str) {
            msg.to_string()
        } else {
            "unknown error".to_string()
        };
        Some(text)
    }

    async fn handle_response(&self, message: &Value) -> Result<(), PoolError> {
        let id = message.get("id").and_then(Value::as_u64).unwrap_or(0);

        let method = self
            .shared
            .pending
            .lock()
            .unwrap()
            .remove(&id)
            .map(|req| req.method)
            .unwrap_or_default();

        let error_msg = Self::extract_error(message);

        match method.as_str() {
            "mining.subscribe" => {
                if let Some(err) = error_msg {
                    return Err(PoolError::Protocol(format!("subscription failed: {}", err)));
                }

                let info = StratumProtocol::parse_subscribe_result(
                    message.get("result").unwrap_or(&Value::Null),
                )?;
                info!(
                    target: LOG_TARGET,
                    "Subscribed (session={}, extranonce1={}, extranonce2_size={})",
                    info.session_id,
                    info.extranonce1,
                    info.extranonce2_size
                );
                *self.shared.subscription.lock().unwrap() = info;
                self.set_state(StratumState::Subscribed);
                self.send_authorize().await?;
            }

            "mining.authorize" | "eth_submitLogin" => {
                if let Some(err) = error_msg {
                    return Err(PoolError::Protocol(format!("authorization failed: {}", err)));
                }

                // Absent result counts as success; a boolean must be true
                let authorized = message
                    .get("result")
                    .map_or(true, |r| r.as_bool().unwrap_or(true));
                if authorized {
                    let user = self.shared.user.lock().unwrap().clone();
                    info!(target: LOG_TARGET, "✅ Authorized with pool as {}", user);
                    self.set_state(StratumState::Authorized);
                } else {
                    return Err(PoolError::Protocol("authorization rejected".to_string()));
                }
            }

            "mining.submit" => {
                if let Some(err) = error_msg {
                    warn!(target: LOG_TARGET, "❌ Share rejected: {}", err);
                    self.shared.rejected_shares.fetch_add(1, Ordering::Relaxed);
                    self.emit(PoolEvent::ShareRejected { reason: err });
                } else {
                    let accepted = message
                        .get("result")
                        .map_or(false, |r| r.as_bool().unwrap_or(false));
                    if accepted {
                        info!(target: LOG_TARGET, "✅ Share accepted!");
                        self.shared.accepted_shares.fetch_add(1, Ordering::Relaxed);
                        self.emit(PoolEvent::ShareAccepted);
                    } else {
                        warn!(target: LOG_TARGET, "❌ Share rejected");
                        self.shared.rejected_shares.fetch_add(1, Ordering::Relaxed);
                        self.emit(PoolEvent::ShareRejected {
                            reason: "rejected".to_string(),
                        });
                    }
                }
            }

            // Unmatched id: most likely the ping reply, which is untracked
            _ => debug!(target: LOG_TARGET, "Response for unknown request id {}", id),
        }

        Ok(())
    }

    fn handle_notification(&self, message: &Value) -> Result<(), PoolError> {
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let params = message.get("params").unwrap_or(&Value::Null);

        match method {
            "mining.notify" => self.handle_notify(params),
            "mining.set_difficulty" => {
                self.handle_set_difficulty(params);
                Ok(())
            }
            "mining.set_target" => {
                self.handle_set_target(params);
                Ok(())
            }
            "client.show_message" => {
                if let Some(text) = params.get(0).and_then(Value::as_str) {
                    info!(target: LOG_TARGET, "Pool message: {}", text);
                }
                Ok(())
            }
            "client.reconnect" => {
                info!(target: LOG_TARGET, "Pool requested reconnect");
                Err(PoolError::Transport("pool requested reconnect".to_string()))
            }
            _ => {
                debug!(target: LOG_TARGET, "Unknown notification: {}", method);
                Ok(())
            }
        }
    }

    fn handle_notify(&self, params: &Value) -> Result<(), PoolError> {
        let fallback = *self.shared.target.lock().unwrap();
        let (mut work, has_pool_target) = StratumProtocol::parse_notify(params, &fallback)?;

        {
            self.shared
                .has_pool_target
                .store(has_pool_target, Ordering::Relaxed);
            if has_pool_target {
                *self.shared.target.lock().unwrap() = work.target;
            }
        }

        // Stamp the subscription data the submit path needs
        let subscription = self.shared.subscription.lock().unwrap().clone();
        work.extranonce1 = subscription.extranonce1.clone();
        work.extranonce2_size = subscription.extranonce2_size;
        work.start_nonce =
            StratumProtocol::start_nonce_from_extranonce1(&subscription.extranonce1);

        // A notification resets the work-timeout deadline
        *self.shared.last_work_at.lock().unwrap() = Instant::now();

        {
            let mut current = self.shared.current_work.lock().unwrap();
            if current.valid && current.job_id != work.job_id {
                let age = current.age();
                if age.as_secs() > 30 {
                    warn!(
                        target: LOG_TARGET,
                        "Previous job {} was {}s old", current.job_id, age.as_secs()
                    );
                }
            }
            *current = work.clone();
        }

        info!(
            target: LOG_TARGET,
            "📋 New job: {} (height={})", work.job_id, work.height
        );

        if let Some(tx) = self.shared.work_tx.lock().unwrap().as_ref() {
            let _ = tx.send(work);
        }
        Ok(())
    }

    fn handle_set_difficulty(&self, params: &Value) {
        let difficulty = match params.get(0).and_then(Value::as_f64) {
            Some(d) => d,
            None => {
                error!(target: LOG_TARGET, "Invalid set_difficulty params");
                return;
            }
        };

        *self.shared.difficulty.lock().unwrap() = difficulty;
        let derived = difficulty_to_target(difficulty);

        // A pool-sent target takes precedence until the next notify
        // without one
        if !self.shared.has_pool_target.load(Ordering::Relaxed) {
            *self.shared.target.lock().unwrap() = derived;
            info!(
                target: LOG_TARGET,
                "Difficulty set to {} (using derived target)", difficulty
            );

            let mut current = self.shared.current_work.lock().unwrap();
            if current.valid {
                current.target = derived;
            }
        } else {
            info!(
                target: LOG_TARGET,
                "Difficulty set to {} (keeping pool target)", difficulty
            );
        }
    }

    fn handle_set_target(&self, params: &Value) {
        let target_hex = match params.get(0).and_then(Value::as_str) {
            Some(t) => t,
            None => {
                error!(target: LOG_TARGET, "Invalid set_target params");
                return;
            }
        };
        let bytes = match hex::decode(target_hex) {
            Ok(b) => b,
            Err(e) => {
                error!(target: LOG_TARGET, "Bad set_target hex: {}", e);
                return;
            }
        };

        let mut target = [0u8; 32];
        let len = bytes.len().min(32);
        target[..len].copy_from_slice(&bytes[..len]);

        *self.shared.target.lock().unwrap() = target;
        self.shared.has_pool_target.store(true, Ordering::Relaxed);
        info!(target: LOG_TARGET, "Pool set explicit target");
    }

    // ---- timers --------------------------------------------------------

    /// Sweep pending requests older than REQUEST_TIMEOUT. Timed-out
    /// submits count as rejected shares; enough simultaneous timeouts mean
    /// the connection is dead.
    fn cleanup_pending(&self) -> Result<(), PoolError> {
        let now = Instant::now();
        let mut timed_out: Vec<(u64, String)> = Vec::new();

        {
            let mut pending = self.shared.pending.lock().unwrap();
            pending.retain(|id, request| {
                let age = now.duration_since(request.issued_at);
                if age >= REQUEST_TIMEOUT {
                    warn!(
                        target: LOG_TARGET,
                        "Request {} ({}) timed out after {}s",
                        id,
                        request.method,
                        age.as_secs()
                    );
                    timed_out.push((*id, request.method.clone()));
                    false
                } else {
                    true
                }
            });
        }

        for (_, method) in &timed_out {
            if method == "mining.submit" {
                self.shared.rejected_shares.fetch_add(1, Ordering::Relaxed);
                self.emit(PoolEvent::ShareRejected {
                    reason: "timeout".to_string(),
                });
            }
        }

        if timed_out.len() >= STALE_TIMEOUT_COUNT {
            return Err(PoolError::Timeout(
                "multiple request timeouts, connection may be stale".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StratumClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "tls")]
mod tls {
    //! Permissive certificate verifier for the common self-signed-pool
    //! setup. Signatures are still checked against the presented key; only
    //! chain validation is skipped.

    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};
    use std::sync::Arc;
    use tracing::debug;

    #[derive(Debug)]
    pub struct AcceptAnyCert {
        provider: Arc<CryptoProvider>,
    }

    impl AcceptAnyCert {
        pub fn new() -> Self {
            Self {
                provider: Arc::new(rustls::crypto::ring::default_provider()),
            }
        }
    }

    impl ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            debug!(
                target: "tosminer::pool::client",
                "Accepting certificate from {:?} ({} bytes)",
                server_name,
                end_entity.len()
            );
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.provider
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
