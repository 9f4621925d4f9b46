//! Gateway (WebSocket) transport for the Discord API.
//!
//! This module owns the WebSocket connection lifecycle:
//!   - connect → receive HELLO → send IDENTIFY
//!   - background heartbeat task
//!   - sequence number + session_id tracking
//!   - automatic reconnect + RESUME on disconnect
//!   - gateway send rate limiting (120 events / 60s)
//!
//! The rest of the codebase consumes a stream of [`GatewayEvent`] values
//! without ever touching `tokio_tungstenite` directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::events::GatewayEvent;
use crate::types::{GatewayPayload, Intents};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Discord allows at most 120 gateway sends per 60 seconds.
const SEND_BUDGET_MAX: u32 = 120;
const SEND_BUDGET_WINDOW: Duration = Duration::from_secs(60);

/// Maximum number of consecutive reconnect attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("timed out waiting for HELLO")]
    HelloTimeout,
    #[error("stream ended before HELLO")]
    StreamEnded,
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("unexpected gateway frame: {0}")]
    Protocol(String),
    #[error("malformed gateway payload: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Gateway send rate limiter
// ---------------------------------------------------------------------------

/// Sliding-window rate limiter for outbound gateway messages.
struct SendRateLimiter {
    timestamps: Vec<Instant>,
    budget: u32,
    window: Duration,
}

impl SendRateLimiter {
    fn new(budget: u32, window: Duration) -> Self {
        Self {
            timestamps: Vec::with_capacity(budget as usize),
            budget,
            window,
        }
    }

    /// How long the caller should wait before sending, or `None` if it can
    /// send immediately. Does **not** record the send.
    fn delay(&self) -> Option<Duration> {
        let now = Instant::now();
        let in_window: Vec<Instant> = self
            .timestamps
            .iter()
            .copied()
            .filter(|t| now.duration_since(*t) < self.window)
            .collect();

        if (in_window.len() as u32) < self.budget {
            return None;
        }

        let oldest = in_window.into_iter().min()?;
        let expires_at = oldest + self.window;
        (expires_at > now).then(|| expires_at - now)
    }

    /// Record a send at the current instant and prune old entries.
    fn record(&mut self) {
        let now = Instant::now();
        self.timestamps
            .retain(|&t| now.duration_since(t) < self.window);
        self.timestamps.push(now);
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Options for connecting to the Discord gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: Intents,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Internal session state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct SessionState {
    session_id: Option<String>,
    resume_gateway_url: Option<String>,
    sequence: Option<u64>,
}

impl SessionState {
    /// `(session_id, seq)` when the session can be resumed.
    fn resumable(&self) -> Option<(&str, u64)> {
        Some((self.session_id.as_deref()?, self.sequence?))
    }
}

// ---------------------------------------------------------------------------
// WebSocket halves
// ---------------------------------------------------------------------------

type WsConnection =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsConnection, WsMessage>;
type WsStream = futures_util::stream::SplitStream<WsConnection>;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Handle to a running gateway connection.
///
/// The background driver keeps running until the event receiver is dropped
/// or an unrecoverable error occurs.
pub struct GatewayHandle {
    /// Send arbitrary JSON payloads on the gateway (rate-limited).
    pub sender: Sender<serde_json::Value>,
    /// Receive typed events.
    pub events: Receiver<GatewayEvent>,
    /// The background driver task.
    pub driver_handle: tokio::task::JoinHandle<()>,
}

/// Spawn the gateway driver and return a [`GatewayHandle`].
pub fn connect(config: GatewayConfig) -> GatewayHandle {
    let (event_tx, event_rx) = async_channel::bounded::<GatewayEvent>(256);
    let (send_tx, send_rx) = async_channel::bounded::<serde_json::Value>(64);

    let driver_handle = tokio::spawn(gateway_driver(config, event_tx, send_rx));

    GatewayHandle {
        sender: send_tx,
        events: event_rx,
        driver_handle,
    }
}

// ---------------------------------------------------------------------------
// The main driver loop (runs in a spawned task)
// ---------------------------------------------------------------------------

async fn gateway_driver(
    config: GatewayConfig,
    event_tx: Sender<GatewayEvent>,
    send_rx: Receiver<serde_json::Value>,
) {
    let session = Arc::new(Mutex::new(SessionState::default()));
    let mut reconnect_attempts: u32 = 0;

    loop {
        let url = {
            let s = session.lock().await;
            gateway_url(s.resume_gateway_url.as_deref())
        };

        info!(url = %url, "connecting to Discord gateway");

        let (ws_stream, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(pair) => {
                reconnect_attempts = 0;
                pair
            }
            Err(e) => {
                error!(error = %e, "failed to connect to gateway");
                reconnect_attempts += 1;
                if reconnect_attempts > MAX_RECONNECT_ATTEMPTS {
                    error!("exceeded max reconnect attempts, giving up");
                    return;
                }
                let backoff = backoff_delay(reconnect_attempts);
                warn!(
                    delay_ms = backoff.as_millis() as u64,
                    attempt = reconnect_attempts,
                    "backing off before reconnect"
                );
                tokio::time::sleep(backoff).await;
                continue;
            }
        };

        debug!("WebSocket connected");

        let (ws_write, mut ws_read) = ws_stream.split();
        let ws_write = Arc::new(Mutex::new(ws_write));
        let rate_limiter = Arc::new(Mutex::new(SendRateLimiter::new(
            SEND_BUDGET_MAX,
            SEND_BUDGET_WINDOW,
        )));

        // 1. HELLO
        let heartbeat_interval = match read_hello(&mut ws_read).await {
            Ok(interval) => interval,
            Err(e) => {
                error!(error = %e, "failed to read HELLO from gateway");
                reconnect_attempts += 1;
                tokio::time::sleep(backoff_delay(reconnect_attempts)).await;
                continue;
            }
        };

        debug!(interval_ms = heartbeat_interval, "received HELLO");

        // 2. IDENTIFY or RESUME
        let handshake = {
            let s = session.lock().await;
            match s.resumable() {
                Some((session_id, seq)) => resume_payload(&config.token, session_id, seq),
                None => identify_payload(&config),
            }
        };
        let is_resume = handshake["op"] == 6;

        if let Err(e) = rate_limited_send(&ws_write, &rate_limiter, &handshake).await {
            error!(error = %e, resume = is_resume, "failed to send handshake");
            reconnect_attempts += 1;
            tokio::time::sleep(backoff_delay(reconnect_attempts)).await;
            continue;
        }
        info!(resume = is_resume, "sent gateway handshake");

        // 3. Heartbeat task
        let hb_write = Arc::clone(&ws_write);
        let hb_session = Arc::clone(&session);
        let hb_rate_limiter = Arc::clone(&rate_limiter);
        let (hb_cancel_tx, hb_cancel_rx) = async_channel::bounded::<()>(1);

        let heartbeat_handle = tokio::spawn(async move {
            // Discord says the first heartbeat goes out after
            // `heartbeat_interval * jitter` where jitter ∈ [0, 1).
            let jitter = rand::random::<f64>();
            let first_delay = Duration::from_millis((heartbeat_interval as f64 * jitter) as u64);
            tokio::select! {
                _ = tokio::time::sleep(first_delay) => {}
                _ = hb_cancel_rx.recv() => { return; }
            }

            let mut interval = tokio::time::interval(Duration::from_millis(heartbeat_interval));
            // The first tick fires immediately; we already waited above.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let seq = hb_session.lock().await.sequence;
                        let heartbeat = json!({"op": 1, "d": seq});

                        if let Err(e) = rate_limited_send(&hb_write, &hb_rate_limiter, &heartbeat).await {
                            warn!(error = %e, "heartbeat send failed, stopping heartbeat task");
                            return;
                        }
                        debug!(seq, "sent heartbeat");
                    }
                    _ = hb_cancel_rx.recv() => {
                        debug!("heartbeat task cancelled");
                        return;
                    }
                }
            }
        });

        // 4. Main read loop
        let disconnect_reason = read_loop(
            &mut ws_read,
            &ws_write,
            &rate_limiter,
            &event_tx,
            &session,
            &send_rx,
        )
        .await;

        // 5. Cleanup: cancel heartbeat, decide whether to reconnect
        let _ = hb_cancel_tx.send(()).await;
        heartbeat_handle.abort();

        {
            let mut w = ws_write.lock().await;
            let _ = w.send(WsMessage::Close(None)).await;
        }

        match disconnect_reason {
            DisconnectReason::ShouldResume => {
                info!("will attempt RESUME");
            }
            DisconnectReason::ShouldReidentify => {
                info!("session invalidated, will re-IDENTIFY");
                let mut s = session.lock().await;
                s.session_id = None;
                s.sequence = None;
            }
            DisconnectReason::Fatal => {
                error!("fatal gateway error, shutting down");
                return;
            }
            DisconnectReason::EventChannelClosed => {
                info!("event channel closed, shutting down gateway driver");
                return;
            }
        }

        reconnect_attempts += 1;
        if reconnect_attempts > MAX_RECONNECT_ATTEMPTS {
            error!("exceeded max reconnect attempts, giving up");
            return;
        }
        let backoff = backoff_delay(reconnect_attempts);
        warn!(
            delay_ms = backoff.as_millis() as u64,
            attempt = reconnect_attempts,
            "reconnecting after backoff"
        );
        tokio::time::sleep(backoff).await;
    }
}

// ---------------------------------------------------------------------------
// Disconnect reason
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum DisconnectReason {
    ShouldResume,
    ShouldReidentify,
    Fatal,
    EventChannelClosed,
}

impl DisconnectReason {
    /// Map a gateway close code to what we should do next.
    fn from_close_code(code: u16) -> Self {
        match code {
            // authentication failed, invalid shard, sharding required,
            // invalid API version, invalid intents, disallowed intents
            4004 | 4010 | 4011 | 4012 | 4013 | 4014 => DisconnectReason::Fatal,
            // invalid seq, session timed out
            4007 | 4009 => DisconnectReason::ShouldReidentify,
            _ => DisconnectReason::ShouldResume,
        }
    }
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

async fn read_loop(
    ws_read: &mut WsStream,
    ws_write: &Arc<Mutex<WsSink>>,
    rate_limiter: &Arc<Mutex<SendRateLimiter>>,
    event_tx: &Sender<GatewayEvent>,
    session: &Arc<Mutex<SessionState>>,
    send_rx: &Receiver<serde_json::Value>,
) -> DisconnectReason {
    loop {
        tokio::select! {
            biased;

            // Outbound sends from the bot logic (e.g. update presence).
            Ok(payload) = send_rx.recv() => {
                if let Err(e) = rate_limited_send(ws_write, rate_limiter, &payload).await {
                    warn!(error = %e, "failed to send payload on gateway");
                }
            }

            msg = ws_read.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read error");
                        return DisconnectReason::ShouldResume;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        return DisconnectReason::ShouldResume;
                    }
                };

                match msg {
                    WsMessage::Text(text) => {
                        let payload: GatewayPayload = match serde_json::from_str(&text) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(error = %e, "failed to parse gateway payload");
                                continue;
                            }
                        };

                        if let Some(s) = payload.s {
                            session.lock().await.sequence = Some(s);
                        }

                        let event = GatewayEvent::from_payload(payload);

                        // Session-relevant events are handled here.
                        match &event {
                            GatewayEvent::Ready(ready) => {
                                let mut sess = session.lock().await;
                                sess.session_id = Some(ready.session_id.clone());
                                sess.resume_gateway_url = Some(ready.resume_gateway_url.clone());
                                info!(
                                    session_id = %ready.session_id,
                                    user = %ready.user.username,
                                    "gateway READY"
                                );
                            }

                            GatewayEvent::HeartbeatRequest => {
                                let seq = session.lock().await.sequence;
                                let heartbeat = json!({"op": 1, "d": seq});
                                if let Err(e) = rate_limited_send(ws_write, rate_limiter, &heartbeat).await {
                                    warn!(error = %e, "failed to send requested heartbeat");
                                }
                                debug!("sent requested heartbeat");
                                continue;
                            }

                            GatewayEvent::HeartbeatAck => {
                                debug!("heartbeat acknowledged");
                            }

                            GatewayEvent::Reconnect => {
                                info!("gateway requested reconnect (op 7)");
                                return DisconnectReason::ShouldResume;
                            }

                            GatewayEvent::InvalidSession(resumable) => {
                                warn!(resumable, "session invalidated (op 9)");
                                if *resumable {
                                    tokio::time::sleep(Duration::from_secs(2)).await;
                                    return DisconnectReason::ShouldResume;
                                }
                                tokio::time::sleep(Duration::from_secs(3)).await;
                                return DisconnectReason::ShouldReidentify;
                            }

                            _ => {}
                        }

                        if event_tx.send(event).await.is_err() {
                            info!("event channel closed by consumer");
                            return DisconnectReason::EventChannelClosed;
                        }
                    }

                    WsMessage::Close(frame) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        warn!(close_code = ?code, "WebSocket closed by server");
                        let reason = code
                            .map(DisconnectReason::from_close_code)
                            .unwrap_or(DisconnectReason::ShouldResume);
                        if reason == DisconnectReason::Fatal {
                            error!(close_code = ?code, "unrecoverable close code");
                        }
                        return reason;
                    }

                    // Ping/Pong/Binary are ignored.
                    _ => {}
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The URL to connect to, with the v10 JSON query appended when missing.
fn gateway_url(resume_url: Option<&str>) -> String {
    let url = resume_url.unwrap_or(DEFAULT_GATEWAY_URL);
    if url.contains("v=10") {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&v=10&encoding=json", url)
    } else {
        format!("{}?v=10&encoding=json", url)
    }
}

fn identify_payload(config: &GatewayConfig) -> serde_json::Value {
    json!({
        "op": 2,
        "d": {
            "token": config.token,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "chatterbox",
                "device": "chatterbox"
            },
            "intents": config.intents.bits(),
        }
    })
}

fn resume_payload(token: &str, session_id: &str, seq: u64) -> serde_json::Value {
    json!({
        "op": 6,
        "d": {
            "token": token,
            "session_id": session_id,
            "seq": seq,
        }
    })
}

/// Read the HELLO payload and return its heartbeat interval in ms.
async fn read_hello(stream: &mut WsStream) -> Result<u64, GatewayError> {
    let msg = tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .map_err(|_| GatewayError::HelloTimeout)?
        .ok_or(GatewayError::StreamEnded)??;

    match msg {
        WsMessage::Text(text) => parse_hello(&text),
        other => Err(GatewayError::Protocol(format!(
            "expected text message for HELLO, got {:?}",
            other
        ))),
    }
}

fn parse_hello(text: &str) -> Result<u64, GatewayError> {
    let payload: GatewayPayload = serde_json::from_str(text)?;

    if payload.op != 10 {
        return Err(GatewayError::Protocol(format!(
            "expected op 10 (HELLO), got op {}",
            payload.op
        )));
    }

    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(|v| v.as_u64())
        .ok_or_else(|| GatewayError::Protocol("HELLO missing heartbeat_interval".to_string()))
}

/// Send a JSON payload on the WebSocket, respecting the send rate limiter.
async fn rate_limited_send(
    ws_write: &Arc<Mutex<WsSink>>,
    rate_limiter: &Arc<Mutex<SendRateLimiter>>,
    payload: &serde_json::Value,
) -> Result<(), GatewayError> {
    loop {
        let delay = rate_limiter.lock().await.delay();
        match delay {
            Some(d) => {
                debug!(
                    delay_ms = d.as_millis() as u64,
                    "gateway send rate-limited, waiting"
                );
                tokio::time::sleep(d).await;
            }
            None => break,
        }
    }

    rate_limiter.lock().await.record();

    let text = serde_json::to_string(payload)?;
    ws_write.lock().await.send(WsMessage::Text(text)).await?;
    Ok(())
}

/// Exponential backoff with jitter, capped at 60 s.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(6));
    let jitter = (rand::random::<f64>() * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(jitter.min(60_000.0) as u64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- SendRateLimiter ---------------------------------------------------

    #[test]
    fn limiter_allows_sends_under_budget() {
        let mut limiter = SendRateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..2 {
            assert!(limiter.delay().is_none());
            limiter.record();
        }
        assert!(limiter.delay().is_none());
    }

    #[test]
    fn limiter_delays_when_budget_spent() {
        let mut limiter = SendRateLimiter::new(2, Duration::from_secs(60));
        limiter.record();
        limiter.record();
        let delay = limiter.delay().expect("should be rate-limited");
        assert!(delay <= Duration::from_secs(60));
        assert!(delay > Duration::from_secs(50));
    }

    #[test]
    fn limiter_forgets_sends_outside_window() {
        let mut limiter = SendRateLimiter::new(1, Duration::from_millis(10));
        limiter.record();
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.delay().is_none());
    }

    // -- backoff_delay() ---------------------------------------------------

    #[test]
    fn backoff_grows_and_caps() {
        let first = backoff_delay(1);
        assert!(first >= Duration::from_millis(1500) && first <= Duration::from_millis(2500));
        for attempt in 0..20 {
            assert!(backoff_delay(attempt) <= Duration::from_secs(60));
        }
    }

    // -- payloads ----------------------------------------------------------

    #[test]
    fn identify_carries_token_and_intents() {
        let config = GatewayConfig {
            token: "tkn".to_string(),
            intents: Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT,
        };
        let payload = identify_payload(&config);
        assert_eq!(payload["op"], 2);
        assert_eq!(payload["d"]["token"], "tkn");
        assert_eq!(payload["d"]["intents"], 512 | 32768);
    }

    #[test]
    fn resume_carries_session_and_seq() {
        let payload = resume_payload("tkn", "sess", 42);
        assert_eq!(payload["op"], 6);
        assert_eq!(payload["d"]["session_id"], "sess");
        assert_eq!(payload["d"]["seq"], 42);
    }

    #[test]
    fn session_is_resumable_only_with_id_and_seq() {
        let mut s = SessionState::default();
        assert!(s.resumable().is_none());
        s.session_id = Some("abc".to_string());
        assert!(s.resumable().is_none());
        s.sequence = Some(3);
        assert_eq!(s.resumable(), Some(("abc", 3)));
    }

    #[test]
    fn gateway_url_appends_query_when_missing() {
        assert_eq!(gateway_url(None), DEFAULT_GATEWAY_URL);
        assert_eq!(
            gateway_url(Some("wss://resume.discord.gg")),
            "wss://resume.discord.gg?v=10&encoding=json"
        );
        assert_eq!(
            gateway_url(Some("wss://resume.discord.gg/?compress=false")),
            "wss://resume.discord.gg/?compress=false&v=10&encoding=json"
        );
    }

    #[test]
    fn parse_hello_reads_interval() {
        let interval = parse_hello(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#).unwrap();
        assert_eq!(interval, 41250);
    }

    #[test]
    fn parse_hello_rejects_other_opcodes() {
        let err = parse_hello(r#"{"op":11}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Protocol(_)));
    }

    #[test]
    fn close_codes_map_to_reasons() {
        assert_eq!(DisconnectReason::from_close_code(4004), DisconnectReason::Fatal);
        assert_eq!(DisconnectReason::from_close_code(4014), DisconnectReason::Fatal);
        assert_eq!(
            DisconnectReason::from_close_code(4009),
            DisconnectReason::ShouldReidentify
        );
        assert_eq!(
            DisconnectReason::from_close_code(1001),
            DisconnectReason::ShouldResume
        );
    }
}
