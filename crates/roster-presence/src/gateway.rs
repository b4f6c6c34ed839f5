//! Discord gateway client.
//!
//! Keeps one WebSocket session open, feeds dispatches into the
//! [`VoiceStateCache`] and forwards the resulting [`PresenceEvent`]s to the
//! reconciler over an mpsc channel.

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use roster_engine::PresenceEvent;

use crate::PresenceError;
use crate::cache::VoiceStateCache;
use crate::types::{
    ConnectionProperties, GatewayPayload, GuildCreate, GuildMemberUpdate, Hello, INTENTS,
    Identify, OP_DISPATCH, OP_HEARTBEAT, OP_HEARTBEAT_ACK, OP_HELLO, OP_IDENTIFY,
    OP_INVALID_SESSION, OP_RECONNECT, OutgoingPayload, VoiceState,
};

/// Default gateway endpoint (v10, JSON encoding).
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

const HELLO_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Close codes after which reconnecting is pointless.
const FATAL_CLOSE_CODES: &[u16] = &[4004, 4010, 4011, 4012, 4013, 4014];

/// Gateway WebSocket client.
pub struct GatewayClient {
    url: String,
    token: String,
    cache: Arc<VoiceStateCache>,
    events: mpsc::Sender<PresenceEvent>,
}

impl GatewayClient {
    pub fn new(
        token: impl Into<String>,
        cache: Arc<VoiceStateCache>,
        events: mpsc::Sender<PresenceEvent>,
    ) -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            token: token.into(),
            cache,
            events,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Connect and keep the session alive until shutdown.
    ///
    /// Reconnects with exponential backoff on any error except a rejected
    /// session, which is returned.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), PresenceError> {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            max_elapsed_time: None,
            ..Default::default()
        };

        loop {
            if *shutdown_rx.borrow() {
                info!("gateway client shutting down");
                return Ok(());
            }

            match self.connect_and_process(&mut shutdown_rx, &mut backoff).await {
                Ok(()) => return Ok(()),
                Err(e @ PresenceError::Rejected(_)) => {
                    error!(error = %e, "gateway rejected session, giving up");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "gateway connection error, reconnecting");

                    let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(60));
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                return Ok(());
                            }
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    /// Run one session. `Ok` means stop for good.
    async fn connect_and_process(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        backoff: &mut ExponentialBackoff,
    ) -> Result<(), PresenceError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| PresenceError::WebSocket(format!("connection failed: {}", e)))?;
        let (mut write, mut read) = ws_stream.split();

        let hello = match timeout(HELLO_TIMEOUT, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let payload: GatewayPayload = serde_json::from_str(&text)?;
                if payload.op != OP_HELLO {
                    return Err(PresenceError::Gateway(format!(
                        "expected hello, got op {}",
                        payload.op
                    )));
                }
                serde_json::from_value::<Hello>(payload.d)?
            }
            Ok(Some(Ok(other))) => {
                return Err(PresenceError::Gateway(format!(
                    "expected hello, got {:?}",
                    other
                )));
            }
            Ok(Some(Err(e))) => {
                return Err(PresenceError::WebSocket(format!("read error: {}", e)));
            }
            Ok(None) => return Err(PresenceError::WebSocket("stream ended".to_string())),
            Err(_) => return Err(PresenceError::Gateway("no hello received".to_string())),
        };

        write
            .send(Message::Text(self.identify_message()?))
            .await
            .map_err(|e| PresenceError::WebSocket(format!("identify failed: {}", e)))?;

        info!(
            heartbeat_ms = hello.heartbeat_interval,
            guild = %self.cache.guild_id(),
            "gateway connected"
        );
        backoff.reset();

        let period = Duration::from_millis(hello.heartbeat_interval.max(1));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut seq: Option<u64> = None;
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("gateway received shutdown signal");
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }

                _ = heartbeat.tick() => {
                    if awaiting_ack {
                        return Err(PresenceError::Gateway("heartbeat not acknowledged".to_string()));
                    }
                    write
                        .send(Message::Text(heartbeat_message(seq)?))
                        .await
                        .map_err(|e| PresenceError::WebSocket(format!("heartbeat failed: {}", e)))?;
                    awaiting_ack = true;
                    trace!(seq = ?seq, "sent heartbeat");
                }

                result = timeout(READ_TIMEOUT, read.next()) => {
                    match result {
                        Ok(Some(Ok(Message::Text(text)))) => {
                            let payload: GatewayPayload = match serde_json::from_str(&text) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!(error = %e, "failed to parse gateway message");
                                    continue;
                                }
                            };
                            if payload.s.is_some() {
                                seq = payload.s;
                            }

                            match payload.op {
                                OP_DISPATCH => {
                                    let Some(event_type) = payload.t else { continue };
                                    if !self.forward_dispatch(&event_type, payload.d).await {
                                        info!("presence event receiver closed, stopping gateway");
                                        return Ok(());
                                    }
                                }
                                OP_HEARTBEAT => {
                                    write
                                        .send(Message::Text(heartbeat_message(seq)?))
                                        .await
                                        .map_err(|e| PresenceError::WebSocket(format!("heartbeat failed: {}", e)))?;
                                }
                                OP_HEARTBEAT_ACK => awaiting_ack = false,
                                OP_RECONNECT => {
                                    return Err(PresenceError::Gateway("server requested reconnect".to_string()));
                                }
                                OP_INVALID_SESSION => {
                                    return Err(PresenceError::Gateway("invalid session".to_string()));
                                }
                                op => trace!(op, "ignoring gateway opcode"),
                            }
                        }
                        Ok(Some(Ok(Message::Close(frame)))) => {
                            let code = frame.as_ref().map(|f| u16::from(f.code));
                            let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                            if code.is_some_and(|c| FATAL_CLOSE_CODES.contains(&c)) {
                                return Err(PresenceError::Rejected(format!(
                                    "close code {:?}: {}",
                                    code, reason
                                )));
                            }
                            return Err(PresenceError::WebSocket(format!(
                                "connection closed ({:?}): {}",
                                code, reason
                            )));
                        }
                        Ok(Some(Ok(_))) => {}
                        Ok(Some(Err(e))) => {
                            return Err(PresenceError::WebSocket(format!("read error: {}", e)));
                        }
                        Ok(None) => {
                            return Err(PresenceError::WebSocket("stream ended".to_string()));
                        }
                        Err(_) => {
                            warn!("gateway read timeout after {}s", READ_TIMEOUT.as_secs());
                            return Err(PresenceError::WebSocket("read timeout".to_string()));
                        }
                    }
                }
            }
        }
    }

    fn identify_message(&self) -> Result<String, PresenceError> {
        let identify = OutgoingPayload {
            op: OP_IDENTIFY,
            d: Identify {
                token: &self.token,
                intents: INTENTS,
                properties: ConnectionProperties {
                    os: std::env::consts::OS,
                    browser: "roster",
                    device: "roster",
                },
            },
        };
        Ok(serde_json::to_string(&identify)?)
    }

    /// Apply a dispatch and forward its events in order. Returns false once
    /// the receiver is gone.
    async fn forward_dispatch(&self, event_type: &str, data: serde_json::Value) -> bool {
        match self.apply_dispatch(event_type, data) {
            Ok(events) => {
                for event in events {
                    if self.events.send(event).await.is_err() {
                        return false;
                    }
                }
                true
            }
            Err(e) => {
                warn!(error = %e, event = event_type, "failed to handle dispatch");
                true
            }
        }
    }

    /// Update the cache from a dispatch and map it to presence events.
    ///
    /// A guild reload yields `Ready` followed by the channel changes missed
    /// since the previous load.
    pub(crate) fn apply_dispatch(
        &self,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<Vec<PresenceEvent>, PresenceError> {
        match event_type {
            "READY" => {
                debug!("gateway session ready");
                Ok(Vec::new())
            }
            "GUILD_CREATE" => {
                let guild: GuildCreate = serde_json::from_value(data)?;
                let Some(changes) = self.cache.load_guild(guild) else {
                    return Ok(Vec::new());
                };
                info!(
                    guild = %self.cache.guild_id(),
                    changes = changes.len(),
                    "guild state loaded"
                );
                let mut events = Vec::with_capacity(changes.len() + 1);
                events.push(PresenceEvent::Ready);
                events.extend(changes);
                Ok(events)
            }
            "VOICE_STATE_UPDATE" => {
                let state: VoiceState = serde_json::from_value(data)?;
                Ok(self.cache.apply_voice_state(state).into_iter().collect())
            }
            "GUILD_MEMBER_ADD" | "GUILD_MEMBER_UPDATE" => {
                let update: GuildMemberUpdate = serde_json::from_value(data)?;
                if update.guild_id == self.cache.guild_id() {
                    self.cache.remember(&update.member);
                }
                Ok(Vec::new())
            }
            other => {
                trace!(event = other, "ignoring dispatch");
                Ok(Vec::new())
            }
        }
    }
}

fn heartbeat_message(seq: Option<u64>) -> Result<String, PresenceError> {
    Ok(serde_json::to_string(&OutgoingPayload {
        op: OP_HEARTBEAT,
        d: seq,
    })?)
}
