//! The `Connection` state machine and its WebSocket loop (§4.5).
//!
//! One long-lived task manages the socket; `connect`/`disconnect`/
//! `interrupt` push an [`Action`] onto a small bounded channel that the loop
//! consumes (§9's "action queue"). The loop is started lazily on the first
//! `connect()` and is never more than one task in flight, using
//! [`crate::util::ContinuousTask`] to hold that single `JoinHandle`.
//!
//! Grounded in `core/ws_protocol/connection.py`'s `_loop`; backoff here is
//! exponential with jitter, clamped, and reset on success (§4.5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backend::UrlBuilder;
use crate::config::ConfigHandle;
use crate::error::{ConnectionError, MessageError};
use crate::protocol::{ClientMsg, Envelope, ServerMsg};
use crate::util::{Backoff, BoundedInterval, ContinuousTask, ExponentialBackoff};

use super::events::ConnectionEvent;
use super::ConnectionMode;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    NotConnected,
    Connecting,
    Connected,
    Paused,
}

#[derive(Debug)]
enum Action {
    Interrupt,
    Pause,
    Resume,
}

/// Derives the URL a [`Connection`] dials: mode plus the printer identity
/// the config currently holds (§6).
pub struct ConnectionHint {
    pub mode: ConnectionMode,
    pub config: ConfigHandle,
}

impl ConnectionHint {
    /// Parsed and validated WebSocket URL. A malformed `Custom` backend URL
    /// (§6) fails here with a clear error rather than reaching the WebSocket
    /// handshake as an opaque string.
    fn ws_url_parsed(&self) -> Result<url::Url, url::ParseError> {
        let snapshot = self.config.snapshot();
        UrlBuilder::ws_url_parsed(self.mode, &snapshot.id.to_string(), &snapshot.token)
    }
}

struct Shared {
    v: AtomicU64,
    state: Mutex<ConnState>,
    ws: Mutex<Option<WsStream>>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    /// Set by `connect()` to the loop task currently running; `None` before
    /// the first connect or after `stop()`. Mirrors the original's
    /// `self.running` guard on `disconnect`/`interrupt` (§4.5).
    action_tx: Mutex<Option<mpsc::Sender<Action>>>,
    cancel: CancellationToken,
}

impl Shared {
    fn v(&self) -> u64 {
        self.v.load(Ordering::Acquire)
    }

    fn connected(&self) -> bool {
        self.ws.lock().expect("connection lock poisoned").is_some()
    }
}

/// The underlying WebSocket connection (§4.5). Stateless towards clients: it
/// only moves bytes and emits lifecycle events, leaving protocol semantics
/// to [`crate::client::Client`].
pub struct Connection {
    shared: Arc<Shared>,
    loop_handle: Mutex<ContinuousTask<()>>,
}

impl Connection {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                v: AtomicU64::new(0),
                state: Mutex::new(ConnState::NotConnected),
                ws: Mutex::new(None),
                event_tx,
                action_tx: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
            loop_handle: Mutex::new(ContinuousTask::new()),
        }
    }

    pub fn v(&self) -> u64 {
        self.shared.v()
    }

    pub fn connected(&self) -> bool {
        self.shared.connected()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Creates or resumes the connection loop (§4.5 `connect`).
    #[instrument(skip(self, hint))]
    pub fn connect(&self, hint: ConnectionHint) {
        let mut handle = self.loop_handle.lock().expect("connection lock poisoned");

        if handle.is_running() {
            let tx = self.shared.action_tx.lock().expect("connection lock poisoned").clone();
            if let Some(tx) = tx {
                tokio::spawn(async move {
                    let _ = tx.send(Action::Resume).await;
                });
            }
            return;
        }

        // `schedule` only refuses while a handle is in flight; a finished one
        // from a prior run still has to be cleared out first.
        handle.discard();

        let (action_tx, action_rx) = mpsc::channel(8);
        *self.shared.action_tx.lock().expect("connection lock poisoned") = Some(action_tx);

        let shared = Arc::clone(&self.shared);
        handle.schedule(run_loop(shared, hint, action_rx));
    }

    /// Pauses the loop; no reconnection attempts are made until resumed
    /// (§4.5). No-op if the loop isn't running, mirroring the original's
    /// `if self.running` guard.
    pub async fn disconnect(&self) {
        self.send_action(Action::Pause).await;
    }

    /// Makes the loop re-check its connection state immediately.
    pub async fn interrupt(&self) {
        self.send_action(Action::Interrupt).await;
    }

    async fn send_action(&self, action: Action) {
        let tx = self.shared.action_tx.lock().expect("connection lock poisoned").clone();
        if let Some(tx) = tx {
            let _ = tx.send(action).await;
        }
    }

    /// Sends `msg`, optionally targeted at generation `v`. Drops silently if
    /// not connected or if `v` doesn't match the current generation (§4.5,
    /// §8: "A `send` call with `vOpt != connection.v` produces no wire
    /// bytes").
    #[instrument(skip(self, msg))]
    pub async fn send(
        &self,
        msg: &ClientMsg,
        v: Option<u64>,
        for_: Option<&str>,
    ) -> Result<(), ConnectionError> {
        if let Some(v) = v {
            if v != self.shared.v() {
                debug!("dropped message, version mismatch");
                return Ok(());
            }
        }

        let value = serde_json::to_value(msg).map_err(ConnectionError::Serialization)?;
        let data = match value {
            serde_json::Value::Object(mut map) => map.remove("data"),
            other => Some(other),
        };

        let mut envelope = Envelope::new(msg.kind(), data);
        if let Some(unique_id) = for_ {
            envelope = envelope.tagged_for(unique_id);
        }
        let data = serde_json::to_string(&envelope).map_err(ConnectionError::Serialization)?;

        let mut guard = self.shared.ws.lock().expect("connection lock poisoned");
        let Some(ws) = guard.as_mut() else {
            drop(guard);
            self.interrupt().await;
            return Err(ConnectionError::NotConnected);
        };

        if let Err(e) = ws.send(WsMessage::Text(data)).await {
            drop(guard);
            self.interrupt().await;
            return Err(e.into());
        }

        Ok(())
    }

    /// Stops the loop permanently.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    pub fn child_cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.child_token()
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_loop(shared: Arc<Shared>, hint: ConnectionHint, mut action_rx: mpsc::Receiver<Action>) {
    let mut backoff = ExponentialBackoff::for_connection();
    let mut suspect_bound = BoundedInterval::new(7, 1);
    let mut pending_action: Option<Action> = None;

    while !shared.cancel.is_cancelled() {
        if let Some(action) = pending_action.take() {
            apply_action(&shared, action);
            continue;
        }

        let state = *shared.state.lock().expect("connection lock poisoned");

        if state == ConnState::Paused {
            close_ws(&shared).await;
            info!("connection paused");
            tokio::select! {
                _ = shared.cancel.cancelled() => break,
                action = action_rx.recv() => pending_action = action,
            }
            continue;
        }

        if !shared.connected() && state == ConnState::NotConnected {
            if shared.v() != 0 {
                let delay = backoff.delay();
                info!(?delay, "reconnecting");
                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                    action = action_rx.recv() => {
                        pending_action = action;
                        continue;
                    }
                }
            }

            *shared.state.lock().expect("connection lock poisoned") = ConnState::Connecting;
        }

        if !shared.connected() && *shared.state.lock().expect("connection lock poisoned") == ConnState::Connecting {
            let url = match hint.ws_url_parsed() {
                Ok(url) => url,
                Err(e) => {
                    handle_connect_failure(&shared, &mut suspect_bound, e.into());
                    continue;
                }
            };
            info!(%url, "connecting");

            tokio::select! {
                _ = shared.cancel.cancelled() => break,
                action = action_rx.recv() => {
                    pending_action = action;
                    continue;
                }
                result = tokio_tungstenite::connect_async(url.clone()) => {
                    match result {
                        Ok((ws, _response)) => {
                            *shared.ws.lock().expect("connection lock poisoned") = Some(ws);
                            *shared.state.lock().expect("connection lock poisoned") = ConnState::Connected;
                            backoff.reset();
                            suspect_bound.reset();
                            let v = shared.v();
                            let _ = shared.event_tx.send(ConnectionEvent::Established(v));
                            info!("connected");
                        }
                        Err(e) => {
                            handle_connect_failure(&shared, &mut suspect_bound, e.into());
                            continue;
                        }
                    }
                }
            }
        }

        if !shared.connected() {
            handle_connect_failure(&shared, &mut suspect_bound, ConnectionError::Closed("invalid state".into()));
            continue;
        }

        let poll_result = {
            let mut guard = shared.ws.lock().expect("connection lock poisoned");
            let ws = guard.as_mut().expect("checked connected above");
            tokio::select! {
                _ = shared.cancel.cancelled() => { break; }
                action = action_rx.recv() => {
                    pending_action = action;
                    None
                }
                msg = ws.next() => Some(msg),
            }
        };

        let Some(msg) = poll_result else { continue };

        match msg {
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(value) => {
                    let for_ = value
                        .get("for")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                    match serde_json::from_value::<ServerMsg>(value) {
                        Ok(parsed) => {
                            debug!("received message");
                            let _ = shared
                                .event_tx
                                .send(ConnectionEvent::Incoming(parsed, shared.v(), for_));
                        }
                        Err(e) => {
                            let e = MessageError::Malformed(e);
                            warn!(error = %e, "malformed incoming message");
                        }
                    }
                }
                Err(e) => {
                    let e = MessageError::Malformed(e);
                    warn!(error = %e, "malformed incoming message");
                }
            },
            Some(Ok(WsMessage::Close(_))) | None => {
                handle_connect_failure(&shared, &mut suspect_bound, ConnectionError::Closed("socket closed".into()));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                handle_connect_failure(&shared, &mut suspect_bound, e.into());
            }
        }
    }

    close_ws(&shared).await;
    info!("connection loop stopped");
}

fn apply_action(shared: &Shared, action: Action) {
    let mut state = shared.state.lock().expect("connection lock poisoned");
    *state = match action {
        Action::Pause => ConnState::Paused,
        Action::Resume => ConnState::NotConnected,
        Action::Interrupt => *state,
    };
}

fn handle_connect_failure(shared: &Shared, suspect_bound: &mut BoundedInterval, error: ConnectionError) {
    *shared.ws.lock().expect("connection lock poisoned") = None;
    *shared.state.lock().expect("connection lock poisoned") = ConnState::NotConnected;
    let v = shared.v.fetch_add(1, Ordering::AcqRel);
    let _ = shared.event_tx.send(ConnectionEvent::Lost(v));
    info!(%error, "connection lost");

    if suspect_bound.guard_until_bound() {
        let _ = shared.event_tx.send(ConnectionEvent::Suspect);
    }
}

async fn close_ws(shared: &Shared) {
    let ws = shared.ws.lock().expect("connection lock poisoned").take();
    if let Some(mut ws) = ws {
        let _ = ws.close(None).await;
        let v = shared.v.fetch_add(1, Ordering::AcqRel);
        let _ = shared.event_tx.send(ConnectionEvent::Lost(v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_connection_has_generation_zero_and_is_not_connected() {
        let conn = Connection::new();
        assert_eq!(conn.v(), 0);
        assert!(!conn.connected());
    }
}
