//! Relay connector.
//!
//! This module provides [`Connector`], the client-side counterpart of the
//! relay server. A connector owns one local [`SharedDoc`] replica, keeps a
//! WebSocket connection to the relay for a chosen room, and exposes
//! `connected`/`synced` flags to the host application.
//!
//! ## Lifecycle
//!
//! The connector handles:
//! - WebSocket lifecycle (connect, disconnect, reconnect)
//! - Exponential backoff for reconnection, capped at a configurable ceiling
//! - Shipping local document updates to the relay and applying inbound ones
//!
//! The first binary frame after every (re)connect is the relay's full-state
//! snapshot; `synced` only becomes true once it has been applied. Disabling
//! or dropping the connector aborts the background task synchronously, so no
//! socket or backoff timer outlives it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::doc::{SharedDoc, UpdateOrigin};
use crate::error::{CollabError, Result};

/// Default relay endpoint when `MAWA_RELAY_URL` is not set.
const DEFAULT_RELAY_URL: &str = "ws://localhost:1234";

/// First reconnection delay; doubles on every failed attempt.
const INITIAL_BACKOFF_MS: u64 = 500;

/// Connector configuration.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Relay URL (e.g., `ws://localhost:1234`)
    pub url: String,
    /// Room to join; becomes the request path on the relay
    pub room: String,
    /// Whether to open the connection immediately
    pub enabled: bool,
    /// Ceiling for the reconnection backoff delay
    pub max_backoff: Duration,
}

impl ConnectorConfig {
    /// Build a configuration for a room, reading the relay URL from the
    /// `MAWA_RELAY_URL` environment variable.
    pub fn from_env(room: impl Into<String>) -> Self {
        let url =
            std::env::var("MAWA_RELAY_URL").unwrap_or_else(|_| DEFAULT_RELAY_URL.to_string());
        Self {
            url,
            room: room.into(),
            enabled: true,
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Coarse connection status for UI surfaces that want more than the
/// `connected`/`synced` booleans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Synced,
    Reconnecting { attempt: u32 },
}

/// Client-side replica owner and connection manager.
///
/// Construction never fails and never panics: an invalid relay URL or a
/// missing async runtime leaves the connector in a disconnected state with
/// the failure logged. The shared document is created exactly once and is
/// stable across enable/disable cycles.
pub struct Connector {
    doc: Arc<SharedDoc>,
    room: String,
    target: Option<Url>,
    max_backoff: Duration,
    connected_tx: watch::Sender<bool>,
    synced_tx: watch::Sender<bool>,
    status_tx: watch::Sender<ConnectionStatus>,
    /// Receiver half of the local-update channel; wrapped so it survives
    /// reconnects and enable/disable cycles.
    outgoing_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    task: Option<JoinHandle<()>>,
    _update_sub: Option<yrs::Subscription>,
}

impl Connector {
    /// Create a connector for a room and start connecting if enabled.
    pub fn new(config: ConnectorConfig) -> Self {
        let doc = Arc::new(SharedDoc::new());

        let (connected_tx, _) = watch::channel(false);
        let (synced_tx, _) = watch::channel(false);
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let update_sub = match doc.observe_local_updates(move |update| {
            // Receiver outlives every session; a send only fails once the
            // connector itself is gone.
            let _ = outgoing_tx.send(update.to_vec());
        }) {
            Ok(sub) => Some(sub),
            Err(e) => {
                log::error!("[Connector] failed to observe local updates: {}", e);
                None
            }
        };

        let target = match build_room_url(&config.url, &config.room) {
            Ok(url) => Some(url),
            Err(e) => {
                log::error!(
                    "[Connector] invalid relay URL '{}' for room '{}': {}",
                    config.url,
                    config.room,
                    e
                );
                None
            }
        };

        let mut connector = Self {
            doc,
            room: config.room,
            target,
            max_backoff: config.max_backoff,
            connected_tx,
            synced_tx,
            status_tx,
            outgoing_rx: Arc::new(tokio::sync::Mutex::new(outgoing_rx)),
            task: None,
            _update_sub: update_sub,
        };

        if config.enabled {
            connector.start();
        }

        connector
    }

    /// The shared document replica. Created once per connector; stable
    /// across enable/disable cycles.
    pub fn document(&self) -> Arc<SharedDoc> {
        Arc::clone(&self.doc)
    }

    /// The room this connector joins.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Whether the socket handshake has completed.
    pub fn is_connected(&self) -> bool {
        *self.connected_tx.borrow()
    }

    /// Whether the initial snapshot has been received and applied.
    pub fn is_synced(&self) -> bool {
        *self.synced_tx.borrow()
    }

    /// Subscribe to `connected` transitions.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    /// Subscribe to `synced` transitions.
    pub fn synced(&self) -> watch::Receiver<bool> {
        self.synced_tx.subscribe()
    }

    /// Subscribe to coarse status transitions.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Enable or disable the connector.
    ///
    /// Disabling aborts the background task before returning: the socket and
    /// any pending backoff timer are cancelled synchronously and both flags
    /// drop to false. Enabling a disabled connector reconnects with the same
    /// document.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.start();
        } else {
            self.stop();
        }
    }

    fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        let Some(target) = self.target.clone() else {
            log::warn!(
                "[Connector] not connecting room '{}': no valid relay URL",
                self.room
            );
            return;
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("[Connector] no async runtime available: {}", e);
                return;
            }
        };

        let session = Session {
            doc: Arc::clone(&self.doc),
            room: self.room.clone(),
            connected_tx: self.connected_tx.clone(),
            synced_tx: self.synced_tx.clone(),
            status_tx: self.status_tx.clone(),
            outgoing_rx: Arc::clone(&self.outgoing_rx),
        };
        let max_backoff = self.max_backoff;

        self.status_tx.send_replace(ConnectionStatus::Connecting);
        self.task = Some(handle.spawn(async move {
            run_connection_loop(target, session, max_backoff).await;
        }));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.connected_tx.send_replace(false);
        self.synced_tx.send_replace(false);
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
        log::debug!("[Connector] room '{}' disabled", self.room);
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("room", &self.room)
            .field("connected", &self.is_connected())
            .field("synced", &self.is_synced())
            .finish()
    }
}

/// Shared handles a connection session needs.
struct Session {
    doc: Arc<SharedDoc>,
    room: String,
    connected_tx: watch::Sender<bool>,
    synced_tx: watch::Sender<bool>,
    status_tx: watch::Sender<ConnectionStatus>,
    outgoing_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

/// Join the relay URL and room name into the connection target.
fn build_room_url(base: &str, room: &str) -> Result<Url> {
    let base = base.trim_end_matches('/');
    Url::parse(&format!("{}/{}", base, room)).map_err(|e| CollabError::Config(e.to_string()))
}

/// Backoff delay before reconnection attempt `attempt` (1-based).
fn backoff_delay(attempt: u32, ceiling: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(6);
    Duration::from_millis(INITIAL_BACKOFF_MS << exp).min(ceiling)
}

/// Connect, run the session, and reconnect with backoff until aborted.
async fn run_connection_loop(target: Url, session: Session, max_backoff: Duration) {
    let mut attempt: u32 = 0;

    loop {
        match tokio_tungstenite::connect_async(target.as_str()).await {
            Ok((stream, _)) => {
                log::info!("[Connector] connected to {}", target);
                attempt = 0;
                session.connected_tx.send_replace(true);
                session.status_tx.send_replace(ConnectionStatus::Connected);

                let reason = run_session(stream, &session).await;
                log::info!(
                    "[Connector] session for room '{}' ended: {}",
                    session.room,
                    reason
                );

                session.connected_tx.send_replace(false);
                session.synced_tx.send_replace(false);
            }
            Err(e) => {
                log::warn!("[Connector] connection to {} failed: {}", target, e);
            }
        }

        attempt += 1;
        let delay = backoff_delay(attempt, max_backoff);
        log::info!(
            "[Connector] reconnecting to room '{}' in {}ms (attempt {})",
            session.room,
            delay.as_millis(),
            attempt
        );
        session
            .status_tx
            .send_replace(ConnectionStatus::Reconnecting { attempt });
        tokio::time::sleep(delay).await;
    }
}

/// Drive one established connection until it ends.
async fn run_session<S>(stream: S, session: &Session) -> &'static str
where
    S: StreamExt<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + SinkExt<Message>
        + Unpin,
    <S as futures_util::Sink<Message>>::Error: std::fmt::Display,
{
    let (mut write, mut read) = stream.split();
    let mut outgoing = session.outgoing_rx.lock().await;
    let mut snapshot_seen = false;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if !snapshot_seen {
                            // First frame is the room snapshot. Whether this
                            // replica carried offline edits decides if we
                            // push our state back afterwards.
                            let had_local_state = session.doc.has_state();
                            match session.doc.apply_update(&data, UpdateOrigin::Sync) {
                                Ok(()) => {
                                    snapshot_seen = true;
                                    session.synced_tx.send_replace(true);
                                    session.status_tx.send_replace(ConnectionStatus::Synced);
                                    log::debug!(
                                        "[Connector] room '{}' synced ({} snapshot bytes)",
                                        session.room,
                                        data.len()
                                    );

                                    if had_local_state {
                                        let state = session.doc.encode_snapshot();
                                        if let Err(e) =
                                            write.send(Message::Binary(state.into())).await
                                        {
                                            log::error!(
                                                "[Connector] failed to send local state: {}",
                                                e
                                            );
                                            return "send_failed";
                                        }
                                    }
                                }
                                Err(e) => {
                                    log::warn!(
                                        "[Connector] dropping malformed snapshot for room '{}': {}",
                                        session.room,
                                        e
                                    );
                                }
                            }
                        } else if let Err(e) = session.doc.apply_update(&data, UpdateOrigin::Remote)
                        {
                            log::warn!(
                                "[Connector] dropping malformed update for room '{}': {}",
                                session.room,
                                e
                            );
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        log::debug!("[Connector] received ping: {} bytes", data.len());
                    }
                    Some(Ok(Message::Close(_))) => {
                        log::info!("[Connector] connection closed by relay");
                        return "closed";
                    }
                    Some(Err(e)) => {
                        log::error!("[Connector] WebSocket error: {}", e);
                        return "error";
                    }
                    None => {
                        return "ended";
                    }
                    _ => {}
                }
            }
            update = outgoing.recv() => {
                match update {
                    Some(bytes) => {
                        if let Err(e) = write.send(Message::Binary(bytes.into())).await {
                            log::error!("[Connector] failed to send update: {}", e);
                            return "send_failed";
                        }
                    }
                    None => {
                        return "channel_closed";
                    }
                }
            }
        }
    }
}
