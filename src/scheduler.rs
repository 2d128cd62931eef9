//! The cooperative scheduler (§4.8, §5): the single loop that ticks every
//! client, drains its outbox onto its connection, and routes incoming
//! connection events back to the client(s) they belong to.
//!
//! Grounded in `core/scheduler.py`'s `Scheduler` (`_should_schedule_client`,
//! `_schedule_client`, `_process_to_delete`, `_teardown`,
//! `_schedule_loop`'s condition-variable wait). The original blocks on a
//! `threading.Condition` with a timeout; here that becomes a `tokio::select!`
//! over a `Notify`, the connection event channel, and a fixed tick-rate
//! sleep — `StateCtx`'s own per-client `Notify` is not threaded into this
//! wait, so responsiveness to a single dirty field is bounded by `tick_rate`
//! rather than immediate.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::client::Client;
use crate::config::{ConfigHandle, ConfigStore};
use crate::connection::{ClientView, ConnectionEvent, ConnectionManager, ConnectionMode, ConnectivityReport, RouteTarget};
use crate::protocol::ClientMsg;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const DIAGNOSTICS_MIN_INTERVAL: Duration = Duration::from_secs(300);

struct IncomingEnvelope {
    view: Arc<ClientView>,
    event: ConnectionEvent,
}

/// Owns every [`Client`] plus the [`ConnectionManager`] that wires them onto
/// sockets, and runs the loop that keeps both moving (§2 "Scheduler").
pub struct Scheduler {
    config_store: Box<dyn ConfigStore>,
    mode: ConnectionMode,
    tick_rate: Duration,
    report_dir: PathBuf,

    clients: HashMap<String, Client>,
    manager: ConnectionManager,
    to_delete: HashSet<String>,
    known_connections: HashSet<usize>,

    event_tx: mpsc::Sender<IncomingEnvelope>,
    event_rx: mpsc::Receiver<IncomingEnvelope>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Loads every persisted config from `config_store` and builds a
    /// [`Client`] for each (§4.9 "load on startup").
    pub fn new(
        mut config_store: Box<dyn ConfigStore>,
        mode: ConnectionMode,
        tick_rate: Duration,
        report_dir: PathBuf,
    ) -> Result<Self, crate::error::ConfigStoreError> {
        let configs = config_store.load()?;
        let mut clients = HashMap::new();
        for config in configs {
            clients.insert(config.unique_id(), Client::new(config));
        }

        let (event_tx, event_rx) = mpsc::channel(256);

        Ok(Self {
            config_store,
            mode,
            tick_rate,
            report_dir,
            clients,
            manager: ConnectionManager::new(mode),
            to_delete: HashSet::new(),
            known_connections: HashSet::new(),
            event_tx,
            event_rx,
            wake: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// A token the caller can cancel to request graceful shutdown (§5).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Registers a new printer with the store and the in-memory client set
    /// (§4.9's `submit`). No-ops if a client with this identity already
    /// exists.
    pub fn submit(&mut self, config: ConfigHandle) {
        let unique_id = config.unique_id();
        if self.clients.contains_key(&unique_id) {
            return;
        }
        self.config_store.persist(config.clone());
        self.clients.insert(unique_id, Client::new(config));
        self.wake.notify_one();
    }

    /// Marks a client inactive; the scheduler runs the remove handshake (or,
    /// in SINGLE mode, simply disconnects) and tears it down once removed
    /// (§4.4, §4.9's `remove`).
    pub fn request_removal(&mut self, unique_id: &str) {
        if let Some(client) = self.clients.get_mut(unique_id) {
            client.set_active(false);
            self.wake.notify_one();
        }
    }

    /// Runs until `cancellation_token()` is cancelled, then tears down every
    /// client and connection (§5).
    pub async fn run(mut self) {
        info!(mode = ?self.mode, client_count = self.clients.len(), "scheduler starting");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(envelope) = self.event_rx.recv() => {
                    self.handle_incoming(envelope);
                }
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.tick_rate) => {}
            }

            self.process_clients().await;
            self.process_to_delete();
        }

        self.teardown().await;
    }

    // -- event fan-in --------------------------------------------------------

    fn handle_incoming(&mut self, envelope: IncomingEnvelope) {
        if matches!(envelope.event, ConnectionEvent::Suspect) {
            self.maybe_run_diagnostics();
            return;
        }

        match envelope.view.route(&envelope.event) {
            RouteTarget::Drop => {}
            RouteTarget::Broadcast => {
                for unique_id in envelope.view.members() {
                    self.apply_event(&unique_id, &envelope.event);
                }
            }
            RouteTarget::Client(unique_id) => self.apply_event(&unique_id, &envelope.event),
        }
    }

    fn apply_event(&mut self, unique_id: &str, event: &ConnectionEvent) {
        let Some(client) = self.clients.get_mut(unique_id) else {
            return;
        };
        match event {
            ConnectionEvent::Established(v) => client.on_connection_established(*v),
            ConnectionEvent::Lost(v) => client.on_connection_lost(*v),
            ConnectionEvent::Incoming(msg, v, _for) => client.on_incoming(msg.clone(), *v),
            ConnectionEvent::Suspect => {}
        }
    }

    /// Runs the connectivity probe suite in the background, rate-limited
    /// against the reports already on disk (§4.7).
    fn maybe_run_diagnostics(&mut self) {
        let dir = self.report_dir.clone();
        if ConnectivityReport::should_skip(&dir, DIAGNOSTICS_MIN_INTERVAL) {
            return;
        }
        tokio::spawn(async move {
            let report = ConnectivityReport::generate_default().await;
            if let Err(e) = report.store_in(&dir) {
                warn!(error = %e, "failed to store connectivity report");
            }
        });
    }

    // -- per-client scheduling (§4.8) ----------------------------------------

    async fn process_clients(&mut self) {
        let ids: Vec<String> = self.clients.keys().cloned().collect();
        for id in ids {
            if self.to_delete.contains(&id) {
                continue;
            }
            if self.should_schedule_client(&id) {
                self.schedule_client(&id).await;
            }
        }
    }

    /// Whether `id` is worth a scheduling pass right now: it has unconsumed
    /// state changes, wants a connection-state transition, or its tick
    /// interval is due (§4.8).
    fn should_schedule_client(&self, id: &str) -> bool {
        let Some(client) = self.clients.get(id) else {
            return false;
        };

        if client.has_changes() {
            return true;
        }
        if client.active() && !client.is_added() {
            return true;
        }
        if !client.active() && !client.is_removed() {
            return true;
        }
        client.due_for_tick(self.tick_rate)
    }

    #[instrument(skip(self))]
    async fn schedule_client(&mut self, id: &str) {
        let mode = self.mode;
        let Some(client) = self.clients.get_mut(id) else {
            return;
        };

        if client.active() {
            if !self.manager.is_allocated(id) {
                self.manager.allocate(client);
                spawn_missing_forwarders(&self.manager, &mut self.known_connections, &self.event_tx);
            }
            client.ensure_added(mode);
        } else if self.manager.is_allocated(id) {
            client.ensure_removed(mode);
            if client.is_removed() {
                self.manager.deallocate(client).await;
            }
        }

        let Some(client) = self.clients.get_mut(id) else {
            return;
        };

        if client.due_for_tick(self.tick_rate) {
            client.tick(self.tick_rate);
        }

        if !client.active() && client.is_removed() && !self.manager.is_allocated(id) {
            self.to_delete.insert(id.to_string());
        }

        let generation = client.connection_generation();
        let for_ = if mode == ConnectionMode::Multi {
            Some(client.unique_id())
        } else {
            None
        };

        let mut outbound = client.drain_outbox();
        outbound.extend(client.consume());

        let dirty_config = if client.take_config_dirty() {
            Some(client.config().clone())
        } else {
            None
        };

        if let Some(config) = dirty_config {
            self.flush_config(config);
        }

        self.send_all(id, outbound, generation, for_.as_deref()).await;
    }

    async fn send_all(&mut self, id: &str, messages: Vec<ClientMsg>, generation: u64, for_: Option<&str>) {
        if messages.is_empty() {
            return;
        }
        let Some(connection) = self.manager.connection_for(id) else {
            return;
        };
        for msg in &messages {
            match tokio::time::timeout(SEND_TIMEOUT, connection.send(msg, Some(generation), for_)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(unique_id = id, error = %e, "failed to send client message"),
                Err(_) => warn!(unique_id = id, "send timed out"),
            }
        }
    }

    /// Persists one client's config. Blocking I/O (§4.9's contract on
    /// [`ConfigStore`]) is dispatched via `block_in_place` so it doesn't
    /// stall the whole runtime — only sound on the multi-thread runtime
    /// `main.rs` starts (§10.2).
    fn flush_config(&mut self, config: ConfigHandle) {
        let store = &mut self.config_store;
        if let Err(e) = tokio::task::block_in_place(|| store.flush(Some(&config))) {
            warn!(error = %e, "failed to flush config");
        }
    }

    fn process_to_delete(&mut self) {
        let done: Vec<String> = self.to_delete.drain().collect();
        for id in done {
            if let Some(client) = self.clients.remove(&id) {
                if let Err(e) = self.config_store.remove(client.config()) {
                    warn!(unique_id = %id, error = %e, "failed to remove config from store");
                }
            }
            info!(unique_id = %id, "client torn down");
        }
    }

    async fn teardown(&mut self) {
        info!("scheduler stopping");
        self.manager.stop();

        let ids: Vec<String> = self.clients.keys().cloned().collect();
        for id in ids {
            if self.manager.is_allocated(&id) {
                if let Some(client) = self.clients.get_mut(&id) {
                    self.manager.deallocate(client).await;
                }
            }
        }

        info!("scheduler stopped");
    }
}

/// Subscribes to any connection the manager created since the last pass and
/// hasn't been wired to the event channel yet (§4.6, §4.7). A free function,
/// not a method, so it only borrows the fields it needs and can run while a
/// caller still holds a mutable borrow of `self.clients` elsewhere.
fn spawn_missing_forwarders(
    manager: &ConnectionManager,
    known_connections: &mut HashSet<usize>,
    event_tx: &mpsc::Sender<IncomingEnvelope>,
) {
    for (view, connection) in manager.slots() {
        let key = Arc::as_ptr(&connection) as usize;
        if known_connections.insert(key) {
            let rx = connection.subscribe();
            tokio::spawn(forward_events(view, rx, event_tx.clone()));
        }
    }
}

async fn forward_events(
    view: Arc<ClientView>,
    mut rx: broadcast::Receiver<ConnectionEvent>,
    tx: mpsc::Sender<IncomingEnvelope>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if tx.send(IncomingEnvelope { view: Arc::clone(&view), event }).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfigStore, PrinterConfig};

    fn scheduler() -> Scheduler {
        Scheduler::new(
            Box::new(MemoryConfigStore::new()),
            ConnectionMode::Single,
            Duration::from_millis(50),
            std::env::temp_dir().join("sp-scheduler-test"),
        )
        .expect("memory store never fails to load")
    }

    #[test]
    fn submit_registers_a_client() {
        let mut s = scheduler();
        s.submit(ConfigHandle::new(PrinterConfig::blank()));
        assert_eq!(s.client_ids().len(), 1);
    }

    #[test]
    fn should_schedule_inactive_unremoved_client() {
        let mut s = scheduler();
        s.submit(ConfigHandle::new(PrinterConfig::blank()));
        let id = s.client_ids().remove(0);
        s.request_removal(&id);
        assert!(s.should_schedule_client(&id));
    }

    #[tokio::test]
    async fn process_to_delete_removes_inactive_unallocated_clients() {
        let mut s = scheduler();
        s.submit(ConfigHandle::new(PrinterConfig::blank()));
        let id = s.client_ids().remove(0);
        s.request_removal(&id);
        s.schedule_client(&id).await;
        s.process_to_delete();
        assert!(s.client_ids().is_empty());
    }
}
