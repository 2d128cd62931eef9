//! The per-printer protocol state machine (§4.4): advances through the
//! add/remove handshake, consumes demand messages, and emits outbound
//! messages via an outbox the scheduler drains each tick.
//!
//! Grounded in `core/client.py`'s `Client`/`DefaultClient` (state machine,
//! `ensure_added`/`ensure_removed`, `consume`) and `core/client.py`'s
//! `_on_*` event handlers for §7's per-message-kind error handling. The
//! original dispatches through a generic event bus; here each `ServerMsg`/
//! `Demand` variant is matched directly, since Rust's enums already give
//! exhaustive dispatch without a registration layer (§9).

use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::config::ConfigHandle;
use crate::connection::ConnectionMode;
use crate::protocol::demand::{SetMaterialDataDemandData, WebcamSettingsUpdatedDemandData};
use crate::protocol::messages::{
    AddConnectionData, LatencyData, MultiPrinterAddedData, MultiPrinterRemovedData,
    NewTokenData, PsuData, RemoveConnectionData,
};
use crate::protocol::producers::{self, ConsumeContext};
use crate::protocol::{ClientMsg, Demand, ServerMsg};
use crate::state::printer::PrinterState;
use crate::state::StateCtx;

use super::backoff_gate::PendingGate;

/// The client's *protocol* state (§4.4) — not to be confused with the
/// printer's physical status (`PrinterState::status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    NotConnected,
    PendingAdded,
    PendingRemoved,
    Connected,
}

impl ClientState {
    /// `is_removed` per §4.4: "CONNECTED (from)" goal comparisons use
    /// `state <= NOT_CONNECTED`, i.e. CONNECTING or NOT_CONNECTED.
    fn is_removed_or_connecting(self) -> bool {
        matches!(self, ClientState::Connecting | ClientState::NotConnected)
    }
}

#[derive(Debug, Clone, Copy)]
struct VersionedState {
    v: u64,
    state: ClientState,
}

/// Anything the core doesn't implement itself (printer control, camera,
/// file download, gcode, plugin management, restarts) but still must
/// acknowledge receiving (§1 Non-goals / external collaborators). The
/// default implementation only logs, which is enough for the core to stay
/// self-healing per §7 without pulling in a real printer driver.
pub trait DemandSink: Send + Sync {
    fn handle(&self, unique_id: &str, demand: &Demand);
}

pub struct LoggingDemandSink;

impl DemandSink for LoggingDemandSink {
    fn handle(&self, unique_id: &str, demand: &Demand) {
        debug!(unique_id, ?demand, "demand routed to external collaborator");
    }
}

/// One logical printer: its config, reactive state tree, and protocol
/// state machine (§2 "Client coordination layer").
pub struct Client {
    config: ConfigHandle,
    printer: PrinterState,
    ctx: StateCtx,

    v: u64,
    state: VersionedState,
    last_msg_id: u64,
    active: bool,

    pending_gate: PendingGate,
    outbox: Vec<ClientMsg>,
    config_dirty: bool,
    force_material_refresh: bool,

    current_job_id: Option<i64>,
    last_ping_sent_ms: Option<i64>,
    last_ticked: Option<Instant>,

    demand_sink: Box<dyn DemandSink>,
}

impl Client {
    pub fn new(config: ConfigHandle) -> Self {
        Self::with_demand_sink(config, Box::new(LoggingDemandSink))
    }

    pub fn with_demand_sink(config: ConfigHandle, demand_sink: Box<dyn DemandSink>) -> Self {
        let ctx = StateCtx::new();
        let printer = PrinterState::new(ctx.clone());
        Self {
            config,
            printer,
            ctx,
            v: 0,
            state: VersionedState {
                v: 0,
                state: ClientState::Connecting,
            },
            last_msg_id: 0,
            active: true,
            pending_gate: PendingGate::new(),
            outbox: Vec::new(),
            config_dirty: false,
            force_material_refresh: false,
            current_job_id: None,
            last_ping_sent_ms: None,
            last_ticked: None,
            demand_sink,
        }
    }

    pub fn unique_id(&self) -> String {
        self.config.unique_id()
    }

    /// Short display name for log lines (§10.5): the server id once
    /// assigned, else a prefix of `unique_id`.
    pub fn display_name(&self) -> String {
        crate::config::client_display_name(&self.config.snapshot())
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn printer(&self) -> &PrinterState {
        &self.printer
    }

    pub fn printer_mut(&mut self) -> &mut PrinterState {
        &mut self.printer
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Takes and clears the config-changed flag; the scheduler/app uses this
    /// to know when to flush the config store (§4.9).
    pub fn take_config_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.config_dirty, false)
    }

    /// The client's *effective* protocol state (§4.4): collapses to
    /// CONNECTING whenever the connection generation has moved past the
    /// generation the stored state was recorded against.
    pub fn state(&self) -> ClientState {
        if self.v != self.state.v {
            ClientState::Connecting
        } else {
            self.state.state
        }
    }

    fn set_state(&mut self, state: ClientState) {
        self.state = VersionedState { v: self.v, state };
        debug!(unique_id = %self.unique_id(), ?state, "client state changed");
    }

    pub fn is_added(&self) -> bool {
        self.state() == ClientState::Connected
    }

    pub fn is_removed(&self) -> bool {
        self.state().is_removed_or_connecting()
    }

    /// `msg_id > last_msg_id` (§4.8): whether a consume pass is worth
    /// running at all.
    pub fn has_changes(&self) -> bool {
        self.ctx.current_msg_id() > self.last_msg_id
    }

    /// Takes every message the client has queued (add/remove handshake,
    /// ping, latency) since the last drain, in the order they were pushed
    /// (§5 ordering guarantee).
    pub fn drain_outbox(&mut self) -> Vec<ClientMsg> {
        std::mem::take(&mut self.outbox)
    }

    /// Consumes dirty printer state into outbound messages (§4.3). Resets
    /// `last_msg_id` first, mirroring the original's `consume()`.
    pub fn consume(&mut self) -> Vec<ClientMsg> {
        self.last_msg_id = self.ctx.current_msg_id();
        let ctx = ConsumeContext {
            in_setup: self.config.snapshot().in_setup,
            force_material_refresh: std::mem::replace(&mut self.force_material_refresh, false),
            current_job_id: self.current_job_id,
        };
        producers::consume(&mut self.printer, &ctx)
    }

    pub fn current_job_id(&self) -> Option<i64> {
        self.current_job_id
    }

    /// The connection generation this client is currently tracking; sends on
    /// its behalf must be gated with this (§4.5, §8).
    pub fn connection_generation(&self) -> u64 {
        self.v
    }

    /// Whether a tick is due, so the scheduler doesn't need its own copy of
    /// `last_ticked` (§4.8).
    pub fn due_for_tick(&self, tick_rate: Duration) -> bool {
        match self.last_ticked {
            Some(t) => t.elapsed() >= tick_rate,
            None => true,
        }
    }

    // -- connection lifecycle (§4.4, §4.5) --------------------------------

    pub fn on_connection_established(&mut self, v: u64) {
        self.v = v;
        if self.state() == ClientState::Connecting {
            self.set_state(ClientState::NotConnected);
        }
    }

    pub fn on_connection_lost(&mut self, v: u64) {
        if self.v > v {
            return;
        }
        self.v = v;
        self.pending_gate.reset();
        self.set_state(ClientState::Connecting);
    }

    /// Advances towards CONNECTED. Returns `true` once there. SINGLE mode
    /// has no handshake: connection-established already implies added
    /// (§4.4).
    #[instrument(skip(self), fields(unique_id = %self.unique_id()))]
    pub fn ensure_added(&mut self, mode: ConnectionMode) -> bool {
        if mode == ConnectionMode::Single {
            return self.state() == ClientState::Connected || self.state() == ClientState::NotConnected;
        }

        if self.state() == ClientState::NotConnected && self.pending_gate.can_pend() {
            self.set_state(ClientState::PendingAdded);
            self.outbox.push(ClientMsg::AddConnection(AddConnectionData {
                unique_id: self.unique_id(),
                pid: None,
            }));
            self.pending_gate.mark_pending();
        }

        self.state() == ClientState::Connected
    }

    /// Advances towards removed. In SINGLE mode the goal is simply to be
    /// disconnected (§4.4).
    #[instrument(skip(self), fields(unique_id = %self.unique_id()))]
    pub fn ensure_removed(&mut self, mode: ConnectionMode) -> bool {
        if mode == ConnectionMode::Single {
            return self.state() == ClientState::Connecting;
        }

        if self.state() == ClientState::Connected && self.pending_gate.can_pend() {
            self.set_state(ClientState::PendingRemoved);
            self.outbox
                .push(ClientMsg::RemoveConnection(RemoveConnectionData {
                    unique_id: self.unique_id(),
                }));
            self.pending_gate.mark_pending();
        }

        self.is_removed()
    }

    // -- ticking -----------------------------------------------------------

    /// Per-tick lifecycle work: sends a `ping` when the `ping` interval is
    /// ready (§8 scenario 1).
    pub fn tick(&mut self, _dt: Duration) {
        self.last_ticked = Some(Instant::now());
        if self.printer.intervals.use_interval(crate::state::intervals::IntervalKind::Ping) {
            self.last_ping_sent_ms = Some(now_ms());
            self.outbox.push(ClientMsg::Ping);
        }
    }

    // -- incoming dispatch (§4.4, §7) --------------------------------------

    /// Routes one incoming message. Drops it if `v` doesn't match the
    /// client's current generation (§7 "unexpected protocol state" /
    /// §8 reconnect-drop invariant).
    #[instrument(skip(self, msg), fields(unique_id = %self.unique_id()))]
    pub fn on_incoming(&mut self, msg: ServerMsg, v: u64) {
        if self.v != v {
            warn!("dropped incoming message from a stale connection generation");
            return;
        }

        match msg {
            ServerMsg::Error(data) => warn!(error = %data.error, "server reported an error"),
            ServerMsg::NewToken(data) => self.on_new_token(data),
            ServerMsg::Connected(data) => self.on_connected(data),
            ServerMsg::CompleteSetup(data) => {
                self.printer.mark_common_fields_as_changed();
                self.config.with_mut(|c| {
                    c.id = data.printer_id;
                    c.in_setup = false;
                });
                self.config_dirty = true;
            }
            ServerMsg::IntervalChange(data) => self.printer.intervals.update_from_wire(&data.intervals),
            ServerMsg::Pong => self.on_pong(),
            ServerMsg::StreamReceived => debug!("stream received ack"),
            ServerMsg::PrinterSettings(data) => {
                if let Some(has_psu) = data.has_psu {
                    self.printer.settings.has_psu.set(Some(has_psu));
                }
                if let Some(has_filament_sensor) = data.has_filament_sensor {
                    self.printer
                        .settings
                        .has_filament_sensor
                        .set(Some(has_filament_sensor));
                }
            }
            ServerMsg::AddConnection(data) => self.on_add_connection_reply(data),
            ServerMsg::RemoveConnection(data) => self.on_remove_connection_reply(data),
            ServerMsg::Demand(demand) => self.on_demand(demand),
        }
    }

    fn on_new_token(&mut self, data: NewTokenData) {
        if data.no_exist {
            // §7 "Remove/delete notification": the server no longer
            // recognizes this printer; fall back to pending setup.
            self.config.with_mut(|c| c.reset_to_pending());
            self.config_dirty = true;
            return;
        }

        self.config.with_mut(|c| {
            c.token = data.token;
            if let Some(short_id) = &data.short_id {
                c.short_id = Some(short_id.clone());
                c.in_setup = true;
            }
        });
        self.config_dirty = true;
    }

    fn on_connected(&mut self, data: crate::protocol::messages::ConnectedData) {
        self.config.with_mut(|c| {
            c.name = data.name.clone();
            c.in_setup = data.in_setup;
            c.short_id = data.short_id.clone();
        });
        self.config_dirty = true;

        if !data.intervals.is_empty() {
            self.printer.intervals.update_from_wire(&data.intervals);
        }

        self.printer.mark_common_fields_as_changed();
        self.set_state(ClientState::Connected);
    }

    fn on_pong(&mut self) {
        let Some(ping_ts) = self.last_ping_sent_ms.take() else {
            return;
        };
        let pong_ts = now_ms();
        self.printer.latency.pong.set(Some(pong_ts - ping_ts));
        self.outbox.push(ClientMsg::Latency(LatencyData {
            ping: ping_ts,
            pong: pong_ts,
        }));
    }

    /// §4.4's PENDING_ADDED transitions.
    fn on_add_connection_reply(&mut self, data: MultiPrinterAddedData) {
        if data.unique_id != self.unique_id() {
            return;
        }

        if !data.status {
            debug!("add_connection rejected by server");
            self.set_state(ClientState::NotConnected);
            return;
        }

        self.pending_gate.reset();
        if let Some(pid) = data.pid {
            self.config.with_mut(|c| c.id = pid);
            self.config_dirty = true;
        }
        self.set_state(ClientState::Connected);
    }

    /// §4.4's PENDING_REMOVED transition.
    fn on_remove_connection_reply(&mut self, data: MultiPrinterRemovedData) {
        if data.unique_id != self.unique_id() {
            return;
        }
        self.set_state(ClientState::NotConnected);
    }

    // -- demands (§4.3, §7) -------------------------------------------------

    fn on_demand(&mut self, demand: Demand) {
        match demand {
            Demand::Pause => self.printer.status.set(crate::state::printer::PrinterStatus::Paused),
            Demand::Resume => self.printer.status.set(crate::state::printer::PrinterStatus::Printing),
            Demand::Cancel => self.printer.job_info.set_cancelled(true),
            Demand::StartPrint => self.printer.job_info.set_started(true),
            Demand::RefreshMaterialData => self.force_material_refresh = true,
            Demand::File(ref data) => {
                self.current_job_id = data.job_id;
                self.demand_sink.handle(&self.unique_id(), &demand);
            }
            Demand::SetMaterialData(data) => self.apply_material_data(data),
            Demand::WebcamSettingsUpdated(data) => self.apply_webcam_settings(data),
            Demand::StreamOn => self.printer.webcam_info.connected.set(Some(true)),
            Demand::StreamOff => self.printer.webcam_info.connected.set(Some(false)),
            Demand::PsuOn => self.printer.psu_info.on.set(Some(true)),
            Demand::PsuOff => self.printer.psu_info.on.set(Some(false)),
            Demand::PsuKeepalive => {}
            Demand::DisableWebsockets => info!("server requested websocket disable"),
            Demand::GotoWsProd | Demand::GotoWsTest => {
                info!("server requested a backend switch");
                self.demand_sink.handle(&self.unique_id(), &demand);
            }
            other => self.demand_sink.handle(&self.unique_id(), &other),
        }
    }

    fn apply_material_data(&mut self, data: SetMaterialDataDemandData) {
        if let Some(material) = self
            .printer
            .materials_mut()
            .iter_mut()
            .find(|m| m.ext == data.ext)
        {
            if let Some(t) = data.r#type {
                material.material_type.set(Some(t));
            }
            if let Some(color) = data.color {
                material.color.set(Some(color));
            }
        }
    }

    fn apply_webcam_settings(&mut self, data: WebcamSettingsUpdatedDemandData) {
        if let Some(flip_h) = data.flip_h {
            self.printer.webcam_settings.flip_h.set(Some(flip_h));
        }
        if let Some(flip_v) = data.flip_v {
            self.printer.webcam_settings.flip_v.set(Some(flip_v));
        }
    }

    /// Sends a raw `psu` client message outside the producer layer, used by
    /// collaborators that poll PSU hardware directly rather than through the
    /// reactive tree.
    pub fn queue_psu_report(&mut self, on: bool) {
        self.outbox.push(ClientMsg::Psu(PsuData { on }));
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrinterConfig;

    fn client() -> Client {
        Client::new(ConfigHandle::new(PrinterConfig::blank()))
    }

    #[test]
    fn fresh_client_is_connecting() {
        let c = client();
        assert_eq!(c.state(), ClientState::Connecting);
    }

    #[test]
    fn single_mode_established_implies_added() {
        let mut c = client();
        c.on_connection_established(1);
        assert!(c.ensure_added(ConnectionMode::Single));
    }

    #[test]
    fn multi_mode_add_handshake_round_trip() {
        let mut c = client();
        c.on_connection_established(1);
        assert!(!c.ensure_added(ConnectionMode::Multi));
        assert_eq!(c.state(), ClientState::PendingAdded);
        assert_eq!(c.drain_outbox().len(), 1);

        let uid = c.unique_id();
        c.on_incoming(
            ServerMsg::AddConnection(MultiPrinterAddedData {
                unique_id: uid,
                status: true,
                pid: Some(42),
            }),
            1,
        );
        assert_eq!(c.state(), ClientState::Connected);
        assert_eq!(c.config().snapshot().id, 42);
    }

    #[test]
    fn add_rejection_collapses_to_not_connected() {
        let mut c = client();
        c.on_connection_established(1);
        c.ensure_added(ConnectionMode::Multi);
        let uid = c.unique_id();
        c.on_incoming(
            ServerMsg::AddConnection(MultiPrinterAddedData {
                unique_id: uid,
                status: false,
                pid: None,
            }),
            1,
        );
        assert_eq!(c.state(), ClientState::NotConnected);
    }

    #[test]
    fn reconnect_collapses_state_to_connecting() {
        let mut c = client();
        c.on_connection_established(1);
        c.ensure_added(ConnectionMode::Single);
        c.on_connection_lost(2);
        assert_eq!(c.state(), ClientState::Connecting);
    }

    #[test]
    fn stale_generation_messages_are_dropped() {
        let mut c = client();
        c.on_connection_established(1);
        c.on_connection_lost(2);
        let uid = c.unique_id();
        c.on_incoming(
            ServerMsg::AddConnection(MultiPrinterAddedData {
                unique_id: uid,
                status: true,
                pid: Some(7),
            }),
            1,
        );
        assert_ne!(c.config().snapshot().id, 7);
    }

    #[test]
    fn no_exist_token_resets_config_to_pending() {
        let mut c = client();
        c.config.with_mut(|cfg| {
            cfg.id = 9;
            cfg.token = "tok".into();
            cfg.in_setup = false;
        });
        c.on_connection_established(1);
        c.on_incoming(
            ServerMsg::NewToken(NewTokenData {
                token: String::new(),
                short_id: None,
                no_exist: true,
            }),
            1,
        );
        let snapshot = c.config().snapshot();
        assert_eq!(snapshot.id, 0);
        assert!(snapshot.in_setup);
    }

    #[test]
    fn file_demand_records_job_id_for_file_progress() {
        use crate::protocol::demand::FileDemandData;

        let mut c = client();
        c.on_connection_established(1);
        c.on_incoming(
            ServerMsg::Demand(Demand::File(FileDemandData {
                url: "https://example.invalid/file.gcode".into(),
                start_print: false,
                job_id: Some(99),
            })),
            1,
        );
        assert_eq!(c.current_job_id(), Some(99));

        c.printer_mut()
            .file_progress
            .state
            .set(Some("downloading".to_string()));
        let out = c.consume();
        let progress = out.iter().find_map(|m| match m {
            ClientMsg::FileProgress(data) => Some(data),
            _ => None,
        });
        assert_eq!(progress.expect("file progress message").job_id, Some(99));
    }
}
