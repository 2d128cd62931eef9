//! The connection layer (§4.5, §4.6, §4.7): one WebSocket per underlying
//! socket, SINGLE/MULTI multiplexing, and the manager that allocates
//! clients onto connections.
//!
//! Grounded in `core/ws_protocol/connection.py` for the state machine,
//! `core/client_connection_manager.py`/`core/connection_manager.py` for
//! allocation, and `shared/sp/url_builder.py` for the URL shape. The
//! original uses `aiohttp`; this crate uses `tokio_tungstenite` the way the
//! pack's other async network clients do (see `other_examples/...client.rs`
//! / `...connection_pool.rs`).

pub mod connection;
pub mod diagnostics;
pub mod events;
pub mod manager;
pub mod view;

pub use connection::{Connection, ConnectionHint};
pub use diagnostics::ConnectivityReport;
pub use events::ConnectionEvent;
pub use manager::ConnectionManager;
pub use view::{ClientView, RouteTarget};

/// SINGLE (one printer per socket) or MULTI (many printers share one
/// socket, routed by an `add`/`remove` handshake and a `for` tag on every
/// envelope) — §2, §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Single,
    Multi,
}

impl ConnectionMode {
    pub fn as_path_segment(&self) -> &'static str {
        match self {
            ConnectionMode::Single => "p",
            ConnectionMode::Multi => "mp",
        }
    }
}
