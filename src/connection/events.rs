//! Events a [`Connection`](super::Connection) emits on its local bus (§4.5).
//! Grounded in `core/ws_protocol/events.py`.

use crate::protocol::ServerMsg;

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The socket is up; `v` is the new connection generation.
    Established(u64),
    /// The socket closed or errored; `v` is the generation that was lost.
    Lost(u64),
    /// `N` consecutive connect failures (§4.5); the manager should run
    /// diagnostics (§4.7), rate-limited.
    Suspect,
    /// A message arrived on generation `v`, with the envelope's `for` tag
    /// (the target client's `unique_id` in MULTI mode, absent otherwise).
    Incoming(ServerMsg, u64, Option<String>),
}
