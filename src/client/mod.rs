//! The per-printer protocol layer (§4.4): one [`Client`] per configured
//! printer, holding its reactive state tree and add/remove handshake.

pub mod backoff_gate;
pub mod client;

pub use backoff_gate::PendingGate;
pub use client::{Client, ClientState, DemandSink, LoggingDemandSink};
