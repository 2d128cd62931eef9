//! Wire protocol: the tagged-union message envelope (§3, §6) and the
//! state→message producer layer (§4.3).
//!
//! Grounded in `core/ws_protocol/messages.py` (the `ServerMsg`/`ClientMsg`
//! `RootModel` unions) and `shared/sp/url_builder.py` for the envelope
//! shape. Replaces Pydantic's discriminated-union validation with serde's
//! `#[serde(tag = ...)]`, which gives the same "one envelope enum per
//! direction with an explicit discriminator" shape (§9).

pub mod demand;
pub mod envelope;
pub mod messages;
pub mod producers;

pub use demand::Demand;
pub use envelope::Envelope;
pub use messages::{ClientMsg, ServerMsg};
