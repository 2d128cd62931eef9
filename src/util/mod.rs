//! Small standalone utilities shared across the connection and client layers.
//!
//! Grounded in `shared/utils/` and `shared/asyncio/continuous_task.py`,
//! ported to plain structs with `Instant`-based timers and no external
//! state machine crate.

pub mod backoff;
pub mod bounded_interval;
pub mod continuous_task;
pub mod slugify;

pub use backoff::{Backoff, ExponentialBackoff, LinearBackoff};
pub use bounded_interval::BoundedInterval;
pub use continuous_task::ContinuousTask;
pub use slugify::slugify;
