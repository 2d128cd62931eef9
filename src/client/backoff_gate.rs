//! The per-client add/remove "can-pend" backoff gate (§4.4).
//!
//! Grounded in `core/client.py`'s `_can_do_pending`/`_do_pending`: a pending
//! add or remove request is not re-issued before its delay has elapsed,
//! using an [`ExponentialBackoff`](crate::util::ExponentialBackoff) with a
//! small base (10s) and a 600s cap (§4.4, §9). A successful add resets it.

use std::time::{Duration, Instant};

use crate::util::{Backoff, ExponentialBackoff};

/// Gates repeated `ensure_added`/`ensure_removed` calls so a pending
/// handshake isn't re-sent before its backoff delay elapses.
pub struct PendingGate {
    backoff: ExponentialBackoff,
    pending_until: Option<Instant>,
}

impl Default for PendingGate {
    fn default() -> Self {
        Self {
            backoff: ExponentialBackoff::for_client_handshake(),
            pending_until: None,
        }
    }
}

impl PendingGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a new pending add/remove may be issued right now.
    pub fn can_pend(&self) -> bool {
        match self.pending_until {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    /// Records that a pending action was just issued, arming the backoff
    /// delay before the next one is allowed.
    pub fn mark_pending(&mut self) {
        let delay: Duration = self.backoff.delay();
        self.pending_until = Some(Instant::now() + delay);
    }

    /// Called on a successful add (§4.4: "a successful add resets the
    /// backoff").
    pub fn reset(&mut self) {
        self.backoff.reset();
        self.pending_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_gate_can_pend() {
        let gate = PendingGate::new();
        assert!(gate.can_pend());
    }

    #[test]
    fn marking_pending_blocks_until_delay_elapses() {
        let mut gate = PendingGate::new();
        gate.mark_pending();
        assert!(!gate.can_pend());
    }

    #[test]
    fn reset_clears_the_block() {
        let mut gate = PendingGate::new();
        gate.mark_pending();
        gate.reset();
        assert!(gate.can_pend());
    }
}
