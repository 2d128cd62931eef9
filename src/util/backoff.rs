//! Backoff strategies for reconnect delays.
//!
//! Ported from `shared/utils/backoff.py`: the original exposes a `Backoff`
//! protocol with `Constant`, `Linear`, and `Exponential` implementations.
//! The connection layer (§4.5) uses [`ExponentialBackoff::for_connection`];
//! the per-client add/remove gate (§4.4) also uses [`ExponentialBackoff`],
//! via [`ExponentialBackoff::for_client_handshake`], since §4.4 calls for
//! an exponential backoff there too.

use rand::Rng;
use std::time::{Duration, Instant};

/// Common interface for reconnect-delay strategies.
pub trait Backoff: Send {
    /// Returns the next delay and advances internal state.
    fn delay(&mut self) -> Duration;
    /// Resets the strategy to its initial state (called on successful connect).
    fn reset(&mut self);
}

/// Grows linearly by `increment` each call, clamped to `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    current: Duration,
    min: Duration,
    max: Duration,
    increment: Duration,
}

impl LinearBackoff {
    pub fn new(min: Duration, max: Duration, increment: Duration) -> Self {
        Self {
            current: min,
            min,
            max,
            increment,
        }
    }
}

impl Backoff for LinearBackoff {
    fn delay(&mut self) -> Duration {
        self.current = (self.current + self.increment).min(self.max);
        self.current
    }

    fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Jittered exponential backoff that resets itself after a period of
/// inactivity, matching `shared/utils/backoff.py::ExponentialBackoff`.
///
/// Each call returns a uniform random delay in `[ideal/2, ideal]` where
/// `ideal = base * 2^exponent`, clamped to `max_delay`. If more than
/// `reset_after` elapses between calls the exponent resets to its initial
/// value, so a connection that has been stable for a while doesn't inherit
/// a long delay from a much earlier failure streak.
pub struct ExponentialBackoff {
    base: f64,
    max_delay: Duration,
    reset_after: Duration,
    exponent: i32,
    last_call: Instant,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max_delay: Duration, reset_after: Duration) -> Self {
        Self {
            base: base.as_secs_f64(),
            max_delay,
            reset_after,
            exponent: -1,
            last_call: Instant::now(),
        }
    }

    /// Connection-layer defaults: base backoff step, 60s cap.
    pub fn for_connection() -> Self {
        Self::new(
            Duration::from_millis(2500),
            Duration::from_secs(30),
            Duration::from_secs(60),
        )
    }

    /// Client add/remove handshake backoff: base 10s, cap 600s, reset after 1h.
    pub fn for_client_handshake() -> Self {
        Self::new(
            Duration::from_secs(10),
            Duration::from_secs(600),
            Duration::from_secs(3600),
        )
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&mut self) -> Duration {
        let now = Instant::now();
        let since_last = now.duration_since(self.last_call);
        self.last_call = now;

        if since_last > self.reset_after {
            self.reset();
        }

        self.exponent += 1;

        let ideal = self.base * 2f64.powi(self.exponent);
        let capped = ideal.min(self.max_delay.as_secs_f64());
        let mut rng = rand::thread_rng();
        let lo = capped / 2.0;
        let chosen = if capped > lo {
            rng.gen_range(lo..capped)
        } else {
            capped
        };

        Duration::from_secs_f64(chosen.max(0.0))
    }

    fn reset(&mut self) {
        self.exponent = -1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff_grows_then_clamps() {
        let mut b = LinearBackoff::new(
            Duration::from_secs(0),
            Duration::from_secs(3),
            Duration::from_secs(2),
        );
        assert_eq!(b.delay(), Duration::from_secs(2));
        assert_eq!(b.delay(), Duration::from_secs(3));
        assert_eq!(b.delay(), Duration::from_secs(3));
        b.reset();
        assert_eq!(b.delay(), Duration::from_secs(2));
    }

    #[test]
    fn exponential_backoff_respects_cap() {
        let mut b = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            Duration::from_secs(3600),
        );
        for _ in 0..20 {
            let d = b.delay();
            assert!(d <= Duration::from_secs(1));
        }
    }

    #[test]
    fn exponential_backoff_reset_restarts_sequence() {
        let mut b = ExponentialBackoff::new(
            Duration::from_millis(500),
            Duration::from_secs(100),
            Duration::from_secs(3600),
        );
        let _ = b.delay();
        let _ = b.delay();
        b.reset();
        // First delay after reset should be near the base again (well under
        // what repeated doubling would have produced).
        let d = b.delay();
        assert!(d <= Duration::from_secs(2));
    }
}
