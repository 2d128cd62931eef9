//! Interval / rate-limit gate (§4.1). Named cooldowns, each a duration plus
//! a last-used monotonic instant; `use_interval` is the only operation that
//! advances last-used. Grounded in `core/state/models.py`'s `Intervals`
//! model and its wire name table.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Whether a message kind should be sent now, dropped, or rate-limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Dispatch,
    RateLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalKind {
    Ai,
    Job,
    Temps,
    TempsTarget,
    Cpu,
    Reconnect,
    ReadyMessage,
    Ping,
    Webcam,
}

impl IntervalKind {
    /// Defaults in milliseconds, matching the original's fallback table.
    fn default_ms(self) -> u64 {
        match self {
            IntervalKind::Ai => 5_000,
            IntervalKind::Job => 5_000,
            IntervalKind::Temps => 5_000,
            IntervalKind::TempsTarget => 1_000,
            IntervalKind::Cpu => 30_000,
            IntervalKind::Reconnect => 1_000,
            IntervalKind::ReadyMessage => 1_000,
            IntervalKind::Ping => 20_000,
            IntervalKind::Webcam => 1_000,
        }
    }

    /// Maps the wire name used in `connected`/`interval_change` payloads
    /// (§3, §6) to its kind. Unknown names are ignored rather than
    /// rejected, since the server may introduce new interval kinds the
    /// client doesn't yet understand.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        use IntervalKind::*;
        Some(match name {
            "ai" => Ai,
            "job" => Job,
            "temps" => Temps,
            "temps_target" => TempsTarget,
            "cpu" => Cpu,
            "reconnect" => Reconnect,
            "ready_message" => ReadyMessage,
            "ping" => Ping,
            "webcam" => Webcam,
            _ => return None,
        })
    }
}

struct Interval {
    duration: Duration,
    last_used: Option<Instant>,
}

/// The printer's interval table. The server can replace any subset of
/// durations at any time via `update`, without resetting `last_used` (§4.1).
pub struct Intervals {
    table: HashMap<IntervalKind, Interval>,
}

impl Default for Intervals {
    fn default() -> Self {
        use IntervalKind::*;
        let mut table = HashMap::new();
        for kind in [Ai, Job, Temps, TempsTarget, Cpu, Reconnect, ReadyMessage, Ping, Webcam] {
            table.insert(
                kind,
                Interval {
                    duration: Duration::from_millis(kind.default_ms()),
                    last_used: None,
                },
            );
        }
        Self { table }
    }
}

impl Intervals {
    pub fn is_ready(&self, kind: IntervalKind) -> bool {
        let Some(interval) = self.table.get(&kind) else {
            return true;
        };
        match interval.last_used {
            None => true,
            Some(last) => last.elapsed() >= interval.duration,
        }
    }

    pub fn dispatch_mode(&self, kind: IntervalKind) -> DispatchMode {
        if self.is_ready(kind) {
            DispatchMode::Dispatch
        } else {
            DispatchMode::RateLimit
        }
    }

    /// Consumes the interval if ready. Idempotent within a single tick: a
    /// second call before the duration elapses again returns `false`.
    pub fn use_interval(&mut self, kind: IntervalKind) -> bool {
        if !self.is_ready(kind) {
            return false;
        }
        if let Some(interval) = self.table.get_mut(&kind) {
            interval.last_used = Some(Instant::now());
        }
        true
    }

    pub fn set(&mut self, kind: IntervalKind, ms: u64) {
        self.table
            .entry(kind)
            .or_insert(Interval {
                duration: Duration::from_millis(ms),
                last_used: None,
            })
            .duration = Duration::from_millis(ms);
    }

    /// Replaces durations for all given kinds; `last_used` timestamps are
    /// left untouched so outstanding cooldowns keep counting down.
    pub fn update(&mut self, durations_ms: &HashMap<IntervalKind, u64>) {
        for (kind, ms) in durations_ms {
            self.set(*kind, *ms);
        }
    }

    /// Same as [`update`](Self::update) but keyed by the wire names used in
    /// `connected`/`interval_change` payloads (§3, §6).
    pub fn update_from_wire(&mut self, durations_ms: &HashMap<String, u64>) {
        for (name, ms) in durations_ms {
            if let Some(kind) = IntervalKind::from_wire_name(name) {
                self.set(kind, *ms);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_interval_is_ready() {
        let intervals = Intervals::default();
        assert!(intervals.is_ready(IntervalKind::Ping));
    }

    #[test]
    fn use_interval_is_idempotent_within_the_cooldown() {
        let mut intervals = Intervals::default();
        intervals.set(IntervalKind::Ping, 60_000);
        assert!(intervals.use_interval(IntervalKind::Ping));
        assert!(!intervals.use_interval(IntervalKind::Ping));
    }

    #[test]
    fn update_does_not_reset_last_used() {
        let mut intervals = Intervals::default();
        intervals.set(IntervalKind::Ping, 60_000);
        intervals.use_interval(IntervalKind::Ping);
        assert!(!intervals.is_ready(IntervalKind::Ping));

        let mut durations = HashMap::new();
        durations.insert(IntervalKind::Ping, 120_000);
        intervals.update(&durations);

        assert!(!intervals.is_ready(IntervalKind::Ping));
    }
}
