//! Reactive state primitives: per-field change-version tracking (§3, §4.2,
//! §9) and the context pointer fields use to mint stamps and wake the
//! scheduler.
//!
//! Grounded in `core/state/state_model.py` (`StateModel.model_self_changed_
//! fields`, `model_recursive_changeset`) and `core/state/context.py`'s
//! `ctx.next_msg_id()` / `ctx.signal()`. The original uses a descriptor/
//! metaclass to intercept `__setattr__`; here each leaf field is an explicit
//! `Tracked<T>` or `Signal<T>` wrapper and records implement [`Stamped`] by
//! hand.

pub mod intervals;
pub mod job_info;
pub mod printer;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A changeset: dotted field path to the stamp that last touched it.
pub type Changeset = BTreeMap<String, u64>;

struct StateCtxInner {
    next_id: AtomicU64,
    notify: Notify,
}

/// Context a [`Tracked`]/[`Signal`] field uses to mint change stamps and wake
/// whatever scheduler owns the surrounding tree.
///
/// Detached sub-states (constructed before being grafted onto a client) carry
/// no inner context; mutating them stamps nothing and wakes nobody, exactly
/// as a nullable context pointer would in the original (§9).
#[derive(Clone, Default)]
pub struct StateCtx(Option<Arc<StateCtxInner>>);

impl StateCtx {
    pub fn new() -> Self {
        Self(Some(Arc::new(StateCtxInner {
            next_id: AtomicU64::new(1),
            notify: Notify::new(),
        })))
    }

    pub fn detached() -> Self {
        Self(None)
    }

    pub fn next_msg_id(&self) -> u64 {
        match &self.0 {
            Some(inner) => inner.next_id.fetch_add(1, Ordering::Relaxed),
            None => 0,
        }
    }

    /// The highest stamp minted so far (0 if none yet minted or detached).
    /// The client's scheduling gate (§4.8 "has changes") compares this
    /// against its own `last_msg_id` to decide whether a consume pass is
    /// worth running at all.
    pub fn current_msg_id(&self) -> u64 {
        match &self.0 {
            Some(inner) => inner.next_id.load(Ordering::Relaxed).saturating_sub(1),
            None => 0,
        }
    }

    /// Wakes whatever is waiting on this tree's changes (the scheduler's
    /// condition variable, §4.8).
    pub fn signal(&self) {
        if let Some(inner) = &self.0 {
            inner.notify.notify_one();
        }
    }

    pub async fn notified(&self) {
        if let Some(inner) = &self.0 {
            inner.notify.notified().await;
        }
    }
}

/// Anything that can report and reset a recursive changeset (§4.2).
pub trait Stamped {
    fn changeset(&self, prefix: &str, out: &mut Changeset);
    /// Clears stamps `<= max_stamp`, leaving later ones intact.
    fn reset_changes(&mut self, max_stamp: u64);
    fn max_stamp(&self) -> u64;
}

/// A single tracked leaf field. Assignment is a no-op (no new stamp, no
/// signal) when the value is unchanged, per §3's no-op invariant.
#[derive(Debug, Clone)]
pub struct Tracked<T> {
    value: T,
    stamp: u64,
    ctx: StateCtx,
}

impl<T: Default> Tracked<T> {
    pub fn new(ctx: StateCtx) -> Self {
        Self {
            value: T::default(),
            stamp: 0,
            ctx,
        }
    }
}

impl<T> Tracked<T> {
    pub fn with_value(value: T, ctx: StateCtx) -> Self {
        Self {
            value,
            stamp: 0,
            ctx,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    pub fn is_dirty(&self) -> bool {
        self.stamp != 0
    }

    /// Unconditionally stamps the field, bypassing the unchanged-value
    /// no-op guard in [`Tracked::set`]. Used to force a field the producer
    /// layer reads back onto the wire regardless of its current value, e.g.
    /// after a reconnect (§8 scenario 6).
    pub fn mark_dirty(&mut self) {
        self.stamp = self.ctx.next_msg_id();
        self.ctx.signal();
    }
}

impl<T: PartialEq> Tracked<T> {
    /// Assigns `value`. Returns `true` if it actually changed.
    pub fn set(&mut self, value: T) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        self.stamp = self.ctx.next_msg_id();
        self.ctx.signal();
        true
    }
}

impl<T> Stamped for Tracked<T> {
    fn changeset(&self, prefix: &str, out: &mut Changeset) {
        if self.stamp != 0 {
            out.insert(prefix.to_string(), self.stamp);
        }
    }

    fn reset_changes(&mut self, max_stamp: u64) {
        if self.stamp != 0 && self.stamp <= max_stamp {
            self.stamp = 0;
        }
    }

    fn max_stamp(&self) -> u64 {
        self.stamp
    }
}

/// A signal field: identity-driven change detection. Two consecutive
/// assignments of the same value both register as changes (§3 "Exclusive
/// fields", §9). Used for `job_info`'s `{started,finished,cancelled,failed}`.
#[derive(Debug, Clone)]
pub struct Signal<T> {
    value: T,
    stamp: u64,
    ctx: StateCtx,
}

impl<T: Default> Signal<T> {
    pub fn new(ctx: StateCtx) -> Self {
        Self {
            value: T::default(),
            stamp: 0,
            ctx,
        }
    }
}

impl<T> Signal<T> {
    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Always stamps, regardless of whether `value` equals the current one.
    pub fn set(&mut self, value: T) {
        self.value = value;
        self.stamp = self.ctx.next_msg_id();
        self.ctx.signal();
    }
}

impl<T> Stamped for Signal<T> {
    fn changeset(&self, prefix: &str, out: &mut Changeset) {
        if self.stamp != 0 {
            out.insert(prefix.to_string(), self.stamp);
        }
    }

    fn reset_changes(&mut self, max_stamp: u64) {
        if self.stamp != 0 && self.stamp <= max_stamp {
            self.stamp = 0;
        }
    }

    fn max_stamp(&self) -> u64 {
        self.stamp
    }
}

/// Folds the changesets of a list of `Stamped` sub-records under `prefix.N.`.
pub fn changeset_of_list<T: Stamped>(items: &[T], prefix: &str, out: &mut Changeset) {
    for (i, item) in items.iter().enumerate() {
        item.changeset(&format!("{prefix}.{i}"), out);
    }
}

pub fn reset_list(items: &mut [impl Stamped], max_stamp: u64) {
    for item in items {
        item.reset_changes(max_stamp);
    }
}

pub fn max_stamp_of_list<T: Stamped>(items: &[T]) -> u64 {
    items.iter().map(Stamped::max_stamp).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_assignment_is_a_no_op() {
        let ctx = StateCtx::new();
        let mut t = Tracked::with_value(5, ctx);
        assert!(!t.set(5));
        assert!(!t.is_dirty());
    }

    #[test]
    fn changed_assignment_stamps_and_is_visible_in_changeset() {
        let ctx = StateCtx::new();
        let mut t = Tracked::with_value(5, ctx);
        assert!(t.set(6));

        let mut out = Changeset::new();
        t.changeset("tool0.actual", &mut out);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key("tool0.actual"));
    }

    #[test]
    fn reset_changes_clears_only_up_to_bound() {
        let ctx = StateCtx::new();
        let mut t = Tracked::with_value(0, ctx);
        t.set(1);
        let first_stamp = t.stamp();
        t.reset_changes(first_stamp);
        assert!(!t.is_dirty());
    }

    #[test]
    fn signal_stamps_on_repeated_identical_assignment() {
        let ctx = StateCtx::new();
        let mut s: Signal<bool> = Signal::new(ctx);
        s.set(true);
        let first = s.stamp();
        s.set(true);
        assert_ne!(first, s.stamp());
    }

    #[test]
    fn detached_ctx_never_stamps() {
        let mut t = Tracked::with_value(0, StateCtx::detached());
        assert!(t.set(1));
        assert_eq!(t.stamp(), 0);
    }
}
