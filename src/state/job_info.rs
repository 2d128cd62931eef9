//! `job_info`'s exclusive lifecycle fields (§3 "Exclusive fields", §8
//! scenario 4). Exactly one of `{started, finished, cancelled, failed}` is
//! true at a time; setting one true clears the others. Grounded in
//! `core/state/exclusive.py` / `core/state/job_info.py`.

use super::{Changeset, Signal, Stamped, StateCtx, Tracked};

#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub enum JobLifecycle {
    #[default]
    Idle,
    Started,
    Finished,
    Cancelled,
    Failed,
}

/// The four exclusive lifecycle signals plus the scalar job metadata.
pub struct JobInfo {
    started: Signal<bool>,
    finished: Signal<bool>,
    cancelled: Signal<bool>,
    failed: Signal<bool>,
    pub progress: Tracked<Option<f64>>,
    pub filename: Tracked<Option<String>>,
    pub job_id: Tracked<Option<i64>>,
}

impl JobInfo {
    pub fn new(ctx: StateCtx) -> Self {
        Self {
            started: Signal::new(ctx.clone()),
            finished: Signal::new(ctx.clone()),
            cancelled: Signal::new(ctx.clone()),
            failed: Signal::new(ctx.clone()),
            progress: Tracked::new(ctx.clone()),
            filename: Tracked::new(ctx.clone()),
            job_id: Tracked::new(ctx),
        }
    }

    fn clear_others(&mut self, keep: JobLifecycle) {
        if keep != JobLifecycle::Started && *self.started.get() {
            self.started.set(false);
        }
        if keep != JobLifecycle::Finished && *self.finished.get() {
            self.finished.set(false);
        }
        if keep != JobLifecycle::Cancelled && *self.cancelled.get() {
            self.cancelled.set(false);
        }
        if keep != JobLifecycle::Failed && *self.failed.get() {
            self.failed.set(false);
        }
    }

    pub fn set_started(&mut self, value: bool) {
        self.started.set(value);
        if value {
            self.clear_others(JobLifecycle::Started);
        }
    }

    pub fn set_finished(&mut self, value: bool) {
        self.finished.set(value);
        if value {
            self.clear_others(JobLifecycle::Finished);
        }
    }

    pub fn set_cancelled(&mut self, value: bool) {
        self.cancelled.set(value);
        if value {
            self.clear_others(JobLifecycle::Cancelled);
        }
    }

    pub fn set_failed(&mut self, value: bool) {
        self.failed.set(value);
        if value {
            self.clear_others(JobLifecycle::Failed);
        }
    }

    pub fn started(&self) -> bool {
        *self.started.get()
    }
    pub fn finished(&self) -> bool {
        *self.finished.get()
    }
    pub fn cancelled(&self) -> bool {
        *self.cancelled.get()
    }
    pub fn failed(&self) -> bool {
        *self.failed.get()
    }

    pub fn started_dirty(&self) -> bool {
        self.started.stamp() != 0
    }
    pub fn finished_dirty(&self) -> bool {
        self.finished.stamp() != 0
    }
    pub fn cancelled_dirty(&self) -> bool {
        self.cancelled.stamp() != 0
    }
    pub fn failed_dirty(&self) -> bool {
        self.failed.stamp() != 0
    }

    /// True when at least one lifecycle signal carries an unconsumed stamp —
    /// the producer rule that forces `job_info` dispatch regardless of the
    /// `job` interval (§4.3).
    pub fn lifecycle_changed(&self) -> bool {
        [&self.started, &self.finished, &self.cancelled, &self.failed]
            .iter()
            .any(|s| s.stamp() != 0)
    }
}

impl Stamped for JobInfo {
    fn changeset(&self, prefix: &str, out: &mut Changeset) {
        self.started.changeset(&format!("{prefix}.started"), out);
        self.finished.changeset(&format!("{prefix}.finished"), out);
        self.cancelled.changeset(&format!("{prefix}.cancelled"), out);
        self.failed.changeset(&format!("{prefix}.failed"), out);
        self.progress.changeset(&format!("{prefix}.progress"), out);
        self.filename.changeset(&format!("{prefix}.filename"), out);
        self.job_id.changeset(&format!("{prefix}.job_id"), out);
    }

    fn reset_changes(&mut self, max_stamp: u64) {
        self.started.reset_changes(max_stamp);
        self.finished.reset_changes(max_stamp);
        self.cancelled.reset_changes(max_stamp);
        self.failed.reset_changes(max_stamp);
        self.progress.reset_changes(max_stamp);
        self.filename.reset_changes(max_stamp);
        self.job_id.reset_changes(max_stamp);
    }

    fn max_stamp(&self) -> u64 {
        [
            self.started.stamp(),
            self.finished.stamp(),
            self.cancelled.stamp(),
            self.failed.stamp(),
            self.progress.max_stamp(),
            self.filename.max_stamp(),
            self.job_id.max_stamp(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_lifecycle_flag_is_true_at_once() {
        let ctx = StateCtx::new();
        let mut job = JobInfo::new(ctx);

        job.set_started(true);
        assert!(job.started());

        job.set_cancelled(true);
        assert!(job.cancelled());
        assert!(!job.started());
    }

    #[test]
    fn repeated_identical_signal_assignment_still_registers() {
        let ctx = StateCtx::new();
        let mut job = JobInfo::new(ctx);
        job.set_started(true);
        let mut out = Changeset::new();
        job.changeset("job_info", &mut out);
        job.reset_changes(job.max_stamp());

        job.set_started(true);
        assert!(job.lifecycle_changed());
    }
}
