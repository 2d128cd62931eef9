//! Single in-flight task container.
//!
//! Ported from `shared/asyncio/continuous_task.py`: "a continuous task
//! manages a single asyncio task that is created on the first invocation.
//! Once it has completed it is created anew." In Rust this maps to a thin
//! wrapper around `Option<tokio::task::JoinHandle<T>>`.

use tokio::task::JoinHandle;

/// At most one managed [`tokio::task::JoinHandle`] at a time.
pub struct ContinuousTask<T> {
    handle: Option<JoinHandle<T>>,
}

impl<T> Default for ContinuousTask<T> {
    fn default() -> Self {
        Self { handle: None }
    }
}

impl<T: Send + 'static> ContinuousTask<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `fut` as the managed task if none is currently running.
    /// No-op (returns false) if a task is already in flight.
    pub fn schedule<F>(&mut self, fut: F) -> bool
    where
        F: std::future::Future<Output = T> + Send + 'static,
    {
        if self.handle.is_some() {
            return false;
        }

        self.handle = Some(tokio::spawn(fut));
        true
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn done(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_finished())
    }

    /// Removes and aborts the managed task, discarding its result.
    pub fn discard(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Removes the managed task without awaiting or aborting it.
    pub fn pop(&mut self) -> Option<JoinHandle<T>> {
        self.handle.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schedule_refuses_second_task_while_running() {
        let mut t: ContinuousTask<u32> = ContinuousTask::new();
        assert!(t.schedule(async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            1
        }));
        assert!(!t.schedule(async { 2 }));
        t.discard();
    }

    #[tokio::test]
    async fn pop_returns_handle_for_awaiting() {
        let mut t: ContinuousTask<u32> = ContinuousTask::new();
        t.schedule(async { 42 });
        let handle = t.pop().expect("handle scheduled");
        assert_eq!(handle.await.unwrap(), 42);
        assert!(t.pop().is_none());
    }
}
