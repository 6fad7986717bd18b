//! Handle over one submitted batch.
//!
//! An [`ExecutionHandle`] is returned by
//! [`Executor::submit`](super::Executor::submit) and is the only way to
//! observe a batch: a finite, single-consumer stream of task events in
//! completion order. Every submitted task produces exactly one
//! [`TaskEvent::Completed`]; none is duplicated or dropped, including after
//! cancellation. The backend drops its bookkeeping for a task the moment
//! its completion is handed to the channel, so memory stays bounded over
//! long-running jobs.

use super::task::{TaskCompletion, TaskId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the event channel between a backend and its handle.
///
/// Independent of batch size: a slow consumer exerts backpressure on the
/// backend instead of buffering every result.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle event of one task within a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskEvent {
    /// The task started running.
    Started(TaskId),
    /// The task reached a terminal state.
    Completed(TaskCompletion),
}

/// Single-consumer stream of task events for one submitted batch.
///
/// The stream is finite (it ends once every task has completed) and not
/// restartable; events arrive in completion order, which is only
/// submission order for the sequential backend.
pub struct ExecutionHandle {
    total: usize,
    events: mpsc::Receiver<TaskEvent>,
    cancel: CancellationToken,
    completed: usize,
}

impl ExecutionHandle {
    /// Creates a handle; called by executor backends.
    pub(crate) fn new(
        total: usize,
        events: mpsc::Receiver<TaskEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            total,
            events,
            cancel,
            completed: 0,
        }
    }

    /// Number of tasks submitted with this batch.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of completions yielded so far.
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Receives the next task event.
    ///
    /// Returns `None` once the backend has emitted a completion for every
    /// task in the batch.
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        let event = self.events.recv().await?;
        if matches!(event, TaskEvent::Completed(_)) {
            self.completed += 1;
        }
        Some(event)
    }

    /// Receives the next completion, skipping start events.
    pub async fn next_completed(&mut self) -> Option<TaskCompletion> {
        while let Some(event) = self.next_event().await {
            if let TaskEvent::Completed(completion) = event {
                return Some(completion);
            }
        }
        None
    }

    /// Requests cooperative cancellation of the batch.
    ///
    /// Tasks not yet started are completed as cancelled without running;
    /// in-flight tasks observe the signal through their context and may
    /// still finish normally. Every task keeps producing exactly one
    /// completion, so the stream must still be drained.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drains all remaining completions.
    pub async fn drain(mut self) -> Vec<TaskCompletion> {
        let mut completions = Vec::with_capacity(self.total - self.completed);
        while let Some(completion) = self.next_completed().await {
            completions.push(completion);
        }
        completions
    }
}

impl Drop for ExecutionHandle {
    fn drop(&mut self) {
        // An abandoned handle must not leave the backend running.
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("total", &self.total)
            .field("completed", &self.completed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::task::TaskOutcome;

    fn completion(id: &str) -> TaskCompletion {
        TaskCompletion::cancelled(TaskId::new(id))
    }

    #[tokio::test]
    async fn test_events_arrive_in_channel_order() {
        let (tx, rx) = mpsc::channel(8);
        let mut handle = ExecutionHandle::new(2, rx, CancellationToken::new());

        tx.send(TaskEvent::Started(TaskId::new("a"))).await.unwrap();
        tx.send(TaskEvent::Completed(completion("a"))).await.unwrap();
        tx.send(TaskEvent::Completed(completion("b"))).await.unwrap();
        drop(tx);

        assert_eq!(
            handle.next_event().await,
            Some(TaskEvent::Started(TaskId::new("a")))
        );
        assert_eq!(
            handle.next_event().await,
            Some(TaskEvent::Completed(completion("a")))
        );
        assert_eq!(handle.completed(), 1);
        assert_eq!(
            handle.next_event().await,
            Some(TaskEvent::Completed(completion("b")))
        );
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn test_next_completed_skips_start_events() {
        let (tx, rx) = mpsc::channel(8);
        let mut handle = ExecutionHandle::new(1, rx, CancellationToken::new());

        tx.send(TaskEvent::Started(TaskId::new("a"))).await.unwrap();
        tx.send(TaskEvent::Completed(completion("a"))).await.unwrap();
        drop(tx);

        let only = handle.next_completed().await.unwrap();
        assert_eq!(only.task_id, TaskId::new("a"));
        assert_eq!(only.outcome, TaskOutcome::Cancelled);
        assert!(handle.next_completed().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_fires_token() {
        let (_tx, rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let handle = ExecutionHandle::new(0, rx, token.clone());

        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels() {
        let (_tx, rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        drop(ExecutionHandle::new(0, rx, token.clone()));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_drain_collects_all_completions() {
        let (tx, rx) = mpsc::channel(8);
        let handle = ExecutionHandle::new(3, rx, CancellationToken::new());

        for id in ["a", "b", "c"] {
            tx.send(TaskEvent::Completed(completion(id))).await.unwrap();
        }
        drop(tx);

        let completions = handle.drain().await;
        assert_eq!(completions.len(), 3);
    }
}
