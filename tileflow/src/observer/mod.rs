//! Job lifecycle observers.
//!
//! Observers are external collaborators notified of task starts, task
//! completions and the job-level terminal status. The core never depends
//! on what an observer does with an event; every registered observer sees
//! every event exactly once.

use crate::executor::{TaskId, TaskOutcome};
use crate::job::JobStatus;
use std::sync::Arc;

/// Receiver of job lifecycle events.
///
/// All methods default to no-ops so implementations only override what
/// they care about.
pub trait Observer: Send + Sync {
    /// A task started running.
    fn on_task_start(&self, _task_id: &TaskId) {}

    /// A task reached a terminal state.
    fn on_task_end(&self, _task_id: &TaskId, _outcome: &TaskOutcome) {}

    /// The job reached its terminal status.
    fn on_job_end(&self, _status: JobStatus) {}
}

/// Fan-out over a fixed set of observers.
///
/// Built once at job construction and cheap to clone.
#[derive(Clone, Default)]
pub struct Observers {
    inner: Arc<Vec<Arc<dyn Observer>>>,
}

impl Observers {
    /// Wraps a set of observers.
    pub fn new(observers: Vec<Arc<dyn Observer>>) -> Self {
        Self {
            inner: Arc::new(observers),
        }
    }

    /// No observers.
    pub fn none() -> Self {
        Self::default()
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Notifies all observers of a task start.
    pub fn notify_task_start(&self, task_id: &TaskId) {
        for observer in self.inner.iter() {
            observer.on_task_start(task_id);
        }
    }

    /// Notifies all observers of a task end.
    pub fn notify_task_end(&self, task_id: &TaskId, outcome: &TaskOutcome) {
        for observer in self.inner.iter() {
            observer.on_task_end(task_id, outcome);
        }
    }

    /// Notifies all observers of the job's terminal status.
    pub fn notify_job_end(&self, status: JobStatus) {
        for observer in self.inner.iter() {
            observer.on_job_end(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TaskValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingObserver {
        starts: AtomicUsize,
        ends: AtomicUsize,
        job_ends: AtomicUsize,
    }

    impl Observer for CountingObserver {
        fn on_task_start(&self, _task_id: &TaskId) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_task_end(&self, _task_id: &TaskId, _outcome: &TaskOutcome) {
            self.ends.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_end(&self, _status: JobStatus) {
            self.job_ends.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_every_observer_sees_every_event() {
        let first = Arc::new(CountingObserver::default());
        let second = Arc::new(CountingObserver::default());
        let observers = Observers::new(vec![first.clone(), second.clone()]);

        let id = TaskId::new("tile-1-0-0");
        observers.notify_task_start(&id);
        observers.notify_task_end(&id, &TaskOutcome::Done(TaskValue::Empty));
        observers.notify_job_end(JobStatus::Done);

        for observer in [&first, &second] {
            assert_eq!(observer.starts.load(Ordering::SeqCst), 1);
            assert_eq!(observer.ends.load(Ordering::SeqCst), 1);
            assert_eq!(observer.job_ends.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_empty_observers_are_noops() {
        let observers = Observers::none();
        assert!(observers.is_empty());
        assert_eq!(observers.len(), 0);
        observers.notify_job_end(JobStatus::Failed);
    }
}
