//! Storage collaborator interface.
//!
//! Task bodies read and write tile output through this seam; the scheduler
//! itself performs no I/O. Implementations are expected to be
//! retry-wrapped by their own policy already; calls made from inside task
//! bodies may additionally be wrapped with
//! [`run_with_retry`](crate::executor::run_with_retry).

use crate::executor::TaskError;
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Abstract tile output storage: existence checks, reads and writes by
/// target key.
///
/// Errors carry a [`TaskErrorKind`](crate::executor::TaskErrorKind) so
/// retry policies can classify them.
pub trait Storage: Send + Sync + 'static {
    /// Returns true if the target exists.
    fn exists(&self, target: &str) -> BoxFuture<'static, Result<bool, TaskError>>;

    /// Reads the target's payload.
    fn read(&self, target: &str) -> BoxFuture<'static, Result<Bytes, TaskError>>;

    /// Writes the payload under the target key.
    ///
    /// Writes must be idempotent: repeating the same write verbatim is
    /// safe, which the retry policy relies on.
    fn write(&self, target: &str, data: Bytes) -> BoxFuture<'static, Result<(), TaskError>>;
}

/// In-memory storage used by tests and demos.
///
/// Writes are last-write-wins; each task owns its output target
/// exclusively, so no further coordination is needed.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<DashMap<String, Bytes>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored targets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn exists(&self, target: &str) -> BoxFuture<'static, Result<bool, TaskError>> {
        let exists = self.entries.contains_key(target);
        Box::pin(async move { Ok(exists) })
    }

    fn read(&self, target: &str) -> BoxFuture<'static, Result<Bytes, TaskError>> {
        let data = self.entries.get(target).map(|entry| entry.value().clone());
        let target = target.to_string();
        Box::pin(async move {
            data.ok_or_else(|| TaskError::io(format!("no such target: {}", target)))
        })
    }

    fn write(&self, target: &str, data: Bytes) -> BoxFuture<'static, Result<(), TaskError>> {
        self.entries.insert(target.to_string(), data);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{run_with_retry, RetryPolicy, TaskErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_write_then_read() {
        let storage = MemoryStorage::new();
        storage
            .write("5/3/7", Bytes::from_static(b"tile"))
            .await
            .unwrap();

        assert!(storage.exists("5/3/7").await.unwrap());
        assert_eq!(
            storage.read("5/3/7").await.unwrap(),
            Bytes::from_static(b"tile")
        );
    }

    #[tokio::test]
    async fn test_missing_target() {
        let storage = MemoryStorage::new();
        assert!(!storage.exists("nowhere").await.unwrap());

        let error = storage.read("nowhere").await.unwrap_err();
        assert_eq!(error.kind(), TaskErrorKind::Io);
    }

    #[tokio::test]
    async fn test_write_is_idempotent() {
        let storage = MemoryStorage::new();
        for _ in 0..3 {
            storage
                .write("5/3/7", Bytes::from_static(b"same"))
                .await
                .unwrap();
        }
        assert_eq!(storage.len(), 1);
        assert_eq!(
            storage.read("5/3/7").await.unwrap(),
            Bytes::from_static(b"same")
        );
    }

    /// Storage whose reads fail a fixed number of times before succeeding.
    struct FlakyStorage {
        inner: MemoryStorage,
        failures_left: AtomicU32,
    }

    impl Storage for FlakyStorage {
        fn exists(&self, target: &str) -> BoxFuture<'static, Result<bool, TaskError>> {
            self.inner.exists(target)
        }

        fn read(&self, target: &str) -> BoxFuture<'static, Result<Bytes, TaskError>> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Box::pin(async { Err(TaskError::connection("link down")) });
            }
            self.inner.read(target)
        }

        fn write(&self, target: &str, data: Bytes) -> BoxFuture<'static, Result<(), TaskError>> {
            self.inner.write(target, data)
        }
    }

    #[tokio::test]
    async fn test_retry_wrapped_read() {
        let storage = FlakyStorage {
            inner: MemoryStorage::new(),
            failures_left: AtomicU32::new(2),
        };
        storage
            .write("5/3/7", Bytes::from_static(b"tile"))
            .await
            .unwrap();

        let policy = RetryPolicy::new(3, Duration::from_millis(1), 1.0);
        let data = run_with_retry(&policy, || storage.read("5/3/7"))
            .await
            .unwrap();
        assert_eq!(data, Bytes::from_static(b"tile"));
    }
}
