//! Registry of in-flight connection tasks.
//!
//! Holds an abort handle per live connection so shutdown can cancel them
//! all at once. Slots are reserved before the task is spawned and filled
//! right after, so a task that finishes early never leaves a stale entry.
//! `reserve` and `attach` are only called from the single accept loop.

use slab::Slab;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::AbortHandle;

#[derive(Debug, Default)]
struct Slots {
    tasks: Slab<Option<AbortHandle>>,
    closed: bool,
}

/// Registry of active connection tasks using slab allocation.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    slots: Mutex<Slots>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // Slot bookkeeping stays consistent even if a holder panicked.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve a slot for a connection about to be spawned.
    ///
    /// Returns `None` once the registry has been closed by shutdown.
    pub fn reserve(self: &Arc<Self>) -> Option<Registration> {
        let mut slots = self.lock();
        if slots.closed {
            return None;
        }
        let key = slots.tasks.insert(None);
        Some(Registration {
            registry: Arc::clone(self),
            key,
        })
    }

    /// Store the abort handle for the task spawned into slot `key`.
    ///
    /// If the registry was closed in the meantime the task is aborted on
    /// the spot; if the task already released its slot nothing is stored.
    pub fn attach(&self, key: usize, handle: AbortHandle) {
        let mut slots = self.lock();
        if slots.closed {
            handle.abort();
            return;
        }
        if let Some(slot) = slots.tasks.get_mut(key) {
            *slot = Some(handle);
        }
    }

    fn release(&self, key: usize) {
        let mut slots = self.lock();
        if slots.tasks.contains(key) {
            slots.tasks.remove(key);
        }
    }

    /// Close the registry and abort every registered task.
    ///
    /// Returns the number of tasks aborted.
    pub fn abort_all(&self) -> usize {
        let handles: Vec<AbortHandle> = {
            let mut slots = self.lock();
            slots.closed = true;
            slots.tasks.drain().flatten().collect()
        };
        for handle in &handles {
            handle.abort();
        }
        handles.len()
    }

    /// Number of live connections.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// A reserved registry slot; releases it on drop.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    key: usize,
}

impl Registration {
    pub fn key(&self) -> usize {
        self.key
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;

    #[test]
    fn test_reserve_and_release() {
        let registry = Arc::new(ConnectionRegistry::new());
        let a = registry.reserve().unwrap();
        let b = registry.reserve().unwrap();
        assert_ne!(a.key(), b.key());
        assert_eq!(registry.len(), 2);

        drop(a);
        assert_eq!(registry.len(), 1);
        drop(b);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_abort_all_cancels_tasks_and_closes() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut joins = Vec::new();

        for _ in 0..3 {
            let registration = registry.reserve().unwrap();
            let key = registration.key();
            let handle = tokio::spawn(async move {
                let _registration = registration;
                pending::<()>().await;
            });
            registry.attach(key, handle.abort_handle());
            joins.push(handle);
        }
        assert_eq!(registry.len(), 3);

        assert_eq!(registry.abort_all(), 3);
        for join in joins {
            assert!(join.await.unwrap_err().is_cancelled());
        }
        assert!(registry.is_empty());
        assert!(registry.is_closed());
        assert!(registry.reserve().is_none());
    }

    #[tokio::test]
    async fn test_attach_after_close_aborts() {
        let registry = Arc::new(ConnectionRegistry::new());
        let registration = registry.reserve().unwrap();
        let key = registration.key();
        let handle = tokio::spawn(async move {
            let _registration = registration;
            pending::<()>().await;
        });

        // Shutdown lands between spawn and attach.
        assert_eq!(registry.abort_all(), 0);
        registry.attach(key, handle.abort_handle());
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_finished_task_leaves_no_entry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let registration = registry.reserve().unwrap();
        let key = registration.key();
        let handle = tokio::spawn(async move {
            drop(registration);
        });
        let abort = handle.abort_handle();
        handle.await.unwrap();

        registry.attach(key, abort);
        assert!(registry.is_empty());
    }
}
