//! Single, idempotent server teardown.
//!
//! Any number of callers may request shutdown concurrently; the one that
//! flips the flag performs teardown, everyone else returns immediately.
//! Teardown is forceful: in-flight connection tasks are aborted, not
//! drained.

use crate::registry::ConnectionRegistry;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// What asked the server to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// No clients for longer than the idle threshold.
    Idle,
    /// The process received a termination signal.
    Signal,
    /// The listener could not be started.
    StartupFailure,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Idle => write!(f, "idle timeout"),
            ShutdownReason::Signal => write!(f, "termination signal"),
            ShutdownReason::StartupFailure => write!(f, "startup failure"),
        }
    }
}

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Stopping,
    Stopped,
}

/// Owns the handles needed to stop the listener, the activity monitor and
/// every connection task.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    requested: AtomicBool,
    reason: OnceLock<ShutdownReason>,
    listener: Mutex<Option<AbortHandle>>,
    monitor: Mutex<Option<AbortHandle>>,
    connections: Arc<ConnectionRegistry>,
    phase: watch::Sender<Phase>,
}

fn take(slot: &Mutex<Option<AbortHandle>>) -> Option<AbortHandle> {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}

impl ShutdownCoordinator {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        let (phase, _) = watch::channel(Phase::Running);
        ShutdownCoordinator {
            requested: AtomicBool::new(false),
            reason: OnceLock::new(),
            listener: Mutex::new(None),
            monitor: Mutex::new(None),
            connections,
            phase,
        }
    }

    /// Hand over the accept loop task. Aborted at once if shutdown already ran.
    pub fn register_listener(&self, handle: AbortHandle) {
        self.register(&self.listener, handle);
    }

    /// Hand over the activity monitor task. Aborted at once if shutdown already ran.
    pub fn register_monitor(&self, handle: AbortHandle) {
        self.register(&self.monitor, handle);
    }

    fn register(&self, slot: &Mutex<Option<AbortHandle>>, handle: AbortHandle) {
        let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Checked under the slot lock so teardown cannot miss the handle.
        if self.is_shutting_down() {
            handle.abort();
        } else {
            *guard = Some(handle);
        }
    }

    /// Request shutdown. Returns `true` for the caller that performed teardown.
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        if self
            .requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(%reason, "Shutdown already in progress");
            return false;
        }

        let _ = self.reason.set(reason);
        self.phase.send_replace(Phase::Stopping);
        info!(%reason, "Shutting down server");

        // Taking each slot under its lock pairs with the check in `register`.
        if let Some(listener) = take(&self.listener) {
            listener.abort();
            info!("Listening socket closed");
        }

        if let Some(monitor) = take(&self.monitor) {
            monitor.abort();
            info!("Activity monitor stopped");
        }

        let aborted = self.connections.abort_all();
        info!(aborted, "Client connections terminated");

        self.phase.send_replace(Phase::Stopped);
        info!("Server stopped");
        true
    }

    pub fn is_shutting_down(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Wait until teardown has completed and return its trigger.
    pub async fn stopped(&self) -> ShutdownReason {
        let mut phase = self.phase.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = phase.wait_for(|p| *p == Phase::Stopped).await;
        self.reason().unwrap_or(ShutdownReason::Signal)
    }
}
