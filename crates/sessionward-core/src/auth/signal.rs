//! The "session ended" broadcast.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

/// Payload-less notification that the session is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnded;

/// Broadcast handle shared by the coordinator, dispatcher and lifecycle.
///
/// The signal is armed while a session exists and fires at most once per
/// armed session, so a burst of terminal failures yields a single
/// notification. Cloning shares the same channel.
#[derive(Clone)]
pub struct SessionSignal {
    tx: broadcast::Sender<SessionEnded>,
    armed: Arc<AtomicBool>,
}

impl SessionSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEnded> {
        self.tx.subscribe()
    }

    /// A session now exists; the next `end` will fire.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Emit the signal if a session was active. Returns whether it fired.
    pub fn end(&self, reason: &str) -> bool {
        if !self.armed.swap(false, Ordering::SeqCst) {
            debug!(reason, "Session already ended");
            return false;
        }
        info!(reason, subscribers = self.tx.receiver_count(), "Session ended");
        // No subscribers is fine.
        let _ = self.tx.send(SessionEnded);
        true
    }
}

impl Default for SessionSignal {
    fn default() -> Self {
        Self::new()
    }
}
