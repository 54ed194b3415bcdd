//! Authoritative session status with separate change notification.
//!
//! Guards read the cell synchronously; observers follow the `watch` channel.
//! Both are updated under the same lock so notifications never run ahead of
//! the value a guard would read.

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use super::base::SessionStatus;

#[derive(Debug)]
pub struct StatusCell {
    current: Mutex<SessionStatus>,
    notify: watch::Sender<SessionStatus>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCell {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(SessionStatus::Idle);
        Self {
            current: Mutex::new(SessionStatus::Idle),
            notify,
        }
    }

    pub fn get(&self) -> SessionStatus {
        *self.current.lock()
    }

    /// Store `next`. Returns `true` if the value changed.
    pub fn set(&self, next: SessionStatus) -> bool {
        let mut current = self.current.lock();
        if *current == next {
            return false;
        }
        debug!(from = %*current, to = %next, "Session status transition");
        *current = next;
        self.notify.send_replace(next);
        true
    }

    /// Atomically move to `Connecting` unless a session is already active.
    pub fn try_begin_connecting(&self) -> bool {
        let mut current = self.current.lock();
        if current.is_active() {
            return false;
        }
        debug!(from = %*current, "Session status transition to connecting");
        *current = SessionStatus::Connecting;
        self.notify.send_replace(SessionStatus::Connecting);
        true
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.notify.subscribe()
    }
}
