//! Per-attempt session context.
//!
//! A [`SessionContext`] is created on every `start` and carries the callbacks
//! and options of that attempt only. Transports never hold host callbacks
//! outside of a context, so events from a torn-down attempt cannot reach the
//! handlers of a newer one.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::base::{SessionCallbacks, SessionError, SessionOptions};

pub struct SessionContext {
    generation: u64,
    callbacks: SessionCallbacks,
    options: SessionOptions,
    connected: AtomicBool,
    disconnected: AtomicBool,
    errored: AtomicBool,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("generation", &self.generation)
            .field("options", &self.options)
            .finish()
    }
}

impl SessionContext {
    pub fn new(generation: u64, callbacks: SessionCallbacks, options: SessionOptions) -> Self {
        Self {
            generation,
            callbacks,
            options,
            connected: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            errored: AtomicBool::new(false),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn callbacks(&self) -> &SessionCallbacks {
        &self.callbacks
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Fire `on_connect` at most once for this attempt.
    pub async fn notify_connect(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.callbacks.emit_connect().await;
        }
    }

    /// Fire `on_disconnect` at most once for this attempt.
    pub async fn notify_disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            self.callbacks.emit_disconnect().await;
        }
    }

    /// Fire `on_error` at most once for this attempt.
    pub async fn notify_error(&self, error: SessionError) {
        if !self.errored.swap(true, Ordering::SeqCst) {
            self.callbacks.emit_error(error).await;
        }
    }
}

/// Holder of the active context plus a generation counter.
///
/// Every `begin` and `end` bumps the generation, which invalidates any task
/// or handler still tagged with an older one.
#[derive(Debug, Default)]
pub struct ContextSlot {
    generation: AtomicU64,
    active: Mutex<Option<Arc<SessionContext>>>,
}

impl ContextSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh context, replacing any previous one.
    pub fn begin(&self, callbacks: SessionCallbacks, options: SessionOptions) -> Arc<SessionContext> {
        let mut active = self.active.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ctx = Arc::new(SessionContext::new(generation, callbacks, options));
        *active = Some(ctx.clone());
        ctx
    }

    /// Invalidate the current generation and take its context.
    pub fn end(&self) -> Option<Arc<SessionContext>> {
        let mut active = self.active.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        active.take()
    }

    /// Like [`end`](Self::end), but only if `generation` is still current.
    /// Exactly one caller wins for a given generation.
    pub fn end_if_current(&self, generation: u64) -> Option<Arc<SessionContext>> {
        let mut active = self.active.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            return None;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        active.take()
    }

    /// Context for `generation`, if it is still the live one.
    pub fn current_for(&self, generation: u64) -> Option<Arc<SessionContext>> {
        let active = self.active.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            return None;
        }
        active.clone()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}
