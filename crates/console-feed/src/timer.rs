//! Cancellable one-shot timers.
//!
//! A [`TimerSlot`] holds at most one armed timer. Arming replaces (and
//! cancels) the previous one; [`TimerSlot::cancel`] aborts it synchronously.
//! Dropping the slot cancels whatever is armed.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::task::AbortHandle;

struct Armed {
    id: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct SlotState {
    armed: Mutex<Option<Armed>>,
    next_id: AtomicU64,
}

impl SlotState {
    /// Forget the armed timer if it is still `id`; it has fired and is no
    /// longer cancellable through the slot.
    fn disarm(&self, id: u64) {
        let mut armed = self.armed.lock();
        if armed.as_ref().is_some_and(|a| a.id == id) {
            *armed = None;
        }
    }
}

/// Owner of a single cancellable timer.
#[derive(Default)]
pub struct TimerSlot {
    state: Arc<SlotState>,
}

impl TimerSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing any timer already armed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::clone(&self.state);

        let mut armed = self.state.armed.lock();
        if let Some(previous) = armed.take() {
            previous.handle.abort();
        }

        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            state.disarm(id);
            task.await;
        });
        *armed = Some(Armed {
            id,
            handle: join.abort_handle(),
        });
    }

    /// Cancel the armed timer. Returns `true` if one was pending.
    pub fn cancel(&self) -> bool {
        match self.state.armed.lock().take() {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether a timer is armed and has not fired yet.
    pub fn is_armed(&self) -> bool {
        self.state.armed.lock().is_some()
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
