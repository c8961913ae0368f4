//! Bounds the number of resolvers running at once.
//!
//! A resolver holds a permit while it runs. While it is suspended on a data
//! loader batch the permit is handed back, so fields still waiting for a
//! permit can queue their keys into the same dispatch round.

use crate::batch::lock;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

tokio::task_local! {
    static FIELD_SLOT: Arc<FieldSlot>;
}

/// The per-request resolver limit.
#[derive(Debug)]
pub(crate) struct FieldLimiter {
    semaphore: Arc<Semaphore>,
}

impl FieldLimiter {
    /// Creates a limiter. A limit of zero admits one resolver at a time.
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Runs `future` while holding a permit.
    pub(crate) async fn run<F: Future>(&self, future: F) -> F::Output {
        let slot = Arc::new(FieldSlot {
            semaphore: Arc::clone(&self.semaphore),
            state: Mutex::new(SlotState::default()),
        });
        slot.acquire().await;
        FIELD_SLOT.scope(slot, future).await
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[derive(Default)]
struct SlotState {
    permit: Option<OwnedSemaphorePermit>,
    suspended: usize,
}

struct FieldSlot {
    semaphore: Arc<Semaphore>,
    state: Mutex<SlotState>,
}

impl FieldSlot {
    async fn acquire(&self) {
        // The semaphore is never closed.
        if let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await {
            lock(&self.state).permit = Some(permit);
        }
    }

    fn suspend(&self) {
        let mut state = lock(&self.state);
        state.suspended += 1;
        if state.suspended == 1 {
            state.permit = None;
        }
    }

    // True when the last suspension ended and the permit must be reacquired.
    fn wake(&self) -> bool {
        let mut state = lock(&self.state);
        state.suspended = state.suspended.saturating_sub(1);
        state.suspended == 0 && state.permit.is_none()
    }
}

/// Runs `future` with the current resolver's permit handed back.
///
/// Outside of a limited resolver this is the plain future.
pub(crate) async fn released<F: Future>(future: F) -> F::Output {
    let Ok(slot) = FIELD_SLOT.try_with(Arc::clone) else {
        return future.await;
    };
    slot.suspend();
    let output = future.await;
    if slot.wake() {
        slot.acquire().await;
    }
    output
}
