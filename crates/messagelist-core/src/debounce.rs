use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio_util::sync::CancellationToken;

struct Pending<T> {
    id: u64,
    value: T,
    stop: CancellationToken,
}

struct DebounceState<T> {
    next_id: u64,
    pending: Option<Pending<T>>,
}

/// Trailing-edge debouncer.
///
/// Each [`Debouncer::schedule`] supersedes the previous pending value; only
/// the last value of a burst reaches its callback, `delay` after it was
/// scheduled. A pending value can also be taken out early to run it inline.
pub struct Debouncer<T> {
    delay: Duration,
    state: Arc<Mutex<DebounceState<T>>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Arc::new(Mutex::new(DebounceState {
                next_id: 0,
                pending: None,
            })),
        }
    }

    /// Schedule `value`; after the delay `on_fire(value)` runs on a spawned task
    /// unless the value was superseded, taken or cleared in the meantime.
    pub fn schedule<F, Fut>(&self, value: T, on_fire: F)
    where
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stop = CancellationToken::new();
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id = state.next_id.wrapping_add(1);
            if let Some(previous) = state.pending.replace(Pending {
                id,
                value,
                stop: stop.clone(),
            }) {
                previous.stop.cancel();
            }
            id
        };

        let delay = self.delay;
        let state = self.state.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let fired = {
                        let mut state = lock(&state);
                        match state.pending.take() {
                            Some(pending) if pending.id == id => Some(pending.value),
                            other => {
                                state.pending = other;
                                None
                            }
                        }
                    };
                    if let Some(value) = fired {
                        on_fire(value).await;
                    }
                }
            }
        });
    }

    /// Remove the pending value without running its callback.
    pub fn take_pending(&self) -> Option<T> {
        let pending = lock(&self.state).pending.take()?;
        pending.stop.cancel();
        Some(pending.value)
    }

    /// Drop the pending value, if any.
    pub fn clear(&self) {
        let _ = self.take_pending();
    }
}

fn lock<T>(state: &Mutex<DebounceState<T>>) -> MutexGuard<'_, DebounceState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
