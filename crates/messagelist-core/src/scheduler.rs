//! Named scroll lock plus a FIFO effect queue.
//!
//! Every store mutation runs through [`ScrollScheduler`], so no two effects
//! interleave at their suspension points. Effects that move the viewport also
//! take the scroll lock; it stays held after the effect returns `true` until
//! the renderer has applied the new scroll position and calls
//! [`ScrollScheduler::unlock`].

use std::future::Future;

use tokio::sync::{Mutex, watch};
use tracing::{debug, trace, warn};

use crate::error::CoreError;

/// Locks known to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockName {
    /// Held while a programmatic scroll is in flight.
    Scroll,
}

impl LockName {
    fn as_str(self) -> &'static str {
        match self {
            Self::Scroll => "scroll",
        }
    }
}

#[derive(Debug)]
pub struct ScrollScheduler {
    queue: Mutex<()>,
    scroll: watch::Sender<bool>,
}

impl Default for ScrollScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrollScheduler {
    pub fn new() -> Self {
        let (scroll, _) = watch::channel(false);
        Self {
            queue: Mutex::new(()),
            scroll,
        }
    }

    pub fn is_locked(&self, lock: LockName) -> bool {
        *self.flag(lock).borrow()
    }

    /// Release `lock`, letting the next queued locked effect run.
    pub fn unlock(&self, lock: LockName) {
        if self.flag(lock).send_replace(false) {
            trace!(lock = lock.as_str(), "lock released");
        }
    }

    /// Run `effect` after every previously queued effect has finished.
    ///
    /// Errors are logged and reported as `None`; the queue always advances.
    pub async fn queued<T, F>(&self, name: &'static str, effect: F) -> Option<T>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        let _turn = self.queue.lock().await;
        trace!(effect = name, "queued effect started");
        match effect.await {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(effect = name, error = %err, "queued effect failed");
                None
            }
        }
    }

    /// Run `effect` in queue order once `lock` is free, holding `lock` while it runs.
    ///
    /// `Ok(true)` keeps the lock until [`Self::unlock`]; `Ok(false)`, an error
    /// or dropping the returned future releases it.
    pub async fn locked_queued<F>(&self, lock: LockName, name: &'static str, effect: F) -> bool
    where
        F: Future<Output = Result<bool, CoreError>>,
    {
        let _turn = self.queue.lock().await;
        let mut unlocked = self.flag(lock).subscribe();
        let _ = unlocked.wait_for(|locked| !*locked).await;
        self.run_locked(lock, name, effect).await
    }

    /// Like [`Self::locked_queued`], but the effect is dropped when `lock` is
    /// still held once its turn comes.
    pub async fn locked_or_drop<F>(&self, lock: LockName, name: &'static str, effect: F) -> bool
    where
        F: Future<Output = Result<bool, CoreError>>,
    {
        let _turn = self.queue.lock().await;
        if self.is_locked(lock) {
            debug!(effect = name, lock = lock.as_str(), "lock held, dropping effect");
            return false;
        }
        self.run_locked(lock, name, effect).await
    }

    /// Wait until every effect queued so far has finished.
    pub async fn settled(&self) {
        let _turn = self.queue.lock().await;
    }

    async fn run_locked<F>(&self, lock: LockName, name: &'static str, effect: F) -> bool
    where
        F: Future<Output = Result<bool, CoreError>>,
    {
        let mut held = HeldLock::acquire(self.flag(lock));
        trace!(effect = name, lock = lock.as_str(), "locked effect started");
        match effect.await {
            Ok(true) => {
                held.keep();
                true
            }
            Ok(false) => false,
            Err(err) => {
                warn!(effect = name, error = %err, "locked effect failed");
                false
            }
        }
    }

    fn flag(&self, lock: LockName) -> &watch::Sender<bool> {
        match lock {
            LockName::Scroll => &self.scroll,
        }
    }
}

/// Releases the lock on drop unless [`HeldLock::keep`] was called.
struct HeldLock<'a> {
    flag: &'a watch::Sender<bool>,
    armed: bool,
}

impl<'a> HeldLock<'a> {
    fn acquire(flag: &'a watch::Sender<bool>) -> Self {
        flag.send_replace(true);
        Self { flag, armed: true }
    }

    fn keep(&mut self) {
        self.armed = false;
    }
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.flag.send_replace(false);
        }
    }
}
