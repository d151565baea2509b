//! Resizable, cancellable concurrency limiter used by the bridge to gate how
//! many external workers a team may run at once. Unlike `tokio::sync::Semaphore`
//! the limit can change while permits are outstanding, and zero means
//! unlimited rather than zero-capacity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct State {
    limit: i64,
    acquired: i64,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

impl Inner {
    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.limit <= 0 || state.acquired < state.limit {
            state.acquired += 1;
            true
        } else {
            false
        }
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        if state.acquired > 0 {
            state.acquired -= 1;
        }
        drop(state);
        self.notify.notify_one();
    }
}

/// A limiter whose ceiling can be raised or lowered at runtime and whose
/// waiters can be woken by either a released slot or a cancelled context.
/// A limit of `0` (or negative) means unbounded.
#[derive(Clone)]
pub struct DynamicSemaphore {
    inner: Arc<Inner>,
}

/// Error returned from `acquire` when the caller's `CancellationToken` fires
/// before a slot becomes available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "acquire cancelled before a slot became available")
    }
}

impl std::error::Error for Cancelled {}

impl DynamicSemaphore {
    pub fn new(initial_limit: i64) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    limit: initial_limit.max(0),
                    acquired: 0,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn limit(&self) -> i64 {
        self.inner.state.lock().unwrap().limit
    }

    pub fn acquired(&self) -> i64 {
        self.inner.state.lock().unwrap().acquired
    }

    /// Changes the ceiling and wakes every waiter so it can re-check against
    /// the new value. Raising the limit lets blocked waiters through;
    /// lowering it never pre-empts permits already granted.
    pub fn set_limit(&self, new_limit: i64) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.limit = new_limit.max(0);
        }
        self.inner.notify.notify_waiters();
    }

    /// Blocks until a slot is available or `cancel` fires, whichever comes
    /// first. On success the returned permit releases its slot on drop, so
    /// a task that exits early (panic, early return, cancellation) cannot
    /// leak the slot.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<SemaphorePermit, Cancelled> {
        loop {
            // Register interest before testing the condition: `Notify` only
            // guarantees delivery to waiters that already exist at the time
            // of `notify_waiters`, so the future must be created first and
            // the condition checked second, not the other way around.
            let notified = self.inner.notify.notified();
            if self.inner.try_acquire() {
                return Ok(SemaphorePermit {
                    inner: self.inner.clone(),
                    released: AtomicBool::new(false),
                });
            }
            tokio::select! {
                _ = notified => continue,
                _ = cancel.cancelled() => return Err(Cancelled),
            }
        }
    }
}

/// An acquired slot. Call `release` to free it early, or simply drop it.
pub struct SemaphorePermit {
    inner: Arc<Inner>,
    released: AtomicBool,
}

impl SemaphorePermit {
    pub fn release(self) {
        self.released.store(true, Ordering::SeqCst);
        self.inner.release();
    }
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.inner.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn zero_limit_never_blocks() {
        let sem = DynamicSemaphore::new(0);
        let cancel = CancellationToken::new();
        let _a = sem.acquire(&cancel).await.unwrap();
        let _b = sem.acquire(&cancel).await.unwrap();
        assert_eq!(sem.acquired(), 2);
    }

    #[tokio::test]
    async fn second_acquire_blocks_until_first_releases() {
        let sem = DynamicSemaphore::new(1);
        let cancel = CancellationToken::new();
        let permit = sem.acquire(&cancel).await.unwrap();
        assert_eq!(sem.acquired(), 1);

        let sem2 = sem.clone();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { sem2.acquire(&cancel2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        permit.release();
        let second = handle.await.unwrap().unwrap();
        assert_eq!(sem.acquired(), 1);
        drop(second);
        assert_eq!(sem.acquired(), 0);
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_waiter_without_granting_a_slot() {
        let sem = DynamicSemaphore::new(1);
        let cancel = CancellationToken::new();
        let _held = sem.acquire(&cancel).await.unwrap();

        let sem2 = sem.clone();
        let waiter_cancel = CancellationToken::new();
        let waiter_cancel2 = waiter_cancel.clone();
        let handle = tokio::spawn(async move { sem2.acquire(&waiter_cancel2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter_cancel.cancel();
        let result = handle.await.unwrap();
        assert_eq!(result.unwrap_err(), Cancelled);
    }

    #[tokio::test]
    async fn raising_the_limit_wakes_a_blocked_waiter() {
        let sem = DynamicSemaphore::new(1);
        let cancel = CancellationToken::new();
        let _held = sem.acquire(&cancel).await.unwrap();

        let sem2 = sem.clone();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { sem2.acquire(&cancel2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        sem.set_limit(2);
        let second = handle.await.unwrap().unwrap();
        assert_eq!(sem.acquired(), 2);
        drop(second);
    }
}
