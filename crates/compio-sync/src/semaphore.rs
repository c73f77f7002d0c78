//! Async counting semaphore whose acquisitions are safe to abandon
//!
//! A pending [`Acquire`] future may be dropped at any point (for example when
//! it loses a race against a deadline). Dropping it removes its entry from the
//! waiter queue, and if a release had already picked it to be woken, the wakeup
//! is handed to the next waiter so no permit sits idle while tasks wait.
//!
//! # Example
//!
//! ```rust,no_run
//! use compio_sync::Semaphore;
//!
//! # async fn example() {
//! let semaphore = Semaphore::new(8);
//!
//! let permit = semaphore.acquire().await;
//! // ... bounded work ...
//! drop(permit);
//! # }
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

/// An executor-agnostic async semaphore for bounding concurrency
///
/// # Design
///
/// - **Lock-free fast path**: permits are taken and returned with atomic compare-and-swap
/// - **FIFO wakeups**: blocked tasks are woken front-first; a task that is not
///   queued may still take a freed permit first
/// - **Cancel-safe**: dropping a pending [`Acquire`] never strands a wakeup
/// - **Bounded release**: [`Semaphore::release`] refuses to push the pool past its maximum
#[derive(Clone)]
pub struct Semaphore {
    /// Shared state between all clones of this semaphore
    inner: Arc<SemaphoreInner>,
}

/// Permit counter and waiter queue shared by all clones
struct SemaphoreInner {
    /// Available permits
    permits: AtomicUsize,
    /// Total permits the semaphore was created with
    max_permits: usize,
    /// Tasks waiting for a permit, keyed by waiter id
    waiters: Mutex<WaiterQueue>,
}

/// Waiters keyed by a monotonically increasing id, so key order is arrival order
#[derive(Default)]
struct WaiterQueue {
    /// Id handed to the next new waiter
    next_id: u64,
    /// Waiting tasks, oldest first
    queue: BTreeMap<u64, Waker>,
}

impl WaiterQueue {
    /// Remove a waiter, returning whether it was still queued
    fn remove(&mut self, id: u64) -> bool {
        self.queue.remove(&id).is_some()
    }
}

impl Semaphore {
    /// Create a new semaphore with the given number of permits
    ///
    /// # Panics
    ///
    /// Panics if `permits` is 0 (semaphore must have at least one permit)
    ///
    /// # Example
    ///
    /// ```rust
    /// use compio_sync::Semaphore;
    ///
    /// let sem = Semaphore::new(1024);
    /// assert_eq!(sem.available_permits(), 1024);
    /// ```
    #[must_use]
    pub fn new(permits: usize) -> Self {
        assert!(permits > 0, "Semaphore must have at least one permit");
        Self {
            inner: Arc::new(SemaphoreInner {
                permits: AtomicUsize::new(permits),
                max_permits: permits,
                waiters: Mutex::new(WaiterQueue::default()),
            }),
        }
    }

    /// Acquire a permit, waiting asynchronously if none are available
    ///
    /// The returned future resolves to a [`SemaphorePermit`]. It may be dropped
    /// before completion without leaking a permit or a wakeup.
    pub fn acquire(&self) -> Acquire {
        Acquire {
            semaphore: self.clone(),
            waiter: None,
        }
    }

    /// Try to acquire a permit without waiting
    ///
    /// ```rust
    /// use compio_sync::Semaphore;
    ///
    /// let sem = Semaphore::new(1);
    /// let first = sem.try_acquire();
    /// assert!(first.is_some());
    /// assert!(sem.try_acquire().is_none());
    /// ```
    #[must_use]
    pub fn try_acquire(&self) -> Option<SemaphorePermit> {
        let mut current = self.inner.permits.load(Ordering::Acquire);

        loop {
            if current == 0 {
                return None;
            }

            match self.inner.permits.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(SemaphorePermit {
                        semaphore: self.clone(),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Number of permits currently available
    ///
    /// Useful for monitoring; the value may change immediately after reading.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.inner.permits.load(Ordering::Acquire)
    }

    /// Maximum number of permits (configured limit)
    #[must_use]
    pub fn max_permits(&self) -> usize {
        self.inner.max_permits
    }

    /// Number of permits currently held (max - available)
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner
            .max_permits
            .saturating_sub(self.available_permits())
    }

    /// Return one permit to the pool and wake the front waiter
    ///
    /// This is the counterpart of [`SemaphorePermit::forget`]. Returns `false`
    /// without changing anything if the pool is already full, i.e. there was no
    /// outstanding permit to return.
    pub fn release(&self) -> bool {
        let mut current = self.inner.permits.load(Ordering::Acquire);

        loop {
            if current >= self.inner.max_permits {
                return false;
            }

            match self.inner.permits.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.wake_next();
        true
    }

    /// Pop the front waiter and wake it outside the lock
    fn wake_next(&self) {
        let next = self.waiters().queue.pop_first();
        if let Some((_, waker)) = next {
            waker.wake();
        }
    }

    /// Lock the waiter queue
    fn waiters(&self) -> MutexGuard<'_, WaiterQueue> {
        // Wakers stay valid even if a holder panicked.
        self.inner
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("available_permits", &self.available_permits())
            .field("max_permits", &self.inner.max_permits)
            .finish()
    }
}

/// RAII guard that releases a semaphore permit on drop
#[must_use = "dropping a permit releases it immediately"]
pub struct SemaphorePermit {
    /// Semaphore that issued this permit
    semaphore: Semaphore,
}

impl SemaphorePermit {
    /// Keep the permit taken without releasing it on drop
    ///
    /// The caller becomes responsible for a later [`Semaphore::release`].
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// Future returned by [`Semaphore::acquire`]
///
/// Polling it:
/// 1. tries the lock-free fast path
/// 2. registers (or refreshes) its waker in the queue
/// 3. retries once so a release racing with registration is not missed
#[must_use = "futures do nothing unless polled"]
pub struct Acquire {
    /// Semaphore to acquire from
    semaphore: Semaphore,
    /// Id of this future's queue entry, once it has registered
    waiter: Option<u64>,
}

impl Acquire {
    /// Queue this future, or refresh its waker if already queued
    fn register(&mut self, waker: &Waker) {
        let mut waiters = self.semaphore.waiters();

        if let Some(id) = self.waiter {
            match waiters.queue.get_mut(&id) {
                Some(entry) => {
                    if !entry.will_wake(waker) {
                        *entry = waker.clone();
                    }
                }
                // Woken but beaten to the permit: requeue under the original id,
                // which keeps our place ahead of later arrivals.
                None => {
                    waiters.queue.insert(id, waker.clone());
                }
            }
            return;
        }

        let id = waiters.next_id;
        waiters.next_id += 1;
        waiters.queue.insert(id, waker.clone());
        self.waiter = Some(id);
    }

    /// Drop our queue entry after obtaining a permit
    fn deregister(&mut self) {
        if let Some(id) = self.waiter.take() {
            self.semaphore.waiters().remove(id);
        }
    }
}

impl Future for Acquire {
    type Output = SemaphorePermit;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(permit) = this.semaphore.try_acquire() {
            this.deregister();
            return Poll::Ready(permit);
        }

        this.register(cx.waker());

        if let Some(permit) = this.semaphore.try_acquire() {
            this.deregister();
            return Poll::Ready(permit);
        }

        Poll::Pending
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        let Some(id) = self.waiter.take() else {
            return;
        };

        let still_queued = self.semaphore.waiters().remove(id);
        if !still_queued && self.semaphore.available_permits() > 0 {
            // A release already chose us; pass the wakeup along.
            self.semaphore.wake_next();
        }
    }
}
