//! Async wait group for joining a dynamic set of in-flight operations
//!
//! [`WaitGroup::add`] registers work, [`WaitGroup::done`] completes it, and
//! [`WaitGroup::wait`] resolves once the counter reaches zero. Waiters observe
//! every zero-crossing: if the counter drops to zero and is raised again before
//! a waiter gets polled, that waiter still completes.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

/// Counter of outstanding operations with an awaitable zero
#[derive(Clone, Default)]
pub struct WaitGroup {
    /// Shared state between all clones
    inner: Arc<WaitGroupInner>,
}

/// Counter and waiter list shared by all clones
#[derive(Default)]
struct WaitGroupInner {
    /// Outstanding operations
    count: AtomicUsize,
    /// Tasks waiting for zero
    waiters: Mutex<WaitList>,
}

/// Waiters for the next zero-crossing
#[derive(Default)]
struct WaitList {
    /// Bumped under the lock every time the count reaches zero
    generation: u64,
    /// Id handed to the next new waiter
    next_id: u64,
    /// Registered waiters by id
    wakers: Vec<(u64, Waker)>,
}

impl WaitGroup {
    /// Create an empty wait group
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `n` more outstanding operations
    pub fn add(&self, n: usize) {
        self.inner.count.fetch_add(n, Ordering::AcqRel);
    }

    /// Mark one operation as finished
    ///
    /// Wakes every waiter when the count reaches zero. Returns `false` and
    /// leaves the count untouched if nothing was outstanding.
    pub fn done(&self) -> bool {
        let mut current = self.inner.count.load(Ordering::Acquire);

        loop {
            match current {
                0 => return false,
                1 => return self.done_last(),
                _ => {}
            }

            match self.inner.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Decrement under the waiter lock so a zero-crossing and its generation
    /// bump are one step as seen by [`Wait`]
    fn done_last(&self) -> bool {
        let wakers = {
            let mut list = self.list();
            let mut current = self.inner.count.load(Ordering::Acquire);

            loop {
                if current == 0 {
                    return false;
                }

                match self.inner.count.compare_exchange_weak(
                    current,
                    current - 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(actual) => current = actual,
                }
            }

            if current != 1 {
                // Raised again before we got the lock.
                return true;
            }

            list.generation = list.generation.wrapping_add(1);
            std::mem::take(&mut list.wakers)
        };

        for (_, waker) in wakers {
            waker.wake();
        }
        true
    }

    /// Number of outstanding operations
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Wait until the count reaches zero
    pub fn wait(&self) -> Wait {
        Wait {
            group: self.clone(),
            registration: None,
        }
    }

    /// Lock the waiter list
    fn list(&self) -> MutexGuard<'_, WaitList> {
        self.inner
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitGroup")
            .field("count", &self.count())
            .finish()
    }
}

/// Where a [`Wait`] sits in the waiter list
#[derive(Clone, Copy)]
struct Registration {
    /// Entry id in [`WaitList::wakers`]
    id: u64,
    /// Generation current when the entry was added
    generation: u64,
}

/// Future returned by [`WaitGroup::wait`]
#[must_use = "futures do nothing unless polled"]
pub struct Wait {
    /// Group being waited on
    group: WaitGroup,
    /// Set once this future has registered a waker
    registration: Option<Registration>,
}

impl Future for Wait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        if this.registration.is_none() && this.group.count() == 0 {
            return Poll::Ready(());
        }

        let mut list = this.group.list();

        if let Some(registration) = this.registration {
            if list.generation != registration.generation {
                // Drained by the zero-crossing that woke us.
                this.registration = None;
                return Poll::Ready(());
            }
        }

        if this.group.count() == 0 {
            if let Some(registration) = this.registration.take() {
                list.wakers.retain(|(id, _)| *id != registration.id);
            }
            return Poll::Ready(());
        }

        match this.registration {
            Some(registration) => {
                if let Some(entry) = list
                    .wakers
                    .iter_mut()
                    .find(|(id, _)| *id == registration.id)
                {
                    if !entry.1.will_wake(cx.waker()) {
                        entry.1 = cx.waker().clone();
                    }
                }
            }
            None => {
                let id = list.next_id;
                list.next_id = list.next_id.wrapping_add(1);
                list.wakers.push((id, cx.waker().clone()));
                this.registration = Some(Registration {
                    id,
                    generation: list.generation,
                });
            }
        }

        Poll::Pending
    }
}

impl Drop for Wait {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.group
                .list()
                .wakers
                .retain(|(id, _)| *id != registration.id);
        }
    }
}
