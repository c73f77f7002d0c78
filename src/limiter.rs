//! Bounded concurrency limiter with cancellable admission and wait-for-all
//!
//! [`ConcurrencyLimiter`] pairs a [`Semaphore`] (the slot pool) with a
//! [`WaitGroup`] (the outstanding count). Each successful acquisition takes a
//! slot and counts as outstanding until the matching [`ConcurrencyLimiter::release`].

use std::future::Future;
use std::sync::Arc;

use compio_sync::{Semaphore, SemaphorePermit, WaitGroup};
use futures::future::{self, Either};
use futures::pin_mut;
use tracing::{debug, trace, warn};

use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};

/// Caps how many units of work run at once and tracks when they all finish
///
/// Clones share the same slots and outstanding count.
///
/// # Example
///
/// ```rust,no_run
/// use inflight::ConcurrencyLimiter;
///
/// # async fn example() {
/// let limiter = ConcurrencyLimiter::new(4);
///
/// let mut handles = Vec::new();
/// for _ in 0..16 {
///     limiter.acquire().await;
///     let limiter = limiter.clone();
///     handles.push(compio::runtime::spawn(async move {
///         // ... at most four of these run at a time ...
///         limiter.release();
///     }));
/// }
///
/// limiter.wait_all().await;
/// # drop(handles);
/// # }
/// ```
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    /// Slot pool; a held permit is an occupied slot
    slots: Semaphore,
    /// Admitted units of work not yet released
    outstanding: WaitGroup,
    /// Diagnostic label
    name: Option<Arc<str>>,
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting at most `capacity` units of work
    ///
    /// A `capacity` of zero or less yields an unbounded limiter
    /// ([`UNBOUNDED`](crate::UNBOUNDED) slots), never a zero-slot one.
    #[must_use]
    pub fn new(capacity: i32) -> Self {
        Self::with_config(LimiterConfig::new().with_capacity(capacity))
    }

    /// Create a limiter from a full [`LimiterConfig`]
    ///
    /// The capacity is resolved with [`LimiterConfig::effective_capacity`].
    #[must_use]
    pub fn with_config(config: LimiterConfig) -> Self {
        let capacity = config.effective_capacity();
        debug!(
            limiter = config.name.as_deref().unwrap_or("-"),
            capacity, "created concurrency limiter"
        );
        Self {
            slots: Semaphore::new(capacity),
            outstanding: WaitGroup::new(),
            name: config.name.map(Arc::from),
        }
    }

    /// Wait for a free slot and take it
    ///
    /// Never fails. Must be paired with exactly one later [`release`](Self::release).
    pub async fn acquire(&self) {
        let permit = match self.slots.try_acquire() {
            Some(permit) => permit,
            None => {
                debug!(limiter = self.label(), "no free slot, waiting");
                self.slots.acquire().await
            }
        };
        self.admit_permit(permit);
    }

    /// Wait for a free slot unless `signal` completes first
    ///
    /// `signal` counts as triggered once it completes; its output is ignored.
    /// The signal is polled before the slot pool, so a signal that has already
    /// fired wins even when slots are free. On `Err` nothing was taken and
    /// [`release`](Self::release) must not be called.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::Cancelled`] if `signal` completes before a slot
    /// is obtained.
    pub async fn acquire_with_cancellation<F>(&self, signal: F) -> Result<()>
    where
        F: Future,
    {
        pin_mut!(signal);

        match future::select(signal, self.slots.acquire()).await {
            Either::Left((_, pending)) => {
                drop(pending);
                debug!(
                    limiter = self.label(),
                    occupied = self.occupied(),
                    "acquisition cancelled"
                );
                Err(LimiterError::Cancelled)
            }
            Either::Right((permit, _)) => {
                self.admit_permit(permit);
                Ok(())
            }
        }
    }

    /// Take a slot only if one is free right now
    ///
    /// Returns `true` on admission, which must then be released.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        match self.slots.try_acquire() {
            Some(permit) => {
                self.admit_permit(permit);
                true
            }
            None => false,
        }
    }

    /// Like [`acquire`](Self::acquire), returning a guard that releases on drop
    pub async fn admit(&self) -> Admission {
        self.acquire().await;
        Admission::new(self.clone())
    }

    /// Like [`acquire_with_cancellation`](Self::acquire_with_cancellation),
    /// returning a guard that releases on drop
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::Cancelled`] if `signal` completes first.
    pub async fn admit_with_cancellation<F>(&self, signal: F) -> Result<Admission>
    where
        F: Future,
    {
        self.acquire_with_cancellation(signal).await?;
        Ok(Admission::new(self.clone()))
    }

    /// Give back one slot and mark one unit of work finished
    ///
    /// Wakes at most one pending acquirer, and every [`wait_all`](Self::wait_all)
    /// caller if nothing is left outstanding. Never blocks. A release without a
    /// matching acquisition is ignored and logged.
    pub fn release(&self) {
        if !self.slots.release() {
            warn!(
                limiter = self.label(),
                "release without a matching acquisition ignored"
            );
            return;
        }

        if !self.outstanding.done() {
            warn!(
                limiter = self.label(),
                "outstanding count already zero on release"
            );
        }

        trace!(
            limiter = self.label(),
            occupied = self.occupied(),
            "slot released"
        );
    }

    /// Wait until every admitted unit of work has been released
    ///
    /// Returns immediately if nothing is outstanding. Admissions made while
    /// waiting are waited for too.
    pub async fn wait_all(&self) {
        if self.outstanding.count() > 0 {
            trace!(
                limiter = self.label(),
                outstanding = self.outstanding(),
                "waiting for outstanding work"
            );
        }
        self.outstanding.wait().await;
    }

    /// Maximum number of concurrently admitted units of work
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.max_permits()
    }

    /// Whether the limiter was built without a cap
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.capacity() == crate::UNBOUNDED
    }

    /// Slots currently held
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.slots.in_use()
    }

    /// Slots currently free
    #[must_use]
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Admitted units of work not yet released
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.count()
    }

    /// Label given in [`LimiterConfig::with_name`], if any
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for log events, `-` when unnamed
    fn label(&self) -> &str {
        self.name().unwrap_or("-")
    }

    /// Turn a freshly taken permit into a counted admission
    fn admit_permit(&self, permit: SemaphorePermit) {
        // The slot is now returned by `release`, not by the permit.
        permit.forget();
        self.outstanding.add(1);
        trace!(
            limiter = self.label(),
            occupied = self.occupied(),
            capacity = self.capacity(),
            "slot acquired"
        );
    }
}

impl std::fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("occupied", &self.occupied())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// An admitted unit of work; releases its slot when dropped
#[must_use = "dropping an Admission releases its slot immediately"]
#[derive(Debug)]
pub struct Admission {
    /// Limiter the slot is returned to
    limiter: ConcurrencyLimiter,
    /// Cleared by [`Admission::forget`]
    armed: bool,
}

impl Admission {
    /// Guard for a slot that has already been admitted
    fn new(limiter: ConcurrencyLimiter) -> Self {
        Self {
            limiter,
            armed: true,
        }
    }

    /// The limiter this admission belongs to
    #[must_use]
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Keep the slot without releasing it on drop
    ///
    /// The caller must call [`ConcurrencyLimiter::release`] later.
    pub fn forget(mut self) {
        self.armed = false;
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if self.armed {
            self.limiter.release();
        }
    }
}
