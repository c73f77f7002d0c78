//! Thread-blocking forms of the limiter's waiting operations
//!
//! These park the calling OS thread until the operation completes. They must
//! not be called from inside an async executor's worker thread, where they
//! would stall every task scheduled on it.

use std::future::Future;

use futures::executor::block_on;

use crate::error::Result;
use crate::limiter::{Admission, ConcurrencyLimiter};

impl ConcurrencyLimiter {
    /// Block the current thread until a slot is free, then take it
    pub fn acquire_blocking(&self) {
        block_on(self.acquire());
    }

    /// Block the current thread until a slot is free or `signal` completes
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::Cancelled`](crate::LimiterError::Cancelled) if
    /// `signal` completes before a slot is obtained.
    pub fn acquire_blocking_with_cancellation<F>(&self, signal: F) -> Result<()>
    where
        F: Future,
    {
        block_on(self.acquire_with_cancellation(signal))
    }

    /// Block the current thread until admitted, returning a guard that
    /// releases on drop
    pub fn admit_blocking(&self) -> Admission {
        block_on(self.admit())
    }

    /// Block the current thread until nothing is outstanding
    pub fn wait_all_blocking(&self) {
        block_on(self.wait_all());
    }
}
