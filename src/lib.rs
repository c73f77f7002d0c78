//! inflight: bounded concurrency limiting with cancellable admission
//!
//! A [`ConcurrencyLimiter`] caps how many units of work may run at the same
//! time, lets a caller give up on a pending admission through any
//! cancellation future (a deadline timer, a oneshot, a shutdown notice), and
//! lets a caller wait until all admitted work has been released.
//!
//! The limiter spawns nothing and does not depend on a particular executor;
//! [`blocking`] variants are provided for plain threads.
//!
//! ```rust
//! use inflight::{ConcurrencyLimiter, LimiterError};
//! use std::future::ready;
//!
//! let limiter = ConcurrencyLimiter::new(2);
//! limiter.acquire_blocking();
//! limiter.acquire_blocking();
//! assert_eq!(limiter.occupied(), 2);
//!
//! // A signal that has already fired cancels without taking a slot.
//! let result = limiter.acquire_blocking_with_cancellation(ready(()));
//! assert_eq!(result, Err(LimiterError::Cancelled));
//!
//! limiter.release();
//! limiter.release();
//! limiter.wait_all_blocking();
//! ```

pub mod blocking;
pub mod config;
pub mod error;
pub mod limiter;

// Re-export commonly used types
pub use config::{LimiterConfig, UNBOUNDED};
pub use error::{LimiterError, Result};
pub use limiter::{Admission, ConcurrencyLimiter};
