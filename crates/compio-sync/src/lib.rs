//! Async synchronization primitives for bounding and joining concurrent work
//!
//! The primitives only use [`std::task::Waker`]s, so they work under
//! [compio](https://github.com/compio-rs/compio) as well as any other executor.
//!
//! # Primitives
//!
//! - [`Semaphore`] - Async semaphore for bounding concurrency, safe to cancel
//! - [`WaitGroup`] - Counter of outstanding work with an awaitable zero
//!
//! # Example
//!
//! ```rust,no_run
//! use compio_sync::{Semaphore, WaitGroup};
//!
//! #[compio::main]
//! async fn main() {
//!     let sem = Semaphore::new(100);
//!     let wg = WaitGroup::new();
//!
//!     // Spawn many tasks, but only 100 run concurrently
//!     let mut handles = Vec::new();
//!     for i in 0..1000 {
//!         let sem = sem.clone();
//!         let wg = wg.clone();
//!         wg.add(1);
//!         handles.push(compio::runtime::spawn(async move {
//!             let _permit = sem.acquire().await;
//!             println!("Task {}", i);
//!             wg.done();
//!         }));
//!     }
//!
//!     wg.wait().await;
//!     for handle in handles {
//!         let _ = handle.await;
//!     }
//! }
//! ```

mod semaphore;
mod wait_group;

pub use semaphore::{Acquire, Semaphore, SemaphorePermit};
pub use wait_group::{Wait, WaitGroup};
