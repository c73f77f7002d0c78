//! Limiter configuration
//!
//! Capacity is given as a signed value: any value `<= 0` selects the
//! unbounded sentinel [`UNBOUNDED`] rather than zero slots.

/// Capacity used when the configured capacity is zero or negative
pub const UNBOUNDED: usize = i32::MAX as usize;

/// Construction parameters for a [`ConcurrencyLimiter`](crate::ConcurrencyLimiter)
///
/// # Example
///
/// ```rust
/// use inflight::{LimiterConfig, UNBOUNDED};
///
/// let config = LimiterConfig::new().with_capacity(16).with_name("uploads");
/// assert_eq!(config.effective_capacity(), 16);
///
/// assert_eq!(LimiterConfig::default().effective_capacity(), UNBOUNDED);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Requested maximum concurrency (`<= 0` = unbounded)
    pub capacity: i32,

    /// Label attached to log events
    pub name: Option<String>,
}

impl LimiterConfig {
    /// Unbounded, unnamed configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requested capacity (`<= 0` = unbounded)
    #[must_use]
    pub fn with_capacity(mut self, capacity: i32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Remove the concurrency cap
    #[must_use]
    pub fn unbounded(mut self) -> Self {
        self.capacity = 0;
        self
    }

    /// Label log events from this limiter with `name`
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Number of slots the limiter will actually have
    #[must_use]
    pub fn effective_capacity(&self) -> usize {
        usize::try_from(self.capacity)
            .ok()
            .filter(|&capacity| capacity > 0)
            .unwrap_or(UNBOUNDED)
    }
}
