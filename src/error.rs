//! Error handling and types

use thiserror::Error;

/// Errors reported by the limiter
///
/// Only the cancellable acquisition paths can fail. A caller that receives an
/// error holds no slot and must not call `release`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterError {
    /// The cancellation signal fired before a slot was obtained
    #[error("acquisition cancelled before a slot became available")]
    Cancelled,
}

/// Result type for limiter operations
pub type Result<T> = std::result::Result<T, LimiterError>;
