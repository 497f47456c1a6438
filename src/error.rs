//! Error types for gates and the execution wrapper
use std::fmt;
use std::time::Duration;

/// Rejected gate configuration. Raised synchronously by constructors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Admission count must be > 0.
    #[error("count must be > 0 (got {provided})")]
    InvalidCount {
        /// Value provided by caller.
        provided: usize,
    },
    /// Window must be at least one clock tick (1ms).
    #[error("window must be at least 1ms (got {0:?})")]
    InvalidWindow(Duration),
    /// Composition needs at least one gate.
    #[error("cannot compose an empty set of gates")]
    EmptyComposition,
}

/// The cancellation signal fired before or during acquisition.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[error("cancelled while waiting for the gate")]
pub struct Cancelled;

/// Outcome of running work through a [`TimeLimiter`](crate::TimeLimiter).
///
/// `Cancelled` means the work never ran. `Work` carries the operation's own error unaltered,
/// after the gate slot has been released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitError<E> {
    /// Acquisition was cancelled; the work was not invoked.
    Cancelled,
    /// The work ran and failed.
    Work(E),
}

impl<E: fmt::Display> fmt::Display for LimitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "{}", Cancelled),
            Self::Work(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for LimitError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Work(e) => Some(e),
            Self::Cancelled => None,
        }
    }
}

impl<E> From<Cancelled> for LimitError<E> {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl<E> LimitError<E> {
    /// Check if acquisition was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
    /// Check if this error came from the work itself.
    pub fn is_work(&self) -> bool {
        matches!(self, Self::Work(_))
    }
    /// Get the work error if present.
    pub fn into_work(self) -> Option<E> {
        match self {
            Self::Work(e) => Some(e),
            Self::Cancelled => None,
        }
    }
    /// Borrow the work error if present.
    pub fn as_work(&self) -> Option<&E> {
        match self {
            Self::Work(e) => Some(e),
            Self::Cancelled => None,
        }
    }
}
