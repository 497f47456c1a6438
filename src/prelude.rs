//! Convenient re-exports for common windowgate types.
pub use crate::{
    cancel::CancellationToken,
    clock::{Clock, ManualClock, SystemClock},
    error::{Cancelled, ConfigError, LimitError},
    gate::{Gate, Permit},
    limiter::TimeLimiter,
    middleware::TimeLimitLayer,
    window::{SlidingWindowGate, WindowConfig},
};
