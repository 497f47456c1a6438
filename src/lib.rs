#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # windowgate
//!
//! Sliding-window admission control for async Rust. A gate allows at most N operations in
//! any trailing window of duration T and makes callers *wait* for a slot instead of
//! rejecting them, so wrapping an outbound call gives backpressure rather than quota errors.
//!
//! ## Features
//!
//! - **Sliding-window gate** stamped at completion time, so long calls keep their slot busy
//! - **Composition**: `a.compose(b)` admits only when both gates admit
//! - **Cancellation** at every wait point, with reserved capacity handed back
//! - **Execution wrapper** that releases on every exit path
//! - **Tower middleware** for limiting any `Service`
//! - **Persistence hooks** to carry history across restarts
//!
//! ## Quick Start
//!
//! ```rust
//! use windowgate::{Gate, TimeLimiter};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     // 10 calls per second AND 100 calls per minute
//!     let per_second = Gate::sliding_window(10, Duration::from_secs(1)).unwrap();
//!     let per_minute = Gate::sliding_window(100, Duration::from_secs(60)).unwrap();
//!     let limiter = TimeLimiter::compose([per_second, per_minute]).unwrap();
//!
//!     let result = limiter.run(|| async {
//!         // Your rate-limited call here
//!         Ok::<_, std::io::Error>(())
//!     }).await;
//!     assert!(result.is_ok());
//! }
//! ```

pub mod cancel;
pub mod clock;
pub mod composite;
pub mod error;
pub mod gate;
pub mod history;
pub mod limiter;
pub mod middleware;
pub mod prelude;
pub mod window;

// Re-exports
pub use cancel::CancellationToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use composite::CompositeGate;
pub use error::{Cancelled, ConfigError, LimitError};
pub use gate::{Gate, Permit};
pub use history::BoundedHistory;
pub use limiter::TimeLimiter;
pub use middleware::{TimeLimitLayer, TimeLimitService};
pub use window::{SlidingWindowBuilder, SlidingWindowGate, WindowConfig, WindowPermit};
