//! Execution wrapper tying a gate admission to the lifetime of a unit of work.
//!
//! Semantics:
//! - An already-fired token fails with [`LimitError::Cancelled`] before the gate is touched.
//! - Acquisition is the only suspension point before the work runs.
//! - The slot is released on every exit path: success, work error, panic unwinding, or the
//!   returned future being dropped mid-flight.
//! - Work errors come back as [`LimitError::Work`] carrying the original value.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use windowgate::{LimitError, TimeLimiter};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let limiter = TimeLimiter::max_count_per_window(5, Duration::from_secs(1)).unwrap();
//! let result: Result<u32, LimitError<std::io::Error>> =
//!     limiter.run(|| async { Ok(42) }).await;
//! assert_eq!(result.unwrap(), 42);
//!
//! // bare readiness, e.g. inside a polling loop
//! (&limiter).await;
//! # });
//! ```

use crate::cancel::CancellationToken;
use crate::error::{ConfigError, LimitError};
use crate::gate::Gate;
use crate::window::SlidingWindowGate;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::{Future, IntoFuture};
use std::time::Duration;

/// Runs work through a [`Gate`]. Clones share the gate.
#[derive(Debug, Clone)]
pub struct TimeLimiter {
    gate: Gate,
}

impl TimeLimiter {
    pub fn new(gate: impl Into<Gate>) -> Self {
        Self { gate: gate.into() }
    }

    /// At most `count` runs per sliding `window`, on the system clock.
    pub fn max_count_per_window(count: usize, window: Duration) -> Result<Self, ConfigError> {
        Gate::sliding_window(count, window).map(Self::new)
    }

    /// Limiter over [`SlidingWindowGate::persistent`]: `save` sees every finalized stamp and
    /// `initial` seeds the history, oldest first.
    pub fn persistent<F, I>(
        count: usize,
        window: Duration,
        save: F,
        initial: I,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(u64) + Send + Sync + 'static,
        I: IntoIterator<Item = u64>,
    {
        SlidingWindowGate::persistent(count, window, save, initial).map(Self::new)
    }

    /// Limiter that admits only when every gate admits.
    pub fn compose<I>(gates: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = Gate>,
    {
        Gate::compose_all(gates).map(Self::new)
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub async fn run<T, E, Fut, Op>(&self, operation: Op) -> Result<T, LimitError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        self.run_cancellable(operation, &CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), giving up with [`LimitError::Cancelled`] if `cancel` fires
    /// before admission.
    pub async fn run_cancellable<T, E, Fut, Op>(
        &self,
        operation: Op,
        cancel: &CancellationToken,
    ) -> Result<T, LimitError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        if cancel.is_cancelled() {
            return Err(LimitError::Cancelled);
        }
        let mut permit = self.gate.acquire(cancel).await?;
        let result = operation().await;
        permit.release();
        result.map_err(LimitError::Work)
    }

    /// Run non-suspending work under the gate.
    pub async fn run_sync<T, E, Op>(&self, operation: Op) -> Result<T, LimitError<E>>
    where
        Op: FnOnce() -> Result<T, E>,
    {
        self.run_sync_cancellable(operation, &CancellationToken::new()).await
    }

    pub async fn run_sync_cancellable<T, E, Op>(
        &self,
        operation: Op,
        cancel: &CancellationToken,
    ) -> Result<T, LimitError<E>>
    where
        Op: FnOnce() -> Result<T, E>,
    {
        self.run_cancellable(|| futures::future::ready(operation()), cancel).await
    }

    /// Wait until the gate would admit one run, counting this wait as that run.
    pub async fn ready(&self) {
        // A token that is never fired cannot cancel the acquisition.
        let _ = self.ready_cancellable(&CancellationToken::new()).await;
    }

    pub async fn ready_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), LimitError<()>> {
        self.run_cancellable(|| futures::future::ok::<(), ()>(()), cancel).await
    }
}

impl<'a> IntoFuture for &'a TimeLimiter {
    type Output = ();
    type IntoFuture = BoxFuture<'a, ()>;

    fn into_future(self) -> Self::IntoFuture {
        self.ready().boxed()
    }
}
