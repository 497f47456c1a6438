//! Sliding-window admission gate.
//!
//! Semantics:
//! - At most `count` admissions are "active or recently completed" within any trailing window
//!   of `window` ending at admission time.
//! - An admission is stamped when its permit is released, not when it is admitted, so a
//!   long-running operation keeps its slot busy until it actually finishes.
//! - A saturated gate makes the caller wait (via [`Clock::delay`]) instead of rejecting it.
//!
//! Locking:
//! - `capacity` (semaphore, `count` permits) bounds in-flight admissions.
//! - `delay_lock` orders callers that have to wait so each computes its wait from fresh history.
//! - `history` is a short synchronous lock, never held across an `.await`.
//!
//! Invariants:
//! - History holds at most `count` entries: a prefix of in-flight entries followed by
//!   completed stamps in non-increasing order.
//! - Cancellation at any suspension point returns every reserved resource.

use crate::cancel::{or_cancelled, CancellationToken};
use crate::clock::{duration_millis, Clock, SystemClock};
use crate::error::{Cancelled, ConfigError};
use crate::history::BoundedHistory;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// One history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stamp {
    /// Admitted, permit not yet released.
    InFlight,
    /// Released at this time (ms).
    Completed(u64),
}

impl Stamp {
    fn is_in_flight(&self) -> bool {
        matches!(self, Stamp::InFlight)
    }
}

/// Validated count/window pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WindowConfig {
    count: usize,
    window: Duration,
}

impl WindowConfig {
    /// Errors if `count` is 0 or `window` is shorter than one millisecond.
    pub fn new(count: usize, window: Duration) -> Result<Self, ConfigError> {
        let cfg = Self { count, window };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.count == 0 {
            return Err(ConfigError::InvalidCount { provided: self.count });
        }
        if self.window < Duration::from_millis(1) {
            return Err(ConfigError::InvalidWindow(self.window));
        }
        Ok(())
    }

    /// Maximum admissions per window.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

type CompletionHook = Arc<dyn Fn(u64) + Send + Sync>;

struct WindowState {
    config: WindowConfig,
    window_millis: u64,
    history: Mutex<BoundedHistory<Stamp>>,
    capacity: Arc<Semaphore>,
    delay_lock: tokio::sync::Mutex<()>,
    clock: Arc<dyn Clock>,
    on_complete: Option<CompletionHook>,
}

impl WindowState {
    fn lock_history(&self) -> MutexGuard<'_, BoundedHistory<Stamp>> {
        // Bookkeeping is a handful of arithmetic steps; a panic elsewhere must not wedge the gate.
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// How long until one more admission fits, or `None` if it fits now.
    fn saturation(&self, history: &BoundedHistory<Stamp>, now: u64) -> Option<u64> {
        let target = now.checked_sub(self.window_millis);
        let mut counted = 0usize;
        let mut oldest = None;
        for stamp in history {
            match *stamp {
                Stamp::InFlight => {}
                Stamp::Completed(at) if !matches!(target, Some(t) if at <= t) => oldest = Some(at),
                Stamp::Completed(_) => break,
            }
            counted += 1;
        }
        if counted < self.config.count {
            return None;
        }
        // Holding a capacity permit means at most count-1 entries are in flight, so a full
        // window always ends in a completed stamp.
        debug_assert!(oldest.is_some(), "saturated window with no completed stamp");
        let wait = match oldest {
            Some(at) => at.saturating_add(self.window_millis).saturating_sub(now),
            None => self.window_millis,
        };
        Some(wait)
    }

    fn complete(&self) {
        let now = self.clock.stamp_millis();
        {
            let mut history = self.lock_history();
            if !history.replace_last(Stamp::is_in_flight, Stamp::Completed(now)) {
                tracing::warn!(at = now, "sliding window: release found no in-flight entry");
                history.push(Stamp::Completed(now));
            }
        }
        tracing::trace!(at = now, "sliding window: released");
        if let Some(hook) = &self.on_complete {
            hook(now);
        }
    }

    fn abandon(&self) {
        self.lock_history().remove_last(Stamp::is_in_flight);
        tracing::trace!("sliding window: admission abandoned");
    }
}

/// Admission gate allowing at most `count` operations per sliding `window`.
///
/// Clones share the same underlying state via `Arc`; use [`SlidingWindowGate::fresh`] for an
/// independent gate with the same configuration.
///
/// # Examples
/// ```
/// use windowgate::{CancellationToken, SlidingWindowGate};
/// use std::time::Duration;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let gate = SlidingWindowGate::new(10, Duration::from_secs(1)).unwrap();
/// let mut permit = gate.acquire(&CancellationToken::new()).await.unwrap();
/// // ... call the rate-limited API ...
/// permit.release();
/// # });
/// ```
#[derive(Clone)]
pub struct SlidingWindowGate {
    state: Arc<WindowState>,
}

impl fmt::Debug for SlidingWindowGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowGate")
            .field("count", &self.state.config.count)
            .field("window", &self.state.config.window)
            .field("clock", &self.state.clock)
            .field("on_complete", &self.state.on_complete.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

impl SlidingWindowGate {
    /// Gate on the system clock.
    pub fn new(count: usize, window: Duration) -> Result<Self, ConfigError> {
        Self::builder(count, window).build()
    }

    pub fn with_config(config: WindowConfig) -> Result<Self, ConfigError> {
        Self::builder(config.count, config.window).build()
    }

    pub fn builder(count: usize, window: Duration) -> SlidingWindowBuilder {
        SlidingWindowBuilder::new(count, window)
    }

    /// Gate that survives restarts: `save` receives every finalized stamp and `initial` seeds
    /// the history (oldest first).
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
        Self::builder(count, window).seed(initial).on_complete(save).build()
    }

    /// Independent gate with the same count, window, clock and hook, and an empty history.
    pub fn fresh(&self) -> Self {
        let state = &self.state;
        Self::from_parts(state.config, state.clock.clone(), state.on_complete.clone())
    }

    fn from_parts(
        config: WindowConfig,
        clock: Arc<dyn Clock>,
        on_complete: Option<CompletionHook>,
    ) -> Self {
        Self {
            state: Arc::new(WindowState {
                config,
                window_millis: duration_millis(config.window),
                history: Mutex::new(BoundedHistory::new(config.count)),
                capacity: Arc::new(Semaphore::new(config.count)),
                delay_lock: tokio::sync::Mutex::new(()),
                clock,
                on_complete,
            }),
        }
    }

    pub fn count(&self) -> usize {
        self.state.config.count
    }

    pub fn window(&self) -> Duration {
        self.state.config.window
    }

    pub fn config(&self) -> WindowConfig {
        self.state.config
    }

    /// Completed stamps (ms), most recent first.
    pub fn timestamps(&self) -> Vec<u64> {
        self.state
            .lock_history()
            .iter()
            .filter_map(|s| match s {
                Stamp::Completed(at) => Some(*at),
                Stamp::InFlight => None,
            })
            .collect()
    }

    /// Admissions currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.state.config.count - self.state.capacity.available_permits()
    }

    /// Wait until one more admission fits in the window and reserve it.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<WindowPermit, Cancelled> {
        let state = &self.state;

        // The semaphore is never closed, so an acquire error cannot occur; treat it as cancelled.
        let capacity = or_cancelled(cancel, state.capacity.clone().acquire_owned())
            .await?
            .map_err(|_| Cancelled)?;
        let delay_guard = or_cancelled(cancel, state.delay_lock.lock()).await?;

        let wait = {
            let mut history = state.lock_history();
            let now = state.clock.now_millis();
            let wait = state.saturation(&history, now);
            if wait.is_none() {
                history.push(Stamp::InFlight);
            }
            wait
        };

        match wait {
            None => tracing::trace!(count = state.config.count, "sliding window: admitted"),
            Some(wait_ms) => {
                tracing::debug!(
                    wait_ms,
                    count = state.config.count,
                    window_ms = state.window_millis,
                    "sliding window saturated; waiting"
                );
                if wait_ms > 0 {
                    let delay = state.clock.delay(Duration::from_millis(wait_ms), cancel);
                    if let Err(e) = delay.await {
                        tracing::debug!("sliding window: wait cancelled");
                        return Err(e);
                    }
                }
                state.lock_history().push(Stamp::InFlight);
            }
        }
        drop(delay_guard);

        Ok(WindowPermit { state: self.state.clone(), capacity: Some(capacity) })
    }

    /// Identity of the shared state, used for structural composition checks.
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Release handle for one admission on a [`SlidingWindowGate`].
///
/// Released exactly once: explicitly via [`WindowPermit::release`], or on drop.
pub struct WindowPermit {
    state: Arc<WindowState>,
    capacity: Option<OwnedSemaphorePermit>,
}

impl fmt::Debug for WindowPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowPermit").field("released", &self.is_released()).finish()
    }
}

impl WindowPermit {
    /// Stamp the admission with the current time and free its slot. Later calls are no-ops.
    pub fn release(&mut self) {
        if let Some(capacity) = self.capacity.take() {
            self.state.complete();
            drop(capacity);
        }
    }

    /// Give the slot back without stamping, as if the admission never happened.
    pub(crate) fn abandon(&mut self) {
        if let Some(capacity) = self.capacity.take() {
            self.state.abandon();
            drop(capacity);
        }
    }

    pub fn is_released(&self) -> bool {
        self.capacity.is_none()
    }
}

impl Drop for WindowPermit {
    fn drop(&mut self) {
        self.release();
    }
}

/// Builder for [`SlidingWindowGate`].
pub struct SlidingWindowBuilder {
    count: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    seed: Vec<u64>,
    on_complete: Option<CompletionHook>,
}

impl SlidingWindowBuilder {
    /// Defaults to [`SystemClock`], empty history, no completion hook.
    pub fn new(count: usize, window: Duration) -> Self {
        Self {
            count,
            window,
            clock: Arc::new(SystemClock::default()),
            seed: Vec::new(),
            on_complete: None,
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Share an existing clock.
    pub fn shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Completed stamps to start from, oldest first. Only the newest `count` are kept.
    pub fn seed<I>(mut self, stamps: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        self.seed.extend(stamps);
        self
    }

    /// Called outside the gate's lock with each stamp finalized on release.
    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<SlidingWindowGate, ConfigError> {
        let config = WindowConfig::new(self.count, self.window)?;
        let gate = SlidingWindowGate::from_parts(config, self.clock, self.on_complete);
        if !self.seed.is_empty() {
            let mut seed = self.seed;
            seed.sort_unstable();
            let mut history = gate.state.lock_history();
            for at in seed {
                history.push(Stamp::Completed(at));
            }
        }
        Ok(gate)
    }
}
