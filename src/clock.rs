//! Clock abstractions used by gates: a source of "now" and a cancellable delay.
//!
//! Timestamps are milliseconds since the UNIX epoch so that recorded admissions stay meaningful
//! across restarts (see [`SlidingWindowGate::persistent`](crate::SlidingWindowGate::persistent)).

use crate::cancel::{or_cancelled, CancellationToken};
use crate::error::Cancelled;
use futures::future::{self, BoxFuture};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in milliseconds, rounded down.
    fn now_millis(&self) -> u64;

    /// Time recorded when an admission completes. Clocks finer than a millisecond round up, so a
    /// stamp is never earlier than the instant it records and a later `now_millis` reading
    /// never overstates how long ago it was.
    fn stamp_millis(&self) -> u64 {
        self.now_millis()
    }

    /// Wait for `duration`, failing with [`Cancelled`] if `cancel` fires first.
    fn delay(
        &self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> BoxFuture<'static, Result<(), Cancelled>>;
}

/// Wall clock anchored at the UNIX epoch, advanced by the tokio timer.
///
/// The epoch offset is read once at construction, truncated to the millisecond; afterwards time
/// moves with `tokio::time::Instant`, so it is monotonic and follows paused/advanced time in
/// tests. Completion stamps round the elapsed time up, readings of "now" round it down.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin_millis: u64,
    start: tokio::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        let origin = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            origin_millis: u64::try_from(origin.as_millis()).unwrap_or(u64::MAX),
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.origin_millis.saturating_add(duration_millis(self.start.elapsed()))
    }

    fn stamp_millis(&self) -> u64 {
        self.origin_millis.saturating_add(ceil_millis(self.start.elapsed()))
    }

    fn delay(
        &self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> BoxFuture<'static, Result<(), Cancelled>> {
        let cancel = cancel.clone();
        Box::pin(async move { or_cancelled(&cancel, tokio::time::sleep(duration)).await })
    }
}

type DelayHook = Arc<dyn Fn(Duration) + Send + Sync>;

struct ManualState {
    now: AtomicU64,
    now_calls: AtomicUsize,
    delays: Mutex<Vec<Duration>>,
    on_delay: Mutex<Option<DelayHook>>,
}

/// Deterministic clock for tests.
///
/// `delay` never sleeps: it records the call, runs the optional hook, and then jumps the clock
/// forward by the requested duration (unless the token fired). Clones share state.
///
/// Because a delay completes inside the call, members of a composite are acquired one after
/// another against the already-advanced time: two members that each need 100ms move the clock
/// by 100ms in total, not 200ms.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<ManualState>,
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &self.inner.now.load(Ordering::SeqCst))
            .field("delays", &self.delay_count())
            .finish()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            inner: Arc::new(ManualState {
                now: AtomicU64::new(start_millis),
                now_calls: AtomicUsize::new(0),
                delays: Mutex::new(Vec::new()),
                on_delay: Mutex::new(None),
            }),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.inner.now.fetch_add(duration_millis(by), Ordering::SeqCst);
    }

    /// Current time without counting as a `now_millis` call.
    pub fn peek(&self) -> u64 {
        self.inner.now.load(Ordering::SeqCst)
    }

    pub fn now_count(&self) -> usize {
        self.inner.now_calls.load(Ordering::SeqCst)
    }

    pub fn delay_count(&self) -> usize {
        self.lock_delays().len()
    }

    /// Durations passed to `delay`, in call order.
    pub fn delays(&self) -> Vec<Duration> {
        self.lock_delays().clone()
    }

    /// Run `hook` inside every `delay` call, before cancellation is checked.
    pub fn on_delay<F>(&self, hook: F)
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        *self.inner.on_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    fn lock_delays(&self) -> std::sync::MutexGuard<'_, Vec<Duration>> {
        self.inner.delays.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.inner.now_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.now.load(Ordering::SeqCst)
    }

    fn delay(
        &self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> BoxFuture<'static, Result<(), Cancelled>> {
        self.lock_delays().push(duration);
        let hook = self.inner.on_delay.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(hook) = hook {
            hook(duration);
        }
        if cancel.is_cancelled() {
            return Box::pin(future::ready(Err(Cancelled)));
        }
        self.advance(duration);
        Box::pin(future::ready(Ok(())))
    }
}

pub(crate) fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn ceil_millis(d: Duration) -> u64 {
    let partial = d.subsec_nanos() % 1_000_000 != 0;
    duration_millis(d).saturating_add(u64::from(partial))
}
