//! Conjunction of gates: admission requires every member to admit.

use crate::cancel::{or_cancelled, CancellationToken};
use crate::error::Cancelled;
use crate::gate::{Gate, Permit};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;

/// Gate that admits once all of its members admit.
///
/// Members are acquired concurrently. The composite lock is held only while acquiring, so one
/// caller's acquisition is all-or-nothing from the point of view of the next caller; it is not
/// held while the guarded work runs. Built through [`Gate::compose`].
#[derive(Debug, Clone)]
pub struct CompositeGate {
    members: Arc<[Gate]>,
    acquiring: Arc<tokio::sync::Mutex<()>>,
}

impl CompositeGate {
    pub(crate) fn new(members: Vec<Gate>) -> Self {
        Self { members: members.into(), acquiring: Arc::new(tokio::sync::Mutex::new(())) }
    }

    pub fn members(&self) -> &[Gate] {
        &self.members
    }

    /// Composite of fresh copies of every member.
    pub fn fresh(&self) -> Self {
        Self::new(self.members.iter().map(Gate::fresh).collect())
    }

    /// Acquire every member. If any member is cancelled, or the returned future is dropped
    /// before it resolves, slots already obtained from the others are handed back unstamped.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Permit, Cancelled> {
        let _acquiring = or_cancelled(cancel, self.acquiring.lock()).await?;

        let mut pending: FuturesUnordered<_> =
            self.members.iter().map(|gate| gate.acquire(cancel)).collect();
        let mut acquired = Acquired(Vec::with_capacity(self.members.len()));
        let mut cancelled = false;
        while let Some(result) = pending.next().await {
            match result {
                Ok(permit) => acquired.0.push(permit),
                Err(Cancelled) => cancelled = true,
            }
        }

        if cancelled {
            tracing::debug!(
                members = self.members.len(),
                acquired = acquired.0.len(),
                "composite gate: acquisition cancelled"
            );
            return Err(Cancelled);
        }
        Ok(Permit::composite(std::mem::take(&mut acquired.0)))
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.acquiring, &other.acquiring)
    }
}

/// Member permits gathered so far. Anything still held on drop was never handed to the caller
/// and is abandoned.
struct Acquired(Vec<Permit>);

impl Drop for Acquired {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(Permit::abandon);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::window::SlidingWindowGate;
    use std::time::Duration;

    fn window(count: usize, window_ms: u64, clock: &ManualClock) -> SlidingWindowGate {
        SlidingWindowGate::builder(count, Duration::from_millis(window_ms))
            .clock(clock.clone())
            .build()
            .unwrap()
    }

    async fn saturate(gate: &SlidingWindowGate) {
        for _ in 0..gate.count() {
            gate.acquire(&CancellationToken::new()).await.unwrap().release();
        }
    }

    #[tokio::test]
    async fn waits_for_the_saturated_member() {
        let clock = ManualClock::new(0);
        let a = window(1, 100, &clock);
        let b = window(5, 100, &clock);
        saturate(&a).await;

        let composite = Gate::from(a.clone()).compose(b.clone().into());
        let mut permit = composite.acquire(&CancellationToken::new()).await.unwrap();
        assert_eq!(clock.delays(), vec![Duration::from_millis(100)]);
        assert_eq!(clock.peek(), 100);

        permit.release();
        permit.release();
        assert_eq!(a.timestamps(), vec![100]);
        assert_eq!(b.timestamps(), vec![100]);
    }

    #[tokio::test]
    async fn saturated_members_wait_for_the_longest_not_the_sum() {
        let clock = ManualClock::new(0);
        let a = window(1, 100, &clock);
        let b = window(1, 100, &clock);
        saturate(&a).await;
        saturate(&b).await;

        let composite = Gate::from(a).compose(b.into());
        let _permit = composite.acquire(&CancellationToken::new()).await.unwrap();
        assert_eq!(clock.peek(), 100);
        assert_eq!(clock.delays(), vec![Duration::from_millis(100)]);
    }

    #[tokio::test]
    async fn free_members_admit_without_delay() {
        let clock = ManualClock::new(0);
        let composite = Gate::from(window(2, 100, &clock)).compose(window(3, 100, &clock).into());
        let _permit = composite.acquire(&CancellationToken::new()).await.unwrap();
        assert_eq!(clock.delay_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_hands_back_acquired_members() {
        let clock = ManualClock::new(0);
        let free = window(2, 100, &clock);
        let saturated = window(1, 100, &clock);
        saturate(&saturated).await;

        let token = CancellationToken::new();
        let trigger = token.clone();
        clock.on_delay(move |_| trigger.cancel());

        let composite = Gate::from(free.clone()).compose(saturated.clone().into());
        let err = composite.acquire(&token).await.unwrap_err();
        assert_eq!(err, Cancelled);

        assert_eq!(free.in_flight(), 0);
        assert!(free.timestamps().is_empty(), "abandoned slot must not be stamped");
        assert_eq!(saturated.in_flight(), 0);
        assert_eq!(saturated.timestamps(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_acquire_hands_back_acquired_members() {
        let free = SlidingWindowGate::new(1, Duration::from_millis(100)).unwrap();
        let saturated = SlidingWindowGate::new(1, Duration::from_millis(100)).unwrap();
        saturated.acquire(&CancellationToken::new()).await.unwrap().release();

        let composite = Gate::from(free.clone()).compose(saturated.clone().into());
        let token = CancellationToken::new();
        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), composite.acquire(&token)).await;
        assert!(timed_out.is_err());

        assert_eq!(free.in_flight(), 0);
        assert!(free.timestamps().is_empty(), "dropped acquisition must not be stamped");
        assert_eq!(saturated.in_flight(), 0);

        let before = tokio::time::Instant::now();
        let _permit = free.acquire(&CancellationToken::new()).await.unwrap();
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn fired_token_fails_before_touching_members() {
        let clock = ManualClock::new(0);
        let a = window(1, 100, &clock);
        let b = window(1, 100, &clock);
        let composite = Gate::from(a.clone()).compose(b.clone().into());

        let err = composite.acquire(&CancellationToken::cancelled_token()).await.unwrap_err();
        assert_eq!(err, Cancelled);
        assert_eq!(a.in_flight() + b.in_flight(), 0);
    }

    #[tokio::test]
    async fn fresh_composite_has_empty_members() {
        let clock = ManualClock::new(0);
        let a = window(1, 100, &clock);
        saturate(&a).await;
        let composite = match Gate::from(a).compose(window(1, 100, &clock).into()) {
            Gate::Composite(c) => c,
            other => panic!("expected composite, got {:?}", other),
        };
        let fresh = composite.fresh();
        assert!(!fresh.ptr_eq(&composite));
        let _permit = fresh.acquire(&CancellationToken::new()).await.unwrap();
        assert_eq!(clock.delay_count(), 0);
    }
}
