//! The uniform gate capability.
//!
//! [`Gate`] is either a single [`SlidingWindowGate`] or a [`CompositeGate`] (logical AND of
//! gates). Both sit behind the same `acquire`/release contract, so callers such as
//! [`TimeLimiter`](crate::TimeLimiter) never need to know which one they hold.

use crate::cancel::CancellationToken;
use crate::composite::CompositeGate;
use crate::error::{Cancelled, ConfigError};
use crate::window::{SlidingWindowGate, WindowPermit};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;

/// Admission-control capability. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub enum Gate {
    /// At most N admissions per sliding window.
    Window(SlidingWindowGate),
    /// Admits only when every member admits.
    Composite(CompositeGate),
}

impl Gate {
    /// Shorthand for a system-clock [`SlidingWindowGate`].
    pub fn sliding_window(count: usize, window: Duration) -> Result<Self, ConfigError> {
        SlidingWindowGate::new(count, window).map(Gate::Window)
    }

    /// Wait for admission. The returned permit must be released (or dropped) when the guarded
    /// work is done.
    pub fn acquire<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Permit, Cancelled>> {
        match self {
            Gate::Window(gate) => {
                async move { gate.acquire(cancel).await.map(Permit::window) }.boxed()
            }
            Gate::Composite(gate) => gate.acquire(cancel).boxed(),
        }
    }

    /// Conjunction of `self` and `other`.
    ///
    /// Composing a gate with itself returns it unchanged; otherwise members of composite
    /// operands are flattened into one composite.
    pub fn compose(self, other: Gate) -> Gate {
        if Gate::ptr_eq(&self, &other) {
            return self;
        }
        let mut members = self.into_members();
        for member in other.into_members() {
            if !members.iter().any(|m| Gate::ptr_eq(m, &member)) {
                members.push(member);
            }
        }
        if members.len() == 1 {
            return members.remove(0);
        }
        Gate::Composite(CompositeGate::new(members))
    }

    /// Left fold of [`Gate::compose`]. Errors on an empty input.
    pub fn compose_all<I>(gates: I) -> Result<Gate, ConfigError>
    where
        I: IntoIterator<Item = Gate>,
    {
        gates.into_iter().reduce(Gate::compose).ok_or(ConfigError::EmptyComposition)
    }

    /// Independent copy with the same configuration and empty histories.
    pub fn fresh(&self) -> Gate {
        match self {
            Gate::Window(gate) => Gate::Window(gate.fresh()),
            Gate::Composite(gate) => Gate::Composite(gate.fresh()),
        }
    }

    /// True if both handles refer to the same underlying gate.
    pub fn ptr_eq(a: &Gate, b: &Gate) -> bool {
        match (a, b) {
            (Gate::Window(a), Gate::Window(b)) => a.ptr_eq(b),
            (Gate::Composite(a), Gate::Composite(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    fn into_members(self) -> Vec<Gate> {
        match self {
            Gate::Composite(gate) => gate.members().to_vec(),
            window => vec![window],
        }
    }
}

impl From<SlidingWindowGate> for Gate {
    fn from(gate: SlidingWindowGate) -> Self {
        Gate::Window(gate)
    }
}

impl From<CompositeGate> for Gate {
    fn from(gate: CompositeGate) -> Self {
        Gate::Composite(gate)
    }
}

/// Release handle returned by [`Gate::acquire`].
///
/// `release` frees the slot(s) exactly once; further calls do nothing. Dropping an unreleased
/// permit releases it.
#[derive(Debug)]
pub struct Permit {
    kind: PermitKind,
}

#[derive(Debug)]
enum PermitKind {
    Window(WindowPermit),
    Composite(Vec<Permit>),
}

impl Permit {
    pub(crate) fn window(permit: WindowPermit) -> Self {
        Self { kind: PermitKind::Window(permit) }
    }

    pub(crate) fn composite(members: Vec<Permit>) -> Self {
        Self { kind: PermitKind::Composite(members) }
    }

    pub fn release(&mut self) {
        match &mut self.kind {
            PermitKind::Window(permit) => permit.release(),
            PermitKind::Composite(members) => members.iter_mut().for_each(Permit::release),
        }
    }

    /// Return the slot(s) without recording an admission.
    pub(crate) fn abandon(&mut self) {
        match &mut self.kind {
            PermitKind::Window(permit) => permit.abandon(),
            PermitKind::Composite(members) => members.iter_mut().for_each(Permit::abandon),
        }
    }

    pub fn is_released(&self) -> bool {
        match &self.kind {
            PermitKind::Window(permit) => permit.is_released(),
            PermitKind::Composite(members) => members.iter().all(Permit::is_released),
        }
    }
}
