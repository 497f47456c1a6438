//! Tower middleware putting a [`Gate`] in front of a service.

use crate::cancel::CancellationToken;
use crate::error::LimitError;
use crate::gate::Gate;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Layer that waits for gate admission before each call.
#[derive(Clone, Debug)]
pub struct TimeLimitLayer {
    gate: Gate,
}

impl TimeLimitLayer {
    pub fn new(gate: impl Into<Gate>) -> Self {
        Self { gate: gate.into() }
    }
}

impl<S> Layer<S> for TimeLimitLayer {
    type Service = TimeLimitService<S>;

    fn layer(&self, service: S) -> Self::Service {
        TimeLimitService { inner: service, gate: self.gate.clone() }
    }
}

/// Service that holds a gate slot for the duration of each inner call.
#[derive(Clone, Debug)]
pub struct TimeLimitService<S> {
    inner: S,
    gate: Gate,
}

impl<S, Req> Service<Req> for TimeLimitService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = LimitError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(LimitError::Work)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let gate = self.gate.clone();
        // Take the service that was driven to readiness, leave a fresh clone in its place.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let mut permit = gate.acquire(&CancellationToken::new()).await?;
            let result = inner.call(req).await;
            permit.release();
            result.map_err(LimitError::Work)
        })
    }
}
