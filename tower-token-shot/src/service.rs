use std::any::type_name;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tokio::time::Instant;
use tokio::time::Sleep;
use tokio::time::Timeout;
use tokio::time::sleep;
use tokio::time::timeout;
use tower::BoxError;
use tower::Service;
use tracing::debug;

use token_shot::Reason;
use token_shot::Strategy;

use crate::error::ShotError;

#[derive(Clone, Debug)]
struct RateLimitServiceMetrics {
    admitted: Counter<u64>,
    rejected: Counter<u64>,
    early_wake: Counter<u64>,
    labels: [KeyValue; 1],
}

impl RateLimitServiceMetrics {
    fn new<L: ?Sized>() -> Self {
        let meter = global::meter("rate_limit_service");
        Self {
            admitted: meter.u64_counter("admitted").build(),
            rejected: meter.u64_counter("rejected").build(),
            early_wake: meter.u64_counter("early_wake").build(),
            labels: [KeyValue::new("strategy", type_name::<L>())],
        }
    }
}

/// Rate limits an inner service with a shared [`Strategy`].
///
/// A token is taken in `poll_ready` and spent by the next `call`.
#[derive(Debug)]
pub struct RateLimitService<L, S>
where
    L: ?Sized,
{
    inner: S,
    limiter: Arc<L>,
    sleep: Option<Pin<Box<Sleep>>>,
    permit_acquired: bool,
    fail_fast: bool,
    timeout: Option<Duration>,
    wait_start: Option<Instant>,
    instruments: RateLimitServiceMetrics,
}

pin_project! {
    /// A future that wraps the inner service future with a timeout.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: Timeout<F>,
    }
}

impl<F, T, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, E>>,
    E: From<BoxError>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            Poll::Ready(Err(_)) => Poll::Ready(Err(E::from(Box::new(ShotError::Timeout)))),
            Poll::Pending => Poll::Pending,
        }
    }
}

// Manually implement Clone because Pin<Box<Sleep>> cannot be cloned
impl<L, S> Clone for RateLimitService<L, S>
where
    L: ?Sized,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            // A clone has not been granted a token and is not waiting for one
            sleep: None,
            permit_acquired: false,
            fail_fast: self.fail_fast,
            timeout: self.timeout,
            wait_start: None,
            instruments: self.instruments.clone(),
        }
    }
}

impl<L, S, Req> Service<Req> for RateLimitService<L, S>
where
    L: Strategy + ?Sized + Send + Sync + 'static,
    S: Service<Req, Error = BoxError>,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // 1. If we are waiting for a token, check whether the wait is over
        if let Some(ref mut fut) = self.sleep {
            match fut.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    self.sleep = None;
                    if self.wait_expired() {
                        return Poll::Ready(Err(Box::new(ShotError::Timeout)));
                    }
                }
                Poll::Pending => {
                    self.instruments
                        .early_wake
                        .add(1, &self.instruments.labels);
                    return Poll::Pending;
                }
            }
        }

        // 2. Check inner service readiness FIRST to avoid spending tokens
        match self.inner.poll_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) => {}
        }

        if self.permit_acquired {
            return Poll::Ready(Ok(()));
        }

        // 3. Ask the strategy for a token
        if self.timeout.is_some() {
            self.wait_start.get_or_insert_with(Instant::now);
            if self.wait_expired() {
                return Poll::Ready(Err(Box::new(ShotError::Timeout)));
            }
        }

        let retry_after = match self.limiter.process() {
            ControlFlow::Continue(()) => {
                self.instruments.admitted.add(1, &self.instruments.labels);
                self.permit_acquired = true;
                return Poll::Ready(Ok(()));
            }
            ControlFlow::Break(Reason::Unsatisfiable) => {
                self.instruments.rejected.add(1, &self.instruments.labels);
                self.wait_start = None;
                debug!(limiter = ?self.limiter, "limiter can never admit a request");
                return Poll::Ready(Err(Box::new(ShotError::Unsatisfiable)));
            }
            ControlFlow::Break(Reason::Overloaded { retry_after }) => {
                self.instruments.rejected.add(1, &self.instruments.labels);
                retry_after
            }
        };

        if self.fail_fast {
            self.wait_start = None;
            debug!(?retry_after, "rate limited; failing fast");
            return Poll::Ready(Err(Box::new(ShotError::RateLimited { retry_after })));
        }

        // 4. Park until the strategy expects a token, bounded by the timeout
        let start = *self.wait_start.get_or_insert_with(Instant::now);
        let sleep_duration = match self.timeout {
            Some(timeout) => {
                let remaining = timeout.saturating_sub(start.elapsed());
                if remaining.is_zero() {
                    self.wait_start = None;
                    return Poll::Ready(Err(Box::new(ShotError::Timeout)));
                }
                retry_after.min(remaining)
            }
            None => retry_after,
        };
        debug!(?sleep_duration, "rate limited; waiting for a token");

        let mut sleep_fut = Box::pin(sleep(sleep_duration));
        match sleep_fut.as_mut().poll(cx) {
            Poll::Pending => {
                self.sleep = Some(sleep_fut);
                Poll::Pending
            }
            Poll::Ready(()) => {
                // Immediate wakeup (a zero hint); try again on the next poll
                if self.wait_expired() {
                    return Poll::Ready(Err(Box::new(ShotError::Timeout)));
                }
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    fn call(&mut self, req: Req) -> Self::Future {
        self.permit_acquired = false;
        let start = self.wait_start.take();
        let timeout_duration = match (self.timeout, start) {
            (Some(t), Some(s)) => t.saturating_sub(s.elapsed()),
            (Some(t), None) => t,
            (None, _) => Duration::from_secs(3600 * 24 * 365), // Effective infinity
        };

        ResponseFuture {
            inner: timeout(timeout_duration, self.inner.call(req)),
        }
    }
}

impl<L, S> RateLimitService<L, S>
where
    L: ?Sized,
{
    pub fn new(inner: S, limiter: Arc<L>) -> Self {
        Self {
            inner,
            limiter,
            sleep: None,
            permit_acquired: false,
            fail_fast: false,
            timeout: None,
            wait_start: None,
            instruments: RateLimitServiceMetrics::new::<L>(),
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Clears the wait and returns `true` once the configured timeout has elapsed.
    fn wait_expired(&mut self) -> bool {
        let expired = match (self.timeout, self.wait_start) {
            (Some(timeout), Some(start)) => start.elapsed() >= timeout,
            _ => false,
        };
        if expired {
            self.wait_start = None;
        }
        expired
    }
}
