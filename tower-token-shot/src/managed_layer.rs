use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use token_shot::Strategy;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::util::BoxCloneSyncService;

use crate::RateLimitService;
use crate::ShotError;

/// A shed-first rate limiting stack.
///
/// Instead of queuing requests while the bucket refills, excess traffic is
/// rejected at once, so rejections never pay for queueing latency.
///
/// ### Error Responsibilities:
/// - **LoadShedding (`ShotError::Overloaded`)**: The bucket is empty or the inner
///   service is not ready. This happens at the `poll_ready` stage and is near-instant.
/// - **Timeout (`ShotError::Timeout`)**: The inner service took longer than
///   `max_wait` to respond.
/// - **`ShotError::Unsatisfiable`**: The bucket can never admit a request.
/// - **`ShotError::Inner`**: Any other inner service error, stringified.
pub struct ManagedRateLimitLayer<L, Req>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    max_wait: Duration,
    _phantom: PhantomData<fn(Req)>,
}

// Deriving Clone would require `Req: Clone`
impl<L, Req> Clone for ManagedRateLimitLayer<L, Req>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            max_wait: self.max_wait,
            _phantom: PhantomData,
        }
    }
}

impl<S, L, Req> Layer<S> for ManagedRateLimitLayer<L, Req>
where
    L: Strategy + ?Sized + Send + Sync + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    Req: Send + 'static,
{
    type Service = BoxCloneSyncService<Req, S::Response, BoxError>;

    fn layer(&self, inner: S) -> Self::Service {
        let rl = RateLimitService::new(inner, Arc::clone(&self.limiter));

        // Timeout is outer to ensure a hard deadline on the entire process.
        let svc = tower::ServiceBuilder::new()
            .timeout(self.max_wait)
            .load_shed()
            .service(rl);

        let mapped_svc = tower::util::MapErr::new(svc, map_managed_error);

        BoxCloneSyncService::new(mapped_svc)
    }
}

impl<L, Req> ManagedRateLimitLayer<L, Req>
where
    L: Strategy + ?Sized,
{
    pub fn new(limiter: Arc<L>, max_wait: Duration) -> Self {
        Self {
            limiter,
            max_wait,
            _phantom: PhantomData,
        }
    }
}

/// Collapses the errors of the managed stack into [`ShotError`].
fn map_managed_error(err: BoxError) -> BoxError {
    if err.is::<tower::timeout::error::Elapsed>() {
        BoxError::from(ShotError::Timeout)
    } else if err.is::<tower::load_shed::error::Overloaded>() {
        BoxError::from(ShotError::Overloaded)
    } else if err.is::<ShotError>() {
        err
    } else {
        BoxError::from(ShotError::Inner(err.to_string()))
    }
}
