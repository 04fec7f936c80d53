use std::sync::Arc;
use std::time::Duration;

use token_shot::Strategy;
use token_shot::TokenBucket;
use tower::Layer;

use crate::service::RateLimitService;

/// Guards services with a shared token bucket.
///
/// Every service produced by the layer draws from the same bucket, so cloning the
/// layer or the services never multiplies the allowed rate.
///
/// ```rust
/// use std::time::Duration;
///
/// use token_shot::TokenBucket;
/// use tower_token_shot::RateLimitLayer;
///
/// // Bursts of 10, sustained 5 requests per second
/// let bucket = TokenBucket::new(10.0, 5.0).unwrap();
/// let layer = RateLimitLayer::from_bucket(bucket)
///     .with_fail_fast(true)
///     .with_timeout(Duration::from_secs(2));
/// # let _ = layer;
/// ```
#[derive(Debug)]
pub struct RateLimitLayer<L>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    fail_fast: bool,
    timeout: Option<Duration>,
}

impl<L> Clone for RateLimitLayer<L>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            fail_fast: self.fail_fast,
            timeout: self.timeout,
        }
    }
}

impl RateLimitLayer<TokenBucket> {
    /// Create a RateLimitLayer that takes ownership of `bucket`.
    pub fn from_bucket(bucket: TokenBucket) -> Self {
        Self::new(Arc::new(bucket))
    }
}

impl<L> RateLimitLayer<L>
where
    L: Strategy + ?Sized,
{
    /// Create a RateLimitLayer around a shared strategy.
    pub fn new(limiter: Arc<L>) -> Self {
        RateLimitLayer {
            limiter,
            fail_fast: false,
            timeout: None,
        }
    }

    /// Set whether requests are rejected as soon as the bucket is empty.
    ///
    /// If `true`, the service returns `ShotError::RateLimited` carrying the bucket's
    /// retry-after estimate instead of waiting for a token.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Set a unified timeout for both waiting for a token and request execution.
    ///
    /// If the total time exceeds this duration, the service
    /// will return `ShotError::Timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<L, S> Layer<S> for RateLimitLayer<L>
where
    L: ?Sized,
{
    type Service = RateLimitService<L, S>;

    fn layer(&self, service: S) -> Self::Service {
        let svc =
            RateLimitService::new(service, Arc::clone(&self.limiter)).with_fail_fast(self.fail_fast);
        match self.timeout {
            Some(timeout) => svc.with_timeout(timeout),
            None => svc,
        }
    }
}
