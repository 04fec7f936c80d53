/// Invalid-argument conditions reported by buckets and clocks.
///
/// Every variant is a caller error. A bucket that is merely empty is not an
/// error: [`TokenBucket::try_consume`](crate::TokenBucket::try_consume) reports
/// it as `Ok(false)`.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum BucketError {
    /// The bucket capacity was not a finite number greater than zero.
    #[error("capacity must be a finite number greater than 0, got {0}")]
    InvalidCapacity(f64),

    /// The refill rate was not a finite number greater than zero.
    #[error("refill rate must be a finite number greater than 0, got {0}")]
    InvalidRefillRate(f64),

    /// The request was not greater than zero, or could never fit in the bucket.
    #[error("requested {requested} tokens, but requests must be greater than 0 and at most {capacity}")]
    InvalidRequest {
        /// The number of tokens asked for.
        requested: f64,
        /// The capacity of the bucket that rejected the request.
        capacity: f64,
    },

    /// A manual clock was asked to move backwards (or by a non-finite amount).
    #[error("clock can only advance by a finite, non-negative number of seconds, got {0}")]
    InvalidAdvance(f64),
}
