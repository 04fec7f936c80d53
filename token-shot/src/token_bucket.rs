use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use tracing::debug;
use tracing::trace;

use crate::BucketError;
use crate::Clock;
use crate::MonotonicClock;
use crate::Reason;
use crate::Strategy;

/// Validated bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketConfig {
    capacity: f64,
    refill_rate: f64,
}

impl TokenBucketConfig {
    /// Creates a new `TokenBucketConfig`.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The maximum number of tokens the bucket holds (the burst limit).
    /// * `refill_rate` - Tokens added per second of elapsed time.
    ///
    /// # Errors
    ///
    /// Both values must be finite and greater than zero.
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self, BucketError> {
        if !(capacity.is_finite() && capacity > 0.0) {
            debug!(capacity, "rejecting bucket capacity");
            return Err(BucketError::InvalidCapacity(capacity));
        }
        if !(refill_rate.is_finite() && refill_rate > 0.0) {
            debug!(refill_rate, "rejecting bucket refill rate");
            return Err(BucketError::InvalidRefillRate(refill_rate));
        }
        Ok(Self {
            capacity,
            refill_rate,
        })
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn check_request(&self, requested: f64) -> Result<(), BucketError> {
        // Written to also reject NaN
        if requested > 0.0 && requested <= self.capacity {
            Ok(())
        } else {
            debug!(requested, capacity = self.capacity, "rejecting token request");
            Err(BucketError::InvalidRequest {
                requested,
                capacity: self.capacity,
            })
        }
    }
}

/// A token bucket.
///
/// Starts full. Refills continuously at `refill_rate` tokens per second up to
/// `capacity`. Every public operation brings the bucket up to date with the clock
/// and then decides, all while holding the bucket's lock.
#[derive(Debug)]
pub struct TokenBucket {
    config: TokenBucketConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last: f64,
}

impl BucketState {
    fn refill(&mut self, now: f64, config: &TokenBucketConfig) {
        let elapsed = (now - self.last).max(0.0);
        self.last = now;
        self.tokens = (self.tokens + elapsed * config.refill_rate).min(config.capacity);
        trace!(elapsed, tokens = self.tokens, "refilled bucket");
    }

    fn consume(&mut self, requested: f64) -> bool {
        if self.tokens >= requested {
            self.tokens -= requested;
            true
        } else {
            false
        }
    }

    fn wait_for(&self, requested: f64, config: &TokenBucketConfig) -> f64 {
        let missing = (requested - self.tokens).max(0.0);
        if missing == 0.0 {
            0.0
        } else {
            missing / config.refill_rate
        }
    }
}

impl TokenBucket {
    /// Creates a full bucket driven by a fresh [`MonotonicClock`].
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self, BucketError> {
        Self::with_clock(capacity, refill_rate, Arc::new(MonotonicClock::new()))
    }

    /// Creates a full bucket that reads time from `clock`.
    pub fn with_clock(
        capacity: f64,
        refill_rate: f64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BucketError> {
        let config = TokenBucketConfig::new(capacity, refill_rate)?;
        Ok(Self::from_config(config, clock))
    }

    /// Creates a full bucket from an already validated config.
    pub fn from_config(config: TokenBucketConfig, clock: Arc<dyn Clock>) -> Self {
        let last = clock.now();
        Self {
            config,
            clock,
            state: Mutex::new(BucketState {
                tokens: config.capacity,
                last,
            }),
        }
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    pub fn capacity(&self) -> f64 {
        self.config.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.config.refill_rate
    }

    /// Attempts to spend `tokens`.
    ///
    /// Returns `Ok(true)` and removes the tokens if enough are available, otherwise
    /// returns `Ok(false)` and leaves the bucket untouched.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::InvalidRequest`] if `tokens` is not greater than zero
    /// or exceeds the capacity, since such a request could never succeed.
    pub fn try_consume(&self, tokens: f64) -> Result<bool, BucketError> {
        self.config.check_request(tokens)?;
        Ok(self.refilled().consume(tokens))
    }

    /// Attempts to spend a single token.
    pub fn try_consume_one(&self) -> Result<bool, BucketError> {
        self.try_consume(1.0)
    }

    /// Returns the number of tokens currently in the bucket.
    ///
    /// The bucket is refilled first, so this also moves its last observed time
    /// forward.
    pub fn tokens_available(&self) -> f64 {
        self.refilled().tokens
    }

    /// Estimates how many seconds until `tokens` could be spent.
    ///
    /// Returns `0.0` if they are available now. The estimate is advisory: nothing
    /// is reserved, so other callers may take the tokens first.
    ///
    /// # Errors
    ///
    /// Same validation as [`TokenBucket::try_consume`].
    pub fn time_to_availability(&self, tokens: f64) -> Result<f64, BucketError> {
        self.config.check_request(tokens)?;
        Ok(self.refilled().wait_for(tokens, &self.config))
    }

    /// Estimates how many seconds until a single token could be spent.
    pub fn time_to_availability_one(&self) -> Result<f64, BucketError> {
        self.time_to_availability(1.0)
    }

    /// Locks the state and brings it up to date with the clock.
    ///
    /// The clock is read under the lock so recorded timestamps follow lock order.
    fn refilled(&self) -> MutexGuard<'_, BucketState> {
        // The state is two floats that are never left half-updated, so a guard
        // poisoned by a panicking holder is still consistent.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refill(self.clock.now(), &self.config);
        state
    }
}

impl Strategy for TokenBucket {
    fn process(&self) -> ControlFlow<Reason> {
        if self.config.capacity < 1.0 {
            return ControlFlow::Break(Reason::Unsatisfiable);
        }
        let mut state = self.refilled();
        if state.consume(1.0) {
            ControlFlow::Continue(())
        } else {
            let wait = state.wait_for(1.0, &self.config);
            ControlFlow::Break(Reason::Overloaded {
                retry_after: Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX),
            })
        }
    }
}
