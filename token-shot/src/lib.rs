//! # token-shot
//!
//! `token-shot` provides a thread-safe token bucket for admission control.
//!
//! ## Core Philosophy
//!
//! A bucket holds up to `capacity` tokens and refills continuously at `refill_rate`
//! tokens per second. Each unit of admitted work spends tokens. The bucket state is
//! two floating point numbers guarded by a single `Mutex`, so every refill and
//! decision happens in one critical section: concurrent callers can never both
//! spend the same token.
//!
//! ## Key Concepts
//!
//! * **Lazy Evaluation**: Tokens are recalculated at the moment of the request,
//!   eliminating the need for background worker threads or timers.
//! * **Injectable Time**: Buckets read time through the [`Clock`] trait. Production
//!   code uses [`MonotonicClock`]; tests drive a [`ManualClock`] by hand.
//! * **Fail Fast**: Invalid configuration or requests are reported as a
//!   [`BucketError`] and never silently clamped.
//! * **Strategy Trait**: A unified admission interface consumed by middleware.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use token_shot::ManualClock;
//! use token_shot::TokenBucket;
//!
//! let clock = Arc::new(ManualClock::new(0.0));
//! let bucket = TokenBucket::with_clock(5.0, 1.0, clock.clone()).unwrap();
//!
//! assert!(bucket.try_consume(3.0).unwrap());
//! assert!(!bucket.try_consume(3.0).unwrap());
//!
//! clock.advance(2.0).unwrap();
//! assert!(bucket.try_consume(4.0).unwrap());
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod clock;
mod error;
mod token_bucket;

pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::MonotonicClock;
pub use error::BucketError;
pub use token_bucket::TokenBucket;
pub use token_bucket::TokenBucketConfig;

/// Reasons why a request might be rejected by a strategy.
#[derive(Debug, PartialEq)]
pub enum Reason {
    /// Not enough capacity right now. Retrying after `retry_after` may succeed.
    Overloaded { retry_after: Duration },
    /// The strategy can never admit a single unit of work.
    Unsatisfiable,
}

/// The admission trait consumed by request-path integrations.
///
/// Strategies shared across threads via `Arc` also need to be `Send` and `Sync`;
/// the middleware adds those bounds where it needs them.
pub trait Strategy: Debug {
    /// Attempts to admit a single request.
    ///
    /// This method never blocks for longer than it takes to acquire the
    /// strategy's internal state.
    ///
    /// # Errors
    ///
    /// Returns `Reason` if the request must be rejected.
    fn process(&self) -> ControlFlow<Reason>;
}
