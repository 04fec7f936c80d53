//! # Tower Token Shot
//!
//! `tower-token-shot` guards a [Tower](https://github.com/tower-rs/tower) service with
//! a [`token_shot::TokenBucket`] (or any other [`token_shot::Strategy`]).
//!
//! ## Layers
//!
//! * [`RateLimitLayer`]: consults the strategy once per request in `poll_ready`.
//!   By default a rejected request waits for the bucket's retry-after hint; with
//!   [`RateLimitLayer::with_fail_fast`] it is rejected immediately with
//!   [`ShotError::RateLimited`], carrying the hint.
//! * [`ManagedRateLimitLayer`]: a pre-composed stack handling common production
//!   requirements:
//!
//!   1. **Load Shedding**: Immediately rejects requests with `ShotError::Overloaded`
//!      when the bucket is empty or the inner service is at peak capacity.
//!   2. **Timeouts**: Fails with `ShotError::Timeout` if the inner service takes
//!      longer than a defined duration.
//!   3. **Error Mapping**: Converts internal Tower errors (like
//!      `tower::timeout::error::Elapsed`) into a unified, cloneable [`ShotError`] domain.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`ShotError`], allowing automatic conversion
//!   to HTTP status codes (429, 408, 503, 500).

mod error;
mod layer;
mod managed_layer;
mod service;


pub use error::ShotError;
pub use layer::RateLimitLayer;
pub use managed_layer::ManagedRateLimitLayer;
pub use service::RateLimitService;
