use std::fmt::Debug;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use quanta::Instant;
use tracing::debug;

use crate::BucketError;

/// A source of time for buckets.
///
/// `now` returns seconds since an arbitrary, fixed epoch. Successive calls must
/// never go backwards. Implementations are shared between buckets, so they must
/// be safe to read from many threads at once.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> f64;
}

/// Production clock backed by the `quanta` monotonic time source.
///
/// Readings are seconds elapsed since the clock was created, so they are immune
/// to wall-clock adjustments.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    source: quanta::Clock,
    anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::with_source(quanta::Clock::new())
    }

    /// Build on top of an existing `quanta` clock, e.g. one from `quanta::Clock::mock()`.
    pub fn with_source(source: quanta::Clock) -> Self {
        let anchor = source.now();
        Self { source, anchor }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> f64 {
        // duration_since saturates, so a reading can never precede the anchor.
        self.source.now().duration_since(self.anchor).as_secs_f64()
    }
}

/// A clock that only moves when told to.
///
/// The current reading is stored as the bit pattern of an `f64` in an atomic, so a
/// single instance can be shared by buckets on many threads.
#[derive(Debug)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `t` seconds.
    ///
    /// `t` must be finite: a NaN reading would stop every bucket on this clock
    /// from ever refilling.
    pub fn new(t: f64) -> Self {
        debug_assert!(t.is_finite(), "manual clock must start at a finite time, got {t}");
        Self {
            bits: AtomicU64::new(t.to_bits()),
        }
    }

    /// Moves the clock forward by `seconds`.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::InvalidAdvance`] if `seconds` is negative, NaN or
    /// infinite. The clock is left untouched.
    pub fn advance(&self, seconds: f64) -> Result<(), BucketError> {
        if !(seconds.is_finite() && seconds >= 0.0) {
            debug!(seconds, "rejecting manual clock advance");
            return Err(BucketError::InvalidAdvance(seconds));
        }
        // The closure always returns Some, so the update cannot fail.
        let _ = self
            .bits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + seconds).to_bits())
            });
        Ok(())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use more_asserts::assert_ge;

    use super::*;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::new(1.5);
        assert_eq!(clock.now(), 1.5);
        assert_eq!(clock.now(), 1.5);

        clock.advance(0.25).unwrap();
        assert_eq!(clock.now(), 1.75);

        clock.advance(0.0).unwrap();
        assert_eq!(clock.now(), 1.75);
    }

    #[test]
    fn manual_clock_rejects_invalid_advances() {
        let clock = ManualClock::default();

        assert_eq!(
            clock.advance(-0.5),
            Err(BucketError::InvalidAdvance(-0.5))
        );
        assert!(matches!(
            clock.advance(f64::NAN),
            Err(BucketError::InvalidAdvance(_))
        ));
        assert!(clock.advance(f64::INFINITY).is_err());

        // Failed advances leave no trace
        assert_eq!(clock.now(), 0.0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "finite time")]
    fn manual_clock_refuses_a_nan_start() {
        let _ = ManualClock::new(f64::NAN);
    }

    #[test]
    fn manual_clock_is_shared_across_threads() {
        let clock = Arc::new(ManualClock::default());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        clock.advance(0.5).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Every advance lands: 4 * 100 * 0.5
        assert_eq!(clock.now(), 200.0);
    }

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let mut last = clock.now();
        for _ in 0..1_000 {
            let now = clock.now();
            assert_ge!(now, last);
            last = now;
        }
    }

    #[test]
    fn monotonic_clock_follows_mocked_source() {
        let (source, mock) = quanta::Clock::mock();
        let clock = MonotonicClock::with_source(source);

        assert_eq!(clock.now(), 0.0);

        mock.increment(Duration::from_millis(1_500));
        assert_eq!(clock.now(), 1.5);

        mock.increment(Duration::from_millis(500));
        assert_eq!(clock.now(), 2.0);
    }
}
