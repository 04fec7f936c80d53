use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;

use governor::Quota;
use governor::RateLimiter;
use governor::clock::Clock;
use governor::clock::QuantaClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;

use token_shot::ManualClock;
use token_shot::Reason;
use token_shot::Strategy;
use token_shot::TokenBucket;

// Wrapper to bridge Governor into the token-shot Strategy trait
#[derive(Debug)]
struct GovernorStrategy {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, QuantaClock>>,
    clock: QuantaClock,
}

impl Strategy for GovernorStrategy {
    fn process(&self) -> ControlFlow<Reason> {
        match self.limiter.check() {
            Ok(_) => ControlFlow::Continue(()),
            Err(negative) => {
                let now = self.clock.now();
                let wait: Duration = negative.wait_time_from(now);
                ControlFlow::Break(Reason::Overloaded { retry_after: wait })
            }
        }
    }
}

fn bench_try_consume(c: &mut Criterion) {
    let mut group = c.benchmark_group("TokenBucket-try_consume");

    let bucket = TokenBucket::new(1_000_000.0, 1_000_000.0).unwrap();
    group.bench_function("monotonic-clock", |b| {
        b.iter(|| black_box(bucket.try_consume(black_box(1.0))))
    });

    // Time never moves, so this measures lock + arithmetic without clock reads
    let frozen =
        TokenBucket::with_clock(f64::MAX, 1.0, Arc::new(ManualClock::new(0.0))).unwrap();
    group.bench_function("manual-clock", |b| {
        b.iter(|| black_box(frozen.try_consume(black_box(1.0))))
    });

    group.bench_function("tokens_available", |b| {
        b.iter(|| black_box(bucket.tokens_available()))
    });

    group.finish();
}

fn bench_single_strategy<S: Strategy>(group_name: &str, c: &mut Criterion, strategy: Arc<S>) {
    let mut group = c.benchmark_group(group_name);

    group.bench_function("single-threaded", |b| {
        b.iter(|| {
            let _ = black_box(strategy.as_ref()).process();
        })
    });

    group.finish();
}

fn bench_parallel_strategy<S: Strategy + Send + Sync + 'static>(
    group_name: &str,
    c: &mut Criterion,
    strategy: Arc<S>,
) {
    let mut group = c.benchmark_group(group_name);

    for threads in [2, 4, 8].iter() {
        let num_threads = *threads;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}-threads", num_threads)),
            &num_threads,
            |b, &n| {
                b.iter_custom(|iters| {
                    let barrier = Arc::new(Barrier::new(n + 1));
                    let mut handles = Vec::with_capacity(n);

                    for _ in 0..n {
                        let s = Arc::clone(&strategy);
                        let bar = Arc::clone(&barrier);
                        let iters_per_thread = iters / n as u64;

                        handles.push(thread::spawn(move || {
                            bar.wait(); // Wait for the start signal
                            for _ in 0..iters_per_thread {
                                let _ = black_box(s.process());
                            }
                        }));
                    }

                    // Synchronize the start across all threads
                    barrier.wait();
                    let start = Instant::now();

                    for handle in handles {
                        let _ = handle.join();
                    }

                    start.elapsed()
                });
            },
        );
    }
    group.finish();
}

fn run_all_benches(c: &mut Criterion) {
    let limit_val = 1_000_000;

    bench_try_consume(c);

    // Same sustained rate for both: one million per minute with a matching burst
    let tb = Arc::new(TokenBucket::new(limit_val as f64, limit_val as f64 / 60.0).unwrap());

    let gov_quota = Quota::per_minute(NonZeroU32::new(limit_val).unwrap());
    let gov_clock = QuantaClock::default();
    let gov_limiter = Arc::new(RateLimiter::direct_with_clock(gov_quota, gov_clock.clone()));
    let gov = Arc::new(GovernorStrategy {
        limiter: gov_limiter,
        clock: gov_clock,
    });

    bench_single_strategy("TokenBucket-Strategy", c, Arc::clone(&tb));
    bench_parallel_strategy("TokenBucket-Strategy", c, tb);

    bench_single_strategy("Governor-Strategy", c, Arc::clone(&gov));
    bench_parallel_strategy("Governor-Strategy", c, gov);
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
