//! Resilience primitive benchmarks.
//!
//! Benchmarks the hot paths of the connection layer:
//! - Deduplicator checks at different table sizes
//! - Retry delay computation across the backoff curve
//! - Outbound queue enqueue + drain
//!
//! Run with: cargo bench --bench resilience
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use parking_lot::Mutex;
use realtime_link::resilience::queue::drain;
use realtime_link::{DedupConfig, Deduplicator, OutboundQueue, RetryPolicy, RetryScheduler};
use serde_json::{Value, json};
use tokio::runtime::Runtime;
use tokio::time::Instant;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const TABLE_SIZES: &[u64] = &[100, 1_000, 10_000];
const QUEUE_DEPTHS: &[usize] = &[10, 200];

// ============================================================================
// Benchmark: Deduplicator
// ============================================================================

fn bench_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup");

    for &size in TABLE_SIZES {
        group.bench_with_input(BenchmarkId::new("check_hash", size), &size, |b, &size| {
            let mut dedup = Deduplicator::new(DedupConfig::default());
            let now = Instant::now();
            for hash in 0..size {
                dedup.check(hash, now);
            }
            let mut next = size;
            b.iter(|| {
                next += 1;
                black_box(dedup.check(black_box(next % (size * 2)), now))
            });
        });
    }

    let payload = notification_payload();
    group.bench_function("check_envelope_value", |b| {
        let mut dedup = Deduplicator::new(DedupConfig::default());
        let now = Instant::now();
        b.iter(|| black_box(dedup.check_value(black_box(&payload), now)));
    });

    group.finish();
}

fn notification_payload() -> Value {
    json!({
        "id": "n-1",
        "type": "friend_request",
        "payload": {"recipientId": "u-1", "message": "Ana sent you a request", "senderId": "u-9"},
        "createdAt": "2024-05-01T10:00:00Z",
        "isRead": false
    })
}

// ============================================================================
// Benchmark: Backoff Curve
// ============================================================================

fn bench_backoff(c: &mut Criterion) {
    c.bench_function("backoff/schedule_15_attempts", |b| {
        let mut scheduler = RetryScheduler::with_seed(RetryPolicy::default(), 7);
        b.iter(|| {
            let mut total = Duration::ZERO;
            for index in 0..15 {
                total += scheduler.schedule(index, total).delay;
            }
            black_box(total)
        });
    });
}

// ============================================================================
// Benchmark: Outbound Queue
// ============================================================================

fn bench_queue_drain(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("queue");

    for &depth in QUEUE_DEPTHS {
        group.bench_with_input(BenchmarkId::new("enqueue_drain", depth), &depth, |b, &depth| {
            b.to_async(&rt).iter(|| async move {
                let queue = Mutex::new(OutboundQueue::new(None, 3));
                let completions: Vec<_> = (0..depth)
                    .map(|n| queue.lock().enqueue("SendPrivateMessage", vec![json!(n)]).1)
                    .collect();

                let report = drain(&queue, |_, args| async move { Ok(Value::Array(args)) }).await;
                for completion in completions {
                    let _ = completion.await;
                }
                black_box(report)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dedup, bench_backoff, bench_queue_drain);
criterion_main!(benches);
