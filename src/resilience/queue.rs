//! Outbound operation queue.
//!
//! Holds remote calls that could not be sent because the channel was down.
//! Each entry carries a completion handle that resolves once the call
//! succeeds, is answered with a remote error, exhausts its attempts, or is
//! flushed by a disconnect.
//!
//! # Drain Algorithm
//!
//! A drain takes a snapshot of the queue. Items are attempted in enqueue
//! order; a transport failure requeues the item at the back so one poison
//! item cannot block the rest. Items enqueued while a drain runs wait for the
//! next drain. A second drain trigger while one is running is a no-op.
//!
//! Operations held by a running drain still count toward [`OutboundQueue::len`]
//! and the capacity until they resolve. Only operations not yet picked up by
//! the drain can be evicted.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::future::Future;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::OperationId;

// ============================================================================
// Constants
// ============================================================================

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;

/// Default attempts per queued operation.
pub const DEFAULT_QUEUE_MAX_ATTEMPTS: u32 = 3;

// ============================================================================
// Types
// ============================================================================

/// Completion handle returned to the caller of an enqueue.
pub type Completion = oneshot::Receiver<Result<Value>>;

// ============================================================================
// QueuedOperation
// ============================================================================

/// A remote call waiting for the channel.
#[derive(Debug)]
pub struct QueuedOperation {
    /// Unique operation ID.
    pub id: OperationId,
    /// Remote method name.
    pub method: String,
    /// Call arguments.
    pub args: Vec<Value>,
    /// When the operation entered the queue.
    pub enqueued_at: Instant,
    /// Attempts made so far.
    pub attempt_count: u32,
    /// Attempts allowed before the operation is rejected.
    pub max_attempts: u32,
    completion: oneshot::Sender<Result<Value>>,
}

impl QueuedOperation {
    /// Returns `true` once no attempts remain.
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// Resolves the operation.
    fn complete(self, result: Result<Value>) {
        // The caller may have stopped waiting.
        let _ = self.completion.send(result);
    }

    fn exhaust(self) {
        warn!(op = %self.id, method = %self.method, attempts = self.attempt_count, "Queued operation exhausted");
        let err = Error::operation_exhausted(self.method.clone(), self.attempt_count);
        self.complete(Err(err));
    }
}

// ============================================================================
// DrainBatch / DrainReport
// ============================================================================

/// Snapshot taken at drain start.
#[derive(Debug)]
pub struct DrainBatch {
    epoch: u64,
    items: VecDeque<QueuedOperation>,
}

impl DrainBatch {
    /// Number of operations in the snapshot.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the snapshot is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Outcome counts of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Operations that succeeded.
    pub delivered: usize,
    /// Operations answered with a remote error.
    pub rejected: usize,
    /// Operations that ran out of attempts.
    pub exhausted: usize,
    /// Operations requeued at the back after a transport failure.
    pub requeued: usize,
    /// Operations left untried because the drain was interrupted.
    pub deferred: usize,
}

// ============================================================================
// OutboundQueue
// ============================================================================

/// FIFO of pending remote calls with an optional capacity.
///
/// Not internally synchronized; see [`drain`] for the locking protocol.
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<QueuedOperation>,
    capacity: Option<usize>,
    max_attempts: u32,
    draining: bool,
    /// Unresolved operations held by the running drain.
    in_flight: usize,
    epoch: u64,
}

impl OutboundQueue {
    /// Creates an empty queue. `None` capacity means unbounded.
    #[must_use]
    pub fn new(capacity: Option<usize>, max_attempts: u32) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.map(|c| c.max(1)),
            max_attempts: max_attempts.max(1),
            draining: false,
            in_flight: 0,
            epoch: 0,
        }
    }

    /// Number of pending operations, including unresolved ones held by a
    /// running drain.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len() + self.in_flight
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` while a drain holds a snapshot.
    #[inline]
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Enqueues a fresh call.
    pub fn enqueue(&mut self, method: impl Into<String>, args: Vec<Value>) -> (OperationId, Completion) {
        self.enqueue_attempted(method, args, 0)
    }

    /// Enqueues a call that already failed `attempts` times.
    ///
    /// If no attempts remain the completion resolves immediately with
    /// [`Error::OperationExhausted`].
    pub fn enqueue_attempted(
        &mut self,
        method: impl Into<String>,
        args: Vec<Value>,
        attempts: u32,
    ) -> (OperationId, Completion) {
        let (tx, rx) = oneshot::channel();
        let op = QueuedOperation {
            id: OperationId::next(),
            method: method.into(),
            args,
            enqueued_at: Instant::now(),
            attempt_count: attempts,
            max_attempts: self.max_attempts,
            completion: tx,
        };
        let id = op.id;

        if op.is_exhausted() {
            op.exhaust();
            return (id, rx);
        }

        trace!(op = %id, method = %op.method, "Operation queued");
        self.items.push_back(op);
        self.enforce_capacity();
        (id, rx)
    }

    /// Takes a snapshot for draining. Returns `None` if a drain is already
    /// running or nothing is queued.
    pub fn begin_drain(&mut self) -> Option<DrainBatch> {
        if self.draining || self.items.is_empty() {
            return None;
        }
        self.draining = true;
        self.in_flight = self.items.len();
        Some(DrainBatch {
            epoch: self.epoch,
            items: std::mem::take(&mut self.items),
        })
    }

    /// Records that one operation of the running drain resolved.
    fn resolve_in_flight(&mut self, epoch: u64) {
        if epoch == self.epoch {
            self.in_flight = self.in_flight.saturating_sub(1);
        }
    }

    /// Ends a drain.
    ///
    /// `untried` goes back to the front in its original order, `failed` to
    /// the back. If the queue was flushed since the drain began, everything
    /// is rejected with [`Error::Disconnected`] instead.
    pub fn finish_drain(
        &mut self,
        epoch: u64,
        untried: VecDeque<QueuedOperation>,
        failed: Vec<QueuedOperation>,
    ) {
        self.draining = false;
        self.in_flight = 0;

        if epoch != self.epoch {
            for op in untried.into_iter().chain(failed) {
                op.complete(Err(Error::Disconnected));
            }
            return;
        }

        for op in untried.into_iter().rev() {
            self.items.push_front(op);
        }
        self.items.extend(failed);
        self.enforce_capacity();
    }

    /// Rejects every queued operation and invalidates running drains.
    ///
    /// Returns the number of operations rejected.
    pub fn reject_all(&mut self, make_error: impl Fn() -> Error) -> usize {
        self.epoch += 1;
        self.in_flight = 0;
        let count = self.items.len();
        for op in self.items.drain(..) {
            op.complete(Err(make_error()));
        }
        if count > 0 {
            debug!(count, "Outbound queue flushed");
        }
        count
    }

    fn enforce_capacity(&mut self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.len() > capacity {
            let Some(oldest) = self.items.pop_front() else {
                break;
            };
            warn!(op = %oldest.id, method = %oldest.method, capacity, "Outbound queue full, dropping oldest operation");
            oldest.complete(Err(Error::queue_capacity_exceeded(capacity)));
        }
    }
}

// ============================================================================
// Drain
// ============================================================================

/// Drains `queue` through `send`.
///
/// The lock is only held to take the snapshot and to put failures back, never
/// across an `await`.
///
/// `send` outcomes:
/// - `Ok` resolves the operation
/// - a transport failure counts an attempt and requeues (or exhausts)
/// - [`Error::NotConnected`] or [`Error::Disconnected`] stops the drain and
///   returns the remaining items to the front without counting an attempt
/// - any other error resolves the operation with that error
pub async fn drain<F, Fut>(queue: &Mutex<OutboundQueue>, mut send: F) -> Option<DrainReport>
where
    F: FnMut(String, Vec<Value>) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let DrainBatch { epoch, mut items } = queue.lock().begin_drain()?;
    let mut report = DrainReport::default();
    let mut failed = Vec::new();

    debug!(count = items.len(), "Draining outbound queue");

    while let Some(mut op) = items.pop_front() {
        match send(op.method.clone(), op.args.clone()).await {
            Ok(value) => {
                trace!(op = %op.id, method = %op.method, "Queued operation delivered");
                report.delivered += 1;
                queue.lock().resolve_in_flight(epoch);
                op.complete(Ok(value));
            }
            Err(Error::NotConnected { .. } | Error::Disconnected) => {
                items.push_front(op);
                break;
            }
            Err(e) if e.is_transport_failure() => {
                op.attempt_count += 1;
                if op.is_exhausted() {
                    report.exhausted += 1;
                    queue.lock().resolve_in_flight(epoch);
                    op.exhaust();
                } else {
                    debug!(op = %op.id, method = %op.method, attempt = op.attempt_count, error = %e, "Queued operation failed, requeued");
                    report.requeued += 1;
                    failed.push(op);
                }
            }
            Err(e) => {
                report.rejected += 1;
                queue.lock().resolve_in_flight(epoch);
                op.complete(Err(e));
            }
        }
    }

    report.deferred = items.len();
    queue.lock().finish_drain(epoch, items, failed);
    Some(report)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn queue() -> Mutex<OutboundQueue> {
        Mutex::new(OutboundQueue::new(Some(DEFAULT_QUEUE_CAPACITY), DEFAULT_QUEUE_MAX_ATTEMPTS))
    }

    #[tokio::test]
    async fn test_drain_delivers_in_order() {
        let queue = queue();
        let (_, first) = queue.lock().enqueue("A", vec![json!(1)]);
        let (_, second) = queue.lock().enqueue("B", vec![json!(2)]);

        let mut seen = Vec::new();
        let report = drain(&queue, |method, args| {
            seen.push(method);
            async move { Ok(args[0].clone()) }
        })
        .await
        .expect("drain ran");

        assert_eq!(seen, vec!["A", "B"]);
        assert_eq!(report.delivered, 2);
        assert_eq!(first.await.expect("resolved").expect("ok"), json!(1));
        assert_eq!(second.await.expect("resolved").expect("ok"), json!(2));
        assert!(queue.lock().is_empty());
    }

    #[tokio::test]
    async fn test_completion_pending_until_drained() {
        let queue = queue();
        let (_, completion) = queue.lock().enqueue("A", vec![]);
        let mut completion = tokio_test::task::spawn(completion);
        tokio_test::assert_pending!(completion.poll());

        drain(&queue, |_, _| async { Ok(Value::Bool(true)) }).await;

        assert!(completion.is_woken());
        let result = tokio_test::assert_ready!(completion.poll());
        assert_eq!(result.expect("resolved").expect("ok"), Value::Bool(true));
    }

    #[tokio::test]
    async fn test_failure_requeues_at_back() {
        let queue = queue();
        let (_, _poison) = queue.lock().enqueue("Poison", vec![]);
        let (_, _good) = queue.lock().enqueue("Good", vec![]);

        let report = drain(&queue, |method, _| async move {
            if method == "Poison" {
                Err(Error::transport_closed("boom"))
            } else {
                Ok(Value::Null)
            }
        })
        .await
        .expect("drain ran");

        assert_eq!(report.delivered, 1);
        assert_eq!(report.requeued, 1);
        let q = queue.lock();
        assert_eq!(q.len(), 1);
        assert_eq!(q.items[0].method, "Poison");
        assert_eq!(q.items[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_rejects() {
        let queue = queue();
        let (_, completion) = queue.lock().enqueue("Never", vec![]);

        for _ in 0..DEFAULT_QUEUE_MAX_ATTEMPTS {
            drain(&queue, |_, _| async { Err(Error::request_timeout("Never", 10)) })
                .await
                .expect("drain ran");
        }

        let err = completion.await.expect("resolved").unwrap_err();
        assert!(matches!(err, Error::OperationExhausted { attempts: 3, .. }));
        assert!(queue.lock().is_empty());
    }

    #[tokio::test]
    async fn test_remote_error_resolves_directly() {
        let queue = queue();
        let (_, completion) = queue.lock().enqueue("JoinGroup", vec![]);

        let report = drain(&queue, |_, _| async { Err(Error::remote("forbidden", "no")) })
            .await
            .expect("drain ran");

        assert_eq!(report.rejected, 1);
        assert!(matches!(
            completion.await.expect("resolved"),
            Err(Error::Remote { .. })
        ));
    }

    #[tokio::test]
    async fn test_interrupted_drain_restores_front() {
        let queue = queue();
        let (_, _a) = queue.lock().enqueue("A", vec![]);
        let (_, _b) = queue.lock().enqueue("B", vec![]);
        let (_, _c) = queue.lock().enqueue("C", vec![]);

        let report = drain(&queue, |method, _| async move {
            match method.as_str() {
                "A" => Ok(Value::Null),
                _ => Err(Error::not_connected("chat")),
            }
        })
        .await
        .expect("drain ran");

        assert_eq!(report.deferred, 2);
        let q = queue.lock();
        let methods: Vec<_> = q.items.iter().map(|op| op.method.as_str()).collect();
        assert_eq!(methods, vec!["B", "C"]);
        assert_eq!(q.items[0].attempt_count, 0);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut queue = OutboundQueue::new(Some(2), 3);
        let (_, mut first) = queue.enqueue("A", vec![]);
        let (_, _second) = queue.enqueue("B", vec![]);
        let (_, _third) = queue.enqueue("C", vec![]);

        assert_eq!(queue.len(), 2);
        let err = first.try_recv().expect("resolved").unwrap_err();
        assert!(matches!(err, Error::QueueCapacityExceeded { capacity: 2 }));
    }

    #[test]
    fn test_drain_is_not_reentrant() {
        let mut queue = OutboundQueue::new(None, 3);
        let _ = queue.enqueue("A", vec![]);

        let batch = queue.begin_drain().expect("first drain");
        let _ = queue.enqueue("B", vec![]);
        assert!(queue.begin_drain().is_none());
        assert_eq!(batch.len(), 1);

        queue.finish_drain(batch.epoch, batch.items, Vec::new());
        assert!(!queue.is_draining());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_capacity_counts_running_drain() {
        let mut queue = OutboundQueue::new(Some(2), 3);
        let (_, _a) = queue.enqueue("A", vec![]);
        let (_, _b) = queue.enqueue("B", vec![]);

        let batch = queue.begin_drain().expect("drain");
        assert_eq!(queue.len(), 2);

        let (_, mut overflow) = queue.enqueue("C", vec![]);
        assert_eq!(queue.len(), 2);
        assert!(matches!(
            overflow.try_recv(),
            Ok(Err(Error::QueueCapacityExceeded { capacity: 2 }))
        ));

        queue.resolve_in_flight(batch.epoch);
        let (_, mut accepted) = queue.enqueue("D", vec![]);
        assert_eq!(queue.len(), 2);
        assert!(accepted.try_recv().is_err());

        let mut items = batch.items;
        items.pop_front();
        queue.finish_drain(batch.epoch, items, Vec::new());
        let methods: Vec<_> = queue.items.iter().map(|op| op.method.as_str()).collect();
        assert_eq!(methods, vec!["B", "D"]);
    }

    #[tokio::test]
    async fn test_status_len_includes_running_drain() {
        let queue = queue();
        let (_, _a) = queue.lock().enqueue("A", vec![]);
        let (_, _b) = queue.lock().enqueue("B", vec![]);

        let mut observed = Vec::new();
        drain(&queue, |_, _| {
            observed.push(queue.lock().len());
            async { Ok(Value::Null) }
        })
        .await
        .expect("drain ran");

        assert_eq!(observed, vec![2, 1]);
        assert!(queue.lock().is_empty());
    }

    #[test]
    fn test_reject_all_invalidates_running_drain() {
        let mut queue = OutboundQueue::new(None, 3);
        let (_, mut held) = queue.enqueue("A", vec![]);
        let (_, mut waiting) = queue.enqueue("B", vec![]);

        let mut batch = queue.begin_drain().expect("drain");
        let _ = queue.enqueue("C", vec![]);
        assert_eq!(queue.reject_all(|| Error::Disconnected), 1);

        let op = batch.items.pop_front().expect("A");
        queue.finish_drain(batch.epoch, batch.items, vec![op]);

        assert!(queue.is_empty());
        assert!(matches!(held.try_recv(), Ok(Err(Error::Disconnected))));
        assert!(matches!(waiting.try_recv(), Ok(Err(Error::Disconnected))));
    }

    #[test]
    fn test_enqueue_without_attempts_left_rejects() {
        let mut queue = OutboundQueue::new(None, 1);
        let (_, mut completion) = queue.enqueue_attempted("A", vec![], 1);
        assert!(queue.is_empty());
        assert!(matches!(
            completion.try_recv(),
            Ok(Err(Error::OperationExhausted { .. }))
        ));
    }
}
