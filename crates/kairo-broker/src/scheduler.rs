// Timer wheel for armed schedule rules.
// A single min-heap ordered by (fire_at, arm order) replaces one timer per rule;
// the driver task sleeps until the earliest deadline or until a new rule is armed.
use crate::queues::QueueState;
use bytes::Bytes;
use kairo_common::ids::EventId;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Immutable payload shared by every rule of one submitted event.
#[derive(Debug)]
pub(crate) struct ScheduledEvent {
    pub(crate) id: EventId,
    pub(crate) data: Bytes,
    pub(crate) category: Option<Arc<str>>,
}

#[derive(Debug)]
pub(crate) struct ArmedRule {
    pub(crate) fire_at_ms: u64,
    seq: u64,
    pub(crate) queue: Arc<QueueState>,
    pub(crate) event: Arc<ScheduledEvent>,
}

impl PartialEq for ArmedRule {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at_ms == other.fire_at_ms && self.seq == other.seq
    }
}

impl Eq for ArmedRule {}

impl PartialOrd for ArmedRule {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArmedRule {
    // Reversed so BinaryHeap pops the earliest deadline first; ties keep arm order.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .fire_at_ms
            .cmp(&self.fire_at_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
pub(crate) struct Scheduler {
    heap: Mutex<BinaryHeap<ArmedRule>>,
    next_seq: AtomicU64,
    wakeup: Notify,
    max_tick: Duration,
}

impl Scheduler {
    pub(crate) fn new(max_tick: Duration) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
            wakeup: Notify::new(),
            max_tick: max_tick.max(Duration::from_millis(1)),
        }
    }

    /// Arms one rule per `(queue, fire_at_ms)` pair for the same event.
    pub(crate) fn arm<I>(&self, event: Arc<ScheduledEvent>, rules: I) -> usize
    where
        I: IntoIterator<Item = (Arc<QueueState>, u64)>,
    {
        let mut heap = self.heap.lock();
        let mut armed = 0usize;
        for (queue, fire_at_ms) in rules {
            queue.add_pending(1);
            heap.push(ArmedRule {
                fire_at_ms,
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                queue,
                event: Arc::clone(&event),
            });
            armed += 1;
        }
        drop(heap);
        // Stored permit covers the case where the driver is between checks.
        self.wakeup.notify_one();
        armed
    }

    /// Pops every rule due at or before `now_ms`, earliest first.
    pub(crate) fn pop_due(&self, now_ms: u64) -> Vec<ArmedRule> {
        let mut heap = self.heap.lock();
        let mut due = Vec::new();
        while heap.peek().is_some_and(|rule| rule.fire_at_ms <= now_ms) {
            if let Some(rule) = heap.pop() {
                due.push(rule);
            }
        }
        due
    }

    /// How long the driver may sleep before the next deadline, capped at `max_tick`.
    pub(crate) fn sleep_for(&self, now_ms: u64) -> Duration {
        match self.heap.lock().peek() {
            Some(rule) => Duration::from_millis(rule.fire_at_ms.saturating_sub(now_ms))
                .min(self.max_tick),
            None => self.max_tick,
        }
    }

    /// Drops every armed rule targeting `queue`. Returns how many were cancelled.
    pub(crate) fn cancel_queue(&self, queue: &Arc<QueueState>) -> usize {
        let mut heap = self.heap.lock();
        let before = heap.len();
        heap.retain(|rule| !Arc::ptr_eq(&rule.queue, queue));
        let cancelled = before - heap.len();
        drop(heap);
        queue.sub_pending(cancelled as u64);
        cancelled
    }

    pub(crate) async fn wait(&self, now_ms: u64) {
        let sleep = self.sleep_for(now_ms);
        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = self.wakeup.notified() => {}
        }
    }

    #[cfg(test)]
    pub(crate) fn armed(&self) -> usize {
        self.heap.lock().len()
    }
}
