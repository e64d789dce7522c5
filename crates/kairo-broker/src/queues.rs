// Queue registry and per-queue delivery state.
// A queue is only an identity plus a fan-out point: fired rules land here and
// are copied into every channel buffer watching the queue.
use crate::channels::ChannelBuffer;
use crate::{BrokerError, DeliveredEvent, Result};
use ahash::RandomState;
use arc_swap::ArcSwap;
use hashbrown::HashMap;
use kairo_common::ids::ChannelId;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Point-in-time view of a registered queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub id: String,
    /// Armed rules targeting this queue that have not fired yet.
    pub pending_events: u64,
    /// Rules that fired into this queue since it was created.
    pub delivered_events: u64,
}

#[derive(Debug)]
pub(crate) struct QueueState {
    id: Arc<str>,
    created_seq: u64,
    deleted: AtomicBool,
    pending: AtomicU64,
    // Serializes deliveries so every watcher sees the same arrival order.
    delivery: Mutex<QueueDeliveryState>,
    // Snapshot read on the delivery path; rebuilt on attach/detach.
    watchers_snapshot: ArcSwap<Vec<Arc<ChannelBuffer>>>,
    watchers: Mutex<HashMap<ChannelId, Arc<ChannelBuffer>, RandomState>>,
}

// Fired events are not kept here. They fan out straight into the attached
// channel buffers, and a channel only sees events fired after it attached.
#[derive(Debug, Default)]
struct QueueDeliveryState {
    delivered: u64,
}

impl QueueState {
    fn new(id: &str, created_seq: u64) -> Self {
        Self {
            id: Arc::from(id),
            created_seq,
            deleted: AtomicBool::new(false),
            pending: AtomicU64::new(0),
            delivery: Mutex::new(QueueDeliveryState::default()),
            watchers_snapshot: ArcSwap::from_pointee(Vec::new()),
            watchers: Mutex::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    pub(crate) fn id(&self) -> &Arc<str> {
        &self.id
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn info(&self) -> QueueInfo {
        QueueInfo {
            id: self.id.to_string(),
            pending_events: self.pending.load(Ordering::Relaxed),
            delivered_events: self.delivery.lock().delivered,
        }
    }

    pub(crate) fn add_pending(&self, n: u64) {
        self.pending.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn sub_pending(&self, n: u64) {
        let _ = self
            .pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(n))
            });
    }

    /// Counts a fired event and copies it into every attached channel buffer.
    /// Returns how many buffers accepted it.
    pub(crate) fn deliver(&self, event: &DeliveredEvent) -> usize {
        let mut delivery = self.delivery.lock();
        delivery.delivered += 1;
        // Lock order: queue delivery state, then channel buffer.
        let watchers = self.watchers_snapshot.load();
        watchers
            .iter()
            .filter(|buffer| buffer.push(event.clone()))
            .count()
    }

    pub(crate) fn attach(&self, buffer: Arc<ChannelBuffer>) {
        let mut watchers = self.watchers.lock();
        watchers.insert(*buffer.id(), buffer);
        self.rebuild_watchers_snapshot(&watchers);
    }

    pub(crate) fn detach(&self, channel_id: &ChannelId) {
        let mut watchers = self.watchers.lock();
        if watchers.remove(channel_id).is_some() {
            self.rebuild_watchers_snapshot(&watchers);
        }
    }

    fn rebuild_watchers_snapshot(
        &self,
        watchers: &HashMap<ChannelId, Arc<ChannelBuffer>, RandomState>,
    ) {
        let snapshot = watchers.values().cloned().collect::<Vec<_>>();
        self.watchers_snapshot.store(Arc::new(snapshot));
    }

    // Marks the queue dead and drops its channel links so no cycle outlives it.
    fn retire(&self) {
        self.deleted.store(true, Ordering::Release);
        let mut watchers = self.watchers.lock();
        watchers.clear();
        self.rebuild_watchers_snapshot(&watchers);
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self) -> usize {
        self.watchers.lock().len()
    }
}

#[derive(Debug)]
pub(crate) struct QueueRegistry {
    queues: RwLock<HashMap<String, Arc<QueueState>, RandomState>>,
    next_seq: AtomicU64,
}

impl QueueRegistry {
    pub(crate) fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::with_hasher(RandomState::new())),
            next_seq: AtomicU64::new(0),
        }
    }

    pub(crate) async fn create(&self, id: &str) -> Result<bool> {
        if id.trim().is_empty() {
            return Err(BrokerError::InvalidQueueId);
        }
        let mut guard = self.queues.write().await;
        // Duplicate creates are accepted and leave the existing queue untouched.
        if guard.contains_key(id) {
            return Ok(false);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        guard.insert(id.to_string(), Arc::new(QueueState::new(id, seq)));
        Ok(true)
    }

    pub(crate) async fn list(&self) -> Vec<QueueInfo> {
        let guard = self.queues.read().await;
        let mut queues = guard.values().cloned().collect::<Vec<_>>();
        drop(guard);
        queues.sort_by_key(|queue| queue.created_seq);
        queues.iter().map(|queue| queue.info()).collect()
    }

    pub(crate) async fn get(&self, id: &str) -> Result<Arc<QueueState>> {
        self.queues
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BrokerError::QueueNotFound(id.to_string()))
    }

    pub(crate) async fn remove(&self, id: &str) -> Result<Arc<QueueState>> {
        let removed = self
            .queues
            .write()
            .await
            .remove(id)
            .ok_or_else(|| BrokerError::QueueNotFound(id.to_string()))?;
        removed.retire();
        Ok(removed)
    }

    /// Resolves every id under one read lock; fails on the first unknown queue.
    pub(crate) async fn resolve<'a, I>(&self, ids: I) -> Result<Vec<Arc<QueueState>>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let guard = self.queues.read().await;
        ids.into_iter()
            .map(|id| {
                guard
                    .get(id)
                    .cloned()
                    .ok_or_else(|| BrokerError::QueueNotFound(id.to_string()))
            })
            .collect()
    }
}
