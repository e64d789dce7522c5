// Channel buffers and the channel registry.
// Timers only append into a buffer; dequeue swaps the whole buffer out under
// the same lock, so a reader never observes a partial flush.
use crate::queues::QueueState;
use crate::{BrokerError, DeliveredEvent, Result};
use ahash::RandomState;
use hashbrown::HashMap;
use kairo_common::BufferOptions;
use kairo_common::clock;
use kairo_common::ids::ChannelId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

static GLOBAL_BUFFERED_EVENTS: AtomicUsize = AtomicUsize::new(0);

/// Point-in-time view of a channel, including its buffer status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel_id: ChannelId,
    pub queues: Vec<String>,
    pub buffer_options: BufferOptions,
    pub buffered_events: usize,
    /// Either flush threshold has been met since the last dequeue.
    pub ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushTrigger {
    Size,
    Time,
    Poll,
}

impl FlushTrigger {
    fn as_str(self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Time => "time",
            FlushTrigger::Poll => "poll",
        }
    }
}

#[derive(Debug, Default)]
struct BufferState {
    events: VecDeque<DeliveredEvent>,
    // Arrival of the oldest event not yet dequeued.
    first_arrival: Option<Instant>,
}

impl BufferState {
    fn trigger(&self, options: &BufferOptions) -> FlushTrigger {
        if self.events.len() >= options.size {
            return FlushTrigger::Size;
        }
        match self.first_arrival {
            Some(first) if first.elapsed() >= Duration::from_millis(options.time) => {
                FlushTrigger::Time
            }
            _ => FlushTrigger::Poll,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ChannelBuffer {
    id: ChannelId,
    // Kept exactly as requested so reads round-trip.
    queues: Vec<String>,
    options: BufferOptions,
    capacity: usize,
    created_seq: u64,
    state: Mutex<BufferState>,
    last_touched_ms: AtomicU64,
    // Queues this buffer is attached to, for detaching on delete. `None` once
    // closed, so a late attach cannot relink a deleted channel.
    sources: Mutex<Option<Vec<Arc<QueueState>>>>,
}

impl ChannelBuffer {
    pub(crate) fn new(
        queues: Vec<String>,
        options: BufferOptions,
        capacity: usize,
        created_seq: u64,
    ) -> Self {
        Self {
            id: ChannelId::new(),
            queues,
            options,
            capacity,
            created_seq,
            state: Mutex::new(BufferState::default()),
            last_touched_ms: AtomicU64::new(clock::now_ms()),
            sources: Mutex::new(Some(Vec::new())),
        }
    }

    pub(crate) fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Appends a delivered event. Returns false when the buffer is full and the
    /// event was dropped.
    pub(crate) fn push(&self, event: DeliveredEvent) -> bool {
        let mut state = self.state.lock();
        if state.events.len() >= self.capacity {
            metrics::counter!("kairo_channel_overflow_dropped_total").increment(1);
            return false;
        }
        if state.first_arrival.is_none() {
            state.first_arrival = Some(Instant::now());
        }
        state.events.push_back(event);
        let global = GLOBAL_BUFFERED_EVENTS.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!("kairo_channel_buffered_events").set(global as f64);
        true
    }

    /// Atomically returns everything buffered, in arrival order, and empties the buffer.
    pub(crate) fn take(&self) -> Vec<DeliveredEvent> {
        let mut state = self.state.lock();
        let trigger = state.trigger(&self.options);
        let drained = std::mem::take(&mut state.events);
        state.first_arrival = None;
        drop(state);

        if !drained.is_empty() {
            release_buffered(drained.len());
            metrics::counter!("kairo_channel_dequeued_total", "trigger" => trigger.as_str())
                .increment(drained.len() as u64);
        }
        drained.into()
    }

    pub(crate) fn info(&self) -> ChannelInfo {
        let state = self.state.lock();
        let ready = !state.events.is_empty() && state.trigger(&self.options) != FlushTrigger::Poll;
        ChannelInfo {
            channel_id: self.id,
            queues: self.queues.clone(),
            buffer_options: self.options,
            buffered_events: state.events.len(),
            ready,
        }
    }

    pub(crate) fn touch(&self) {
        self.last_touched_ms.store(clock::now_ms(), Ordering::Relaxed);
    }

    fn idle_for_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_touched_ms.load(Ordering::Relaxed))
    }

    /// Attaches this buffer to each source queue once, even if a queue id repeats.
    /// Does nothing once the buffer has been closed.
    pub(crate) fn attach(self: &Arc<Self>, sources: Vec<Arc<QueueState>>) {
        let mut guard = self.sources.lock();
        let Some(attached) = guard.as_mut() else {
            return;
        };
        for source in sources {
            if attached.iter().any(|known| Arc::ptr_eq(known, &source)) {
                continue;
            }
            source.attach(Arc::clone(self));
            attached.push(source);
        }
    }

    // Unlinks from every source queue and discards whatever is still buffered.
    fn close(&self) {
        let sources = self.sources.lock().take().unwrap_or_default();
        for source in sources {
            source.detach(&self.id);
        }
        let mut state = self.state.lock();
        let dropped = state.events.len();
        state.events.clear();
        state.first_arrival = None;
        drop(state);
        release_buffered(dropped);
    }
}

fn release_buffered(n: usize) {
    if n == 0 {
        return;
    }
    if let Ok(prev) = GLOBAL_BUFFERED_EVENTS
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(n))
        })
    {
        metrics::gauge!("kairo_channel_buffered_events").set(prev.saturating_sub(n) as f64);
    }
}

#[derive(Debug)]
pub(crate) struct ChannelManager {
    channels: RwLock<HashMap<ChannelId, Arc<ChannelBuffer>, RandomState>>,
    next_seq: AtomicU64,
}

impl ChannelManager {
    pub(crate) fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::with_hasher(RandomState::new())),
            next_seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) async fn insert(&self, buffer: Arc<ChannelBuffer>) {
        self.channels.write().await.insert(buffer.id, buffer);
    }

    pub(crate) async fn list(&self) -> Vec<ChannelId> {
        let guard = self.channels.read().await;
        let mut channels = guard
            .values()
            .map(|buffer| (buffer.created_seq, buffer.id))
            .collect::<Vec<_>>();
        drop(guard);
        channels.sort_unstable_by_key(|(seq, _)| *seq);
        channels.into_iter().map(|(_, id)| id).collect()
    }

    pub(crate) async fn get(&self, id: &ChannelId) -> Result<Arc<ChannelBuffer>> {
        self.channels
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BrokerError::ChannelNotFound(id.to_string()))
    }

    pub(crate) async fn remove(&self, id: &ChannelId) -> Result<()> {
        let removed = self
            .channels
            .write()
            .await
            .remove(id)
            .ok_or_else(|| BrokerError::ChannelNotFound(id.to_string()))?;
        removed.close();
        Ok(())
    }

    /// Closes every channel untouched for at least `timeout`.
    pub(crate) async fn reap_idle(&self, timeout: Duration) -> Vec<ChannelId> {
        let now_ms = clock::now_ms();
        let timeout_ms = timeout.as_millis() as u64;
        let mut guard = self.channels.write().await;
        let idle = guard
            .values()
            .filter(|buffer| buffer.idle_for_ms(now_ms) >= timeout_ms)
            .map(|buffer| buffer.id)
            .collect::<Vec<_>>();
        for id in &idle {
            if let Some(buffer) = guard.remove(id) {
                buffer.close();
            }
        }
        idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use kairo_common::ids::EventId;

    fn event(data: &'static str) -> DeliveredEvent {
        DeliveredEvent {
            event_id: EventId::new(),
            queue: Arc::from("q"),
            category: Arc::from("q"),
            data: Bytes::from_static(data.as_bytes()),
            fire_at_ms: 0,
            fired_at_ms: 0,
        }
    }

    fn buffer(time: u64, size: usize, capacity: usize) -> ChannelBuffer {
        ChannelBuffer::new(vec!["q".into()], BufferOptions::new(time, size), capacity, 0)
    }

    #[test]
    fn take_returns_arrival_order_then_empty() {
        let buffer = buffer(60_000, 10, 16);
        assert!(buffer.push(event("one")));
        assert!(buffer.push(event("two")));
        let first = buffer
            .take()
            .into_iter()
            .map(|event| event.data)
            .collect::<Vec<_>>();
        assert_eq!(
            first,
            vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
        );
        assert!(buffer.take().is_empty());
    }

    #[test]
    fn size_threshold_marks_ready() {
        let buffer = buffer(60_000, 2, 16);
        buffer.push(event("a"));
        assert!(!buffer.info().ready);
        buffer.push(event("b"));
        let info = buffer.info();
        assert!(info.ready);
        assert_eq!(info.buffered_events, 2);
    }

    #[test]
    fn time_threshold_marks_ready() {
        let buffer = buffer(0, 100, 16);
        assert!(!buffer.info().ready, "empty buffer is never ready");
        buffer.push(event("a"));
        assert!(buffer.info().ready);
    }

    #[test]
    fn full_buffer_drops_new_events() {
        let buffer = buffer(60_000, 10, 1);
        assert!(buffer.push(event("kept")));
        assert!(!buffer.push(event("dropped")));
        let drained = buffer.take();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].data, Bytes::from_static(b"kept"));
    }

    #[test]
    fn info_round_trips_options_and_queues() {
        let buffer = ChannelBuffer::new(
            vec!["b".into(), "a".into(), "b".into()],
            BufferOptions::new(1000, 10),
            16,
            0,
        );
        let info = buffer.info();
        assert_eq!(info.queues, vec!["b", "a", "b"]);
        assert_eq!(info.buffer_options, BufferOptions::new(1000, 10));
        assert_eq!(info.channel_id, *buffer.id());
    }

    #[tokio::test]
    async fn manager_lists_in_creation_order_and_removes() {
        let manager = ChannelManager::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let seq = manager.next_seq();
            let buffer = Arc::new(ChannelBuffer::new(
                vec!["q".into()],
                BufferOptions::new(10, 1),
                8,
                seq,
            ));
            ids.push(*buffer.id());
            manager.insert(buffer).await;
        }
        assert_eq!(manager.list().await, ids);

        manager.remove(&ids[1]).await.expect("remove");
        let err = manager.get(&ids[1]).await.expect_err("gone");
        assert_eq!(err.to_string(), format!("{} channel does not exist", ids[1]));
        assert!(manager.remove(&ids[1]).await.is_err());
    }

    #[tokio::test]
    async fn reap_idle_closes_untouched_channels() {
        let manager = ChannelManager::new();
        let buffer = Arc::new(ChannelBuffer::new(
            vec!["q".into()],
            BufferOptions::new(10, 1),
            8,
            manager.next_seq(),
        ));
        let id = *buffer.id();
        manager.insert(Arc::clone(&buffer)).await;

        assert!(manager.reap_idle(Duration::from_secs(3600)).await.is_empty());
        buffer.last_touched_ms.store(0, Ordering::Relaxed);
        assert_eq!(manager.reap_idle(Duration::from_secs(1)).await, vec![id]);
        assert!(manager.get(&id).await.is_err());
    }
}
