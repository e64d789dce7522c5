// Live push fan-out keyed by category.
// Each subscriber owns a bounded queue. Publish never waits; a full queue
// drops that subscriber's push.
use crate::DeliveredEvent;
use ahash::RandomState;
use arc_swap::ArcSwap;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use slab::Slab;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct CategoryState {
    // Lock-free read on publish; rebuilt on subscribe/unsubscribe.
    snapshot: ArcSwap<Vec<mpsc::Sender<DeliveredEvent>>>,
    senders: Mutex<Slab<mpsc::Sender<DeliveredEvent>>>,
}

impl CategoryState {
    fn rebuild_snapshot(&self, senders: &Slab<mpsc::Sender<DeliveredEvent>>) {
        let snapshot = senders
            .iter()
            .map(|(_, sender)| sender.clone())
            .collect::<Vec<_>>();
        self.snapshot.store(Arc::new(snapshot));
    }
}

#[derive(Debug)]
struct GatewayInner {
    categories: RwLock<HashMap<Arc<str>, Arc<CategoryState>, RandomState>>,
    queue_capacity: usize,
    subscribers: AtomicUsize,
}

impl GatewayInner {
    fn remove_subscriber(&self, category: &str, id: usize) {
        let mut categories = self.categories.write();
        let Some(state) = categories.get(category).cloned() else {
            return;
        };
        let mut senders = state.senders.lock();
        if !senders.contains(id) {
            return;
        }
        senders.remove(id);
        state.rebuild_snapshot(&senders);
        let now_empty = senders.is_empty();
        drop(senders);
        if now_empty {
            categories.remove(category);
        }
        let remaining = self.subscribers.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::gauge!("kairo_stream_subscribers").set(remaining as f64);
    }
}

/// Category-keyed registry of live subscribers.
#[derive(Debug, Clone)]
pub struct StreamingGateway {
    inner: Arc<GatewayInner>,
}

impl StreamingGateway {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                categories: RwLock::new(HashMap::with_hasher(RandomState::new())),
                queue_capacity,
                subscribers: AtomicUsize::new(0),
            }),
        }
    }

    /// Registers a subscriber that receives every event published on `category`
    /// from now on. Dropping the subscription unregisters it.
    pub fn subscribe(&self, category: &str) -> StreamSubscription {
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        let mut categories = self.inner.categories.write();
        let (key, state) = match categories.get_key_value(category) {
            Some((key, state)) => (Arc::clone(key), Arc::clone(state)),
            None => {
                let key: Arc<str> = Arc::from(category);
                let state = Arc::new(CategoryState::default());
                categories.insert(Arc::clone(&key), Arc::clone(&state));
                (key, state)
            }
        };
        let mut senders = state.senders.lock();
        let id = senders.insert(tx);
        state.rebuild_snapshot(&senders);
        drop(senders);
        drop(categories);

        let total = self.inner.subscribers.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!("kairo_stream_subscribers").set(total as f64);
        tracing::debug!(category = %key, subscriber = id, "stream subscriber registered");
        StreamSubscription {
            receiver: rx,
            _guard: SubscriptionGuard {
                gateway: Arc::downgrade(&self.inner),
                category: key,
                id,
            },
        }
    }

    /// Pushes an event to every subscriber of its category. Returns how many
    /// subscribers accepted it.
    pub fn publish(&self, event: &DeliveredEvent) -> usize {
        let Some(state) = self.inner.categories.read().get(&*event.category).cloned() else {
            return 0;
        };
        let subscribers = state.snapshot.load_full();
        let mut sent = 0usize;
        for sender in subscribers.iter() {
            match sender.try_reserve() {
                Ok(permit) => {
                    permit.send(event.clone());
                    sent += 1;
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::counter!("kairo_stream_dropped_total").increment(1);
                }
                // The subscription guard unregisters closed receivers; slab ids
                // are reused, so removing here could hit a newer subscriber.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        if sent > 0 {
            metrics::counter!("kairo_stream_pushed_total").increment(sent as u64);
        }
        sent
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.load(Ordering::Relaxed)
    }
}

/// RAII handle that unregisters a stream subscriber on drop.
#[derive(Debug)]
struct SubscriptionGuard {
    gateway: Weak<GatewayInner>,
    category: Arc<str>,
    id: usize,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(gateway) = self.gateway.upgrade() {
            gateway.remove_subscriber(&self.category, self.id);
        }
    }
}

/// Live subscription to one category. No replay: only events published after
/// `subscribe` returned are received.
#[derive(Debug)]
pub struct StreamSubscription {
    receiver: mpsc::Receiver<DeliveredEvent>,
    _guard: SubscriptionGuard,
}

impl StreamSubscription {
    pub async fn recv(&mut self) -> Option<DeliveredEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> std::result::Result<DeliveredEvent, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}
