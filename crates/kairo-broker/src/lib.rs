// In-process event scheduler.
// Queues are named fan-out points, rules fire events into queues at absolute
// wall-clock times, channels buffer what lands on their queues until polled,
// and category subscribers get every fired event pushed live.
use bytes::Bytes;
use kairo_common::BufferOptions;
use kairo_common::clock;
use kairo_common::ids::{ChannelId, EventId};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

mod channels;
mod gateway;
mod queues;
mod scheduler;

pub use channels::ChannelInfo;
pub use gateway::{StreamSubscription, StreamingGateway};
pub use queues::QueueInfo;

use channels::{ChannelBuffer, ChannelManager};
use queues::QueueRegistry;
use scheduler::{ArmedRule, ScheduledEvent, Scheduler};

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("{0} queue does not exist")]
    QueueNotFound(String),
    #[error("{0} channel does not exist")]
    ChannelNotFound(String),
    #[error("queue id must not be empty")]
    InvalidQueueId,
    #[error("schedule_rules must not be empty")]
    EmptyScheduleRules,
    #[error("queues must not be empty")]
    EmptyChannelQueues,
    #[error("invalid buffer options: {0}")]
    InvalidBufferOptions(String),
    #[error("invalid recurring options: {0}")]
    InvalidRecurrence(String),
    #[error("capacity must be greater than zero")]
    CapacityTooSmall,
}

const DEFAULT_SUBSCRIBER_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_CHANNEL_BUFFER_CAPACITY: usize = 65_536;
const DEFAULT_MAX_TICK: Duration = Duration::from_millis(250);
/// Upper bound on rules one submission may arm after recurrence expansion.
pub const MAX_OCCURRENCES_PER_EVENT: u64 = 10_000;

/// A fired event as seen by channel buffers and stream subscribers.
#[derive(Debug, Clone)]
pub struct DeliveredEvent {
    pub event_id: EventId,
    /// Queue the firing rule targeted.
    pub queue: Arc<str>,
    /// Category used for stream matching; the queue id unless the event set one.
    pub category: Arc<str>,
    pub data: Bytes,
    /// Scheduled fire time, epoch milliseconds.
    pub fire_at_ms: u64,
    /// Actual fire time, epoch milliseconds.
    pub fired_at_ms: u64,
}

/// Repeat a rule `times` times, `delay_ms` apart, starting at its fire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recurrence {
    pub times: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRule {
    pub queue: String,
    /// Absolute fire time, epoch milliseconds. Past times fire immediately.
    pub fire_at_ms: u64,
    pub recurrence: Option<Recurrence>,
}

impl ScheduleRule {
    pub fn once(queue: impl Into<String>, fire_at_ms: u64) -> Self {
        Self {
            queue: queue.into(),
            fire_at_ms,
            recurrence: None,
        }
    }

    fn occurrences(&self) -> Result<u64> {
        match self.recurrence {
            None => Ok(1),
            Some(Recurrence { times: 0, .. }) => Err(BrokerError::InvalidRecurrence(
                "times must be greater than zero".into(),
            )),
            Some(Recurrence { times, delay_ms: 0 }) if times > 1 => Err(
                BrokerError::InvalidRecurrence("delay must be greater than zero".into()),
            ),
            Some(Recurrence { times, .. }) => Ok(u64::from(times)),
        }
    }

    fn fire_times(&self) -> impl Iterator<Item = u64> + '_ {
        let (times, delay) = match self.recurrence {
            Some(recurrence) => (u64::from(recurrence.times), recurrence.delay_ms),
            None => (1, 0),
        };
        (0..times).map(move |k| self.fire_at_ms.saturating_add(k.saturating_mul(delay)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub data: Bytes,
    pub category: Option<String>,
    pub rules: Vec<ScheduleRule>,
}

impl NewEvent {
    pub fn new(data: impl Into<Bytes>, rules: Vec<ScheduleRule>) -> Self {
        Self {
            data: data.into(),
            category: None,
            rules,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// In-process scheduling broker.
///
/// ```
/// use kairo_broker::{Broker, NewEvent, ScheduleRule};
/// use kairo_common::BufferOptions;
///
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     let broker = Broker::new();
///     broker.create_queue("reminders").await.expect("queue");
///     let channel = broker
///         .create_channel(vec!["reminders".into()], BufferOptions::new(1000, 10))
///         .await
///         .expect("channel");
///     broker
///         .submit(NewEvent::new("xyz==", vec![ScheduleRule::once("reminders", 0)]))
///         .await
///         .expect("submit");
///     // Step the timers by hand instead of spawning the driver.
///     broker.fire_due(kairo_common::clock::now_ms());
///     let events = broker.dequeue(&channel).await.expect("dequeue");
///     assert_eq!(events.len(), 1);
///     assert_eq!(&events[0].data[..], b"xyz==");
/// });
/// ```
#[derive(Debug)]
pub struct Broker {
    queues: QueueRegistry,
    channels: ChannelManager,
    scheduler: Arc<Scheduler>,
    gateway: StreamingGateway,
    // Per-channel cap on buffered events before new arrivals are dropped.
    channel_buffer_capacity: usize,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self {
            queues: QueueRegistry::new(),
            channels: ChannelManager::new(),
            scheduler: Arc::new(Scheduler::new(DEFAULT_MAX_TICK)),
            gateway: StreamingGateway::new(DEFAULT_SUBSCRIBER_QUEUE_CAPACITY),
            channel_buffer_capacity: DEFAULT_CHANNEL_BUFFER_CAPACITY,
        }
    }

    pub fn with_subscriber_queue_capacity(mut self, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BrokerError::CapacityTooSmall);
        }
        self.gateway = StreamingGateway::new(capacity);
        Ok(self)
    }

    pub fn with_channel_buffer_capacity(mut self, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BrokerError::CapacityTooSmall);
        }
        self.channel_buffer_capacity = capacity;
        Ok(self)
    }

    /// Longest the timer driver sleeps between wall-clock checks.
    pub fn with_max_tick(mut self, max_tick: Duration) -> Self {
        self.scheduler = Arc::new(Scheduler::new(max_tick));
        self
    }

    /// Spawns the timer driver. It exits once the broker is dropped.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let broker = Arc::downgrade(self);
        let scheduler = Arc::clone(&self.scheduler);
        tokio::spawn(drive_timers(broker, scheduler))
    }

    pub async fn create_queue(&self, id: &str) -> Result<bool> {
        let created = self.queues.create(id).await?;
        if created {
            tracing::debug!(queue = %id, "queue created");
        }
        Ok(created)
    }

    pub async fn list_queues(&self) -> Vec<QueueInfo> {
        self.queues.list().await
    }

    pub async fn get_queue(&self, id: &str) -> Result<QueueInfo> {
        Ok(self.queues.get(id).await?.info())
    }

    /// Removes the queue and cancels its armed rules. Channels that reference it
    /// keep existing; the queue just stops feeding them.
    pub async fn delete_queue(&self, id: &str) -> Result<()> {
        let queue = self.queues.remove(id).await?;
        let cancelled = self.scheduler.cancel_queue(&queue);
        tracing::debug!(queue = %id, cancelled, "queue deleted");
        Ok(())
    }

    /// Validates and arms every rule of `event`. All target queues must exist
    /// at submission time; nothing is armed if any rule is invalid.
    pub async fn submit(&self, event: NewEvent) -> Result<EventId> {
        if event.rules.is_empty() {
            return Err(BrokerError::EmptyScheduleRules);
        }
        let mut occurrences = 0u64;
        for rule in &event.rules {
            occurrences = occurrences.saturating_add(rule.occurrences()?);
        }
        if occurrences > MAX_OCCURRENCES_PER_EVENT {
            return Err(BrokerError::InvalidRecurrence(format!(
                "{occurrences} occurrences exceeds the limit of {MAX_OCCURRENCES_PER_EVENT}"
            )));
        }
        let targets = self
            .queues
            .resolve(event.rules.iter().map(|rule| rule.queue.as_str()))
            .await?;

        let scheduled = Arc::new(ScheduledEvent {
            id: EventId::new(),
            data: event.data,
            category: event.category.map(Arc::from),
        });
        let event_id = scheduled.id;
        let armed = self.scheduler.arm(
            Arc::clone(&scheduled),
            event.rules.iter().zip(targets).flat_map(|(rule, queue)| {
                rule.fire_times()
                    .map(move |fire_at_ms| (Arc::clone(&queue), fire_at_ms))
            }),
        );
        metrics::counter!("kairo_events_scheduled_total").increment(1);
        tracing::debug!(event_id = %event_id, rules = armed, "event scheduled");
        Ok(event_id)
    }

    pub async fn create_channel(
        &self,
        queues: Vec<String>,
        options: BufferOptions,
    ) -> Result<ChannelId> {
        if queues.is_empty() {
            return Err(BrokerError::EmptyChannelQueues);
        }
        if options.size == 0 {
            return Err(BrokerError::InvalidBufferOptions(
                "size must be greater than zero".into(),
            ));
        }
        let sources = self
            .queues
            .resolve(queues.iter().map(String::as_str))
            .await?;
        let buffer = Arc::new(ChannelBuffer::new(
            queues,
            options,
            self.channel_buffer_capacity,
            self.channels.next_seq(),
        ));
        let channel_id = *buffer.id();
        buffer.attach(sources);
        self.channels.insert(Arc::clone(&buffer)).await;
        tracing::debug!(channel_id = %channel_id, "channel created");
        Ok(channel_id)
    }

    pub async fn list_channels(&self) -> Vec<ChannelId> {
        self.channels.list().await
    }

    pub async fn get_channel(&self, id: &ChannelId) -> Result<ChannelInfo> {
        let buffer = self.channels.get(id).await?;
        buffer.touch();
        Ok(buffer.info())
    }

    /// Removes the channel and discards anything still buffered.
    pub async fn delete_channel(&self, id: &ChannelId) -> Result<()> {
        self.channels.remove(id).await?;
        tracing::debug!(channel_id = %id, "channel deleted");
        Ok(())
    }

    /// Returns every buffered event in arrival order and empties the buffer.
    /// Never blocks; an empty buffer yields an empty vec.
    pub async fn dequeue(&self, id: &ChannelId) -> Result<Vec<DeliveredEvent>> {
        let buffer = self.channels.get(id).await?;
        buffer.touch();
        Ok(buffer.take())
    }

    /// Closes channels not read or inspected within `timeout`.
    pub async fn reap_idle_channels(&self, timeout: Duration) -> Vec<ChannelId> {
        let reaped = self.channels.reap_idle(timeout).await;
        for channel_id in &reaped {
            tracing::info!(channel_id = %channel_id, "idle channel closed");
        }
        reaped
    }

    pub fn subscribe(&self, category: &str) -> StreamSubscription {
        self.gateway.subscribe(category)
    }

    pub fn subscriber_count(&self) -> usize {
        self.gateway.subscriber_count()
    }

    /// Fires every armed rule due at `now_ms`, earliest first. Returns how many
    /// rules were popped. The driver started by [`Broker::start`] calls this on
    /// each tick.
    pub fn fire_due(&self, now_ms: u64) -> usize {
        let due = self.scheduler.pop_due(now_ms);
        let popped = due.len();
        for rule in due {
            self.fire(rule);
        }
        popped
    }

    fn fire(&self, rule: ArmedRule) {
        let ArmedRule {
            fire_at_ms,
            queue,
            event,
            ..
        } = rule;
        queue.sub_pending(1);
        if queue.is_deleted() {
            metrics::counter!("kairo_rule_dropped_total").increment(1);
            tracing::debug!(event_id = %event.id, queue = %queue.id(), "target queue gone, rule dropped");
            return;
        }
        let fired_at_ms = clock::now_ms();
        let delivered = DeliveredEvent {
            event_id: event.id,
            queue: Arc::clone(queue.id()),
            category: event
                .category
                .clone()
                .unwrap_or_else(|| Arc::clone(queue.id())),
            data: event.data.clone(),
            fire_at_ms,
            fired_at_ms,
        };
        let buffered = queue.deliver(&delivered);
        let pushed = self.gateway.publish(&delivered);
        metrics::counter!("kairo_rule_fired_total").increment(1);
        metrics::histogram!("kairo_fire_lateness_ms")
            .record(fired_at_ms.saturating_sub(fire_at_ms) as f64);
        tracing::trace!(
            event_id = %delivered.event_id,
            queue = %delivered.queue,
            buffered,
            pushed,
            "rule fired"
        );
    }
}

async fn drive_timers(broker: Weak<Broker>, scheduler: Arc<Scheduler>) {
    loop {
        {
            let Some(broker) = broker.upgrade() else {
                break;
            };
            broker.fire_due(clock::now_ms());
        }
        scheduler.wait(clock::now_ms()).await;
    }
    tracing::debug!("timer driver stopped");
}
