//! Prioritized publish/subscribe message bus
//!
//! Messages are delivered either immediately ([`EventBus::publish`]) or
//! through a bounded priority queue drained in batches
//! ([`EventBus::publish_async`], [`EventBus::process_queue`]). Queued
//! messages whose TTL has elapsed are dropped instead of delivered.
//! Subscriber failures are logged and counted, never propagated.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::handler::Handler;

/// Unique message identifier, increasing in publish order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

/// Unique subscriber identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(pub u64);

/// Source name used when the publisher does not set one.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// A published message.
#[derive(Debug, Clone, Serialize)]
pub struct BusMessage {
    pub id: MessageId,
    pub message_type: String,
    /// Opaque payload
    pub data: Value,
    pub source: String,
    /// Name of the only subscriber that should receive this message
    pub target: Option<String>,
    #[serde(skip)]
    pub timestamp: Instant,
    /// Higher is delivered first
    pub priority: i32,
    pub ttl: Option<Duration>,
    pub metadata: Option<Value>,
}

impl BusMessage {
    /// Whether the TTL elapsed by `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(self.timestamp) > ttl)
    }
}

/// Optional fields for a publish call.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub source: Option<String>,
    pub target: Option<String>,
    pub priority: i32,
    pub ttl: Option<Duration>,
    pub metadata: Option<Value>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Predicate deciding whether a subscriber sees a message.
pub type MessageFilter = Arc<dyn Fn(&BusMessage) -> bool + Send + Sync>;

/// Wrap a closure as a [`MessageFilter`].
pub fn message_filter<F>(f: F) -> MessageFilter
where
    F: Fn(&BusMessage) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

struct Subscriber {
    id: SubscriberId,
    name: String,
    handler: Handler<BusMessage>,
    filter: Option<MessageFilter>,
    active: bool,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("handler", &self.handler)
            .field("filtered", &self.filter.is_some())
            .field("active", &self.active)
            .finish()
    }
}

/// Public view of a registered subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    pub name: String,
    pub active: bool,
}

/// Queue and history limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum queued messages before the lowest priority one is evicted
    pub queue_capacity: usize,
    /// Delivered messages kept for inspection
    pub history_limit: usize,
    /// Messages delivered between cooperative yields
    pub batch_size: usize,
    /// Queue length above which `validate` warns
    pub queue_warn_threshold: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            history_limit: 500,
            batch_size: 10,
            queue_warn_threshold: 800,
        }
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    /// Dropped because their TTL elapsed while queued
    pub expired: u64,
    /// Dropped to make room in a full queue
    pub evicted: u64,
    pub handler_errors: u64,
}

/// Selects messages from the history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryFilter {
    pub message_type: Option<String>,
    pub source: Option<String>,
    /// Keep only the most recent `limit` matches
    pub limit: Option<usize>,
}

impl HistoryFilter {
    fn accepts(&self, message: &BusMessage) -> bool {
        self.message_type
            .as_ref()
            .is_none_or(|t| *t == message.message_type)
            && self.source.as_ref().is_none_or(|s| *s == message.source)
    }
}

#[derive(Debug, Default)]
struct BusState {
    subscribers: Vec<Subscriber>,
    queue: VecDeque<BusMessage>,
    history: VecDeque<BusMessage>,
    next_message_id: u64,
    next_subscriber_id: u64,
    paused: bool,
    stats: BusStats,
}

// Buses whose queue is being drained by the current task.
tokio::task_local! {
    static DRAINING: Vec<usize>;
}

fn evict_lowest(state: &mut BusState) {
    // the queue is sorted by descending priority: the back is the lowest
    if let Some(evicted) = state.queue.pop_back() {
        state.stats.evicted += 1;
        warn!(
            message = evicted.id.0,
            message_type = %evicted.message_type,
            priority = evicted.priority,
            "Queue full, evicted lowest priority message"
        );
    }
}

struct Delivery {
    name: String,
    handler: Handler<BusMessage>,
    filter: Option<MessageFilter>,
}

/// Prioritized publish/subscribe bus.
///
/// All methods take `&self`; share the bus with `Arc<EventBus>`. Internal
/// state sits behind a mutex that is never held while a handler runs, so
/// handlers may publish back into the bus.
pub struct EventBus {
    config: BusConfig,
    state: Mutex<BusState>,
    processing: tokio::sync::Mutex<()>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("subscribers", &state.subscribers.len())
            .field("queued", &state.queue.len())
            .field("paused", &state.paused)
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BusState::default()),
            processing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        handler: Handler<BusMessage>,
        filter: Option<MessageFilter>,
    ) -> SubscriberId {
        let mut state = self.state();
        state.next_subscriber_id += 1;
        let id = SubscriberId(state.next_subscriber_id);
        let name = name.into();
        debug!(subscriber = id.0, name = %name, "Subscriber added");
        state.subscribers.push(Subscriber {
            id,
            name,
            handler,
            filter,
            active: true,
        });
        id
    }

    /// Remove a subscriber. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut state = self.state();
        let before = state.subscribers.len();
        state.subscribers.retain(|s| s.id != id);
        before != state.subscribers.len()
    }

    /// Mark a subscriber active or inactive. Inactive subscribers stay
    /// registered but receive nothing.
    pub fn set_subscriber_active(&self, id: SubscriberId, active: bool) -> bool {
        let mut state = self.state();
        match state.subscribers.iter_mut().find(|s| s.id == id) {
            Some(subscriber) => {
                subscriber.active = active;
                true
            }
            None => false,
        }
    }

    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        self.state()
            .subscribers
            .iter()
            .map(|s| SubscriberInfo {
                id: s.id,
                name: s.name.clone(),
                active: s.active,
            })
            .collect()
    }

    fn build_message(
        &self,
        message_type: impl Into<String>,
        data: Value,
        options: PublishOptions,
    ) -> BusMessage {
        let mut state = self.state();
        state.next_message_id += 1;
        state.stats.published += 1;
        BusMessage {
            id: MessageId(state.next_message_id),
            message_type: message_type.into(),
            data,
            source: options.source.unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
            target: options.target,
            timestamp: Instant::now(),
            priority: options.priority,
            ttl: options.ttl,
            metadata: options.metadata,
        }
    }

    /// Deliver a message to subscribers right away.
    ///
    /// Asynchronous subscribers are spawned rather than awaited. While the
    /// bus is paused the message is queued instead.
    pub fn publish(
        &self,
        message_type: impl Into<String>,
        data: Value,
        options: PublishOptions,
    ) -> MessageId {
        let message = self.build_message(message_type, data, options);
        let id = message.id;
        if self.is_paused() {
            self.insert_queued(message);
            return id;
        }

        for delivery in self.deliveries(&message) {
            if let Err(error) = delivery.handler.call_now(&message, &delivery.name) {
                self.record_handler_error(&delivery.name, &message, &error.to_string());
            }
        }
        self.record_delivered(message);
        id
    }

    /// Queue a message and wait until the queue has been drained.
    pub async fn publish_async(
        &self,
        message_type: impl Into<String>,
        data: Value,
        options: PublishOptions,
    ) -> MessageId {
        let id = self.enqueue(message_type, data, options);
        self.process_queue().await;
        id
    }

    /// Queue a message without processing the queue.
    pub fn enqueue(
        &self,
        message_type: impl Into<String>,
        data: Value,
        options: PublishOptions,
    ) -> MessageId {
        let message = self.build_message(message_type, data, options);
        let id = message.id;
        self.insert_queued(message);
        id
    }

    fn insert_queued(&self, message: BusMessage) {
        let mut state = self.state();
        if self.config.queue_capacity > 0 && state.queue.len() >= self.config.queue_capacity {
            evict_lowest(&mut state);
        }
        let index = state
            .queue
            .partition_point(|queued| queued.priority >= message.priority);
        state.queue.insert(index, message);
    }

    /// Put undelivered messages back in priority order, ahead of later
    /// messages of equal priority, then trim to capacity.
    fn requeue(&self, messages: Vec<BusMessage>) {
        let mut state = self.state();
        for message in messages {
            let index = state.queue.partition_point(|queued| {
                queued.priority > message.priority
                    || (queued.priority == message.priority && queued.id < message.id)
            });
            state.queue.insert(index, message);
        }
        if self.config.queue_capacity > 0 {
            while state.queue.len() > self.config.queue_capacity {
                evict_lowest(&mut state);
            }
        }
    }

    /// Drain the queue in batches, yielding between batches.
    ///
    /// Expired messages are skipped. Stops early when the bus is paused.
    /// Returns the number of messages delivered by this call.
    ///
    /// Called from a subscriber of a drain already running on this task
    /// (for example through [`publish_async`](Self::publish_async)), it
    /// returns 0 at once: the running drain delivers what was queued.
    pub async fn process_queue(&self) -> usize {
        let key = self.drain_key();
        let mut draining = DRAINING.try_with(Clone::clone).unwrap_or_default();
        if draining.contains(&key) {
            trace!("Drain already running on this task, leaving message queued");
            return 0;
        }
        draining.push(key);
        DRAINING.scope(draining, self.drain()).await
    }

    fn drain_key(&self) -> usize {
        self as *const EventBus as usize
    }

    async fn drain(&self) -> usize {
        let _guard = self.processing.lock().await;
        let batch_size = self.config.batch_size.max(1);
        let mut delivered = 0;

        loop {
            let batch: Vec<BusMessage> = {
                let mut state = self.state();
                if state.paused || state.queue.is_empty() {
                    break;
                }
                let n = batch_size.min(state.queue.len());
                state.queue.drain(..n).collect()
            };

            let mut remaining = batch.into_iter();
            while let Some(message) = remaining.next() {
                if self.is_paused() {
                    self.requeue(std::iter::once(message).chain(remaining).collect());
                    return delivered;
                }
                if message.is_expired(Instant::now()) {
                    self.state().stats.expired += 1;
                    debug!(
                        message = message.id.0,
                        message_type = %message.message_type,
                        "Dropping expired message"
                    );
                    continue;
                }
                self.deliver(&message).await;
                self.record_delivered(message);
                delivered += 1;
            }

            tokio::task::yield_now().await;
        }

        delivered
    }

    async fn deliver(&self, message: &BusMessage) {
        for delivery in self.deliveries(message) {
            if let Err(error) = delivery.handler.call(message).await {
                self.record_handler_error(&delivery.name, message, &error.to_string());
            }
        }
    }

    /// Active subscribers that accept `message`. Filters run outside the lock.
    fn deliveries(&self, message: &BusMessage) -> Vec<Delivery> {
        let candidates: Vec<Delivery> = self
            .state()
            .subscribers
            .iter()
            .filter(|s| s.active)
            .filter(|s| message.target.as_ref().is_none_or(|t| *t == s.name))
            .map(|s| Delivery {
                name: s.name.clone(),
                handler: s.handler.clone(),
                filter: s.filter.clone(),
            })
            .collect();

        candidates
            .into_iter()
            .filter(|d| match &d.filter {
                None => true,
                Some(filter) => match catch_unwind(AssertUnwindSafe(|| filter(message))) {
                    Ok(accepted) => accepted,
                    Err(_) => {
                        self.record_handler_error(&d.name, message, "filter panicked");
                        false
                    }
                },
            })
            .collect()
    }

    fn record_handler_error(&self, subscriber: &str, message: &BusMessage, error: &str) {
        self.state().stats.handler_errors += 1;
        warn!(
            subscriber = %subscriber,
            message = message.id.0,
            message_type = %message.message_type,
            %error,
            "Subscriber failed to handle message"
        );
    }

    fn record_delivered(&self, message: BusMessage) {
        let mut state = self.state();
        state.stats.delivered += 1;
        state.history.push_back(message);
        while state.history.len() > self.config.history_limit {
            state.history.pop_front();
        }
    }

    /// Stop delivering. Queued messages are kept.
    pub fn pause(&self) {
        self.state().paused = true;
        debug!("Bus paused");
    }

    /// Allow delivery again. Call [`process_queue`](Self::process_queue) to
    /// drain what accumulated; messages that expired meanwhile are dropped.
    pub fn resume(&self) {
        self.state().paused = false;
        debug!("Bus resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    /// Discard every queued message. Returns how many were dropped.
    pub fn clear_queue(&self) -> usize {
        let mut state = self.state();
        let dropped = state.queue.len();
        state.queue.clear();
        dropped
    }

    pub fn queue_len(&self) -> usize {
        self.state().queue.len()
    }

    /// Delivered messages matching `filter`, oldest first.
    pub fn message_history(&self, filter: &HistoryFilter) -> Vec<BusMessage> {
        let state = self.state();
        let matching: Vec<BusMessage> = state
            .history
            .iter()
            .filter(|m| filter.accepts(m))
            .cloned()
            .collect();
        match filter.limit {
            Some(limit) if matching.len() > limit => matching[matching.len() - limit..].to_vec(),
            _ => matching,
        }
    }

    pub fn clear_history(&self) {
        self.state().history.clear();
    }

    pub fn stats(&self) -> BusStats {
        self.state().stats
    }

    /// Report non-fatal operational warnings.
    pub fn validate(&self) -> Vec<String> {
        let state = self.state();
        let mut warnings = Vec::new();

        if state.queue.len() > self.config.queue_warn_threshold {
            warnings.push(format!(
                "Queue size {} exceeds warning threshold {}",
                state.queue.len(),
                self.config.queue_warn_threshold
            ));
        }
        if state.subscribers.is_empty() {
            warnings.push("No subscribers registered".to_string());
        } else if state.subscribers.iter().all(|s| !s.active) {
            warnings.push(format!(
                "All {} subscribers are inactive",
                state.subscribers.len()
            ));
        }
        if state.paused && !state.queue.is_empty() {
            warnings.push(format!(
                "Bus is paused with {} queued messages",
                state.queue.len()
            ));
        }
        if state.stats.handler_errors > 0 {
            warnings.push(format!(
                "{} subscriber failures recorded",
                state.stats.handler_errors
            ));
        }

        warnings
    }

    /// A facade that publishes with `name` as the source and only sees
    /// messages from that source.
    pub fn channel(self: &Arc<Self>, name: impl Into<String>) -> Channel {
        Channel {
            bus: Arc::clone(self),
            name: name.into(),
        }
    }
}

/// Named facade over an [`EventBus`].
#[derive(Debug, Clone)]
pub struct Channel {
    bus: Arc<EventBus>,
    name: String,
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Publish with this channel as the source.
    pub fn publish(
        &self,
        message_type: impl Into<String>,
        data: Value,
        options: PublishOptions,
    ) -> MessageId {
        self.bus
            .publish(message_type, data, options.source(self.name.as_str()))
    }

    pub async fn publish_async(
        &self,
        message_type: impl Into<String>,
        data: Value,
        options: PublishOptions,
    ) -> MessageId {
        self.bus
            .publish_async(message_type, data, options.source(self.name.as_str()))
            .await
    }

    /// Subscribe to messages from this channel's source, optionally narrowed
    /// by `filter`. The subscriber is named after the channel.
    pub fn subscribe(
        &self,
        handler: Handler<BusMessage>,
        filter: Option<MessageFilter>,
    ) -> SubscriberId {
        let source = self.name.clone();
        let scoped = message_filter(move |message| {
            message.source == source && filter.as_ref().is_none_or(|f| f(message))
        });
        self.bus.subscribe(self.name.as_str(), handler, Some(scoped))
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.bus.unsubscribe(id)
    }
}
