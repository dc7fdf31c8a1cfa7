//! Live progress log shared by every batch in the process.
//!
//! Events land in a bounded ring buffer (oldest evicted first) and are pushed
//! to every registered [`LogSink`] in the same critical section, so all
//! subscribers observe the ring's order. Streaming consumers get their own
//! bounded queue via [`LiveLog::stream`]; a slow consumer loses its oldest
//! undelivered events rather than stalling the publisher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

use crate::constants::{LIVE_LOG_CAPACITY, SUBSCRIBER_QUEUE_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub type SubscriberId = Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber is closed")]
    Closed,
    #[error("subscriber rejected event: {0}")]
    Rejected(String),
}

/// Delivery target for published events.
///
/// `deliver` runs while the broadcaster holds its lock: it must not block and
/// must not call back into the same [`LiveLog`].
pub trait LogSink: Send + Sync {
    fn deliver(&self, event: &LogEvent) -> Result<(), DeliveryError>;

    /// Called once when the sink is unregistered.
    fn close(&self) {}
}

impl<F> LogSink for F
where
    F: Fn(&LogEvent) -> Result<(), DeliveryError> + Send + Sync,
{
    fn deliver(&self, event: &LogEvent) -> Result<(), DeliveryError> {
        self(event)
    }
}

/// Bounded per-subscriber queue; overflow evicts the oldest entry.
struct SubscriberQueue {
    events: Mutex<VecDeque<LogEvent>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event: LogEvent) {
        {
            let mut events = self.lock();
            events.push_back(event);
            while events.len() > self.capacity {
                events.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<LogEvent> {
        self.lock().pop_front()
    }
}

impl LogSink for SubscriberQueue {
    fn deliver(&self, event: &LogEvent) -> Result<(), DeliveryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DeliveryError::Closed);
        }
        self.push(event.clone());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

struct State {
    buffer: VecDeque<LogEvent>,
    subscribers: HashMap<SubscriberId, Arc<dyn LogSink>>,
}

struct Shared {
    state: Mutex<State>,
    capacity: usize,
    queue_capacity: usize,
}

/// Cheap to clone; all clones share one buffer and subscriber set.
#[derive(Clone)]
pub struct LiveLog {
    shared: Arc<Shared>,
}

impl Default for LiveLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LiveLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveLog")
            .field("capacity", &self.shared.capacity)
            .field("buffered", &self.len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl LiveLog {
    pub fn new() -> Self {
        Self::with_capacity(LIVE_LOG_CAPACITY, SUBSCRIBER_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize, queue_capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    buffer: VecDeque::with_capacity(capacity),
                    subscribers: HashMap::new(),
                }),
                capacity,
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer the event and fan it out to every current subscriber.
    pub fn publish(&self, event: LogEvent) {
        let mut state = self.lock();
        state.buffer.push_back(event);
        while state.buffer.len() > self.shared.capacity {
            state.buffer.pop_front();
        }
        let Some(event) = state.buffer.back() else {
            return;
        };
        for (id, sink) in state.subscribers.iter() {
            if let Err(e) = sink.deliver(event) {
                warn!(subscriber = %id, error = %e, "Failed to deliver live log event");
            }
        }
    }

    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        let mut event = LogEvent::new(level, message);
        event.details = details;
        self.publish(event);
    }

    pub fn info(&self, message: impl Into<String>, details: Option<serde_json::Value>) {
        self.log(LogLevel::Info, message, details);
    }

    pub fn success(&self, message: impl Into<String>, details: Option<serde_json::Value>) {
        self.log(LogLevel::Success, message, details);
    }

    pub fn warning(&self, message: impl Into<String>, details: Option<serde_json::Value>) {
        self.log(LogLevel::Warning, message, details);
    }

    pub fn error(&self, message: impl Into<String>, details: Option<serde_json::Value>) {
        self.log(LogLevel::Error, message, details);
    }

    /// Register a sink. Returns false (and keeps the existing sink) if the id is taken.
    pub fn subscribe(&self, id: SubscriberId, sink: Arc<dyn LogSink>) -> bool {
        let mut state = self.lock();
        if state.subscribers.contains_key(&id) {
            return false;
        }
        state.subscribers.insert(id, sink);
        true
    }

    /// Remove a sink. Idempotent; returns whether anything was removed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.lock().subscribers.remove(&id);
        match removed {
            Some(sink) => {
                sink.close();
                true
            }
            None => false,
        }
    }

    /// The last `n` buffered events, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LogEvent> {
        let state = self.lock();
        let skip = state.buffer.len().saturating_sub(n);
        state.buffer.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Open a streaming subscription primed with the last `replay` events.
    ///
    /// Replay and registration happen under one lock, so the stream sees every
    /// event exactly once. Dropping the returned handle unsubscribes.
    pub fn stream(&self, replay: usize) -> LogStream {
        let id = Uuid::new_v4();
        let queue = Arc::new(SubscriberQueue::new(self.shared.queue_capacity));
        {
            let mut state = self.lock();
            let skip = state.buffer.len().saturating_sub(replay);
            for event in state.buffer.iter().skip(skip) {
                queue.push(event.clone());
            }
            state
                .subscribers
                .insert(id, queue.clone() as Arc<dyn LogSink>);
        }
        crate::observability::metrics::live_log::active_subscribers(self.subscriber_count());
        LogStream {
            id,
            queue,
            log: self.clone(),
        }
    }
}

/// Receiving end of [`LiveLog::stream`].
pub struct LogStream {
    id: SubscriberId,
    queue: Arc<SubscriberQueue>,
    log: LiveLog,
}

impl LogStream {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Events evicted from this subscriber's queue because it fell behind.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn try_recv(&mut self) -> Option<LogEvent> {
        self.queue.pop()
    }

    /// Wait for the next event. Returns `None` once the subscription is
    /// closed and its queue drained.
    pub async fn recv(&mut self) -> Option<LogEvent> {
        loop {
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Forward events to `handler` until `cancelled` resolves or the
    /// subscription closes. On cancellation the subscription is removed
    /// first, then anything already queued is handed over. Returns the
    /// number of events forwarded.
    pub async fn run_until<F, H>(mut self, cancelled: F, mut handler: H) -> usize
    where
        F: Future<Output = ()>,
        H: FnMut(LogEvent),
    {
        tokio::pin!(cancelled);
        let mut forwarded = 0;
        loop {
            tokio::select! {
                _ = &mut cancelled => {
                    self.log.unsubscribe(self.id);
                    while let Some(event) = self.queue.pop() {
                        handler(event);
                        forwarded += 1;
                    }
                    break;
                }
                next = self.recv() => match next {
                    Some(event) => {
                        handler(event);
                        forwarded += 1;
                    }
                    None => break,
                },
            }
        }
        forwarded
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.log.unsubscribe(self.id);
        crate::observability::metrics::live_log::active_subscribers(self.log.subscriber_count());
    }
}
