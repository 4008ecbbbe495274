use super::types::{
    Event, EventBusConfig, EventBusStats, EventHandler, EventType, Subscription,
    SubscriptionStats,
};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_SOURCE: &str = "conduit";

type SubscriptionMap = Arc<RwLock<HashMap<EventType, Vec<Arc<Subscription>>>>>;

/// An event holding one unit of capacity until its handlers have run
struct Queued {
    event: Arc<Event>,
    _permit: OwnedSemaphorePermit,
}

/// Worker-pool event bus.
///
/// Cloning is cheap; all clones share the same channel, history and
/// subscriptions. Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    config: EventBusConfig,
    sender: Mutex<Option<mpsc::Sender<Queued>>>,
    capacity: Arc<Semaphore>,
    subscriptions: SubscriptionMap,
    history: RwLock<VecDeque<Arc<Event>>>,
    published: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EventBus {
    /// Create the bus and start its workers
    #[must_use]
    pub fn new(config: EventBusConfig) -> Self {
        let capacity = config.channel_capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let subscriptions: SubscriptionMap = Arc::default();
        let shutdown = CancellationToken::new();

        let workers = (0..config.worker_count.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    receiver.clone(),
                    subscriptions.clone(),
                    config.handler_timeout,
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(
            workers = config.worker_count,
            capacity = config.channel_capacity,
            "Event bus started"
        );

        Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(sender)),
                capacity: Arc::new(Semaphore::new(capacity)),
                subscriptions,
                history: RwLock::new(VecDeque::with_capacity(config.max_history.min(1024))),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                shutdown,
                workers: Mutex::new(workers),
                config,
            }),
        }
    }

    /// Publish an event with the default source tag.
    ///
    /// The session id is taken from `data["session_id"]` when it is a string.
    pub fn publish(&self, event_type: EventType, data: Map<String, Value>) {
        let session_id = data
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.publish_from(DEFAULT_SOURCE, event_type, data, session_id);
    }

    /// Publish an event with an explicit source and session.
    ///
    /// Never blocks. Queued and in-flight events together never exceed the
    /// channel capacity; past that the event is recorded in history but not
    /// dispatched.
    pub fn publish_from(
        &self,
        source: &str,
        event_type: EventType,
        data: Map<String, Value>,
        session_id: Option<String>,
    ) {
        if self.is_closed() {
            warn!(event_type = %event_type, "Publish on closed event bus ignored");
            return;
        }

        let event = Arc::new(Event::new(event_type, source, data, session_id));
        self.push_history(event.clone());
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let Ok(permit) = self.inner.capacity.clone().try_acquire_owned() else {
            self.drop_event(&event);
            return;
        };

        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            return;
        };

        match sender.try_send(Queued {
            event,
            _permit: permit,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(queued)) => self.drop_event(&queued.event),
            Err(TrySendError::Closed(_)) => {
                debug!(event_type = %event_type, "Event channel closed");
            }
        }
    }

    /// Register a handler for one event type, returning the subscription id
    pub fn subscribe(&self, event_type: EventType, handler: EventHandler) -> String {
        let subscription = Arc::new(Subscription::new(event_type, handler));
        let id = subscription.id.clone();
        self.inner
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push(subscription);
        debug!(subscription_id = %id, event_type = %event_type, "Subscribed");
        id
    }

    /// Deactivate and remove a subscription. Returns false for unknown ids.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let mut subscriptions = self
            .inner
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut removed = None;
        for bucket in subscriptions.values_mut() {
            if let Some(pos) = bucket.iter().position(|s| s.id == subscription_id) {
                let subscription = bucket.remove(pos);
                subscription.deactivate();
                removed = Some(subscription.event_type);
                break;
            }
        }

        match removed {
            Some(event_type) => {
                if subscriptions.get(&event_type).is_some_and(Vec::is_empty) {
                    subscriptions.remove(&event_type);
                }
                debug!(subscription_id, event_type = %event_type, "Unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Most recent events in publication order. A limit of 0 returns all.
    #[must_use]
    pub fn get_event_history(&self, limit: usize) -> Vec<Event> {
        let history = self
            .inner
            .history
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let skip = if limit == 0 {
            0
        } else {
            history.len().saturating_sub(limit)
        };
        history.iter().skip(skip).map(|e| (**e).clone()).collect()
    }

    /// Subscription counters grouped by event type
    #[must_use]
    pub fn get_subscription_stats(&self) -> HashMap<EventType, SubscriptionStats> {
        let subscriptions = self
            .inner
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        subscriptions
            .iter()
            .map(|(event_type, bucket)| {
                let stats = bucket.iter().fold(SubscriptionStats::default(), |mut acc, s| {
                    acc.subscriptions += 1;
                    if s.is_active() {
                        acc.active += 1;
                    }
                    acc.handled += s.handled();
                    acc.errors += s.errors();
                    acc
                });
                (*event_type, stats)
            })
            .collect()
    }

    /// Events dropped because the channel was full
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Bus-wide counters
    #[must_use]
    pub fn stats(&self) -> EventBusStats {
        let history_len = self
            .inner
            .history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let subscriptions = self
            .inner
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum();

        EventBusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            dropped: self.dropped_events(),
            history_len,
            subscriptions,
            closed: self.is_closed(),
        }
    }

    /// Whether close has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop intake and wait for queued events to drain.
    ///
    /// Workers still busy after the drain timeout are cancelled. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        drop(
            self.inner
                .sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let workers: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .inner
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let abort_handles: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();

        let drained = tokio::time::timeout(
            self.inner.config.drain_timeout,
            futures::future::join_all(workers),
        )
        .await;

        if drained.is_err() {
            warn!(
                timeout_ms = self.inner.config.drain_timeout.as_millis() as u64,
                "Event bus drain timed out, cancelling workers"
            );
            self.inner.shutdown.cancel();
            for handle in abort_handles {
                handle.abort();
            }
        }

        info!(
            published = self.inner.published.load(Ordering::Relaxed),
            dropped = self.dropped_events(),
            "Event bus closed"
        );
    }

    fn drop_event(&self, event: &Event) {
        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Event channel full, dropping event"
        );
    }

    fn push_history(&self, event: Arc<Event>) {
        let max_history = self.inner.config.max_history;
        if max_history == 0 {
            return;
        }
        let mut history = self
            .inner
            .history
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        while history.len() >= max_history {
            history.pop_front();
        }
        history.push_back(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Queued>>>,
    subscriptions: SubscriptionMap,
    handler_timeout: Duration,
    shutdown: CancellationToken,
) {
    debug!(worker_id, "Event worker started");
    loop {
        let queued = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                queued = receiver.recv() => queued,
            }
        };
        let Some(queued) = queued else {
            break;
        };
        dispatch(&subscriptions, queued.event.clone(), handler_timeout).await;
        drop(queued);
    }
    debug!(worker_id, "Event worker stopped");
}

async fn dispatch(subscriptions: &SubscriptionMap, event: Arc<Event>, handler_timeout: Duration) {
    let targets: Vec<Arc<Subscription>> = subscriptions
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&event.event_type)
        .map(|bucket| bucket.iter().filter(|s| s.is_active()).cloned().collect())
        .unwrap_or_default();

    for subscription in targets {
        // may have been unsubscribed while an earlier handler ran
        if !subscription.is_active() {
            continue;
        }

        let handler = subscription.handler.clone();
        let event_for_handler = event.clone();
        let invocation = AssertUnwindSafe(async move { handler(event_for_handler).await })
            .catch_unwind();

        match tokio::time::timeout(handler_timeout, invocation).await {
            Ok(Ok(Ok(()))) => subscription.record_handled(),
            Ok(Ok(Err(message))) => {
                subscription.record_error();
                warn!(
                    subscription_id = %subscription.id,
                    event_type = %event.event_type,
                    error = %message,
                    "Event handler failed"
                );
            }
            Ok(Err(_)) => {
                subscription.record_error();
                error!(
                    subscription_id = %subscription.id,
                    event_type = %event.event_type,
                    "Event handler panicked"
                );
            }
            Err(_) => {
                subscription.record_error();
                warn!(
                    subscription_id = %subscription.id,
                    event_type = %event.event_type,
                    timeout_ms = handler_timeout.as_millis() as u64,
                    "Event handler timed out"
                );
            }
        }
    }
}
