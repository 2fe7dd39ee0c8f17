//! In-process message bus on tokio.
//!
//! - `emit` resolves pending reply waiters, publishes to a broadcast tap,
//!   then spawns one task per subscribed handler.
//! - `wait_for_response` registers a oneshot waiter keyed by correlation id
//!   *before* emitting the request, so a fast reply cannot be missed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::error::BusError;
use crate::message::{CORRELATION_ID_KEY, Message};
use crate::transport::{Handler, Transport};

/// Capacity of the broadcast tap. Slow observers lag rather than block.
const TAP_CAPACITY: usize = 256;

struct PendingReply {
    correlation_id: String,
    tx: oneshot::Sender<Message>,
}

struct Inner {
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
    /// reply topic -> waiters, oldest first.
    pending: Mutex<HashMap<String, Vec<PendingReply>>>,
    tap: broadcast::Sender<Message>,
    next_correlation: AtomicU64,
    /// Distinguishes correlation ids of separate bus instances.
    nonce: String,
}

/// Cheaply cloneable handle; clones share subscriptions and waiters.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Handlers never run under these locks, so a poisoned map is still
    // structurally sound.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MessageBus {
    pub fn new() -> Self {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        let nonce = format!(
            "{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        );
        Self {
            inner: Arc::new(Inner {
                handlers: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                tap,
                next_correlation: AtomicU64::new(1),
                nonce,
            }),
        }
    }

    /// Observe every emitted message.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.inner.tap.subscribe()
    }

    /// Number of handlers subscribed to `topic`.
    pub fn handler_count(&self, topic: &str) -> usize {
        lock(&self.inner.handlers).get(topic).map_or(0, Vec::len)
    }

    fn next_correlation_id(&self) -> String {
        let seq = self.inner.next_correlation.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq}", self.inner.nonce)
    }

    /// Hand `message` to the waiter it answers, if any.
    ///
    /// A reply with a correlation id only matches that waiter. A reply
    /// without one goes to the oldest live waiter on the topic.
    fn resolve_pending(&self, message: &Message) {
        let mut pending = lock(&self.inner.pending);
        let Some(waiters) = pending.get_mut(&message.msg_type) else {
            return;
        };
        waiters.retain(|w| !w.tx.is_closed());

        let idx = match message.correlation_id() {
            Some(id) => waiters.iter().position(|w| w.correlation_id == id),
            None => (!waiters.is_empty()).then_some(0),
        };
        if let Some(idx) = idx {
            let waiter = waiters.remove(idx);
            // The waiter may have timed out between retain and send.
            let _ = waiter.tx.send(message.clone());
        }
        if waiters.is_empty() {
            pending.remove(&message.msg_type);
        }
    }

    fn drop_pending(&self, reply_topic: &str, correlation_id: &str) {
        let mut pending = lock(&self.inner.pending);
        if let Some(waiters) = pending.get_mut(reply_topic) {
            waiters.retain(|w| w.correlation_id != correlation_id);
            if waiters.is_empty() {
                pending.remove(reply_topic);
            }
        }
    }

    async fn request(
        &self,
        mut request: Message,
        reply_topic: String,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let correlation_id = match request.correlation_id().map(str::to_owned) {
            Some(id) => id,
            None => {
                let id = self.next_correlation_id();
                request
                    .context
                    .insert(CORRELATION_ID_KEY.to_owned(), id.clone().into());
                id
            }
        };

        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending)
            .entry(reply_topic.clone())
            .or_default()
            .push(PendingReply {
                correlation_id: correlation_id.clone(),
                tx,
            });

        self.emit(request);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BusError::Closed { reply_topic }),
            Err(_) => {
                self.drop_pending(&reply_topic, &correlation_id);
                Err(BusError::Timeout {
                    reply_topic,
                    timeout,
                })
            }
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("topics", &lock(&self.inner.handlers).len())
            .field("pending", &lock(&self.inner.pending).len())
            .finish()
    }
}

impl Transport for MessageBus {
    fn emit(&self, message: Message) {
        self.resolve_pending(&message);

        // No tap observers is fine.
        let _ = self.inner.tap.send(message.clone());

        let handlers = lock(&self.inner.handlers)
            .get(&message.msg_type)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(rt) => rt,
            Err(_) => {
                warn!(msg_type = %message.msg_type, "emit outside a tokio runtime, handlers skipped");
                return;
            }
        };
        debug!(msg_type = %message.msg_type, handlers = handlers.len(), "dispatching");
        for h in handlers {
            let _ = runtime.spawn(h(message.clone()));
        }
    }

    fn on(&self, topic: &str, handler: Handler) {
        lock(&self.inner.handlers)
            .entry(topic.to_owned())
            .or_default()
            .push(handler);
    }

    fn wait_for_response(
        &self,
        request: Message,
        reply_topic: &str,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Message, BusError>> {
        self.request(request, reply_topic.to_owned(), timeout).boxed()
    }
}
