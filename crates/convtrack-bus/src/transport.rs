//! Transport trait: the only view of the bus the tracker depends on.
//! Kept object-safe so callers hold an `Arc<dyn Transport>` and tests can
//! inject their own.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::BusError;
use crate::message::Message;

/// Subscriber callback. Each delivery runs as its own task, so handlers
/// may run concurrently with each other.
pub type Handler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |msg| f(msg).boxed())
}

pub trait Transport: Send + Sync {
    /// Fire-and-forget publish.
    fn emit(&self, message: Message);

    /// Subscribe `handler` to every message whose type equals `topic`.
    fn on(&self, topic: &str, handler: Handler);

    /// Emit `request` and wait up to `timeout` for the correlated message on
    /// `reply_topic`.
    fn wait_for_response(
        &self,
        request: Message,
        reply_topic: &str,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Message, BusError>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn emit(&self, message: Message) {
        (**self).emit(message)
    }

    fn on(&self, topic: &str, handler: Handler) {
        (**self).on(topic, handler)
    }

    fn wait_for_response(
        &self,
        request: Message,
        reply_topic: &str,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Message, BusError>> {
        (**self).wait_for_response(request, reply_topic, timeout)
    }
}
