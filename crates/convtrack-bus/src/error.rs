//! Error types for the message bus.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no reply on {reply_topic} within {timeout:?}")]
    Timeout {
        reply_topic: String,
        timeout: Duration,
    },

    #[error("reply channel for {reply_topic} closed before a reply arrived")]
    Closed { reply_topic: String },

    #[error("invalid message payload: {0}")]
    Payload(#[from] serde_json::Error),
}
