//! convtrack-bus: message bus boundary.
//! `Message` envelope, the `Transport` trait the tracker talks to, and an
//! in-process tokio implementation with request/reply correlation.

pub mod error;
pub mod memory;
pub mod message;
pub mod transport;

pub use error::BusError;
pub use memory::MessageBus;
pub use message::{CORRELATION_ID_KEY, Message};
pub use transport::{Handler, Transport, handler};
