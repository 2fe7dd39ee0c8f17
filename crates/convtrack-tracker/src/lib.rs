//! convtrack-tracker: converse session tracking over the message bus.
//!
//! `IntentQueryApi` is the bounded-wait query client for the
//! intent service. `ConverseTracker` folds bus notifications, speculative
//! utterance resolution and reconciliation sweeps into one active list and
//! emits `converse.skill.activated` / `converse.skill.deactivated`.

pub mod clock;
pub mod query;
pub mod topics;
pub mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use query::IntentQueryApi;
pub use tracker::{ConverseTracker, RemovalMode};
