//! convtrack-core: pure state model for converse tracking.
//! Active handler list, reconciliation merge, intent-reply shaping and
//! tracker configuration. No tokio, no bus, no logging.

pub mod active_list;
pub mod config;
pub mod intent;
pub mod reconcile;

pub use active_list::{ActiveHandlerEntry, ActiveHandlerList};
pub use config::{ConfigError, TrackerConfig};
pub use reconcile::{ActiveHandlersSnapshot, MergeOutcome, merge};
