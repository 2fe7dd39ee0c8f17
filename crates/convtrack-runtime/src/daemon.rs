//! Daemon wiring: one in-process bus, one tracker bound to it, and the
//! background tasks serving them.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::{MissedTickBehavior, interval};

use convtrack_bus::MessageBus;
use convtrack_core::TrackerConfig;
use convtrack_tracker::ConverseTracker;

use crate::cli::DaemonOpts;
use crate::server;

/// Everything the UDS server needs. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Daemon {
    pub bus: MessageBus,
    pub tracker: ConverseTracker,
}

impl Daemon {
    /// Build a bus and a tracker bound to it.
    pub fn new(config: TrackerConfig) -> Self {
        let bus = MessageBus::new();
        let tracker = ConverseTracker::new(config);
        tracker.connect_bus(Arc::new(bus.clone()));
        Self { bus, tracker }
    }
}

fn load_config(opts: &DaemonOpts) -> anyhow::Result<TrackerConfig> {
    match &opts.config {
        Some(path) => {
            let config = TrackerConfig::load(path)?;
            tracing::info!("loaded config from {}", path.display());
            Ok(config)
        }
        None => Ok(TrackerConfig::default()),
    }
}

pub async fn run_daemon(opts: DaemonOpts, socket_path: &str) -> anyhow::Result<()> {
    let config = load_config(&opts)?;
    let sync_interval = config.sync_interval();
    let daemon = Daemon::new(config);

    // Start UDS server
    let server_daemon = daemon.clone();
    let server_socket = socket_path.to_string();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_socket, server_daemon).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    // Periodic reconciliation, if enabled
    let sync_tracker = daemon.tracker.clone();
    let sync_handle = tokio::spawn(async move {
        match sync_interval {
            Some(period) => run_sync_loop(sync_tracker, period).await,
            None => std::future::pending::<()>().await,
        }
    });

    let log_handle = tokio::spawn(run_bus_log(daemon.bus.clone()));

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = sync_handle => {
            tracing::warn!("sync loop exited unexpectedly");
        }
        _ = server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
    }

    log_handle.abort();
    // Cleanup socket
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("daemon stopped");
    Ok(())
}

async fn run_sync_loop(tracker: ConverseTracker, period: std::time::Duration) {
    tracing::info!("syncing with intent service every {}s", period.as_secs());
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; the intent service is unlikely to be
    // listening yet.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if tracker.sync_with_active_handlers().await.is_none() {
            tracing::debug!("sync skipped, intent service did not answer");
        }
    }
}

/// Trace every bus message at debug level.
async fn run_bus_log(bus: MessageBus) {
    let mut tap = bus.subscribe();
    loop {
        match tap.recv().await {
            Ok(msg) => tracing::debug!(
                msg_type = %msg.msg_type,
                data = %serde_json::Value::Object(msg.data),
                "bus message"
            ),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "bus log lagging");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convtrack_bus::{Message, Transport};
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn config_defaults_without_flag() {
        let config = load_config(&DaemonOpts { config: None }).expect("defaults");
        assert_eq!(config, TrackerConfig::default());
    }

    #[test]
    fn config_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "converse_window_mins = 2\nsync_interval_secs = 30").expect("write");

        let config = load_config(&DaemonOpts {
            config: Some(file.path().to_path_buf()),
        })
        .expect("load");
        assert_eq!(config.converse_window_mins, 2);
        assert_eq!(config.sync_interval_secs, 30);
    }

    #[test]
    fn invalid_config_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "query_timeout_secs = 0").expect("write");

        assert!(
            load_config(&DaemonOpts {
                config: Some(file.path().to_path_buf()),
            })
            .is_err()
        );
    }

    #[tokio::test]
    async fn daemon_bus_drives_tracker() {
        let daemon = Daemon::new(TrackerConfig::default());
        daemon.bus.emit(Message::from_value(
            "active_skill_request",
            json!({ "skill_id": "timer" }),
        ));

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        while !daemon.tracker.is_active("timer").await {
            assert!(tokio::time::Instant::now() < deadline, "tracker never saw the request");
            tokio::task::yield_now().await;
        }
    }
}
