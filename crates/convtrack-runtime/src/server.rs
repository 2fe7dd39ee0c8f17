//! UDS JSON-RPC server: minimal hand-rolled implementation.
//! Connection-per-request, newline-delimited JSON.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use convtrack_bus::{Message, Transport};
use convtrack_core::reconcile::to_wire;
use convtrack_core::{ActiveHandlerEntry, ActiveHandlerList};

use crate::daemon::Daemon;

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, PartialEq)]
pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }
}

/// Run the UDS JSON-RPC server.
pub async fn run_server(socket_path: &str, daemon: Daemon) -> anyhow::Result<()> {
    // Create socket directory with mode 0700
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");

    loop {
        let (stream, _) = listener.accept().await?;
        let daemon = daemon.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, daemon).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(stream: tokio::net::UnixStream, daemon: Daemon) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = match serde_json::from_str::<Value>(line.trim()) {
        Ok(request) => {
            let method = request["method"].as_str().unwrap_or("");
            let id = request["id"].clone();
            match dispatch(&daemon, method, &request["params"]).await {
                Ok(result) => json!({"jsonrpc": "2.0", "result": result, "id": id}),
                Err(e) => error_response(e, id),
            }
        }
        Err(e) => error_response(
            RpcError {
                code: PARSE_ERROR,
                message: format!("parse error: {e}"),
            },
            Value::Null,
        ),
    };

    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

fn error_response(error: RpcError, id: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {"code": error.code, "message": error.message},
        "id": id,
    })
}

/// Execute one RPC method against the daemon.
pub(crate) async fn dispatch(
    daemon: &Daemon,
    method: &str,
    params: &Value,
) -> Result<Value, RpcError> {
    match method {
        "list_active" => {
            let entries = daemon.tracker.active_handlers().await;
            Ok(build_active_list(&entries, Utc::now()))
        }
        // Same `[[id, epoch_secs], ...]` shape the intent service reports.
        "list_active_raw" => {
            let entries = daemon.tracker.active_handlers().await;
            Ok(to_wire(&ActiveHandlerList::from_entries(entries)))
        }
        "check_skill" => {
            let skill_id = params["skill_id"]
                .as_str()
                .ok_or_else(|| RpcError::invalid_params("missing skill_id"))?;
            let active = daemon.tracker.is_active(skill_id).await;
            Ok(json!({"skill_id": skill_id, "active": active}))
        }
        "last_conversed" => {
            let last = daemon.tracker.last_conversed().await;
            Ok(json!(last))
        }
        "sync" => Ok(match daemon.tracker.sync_with_active_handlers().await {
            Some(outcome) => json!({
                "synced": true,
                "replaced": outcome.replaced,
                "activated": outcome.activated,
                "deactivated": outcome.deactivated,
            }),
            None => json!({"synced": false}),
        }),
        "emit" => {
            let message: Message = serde_json::from_value(params.clone())
                .map_err(|e| RpcError::invalid_params(format!("invalid message: {e}")))?;
            if message.msg_type.is_empty() {
                return Err(RpcError::invalid_params("message type is empty"));
            }
            let msg_type = message.msg_type.clone();
            daemon.bus.emit(message);
            Ok(json!({"emitted": msg_type}))
        }
        _ => Err(RpcError {
            code: METHOD_NOT_FOUND,
            message: "method not found".to_string(),
        }),
    }
}

/// Active list as sent to clients, most recently active first.
pub(crate) fn build_active_list(entries: &[ActiveHandlerEntry], now: DateTime<Utc>) -> Value {
    entries
        .iter()
        .map(|e| {
            json!({
                "skill_id": e.handler_id,
                "last_active_at": e.last_active_at.to_rfc3339(),
                "idle_secs": e.elapsed(now).num_seconds(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use convtrack_core::TrackerConfig;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    #[test]
    fn build_active_list_empty() {
        assert_eq!(build_active_list(&[], at(0)), json!([]));
    }

    #[test]
    fn build_active_list_reports_idle_time() {
        let entries = vec![
            ActiveHandlerEntry::new("timer", at(100)),
            ActiveHandlerEntry::new("weather", at(40)),
        ];
        let list = build_active_list(&entries, at(130));

        assert_eq!(list[0]["skill_id"], "timer");
        assert_eq!(list[0]["idle_secs"], 30);
        assert_eq!(list[1]["skill_id"], "weather");
        assert_eq!(list[1]["idle_secs"], 90);
        assert_eq!(list[1]["last_active_at"], "1970-01-01T00:00:40+00:00");
    }

    #[tokio::test]
    async fn emit_then_list_and_check() {
        let daemon = Daemon::new(TrackerConfig::default());

        let emitted = dispatch(
            &daemon,
            "emit",
            &json!({"type": "active_skill_request", "data": {"skill_id": "timer"}}),
        )
        .await
        .expect("emit");
        assert_eq!(emitted, json!({"emitted": "active_skill_request"}));

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        loop {
            let check = dispatch(&daemon, "check_skill", &json!({"skill_id": "timer"}))
                .await
                .expect("check");
            if check["active"] == json!(true) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "timer never activated");
            tokio::task::yield_now().await;
        }

        let list = dispatch(&daemon, "list_active", &Value::Null)
            .await
            .expect("list");
        assert_eq!(list[0]["skill_id"], "timer");
    }

    #[tokio::test]
    async fn list_active_raw_uses_wire_pairs() {
        let daemon = Daemon::new(TrackerConfig::default());
        assert_eq!(
            dispatch(&daemon, "list_active_raw", &Value::Null).await.expect("raw"),
            json!([])
        );

        assert!(daemon.tracker.promote("weather").await);
        assert!(daemon.tracker.promote("timer").await);

        let raw = dispatch(&daemon, "list_active_raw", &Value::Null)
            .await
            .expect("raw");
        let pairs = raw.as_array().expect("array");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0][0], "timer");
        assert_eq!(pairs[1][0], "weather");
        assert!(pairs.iter().all(|p| p[1].as_f64().is_some()));

        let snapshot =
            convtrack_core::ActiveHandlersSnapshot::from_wire(&raw).expect("parses back");
        assert!(snapshot.has_timestamps());
        assert_eq!(snapshot.ids(), vec!["timer", "weather"]);
    }

    #[tokio::test]
    async fn last_conversed_starts_null() {
        let daemon = Daemon::new(TrackerConfig::default());
        let last = dispatch(&daemon, "last_conversed", &Value::Null)
            .await
            .expect("last_conversed");
        assert_eq!(last, Value::Null);
    }

    #[tokio::test]
    async fn check_skill_requires_id() {
        let daemon = Daemon::new(TrackerConfig::default());
        let err = dispatch(&daemon, "check_skill", &json!({}))
            .await
            .expect_err("missing id");
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn emit_rejects_non_object_data() {
        let daemon = Daemon::new(TrackerConfig::default());
        let err = dispatch(&daemon, "emit", &json!({"type": "x", "data": [1, 2]}))
            .await
            .expect_err("array data");
        assert_eq!(err.code, INVALID_PARAMS);

        let err = dispatch(&daemon, "emit", &json!({"type": ""}))
            .await
            .expect_err("empty type");
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_without_intent_service_reports_failure() {
        let daemon = Daemon::new(TrackerConfig::default());
        let result = dispatch(&daemon, "sync", &Value::Null).await.expect("sync");
        assert_eq!(result, json!({"synced": false}));
    }

    #[tokio::test]
    async fn unknown_method() {
        let daemon = Daemon::new(TrackerConfig::default());
        let err = dispatch(&daemon, "nope", &Value::Null)
            .await
            .expect_err("unknown");
        assert_eq!(err.code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn round_trip_over_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("run/convtrackd.sock");
        let socket = socket.to_str().expect("utf-8 path").to_string();

        let daemon = Daemon::new(TrackerConfig::default());
        let server_socket = socket.clone();
        let server = tokio::spawn(async move { run_server(&server_socket, daemon).await });

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        while !std::path::Path::new(&socket).exists() {
            assert!(tokio::time::Instant::now() < deadline, "server never bound");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let list = crate::client::rpc_call(&socket, "list_active", json!({}))
            .await
            .expect("list_active");
        assert_eq!(list, json!([]));

        let err = crate::client::rpc_call(&socket, "nope", json!({}))
            .await
            .expect_err("unknown method");
        assert!(err.to_string().contains("method not found"));

        server.abort();
    }
}
