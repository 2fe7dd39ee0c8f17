//! UDS JSON-RPC client for CLI subcommands.

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub(crate) async fn rpc_call(
    socket_path: &str,
    method: &str,
    params: Value,
) -> anyhow::Result<Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }

    Ok(response["result"].clone())
}

/// `convtrack check <id>`: prints and returns whether the skill may converse.
pub async fn cmd_check(socket_path: &str, skill_id: &str) -> anyhow::Result<bool> {
    let result = rpc_call(socket_path, "check_skill", json!({"skill_id": skill_id})).await?;
    let active = result["active"].as_bool().unwrap_or(false);
    println!("{skill_id}: {}", if active { "active" } else { "inactive" });
    Ok(active)
}

/// `convtrack emit <type> [json]`.
pub async fn cmd_emit(socket_path: &str, msg_type: &str, data: Option<&str>) -> anyhow::Result<()> {
    let params = build_emit_params(msg_type, data)?;
    rpc_call(socket_path, "emit", params).await?;
    println!("emitted {msg_type}");
    Ok(())
}

pub(crate) fn build_emit_params(msg_type: &str, data: Option<&str>) -> anyhow::Result<Value> {
    let data = match data {
        Some(raw) => serde_json::from_str::<Value>(raw)
            .map_err(|e| anyhow::anyhow!("message data is not valid JSON: {e}"))?,
        None => json!({}),
    };
    if !data.is_object() {
        anyhow::bail!("message data must be a JSON object");
    }
    Ok(json!({"type": msg_type, "data": data}))
}

/// `convtrack sync`.
pub async fn cmd_sync(socket_path: &str) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "sync", json!({})).await?;
    println!("{}", format_sync(&result));
    Ok(())
}

pub(crate) fn format_sync(result: &Value) -> String {
    if result["synced"].as_bool() != Some(true) {
        return "sync failed: intent service did not answer".to_string();
    }
    if result["replaced"].as_bool() == Some(true) {
        return "synced: active list replaced".to_string();
    }
    let joined = |key: &str| {
        result[key]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default()
    };
    let (activated, deactivated) = (joined("activated"), joined("deactivated"));
    if activated.is_empty() && deactivated.is_empty() {
        return "synced: no changes".to_string();
    }
    let mut parts = Vec::new();
    if !activated.is_empty() {
        parts.push(format!("+{activated}"));
    }
    if !deactivated.is_empty() {
        parts.push(format!("-{deactivated}"));
    }
    format!("synced: {}", parts.join(" "))
}

/// `convtrack status`: one-line summary. Daemon unreachable: `--`.
pub async fn cmd_status(socket_path: &str) -> anyhow::Result<()> {
    let active = match rpc_call(socket_path, "list_active", json!({})).await {
        Ok(list) => list,
        Err(_) => {
            println!("--");
            return Ok(());
        }
    };
    let last = rpc_call(socket_path, "last_conversed", json!({})).await?;
    println!("{}", format_status(&active, &last));
    Ok(())
}

pub(crate) fn format_status(active: &Value, last_conversed: &Value) -> String {
    let count = active.as_array().map_or(0, Vec::len);
    let head = active[0]["skill_id"].as_str().unwrap_or("-");
    let last = last_conversed.as_str().unwrap_or("-");
    format!("active: {count}  most recent: {head}  last conversed: {last}")
}
