//! `convtrack ls`: active skills, most recently active first.

use serde_json::{Value, json};

use crate::client;

pub async fn cmd_ls(socket_path: &str) -> anyhow::Result<()> {
    let active = client::rpc_call(socket_path, "list_active", json!({})).await?;
    let last = client::rpc_call(socket_path, "last_conversed", json!({})).await?;
    print!("{}", format_ls(&active, last.as_str()));
    Ok(())
}

/// Compact idle time: `42s`, `3m05s`, `1h02m`.
pub(crate) fn format_idle(secs: i64) -> String {
    let secs = secs.max(0);
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

/// Pure formatting logic for ls output, separated for testability.
///
/// The skill that last accepted a converse turn is marked with `*`.
pub(crate) fn format_ls(active: &Value, last_conversed: Option<&str>) -> String {
    let rows: Vec<(&str, i64)> = active
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| Some((e["skill_id"].as_str()?, e["idle_secs"].as_i64()?)))
                .collect()
        })
        .unwrap_or_default();

    if rows.is_empty() {
        return "no active skills\n".to_string();
    }

    let width = rows
        .iter()
        .map(|(id, _)| id.len())
        .max()
        .unwrap_or(0)
        .max("SKILL".len());

    let mut out = format!("  {:<width$}  IDLE\n", "SKILL");
    for (id, idle) in rows {
        let mark = if Some(id) == last_conversed { '*' } else { ' ' };
        out.push_str(&format!("{mark} {id:<width$}  {}\n", format_idle(idle)));
    }
    out
}
