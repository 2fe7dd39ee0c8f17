//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "convtrack", about = "converse session tracker")]
pub struct Cli {
    /// UDS socket path (default: /tmp/convtrack-$USER/convtrackd.sock)
    #[arg(long, short = 's', global = true, env = "CONVTRACK_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (message bus + tracker + UDS server)
    Daemon(DaemonOpts),
    /// List active skills, most recently active first (default)
    Ls,
    /// Exit 0 if the skill may converse, 1 otherwise
    Check { skill_id: String },
    /// Emit a message on the daemon's bus
    Emit {
        /// Message type, e.g. `active_skill_request`
        msg_type: String,
        /// JSON object used as the message data
        data: Option<String>,
    },
    /// Reconcile with the intent service's active skill list
    Sync,
    /// Show daemon status summary
    Status,
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// TOML tracker config; defaults apply when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/convtrack/convtrackd.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/convtrack-{user}/convtrackd.sock")
}
