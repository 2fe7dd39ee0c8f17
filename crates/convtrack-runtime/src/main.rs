//! convtrack: converse session tracker runtime binary.
//! The daemon embeds the in-process bus and the tracker; every other
//! subcommand is a thin client over the daemon's UDS socket.

use clap::Parser;

mod cli;
mod client;
mod cmd_ls;
mod daemon;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command.unwrap_or(cli::Command::Ls) {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("CONVTRACK_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("convtrack daemon starting");
            daemon::run_daemon(opts, &socket_path).await?;
        }
        cli::Command::Ls => {
            cmd_ls::cmd_ls(&socket_path).await?;
        }
        cli::Command::Check { skill_id } => {
            let active = client::cmd_check(&socket_path, &skill_id).await?;
            if !active {
                std::process::exit(1);
            }
        }
        cli::Command::Emit { msg_type, data } => {
            client::cmd_emit(&socket_path, &msg_type, data.as_deref()).await?;
        }
        cli::Command::Sync => {
            client::cmd_sync(&socket_path).await?;
        }
        cli::Command::Status => {
            client::cmd_status(&socket_path).await?;
        }
    }

    Ok(())
}
