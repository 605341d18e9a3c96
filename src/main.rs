//! dockergym-daemon - runs gym-style environments as Docker containers
//! behind a REST API, one container per session.

use anyhow::Result;
use clap::Parser;
use tracing::error;

mod cmd;

#[derive(Parser)]
#[command(name = "dockergym-daemon")]
#[command(about = "REST API daemon that runs gym-style environments in Docker containers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<cmd::Commands>,

    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Docker image to run for each session
    #[arg(long)]
    docker_image: Option<String>,

    /// Argv of the worker process inside the container
    #[arg(long, num_args = 1..)]
    worker_command: Option<Vec<String>>,

    /// Volume mount, `host:container[:mode]` (repeatable)
    #[arg(long = "volume")]
    volumes: Vec<String>,

    /// Newline-delimited file of logical environment ids
    #[arg(long)]
    env_file_list: Option<std::path::PathBuf>,

    /// Docker label used to tag session containers
    #[arg(long)]
    container_label: Option<String>,

    /// Maximum number of concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Step-batching window, in milliseconds
    #[arg(long)]
    batch_window_ms: Option<u64>,

    /// Idle session eviction timeout, in seconds
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Per-command timeout, in seconds
    #[arg(long)]
    command_timeout: Option<f64>,

    /// Bind host
    #[arg(long)]
    host: Option<String>,

    /// Bind port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("dockergym_daemon={log_level}").into()),
        )
        .init();

    match cli.command {
        Some(cmd::Commands::Diagnostics) => {
            cmd::diagnostics::run(&cli.config).await?;
        }
        None => {
            let args = cmd::root::ServeArgs {
                config_path: cli.config,
                docker_image: cli.docker_image,
                worker_command: cli.worker_command,
                volumes: cli.volumes,
                env_file_list: cli.env_file_list,
                container_label: cli.container_label,
                max_sessions: cli.max_sessions,
                batch_window_ms: cli.batch_window_ms,
                idle_timeout: cli.idle_timeout,
                command_timeout: cli.command_timeout,
                host: cli.host,
                port: cli.port,
            };

            if let Err(e) = cmd::root::run(args).await {
                error!("daemon error: {e}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
