//! Main daemon command - starts the REST API server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dockergym_daemon::batch::BatchCoordinator;
use dockergym_daemon::config::{self, ServerConfig};
use dockergym_daemon::docker::DockerGateway;
use dockergym_daemon::hooks::Hooks;
use dockergym_daemon::router::{self, AppState};
use dockergym_daemon::session::SessionManager;

/// CLI flags that feed into the server configuration, collected here so
/// `main.rs` stays a thin clap definition.
#[allow(clippy::too_many_arguments)]
pub struct ServeArgs {
    pub config_path: String,
    pub docker_image: Option<String>,
    pub worker_command: Option<Vec<String>>,
    pub volumes: Vec<String>,
    pub env_file_list: Option<std::path::PathBuf>,
    pub container_label: Option<String>,
    pub max_sessions: Option<usize>,
    pub batch_window_ms: Option<u64>,
    pub idle_timeout: Option<u64>,
    pub command_timeout: Option<f64>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

fn resolve_config(args: &ServeArgs) -> Result<ServerConfig> {
    let path = std::path::Path::new(&args.config_path);
    let base = if path.exists() {
        ServerConfig::load(path)?
    } else {
        let image = args
            .docker_image
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no config file at {} and --docker-image not given", args.config_path))?;
        let command = args
            .worker_command
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no config file at {} and --worker-command not given", args.config_path))?;
        ServerConfig::from_cli_only(image, command)
    };

    let mut resolved = base.apply_cli_overrides(
        args.docker_image.clone(),
        args.worker_command.clone(),
        args.volumes.clone(),
        args.container_label.clone(),
        args.max_sessions,
        args.batch_window_ms,
        args.idle_timeout,
        args.command_timeout,
        args.host.clone(),
        args.port,
    );

    if let Some(path) = &args.env_file_list {
        resolved = resolved.with_env_files(config::load_env_file_list(path)?);
    }

    Ok(resolved)
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    let config = Arc::new(config);

    info!("Resolved configuration:");
    info!("  image: {}", config.docker_image);
    info!("  worker command: {:?}", config.worker_command);
    info!("  max sessions: {}", config.max_sessions);
    info!("  listening on: {}", config.address());

    let docker = DockerGateway::connect(config.docker_socket.as_deref())?;
    docker.ping().await?;
    info!("Connected to Docker daemon");

    let manager = Arc::new(SessionManager::new(config.clone(), docker));

    info!("Sweeping orphaned containers from a previous run...");
    manager.cleanup_orphans().await;

    let hooks = Hooks::defaults(config.clone());
    (hooks.on_startup)().await;

    let batch = BatchCoordinator::new(manager.clone(), config.batch_window_ms);

    let state = AppState { manager: manager.clone(), batch, hooks: hooks.clone(), config: config.clone() };
    let app = router::build_router(state);

    let shutdown_token = CancellationToken::new();
    let eviction_manager = manager.clone();
    let eviction_token = shutdown_token.clone();
    tokio::spawn(async move {
        eviction_manager.run_eviction_loop(eviction_token).await;
    });
    info!("Started idle-session eviction loop");

    let bind_addr: SocketAddr = config.address().parse().expect("invalid bind address");
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
        warn!("received shutdown signal, stopping sessions...");

        shutdown_token.cancel();
        (hooks.on_shutdown)().await;
        manager.shutdown().await;

        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    info!("Starting HTTP server on {bind_addr}");
    axum_server::bind(bind_addr).handle(handle).serve(app.into_make_service()).await?;

    debug!("Daemon stopped");
    Ok(())
}
