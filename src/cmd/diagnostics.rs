//! Diagnostics command - pings Docker and prints the resolved configuration.

use anyhow::Result;

use dockergym_daemon::config::ServerConfig;
use dockergym_daemon::docker::DockerGateway;

pub async fn run(config_path: &str) -> Result<()> {
    println!("dockergym-daemon diagnostics");
    println!("============================\n");

    println!("Configuration:");
    println!("--------------");
    let docker_socket = match ServerConfig::load(std::path::Path::new(config_path)) {
        Ok(config) => {
            println!("  image: {}", config.docker_image);
            println!("  worker command: {:?}", config.worker_command);
            println!("  container label: {}", config.container_label);
            println!("  max sessions: {}", config.max_sessions);
            println!("  batch window: {} ms", config.batch_window_ms);
            println!("  idle timeout: {} s", config.idle_timeout_s);
            println!("  command timeout: {} s", config.command_timeout_s);
            println!("  listen address: {}", config.address());
            println!("  environments catalogued: {}", config.env_files.len());
            config.docker_socket.clone()
        }
        Err(e) => {
            println!("  could not load {config_path}: {e}");
            None
        }
    };

    println!("\nDocker daemon:");
    println!("--------------");
    match DockerGateway::connect(docker_socket.as_deref()) {
        Ok(docker) => match docker.ping().await {
            Ok(_) => match docker.version().await {
                Ok(version) => {
                    println!("  reachable: yes");
                    println!("  version: {}", version.version.unwrap_or_default());
                    println!("  api version: {}", version.api_version.unwrap_or_default());
                    println!(
                        "  os/arch: {}/{}",
                        version.os.unwrap_or_default(),
                        version.arch.unwrap_or_default()
                    );
                }
                Err(e) => println!("  reachable, but version query failed: {e}"),
            },
            Err(e) => println!("  unreachable: {e}"),
        },
        Err(e) => println!("  could not connect: {e}"),
    }

    println!("\nDiagnostics complete.");
    Ok(())
}
