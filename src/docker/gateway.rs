//! Thin wrapper around the Docker daemon for the operations the session
//! manager needs: start, attach, stop, list-by-label.

use std::collections::HashMap;

use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    ListContainersOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::models::ContainerSummary;
use bollard::Docker;
use futures_util::StreamExt;

use crate::config::ServerConfig;
use crate::docker::stream::AttachedStream;
use crate::error::{DaemonError, Result};

/// A running worker container, opaque to everything above this module
/// except for the id it needs to pass back into `attach`/`stop`.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub id: String,
}

#[derive(Clone)]
pub struct DockerGateway {
    client: std::sync::Arc<Docker>,
}

impl DockerGateway {
    pub fn connect(socket_path: Option<&str>) -> Result<Self> {
        let client = match socket_path {
            Some(path) => Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(DaemonError::from)?;

        Ok(Self { client: std::sync::Arc::new(client) })
    }

    pub async fn ping(&self) -> Result<()> {
        self.client.ping().await.map_err(DaemonError::from)?;
        Ok(())
    }

    /// Daemon version info, surfaced for the `diagnostics` CLI command.
    pub async fn version(&self) -> Result<bollard::models::SystemVersion> {
        self.client.version().await.map_err(DaemonError::from)
    }

    /// Start a worker container for `session_id`, labelled for later
    /// discovery by `list_by_label`. Stdin is left open so the attached
    /// stream can drive the JSON-lines protocol.
    pub async fn start(&self, config: &ServerConfig, session_id: &str) -> Result<ContainerHandle> {
        let env: Vec<String> = config
            .container_env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let binds: Vec<String> = config.volumes.iter().map(|v| v.as_mount_string()).collect();

        let host_config = bollard::models::HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            auto_remove: Some(true),
            ..Default::default()
        };

        let mut labels = HashMap::new();
        labels.insert(config.container_label.clone(), session_id.to_string());

        let container_config = Config {
            image: Some(config.docker_image.clone()),
            cmd: Some(config.worker_command.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            labels: Some(labels),
            open_stdin: Some(true),
            stdin_once: Some(false),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let name = format!("dockergym-{session_id}");
        let options = Some(CreateContainerOptions { name: name.clone(), platform: None });

        let response = self
            .client
            .create_container(options, container_config)
            .await
            .map_err(DaemonError::from)?;

        self.client
            .start_container::<String>(&response.id, None)
            .await
            .map_err(DaemonError::from)?;

        Ok(ContainerHandle { id: response.id })
    }

    /// Attach to a running container's stdin/stdout (no stderr).
    pub async fn attach(&self, handle: &ContainerHandle) -> Result<AttachedStream> {
        let options = Some(AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(false),
            stream: Some(true),
            logs: Some(false),
            ..Default::default()
        });

        let AttachContainerResults { output, input } = self
            .client
            .attach_container(&handle.id, options)
            .await
            .map_err(DaemonError::from)?;

        let reader = tokio_util::io::StreamReader::new(output.map(|item| {
            item.map(|log_output| log_output.into_bytes())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
        }));

        Ok(AttachedStream::new(Box::new(reader), Box::new(input)))
    }

    /// Best-effort graceful stop; swallows errors since the container may
    /// already be gone (e.g. it auto-removed on exit).
    pub async fn stop(&self, handle: &ContainerHandle, timeout: i64) {
        let options = Some(StopContainerOptions { t: timeout });
        let _ = self.client.stop_container(&handle.id, options).await;
        let _ = self
            .client
            .remove_container(&handle.id, Some(RemoveContainerOptions { force: true, v: true, ..Default::default() }))
            .await;
    }

    /// All containers bearing `label=value`, used for orphan sweeps.
    pub async fn list_by_label(&self, label: &str) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![label.to_string()]);

        let options = Some(ListContainersOptions { all: true, filters, ..Default::default() });

        self.client.list_containers(options).await.map_err(DaemonError::from)
    }

    /// Kill and remove a container found by `list_by_label`, used by the
    /// orphan sweep. `auto_remove` handles containers that exit on their
    /// own, but a killed container still needs an explicit remove.
    pub async fn kill(&self, id: &str) {
        let _ = self.client.kill_container::<String>(id, None).await;
        let _ = self
            .client
            .remove_container(id, Some(RemoveContainerOptions { force: true, v: true, ..Default::default() }))
            .await;
    }
}
