//! Server configuration: loaded from a TOML file, overridable by CLI flags.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

fn default_container_label() -> String {
    "dockergym-session".to_string()
}

fn default_max_sessions() -> usize {
    1024
}

fn default_stop_timeout() -> i64 {
    2
}

fn default_batch_window_ms() -> u64 {
    50
}

fn default_idle_timeout_s() -> u64 {
    120
}

fn default_command_timeout_s() -> f64 {
    60.0
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_title() -> String {
    "DockerGym API".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// A single `host:container[:mode]` volume mount, parsed once at config load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub host: String,
    pub container: String,
    pub mode: String,
}

impl Volume {
    fn parse(raw: &str) -> Self {
        let parts: Vec<&str> = raw.split(':').collect();
        let host = expand_home(parts.first().copied().unwrap_or(""));
        let container = parts.get(1).map(|s| s.to_string()).unwrap_or_else(|| host.clone());
        let mode = parts.get(2).map(|s| s.to_string()).unwrap_or_else(|| "rw".to_string());
        Volume { host, container, mode }
    }

    pub fn as_mount_string(&self) -> String {
        format!("{}:{}:{}", self.host, self.container, self.mode)
    }
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{}/{}", home.trim_end_matches('/'), rest);
        }
    } else if path == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return home;
        }
    }
    path.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfigFile {
    pub docker_image: String,
    pub worker_command: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub env_files: Vec<String>,
    #[serde(default = "default_container_label")]
    pub container_label: String,
    #[serde(default)]
    pub container_env: HashMap<String, String>,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_stop_timeout")]
    pub container_stop_timeout_s: i64,
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,
    #[serde(default = "default_idle_timeout_s")]
    pub idle_timeout_s: u64,
    #[serde(default = "default_command_timeout_s")]
    pub command_timeout_s: f64,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Override the Docker socket path (defaults to the local daemon socket).
    pub docker_socket: Option<String>,
}

/// Fully resolved server configuration, immutable after startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub docker_image: String,
    pub worker_command: Vec<String>,
    pub volumes: Vec<Volume>,
    pub env_files: Vec<String>,
    pub container_label: String,
    pub container_env: HashMap<String, String>,
    pub max_sessions: usize,
    pub container_stop_timeout_s: i64,
    pub batch_window_ms: u64,
    pub idle_timeout_s: u64,
    pub command_timeout_s: f64,
    pub host: String,
    pub port: u16,
    pub title: String,
    pub version: String,
    pub docker_socket: Option<String>,
}

impl ServerConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        let file: ServerConfigFile = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
        Ok(Self::from_file(file))
    }

    pub fn from_file(file: ServerConfigFile) -> Self {
        Self {
            docker_image: file.docker_image,
            worker_command: file.worker_command,
            volumes: file.volumes.iter().map(|v| Volume::parse(v)).collect(),
            env_files: file.env_files,
            container_label: file.container_label,
            container_env: file.container_env,
            max_sessions: file.max_sessions,
            container_stop_timeout_s: file.container_stop_timeout_s,
            batch_window_ms: file.batch_window_ms,
            idle_timeout_s: file.idle_timeout_s,
            command_timeout_s: file.command_timeout_s,
            host: file.host,
            port: file.port,
            title: file.title,
            version: file.version,
            docker_socket: file.docker_socket,
        }
    }

    /// Apply env-file-list contents loaded by the CLI layer.
    pub fn with_env_files(mut self, env_files: Vec<String>) -> Self {
        if !env_files.is_empty() {
            self.env_files = env_files;
        }
        self
    }

    /// Overlay CLI flags onto a loaded (or default) configuration. Every
    /// argument is `Option`/possibly-empty; absence leaves the existing
    /// value untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_cli_overrides(
        mut self,
        docker_image: Option<String>,
        worker_command: Option<Vec<String>>,
        volumes: Vec<String>,
        container_label: Option<String>,
        max_sessions: Option<usize>,
        batch_window_ms: Option<u64>,
        idle_timeout_s: Option<u64>,
        command_timeout_s: Option<f64>,
        host: Option<String>,
        port: Option<u16>,
    ) -> Self {
        if let Some(v) = docker_image {
            self.docker_image = v;
        }
        if let Some(v) = worker_command {
            self.worker_command = v;
        }
        if !volumes.is_empty() {
            self.volumes = volumes.iter().map(|v| Volume::parse(v)).collect();
        }
        if let Some(v) = container_label {
            self.container_label = v;
        }
        if let Some(v) = max_sessions {
            self.max_sessions = v;
        }
        if let Some(v) = batch_window_ms {
            self.batch_window_ms = v;
        }
        if let Some(v) = idle_timeout_s {
            self.idle_timeout_s = v;
        }
        if let Some(v) = command_timeout_s {
            self.command_timeout_s = v;
        }
        if let Some(v) = host {
            self.host = v;
        }
        if let Some(v) = port {
            self.port = v;
        }
        self
    }

    /// Build a configuration from CLI flags alone, for deployments with no
    /// config file on disk. `docker_image`/`worker_command` are the only
    /// fields with no sane default.
    pub fn from_cli_only(docker_image: String, worker_command: Vec<String>) -> Self {
        Self::from_file(ServerConfigFile {
            docker_image,
            worker_command,
            volumes: Vec::new(),
            env_files: Vec::new(),
            container_label: default_container_label(),
            container_env: HashMap::new(),
            max_sessions: default_max_sessions(),
            container_stop_timeout_s: default_stop_timeout(),
            batch_window_ms: default_batch_window_ms(),
            idle_timeout_s: default_idle_timeout_s(),
            command_timeout_s: default_command_timeout_s(),
            host: default_host(),
            port: default_port(),
            title: default_title(),
            version: default_version(),
            docker_socket: None,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Map a host path to its container-side path using the configured
    /// volume mounts. Identity for paths not under any mount prefix.
    pub fn translate_path(&self, host_path: &str) -> String {
        for vol in &self.volumes {
            if let Some(rest) = host_path.strip_prefix(&vol.host) {
                return format!("{}{}", vol.container, rest);
            }
        }
        host_path.to_string()
    }
}

/// Load a newline-delimited env-id file (`--env-file-list`).
pub fn load_env_file_list(path: &PathBuf) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read env file list {}: {e}", path.display()))?;
    Ok(raw.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_volume_with_mode() {
        let v = Volume::parse("/data:/app/data:ro");
        assert_eq!(v.host, "/data");
        assert_eq!(v.container, "/app/data");
        assert_eq!(v.mode, "ro");
    }

    #[test]
    fn parses_volume_default_mode() {
        let v = Volume::parse("/data:/app/data");
        assert_eq!(v.mode, "rw");
    }

    #[test]
    fn parses_volume_no_container_path() {
        let v = Volume::parse("/data");
        assert_eq!(v.container, "/data");
        assert_eq!(v.mode, "rw");
    }

    #[test]
    fn expands_home_prefix() {
        std::env::set_var("HOME", "/home/tester");
        let v = Volume::parse("~/games:/data");
        assert_eq!(v.host, "/home/tester/games");
    }

    fn sample_config() -> ServerConfig {
        ServerConfig::from_file(ServerConfigFile {
            docker_image: "img".into(),
            worker_command: vec!["python".into(), "worker.py".into()],
            volumes: vec!["/host/games:/data/games:ro".into()],
            env_files: vec![],
            container_label: default_container_label(),
            container_env: HashMap::new(),
            max_sessions: default_max_sessions(),
            container_stop_timeout_s: default_stop_timeout(),
            batch_window_ms: default_batch_window_ms(),
            idle_timeout_s: default_idle_timeout_s(),
            command_timeout_s: default_command_timeout_s(),
            host: default_host(),
            port: default_port(),
            title: default_title(),
            version: default_version(),
            docker_socket: None,
        })
    }

    #[test]
    fn translate_path_rewrites_matched_prefix() {
        let cfg = sample_config();
        assert_eq!(cfg.translate_path("/host/games/zork.z5"), "/data/games/zork.z5");
    }

    #[test]
    fn translate_path_identity_outside_mounts() {
        let cfg = sample_config();
        assert_eq!(cfg.translate_path("/etc/passwd"), "/etc/passwd");
    }

    #[test]
    fn loads_server_config_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                docker_image = "envs:latest"
                worker_command = ["python", "worker.py"]
                max_sessions = 4
                batch_window_ms = 25
            "#,
        )
        .unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.docker_image, "envs:latest");
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.batch_window_ms, 25);
        assert_eq!(config.idle_timeout_s, default_idle_timeout_s());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(ServerConfig::load(&missing).is_err());
    }

    #[test]
    fn loads_env_file_list_skipping_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envs.txt");
        std::fs::write(&path, "zork1\n\n  adventure  \n\nhhgg\n").unwrap();

        let envs = load_env_file_list(&path).unwrap();
        assert_eq!(envs, vec!["zork1".to_string(), "adventure".to_string(), "hhgg".to_string()]);
    }
}
