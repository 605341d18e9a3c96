//! Session table, slot admission, creation pipeline, deletion, idle
//! eviction, and orphan reclamation.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::docker::{stream, DockerGateway};
use crate::error::{DaemonError, Result};
use crate::session::model::{extract_info, Session};

const EVICTION_PERIOD: Duration = Duration::from_secs(60);

pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    slots: Semaphore,
    config: Arc<ServerConfig>,
    docker: DockerGateway,
}

impl SessionManager {
    pub fn new(config: Arc<ServerConfig>, docker: DockerGateway) -> Self {
        let max_sessions = config.max_sessions;
        Self { sessions: DashMap::new(), slots: Semaphore::new(max_sessions), config, docker }
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn get_session(&self, session_id: &str) -> Result<Arc<Session>> {
        self.sessions
            .get(session_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| DaemonError::SessionNotFound(session_id.to_string()))
    }

    /// Create a new session. On any failure after the slot is
    /// reserved, the container is stopped, the table entry dropped, and the
    /// slot released — the caller never observes a half-initialised session.
    pub async fn create_session(&self, init_payload: Value) -> Result<Arc<Session>> {
        let permit = self
            .slots
            .try_acquire()
            .map_err(|_| DaemonError::NoSlotsAvailable(self.config.max_sessions))?;

        let env_id = init_payload.get("env_id").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let session_id = Uuid::new_v4().to_string();

        let result = self.create_session_inner(&session_id, &env_id, init_payload).await;

        match result {
            Ok(session) => {
                permit.forget();
                Ok(session)
            }
            Err(e) => {
                warn!("session creation failed for {session_id}: {e}");
                Err(e)
            }
        }
    }

    async fn create_session_inner(
        &self,
        session_id: &str,
        env_id: &str,
        init_payload: Value,
    ) -> Result<Arc<Session>> {
        let container = self.docker.start(&self.config, session_id).await?;

        let stream = match self.docker.attach(&container).await {
            Ok(s) => s,
            Err(e) => {
                self.docker.stop(&container, self.config.container_stop_timeout_s).await;
                return Err(e);
            }
        };

        let session = Arc::new(Session::new(session_id.to_string(), env_id.to_string(), container, stream));
        self.sessions.insert(session_id.to_string(), session.clone());

        let mut init_cmd = json!({ "cmd": "init" });
        merge_object(&mut init_cmd, &init_payload);

        let response = {
            let mut guard = session.serial_guard.lock().await;
            let timeout = Duration::from_secs_f64(self.config.command_timeout_s);
            stream::send_command(&mut guard, &init_cmd, timeout).await
        };

        if response.get("status").and_then(|v| v.as_str()) != Some("ok") {
            let message = response
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string();

            self.sessions.remove(session_id);
            self.docker.stop(&session.container, self.config.container_stop_timeout_s).await;
            return Err(DaemonError::ContainerError(format!("Init failed: {message}")));
        }

        *session.observation.write() = response.get("observation").and_then(|v| v.as_str()).unwrap_or("").to_string();
        *session.info.write() = extract_info(&response);

        info!("created session {session_id} (env_id={env_id})");
        Ok(session)
    }

    /// Step an existing session through its serial channel. Rejects steps
    /// against a session already in the `done` state.
    /// Caller (the Batch Coordinator) is expected to hold no other lock.
    pub async fn step(&self, session: &Session, action: &str) -> Result<Value> {
        if session.is_done() {
            return Err(DaemonError::SessionAlreadyDone(session.session_id.clone()));
        }

        let command = json!({ "cmd": "step", "action": action });
        let timeout = Duration::from_secs_f64(self.config.command_timeout_s);

        let response = {
            let mut guard = session.serial_guard.lock().await;
            stream::send_command(&mut guard, &command, timeout).await
        };

        if response.get("status").and_then(|v| v.as_str()) != Some("ok") {
            let message = response
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("Step failed")
                .to_string();
            return Err(DaemonError::ContainerError(message));
        }

        session.touch();
        if response.get("done").and_then(|v| v.as_bool()) == Some(true) {
            session.mark_done();
        }

        Ok(response)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let (_, session) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| DaemonError::SessionNotFound(session_id.to_string()))?;

        self.docker.stop(&session.container, self.config.container_stop_timeout_s).await;
        self.slots.add_permits(1);
        Ok(())
    }

    pub async fn delete_all_sessions(&self) -> Vec<String> {
        let ids: Vec<String> = self.sessions.iter().map(|r| r.key().clone()).collect();
        let mut deleted = Vec::new();
        for id in ids {
            if self.delete_session(&id).await.is_ok() {
                deleted.push(id);
            }
        }
        deleted
    }

    /// Kill any container left over from a previous run. Called once
    /// at startup, before the table has any entries.
    pub async fn cleanup_orphans(&self) {
        match self.docker.list_by_label(&self.config.container_label).await {
            Ok(containers) => {
                for container in containers {
                    if let Some(id) = container.id {
                        debug!("killing orphaned container {id}");
                        self.docker.kill(&id).await;
                    }
                }
            }
            Err(e) => warn!("error listing labelled containers during orphan sweep: {e}"),
        }
    }

    /// Background task: evict sessions idle longer than `idle_timeout_s`.
    /// Tolerates concurrent deletion racing with it (a session already
    /// removed by a client delete simply isn't found by `delete_session`).
    pub async fn run_eviction_loop(self: Arc<Self>, cancel: CancellationToken) {
        let idle_timeout = chrono::Duration::seconds(self.config.idle_timeout_s as i64);
        let mut interval = tokio::time::interval(EVICTION_PERIOD);
        interval.tick().await; // skip the immediate first tick

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("idle eviction loop stopped");
                    return;
                }
                _ = interval.tick() => {
                    let to_remove: Vec<String> = self
                        .sessions
                        .iter()
                        .filter(|r| r.value().idle_for() > idle_timeout)
                        .map(|r| r.key().clone())
                        .collect();

                    for id in to_remove {
                        info!("evicting idle session {id}");
                        if let Err(e) = self.delete_session(&id).await {
                            warn!("failed to evict session {id}: {e}");
                        }
                    }
                }
            }
        }
    }

    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|r| r.key().clone()).collect();
        for id in ids {
            let _ = self.delete_session(&id).await;
        }
        self.sessions.clear();
        self.cleanup_orphans().await;
    }
}

/// Merge `src`'s object keys into `dst` (used to build `{cmd:"init", ...payload}`).
fn merge_object(dst: &mut Value, src: &Value) {
    if let (Some(dst_obj), Some(src_obj)) = (dst.as_object_mut(), src.as_object()) {
        for (k, v) in src_obj {
            dst_obj.insert(k.clone(), v.clone());
        }
    }
}
