//! A session is a bound pair of (REST client identity, worker container)
//! with its own serialised I/O channel.

use chrono::{DateTime, Utc};
use serde_json::Map;
use tokio::sync::Mutex;

use crate::docker::{AttachedStream, ContainerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Done,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Done => "done",
        }
    }
}

/// A live worker. `serial_guard` is owned here, not by the table, and
/// wraps the attached stream so at most one command is ever outstanding
/// on it.
pub struct Session {
    pub session_id: String,
    pub env_id: String,
    pub container: ContainerHandle,
    pub observation: parking_lot::RwLock<String>,
    pub info: parking_lot::RwLock<Map<String, serde_json::Value>>,
    pub status: parking_lot::RwLock<SessionStatus>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: parking_lot::RwLock<DateTime<Utc>>,
    pub serial_guard: Mutex<AttachedStream>,
}

impl Session {
    pub fn new(
        session_id: String,
        env_id: String,
        container: ContainerHandle,
        stream: AttachedStream,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            env_id,
            container,
            observation: parking_lot::RwLock::new(String::new()),
            info: parking_lot::RwLock::new(Map::new()),
            status: parking_lot::RwLock::new(SessionStatus::Active),
            created_at: now,
            last_active_at: parking_lot::RwLock::new(now),
            serial_guard: Mutex::new(stream),
        }
    }

    pub fn is_done(&self) -> bool {
        *self.status.read() == SessionStatus::Done
    }

    pub fn mark_done(&self) {
        *self.status.write() = SessionStatus::Done;
    }

    pub fn touch(&self) {
        *self.last_active_at.write() = Utc::now();
    }

    pub fn idle_for(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(*self.last_active_at.read())
    }
}

/// Extract the extra keys from a worker response into an `info` map.
/// The standard keys never appear in `info`.
pub fn extract_info(response: &serde_json::Value) -> Map<String, serde_json::Value> {
    const STANDARD_KEYS: &[&str] = &["status", "observation", "reward", "score", "done", "cmd", "env_id"];

    match response.as_object() {
        Some(obj) => obj
            .iter()
            .filter(|(k, _)| !STANDARD_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        None => Map::new(),
    }
}

/// A worker may report its reward under `reward` or the alias `score`;
/// the daemon always standardises on `reward` going out.
pub fn extract_reward(response: &serde_json::Value) -> f64 {
    response
        .get("reward")
        .or_else(|| response.get("score"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_info_drops_standard_keys() {
        let response = json!({
            "status": "ok",
            "observation": "world",
            "reward": 1.5,
            "done": false,
            "extra": "x",
            "score": 9.9,
        });
        let info = extract_info(&response);
        assert_eq!(info.len(), 1);
        assert_eq!(info.get("extra"), Some(&json!("x")));
    }

    #[test]
    fn extract_reward_prefers_reward_over_score() {
        let response = json!({ "reward": 2.0, "score": 9.0 });
        assert_eq!(extract_reward(&response), 2.0);
    }

    #[test]
    fn extract_reward_falls_back_to_score_alias() {
        let response = json!({ "score": 4.5 });
        assert_eq!(extract_reward(&response), 4.5);
    }

    #[test]
    fn extract_reward_defaults_to_zero() {
        let response = json!({ "observation": "x" });
        assert_eq!(extract_reward(&response), 0.0);
    }
}
