//! The in-container library surface an environment adapter links against.
//!
//! This module is never linked into the daemon binary itself — it is the
//! protocol half an environment author implements against, built as its
//! own small binary crate that depends on this one as a library.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

const STANDARD_KEYS: &[&str] = &["cmd", "env_id"];

/// One environment step outcome.
pub struct StepOutcome {
    pub observation: String,
    pub reward: f64,
    pub done: bool,
    pub info: Map<String, Value>,
}

/// The two callbacks an environment adapter implements. `close_env` has a
/// neutral default since most environments need no teardown.
#[async_trait]
pub trait EnvironmentWorker: Send {
    async fn init_env(&mut self, env_id: &str, params: Map<String, Value>) -> Result<StepOutcome, String>;
    async fn step_env(&mut self, action: &str) -> Result<StepOutcome, String>;

    async fn close_env(&mut self) {}
}

/// Drive `worker` against stdin/stdout until stdin closes.
///
/// Stdout is claimed for protocol writes before anything else happens;
/// all diagnostic logging goes to stderr via `tracing`, the in-container
/// analogue of redirecting stdout to stderr before any library gets a
/// chance to write to it.
pub async fn run_worker<W: EnvironmentWorker>(mut worker: W) -> io::Result<()> {
    let mut stdout = io::stdout();
    let stdin = io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    let mut initialized = false;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(line) {
            Ok(command) => dispatch(&mut worker, command, &mut initialized).await,
            Err(e) => json!({ "status": "error", "message": format!("invalid JSON: {e}") }),
        };

        write_response(&mut stdout, &response).await?;
    }

    worker.close_env().await;
    Ok(())
}

async fn dispatch<W: EnvironmentWorker>(worker: &mut W, command: Value, initialized: &mut bool) -> Value {
    let cmd = command.get("cmd").and_then(|v| v.as_str()).unwrap_or("");

    match cmd {
        "init" => {
            let env_id = command.get("env_id").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let params = residual_params(&command);

            match worker.init_env(&env_id, params).await {
                Ok(outcome) => {
                    *initialized = true;
                    outcome_response(outcome)
                }
                Err(message) => json!({ "status": "error", "message": message }),
            }
        }
        "step" => {
            if !*initialized {
                return json!({ "status": "error", "message": "Environment not initialized" });
            }

            let action = command.get("action").and_then(|v| v.as_str()).unwrap_or("");
            match worker.step_env(action).await {
                Ok(outcome) => outcome_response(outcome),
                Err(message) => json!({ "status": "error", "message": message }),
            }
        }
        other => json!({ "status": "error", "message": format!("Unknown command: {other}") }),
    }
}

fn residual_params(command: &Value) -> Map<String, Value> {
    match command.as_object() {
        Some(obj) => obj
            .iter()
            .filter(|(k, _)| !STANDARD_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        None => Map::new(),
    }
}

fn outcome_response(outcome: StepOutcome) -> Value {
    let mut body = Map::new();
    body.insert("status".to_string(), Value::String("ok".to_string()));
    body.insert("observation".to_string(), Value::String(outcome.observation));
    body.insert("reward".to_string(), json!(outcome.reward));
    body.insert("done".to_string(), Value::Bool(outcome.done));
    for (k, v) in outcome.info {
        body.insert(k, v);
    }
    Value::Object(body)
}

async fn write_response<W: AsyncWriteExt + Unpin>(stdout: &mut W, response: &Value) -> io::Result<()> {
    let mut line = serde_json::to_string(response).unwrap_or_else(|_| {
        json!({ "status": "error", "message": "failed to serialise response" }).to_string()
    });
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingWorker {
        steps: u32,
    }

    #[async_trait]
    impl EnvironmentWorker for CountingWorker {
        async fn init_env(&mut self, _env_id: &str, _params: Map<String, Value>) -> Result<StepOutcome, String> {
            Ok(StepOutcome { observation: "start".into(), reward: 0.0, done: false, info: Map::new() })
        }

        async fn step_env(&mut self, action: &str) -> Result<StepOutcome, String> {
            if action == "boom" {
                return Err("refused".into());
            }
            self.steps += 1;
            Ok(StepOutcome {
                observation: format!("step {}", self.steps),
                reward: 1.0,
                done: self.steps >= 3,
                info: Map::new(),
            })
        }
    }

    #[tokio::test]
    async fn step_before_init_is_rejected() {
        let mut worker = CountingWorker { steps: 0 };
        let mut initialized = false;
        let response = dispatch(&mut worker, json!({ "cmd": "step", "action": "go" }), &mut initialized).await;
        assert_eq!(response["status"], "error");
        assert_eq!(response["message"], "Environment not initialized");
    }

    #[tokio::test]
    async fn init_then_step_reports_ok() {
        let mut worker = CountingWorker { steps: 0 };
        let mut initialized = false;

        let init_resp = dispatch(&mut worker, json!({ "cmd": "init", "env_id": "e1", "seed": 7 }), &mut initialized).await;
        assert_eq!(init_resp["status"], "ok");
        assert!(initialized);

        let step_resp = dispatch(&mut worker, json!({ "cmd": "step", "action": "go" }), &mut initialized).await;
        assert_eq!(step_resp["status"], "ok");
        assert_eq!(step_resp["observation"], "step 1");
        assert_eq!(step_resp["done"], false);
    }

    #[tokio::test]
    async fn failed_step_surfaces_message() {
        let mut worker = CountingWorker { steps: 0 };
        let mut initialized = true;
        let response = dispatch(&mut worker, json!({ "cmd": "step", "action": "boom" }), &mut initialized).await;
        assert_eq!(response["status"], "error");
        assert_eq!(response["message"], "refused");
    }

    #[tokio::test]
    async fn unknown_command_is_reported() {
        let mut worker = CountingWorker { steps: 0 };
        let mut initialized = false;
        let response = dispatch(&mut worker, json!({ "cmd": "frobnicate" }), &mut initialized).await;
        assert_eq!(response["status"], "error");
        assert_eq!(response["message"], "Unknown command: frobnicate");
    }

    #[test]
    fn residual_params_drops_standard_keys() {
        let command = json!({ "cmd": "init", "env_id": "e1", "seed": 3, "difficulty": "hard" });
        let params = residual_params(&command);
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("seed"), Some(&json!(3)));
    }
}
