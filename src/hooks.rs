//! Lifecycle hooks: a capability record of three function-valued fields
//! with neutral defaults, injected once at server construction instead
//! of living as overridable methods on a base class.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rand::Rng;
use serde_json::{Map, Value};

use crate::config::ServerConfig;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type OnStartupFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;
pub type OnShutdownFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;
pub type OnCreateSessionFn =
    Arc<dyn Fn(Option<String>, Map<String, Value>) -> BoxFuture<'static, Value> + Send + Sync>;

/// Three lifecycle hook points. `on_create_session`'s default resolves a
/// session request into the worker init payload: if `env_id` is absent and
/// `env_files` is non-empty, pick one uniformly at random.
#[derive(Clone)]
pub struct Hooks {
    pub on_startup: OnStartupFn,
    pub on_shutdown: OnShutdownFn,
    pub on_create_session: OnCreateSessionFn,
}

impl Hooks {
    /// Build the neutral default hook set for a given configuration (the
    /// default `on_create_session` needs `env_files` to pick from).
    pub fn defaults(config: Arc<ServerConfig>) -> Self {
        Self {
            on_startup: Arc::new(|| Box::pin(async {})),
            on_shutdown: Arc::new(|| Box::pin(async {})),
            on_create_session: Arc::new(move |env_id, params| {
                let config = config.clone();
                Box::pin(async move { default_create_session_payload(&config, env_id, params) })
            }),
        }
    }
}

fn default_create_session_payload(
    config: &ServerConfig,
    env_id: Option<String>,
    params: Map<String, Value>,
) -> Value {
    let resolved_env_id = match env_id {
        Some(id) => id,
        None if !config.env_files.is_empty() => {
            let idx = rand::thread_rng().gen_range(0..config.env_files.len());
            config.env_files[idx].clone()
        }
        None => String::new(),
    };

    let mut payload = Map::new();
    payload.insert("env_id".to_string(), Value::String(resolved_env_id));
    for (k, v) in params {
        payload.insert(k, v);
    }
    Value::Object(payload)
}
