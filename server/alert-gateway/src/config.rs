//! Gateway configuration with documented defaults, overridable from env.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
  /// Command used to spawn the correlation-engine worker.
  pub worker_command: String,
  pub worker_args: Vec<String>,
  /// Max events buffered while the worker is unavailable; overflow drops the
  /// oldest entry.
  pub queue_capacity: usize,
  /// Delay before restarting a crashed worker.
  pub restart_backoff: Duration,
  /// Window during which repeated webhooks for the same issue/event are
  /// suppressed from producing duplicate direct notifications.
  pub dedup_window: Duration,
  /// Environment assumed when the provider payload carries none.
  pub default_environment: String,
}

impl Default for GatewayConfig {
  fn default() -> Self {
    Self {
      worker_command: "correlation-engine".into(),
      worker_args: Vec::new(),
      queue_capacity: 100,
      restart_backoff: Duration::from_millis(500),
      dedup_window: Duration::from_secs(90),
      default_environment: "prod".into(),
    }
  }
}

impl GatewayConfig {
  /// Read overrides from the environment, falling back to defaults.
  pub fn from_env() -> Self {
    let mut config = Self::default();
    if let Ok(cmd) = std::env::var("CORRELATION_ENGINE_CMD") {
      if !cmd.is_empty() {
        config.worker_command = cmd;
      }
    }
    if let Some(cap) = env_parse::<usize>("ALERT_QUEUE_CAPACITY") {
      config.queue_capacity = cap;
    }
    if let Some(ms) = env_parse::<u64>("WORKER_RESTART_BACKOFF_MS") {
      config.restart_backoff = Duration::from_millis(ms);
    }
    if let Some(secs) = env_parse::<u64>("DEDUP_WINDOW_SECS") {
      config.dedup_window = Duration::from_secs(secs);
    }
    if let Ok(env) = std::env::var("DEFAULT_ENVIRONMENT") {
      if !env.is_empty() {
        config.default_environment = env;
      }
    }
    config
  }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
  std::env::var(key).ok().and_then(|v| v.parse().ok())
}
