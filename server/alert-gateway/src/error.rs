//! Structured error types for the alert gateway.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
  #[error("worker spawn failed: {0}")]
  WorkerSpawn(#[from] std::io::Error),

  #[error("worker stdio unavailable: {0}")]
  WorkerStdio(&'static str),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("payload: {0}")]
  Payload(String),
}

impl GatewayError {
  pub fn payload(msg: impl Into<String>) -> Self {
    Self::Payload(msg.into())
  }
}
