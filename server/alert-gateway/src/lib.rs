//! Faultline Alert Gateway
//!
//! HTTP service that receives error-tracker webhooks, fires immediate
//! deduplicated notifications, and feeds every event to the supervised
//! correlation-engine worker whose incident summaries fan out to the
//! organization's resolved recipients.
//! Bind to 127.0.0.1 by default (internal only).

pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod normalizer;
pub mod state;
pub mod supervisor;
pub mod targeting;
pub mod webhook;

pub use config::GatewayConfig;
pub use state::{spawn_summary_listener, AppState};
pub use webhook::{health, webhook};
