//! Shared application state wired into every request handler.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::dedup::DedupGate;
use crate::dispatch::{AlertRecord, Dispatcher, NotificationSink};
use crate::supervisor::Supervisor;
use crate::targeting::OrgDirectory;

pub struct AppState {
  pub config: GatewayConfig,
  pub supervisor: Supervisor,
  pub dedup: Mutex<DedupGate>,
  pub dispatcher: Dispatcher,
}

impl AppState {
  pub fn new(
    config: GatewayConfig,
    directory: Arc<dyn OrgDirectory>,
    sink: Arc<dyn NotificationSink>,
  ) -> Self {
    Self {
      supervisor: Supervisor::new(config.clone()),
      dedup: Mutex::new(DedupGate::new(config.dedup_window)),
      dispatcher: Dispatcher::new(directory, sink),
      config,
    }
  }
}

/// Background task: turn each engine summary into a correlated alert and fan
/// it out to the organization carried in the summary's tags.
pub fn spawn_summary_listener(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
  let mut rx = state.supervisor.subscribe();
  tokio::spawn(async move {
    loop {
      match rx.recv().await {
        Ok(summary) => {
          let Some(org_id) = summary.tags.get("org_id").cloned() else {
            warn!(
              incident_id = %summary.incident_id,
              "summary carries no org_id tag; cannot route"
            );
            continue;
          };
          let alert = AlertRecord::from_summary(&summary, chrono::Utc::now());
          state.dispatcher.dispatch(&org_id, &alert);
        }
        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
          warn!(missed, "summary listener lagged; summaries skipped");
        }
        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
          info!("summary channel closed; listener exiting");
          break;
        }
      }
    }
  })
}
