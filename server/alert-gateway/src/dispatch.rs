//! Notification dispatch: fan-out of one alert to the resolved recipients.
//!
//! Three sinks: a persisted record, a best-effort real-time push, and email.
//! Email goes out only for the correlated summary form, never for raw direct
//! alerts, so one root incident can never double-email. A per-alert delivery
//! ledger enforces at-most-once per recipient; a sink failure for one
//! recipient is logged and never aborts the rest of the fan-out.

use chrono::{DateTime, Utc};
use correlation_engine::IncidentSummary;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

use crate::targeting::{resolve_recipients, OrgDirectory};

/// Alerts the ledger remembers before forgetting the oldest.
const DELIVERY_LEDGER_CAP: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOrigin {
  /// Immediate pre-correlation alert straight from a webhook.
  Direct,
  /// Consolidated summary emitted by the correlation engine.
  Correlated,
}

/// One logical alert, ready for fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
  pub alert_id: String,
  pub origin: AlertOrigin,
  pub title: String,
  pub body: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority_score: Option<u8>,
  pub links: HashMap<String, String>,
  pub created_at: DateTime<Utc>,
}

impl AlertRecord {
  /// Build the correlated alert form from an engine summary.
  pub fn from_summary(summary: &IncidentSummary, created_at: DateTime<Utc>) -> Self {
    let mut body = String::new();
    if let Some(symptom) = summary.top_symptoms.first() {
      body.push_str(&format!(
        "{}: {} ({} occurrences)",
        symptom.exception_type, symptom.message, symptom.count
      ));
    }
    for cause in summary.suspected_causes.iter().take(3) {
      body.push_str(&format!("\nsuspect commit {}", cause.commit_id));
      if let Some(evidence) = cause.evidence.first() {
        body.push_str(&format!(" ({evidence})"));
      }
    }
    Self {
      alert_id: summary.incident_id.clone(),
      origin: AlertOrigin::Correlated,
      title: summary.title.clone(),
      body,
      priority_score: Some(summary.priority_score),
      links: summary.links.clone(),
      created_at,
    }
  }
}

#[derive(Debug, Error)]
pub enum SinkError {
  #[error("sink unavailable: {0}")]
  Unavailable(String),
  #[error("sink rejected: {0}")]
  Rejected(String),
}

/// Delivery endpoints owned by the surrounding product.
pub trait NotificationSink: Send + Sync {
  /// Persist one notification record; returns the stored record id.
  fn persist(&self, user_id: &str, alert: &AlertRecord) -> Result<String, SinkError>;
  /// Real-time push; best-effort, a no-op when the user is not connected.
  fn push(&self, user_id: &str, record_id: &str, alert: &AlertRecord) -> Result<(), SinkError>;
  fn email(&self, user_id: &str, address: &str, subject: &str, body: &str)
    -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
  pub notified: usize,
  pub skipped: usize,
  pub failed: usize,
}

pub struct Dispatcher {
  directory: Arc<dyn OrgDirectory>,
  sink: Arc<dyn NotificationSink>,
  ledger: Mutex<DeliveryLedger>,
}

#[derive(Default)]
struct DeliveryLedger {
  delivered: HashMap<String, HashSet<String>>,
  order: VecDeque<String>,
}

impl DeliveryLedger {
  /// True when this (alert, user) pair was already delivered; records it
  /// otherwise.
  fn check_and_mark(&mut self, alert_id: &str, user_id: &str) -> bool {
    if !self.delivered.contains_key(alert_id) {
      self.order.push_back(alert_id.to_string());
      if self.order.len() > DELIVERY_LEDGER_CAP {
        if let Some(evicted) = self.order.pop_front() {
          self.delivered.remove(&evicted);
        }
      }
    }
    !self
      .delivered
      .entry(alert_id.to_string())
      .or_default()
      .insert(user_id.to_string())
  }
}

impl Dispatcher {
  pub fn new(directory: Arc<dyn OrgDirectory>, sink: Arc<dyn NotificationSink>) -> Self {
    Self {
      directory,
      sink,
      ledger: Mutex::new(DeliveryLedger::default()),
    }
  }

  /// Fan an alert out to the organization's resolved recipients.
  pub fn dispatch(&self, org_id: &str, alert: &AlertRecord) -> DispatchOutcome {
    let recipients = resolve_recipients(self.directory.as_ref(), org_id);
    let mut outcome = DispatchOutcome::default();

    for user_id in &recipients {
      let already = match self.ledger.lock() {
        Ok(mut ledger) => ledger.check_and_mark(&alert.alert_id, user_id),
        Err(poisoned) => poisoned.into_inner().check_and_mark(&alert.alert_id, user_id),
      };
      if already {
        outcome.skipped += 1;
        continue;
      }

      match self.deliver_one(user_id, alert) {
        Ok(()) => outcome.notified += 1,
        Err(e) => {
          // One recipient failing never aborts the rest of the fan-out.
          warn!(user_id = %user_id, error = %e, "notification delivery failed");
          outcome.failed += 1;
        }
      }
    }

    info!(
      org_id = %org_id,
      alert_id = %alert.alert_id,
      notified = outcome.notified,
      skipped = outcome.skipped,
      failed = outcome.failed,
      "alert dispatched"
    );
    outcome
  }

  fn deliver_one(&self, user_id: &str, alert: &AlertRecord) -> Result<(), SinkError> {
    let record_id = self.sink.persist(user_id, alert)?;

    // Push is best-effort: a failure here is not a delivery failure.
    if let Err(e) = self.sink.push(user_id, &record_id, alert) {
      warn!(user_id = %user_id, error = %e, "push delivery failed; record persisted");
    }

    // Email only for the consolidated summary, never the raw direct alert.
    if alert.origin == AlertOrigin::Correlated {
      if let Some(address) = self.directory.user(user_id).and_then(|u| u.email) {
        self
          .sink
          .email(user_id, &address, &alert.title, &alert.body)?;
      }
    }
    Ok(())
  }
}

/// Sink that logs deliveries: the integration point when running the gateway
/// without the surrounding product's persistence/push/email services.
#[derive(Debug, Default)]
pub struct LoggingSink {
  counter: std::sync::atomic::AtomicU64,
}

impl NotificationSink for LoggingSink {
  fn persist(&self, user_id: &str, alert: &AlertRecord) -> Result<String, SinkError> {
    let n = self
      .counter
      .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    info!(user_id = %user_id, alert_id = %alert.alert_id, "notification persisted");
    Ok(format!("rec-{n}"))
  }

  fn push(&self, user_id: &str, record_id: &str, _alert: &AlertRecord) -> Result<(), SinkError> {
    info!(user_id = %user_id, record_id = %record_id, "notification pushed");
    Ok(())
  }

  fn email(&self, user_id: &str, address: &str, subject: &str, _body: &str)
    -> Result<(), SinkError> {
    info!(user_id = %user_id, address = %address, subject = %subject, "notification emailed");
    Ok(())
  }
}
