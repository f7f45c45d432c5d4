//! HTTP surface: provider webhook intake and the health probe.
//!
//! The webhook route always answers 202 once the body has been read, whatever
//! the payload turns out to be, so a confused provider never escalates into a
//! retry storm. Bad payloads are logged and dropped.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use correlation_engine::InboundEvent;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::dedup::Verdict;
use crate::dispatch::{AlertOrigin, AlertRecord};
use crate::normalizer::{classify_payload, WebhookPayload};
use crate::state::AppState;
use crate::supervisor::EngineStatus;

/// `POST /webhook/:org_id` with a provider payload as the raw body.
pub async fn webhook(
  State(state): State<Arc<AppState>>,
  Path(org_id): Path<String>,
  body: String,
) -> (StatusCode, Json<Value>) {
  let received_at = Utc::now();
  let parsed: Value = match serde_json::from_str(&body) {
    Ok(v) => v,
    Err(e) => {
      warn!(org_id = %org_id, error = %e, "malformed webhook body; ignoring");
      return (
        StatusCode::ACCEPTED,
        Json(json!({"status": "ignored", "reason": "malformed json"})),
      );
    }
  };
  let response = handle_payload(&state, &org_id, &parsed, received_at).await;
  (StatusCode::ACCEPTED, Json(response))
}

/// `GET /health`: snapshot of the worker and its backlog.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<EngineStatus> {
  Json(state.supervisor.status().await)
}

async fn handle_payload(
  state: &AppState,
  org_id: &str,
  body: &Value,
  received_at: DateTime<Utc>,
) -> Value {
  let payload = match classify_payload(body, &state.config.default_environment, received_at) {
    Ok(p) => p,
    Err(e) => {
      warn!(org_id = %org_id, error = %e, "unprocessable webhook payload; ignoring");
      return json!({"status": "ignored", "reason": e.to_string()});
    }
  };

  match payload {
    WebhookPayload::Test => {
      info!(org_id = %org_id, "test webhook received");
      let alert = AlertRecord {
        alert_id: format!("test-{}", received_at.timestamp_millis()),
        origin: AlertOrigin::Direct,
        title: "Test notification".into(),
        body: "Webhook connectivity test".into(),
        priority_score: None,
        links: Default::default(),
        created_at: received_at,
      };
      let outcome = state.dispatcher.dispatch(org_id, &alert);
      json!({"status": "ok", "kind": "test", "notified": outcome.notified})
    }

    WebhookPayload::IssueCreated { issue_id } => {
      // Pre-announce the issue so its first event webhook does not
      // double-alert; the callback itself produces no notification.
      match state.dedup.lock() {
        Ok(mut gate) => gate.record_issue(&issue_id, received_at),
        Err(poisoned) => poisoned.into_inner().record_issue(&issue_id, received_at),
      }
      json!({"status": "accepted", "kind": "issue_created"})
    }

    WebhookPayload::Event {
      mut event,
      issue_id,
      event_id,
    } => {
      // The org rides in the event tags so the engine echoes it back in the
      // summary and the listener can route the correlated alert.
      event.tags.insert("org_id".into(), org_id.to_string());

      let verdict = match state.dedup.lock() {
        Ok(mut gate) => gate.check(issue_id.as_deref(), event_id.as_deref(), received_at),
        Err(poisoned) => {
          poisoned
            .into_inner()
            .check(issue_id.as_deref(), event_id.as_deref(), received_at)
        }
      };
      if verdict == Verdict::Deliver {
        let alert = direct_alert(&event, issue_id.as_deref(), event_id.as_deref(), received_at);
        state.dispatcher.dispatch(org_id, &alert);
      }

      // Correlation always sees the event, deduplicated or not.
      if let Err(e) = state.supervisor.ensure_started().await {
        warn!(error = %e, "correlation worker unavailable; event queued");
      }
      state.supervisor.ingest(event).await;

      json!({
        "status": "accepted",
        "kind": "event",
        "deduplicated": verdict == Verdict::Suppress,
      })
    }
  }
}

fn direct_alert(
  event: &InboundEvent,
  issue_id: Option<&str>,
  event_id: Option<&str>,
  received_at: DateTime<Utc>,
) -> AlertRecord {
  let alert_id = event_id
    .map(|e| format!("evt-{e}"))
    .or_else(|| issue_id.map(|i| format!("issue-{i}")))
    .unwrap_or_else(|| format!("evt-{}", received_at.timestamp_millis()));
  let environment = event.environment.as_deref().unwrap_or("prod");
  AlertRecord {
    alert_id,
    origin: AlertOrigin::Direct,
    title: format!(
      "{} in {}/{}",
      event.exception_type, event.service, environment
    ),
    body: event.message.clone(),
    priority_score: None,
    links: event.links.clone(),
    created_at: received_at,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::GatewayConfig;
  use crate::dispatch::{NotificationSink, SinkError};
  use crate::targeting::{InMemoryDirectory, MemberRole, OrgMember, UserProfile};
  use std::sync::Mutex as StdMutex;

  #[derive(Default)]
  struct CountingSink {
    persisted: StdMutex<Vec<(String, String)>>,
    emailed: StdMutex<Vec<String>>,
  }

  impl NotificationSink for CountingSink {
    fn persist(&self, user_id: &str, alert: &AlertRecord) -> Result<String, SinkError> {
      self
        .persisted
        .lock()
        .unwrap()
        .push((user_id.to_string(), alert.alert_id.clone()));
      Ok("rec".into())
    }

    fn push(&self, _user_id: &str, _record_id: &str, _alert: &AlertRecord) -> Result<(), SinkError> {
      Ok(())
    }

    fn email(&self, user_id: &str, _address: &str, _subject: &str, _body: &str)
      -> Result<(), SinkError> {
      self.emailed.lock().unwrap().push(user_id.to_string());
      Ok(())
    }
  }

  fn test_state() -> (Arc<AppState>, Arc<CountingSink>) {
    let mut dir = InMemoryDirectory::default();
    dir.members.insert(
      "org".into(),
      vec![OrgMember {
        user_id: "alice".into(),
        role: MemberRole::Owner,
      }],
    );
    dir.users.insert(
      "alice".into(),
      UserProfile {
        email: Some("alice@example.com".into()),
        receive_incident_notifications: true,
      },
    );
    dir
      .repo_owners
      .insert("org".into(), ["alice".to_string()].into());

    let sink = Arc::new(CountingSink::default());
    let state = Arc::new(AppState::new(
      GatewayConfig::default(),
      Arc::new(dir),
      sink.clone(),
    ));
    (state, sink)
  }

  fn event_body(event_id: &str) -> String {
    json!({
      "project_slug": "api",
      "issue": {"id": "i1"},
      "event": {
        "event_id": event_id,
        "level": "error",
        "exception": {"values": [{"type": "TypeError", "value": "boom"}]}
      }
    })
    .to_string()
  }

  #[tokio::test]
  async fn malformed_body_still_returns_202() {
    let (state, sink) = test_state();
    let (status, Json(body)) =
      webhook(State(state), Path("org".into()), "not json".into()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "ignored");
    assert!(sink.persisted.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_ping_notifies_without_email() {
    let (state, sink) = test_state();
    let (status, Json(body)) = webhook(
      State(state),
      Path("org".into()),
      json!({"installation": {"uuid": "x"}}).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["kind"], "test");
    assert_eq!(body["notified"], 1);
    assert!(sink.emailed.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn event_webhook_alerts_and_queues_for_correlation() {
    let (state, sink) = test_state();
    let (_, Json(body)) = webhook(
      State(state.clone()),
      Path("org".into()),
      event_body("e1"),
    )
    .await;
    assert_eq!(body["kind"], "event");
    assert_eq!(body["deduplicated"], false);
    assert_eq!(sink.persisted.lock().unwrap().len(), 1);
    // Default worker command does not exist here, so the event is backlogged.
    assert_eq!(state.supervisor.status().await.queued_events, 1);
  }

  #[tokio::test]
  async fn duplicate_event_webhook_skips_the_direct_alert_but_still_correlates() {
    let (state, sink) = test_state();
    webhook(State(state.clone()), Path("org".into()), event_body("e1")).await;
    let (_, Json(body)) =
      webhook(State(state.clone()), Path("org".into()), event_body("e2")).await;

    // Same issue id: direct alert suppressed, correlation still fed.
    assert_eq!(body["deduplicated"], true);
    assert_eq!(sink.persisted.lock().unwrap().len(), 1);
    assert_eq!(state.supervisor.status().await.queued_events, 2);
  }

  #[tokio::test]
  async fn issue_created_callback_preempts_the_first_event_alert() {
    let (state, sink) = test_state();
    let (_, Json(body)) = webhook(
      State(state.clone()),
      Path("org".into()),
      json!({"action": "created", "issue": {"id": "i1"}}).to_string(),
    )
    .await;
    assert_eq!(body["kind"], "issue_created");
    assert!(sink.persisted.lock().unwrap().is_empty());

    let (_, Json(body)) =
      webhook(State(state), Path("org".into()), event_body("e1")).await;
    assert_eq!(body["deduplicated"], true);
    assert!(sink.persisted.lock().unwrap().is_empty());
  }
}
