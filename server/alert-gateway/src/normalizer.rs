//! Event Normalizer: converts a loosely-typed provider webhook payload into
//! the engine's canonical `InboundEvent`.
//!
//! Provider payloads are treated as an untyped JSON tree; for every field a
//! defined fallback order of alternate names is tried. Missing optional
//! fields never fail normalization: severity defaults to `error`, the
//! timestamp to the supplied `received_at`, the environment to the configured
//! default. An event with no resolvable frames gets a single synthetic frame.

use chrono::{DateTime, TimeZone, Utc};
use correlation_engine::types::{
  InboundChangeWindow, InboundCorrelationHints, InboundEvent, InboundFrame,
};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::GatewayError;

/// What a webhook body turned out to contain.
#[derive(Debug)]
pub enum WebhookPayload {
  /// Minimal/test ping: no event and no issue body.
  Test,
  /// Issue-created callback with no concrete event attached.
  IssueCreated { issue_id: String },
  /// A concrete error event.
  Event {
    event: InboundEvent,
    issue_id: Option<String>,
    event_id: Option<String>,
  },
}

/// Classify and normalize a webhook body.
///
/// `received_at` anchors all "now" defaults so classification stays pure.
pub fn classify_payload(
  body: &Value,
  default_environment: &str,
  received_at: DateTime<Utc>,
) -> Result<WebhookPayload, GatewayError> {
  if !body.is_object() {
    return Err(GatewayError::payload("webhook body is not a JSON object"));
  }

  let event_value = body
    .get("event")
    .or_else(|| body.pointer("/data/event"))
    .or_else(|| body.pointer("/data/error"))
    .filter(|v| v.is_object());

  let issue_id = string_at(body, &["/issue/id", "/data/issue/id", "/issue_id"]);

  match event_value {
    Some(event) => {
      let event_id = string_at(event, &["/event_id", "/id"]);
      let normalized = normalize_event(body, event, default_environment, received_at)?;
      Ok(WebhookPayload::Event {
        event: normalized,
        issue_id,
        event_id,
      })
    }
    None => match issue_id {
      Some(issue_id) => Ok(WebhookPayload::IssueCreated { issue_id }),
      None => Ok(WebhookPayload::Test),
    },
  }
}

fn normalize_event(
  body: &Value,
  event: &Value,
  default_environment: &str,
  received_at: DateTime<Utc>,
) -> Result<InboundEvent, GatewayError> {
  let exception = event
    .pointer("/exception/values/0")
    .or_else(|| event.pointer("/exception/0"));

  let exception_type = exception
    .and_then(|e| e.get("type"))
    .and_then(Value::as_str)
    .or_else(|| event.get("exception_type").and_then(Value::as_str))
    .or_else(|| event.get("type").and_then(Value::as_str))
    .unwrap_or("Error")
    .to_string();

  let message = exception
    .and_then(|e| e.get("value"))
    .and_then(Value::as_str)
    .or_else(|| event.get("message").and_then(Value::as_str))
    .or_else(|| event.get("title").and_then(Value::as_str))
    .or_else(|| body.pointer("/message").and_then(Value::as_str))
    .unwrap_or_default()
    .to_string();

  let service = string_at(event, &["/service"])
    .or_else(|| string_at(body, &["/project_slug", "/project", "/data/project"]))
    .unwrap_or_else(|| "app".into());

  let environment = string_at(event, &["/environment"])
    .filter(|e| !e.is_empty())
    .unwrap_or_else(|| default_environment.to_string());

  let severity = string_at(event, &["/level", "/severity"]);

  let timestamp = event
    .get("timestamp")
    .and_then(parse_timestamp)
    .unwrap_or(received_at);

  let stacktrace = exception
    .and_then(|e| e.pointer("/stacktrace/frames"))
    .or_else(|| event.pointer("/stacktrace/frames"))
    .and_then(Value::as_array)
    .map(|frames| normalize_frames(frames))
    .unwrap_or_default();

  let tags = normalize_tags(event.get("tags"));

  let mut links = HashMap::new();
  if let Some(url) = string_at(body, &["/url", "/issue/url", "/data/issue/url"])
    .or_else(|| string_at(event, &["/web_url", "/url"]))
  {
    links.insert("source_url".to_string(), url);
  }

  let request_url = string_at(event, &["/request/url", "/request_url"]);
  let api_route = request_url.as_deref().map(extract_route);

  // Deploy/commit enrichment rides alongside the provider payload when an
  // upstream integration attached it; shape mismatches degrade to None.
  let change_window: Option<InboundChangeWindow> = body
    .get("change_window")
    .cloned()
    .and_then(|v| serde_json::from_value(v).ok());
  let correlation_hints: Option<InboundCorrelationHints> = body
    .get("correlation_hints")
    .cloned()
    .and_then(|v| serde_json::from_value(v).ok());

  Ok(InboundEvent {
    source: string_at(body, &["/source", "/provider"]).unwrap_or_else(|| "sentry".into()),
    service,
    environment: Some(environment),
    timestamp: Some(timestamp.to_rfc3339()),
    severity,
    exception_type,
    message,
    stacktrace,
    tags,
    links,
    change_window,
    correlation_hints,
    api_route,
    request_url,
  })
}

/// Provider frames are ordered outermost-first; the engine wants the crash
/// site at index 0, so the order is reversed.
fn normalize_frames(frames: &[Value]) -> Vec<InboundFrame> {
  frames
    .iter()
    .rev()
    .filter_map(|f| {
      let file = f
        .get("filename")
        .and_then(Value::as_str)
        .or_else(|| f.get("abs_path").and_then(Value::as_str))
        .or_else(|| f.get("file").and_then(Value::as_str))?;
      if file.is_empty() {
        return None;
      }
      Some(InboundFrame {
        file: file.to_string(),
        function: f.get("function").and_then(Value::as_str).map(String::from),
        line: f
          .get("lineno")
          .or_else(|| f.get("line"))
          .and_then(Value::as_u64)
          .map(|l| l as u32),
        column: f
          .get("colno")
          .or_else(|| f.get("column"))
          .and_then(Value::as_u64)
          .map(|c| c as u32),
      })
    })
    .collect()
}

/// Tags arrive either as an object or as a list of `[key, value]` pairs.
fn normalize_tags(tags: Option<&Value>) -> HashMap<String, String> {
  let mut out = HashMap::new();
  match tags {
    Some(Value::Object(map)) => {
      for (k, v) in map {
        if let Some(s) = v.as_str() {
          out.insert(k.clone(), s.to_string());
        }
      }
    }
    Some(Value::Array(pairs)) => {
      for pair in pairs {
        if let (Some(k), Some(v)) = (
          pair.get(0).and_then(Value::as_str),
          pair.get(1).and_then(Value::as_str),
        ) {
          out.insert(k.to_string(), v.to_string());
        }
      }
    }
    _ => {}
  }
  out
}

/// Extract the path from a request URL; falls back to the raw string when it
/// does not parse as an absolute URL.
fn extract_route(raw: &str) -> String {
  match url::Url::parse(raw) {
    Ok(parsed) => parsed.path().to_string(),
    Err(_) => raw.split('?').next().unwrap_or(raw).to_string(),
  }
}

/// First string (or stringified number) found at any of the JSON pointers.
fn string_at(value: &Value, pointers: &[&str]) -> Option<String> {
  pointers.iter().find_map(|p| {
    value.pointer(p).and_then(|v| match v {
      Value::String(s) if !s.is_empty() => Some(s.clone()),
      Value::Number(n) => Some(n.to_string()),
      _ => None,
    })
  })
}

/// Timestamps arrive as RFC3339 strings or as epoch seconds (possibly
/// fractional).
fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
  match v {
    Value::String(s) => DateTime::parse_from_rfc3339(s)
      .ok()
      .map(|t| t.with_timezone(&Utc)),
    Value::Number(n) => {
      let secs = n.as_f64()?;
      Utc.timestamp_opt(secs as i64, 0).single()
    }
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use serde_json::json;

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 14, 30, 0).unwrap()
  }

  fn sentry_body() -> Value {
    json!({
      "project_slug": "api",
      "url": "https://sentry.io/issues/123",
      "issue": {"id": 123},
      "event": {
        "event_id": "abc",
        "level": "error",
        "environment": "production",
        "timestamp": "2025-03-10T14:29:00Z",
        "exception": {
          "values": [{
            "type": "TypeError",
            "value": "x is not a function",
            "stacktrace": {
              "frames": [
                {"filename": "src/server.ts", "function": "main", "lineno": 10},
                {"filename": "src/auth/login.ts", "function": "login", "lineno": 42, "colno": 7}
              ]
            }
          }]
        },
        "tags": {"release": "v1.2.3"},
        "request": {"url": "https://api.example.com/v1/login?next=/home"}
      }
    })
  }

  #[test]
  fn sentry_event_classified_and_normalized() {
    let payload = classify_payload(&sentry_body(), "prod", now()).unwrap();
    let (event, issue_id, event_id) = match payload {
      WebhookPayload::Event {
        event,
        issue_id,
        event_id,
      } => (event, issue_id, event_id),
      other => panic!("expected event payload, got {other:?}"),
    };

    assert_eq!(issue_id.as_deref(), Some("123"));
    assert_eq!(event_id.as_deref(), Some("abc"));
    assert_eq!(event.service, "api");
    assert_eq!(event.exception_type, "TypeError");
    assert_eq!(event.message, "x is not a function");
    assert_eq!(event.severity.as_deref(), Some("error"));
    // Frames reversed: crash site first.
    assert_eq!(event.stacktrace[0].file, "src/auth/login.ts");
    assert_eq!(event.stacktrace[0].line, Some(42));
    assert_eq!(event.stacktrace[1].file, "src/server.ts");
    assert_eq!(event.api_route.as_deref(), Some("/v1/login"));
    assert_eq!(
      event.links.get("source_url").map(String::as_str),
      Some("https://sentry.io/issues/123")
    );
  }

  #[test]
  fn issue_created_without_event_detected() {
    let body = json!({"action": "created", "issue": {"id": "987"}});
    match classify_payload(&body, "prod", now()).unwrap() {
      WebhookPayload::IssueCreated { issue_id } => assert_eq!(issue_id, "987"),
      other => panic!("expected issue-created, got {other:?}"),
    }
  }

  #[test]
  fn empty_body_is_a_test_ping() {
    let body = json!({"installation": {"uuid": "x"}});
    assert!(matches!(
      classify_payload(&body, "prod", now()).unwrap(),
      WebhookPayload::Test
    ));
  }

  #[test]
  fn non_object_body_is_rejected() {
    assert!(classify_payload(&json!([1, 2, 3]), "prod", now()).is_err());
    assert!(classify_payload(&json!("hello"), "prod", now()).is_err());
  }

  #[test]
  fn missing_optionals_get_defaults() {
    let body = json!({"event": {"message": "boom"}});
    let payload = classify_payload(&body, "staging", now()).unwrap();
    let event = match payload {
      WebhookPayload::Event { event, .. } => event,
      other => panic!("expected event, got {other:?}"),
    };
    assert_eq!(event.service, "app");
    assert_eq!(event.environment.as_deref(), Some("staging"));
    assert_eq!(event.severity, None);
    assert_eq!(event.exception_type, "Error");
    assert_eq!(event.timestamp, Some(now().to_rfc3339()));
    assert!(event.stacktrace.is_empty());
  }

  #[test]
  fn epoch_timestamp_accepted() {
    let body = json!({"event": {"message": "boom", "timestamp": 1741616940}});
    let payload = classify_payload(&body, "prod", now()).unwrap();
    let event = match payload {
      WebhookPayload::Event { event, .. } => event,
      other => panic!("expected event, got {other:?}"),
    };
    let ts = event.timestamp.unwrap();
    assert!(ts.starts_with("2025-03-10T"));
  }

  #[test]
  fn unparseable_request_url_falls_back_to_raw_path() {
    let body = json!({"event": {
      "message": "boom",
      "request": {"url": "/relative/path?x=1"}
    }});
    let payload = classify_payload(&body, "prod", now()).unwrap();
    let event = match payload {
      WebhookPayload::Event { event, .. } => event,
      other => panic!("expected event, got {other:?}"),
    };
    assert_eq!(event.api_route.as_deref(), Some("/relative/path"));
  }

  #[test]
  fn tag_pairs_and_tag_objects_both_accepted() {
    let body = json!({"event": {
      "message": "boom",
      "tags": [["release", "v9"], ["zone", "us-east"]]
    }});
    let payload = classify_payload(&body, "prod", now()).unwrap();
    let event = match payload {
      WebhookPayload::Event { event, .. } => event,
      other => panic!("expected event, got {other:?}"),
    };
    assert_eq!(event.tags.get("release").map(String::as_str), Some("v9"));
    assert_eq!(event.tags.get("zone").map(String::as_str), Some("us-east"));
  }

  #[test]
  fn change_window_passthrough_survives() {
    let mut body = sentry_body();
    body["change_window"] = json!({
      "deploy_time": "2025-03-10T14:00:00Z",
      "commits": [{"id": "c1", "files": ["src/auth/login.ts"], "risk_score": 70}]
    });
    let payload = classify_payload(&body, "prod", now()).unwrap();
    let event = match payload {
      WebhookPayload::Event { event, .. } => event,
      other => panic!("expected event, got {other:?}"),
    };
    let cw = event.change_window.expect("change window should survive");
    assert_eq!(cw.commits[0].id, "c1");
  }
}
