//! Normalize inbound events into canonical internal Event models.
//!
//! Lenient by contract: absent severity defaults to `error`, absent timestamp
//! to now, absent environment to the configured default. An empty stacktrace
//! is replaced with a single synthetic frame rather than rejected.

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::EngineError;
use crate::types::*;

/// File used for the synthetic frame when no real frames are resolvable.
pub const SYNTHETIC_FRAME_FILE: &str = "<unknown>";

/// Canonical short names for common environment aliases.
pub fn canonicalize_environment(env: &str) -> String {
  match env.to_ascii_lowercase().trim() {
    "production" | "prod" | "live" => "prod".into(),
    "staging" | "stage" | "preprod" => "staging".into(),
    "development" | "develop" | "dev" | "local" => "dev".into(),
    other => other.to_string(),
  }
}

/// Parse and normalize an InboundEvent into a canonical Event.
pub fn normalize(raw: &InboundEvent, config: &Config) -> Result<Event, EngineError> {
  let timestamp = match &raw.timestamp {
    Some(t) => DateTime::parse_from_rfc3339(t)
      .map_err(|e| EngineError::validation("timestamp", &format!("invalid RFC3339: {e}")))?
      .with_timezone(&Utc),
    None => Utc::now(),
  };

  let severity = match &raw.severity {
    Some(s) => Severity::from_str_loose(s).unwrap_or(Severity::Error),
    None => Severity::Error,
  };

  if raw.source.is_empty() {
    return Err(EngineError::validation("source", "must not be empty"));
  }
  if raw.service.is_empty() {
    return Err(EngineError::validation("service", "must not be empty"));
  }
  if raw.exception_type.is_empty() {
    return Err(EngineError::validation("exception_type", "must not be empty"));
  }

  let environment = match raw.environment.as_deref() {
    Some(e) if !e.is_empty() => canonicalize_environment(e),
    _ => config.default_environment.clone(),
  };

  let mut frames: Vec<Frame> = raw
    .stacktrace
    .iter()
    .filter(|f| !f.file.is_empty())
    .map(|f| Frame {
      file: normalize_path(&f.file),
      function: f.function.clone().unwrap_or_default(),
      line: f.line.filter(|&l| l >= 1),
      column: f.column,
    })
    .collect();
  if frames.is_empty() {
    frames.push(Frame {
      file: SYNTHETIC_FRAME_FILE.into(),
      function: String::new(),
      line: None,
      column: None,
    });
  }

  let change_window = match &raw.change_window {
    Some(cw) => Some(normalize_change_window(cw)?),
    None => None,
  };

  let correlation_hints = raw
    .correlation_hints
    .as_ref()
    .map(|h| CorrelationHints {
      critical_paths: h
        .critical_paths
        .iter()
        .map(|p| p.to_ascii_lowercase())
        .collect(),
      low_priority_paths: if h.low_priority_paths.is_empty() {
        default_low_priority_paths()
      } else {
        h.low_priority_paths
          .iter()
          .map(|p| p.to_ascii_lowercase())
          .collect()
      },
    })
    .unwrap_or_else(|| CorrelationHints {
      critical_paths: Vec::new(),
      low_priority_paths: default_low_priority_paths(),
    });

  Ok(Event {
    source: raw.source.to_ascii_lowercase(),
    service: raw.service.to_ascii_lowercase(),
    environment,
    timestamp,
    severity,
    exception_type: raw.exception_type.clone(),
    message: raw.message.clone(),
    frames,
    tags: raw.tags.clone(),
    links: raw.links.clone(),
    change_window,
    correlation_hints,
    api_route: raw.api_route.clone(),
    request_url: raw.request_url.clone(),
  })
}

fn default_low_priority_paths() -> Vec<String> {
  vec![
    "docs/".into(),
    "doc/".into(),
    "tests/".into(),
    "test/".into(),
    "spec/".into(),
    "__tests__/".into(),
    ".md".into(),
  ]
}

fn normalize_change_window(cw: &InboundChangeWindow) -> Result<ChangeWindow, EngineError> {
  let deploy_time = DateTime::parse_from_rfc3339(&cw.deploy_time)
    .map_err(|e| {
      EngineError::validation("change_window.deploy_time", &format!("invalid RFC3339: {e}"))
    })?
    .with_timezone(&Utc);

  let commits = cw
    .commits
    .iter()
    .map(|c| {
      let ts = match &c.timestamp {
        // Unparseable commit timestamps are dropped, not fatal; the commit
        // just loses its recency bonus.
        Some(t) => DateTime::parse_from_rfc3339(t)
          .ok()
          .map(|t| t.with_timezone(&Utc)),
        None => None,
      };
      Ok(CommitInfo {
        id: c.id.clone(),
        timestamp: ts,
        files: c.files.iter().map(|f| normalize_path(f)).collect(),
        risk_score: c.risk_score.filter(|&s| s <= 100),
      })
    })
    .collect::<Result<Vec<_>, EngineError>>()?;

  Ok(ChangeWindow {
    deploy_time,
    commits,
  })
}

/// Normalize a file path for stable comparison:
/// - backslash -> forward slash
/// - collapse repeated slashes
/// - strip leading ./
/// - lowercase
pub fn normalize_path(p: &str) -> String {
  let s = p.replace('\\', "/");
  let mut out = String::with_capacity(s.len());
  let mut prev_slash = false;
  for ch in s.chars() {
    if ch == '/' {
      if !prev_slash {
        out.push('/');
      }
      prev_slash = true;
    } else {
      prev_slash = false;
      out.push(ch);
    }
  }
  let trimmed = out.strip_prefix("./").unwrap_or(&out);
  trimmed.to_ascii_lowercase()
}
