//! Core types for the correlation engine (JSON contracts + internal models).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Inbound types (JSON contract, one object per stdin line)
// ---------------------------------------------------------------------------

/// One inbound event line from stdin. Unknown fields are silently ignored.
///
/// `severity`, `timestamp` and `environment` are optional on the wire; the
/// engine applies the documented defaults during normalization so a thin
/// producer never has to synthesize them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
  pub source: String,
  pub service: String,
  #[serde(default)]
  pub environment: Option<String>,
  #[serde(default)]
  pub timestamp: Option<String>,
  #[serde(default)]
  pub severity: Option<String>,
  pub exception_type: String,
  pub message: String,
  #[serde(default)]
  pub stacktrace: Vec<InboundFrame>,
  #[serde(default)]
  pub tags: HashMap<String, String>,
  #[serde(default)]
  pub links: HashMap<String, String>,
  #[serde(default)]
  pub change_window: Option<InboundChangeWindow>,
  #[serde(default)]
  pub correlation_hints: Option<InboundCorrelationHints>,
  #[serde(default)]
  pub api_route: Option<String>,
  #[serde(default)]
  pub request_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundFrame {
  pub file: String,
  #[serde(default)]
  pub function: Option<String>,
  #[serde(default)]
  pub line: Option<u32>,
  #[serde(default)]
  pub column: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundChangeWindow {
  pub deploy_time: String,
  pub commits: Vec<InboundCommit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundCommit {
  pub id: String,
  #[serde(default)]
  pub timestamp: Option<String>,
  #[serde(default)]
  pub files: Vec<String>,
  #[serde(default)]
  pub risk_score: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundCorrelationHints {
  #[serde(default)]
  pub critical_paths: Vec<String>,
  #[serde(default)]
  pub low_priority_paths: Vec<String>,
}

// ---------------------------------------------------------------------------
// Severity enum (normalized)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Warning,
  Error,
  Critical,
}

impl Severity {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "warning" | "warn" => Some(Self::Warning),
      "error" | "err" => Some(Self::Error),
      "critical" | "fatal" | "crit" => Some(Self::Critical),
      _ => None,
    }
  }

  /// Base contribution to the 0-100 priority score.
  pub fn base_score(self) -> u8 {
    match self {
      Self::Warning => 30,
      Self::Error => 55,
      Self::Critical => 80,
    }
  }
}

// ---------------------------------------------------------------------------
// Internal normalized types
// ---------------------------------------------------------------------------

/// Normalized frame. Paths are slash-normalized and lowercased; line/column
/// are kept for output but excluded from fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Frame {
  pub file: String,
  pub function: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub line: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub column: Option<u32>,
}

/// Canonical internal event after normalization + validation.
#[derive(Debug, Clone)]
pub struct Event {
  pub source: String,
  pub service: String,
  pub environment: String,
  pub timestamp: DateTime<Utc>,
  pub severity: Severity,
  pub exception_type: String,
  pub message: String,
  pub frames: Vec<Frame>,
  pub tags: HashMap<String, String>,
  pub links: HashMap<String, String>,
  pub change_window: Option<ChangeWindow>,
  pub correlation_hints: CorrelationHints,
  pub api_route: Option<String>,
  pub request_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChangeWindow {
  pub deploy_time: DateTime<Utc>,
  pub commits: Vec<CommitInfo>,
}

#[derive(Debug, Clone)]
pub struct CommitInfo {
  pub id: String,
  pub timestamp: Option<DateTime<Utc>>,
  pub files: Vec<String>,
  pub risk_score: Option<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct CorrelationHints {
  pub critical_paths: Vec<String>,
  pub low_priority_paths: Vec<String>,
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// A stable hex string identifying a unique issue group
/// (service, environment, exception type, top application frame).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

// ---------------------------------------------------------------------------
// Incident triggering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
  Spike,
  NewIssue,
  Regression,
  Deploy,
}

impl TriggerReason {
  /// Contribution to the priority score. New issues and spikes rank highest,
  /// deploy correlation next, regressions lowest of the emitting triggers.
  pub fn weight(self) -> u8 {
    match self {
      Self::NewIssue => 15,
      Self::Spike => 15,
      Self::Deploy => 8,
      Self::Regression => 4,
    }
  }
}

// ---------------------------------------------------------------------------
// Output types (JSON contract, what we emit)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomSummary {
  pub exception_type: String,
  pub message: String,
  pub count: u64,
  pub spike_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspectedCause {
  pub commit_id: String,
  pub score: f64,
  pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentSummary {
  pub incident_id: String,
  pub title: String,
  pub service: String,
  pub environment: String,
  pub severity: Severity,
  pub priority_score: u8,
  pub trigger: TriggerReason,
  pub start_time: String,
  pub last_seen: String,
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub tags: HashMap<String, String>,
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub links: HashMap<String, String>,
  #[serde(default)]
  pub top_symptoms: Vec<SymptomSummary>,
  #[serde(default)]
  pub suspected_causes: Vec<SuspectedCause>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub api_route: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub request_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Stream error wrapper
// ---------------------------------------------------------------------------

/// Structured error output for invalid input lines.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}
