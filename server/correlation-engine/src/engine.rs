//! Core engine: per-fingerprint state, trigger classification, summary assembly.
//!
//! Trigger priority: new_issue > regression > spike > deploy. A valid event
//! that matches none of these still updates history but emits nothing, so
//! steady-state noise never floods downstream notifications.

use std::collections::HashMap;

use crate::config::Config;
use crate::correlation;
use crate::error::EngineError;
use crate::fingerprint;
use crate::history::HistoryEntry;
use crate::normalize;
use crate::types::*;

/// The incident correlation engine. Holds in-memory state across events.
///
/// State is one map entry per fingerprint: a failure while handling one
/// fingerprint cannot corrupt another's history.
pub struct Engine {
  config: Config,
  entries: HashMap<Fingerprint, HistoryEntry>,
}

impl Engine {
  pub fn new(config: Config) -> Self {
    Self {
      config,
      entries: HashMap::new(),
    }
  }

  pub fn with_defaults() -> Self {
    Self::new(Config::default())
  }

  /// Number of distinct fingerprints tracked.
  pub fn tracked_issues(&self) -> usize {
    self.entries.len()
  }

  /// Process a single inbound event.
  ///
  /// Returns `Ok(Some(summary))` when an incident is triggered, `Ok(None)`
  /// when the event only updates history.
  pub fn process(&mut self, raw: &InboundEvent) -> Result<Option<IncidentSummary>, EngineError> {
    let event = normalize::normalize(raw, &self.config)?;
    let fp = fingerprint::compute(&event);

    let is_new = !self.entries.contains_key(&fp);
    let entry = self
      .entries
      .entry(fp.clone())
      .or_insert_with(|| HistoryEntry::new(event.timestamp));

    let obs = entry.record(event.timestamp, &self.config);

    let trigger = if is_new {
      Some(TriggerReason::NewIssue)
    } else if obs.regressed {
      entry.reset_activation(event.timestamp);
      Some(TriggerReason::Regression)
    } else if obs.spike_factor >= self.config.spike_multiplier {
      Some(TriggerReason::Spike)
    } else if deploy_correlated(&self.config, &event) {
      Some(TriggerReason::Deploy)
    } else {
      None
    };

    // Symptoms land after any activation reset so a regression's first
    // occurrence is counted against the fresh activation.
    entry.record_symptom(
      (event.exception_type.clone(), event.message.clone()),
      event.timestamp,
    );

    let trigger = match trigger {
      Some(t) => t,
      None => return Ok(None),
    };

    // Snapshot releases the mutable borrow before assembly.
    let entry_snapshot = entry.clone();
    Ok(Some(self.assemble_summary(
      &event,
      &fp,
      &entry_snapshot,
      obs.spike_factor,
      trigger,
    )))
  }

  fn assemble_summary(
    &self,
    event: &Event,
    fp: &Fingerprint,
    entry: &HistoryEntry,
    spike_factor: f64,
    trigger: TriggerReason,
  ) -> IncidentSummary {
    // Stable per fingerprint-activation: the id only changes when a
    // regression re-opens the issue with a new activation anchor.
    let incident_id = {
      let mut hasher = blake3::Hasher::new();
      hasher.update(fp.0.as_bytes());
      hasher.update(b"|");
      hasher.update(
        entry
          .activation_start
          .format("%Y-%m-%dT%H:%M")
          .to_string()
          .as_bytes(),
      );
      let hex = hasher.finalize().to_hex();
      format!("inc-{}", &hex[..16])
    };

    let title = format!(
      "{}: {} in {}/{}",
      match trigger {
        TriggerReason::Spike => "Spike",
        TriggerReason::NewIssue => "New issue",
        TriggerReason::Regression => "Regression",
        TriggerReason::Deploy => "Deploy-correlated",
      },
      event.exception_type,
      event.service,
      event.environment
    );

    let priority_score = self.priority_score(event, trigger, spike_factor);

    let top_symptoms = self.top_symptoms(event, entry);

    let suspected_causes = match &event.change_window {
      Some(cw) => correlation::rank_suspects(
        &event.frames,
        cw,
        &event.correlation_hints,
        &self.config,
      ),
      None => Vec::new(),
    };

    IncidentSummary {
      incident_id,
      title,
      service: event.service.clone(),
      environment: event.environment.clone(),
      severity: event.severity,
      priority_score,
      trigger,
      start_time: entry.activation_start.to_rfc3339(),
      last_seen: entry.last_seen.to_rfc3339(),
      tags: event.tags.clone(),
      links: event.links.clone(),
      top_symptoms,
      suspected_causes,
      api_route: event.api_route.clone(),
      request_url: event.request_url.clone(),
    }
  }

  /// Weighted sum of severity, trigger, environment, and spike factor,
  /// clamped to [0, 100].
  fn priority_score(&self, event: &Event, trigger: TriggerReason, spike_factor: f64) -> u8 {
    let env_weight: u8 = match event.environment.as_str() {
      "prod" => 10,
      "staging" => 4,
      _ => 0,
    };
    let spike_bonus = if trigger == TriggerReason::Spike {
      ((spike_factor - 1.0).max(0.0) * 2.0).min(20.0) as u8
    } else {
      0
    };
    (event.severity.base_score() as u16
      + trigger.weight() as u16
      + env_weight as u16
      + spike_bonus as u16)
      .min(100) as u8
  }

  /// Distinct (exception_type, message) pairs of the current activation,
  /// ranked by count, capped to the configured maximum.
  fn top_symptoms(&self, event: &Event, entry: &HistoryEntry) -> Vec<SymptomSummary> {
    let mut symptoms: Vec<SymptomSummary> = entry
      .symptoms
      .iter()
      .map(|((exception_type, message), stats)| SymptomSummary {
        exception_type: exception_type.clone(),
        message: message.clone(),
        count: stats.count,
        spike_factor: stats.spike_factor(
          event.timestamp,
          entry.activation_start,
          self.config.rate_window_minutes,
        ),
      })
      .collect();
    symptoms.sort_by(|a, b| {
      b.count
        .cmp(&a.count)
        .then_with(|| a.message.cmp(&b.message))
    });
    symptoms.truncate(self.config.max_symptoms);
    symptoms
  }
}

/// Event lands within the configured lookback after the deploy.
fn deploy_correlated(config: &Config, event: &Event) -> bool {
  match &event.change_window {
    Some(cw) => {
      let delta = event.timestamp - cw.deploy_time;
      delta >= chrono::Duration::zero()
        && delta <= chrono::Duration::minutes(config.deploy_lookback_minutes)
    }
    None => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn make_inbound(severity: &str, env: &str) -> InboundEvent {
    InboundEvent {
      source: "sentry".into(),
      service: "api".into(),
      environment: Some(env.into()),
      timestamp: Some("2025-03-10T14:30:00Z".into()),
      severity: Some(severity.into()),
      exception_type: "TypeError".into(),
      message: "x is not a function".into(),
      stacktrace: vec![InboundFrame {
        file: "src/handler.ts".into(),
        function: Some("handle".into()),
        line: Some(42),
        column: None,
      }],
      tags: Default::default(),
      links: Default::default(),
      change_window: None,
      correlation_hints: None,
      api_route: None,
      request_url: None,
    }
  }

  fn at(event: &mut InboundEvent, minute: u32, second: u32) {
    event.timestamp = Some(format!("2025-03-10T14:{minute:02}:{second:02}Z"));
  }

  #[test]
  fn first_event_is_new_issue() {
    let mut engine = Engine::with_defaults();
    let summary = engine.process(&make_inbound("error", "prod")).unwrap().unwrap();
    assert_eq!(summary.trigger, TriggerReason::NewIssue);
    assert!(summary.incident_id.starts_with("inc-"));
    assert_eq!(summary.service, "api");
    assert_eq!(summary.environment, "prod");
    // severity error (55) + new_issue (15) + prod (10)
    assert_eq!(summary.priority_score, 80);
  }

  #[test]
  fn new_issue_fires_in_any_environment() {
    let mut engine = Engine::with_defaults();
    let summary = engine.process(&make_inbound("error", "staging")).unwrap();
    assert!(summary.is_some());
    assert_eq!(summary.unwrap().trigger, TriggerReason::NewIssue);
  }

  #[test]
  fn steady_state_event_emits_nothing() {
    let mut engine = Engine::with_defaults();
    let mut event = make_inbound("error", "prod");
    engine.process(&event).unwrap();

    // Second occurrence three minutes later: known fingerprint, no quiet gap,
    // no established-baseline spike, no change window.
    at(&mut event, 33, 0);
    let result = engine.process(&event).unwrap();
    assert!(result.is_none());
    assert_eq!(engine.tracked_issues(), 1);
  }

  #[test]
  fn burst_over_baseline_is_a_spike() {
    let mut engine = Engine::with_defaults();
    let mut event = make_inbound("error", "prod");

    // Establish ~1/min baseline.
    for m in 0..10u32 {
      at(&mut event, m, 0);
      let _ = engine.process(&event).unwrap();
    }

    // Burst: 10 events inside one minute.
    let mut last = None;
    for s in 0..10u32 {
      at(&mut event, 10, s * 3);
      if let Some(summary) = engine.process(&event).unwrap() {
        last = Some(summary);
      }
    }
    let summary = last.expect("burst should trigger a spike");
    assert_eq!(summary.trigger, TriggerReason::Spike);
    assert!(summary.priority_score >= 80);
  }

  #[test]
  fn recurrence_after_quiet_period_is_regression() {
    let mut engine = Engine::with_defaults();
    let mut event = make_inbound("error", "prod");
    let first = engine.process(&event).unwrap().unwrap();

    // 90 minutes later, past the 60-minute quiet threshold.
    event.timestamp = Some("2025-03-10T16:00:00Z".into());
    let summary = engine.process(&event).unwrap().unwrap();
    assert_eq!(summary.trigger, TriggerReason::Regression);
    // Regression opens a fresh activation with a fresh id.
    assert_ne!(summary.incident_id, first.incident_id);
  }

  #[test]
  fn recurrence_before_quiet_threshold_is_not_regression() {
    let mut engine = Engine::with_defaults();
    let mut event = make_inbound("error", "prod");
    engine.process(&event).unwrap();

    event.timestamp = Some("2025-03-10T15:00:00Z".into());
    let result = engine.process(&event).unwrap();
    assert!(result.is_none());
  }

  #[test]
  fn deploy_window_triggers_when_nothing_stronger() {
    let mut engine = Engine::with_defaults();
    let mut event = make_inbound("error", "prod");
    engine.process(&event).unwrap();

    at(&mut event, 40, 0);
    event.change_window = Some(InboundChangeWindow {
      // 10 minutes before the event, inside the 30-minute lookback.
      deploy_time: "2025-03-10T14:30:00Z".into(),
      commits: vec![InboundCommit {
        id: "abc123".into(),
        timestamp: Some("2025-03-10T14:20:00Z".into()),
        files: vec!["src/handler.ts".into()],
        risk_score: Some(40),
      }],
    });
    let summary = engine.process(&event).unwrap().unwrap();
    assert_eq!(summary.trigger, TriggerReason::Deploy);
    assert_eq!(summary.suspected_causes[0].commit_id, "abc123");
  }

  #[test]
  fn old_deploy_does_not_trigger() {
    let mut engine = Engine::with_defaults();
    let mut event = make_inbound("error", "prod");
    engine.process(&event).unwrap();

    at(&mut event, 45, 0);
    event.change_window = Some(InboundChangeWindow {
      // Two hours before the event: outside the lookback.
      deploy_time: "2025-03-10T12:45:00Z".into(),
      commits: Vec::new(),
    });
    assert!(engine.process(&event).unwrap().is_none());
  }

  #[test]
  fn incident_id_is_stable_across_engines() {
    let event = make_inbound("error", "prod");
    let s1 = Engine::with_defaults().process(&event).unwrap().unwrap();
    let s2 = Engine::with_defaults().process(&event).unwrap().unwrap();
    assert_eq!(s1.incident_id, s2.incident_id);
  }

  #[test]
  fn critical_prod_scores_above_warning_dev() {
    let mut e1 = Engine::with_defaults();
    let mut e2 = Engine::with_defaults();
    let critical = e1.process(&make_inbound("critical", "prod")).unwrap().unwrap();
    let warning = e2.process(&make_inbound("warning", "dev")).unwrap().unwrap();
    assert!(critical.priority_score > warning.priority_score);
    assert!(critical.priority_score <= 100);
  }

  #[test]
  fn symptoms_track_distinct_messages() {
    let mut engine = Engine::with_defaults();
    let mut event = make_inbound("error", "prod");
    engine.process(&event).unwrap();

    event.message = "y is undefined".into();
    at(&mut event, 30, 10);
    let _ = engine.process(&event).unwrap();

    // Force a summary via a quiet-gap regression and check both symptoms of
    // the old activation were replaced by the fresh one.
    event.timestamp = Some("2025-03-10T16:00:00Z".into());
    let summary = engine.process(&event).unwrap().unwrap();
    assert_eq!(summary.trigger, TriggerReason::Regression);
    assert_eq!(summary.top_symptoms.len(), 1);
    assert_eq!(summary.top_symptoms[0].message, "y is undefined");
  }

  #[test]
  fn invalid_event_returns_error() {
    let mut engine = Engine::with_defaults();
    let mut event = make_inbound("error", "prod");
    event.timestamp = Some("not-a-date".into());
    let err = engine.process(&event).unwrap_err();
    assert!(err.to_string().contains("timestamp"));
  }
}
