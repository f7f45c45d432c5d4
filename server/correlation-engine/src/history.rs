//! Per-fingerprint incident history: sliding occurrence window, EWMA baseline
//! rate, quiet-period tracking, and per-activation symptom counts.
//!
//! Entries are created on first occurrence and live for the life of the
//! process (in-memory only; restart loses history).

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

use crate::config::Config;

/// Max timestamps retained per symptom for its own rate window.
const SYMPTOM_WINDOW_CAP: usize = 64;

/// Below this per-minute rate the baseline is not considered established and
/// no spike factor is derived from it. Keeps near-zero baselines after long
/// quiet stretches from turning a single recurrence into an absurd factor.
const MIN_BASELINE_RATE: f64 = 0.05;

/// Distinct (exception_type, message) pair within one incident activation.
pub type SymptomKey = (String, String);

#[derive(Debug, Clone, Default)]
pub struct SymptomStats {
  pub count: u64,
  pub recent: VecDeque<DateTime<Utc>>,
}

impl SymptomStats {
  fn record(&mut self, ts: DateTime<Utc>) {
    self.count += 1;
    self.recent.push_back(ts);
    if self.recent.len() > SYMPTOM_WINDOW_CAP {
      self.recent.pop_front();
    }
  }

  /// Recent-window rate divided by the average rate since `activation_start`.
  pub fn spike_factor(
    &self,
    now: DateTime<Utc>,
    activation_start: DateTime<Utc>,
    window_minutes: i64,
  ) -> f64 {
    let window = Duration::minutes(window_minutes.max(1));
    let recent = self.recent.iter().filter(|t| **t > now - window).count() as f64;
    let recent_rate = recent / window_minutes.max(1) as f64;

    let active_minutes = (now - activation_start).num_minutes().max(1) as f64;
    let avg_rate = self.count as f64 / active_minutes;
    if avg_rate <= 0.0 {
      return 1.0;
    }
    let factor = recent_rate / avg_rate;
    (factor * 100.0).round() / 100.0
  }
}

/// What a single recorded occurrence looked like against the entry's history.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
  /// Recent-window rate over baseline rate (1.0 when no baseline exists yet).
  pub spike_factor: f64,
  /// The gap since the previous occurrence exceeded the quiet threshold.
  pub regressed: bool,
}

/// History for one fingerprint.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
  pub first_seen: DateTime<Utc>,
  pub last_seen: DateTime<Utc>,
  /// Start of the current activation; reset when a regression re-opens the issue.
  pub activation_start: DateTime<Utc>,
  /// Bounded sliding window of occurrence timestamps (oldest evicted).
  pub occurrences: VecDeque<DateTime<Utc>>,
  /// EWMA of the per-minute occurrence rate.
  pub baseline_rate: f64,
  /// Set when a regression was detected; start of the quiet gap that preceded it.
  pub quiet_since: Option<DateTime<Utc>>,
  pub total_count: u64,
  pub symptoms: HashMap<SymptomKey, SymptomStats>,
}

impl HistoryEntry {
  pub fn new(ts: DateTime<Utc>) -> Self {
    Self {
      first_seen: ts,
      last_seen: ts,
      activation_start: ts,
      occurrences: VecDeque::new(),
      baseline_rate: 0.0,
      quiet_since: None,
      total_count: 0,
      symptoms: HashMap::new(),
    }
  }

  /// Record one occurrence and evaluate it against history. Symptom counts
  /// are recorded separately via [`HistoryEntry::record_symptom`] so a
  /// regression can reset the activation in between.
  ///
  /// Order matters: the quiet gap and spike factor are computed against the
  /// state *before* this event, then the baseline is folded forward so a
  /// burst cannot mask itself.
  pub fn record(&mut self, ts: DateTime<Utc>, config: &Config) -> Observation {
    let gap_minutes = (ts - self.last_seen).num_minutes().max(0);
    let regressed =
      self.total_count > 0 && gap_minutes >= config.quiet_threshold_minutes;
    if regressed {
      self.quiet_since = Some(self.last_seen);
    }

    self.fold_baseline(ts, config);

    self.occurrences.push_back(ts);
    if self.occurrences.len() > config.max_occurrences {
      self.occurrences.pop_front();
    }
    self.total_count += 1;

    let spike_factor = self.spike_factor_at(ts, config);

    self.last_seen = ts;

    Observation {
      spike_factor,
      regressed,
    }
  }

  /// Count one occurrence of a (exception_type, message) pair in the current
  /// activation.
  pub fn record_symptom(&mut self, symptom: SymptomKey, ts: DateTime<Utc>) {
    self.symptoms.entry(symptom).or_default().record(ts);
  }

  /// Re-open the issue as a fresh activation (regression path): symptom
  /// counts restart, the activation anchor moves, the quiet marker stays so
  /// the summary can show how long the issue was dormant.
  pub fn reset_activation(&mut self, ts: DateTime<Utc>) {
    self.activation_start = ts;
    self.symptoms.clear();
  }

  /// Recent-window rate over baseline. 1.0 until a baseline is established
  /// (enough observations and a non-trivial baseline rate).
  fn spike_factor_at(&self, ts: DateTime<Utc>, config: &Config) -> f64 {
    if self.total_count < config.spike_min_events || self.baseline_rate < MIN_BASELINE_RATE {
      return 1.0;
    }
    let window_minutes = config.rate_window_minutes.max(1);
    let window = Duration::minutes(window_minutes);
    let recent = self
      .occurrences
      .iter()
      .rev()
      .take_while(|t| **t > ts - window)
      .count() as f64;
    let recent_rate = recent / window_minutes as f64;
    recent_rate / self.baseline_rate
  }

  /// Fold completed minutes since `last_seen` into the EWMA baseline.
  ///
  /// The minute `last_seen` falls in is folded with its observed count; any
  /// fully-empty minutes in between decay the baseline toward zero.
  fn fold_baseline(&mut self, ts: DateTime<Utc>, config: &Config) {
    let elapsed = ts.timestamp() / 60 - self.last_seen.timestamp() / 60;
    if elapsed <= 0 || self.total_count == 0 {
      return;
    }

    let last_minute = self.last_seen.timestamp() / 60;
    let completed = self
      .occurrences
      .iter()
      .rev()
      .take_while(|t| t.timestamp() / 60 == last_minute)
      .count() as f64;

    let alpha = config.ewma_alpha;
    self.baseline_rate = alpha * completed + (1.0 - alpha) * self.baseline_rate;
    for _ in 1..elapsed.min(60) {
      self.baseline_rate *= 1.0 - alpha;
    }
  }
}
