//! Engine configuration with documented defaults.
//!
//! Every detection threshold is tunable here rather than hard-coded at the
//! use site; the defaults below are the ones the product ships with.

/// Tunable thresholds for incident detection and correlation.
#[derive(Debug, Clone)]
pub struct Config {
  /// Spike trigger fires when recent rate exceeds baseline * this multiplier.
  pub spike_multiplier: f64,
  /// Width of the recent-rate window, in minutes.
  pub rate_window_minutes: i64,
  /// EWMA smoothing factor for the baseline rate (0..1). Higher = more reactive.
  pub ewma_alpha: f64,
  /// Minimum occurrences before the spike trigger can fire.
  pub spike_min_events: u64,
  /// Minutes of silence before a recurrence counts as a regression.
  pub quiet_threshold_minutes: i64,
  /// Max occurrence timestamps retained per fingerprint (oldest evicted).
  pub max_occurrences: usize,
  /// Minutes after a deploy during which an event is considered deploy-correlated.
  pub deploy_lookback_minutes: i64,
  /// Environment used when an event arrives without one.
  pub default_environment: String,
  /// Max suspect commits retained in a summary.
  pub max_suspects: usize,
  /// Max symptoms surfaced in a summary.
  pub max_symptoms: usize,
  /// Weight of depth-weighted stack-frame overlap in suspect scoring (0..1).
  pub correlation_file_weight: f64,
  /// Weight of the commit-recency bonus in suspect scoring (0..1).
  pub correlation_recency_weight: f64,
  /// Weight of the commit risk score in suspect scoring (0..1).
  pub correlation_risk_weight: f64,
  /// Minutes before the deploy over which the recency bonus decays to zero.
  pub correlation_window_minutes: i64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      spike_multiplier: 3.0,
      rate_window_minutes: 1,
      ewma_alpha: 0.3,
      spike_min_events: 5,
      quiet_threshold_minutes: 60,
      max_occurrences: 200,
      deploy_lookback_minutes: 30,
      default_environment: "prod".into(),
      max_suspects: 5,
      max_symptoms: 5,
      correlation_file_weight: 0.5,
      correlation_recency_weight: 0.3,
      correlation_risk_weight: 0.2,
      correlation_window_minutes: 24 * 60,
    }
  }
}
