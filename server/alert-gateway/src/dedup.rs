//! Webhook dedup gate: suppresses duplicate direct notifications when the
//! provider sends multiple webhooks for the same logical error.
//!
//! Keys are `issue:<id>` (preferred) or `event:<id>`. A key seen within the
//! window suppresses; stale keys are pruned lazily on each check. Wall-clock
//! tolerant: a late prune only lets an old key expire late, it never
//! suppresses a new distinct key.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  Deliver,
  Suppress,
}

#[derive(Debug)]
pub struct DedupGate {
  window: Duration,
  expiry: HashMap<String, DateTime<Utc>>,
}

impl DedupGate {
  pub fn new(window: std::time::Duration) -> Self {
    Self {
      window: Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(90)),
      expiry: HashMap::new(),
    }
  }

  /// Decide whether a direct notification for this webhook should go out.
  ///
  /// An issue-created callback with no concrete event (both ids absent, or
  /// only an issue id from a `created` action) is handled by the caller; here
  /// a request with neither id always delivers.
  pub fn check(
    &mut self,
    issue_id: Option<&str>,
    event_id: Option<&str>,
    now: DateTime<Utc>,
  ) -> Verdict {
    self.prune(now);

    let key = match (issue_id, event_id) {
      (Some(i), _) => format!("issue:{i}"),
      (None, Some(e)) => format!("event:{e}"),
      (None, None) => return Verdict::Deliver,
    };

    if self.expiry.contains_key(&key) {
      return Verdict::Suppress;
    }
    self.expiry.insert(key, now + self.window);
    Verdict::Deliver
  }

  /// Record a key without deciding delivery (used when an issue-created
  /// callback pre-announces an issue so the first event webhook for it does
  /// not double-alert).
  pub fn record_issue(&mut self, issue_id: &str, now: DateTime<Utc>) {
    self.prune(now);
    self
      .expiry
      .insert(format!("issue:{issue_id}"), now + self.window);
  }

  pub fn tracked_keys(&self) -> usize {
    self.expiry.len()
  }

  fn prune(&mut self, now: DateTime<Utc>) {
    self.expiry.retain(|_, expires_at| *expires_at > now);
  }
}
