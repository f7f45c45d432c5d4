//! Suspect-commit ranking against a deploy change window.
//!
//! Scoring combines depth-weighted stack-frame overlap, commit risk score,
//! a recency bonus anchored to the deploy time, a critical-path boost and a
//! low-priority (docs/tests) penalty. Deterministic: only the provided
//! timestamps are consulted, ties break on commit id.

use crate::config::Config;
use crate::types::{ChangeWindow, CorrelationHints, Frame, SuspectedCause};

const CRITICAL_PATH_BOOST: f64 = 0.15;
const LOW_PRIORITY_PENALTY: f64 = 0.2;

/// Path matches a hint (prefix, path segment, or suffix such as ".md").
fn path_matches_hint(path: &str, hint: &str) -> bool {
  let hint = hint.trim_end_matches('/');
  if hint.is_empty() {
    return false;
  }
  path.starts_with(hint)
    || path.starts_with(&format!("{hint}/"))
    || path.split('/').any(|seg| seg == hint)
    || path.ends_with(hint)
}

fn touches_any(files: &[String], hints: &[String]) -> bool {
  files
    .iter()
    .any(|f| hints.iter().any(|h| path_matches_hint(f, h)))
}

/// Commit touches ONLY low-priority paths (docs/tests)?
fn low_priority_only(files: &[String], hints: &[String]) -> bool {
  if files.is_empty() || hints.is_empty() {
    return false;
  }
  files
    .iter()
    .all(|f| hints.iter().any(|h| path_matches_hint(f, h)))
}

/// Loose path equivalence: either side may carry a repo-root prefix the other
/// lacks, so suffix containment in both directions counts as a match.
fn paths_equivalent(a: &str, b: &str) -> bool {
  a == b || a.ends_with(b) || b.ends_with(a)
}

/// Depth-weighted frame overlap in [0, 1]. The innermost frame (index 0)
/// weighs 1, the next 1/2, then 1/3, so a commit touching the crash site
/// outranks one touching an outer caller.
fn frame_overlap(frames: &[Frame], commit_files: &[String]) -> (f64, Vec<(usize, String)>) {
  let mut matched = Vec::new();
  let mut hit = 0.0;
  let mut total = 0.0;
  for (i, frame) in frames.iter().enumerate() {
    let weight = 1.0 / (i as f64 + 1.0);
    total += weight;
    if let Some(file) = commit_files
      .iter()
      .find(|cf| paths_equivalent(cf, &frame.file))
    {
      hit += weight;
      matched.push((i, file.clone()));
    }
  }
  if total <= 0.0 {
    (0.0, matched)
  } else {
    (hit / total, matched)
  }
}

/// Rank commits from a change window by relevance to the incident's frames.
///
/// Returns up to `config.max_suspects` causes sorted by score descending,
/// then commit id ascending.
pub fn rank_suspects(
  frames: &[Frame],
  change_window: &ChangeWindow,
  hints: &CorrelationHints,
  config: &Config,
) -> Vec<SuspectedCause> {
  let mut suspects: Vec<SuspectedCause> = change_window
    .commits
    .iter()
    .filter_map(|commit| {
      let mut evidence = Vec::new();

      let (overlap, matched) = frame_overlap(frames, &commit.files);
      for (idx, file) in matched.iter().take(3) {
        evidence.push(format!(
          "touches `{}`, also present in stack frame {}",
          file,
          idx + 1
        ));
      }

      // Recency: commits landing just before the deploy score highest,
      // decaying linearly to zero over the correlation window.
      let recency = match commit.timestamp {
        Some(ts) => {
          let minutes_before = (change_window.deploy_time - ts).num_minutes();
          let window = config.correlation_window_minutes.max(1);
          if minutes_before < 0 || minutes_before > window {
            0.0
          } else {
            1.0 - minutes_before as f64 / window as f64
          }
        }
        None => 0.0,
      };
      if recency > 0.0 {
        evidence.push(format!(
          "committed {:.1}h before deploy",
          (change_window.deploy_time - commit.timestamp.unwrap()).num_minutes() as f64 / 60.0
        ));
      }

      let risk = commit
        .risk_score
        .map(|s| s as f64 / 100.0)
        .unwrap_or(0.0);
      if let Some(s) = commit.risk_score {
        evidence.push(format!("risk score {s}"));
      }

      let critical = touches_any(&commit.files, &hints.critical_paths);
      if critical {
        evidence.push("touches critical path".into());
      }

      let lp_only = low_priority_only(&commit.files, &hints.low_priority_paths);
      // Docs/tests-only commits with no frame overlap are not suspects at all.
      if lp_only && matched.is_empty() {
        return None;
      }
      if lp_only {
        evidence.push("docs/tests only".into());
      }

      let score = (config.correlation_file_weight * overlap
        + config.correlation_recency_weight * recency
        + config.correlation_risk_weight * risk
        + if critical { CRITICAL_PATH_BOOST } else { 0.0 }
        - if lp_only { LOW_PRIORITY_PENALTY } else { 0.0 })
        .max(0.0);

      if score > 0.0 {
        Some(SuspectedCause {
          commit_id: commit.id.clone(),
          score: (score * 1000.0).round() / 1000.0,
          evidence,
        })
      } else {
        None
      }
    })
    .collect();

  suspects.sort_by(|a, b| {
    b.score
      .partial_cmp(&a.score)
      .unwrap_or(std::cmp::Ordering::Equal)
      .then_with(|| a.commit_id.cmp(&b.commit_id))
  });
  suspects.truncate(config.max_suspects);
  suspects
}
