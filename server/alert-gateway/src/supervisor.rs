//! Engine supervisor: owns the correlation-engine worker subprocess.
//!
//! Keeps exactly one worker alive, feeds it events in order over stdin, and
//! never loses an event while the worker is down (up to the bounded backlog;
//! overflow drops the oldest entry with a warning). On unexpected exit one
//! restart is scheduled after a fixed backoff, guarded so concurrent exits
//! cannot overlap; the backlog is flushed oldest-first after recovery.
//! Parsed summaries from the worker's stdout are broadcast to any number of
//! subscribers, fully asynchronously from ingestion.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;

use correlation_engine::{InboundEvent, IncidentSummary};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;

/// Snapshot for health checks.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct EngineStatus {
  pub running: bool,
  pub queued_events: usize,
  pub max_queue_size: usize,
}

struct Inner {
  backlog: VecDeque<InboundEvent>,
  stdin: Option<ChildStdin>,
  running: bool,
  restart_scheduled: bool,
  stopping: bool,
  dropped_events: u64,
}

/// Cheaply cloneable handle; all clones share one worker and one backlog.
#[derive(Clone)]
pub struct Supervisor {
  config: Arc<GatewayConfig>,
  inner: Arc<Mutex<Inner>>,
  summaries: broadcast::Sender<IncidentSummary>,
}

impl Supervisor {
  pub fn new(config: GatewayConfig) -> Self {
    let (summaries, _) = broadcast::channel(64);
    Self {
      config: Arc::new(config),
      inner: Arc::new(Mutex::new(Inner {
        backlog: VecDeque::new(),
        stdin: None,
        running: false,
        restart_scheduled: false,
        stopping: false,
        dropped_events: 0,
      })),
      summaries,
    }
  }

  /// Listener registration: every subscriber sees every parsed summary.
  pub fn subscribe(&self) -> broadcast::Receiver<IncidentSummary> {
    self.summaries.subscribe()
  }

  /// Start the worker if it is not already running. Idempotent.
  ///
  /// Boxed so the restart path (pump task -> exit handler -> here) does not
  /// form an unresolvable `Send` inference cycle through `tokio::spawn`.
  pub fn ensure_started(
    &self,
  ) -> std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<(), GatewayError>> + Send + '_>,
  > {
    Box::pin(self.ensure_started_inner())
  }

  async fn ensure_started_inner(&self) -> Result<(), GatewayError> {
    let mut inner = self.inner.lock().await;
    if inner.running || inner.stopping {
      return Ok(());
    }

    let mut child = Command::new(&self.config.worker_command)
      .args(&self.config.worker_args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .kill_on_drop(true)
      .spawn()?;

    let stdin = child
      .stdin
      .take()
      .ok_or(GatewayError::WorkerStdio("stdin"))?;
    let stdout = child
      .stdout
      .take()
      .ok_or(GatewayError::WorkerStdio("stdout"))?;

    inner.stdin = Some(stdin);
    inner.running = true;
    info!(command = %self.config.worker_command, "correlation worker started");

    Self::flush_backlog(&mut inner).await;
    drop(inner);

    let supervisor = self.clone();
    tokio::spawn(async move {
      supervisor.pump_worker(child, stdout).await;
    });

    Ok(())
  }

  /// Feed one event to the worker, preserving order.
  ///
  /// Never blocks on worker availability: when the worker is down the event
  /// is queued and control returns immediately. Oldest entries are dropped
  /// when the queue is full (bounded memory beats completeness).
  pub async fn ingest(&self, event: InboundEvent) {
    let mut inner = self.inner.lock().await;

    if inner.stdin.is_some() {
      Self::flush_backlog(&mut inner).await;
    }

    // The flush may have lost the pipe; re-check before writing.
    if inner.backlog.is_empty() {
      if let Some(stdin) = inner.stdin.as_mut() {
        let result = Self::write_event(stdin, &event).await;
        match result {
          Ok(()) => return,
          Err(e) => {
            warn!(error = %e, "worker stdin write failed; queueing event");
            inner.stdin = None;
          }
        }
      }
    }

    inner.backlog.push_back(event);
    if inner.backlog.len() > self.config.queue_capacity {
      inner.backlog.pop_front();
      inner.dropped_events += 1;
      warn!(
        capacity = self.config.queue_capacity,
        dropped_total = inner.dropped_events,
        "event backlog overflow; dropped oldest event"
      );
    }
  }

  /// Graceful shutdown: closing stdin lets the worker drain and exit; the
  /// exit handler sees `stopping` and schedules no restart. Idempotent.
  pub async fn stop(&self) {
    let mut inner = self.inner.lock().await;
    inner.stopping = true;
    inner.stdin = None;
  }

  pub async fn status(&self) -> EngineStatus {
    let inner = self.inner.lock().await;
    EngineStatus {
      running: inner.running,
      queued_events: inner.backlog.len(),
      max_queue_size: self.config.queue_capacity,
    }
  }

  /// Read summaries off the worker's stdout until it exits, then handle the
  /// exit. Runs as its own task per worker generation.
  async fn pump_worker(
    &self,
    mut child: Child,
    stdout: tokio::process::ChildStdout,
  ) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
      match lines.next_line().await {
        Ok(Some(line)) => self.handle_worker_line(&line),
        Ok(None) => break,
        Err(e) => {
          warn!(error = %e, "worker stdout read error");
          break;
        }
      }
    }

    match child.wait().await {
      Ok(status) => info!(%status, "correlation worker exited"),
      Err(e) => warn!(error = %e, "failed to reap correlation worker"),
    }
    self.on_worker_exit().await;
  }

  /// One line of worker output: a summary, a structured input rejection, or
  /// garbage. Only the first produces downstream work; none of them tears
  /// the worker down.
  fn handle_worker_line(&self, line: &str) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
      return;
    }
    let value: Value = match serde_json::from_str(trimmed) {
      Ok(v) => v,
      Err(e) => {
        warn!(error = %e, "unparseable worker output line; skipping");
        return;
      }
    };
    if value.get("error").and_then(Value::as_bool) == Some(true) {
      warn!(
        message = value.get("message").and_then(serde_json::Value::as_str).unwrap_or(""),
        "worker rejected an event"
      );
      return;
    }
    match serde_json::from_value::<IncidentSummary>(value) {
      Ok(summary) => {
        debug!(incident_id = %summary.incident_id, "incident summary received");
        // No receivers is fine (e.g. during startup).
        let _ = self.summaries.send(summary);
      }
      Err(e) => warn!(error = %e, "worker line is not a summary; skipping"),
    }
  }

  /// Schedule exactly one restart after the fixed backoff. The
  /// `restart_scheduled` flag guards against concurrent exit events
  /// triggering overlapping restarts.
  async fn on_worker_exit(&self) {
    {
      let mut inner = self.inner.lock().await;
      inner.running = false;
      inner.stdin = None;
      if inner.stopping || inner.restart_scheduled {
        return;
      }
      inner.restart_scheduled = true;
    }

    info!(
      backoff_ms = self.config.restart_backoff.as_millis() as u64,
      "scheduling correlation worker restart"
    );
    tokio::time::sleep(self.config.restart_backoff).await;

    self.inner.lock().await.restart_scheduled = false;
    if let Err(e) = self.ensure_started().await {
      warn!(error = %e, "correlation worker restart failed");
    }
  }

  /// Replay queued events oldest-first. Stops (keeping the remainder) on the
  /// first write failure.
  async fn flush_backlog(inner: &mut Inner) {
    while let Some(event) = inner.backlog.front() {
      let Some(stdin) = inner.stdin.as_mut() else {
        return;
      };
      let result = Self::write_event(stdin, event).await;
      match result {
        Ok(()) => {
          inner.backlog.pop_front();
        }
        Err(e) => {
          warn!(error = %e, "backlog flush write failed; worker likely down");
          inner.stdin = None;
          return;
        }
      }
    }
  }

  async fn write_event(
    stdin: &mut ChildStdin,
    event: &InboundEvent,
  ) -> Result<(), GatewayError> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn test_event(n: u32) -> InboundEvent {
    InboundEvent {
      source: "sentry".into(),
      service: "api".into(),
      environment: Some("prod".into()),
      timestamp: Some("2025-03-10T14:30:00Z".into()),
      severity: Some("error".into()),
      exception_type: format!("Error{n}"),
      message: format!("event {n}"),
      stacktrace: Vec::new(),
      tags: HashMap::new(),
      links: HashMap::new(),
      change_window: None,
      correlation_hints: None,
      api_route: None,
      request_url: None,
    }
  }

  fn idle_supervisor(capacity: usize) -> Supervisor {
    Supervisor::new(GatewayConfig {
      queue_capacity: capacity,
      ..GatewayConfig::default()
    })
  }

  #[tokio::test]
  async fn events_queue_while_worker_is_down() {
    let sup = idle_supervisor(10);
    for n in 0..3 {
      sup.ingest(test_event(n)).await;
    }
    let status = sup.status().await;
    assert!(!status.running);
    assert_eq!(status.queued_events, 3);
    assert_eq!(status.max_queue_size, 10);
  }

  #[tokio::test]
  async fn overflow_drops_oldest_keeps_newest_in_order() {
    let sup = idle_supervisor(5);
    // capacity + 3 events: the 3 oldest must go.
    for n in 0..8 {
      sup.ingest(test_event(n)).await;
    }
    let inner = sup.inner.lock().await;
    assert_eq!(inner.backlog.len(), 5);
    assert_eq!(inner.dropped_events, 3);
    let kept: Vec<String> = inner
      .backlog
      .iter()
      .map(|e| e.exception_type.clone())
      .collect();
    assert_eq!(kept, vec!["Error3", "Error4", "Error5", "Error6", "Error7"]);
  }

  #[tokio::test]
  async fn stop_is_idempotent_and_blocks_restart() {
    let sup = idle_supervisor(5);
    sup.stop().await;
    sup.stop().await;
    // With stopping set, ensure_started is a no-op and spawns nothing.
    sup.ensure_started().await.unwrap();
    assert!(!sup.status().await.running);
  }

  #[tokio::test]
  async fn worker_roundtrip_summary_reaches_subscribers() {
    // A stand-in worker that answers every input line with one summary line.
    let script = r#"while read -r _line; do
      echo '{"incident_id":"inc-1","title":"t","service":"api","environment":"prod","severity":"error","priority_score":80,"trigger":"new_issue","start_time":"2025-03-10T14:30:00Z","last_seen":"2025-03-10T14:30:00Z","tags":{"org_id":"org-1"}}'
    done"#;
    let sup = Supervisor::new(GatewayConfig {
      worker_command: "sh".into(),
      worker_args: vec!["-c".into(), script.into()],
      ..GatewayConfig::default()
    });
    let mut rx = sup.subscribe();

    sup.ensure_started().await.unwrap();
    sup.ingest(test_event(1)).await;

    let summary = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
      .await
      .expect("summary within timeout")
      .expect("channel open");
    assert_eq!(summary.incident_id, "inc-1");
    assert_eq!(summary.trigger, correlation_engine::types::TriggerReason::NewIssue);

    sup.stop().await;
  }

  #[tokio::test]
  async fn backlog_flushes_after_start_in_original_order() {
    // Worker echoes each input line's exception_type back inside a summary id
    // so arrival order is observable.
    let script = r#"while read -r line; do
      ty=$(printf '%s' "$line" | sed 's/.*"exception_type":"\([^"]*\)".*/\1/')
      printf '{"incident_id":"%s","title":"t","service":"api","environment":"prod","severity":"error","priority_score":1,"trigger":"new_issue","start_time":"x","last_seen":"x"}\n' "$ty"
    done"#;
    let sup = Supervisor::new(GatewayConfig {
      worker_command: "sh".into(),
      worker_args: vec!["-c".into(), script.into()],
      ..GatewayConfig::default()
    });
    let mut rx = sup.subscribe();

    // Queue first, start after.
    for n in 0..3 {
      sup.ingest(test_event(n)).await;
    }
    sup.ensure_started().await.unwrap();

    for expected in ["Error0", "Error1", "Error2"] {
      let summary = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
        .await
        .expect("summary within timeout")
        .expect("channel open");
      assert_eq!(summary.incident_id, expected);
    }
    assert_eq!(sup.status().await.queued_events, 0);

    sup.stop().await;
  }

  #[tokio::test]
  async fn crashed_worker_restarts_and_replays_backlog() {
    // Answers one line, then exits: forces the supervised restart path.
    let script = r#"read -r _line
      echo '{"incident_id":"gen","title":"t","service":"api","environment":"prod","severity":"error","priority_score":1,"trigger":"new_issue","start_time":"x","last_seen":"x"}'"#;
    let sup = Supervisor::new(GatewayConfig {
      worker_command: "sh".into(),
      worker_args: vec!["-c".into(), script.into()],
      restart_backoff: std::time::Duration::from_millis(50),
      ..GatewayConfig::default()
    });
    let mut rx = sup.subscribe();

    sup.ensure_started().await.unwrap();
    sup.ingest(test_event(1)).await;
    let first = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
      .await
      .expect("first summary")
      .expect("channel open");
    assert_eq!(first.incident_id, "gen");

    // Give the exit handler a moment, then feed an event while down: it must
    // be queued, then replayed into the restarted worker.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    sup.ingest(test_event(2)).await;
    let second = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
      .await
      .expect("summary after restart")
      .expect("channel open");
    assert_eq!(second.incident_id, "gen");

    sup.stop().await;
  }

  #[tokio::test]
  async fn garbage_worker_output_is_skipped_without_teardown() {
    let script = r#"while read -r _line; do
      echo 'not json at all'
      echo '{"error":true,"message":"bad input"}'
      echo '{"incident_id":"inc-2","title":"t","service":"api","environment":"prod","severity":"error","priority_score":1,"trigger":"spike","start_time":"x","last_seen":"x"}'
    done"#;
    let sup = Supervisor::new(GatewayConfig {
      worker_command: "sh".into(),
      worker_args: vec!["-c".into(), script.into()],
      ..GatewayConfig::default()
    });
    let mut rx = sup.subscribe();

    sup.ensure_started().await.unwrap();
    sup.ingest(test_event(1)).await;

    // Only the valid summary comes through; the two bad lines are skipped.
    let summary = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
      .await
      .expect("summary within timeout")
      .expect("channel open");
    assert_eq!(summary.incident_id, "inc-2");
    assert!(sup.status().await.running);

    sup.stop().await;
  }
}
