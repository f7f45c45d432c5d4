//! Binary entrypoint: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line is an InboundEvent. Output lines are either:
//! - An IncidentSummary (when an incident is triggered)
//! - An ErrorOutput `{"error": true, ...}` (when input validation fails)
//!
//! Valid events that trigger nothing produce no output line. Malformed input
//! never terminates the process; stderr carries free-form diagnostics.

use correlation_engine::types::ErrorOutput;
use correlation_engine::{Engine, InboundEvent};
use std::io::{self, BufRead, Write};

fn main() {
  let stdin = io::stdin();
  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());
  let mut engine = Engine::with_defaults();

  for line in stdin.lock().lines() {
    let line = match line {
      Ok(l) => l,
      Err(e) => {
        eprintln!("correlation-engine: read error: {e}");
        std::process::exit(1);
      }
    };

    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let raw: InboundEvent = match serde_json::from_str(trimmed) {
      Ok(v) => v,
      Err(e) => {
        let err = ErrorOutput::new(format!("json parse: {e}"));
        let _ = serde_json::to_writer(&mut out, &err);
        let _ = writeln!(out);
        let _ = out.flush();
        continue;
      }
    };

    match engine.process(&raw) {
      Ok(Some(summary)) => {
        let _ = serde_json::to_writer(&mut out, &summary);
        let _ = writeln!(out);
        // Flush per line: the supervisor reads this stream live.
        let _ = out.flush();
      }
      Ok(None) => {}
      Err(e) => {
        let err = match &e {
          correlation_engine::EngineError::Validation { field, reason } => {
            ErrorOutput::new(reason.clone()).with_field(field.clone())
          }
          _ => ErrorOutput::new(e.to_string()),
        };
        let _ = serde_json::to_writer(&mut out, &err);
        let _ = writeln!(out);
        let _ = out.flush();
      }
    }
  }

  let _ = out.flush();
}
