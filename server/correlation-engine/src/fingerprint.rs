//! Stable fingerprint computation for grouping events into issues.
//!
//! Identity is (service, environment, exception_type, top application frame).
//! Line numbers are excluded so a moved line keeps its identity.

use crate::types::{Event, Fingerprint, Frame};

/// Path prefixes/segments that mark a frame as dependency or runtime code
/// rather than application code.
const VENDOR_MARKERS: &[&str] = &[
  "node_modules/",
  "vendor/",
  "site-packages/",
  ".cargo/",
  "/usr/lib/",
  "internal/",
];

fn is_app_frame(frame: &Frame) -> bool {
  let file = frame.file.as_str();
  if file.starts_with('<') {
    // Synthetic or eval'd frames ("<unknown>", "<anonymous>").
    return false;
  }
  !VENDOR_MARKERS.iter().any(|m| file.contains(m))
}

/// The innermost application frame, falling back to the innermost frame of
/// any kind when the whole stack is vendor code.
pub fn top_app_frame(frames: &[Frame]) -> Option<&Frame> {
  frames.iter().find(|f| is_app_frame(f)).or_else(|| frames.first())
}

/// Compute a stable fingerprint for an event.
pub fn compute(event: &Event) -> Fingerprint {
  let mut hasher = blake3::Hasher::new();
  hasher.update(event.service.as_bytes());
  hasher.update(b"|");
  hasher.update(event.environment.as_bytes());
  hasher.update(b"|");
  hasher.update(event.exception_type.as_bytes());

  if let Some(frame) = top_app_frame(&event.frames) {
    hasher.update(b"|");
    hasher.update(frame.file.as_bytes());
    hasher.update(b":");
    hasher.update(frame.function.as_bytes());
  }

  let hex = hasher.finalize().to_hex();
  Fingerprint(hex[..32].to_string())
}
