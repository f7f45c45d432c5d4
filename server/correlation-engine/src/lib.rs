//! Faultline Correlation Engine (deterministic, rule-based).
//!
//! Ingests normalized error events, groups them by fingerprint, tracks
//! per-fingerprint sliding-window history, classifies triggers (new issue,
//! regression, spike, deploy-correlated), ranks suspect commits against the
//! deploy change window, and emits structured IncidentSummary JSON.
//!
//! No DB, no network; pure computation + in-memory state. History is lost on
//! restart; the supervisor treats the worker as a replaceable subprocess.

pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod history;
pub mod normalize;
pub mod types;

pub use config::Config;
pub use engine::Engine;
pub use error::EngineError;
pub use types::{InboundEvent, IncidentSummary};
