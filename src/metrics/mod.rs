//! Prometheus metrics for the liveness pipeline.
//!
//! # Metrics Exposed
//!
//! ## Session
//! - `liveness_verdict` - Current verdict code (-1 when no session exists)
//! - `liveness_pass_evidence` - Qualifying infrared results so far
//! - `liveness_sessions_started_total` - Sessions started
//!
//! ## Streams (label `role`)
//! - `liveness_stream_state` - Stream lifecycle state
//! - `liveness_frames_received_total` - Raw frames delivered
//! - `liveness_frames_idle_total` - Frames seen with no active session
//! - `liveness_frames_not_analyzed_total` - Frames the mode does not analyze
//! - `liveness_frames_dropped_busy_total` - Frames dropped by drop-while-busy
//! - `liveness_frames_decode_failed_total` - Undecodable frames
//! - `liveness_frames_analyzed_total` - Frames analyzed
//!
//! With the `metrics` feature, [`MetricsServer`] serves these on
//! `/metrics` alongside `/verdict` and `/health`.

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot, RoleSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, ServerError, SnapshotSource};
