//! Metrics collection and registry.

use crate::capture::StreamState;
use crate::device::DeviceRole;
use crate::dispatch::LaneStats;
use crate::liveness::Verdict;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Stream and dispatch state of one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoleSnapshot {
    pub role: DeviceRole,
    pub state: StreamState,
    pub frames: LaneStats,
}

/// A snapshot of orchestrator state for metrics update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Verdict of the current session, if any.
    pub verdict: Option<Verdict>,
    /// Qualifying infrared results in the current session.
    pub pass_evidence: u32,
    /// Sessions started since startup.
    pub sessions_started: u64,
    /// Per-role stream state and frame counters.
    pub roles: Vec<RoleSnapshot>,
}

/// Numeric encoding of a stream state for gauges.
fn state_code(state: StreamState) -> i64 {
    match state {
        StreamState::Closed => 0,
        StreamState::Opening => 1,
        StreamState::Streaming => 2,
        StreamState::Stopping => 3,
        StreamState::Released => 4,
    }
}

/// Raises a monotonic counter to `target`.
fn advance(counter: &IntCounter, target: u64) {
    let current = counter.get();
    if target > current {
        counter.inc_by(target - current);
    }
}

/// Prometheus metrics registry for the liveness pipeline.
pub struct MetricsRegistry {
    registry: Registry,

    // Session metrics
    verdict: IntGauge,
    pass_evidence: IntGauge,
    sessions_started: IntCounter,

    // Stream metrics, labelled by role
    stream_state: IntGaugeVec,
    frames_received: IntCounterVec,
    frames_idle: IntCounterVec,
    frames_not_analyzed: IntCounterVec,
    frames_dropped_busy: IntCounterVec,
    frames_decode_failed: IntCounterVec,
    frames_analyzed: IntCounterVec,
}

impl MetricsRegistry {
    /// Creates a new registry with all liveness metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let verdict = IntGauge::new(
            "liveness_verdict",
            "Current verdict (-1=no session, 0=pending, 1=live, 2=not live, 3=timed out, 4=cancelled)",
        )?;
        let pass_evidence = IntGauge::new(
            "liveness_pass_evidence",
            "Qualifying infrared results in the current session",
        )?;
        let sessions_started = IntCounter::new(
            "liveness_sessions_started_total",
            "Total detection sessions started",
        )?;

        let stream_state = IntGaugeVec::new(
            Opts::new(
                "liveness_stream_state",
                "Stream state (0=closed, 1=opening, 2=streaming, 3=stopping, 4=released)",
            ),
            &["role"],
        )?;
        let counter = |name: &str, help: &str| IntCounterVec::new(Opts::new(name, help), &["role"]);
        let frames_received = counter("liveness_frames_received_total", "Raw frames delivered by the device")?;
        let frames_idle = counter("liveness_frames_idle_total", "Frames discarded with no active session")?;
        let frames_not_analyzed = counter(
            "liveness_frames_not_analyzed_total",
            "Frames from a role the session mode does not analyze",
        )?;
        let frames_dropped_busy = counter(
            "liveness_frames_dropped_busy_total",
            "Frames dropped while the role's previous frame was in analysis",
        )?;
        let frames_decode_failed = counter(
            "liveness_frames_decode_failed_total",
            "Frames that could not be decoded",
        )?;
        let frames_analyzed = counter("liveness_frames_analyzed_total", "Frames analyzed")?;

        registry.register(Box::new(verdict.clone()))?;
        registry.register(Box::new(pass_evidence.clone()))?;
        registry.register(Box::new(sessions_started.clone()))?;
        registry.register(Box::new(stream_state.clone()))?;
        registry.register(Box::new(frames_received.clone()))?;
        registry.register(Box::new(frames_idle.clone()))?;
        registry.register(Box::new(frames_not_analyzed.clone()))?;
        registry.register(Box::new(frames_dropped_busy.clone()))?;
        registry.register(Box::new(frames_decode_failed.clone()))?;
        registry.register(Box::new(frames_analyzed.clone()))?;

        Ok(Self {
            registry,
            verdict,
            pass_evidence,
            sessions_started,
            stream_state,
            frames_received,
            frames_idle,
            frames_not_analyzed,
            frames_dropped_busy,
            frames_decode_failed,
            frames_analyzed,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.verdict.set(snapshot.verdict.map_or(-1, Verdict::code));
        self.pass_evidence.set(i64::from(snapshot.pass_evidence));
        advance(&self.sessions_started, snapshot.sessions_started);

        for role in &snapshot.roles {
            let label = role.role.to_string();
            let labels = [label.as_str()];
            self.stream_state
                .with_label_values(&labels)
                .set(state_code(role.state));

            let frames = &role.frames;
            advance(&self.frames_received.with_label_values(&labels), frames.received);
            advance(&self.frames_idle.with_label_values(&labels), frames.idle);
            advance(&self.frames_not_analyzed.with_label_values(&labels), frames.not_analyzed);
            advance(&self.frames_dropped_busy.with_label_values(&labels), frames.dropped_busy);
            advance(&self.frames_decode_failed.with_label_values(&labels), frames.decode_failures);
            advance(&self.frames_analyzed.with_label_values(&labels), frames.analyzed);
        }
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(received: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            verdict: Some(Verdict::Pending),
            pass_evidence: 1,
            sessions_started: 2,
            roles: vec![RoleSnapshot {
                role: DeviceRole::LeftInfrared,
                state: StreamState::Streaming,
                frames: LaneStats {
                    received,
                    analyzed: 3,
                    dropped_busy: 1,
                    ..Default::default()
                },
            }],
        }
    }

    #[test]
    fn test_registry_creation() {
        assert!(MetricsRegistry::new().is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();
        registry.update(&snapshot(10));

        let output = registry.encode().unwrap();
        assert!(output.contains("liveness_verdict 0"));
        assert!(output.contains("liveness_pass_evidence 1"));
        assert!(output.contains("liveness_sessions_started_total 2"));
        assert!(output.contains(r#"liveness_stream_state{role="left-infrared"} 2"#));
        assert!(output.contains(r#"liveness_frames_received_total{role="left-infrared"} 10"#));
        assert!(output.contains(r#"liveness_frames_dropped_busy_total{role="left-infrared"} 1"#));
    }

    #[test]
    fn test_counters_never_decrease() {
        let registry = MetricsRegistry::new().unwrap();
        registry.update(&snapshot(10));
        registry.update(&snapshot(4));

        let output = registry.encode().unwrap();
        assert!(output.contains(r#"liveness_frames_received_total{role="left-infrared"} 10"#));
    }

    #[test]
    fn test_no_session_encoded_as_negative() {
        let registry = MetricsRegistry::new().unwrap();
        registry.update(&MetricsSnapshot::default());
        assert!(registry.encode().unwrap().contains("liveness_verdict -1"));
    }
}
