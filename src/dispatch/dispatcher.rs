//! Frame dispatcher.
//!
//! Runs on the device's own delivery thread. Each raw buffer is copied,
//! decoded and analyzed synchronously, so analysis directly throttles the
//! device. At most one frame per role is in analysis at any time; a frame
//! that arrives while its role is busy is dropped.

use super::decoder::{PixelDecoder, Yuv420SpDecoder};
use crate::analysis::{AnalysisPath, FrameAnalyzer};
use crate::capture::RawFrame;
use crate::device::DeviceRole;
use crate::liveness::{ApplyOutcome, LivenessEngine};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Dispatch tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Sleep after each analyzed frame, in milliseconds.
    pub analysis_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            analysis_interval_ms: 100,
        }
    }
}

impl DispatchConfig {
    pub fn analysis_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_interval_ms)
    }
}

/// What the dispatcher did with one raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No session is accepting results.
    Idle,
    /// The session's mode does not analyze this role.
    NotAnalyzed,
    /// The previous frame for this role is still in analysis.
    Busy,
    /// The buffer could not be decoded at the session's preview size.
    DecodeFailed,
    /// The frame was analyzed and its result handed to the engine.
    Analyzed(ApplyOutcome),
}

/// Typed result of one `on_raw_frame` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub role: DeviceRole,
    pub sequence: u64,
    pub outcome: DispatchOutcome,
}

/// Per-role counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaneStats {
    pub received: u64,
    pub idle: u64,
    pub not_analyzed: u64,
    pub dropped_busy: u64,
    pub decode_failures: u64,
    pub analyzed: u64,
}

#[derive(Default)]
struct RoleLane {
    busy: AtomicBool,
    sequence: AtomicU64,
    received: AtomicU64,
    idle: AtomicU64,
    not_analyzed: AtomicU64,
    dropped_busy: AtomicU64,
    decode_failures: AtomicU64,
    analyzed: AtomicU64,
}

impl RoleLane {
    fn stats(&self) -> LaneStats {
        LaneStats {
            received: self.received.load(Ordering::Relaxed),
            idle: self.idle.load(Ordering::Relaxed),
            not_analyzed: self.not_analyzed.load(Ordering::Relaxed),
            dropped_busy: self.dropped_busy.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            analyzed: self.analyzed.load(Ordering::Relaxed),
        }
    }
}

/// Holds a role's busy flag; clears it on drop, including on unwind.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Routes raw frames from both device workers into the liveness engine.
pub struct FrameDispatcher {
    engine: Arc<LivenessEngine>,
    decoder: Box<dyn PixelDecoder>,
    analyzer: Arc<dyn FrameAnalyzer>,
    interval: Duration,
    lanes: [RoleLane; 2],
}

impl FrameDispatcher {
    /// Creates a dispatcher with the NV21 decoder and default interval.
    pub fn new(engine: Arc<LivenessEngine>, analyzer: Arc<dyn FrameAnalyzer>) -> Self {
        Self {
            engine,
            decoder: Box::new(Yuv420SpDecoder),
            analyzer,
            interval: DispatchConfig::default().analysis_interval(),
            lanes: Default::default(),
        }
    }

    pub fn with_decoder(mut self, decoder: impl PixelDecoder + 'static) -> Self {
        self.decoder = Box::new(decoder);
        self
    }

    pub fn with_config(mut self, config: &DispatchConfig) -> Self {
        self.interval = config.analysis_interval();
        self
    }

    /// Handles one buffer delivered by the `role` device.
    ///
    /// Must be called from that device's delivery thread. The buffer is
    /// copied before this returns; the caller may reuse it afterwards.
    pub fn on_raw_frame(&self, role: DeviceRole, buffer: &[u8]) -> FrameReport {
        let lane = &self.lanes[role.index()];
        let sequence = lane.sequence.fetch_add(1, Ordering::Relaxed);
        lane.received.fetch_add(1, Ordering::Relaxed);

        let frame = RawFrame::copy_from(role, sequence, buffer);
        let outcome = self.route(lane, frame);

        FrameReport {
            role,
            sequence,
            outcome,
        }
    }

    /// Counters for `role`.
    pub fn stats(&self, role: DeviceRole) -> LaneStats {
        self.lanes[role.index()].stats()
    }

    fn route(&self, lane: &RoleLane, frame: RawFrame) -> DispatchOutcome {
        let role = frame.role();

        let Some(config) = self.engine.active_config() else {
            lane.idle.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::Idle;
        };

        let Some(path) = AnalysisPath::select(role, config.mode) else {
            lane.not_analyzed.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::NotAnalyzed;
        };

        let Some(busy) = BusyGuard::acquire(&lane.busy) else {
            lane.dropped_busy.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(role = %role, sequence = frame.sequence(), "Frame dropped, analysis busy");
            return DispatchOutcome::Busy;
        };

        let decoded = match self
            .decoder
            .decode(&frame, config.preview_width, config.preview_height)
        {
            Ok(decoded) => decoded,
            Err(e) => {
                lane.decode_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(role = %role, sequence = frame.sequence(), error = %e, "Frame decode failed");
                return DispatchOutcome::DecodeFailed;
            }
        };
        drop(frame);

        let result = self.analyzer.analyze(path, decoded);
        let applied = self.engine.apply(role, &result);
        lane.analyzed.fetch_add(1, Ordering::Relaxed);
        drop(busy);

        tracing::trace!(role = %role, ?path, outcome = ?applied, "Frame analyzed");

        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }
        DispatchOutcome::Analyzed(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisResult, ScriptedAnalyzer};
    use crate::capture::DecodedFrame;
    use crate::config::{LivenessMode, SessionConfig};
    use crate::liveness::Verdict;
    use crossbeam_channel::{bounded, Receiver, Sender};

    const IR: DeviceRole = DeviceRole::LeftInfrared;
    const VIS: DeviceRole = DeviceRole::RightVisible;

    // 4x2 NV21
    const FRAME: [u8; 12] = [16; 12];

    fn no_wait() -> DispatchConfig {
        DispatchConfig {
            analysis_interval_ms: 0,
        }
    }

    fn session(engine: &LivenessEngine, mode: LivenessMode) {
        engine.start(Arc::new(SessionConfig {
            preview_width: 4,
            preview_height: 2,
            mode,
            ..Default::default()
        }));
    }

    fn dispatcher(analyzer: Arc<dyn FrameAnalyzer>) -> (Arc<LivenessEngine>, FrameDispatcher) {
        let engine = Arc::new(LivenessEngine::new());
        let dispatcher = FrameDispatcher::new(Arc::clone(&engine), analyzer).with_config(&no_wait());
        (engine, dispatcher)
    }

    #[test]
    fn test_idle_without_session() {
        let analyzer = Arc::new(ScriptedAnalyzer::new());
        let (_engine, dispatcher) = dispatcher(analyzer.clone());

        let report = dispatcher.on_raw_frame(IR, &FRAME);
        assert_eq!(report.outcome, DispatchOutcome::Idle);
        assert_eq!(report.sequence, 0);
        assert_eq!(dispatcher.on_raw_frame(IR, &FRAME).sequence, 1);
        assert_eq!(analyzer.calls(), 0);
        assert_eq!(dispatcher.stats(IR).idle, 2);
    }

    #[test]
    fn test_visible_frame_settles_simple_mode() {
        let analyzer = Arc::new(
            ScriptedAnalyzer::new().with_visible_statuses(AnalysisPath::VisibleSimple, [1, 0]),
        );
        let (engine, dispatcher) = dispatcher(analyzer);
        session(&engine, LivenessMode::VisibleSimple);

        assert_eq!(
            dispatcher.on_raw_frame(VIS, &FRAME).outcome,
            DispatchOutcome::Analyzed(ApplyOutcome::Pending { pass_evidence: 0 })
        );
        assert_eq!(
            dispatcher.on_raw_frame(VIS, &FRAME).outcome,
            DispatchOutcome::Analyzed(ApplyOutcome::Settled(Verdict::Live))
        );
        assert_eq!(dispatcher.on_raw_frame(VIS, &FRAME).outcome, DispatchOutcome::Idle);
    }

    #[test]
    fn test_visible_not_analyzed_in_infrared_mode() {
        let analyzer = Arc::new(ScriptedAnalyzer::new());
        let (engine, dispatcher) = dispatcher(analyzer.clone());
        session(&engine, LivenessMode::InfraredSingle);

        assert_eq!(
            dispatcher.on_raw_frame(VIS, &FRAME).outcome,
            DispatchOutcome::NotAnalyzed
        );
        assert_eq!(analyzer.calls(), 0);
    }

    #[test]
    fn test_decode_failure_counted() {
        let analyzer = Arc::new(ScriptedAnalyzer::new());
        let (engine, dispatcher) = dispatcher(analyzer.clone());
        session(&engine, LivenessMode::InfraredSingle);

        let report = dispatcher.on_raw_frame(IR, &FRAME[..6]);
        assert_eq!(report.outcome, DispatchOutcome::DecodeFailed);
        assert_eq!(dispatcher.stats(IR).decode_failures, 1);
        assert_eq!(analyzer.calls(), 0);

        // a failed decode leaves the lane free
        assert!(matches!(
            dispatcher.on_raw_frame(IR, &FRAME).outcome,
            DispatchOutcome::Analyzed(_)
        ));
    }

    /// Blocks inside `analyze` until released.
    struct GateAnalyzer {
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl FrameAnalyzer for GateAnalyzer {
        fn analyze(&self, path: AnalysisPath, frame: DecodedFrame) -> AnalysisResult {
            assert_eq!(path, AnalysisPath::Infrared);
            drop(frame);
            self.entered.send(()).unwrap();
            self.release.recv().unwrap();
            AnalysisResult::infrared(0.0)
        }
    }

    #[test]
    fn test_drops_frame_while_role_busy() {
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let analyzer = Arc::new(GateAnalyzer {
            entered: entered_tx,
            release: release_rx,
        });
        let (engine, dispatcher) = dispatcher(analyzer);
        let dispatcher = Arc::new(dispatcher);
        session(&engine, LivenessMode::VisibleSimple);

        let first = {
            let dispatcher = Arc::clone(&dispatcher);
            std::thread::spawn(move || dispatcher.on_raw_frame(IR, &FRAME))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let second = dispatcher.on_raw_frame(IR, &FRAME);
        assert_eq!(second.outcome, DispatchOutcome::Busy);

        release_tx.send(()).unwrap();
        let first = first.join().unwrap();
        assert_eq!(
            first.outcome,
            DispatchOutcome::Analyzed(ApplyOutcome::Pending { pass_evidence: 0 })
        );

        let stats = dispatcher.stats(IR);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.dropped_busy, 1);
        assert_eq!(stats.analyzed, 1);
    }

    #[test]
    fn test_roles_analyzed_independently() {
        let analyzer = Arc::new(
            ScriptedAnalyzer::new()
                .with_infrared_scores([0.1])
                .with_visible_statuses(AnalysisPath::VisibleNormal, [2])
                .with_work(Duration::from_millis(20)),
        );
        let (engine, dispatcher) = dispatcher(analyzer.clone());
        let dispatcher = Arc::new(dispatcher);
        session(&engine, LivenessMode::VisibleNormal);

        let workers: Vec<_> = DeviceRole::ALL
            .into_iter()
            .map(|role| {
                let dispatcher = Arc::clone(&dispatcher);
                std::thread::spawn(move || {
                    for _ in 0..3 {
                        dispatcher.on_raw_frame(role, &FRAME);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(analyzer.calls(), 6);
        assert!(analyzer.max_in_flight() <= 2);
        assert_eq!(engine.verdict(), Some(Verdict::Pending));
    }
}
