//! Scripted analyzer for tests and demonstrations.

use super::analyzer::{AnalysisPath, AnalysisResult, FrameAnalyzer};
use crate::capture::DecodedFrame;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Status returned when no script exists for a path ("no face found").
pub const NO_FACE_STATUS: i32 = 1;

#[derive(Default)]
struct Script {
    queued: VecDeque<AnalysisResult>,
    last: Option<AnalysisResult>,
}

/// Analyzer that replays queued results per path.
///
/// Once a path's queue is exhausted its last result repeats. A path with no
/// script reports [`NO_FACE_STATUS`] with a zero score.
#[derive(Default)]
pub struct ScriptedAnalyzer {
    scripts: Mutex<HashMap<AnalysisPath, Script>>,
    work: Duration,
    calls: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues infrared results with the given scores.
    pub fn with_infrared_scores(self, scores: impl IntoIterator<Item = f32>) -> Self {
        self.push(scores.into_iter().map(AnalysisResult::infrared))
    }

    /// Queues visible results with the given statuses on `path`.
    pub fn with_visible_statuses(
        self,
        path: AnalysisPath,
        statuses: impl IntoIterator<Item = i32>,
    ) -> Self {
        self.push(
            statuses
                .into_iter()
                .map(|status| AnalysisResult::visible(path, status)),
        )
    }

    /// Simulated time spent in each analysis call.
    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    /// Total analysis calls so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Acquire)
    }

    /// Highest number of overlapping analysis calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Acquire)
    }

    fn push(self, results: impl Iterator<Item = AnalysisResult>) -> Self {
        {
            let mut scripts = self.scripts.lock();
            for result in results {
                scripts.entry(result.path).or_default().queued.push_back(result);
            }
        }
        self
    }

    fn next_result(&self, path: AnalysisPath) -> AnalysisResult {
        let mut scripts = self.scripts.lock();
        let script = scripts.entry(path).or_default();
        match script.queued.pop_front() {
            Some(result) => {
                script.last = Some(result.clone());
                result
            }
            None => script
                .last
                .clone()
                .unwrap_or_else(|| AnalysisResult::visible(path, NO_FACE_STATUS)),
        }
    }
}

impl FrameAnalyzer for ScriptedAnalyzer {
    fn analyze(&self, path: AnalysisPath, frame: DecodedFrame) -> AnalysisResult {
        let current = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(current, Ordering::AcqRel);
        self.calls.fetch_add(1, Ordering::AcqRel);

        tracing::trace!(?path, frame = ?frame, "Scripted analysis");
        if !self.work.is_zero() {
            std::thread::sleep(self.work);
        }
        let result = self.next_result(path);

        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceRole;

    fn frame() -> DecodedFrame {
        DecodedFrame::new(vec![0u8; 12], 2, 2, 1, DeviceRole::LeftInfrared)
    }

    #[test]
    fn test_replays_then_repeats_last() {
        let analyzer = ScriptedAnalyzer::new().with_infrared_scores([0.9, 0.2]);
        assert_eq!(analyzer.analyze(AnalysisPath::Infrared, frame()).score, 0.9);
        assert_eq!(analyzer.analyze(AnalysisPath::Infrared, frame()).score, 0.2);
        assert_eq!(analyzer.analyze(AnalysisPath::Infrared, frame()).score, 0.2);
        assert_eq!(analyzer.calls(), 3);
    }

    #[test]
    fn test_unscripted_path_reports_no_face() {
        let analyzer = ScriptedAnalyzer::new();
        let result = analyzer.analyze(AnalysisPath::VisibleNormal, frame());
        assert_eq!(result.status, NO_FACE_STATUS);
        assert_eq!(result.path, AnalysisPath::VisibleNormal);
        assert_eq!(result.score, 0.0);
    }
}
