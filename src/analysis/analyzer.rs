//! Frame analyzer seam.
//!
//! The pixel-level face and spoof analysis is an external capability. The
//! core hands it one decoded frame at a time and consumes a typed result.

use crate::capture::DecodedFrame;
use crate::config::LivenessMode;
use crate::device::DeviceRole;

/// Length of the feature vector produced per analyzed frame.
pub const FEATURE_LEN: usize = 20;

/// Which analysis routine a frame goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisPath {
    /// Near-infrared liveness scoring.
    Infrared,
    /// Color-only visible-light check (lower assurance).
    VisibleSimple,
    /// Full score-bearing visible-light check.
    VisibleNormal,
}

impl AnalysisPath {
    /// Selects the routine for a frame from `role` under `mode`.
    ///
    /// Infrared frames are scored in every mode. Visible frames are only
    /// analyzed when the mode decides on the visible channel.
    pub fn select(role: DeviceRole, mode: LivenessMode) -> Option<Self> {
        match (role, mode) {
            (DeviceRole::LeftInfrared, _) => Some(AnalysisPath::Infrared),
            (DeviceRole::RightVisible, LivenessMode::VisibleSimple) => {
                Some(AnalysisPath::VisibleSimple)
            }
            (DeviceRole::RightVisible, LivenessMode::VisibleNormal) => {
                Some(AnalysisPath::VisibleNormal)
            }
            (DeviceRole::RightVisible, _) => None,
        }
    }

    /// Channel flag passed to the analyzer (0 = infrared, 1 = color).
    pub fn channel_flag(self) -> i32 {
        match self {
            AnalysisPath::Infrared => 0,
            AnalysisPath::VisibleSimple | AnalysisPath::VisibleNormal => 1,
        }
    }
}

/// Outcome of analyzing one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// Routine that produced this result.
    pub path: AnalysisPath,
    /// Liveness score in `[0, 1]`; zero when the routine does not score.
    pub score: f32,
    /// Face bounding box as `[x, y, width, height]`.
    pub face_rect: [i32; 4],
    /// Face feature vector.
    pub feature: Vec<f64>,
    /// Analyzer status, `0` on success.
    pub status: i32,
}

impl AnalysisResult {
    /// Infrared result carrying `score`.
    pub fn infrared(score: f32) -> Self {
        Self {
            path: AnalysisPath::Infrared,
            score,
            face_rect: [0; 4],
            feature: vec![0.0; FEATURE_LEN],
            status: 0,
        }
    }

    /// Visible-channel result carrying `status`.
    pub fn visible(path: AnalysisPath, status: i32) -> Self {
        Self {
            path,
            score: 0.0,
            face_rect: [0; 4],
            feature: vec![0.0; FEATURE_LEN],
            status,
        }
    }

    /// Returns true when the analyzer reported success.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// External frame analysis capability.
///
/// Called concurrently from both device workers, at most once at a time per
/// role. The frame is moved in and must not be retained.
pub trait FrameAnalyzer: Send + Sync {
    fn analyze(&self, path: AnalysisPath, frame: DecodedFrame) -> AnalysisResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrared_always_selected() {
        for code in 0..=4 {
            let mode = LivenessMode::from_code(code).unwrap();
            assert_eq!(
                AnalysisPath::select(DeviceRole::LeftInfrared, mode),
                Some(AnalysisPath::Infrared)
            );
        }
    }

    #[test]
    fn test_visible_selected_by_mode() {
        let visible = DeviceRole::RightVisible;
        assert_eq!(AnalysisPath::select(visible, LivenessMode::AlwaysPass), None);
        assert_eq!(AnalysisPath::select(visible, LivenessMode::InfraredSingle), None);
        assert_eq!(
            AnalysisPath::select(visible, LivenessMode::VisibleSimple),
            Some(AnalysisPath::VisibleSimple)
        );
        assert_eq!(
            AnalysisPath::select(visible, LivenessMode::VisibleNormal),
            Some(AnalysisPath::VisibleNormal)
        );
        assert_eq!(AnalysisPath::select(visible, LivenessMode::InfraredThreshold), None);
    }
}
