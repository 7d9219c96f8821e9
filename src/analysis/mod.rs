//! Per-frame analysis.
//!
//! The analyzer itself is external; this module defines the typed contract
//! between it and the decision engine, and picks which routine each frame
//! goes through.

mod analyzer;
mod scripted;

pub use analyzer::{AnalysisPath, AnalysisResult, FrameAnalyzer, FEATURE_LEN};
pub use scripted::{ScriptedAnalyzer, NO_FACE_STATUS};
