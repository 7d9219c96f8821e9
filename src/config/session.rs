//! Session configuration snapshot.
//!
//! A [`SessionConfig`] is immutable once published; the engine and both
//! device workers read it through a shared `Arc` without locking.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest accepted preview edge, in pixels.
pub const MIN_PREVIEW_EDGE: u32 = 200;
/// Accepted session timeout range, in milliseconds.
pub const TIMEOUT_RANGE_MS: std::ops::RangeInclusive<u64> = 10_000..=120_000;

/// Detection policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LivenessMode {
    /// Mode 0: infrared check disabled; the first infrared result passes.
    AlwaysPass,
    /// Mode 1: any infrared result passes, score is not consulted.
    InfraredSingle,
    /// Mode 2: simplified visible-light check, status 0 passes.
    VisibleSimple,
    /// Mode 3: score-bearing visible-light check, status 0 passes.
    VisibleNormal,
    /// Infrared results above the score threshold count as evidence until
    /// `pass_count` is reached. Not selectable from host payloads.
    InfraredThreshold,
}

impl LivenessMode {
    /// Numeric selector.
    pub fn code(self) -> u8 {
        match self {
            LivenessMode::AlwaysPass => 0,
            LivenessMode::InfraredSingle => 1,
            LivenessMode::VisibleSimple => 2,
            LivenessMode::VisibleNormal => 3,
            LivenessMode::InfraredThreshold => 4,
        }
    }

    /// Mode for a numeric selector, including the API-only threshold mode.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(LivenessMode::AlwaysPass),
            1 => Some(LivenessMode::InfraredSingle),
            2 => Some(LivenessMode::VisibleSimple),
            3 => Some(LivenessMode::VisibleNormal),
            4 => Some(LivenessMode::InfraredThreshold),
            _ => None,
        }
    }

    /// Returns true if the verdict is decided by the visible channel.
    pub fn uses_visible_channel(self) -> bool {
        matches!(self, LivenessMode::VisibleSimple | LivenessMode::VisibleNormal)
    }
}

/// Validation failure for a configuration field.
///
/// Field names are the host payload element names, so diagnostics read the
/// same whether a value came from a payload or was built in code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("{field}: malformed value {value:?}")]
    Malformed { field: &'static str, value: String },
    #[error("{field}: value {value} out of range ({bounds})")]
    OutOfRange {
        field: &'static str,
        value: String,
        bounds: &'static str,
    },
    #[error("{field}: product code {value} is not a supported device")]
    UnsupportedProduct { field: &'static str, value: String },
    #[error("payload is not well-formed: {0}")]
    Syntax(String),
}

impl ConfigValidationError {
    /// Name of the offending field, when the failure is field-specific.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ConfigValidationError::Malformed { field, .. }
            | ConfigValidationError::OutOfRange { field, .. }
            | ConfigValidationError::UnsupportedProduct { field, .. } => Some(field),
            ConfigValidationError::Syntax(_) => None,
        }
    }

    pub(crate) fn out_of_range(
        field: &'static str,
        value: impl ToString,
        bounds: &'static str,
    ) -> Self {
        ConfigValidationError::OutOfRange {
            field,
            value: value.to_string(),
            bounds,
        }
    }
}

/// Thresholds, mode and time budget for one detection session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Decoded frame width in pixels.
    pub preview_width: u32,
    /// Decoded frame height in pixels.
    pub preview_height: u32,
    /// Image compression quality (0-100) for captured stills.
    pub image_quality: u8,
    /// Qualifying infrared results required in threshold mode.
    pub pass_count: u32,
    /// Detection policy.
    pub mode: LivenessMode,
    /// Session time budget in milliseconds.
    pub timeout_ms: u64,
    /// Infrared score a result must exceed to count as evidence.
    pub score_threshold: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preview_width: 640,
            preview_height: 480,
            image_quality: 80,
            pass_count: 1,
            mode: LivenessMode::VisibleSimple,
            timeout_ms: 30_000,
            score_threshold: 0.7,
        }
    }
}

impl SessionConfig {
    /// Session time budget.
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Byte length of an RGB24 frame at the preview size.
    #[inline]
    pub fn rgb_frame_len(&self) -> usize {
        self.preview_width as usize * self.preview_height as usize * 3
    }

    /// Checks every field against its documented bound.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.preview_width < MIN_PREVIEW_EDGE {
            return Err(ConfigValidationError::out_of_range(
                "imgWidth",
                self.preview_width,
                ">= 200",
            ));
        }
        if self.preview_height < MIN_PREVIEW_EDGE {
            return Err(ConfigValidationError::out_of_range(
                "imgHeight",
                self.preview_height,
                ">= 200",
            ));
        }
        if self.image_quality > 100 {
            return Err(ConfigValidationError::out_of_range(
                "imgCompress",
                self.image_quality,
                "0-100",
            ));
        }
        if !TIMEOUT_RANGE_MS.contains(&self.timeout_ms) {
            return Err(ConfigValidationError::out_of_range(
                "timeOut",
                self.timeout_ms,
                "10000-120000 ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(ConfigValidationError::out_of_range(
                "liveThreshold",
                self.score_threshold,
                "0.0-1.0",
            ));
        }
        Ok(())
    }
}
