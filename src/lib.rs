//! Dual-Stream Liveness Library
//!
//! Binds an infrared camera and a visible-light camera to fixed roles,
//! streams their frames through an external analyzer and fuses the
//! per-frame results into one session verdict: live, not live, timed out
//! or cancelled.
//!
//! # Architecture
//!
//! ```text
//! device events → binder → stream controller (per role)
//!                               ↓  device thread
//!                          dispatcher → analyzer → liveness engine → verdict
//!                               ↑
//!                     config (payload / TOML) → session config
//! ```
//!
//! # Design Principles
//!
//! - **Owned context**: everything hangs off one [`LivenessOrchestrator`];
//!   there is no process-global state
//! - **Drain barrier**: once `stop_preview` returns, no frame from that
//!   stream reaches the analyzer
//! - **Bounded latency**: at most one frame per role is in analysis;
//!   frames arriving meanwhile are dropped
//! - **All-or-nothing config**: a rejected payload leaves the previous
//!   config in force
//!
//! # Example
//!
//! ```no_run
//! use dual_liveness::{
//!     analysis::ScriptedAnalyzer,
//!     capture::{CameraHandle, MockCamera},
//!     device::{MemoryRoleStore, ProductId, RecordingDeviceLayer},
//!     dispatch::DispatchConfig,
//!     session::{DeviceEvent, LivenessOrchestrator},
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let orchestrator = LivenessOrchestrator::new(
//!     Box::new(MemoryRoleStore::new()),
//!     Arc::new(RecordingDeviceLayer::new()),
//!     Arc::new(ScriptedAnalyzer::new().with_infrared_scores([0.9])),
//!     &DispatchConfig::default(),
//! );
//!
//! orchestrator
//!     .configure("<config><isActived>1</isActived></config>")
//!     .unwrap();
//! for pid in [0x2203, 0x2204] {
//!     let camera = CameraHandle::new(MockCamera::new(ProductId(pid)));
//!     orchestrator
//!         .handle_device_event(DeviceEvent::Connected(camera))
//!         .unwrap();
//! }
//!
//! orchestrator.start_session();
//! let verdict = orchestrator.wait_for_verdict(Duration::from_secs(35));
//! println!("verdict: {:?}", verdict);
//! orchestrator.on_teardown();
//! ```

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod analysis;
pub mod capture;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod liveness;
pub mod metrics;
pub mod session;

// Re-export commonly used types at crate root
pub use analysis::{AnalysisPath, AnalysisResult, FrameAnalyzer};
pub use capture::{CameraHandle, CameraStreamController, StreamEvent, StreamState};
pub use config::{parse_payload, ConfigValidationError, FileConfig, LivenessMode, SessionConfig};
pub use device::{DeviceRole, ProductId};
pub use liveness::{LivenessEngine, Verdict};
pub use session::{DeviceEvent, LivenessOrchestrator, SessionError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
