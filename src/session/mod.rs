//! Host-facing orchestration.
//!
//! [`LivenessOrchestrator`] is the single owned context a host creates. It
//! routes device-layer events to the binder and stream controllers,
//! publishes session configs and exposes the session verdict.

mod orchestrator;

pub use orchestrator::{DeviceEvent, DeviceOutcome, LivenessOrchestrator, SessionError};
