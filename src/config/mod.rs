//! Session configuration and validation.
//!
//! Configuration arrives either as a host payload of flat XML elements or
//! as a TOML file. Both paths are all-or-nothing: a single bad field
//! rejects the input and the previously published config stays in force.

mod file;
mod payload;
mod session;
mod slot;

pub use file::{ConfigError, FileConfig, OutputConfig};
pub use payload::{parse_payload, DevicePids, ValidatedPayload};
pub use session::{
    ConfigValidationError, LivenessMode, SessionConfig, MIN_PREVIEW_EDGE, TIMEOUT_RANGE_MS,
};
pub use slot::ConfigSlot;
