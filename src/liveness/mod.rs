//! Session-level liveness decisions.
//!
//! Accumulates per-role evidence and settles on a terminal verdict when the
//! pass condition is met, the time budget runs out, or the host cancels.

mod engine;
mod verdict;

pub use engine::{ApplyOutcome, LivenessEngine, LivenessSession};
pub use verdict::Verdict;
