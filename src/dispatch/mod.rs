//! Frame delivery from device workers to the liveness engine.
//!
//! Decoding and analysis run on the delivering device thread with a
//! drop-while-busy policy per role.

mod decoder;
mod dispatcher;

pub use decoder::{DecodeError, PixelDecoder, Yuv420SpDecoder};
pub use dispatcher::{DispatchConfig, DispatchOutcome, FrameDispatcher, FrameReport, LaneStats};
