//! Camera streams and frame types.
//!
//! Each role has one [`CameraStreamController`] that owns the physical
//! camera through a [`CameraHandle`]. The camera's own delivery thread
//! pushes raw buffers through the controller's frame gate into the
//! dispatcher.

mod camera;
mod controller;
mod frame;
mod surface;

pub use camera::{
    CameraDevice, CameraError, CameraHandle, FrameEncoding, FrameSink, MockCamera,
    MockCameraConfig, PreviewFormat, nv21_len,
};
pub use controller::{
    CameraStreamController, DrainSignal, StreamError, StreamEvent, StreamState, EVENT_CAPACITY,
};
pub use frame::{DecodedFrame, RawFrame};
pub use surface::{NoSurfaces, PreviewSurface, SurfaceProvider};
