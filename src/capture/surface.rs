//! Presentation surfaces attached to a preview.

use crate::device::DeviceRole;

/// Host-owned surface a stream renders into.
pub trait PreviewSurface: Send {
    /// Host went to the background; keep the surface but stop drawing.
    fn pause(&mut self) {}

    /// Host came back to the foreground.
    fn resume(&mut self) {}

    /// Surface is no longer used by the stream.
    fn release(&mut self);
}

/// Hands out a fresh surface each time a stream starts.
pub trait SurfaceProvider: Send + Sync {
    fn surface_for(&self, role: DeviceRole) -> Option<Box<dyn PreviewSurface>>;
}

/// Provider for headless hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSurfaces;

impl SurfaceProvider for NoSurfaces {
    fn surface_for(&self, _role: DeviceRole) -> Option<Box<dyn PreviewSurface>> {
        None
    }
}
