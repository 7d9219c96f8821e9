//! Seam to the platform device/permission layer.
//!
//! USB enumeration, permission prompts and hot-plug notifications live
//! outside this crate. The core only asks for permission and toggles the
//! device watch; the layer answers by delivering device events.

use super::ProductId;
use parking_lot::Mutex;

/// Platform device layer.
pub trait DeviceLayer: Send + Sync {
    /// Requests access to an attached device. Fire-and-forget: the answer
    /// arrives later as a connect event.
    fn request_permission(&self, product: ProductId);

    /// Starts watching for attach/detach notifications.
    fn register_watch(&self);

    /// Stops watching for attach/detach notifications.
    fn unregister_watch(&self);
}

/// A call observed by [`RecordingDeviceLayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLayerCall {
    RequestPermission(ProductId),
    RegisterWatch,
    UnregisterWatch,
}

/// Device layer that records calls instead of touching hardware.
#[derive(Debug, Default)]
pub struct RecordingDeviceLayer {
    calls: Mutex<Vec<DeviceLayerCall>>,
}

impl RecordingDeviceLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every call observed so far, in order.
    pub fn calls(&self) -> Vec<DeviceLayerCall> {
        self.calls.lock().clone()
    }

    /// Returns true if the watch is currently registered.
    pub fn is_watching(&self) -> bool {
        self.calls
            .lock()
            .iter()
            .rev()
            .find_map(|call| match call {
                DeviceLayerCall::RegisterWatch => Some(true),
                DeviceLayerCall::UnregisterWatch => Some(false),
                DeviceLayerCall::RequestPermission(_) => None,
            })
            .unwrap_or(false)
    }
}

impl DeviceLayer for RecordingDeviceLayer {
    fn request_permission(&self, product: ProductId) {
        tracing::debug!(product = %product, "Permission requested");
        self.calls
            .lock()
            .push(DeviceLayerCall::RequestPermission(product));
    }

    fn register_watch(&self) {
        self.calls.lock().push(DeviceLayerCall::RegisterWatch);
    }

    fn unregister_watch(&self) {
        self.calls.lock().push(DeviceLayerCall::UnregisterWatch);
    }
}
