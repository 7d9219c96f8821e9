//! Camera driver abstraction.
//!
//! The driver owns the device and its delivery thread. It pushes raw frames
//! into a sink on that thread and signals drain once the thread will not
//! call the sink again.

use super::controller::DrainSignal;
use crate::device::ProductId;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during camera operations.
#[derive(Debug, Clone, Error)]
pub enum CameraError {
    #[error("device rejected {format}")]
    UnsupportedFormat { format: PreviewFormat },
    #[error("preview format not negotiated")]
    NotConfigured,
    #[error("device is already streaming")]
    AlreadyStreaming,
    #[error("failed to start streaming: {0}")]
    StartFailed(String),
    #[error("failed to close device: {0}")]
    CloseFailed(String),
}

/// Wire encoding requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameEncoding {
    Mjpeg,
    Yuyv,
}

/// Preview size, encoding and USB bandwidth share.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewFormat {
    pub width: u32,
    pub height: u32,
    pub encoding: FrameEncoding,
    /// Fraction of bus bandwidth reserved for this stream.
    pub bandwidth: f32,
}

impl PreviewFormat {
    /// Bandwidth share used for the primary format, leaving room for the
    /// second camera on the same bus.
    pub const SHARED_BANDWIDTH: f32 = 0.5;

    /// Compressed format tried first.
    pub fn primary(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            encoding: FrameEncoding::Mjpeg,
            bandwidth: Self::SHARED_BANDWIDTH,
        }
    }

    /// Uncompressed default tried once if the primary is rejected.
    pub fn fallback(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            encoding: FrameEncoding::Yuyv,
            bandwidth: 1.0,
        }
    }

    /// Bytes in one YUV420SP frame of this size.
    pub fn yuv420sp_len(&self) -> usize {
        nv21_len(self.width, self.height)
    }
}

impl std::fmt::Display for PreviewFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} {}x{} (bandwidth {:.2})",
            self.encoding, self.width, self.height, self.bandwidth
        )
    }
}

/// Bytes in an NV21 frame. Odd edges round up: every 2x2 block, including
/// a partial one on the last row or column, carries one V/U pair.
pub fn nv21_len(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    w * h + 2 * w.div_ceil(2) * h.div_ceil(2)
}

/// Receives raw driver buffers on the device's delivery thread.
pub type FrameSink = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Trait for camera driver implementations.
pub trait CameraDevice: Send {
    /// Product code of the physical device.
    fn product_id(&self) -> ProductId;

    /// Negotiates the preview format.
    fn set_preview_format(&mut self, format: &PreviewFormat) -> Result<(), CameraError>;

    /// Starts delivering frames into `sink` from the device thread. The
    /// thread must call [`DrainSignal::confirm`] after its last sink call.
    fn start_streaming(&mut self, sink: FrameSink, drain: DrainSignal) -> Result<(), CameraError>;

    /// Asks the device thread to stop. Does not wait.
    fn stop_streaming(&mut self);

    /// Releases the device.
    fn close(&mut self) -> Result<(), CameraError>;
}

/// Exclusive ownership token for an open physical camera.
pub struct CameraHandle {
    product: ProductId,
    device: Box<dyn CameraDevice>,
}

impl CameraHandle {
    pub fn new(device: impl CameraDevice + 'static) -> Self {
        Self {
            product: device.product_id(),
            device: Box::new(device),
        }
    }

    #[inline]
    pub fn product(&self) -> ProductId {
        self.product
    }

    pub(crate) fn device_mut(&mut self) -> &mut dyn CameraDevice {
        self.device.as_mut()
    }

    /// Closes a handle that never reached a controller.
    pub(crate) fn discard(mut self) {
        if let Err(e) = self.device.close() {
            tracing::warn!(product = %self.product, error = %e, "Camera close fault ignored");
        }
    }
}

impl std::fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraHandle")
            .field("product", &self.product)
            .finish_non_exhaustive()
    }
}

/// Behavior knobs for [`MockCamera`].
#[derive(Debug, Clone)]
pub struct MockCameraConfig {
    /// Delay between frames.
    pub frame_interval: Duration,
    /// Encodings the mock refuses to negotiate.
    pub unsupported: Vec<FrameEncoding>,
    /// Report a driver fault from `close`.
    pub fail_close: bool,
    /// Stop on its own after this many frames.
    pub frame_limit: Option<u64>,
}

impl Default for MockCameraConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            unsupported: Vec::new(),
            fail_close: false,
            frame_limit: None,
        }
    }
}

/// Mock camera that generates synthetic NV21 frames on its own thread.
pub struct MockCamera {
    product: ProductId,
    config: MockCameraConfig,
    format: Option<PreviewFormat>,
    stop: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl MockCamera {
    pub fn new(product: ProductId) -> Self {
        Self::with_config(product, MockCameraConfig::default())
    }

    pub fn with_config(product: ProductId, config: MockCameraConfig) -> Self {
        Self {
            product,
            config,
            format: None,
            stop: Arc::new(AtomicBool::new(false)),
            delivered: Arc::new(AtomicU64::new(0)),
            worker: None,
        }
    }

    /// Shared counter of frames pushed into the sink.
    pub fn delivered_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.delivered)
    }

    /// Negotiated format, if any.
    pub fn format(&self) -> Option<PreviewFormat> {
        self.format
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == std::thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                tracing::warn!(product = %self.product, "Mock camera worker panicked");
            }
        }
    }
}

/// Fills an NV21 buffer with a moving luma gradient and neutral chroma.
fn fill_nv21(buffer: &mut [u8], width: usize, height: usize, sequence: u64) {
    let luma = width * height;
    for (i, px) in buffer[..luma].iter_mut().enumerate() {
        let (x, y) = (i % width, i / width);
        *px = ((x + y) as u64).wrapping_add(sequence) as u8;
    }
    buffer[luma..].fill(128);
}

impl CameraDevice for MockCamera {
    fn product_id(&self) -> ProductId {
        self.product
    }

    fn set_preview_format(&mut self, format: &PreviewFormat) -> Result<(), CameraError> {
        if self.config.unsupported.contains(&format.encoding) {
            return Err(CameraError::UnsupportedFormat { format: *format });
        }
        self.format = Some(*format);
        tracing::debug!(product = %self.product, format = %format, "MockCamera format set");
        Ok(())
    }

    fn start_streaming(&mut self, mut sink: FrameSink, drain: DrainSignal) -> Result<(), CameraError> {
        let format = self.format.ok_or(CameraError::NotConfigured)?;
        if self.worker.is_some() && !self.stop.load(Ordering::Acquire) {
            return Err(CameraError::AlreadyStreaming);
        }
        // a stopped worker has drained and is only exiting
        self.join_worker();
        self.stop.store(false, Ordering::Release);

        let stop = Arc::clone(&self.stop);
        let delivered = Arc::clone(&self.delivered);
        let interval = self.config.frame_interval;
        let limit = self.config.frame_limit;

        let worker = std::thread::Builder::new()
            .name(format!("camera-{}", self.product))
            .spawn(move || {
                let (width, height) = (format.width as usize, format.height as usize);
                // reused between callbacks like a driver's transfer buffer
                let mut buffer = vec![0u8; format.yuv420sp_len()];
                let mut sequence = 0u64;
                while !stop.load(Ordering::Acquire) {
                    fill_nv21(&mut buffer, width, height, sequence);
                    sink(&buffer);
                    sequence += 1;
                    delivered.fetch_add(1, Ordering::AcqRel);
                    if limit.is_some_and(|limit| sequence >= limit) {
                        break;
                    }
                    if !interval.is_zero() {
                        std::thread::sleep(interval);
                    }
                }
                stop.store(true, Ordering::Release);
                drain.confirm();
            })
            .map_err(|e| CameraError::StartFailed(e.to_string()))?;

        self.worker = Some(worker);
        tracing::info!(product = %self.product, "MockCamera streaming");
        Ok(())
    }

    fn stop_streaming(&mut self) {
        self.stop.store(true, Ordering::Release);
    }

    fn close(&mut self) -> Result<(), CameraError> {
        self.stop_streaming();
        self.join_worker();
        self.format = None;
        tracing::info!(product = %self.product, "MockCamera closed");
        if self.config.fail_close {
            return Err(CameraError::CloseFailed("simulated driver fault".into()));
        }
        Ok(())
    }
}

impl Drop for MockCamera {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}
