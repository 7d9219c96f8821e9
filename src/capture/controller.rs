//! Camera stream controller.
//!
//! One controller per role owns that role's [`CameraHandle`] and drives its
//! lifecycle:
//!
//! ```text
//! Closed -> Opening -> Streaming -> Stopping -> Closed
//!    \__________\___________\___________\______> Released
//! ```
//!
//! `stop_preview` is a drain barrier. Once it returns, the device thread
//! will not deliver another frame into the dispatcher for that stream.
//!
//! Locks are always taken in the order state, handle, surface.

use super::camera::{CameraDevice, CameraError, CameraHandle, FrameSink, PreviewFormat};
use super::surface::PreviewSurface;
use crate::device::{DeviceRole, ProductId};
use crate::dispatch::{DispatchOutcome, FrameDispatcher, FrameReport};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;
use thiserror::Error;

/// Capacity of each role's event channel. The oldest event is dropped when
/// the host falls behind.
pub const EVENT_CAPACITY: usize = 256;

/// Lifecycle state of one role's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamState {
    /// No camera held, or the last one was closed.
    Closed,
    /// Format negotiated, preview not started yet. Also held briefly while
    /// `start_preview` registers the frame sink.
    Opening,
    Streaming,
    /// Stop requested, waiting for the device thread to drain.
    Stopping,
    /// Terminal. The controller accepts no further cameras.
    Released,
}

impl StreamState {
    /// States in which frames are passed to the dispatcher.
    #[inline]
    pub fn is_delivering(self) -> bool {
        matches!(self, StreamState::Opening | StreamState::Streaming)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Closed => "closed",
            StreamState::Opening => "opening",
            StreamState::Streaming => "streaming",
            StreamState::Stopping => "stopping",
            StreamState::Released => "released",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by stream operations.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("{role} stream is already open")]
    AlreadyOpen { role: DeviceRole },

    #[error("{role} stream has been released")]
    AlreadyReleased { role: DeviceRole },

    #[error("{role} stream could not negotiate a preview format: {source}")]
    FormatNegotiation {
        role: DeviceRole,
        #[source]
        source: CameraError,
    },

    #[error("{role} stream has no open camera")]
    NotOpen { role: DeviceRole },

    #[error("cannot {op} {role} stream while {state}")]
    InvalidState {
        role: DeviceRole,
        op: &'static str,
        state: StreamState,
    },

    #[error("{role} camera fault: {source}")]
    Device {
        role: DeviceRole,
        #[source]
        source: CameraError,
    },
}

/// Ordered lifecycle and frame events for one role.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Opened {
        product: ProductId,
        format: PreviewFormat,
    },
    PreviewStarted,
    /// The device thread confirmed drain.
    PreviewStopped,
    Closed,
    /// The device layer reported the camera gone.
    Detached {
        product: ProductId,
    },
    Error {
        message: String,
    },
    /// A frame reached the analyzer.
    Frame(FrameReport),
}

struct StreamInner {
    state: StreamState,
    format: Option<PreviewFormat>,
    /// Device thread currently delivering frames.
    worker: Option<ThreadId>,
    /// Bumped by every `start_preview`.
    generation: u64,
    /// Highest generation whose device thread has drained.
    drained: u64,
}

struct StreamShared {
    role: DeviceRole,
    inner: Mutex<StreamInner>,
    changed: Condvar,
    events_tx: Sender<StreamEvent>,
    events_rx: Receiver<StreamEvent>,
}

impl StreamShared {
    fn emit(&self, mut event: StreamEvent) {
        loop {
            match self.events_tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    let _ = self.events_rx.try_recv();
                    event = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Handed to the device with each stream start. The device thread calls
/// [`DrainSignal::confirm`] once it will never call the frame sink again.
pub struct DrainSignal {
    shared: Arc<StreamShared>,
    generation: u64,
}

impl DrainSignal {
    pub fn confirm(self) {
        let mut inner = self.shared.inner.lock();
        inner.drained = inner.drained.max(self.generation);
        inner.worker = None;
        let current = inner.generation == self.generation
            && matches!(
                inner.state,
                StreamState::Opening | StreamState::Streaming | StreamState::Stopping
            );
        if current {
            inner.state = StreamState::Closed;
            // queued before any waiter in stop_preview can return
            self.shared.emit(StreamEvent::PreviewStopped);
        }
        drop(inner);
        self.shared.changed.notify_all();

        tracing::debug!(role = %self.shared.role, generation = self.generation, "Stream drained");
    }
}

impl fmt::Debug for DrainSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrainSignal")
            .field("role", &self.shared.role)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Lifecycle owner for one role's camera.
pub struct CameraStreamController {
    shared: Arc<StreamShared>,
    handle: Mutex<Option<CameraHandle>>,
    surface: Mutex<Option<Box<dyn PreviewSurface>>>,
    dispatcher: Arc<FrameDispatcher>,
}

impl CameraStreamController {
    pub fn new(role: DeviceRole, dispatcher: Arc<FrameDispatcher>) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_CAPACITY);
        Self {
            shared: Arc::new(StreamShared {
                role,
                inner: Mutex::new(StreamInner {
                    state: StreamState::Closed,
                    format: None,
                    worker: None,
                    generation: 0,
                    drained: 0,
                }),
                changed: Condvar::new(),
                events_tx,
                events_rx,
            }),
            handle: Mutex::new(None),
            surface: Mutex::new(None),
            dispatcher,
        }
    }

    #[inline]
    pub fn role(&self) -> DeviceRole {
        self.shared.role
    }

    pub fn state(&self) -> StreamState {
        self.shared.inner.lock().state
    }

    /// Negotiated preview format while a camera is open.
    pub fn format(&self) -> Option<PreviewFormat> {
        self.shared.inner.lock().format
    }

    /// Product of the open camera.
    pub fn product(&self) -> Option<ProductId> {
        let _inner = self.shared.inner.lock();
        self.handle.lock().as_ref().map(CameraHandle::product)
    }

    /// Receiver for this role's events. Clones share one queue.
    pub fn events(&self) -> Receiver<StreamEvent> {
        self.shared.events_rx.clone()
    }

    /// Takes ownership of `handle` and negotiates a preview format.
    ///
    /// Tries the primary format, then the fallback once. If both are
    /// rejected the device is closed, the handle dropped and the stream
    /// stays closed. On misuse errors `handle` is dropped unopened.
    pub fn open(&self, mut handle: CameraHandle, width: u32, height: u32) -> Result<PreviewFormat, StreamError> {
        let role = self.role();
        let mut inner = self.shared.inner.lock();
        let mut slot = self.handle.lock();

        match inner.state {
            StreamState::Released => return Err(StreamError::AlreadyReleased { role }),
            StreamState::Closed if slot.is_none() => {}
            _ => return Err(StreamError::AlreadyOpen { role }),
        }
        inner.state = StreamState::Opening;

        let product = handle.product();
        match negotiate(role, handle.device_mut(), width, height) {
            Ok(format) => {
                inner.format = Some(format);
                *slot = Some(handle);
                drop(slot);
                drop(inner);

                tracing::info!(role = %role, product = %product, format = %format, "Camera opened");
                self.shared.emit(StreamEvent::Opened { product, format });
                Ok(format)
            }
            Err(source) => {
                if let Err(e) = handle.device_mut().close() {
                    tracing::warn!(role = %role, product = %product, error = %e, "Close after failed negotiation");
                }
                drop(handle);
                inner.state = StreamState::Closed;
                drop(slot);
                drop(inner);
                self.shared.changed.notify_all();

                tracing::error!(role = %role, product = %product, error = %source, "Preview format negotiation failed");
                self.shared.emit(StreamEvent::Error {
                    message: source.to_string(),
                });
                Err(StreamError::FormatNegotiation { role, source })
            }
        }
    }

    /// Starts frame delivery into the dispatcher.
    ///
    /// The frame sink is registered with the device before the state
    /// becomes `Streaming`; frames are already accepted while `Opening`.
    pub fn start_preview(&self, surface: Option<Box<dyn PreviewSurface>>) -> Result<(), StreamError> {
        let role = self.role();
        let mut inner = self.shared.inner.lock();
        let mut slot = self.handle.lock();

        match inner.state {
            StreamState::Released => return Err(StreamError::AlreadyReleased { role }),
            StreamState::Opening | StreamState::Closed => {}
            state => {
                return Err(StreamError::InvalidState {
                    role,
                    op: "start preview on",
                    state,
                })
            }
        }
        let Some(handle) = slot.as_mut() else {
            return Err(StreamError::NotOpen { role });
        };

        inner.generation += 1;
        let generation = inner.generation;
        inner.state = StreamState::Opening;

        let drain = DrainSignal {
            shared: Arc::clone(&self.shared),
            generation,
        };
        if let Err(source) = handle.device_mut().start_streaming(self.frame_sink(generation), drain) {
            inner.state = StreamState::Closed;
            drop(slot);
            drop(inner);
            self.shared.changed.notify_all();

            tracing::error!(role = %role, error = %source, "Preview start failed");
            self.shared.emit(StreamEvent::Error {
                message: source.to_string(),
            });
            return Err(StreamError::Device { role, source });
        }
        inner.state = StreamState::Streaming;

        let previous = std::mem::replace(&mut *self.surface.lock(), surface);
        drop(slot);
        drop(inner);
        if let Some(mut previous) = previous {
            previous.release();
        }

        tracing::info!(role = %role, generation, "Preview started");
        self.shared.emit(StreamEvent::PreviewStarted);
        Ok(())
    }

    /// Stops frame delivery and waits for the device thread to drain.
    ///
    /// Called from the stream's own device thread this only requests the
    /// stop; the drain completes after the current frame returns.
    pub fn stop_preview(&self) {
        let role = self.role();
        let mut inner = self.shared.inner.lock();
        let generation = inner.generation;

        match inner.state {
            StreamState::Streaming => {
                inner.state = StreamState::Stopping;
                if let Some(handle) = self.handle.lock().as_mut() {
                    handle.device_mut().stop_streaming();
                }
                tracing::info!(role = %role, generation, "Stopping preview");
            }
            StreamState::Stopping => {}
            _ => return,
        }

        if inner.worker == Some(std::thread::current().id()) {
            tracing::debug!(role = %role, "Stop requested from device thread, not waiting for drain");
            return;
        }
        while inner.drained < generation {
            self.shared.changed.wait(&mut inner);
        }
    }

    /// Stops the preview and releases the camera and its surface.
    ///
    /// Idempotent. A fault from the driver's close is logged and dropped.
    pub fn close(&self) {
        let role = self.role();
        self.stop_preview();

        let handle = {
            let mut inner = self.shared.inner.lock();
            let handle = self.handle.lock().take();
            inner.format = None;
            if inner.state != StreamState::Released {
                inner.state = StreamState::Closed;
            }
            handle
        };
        self.shared.changed.notify_all();

        let closed = handle.is_some();
        if let Some(mut handle) = handle {
            let product = handle.product();
            if let Err(e) = handle.device_mut().close() {
                tracing::warn!(role = %role, product = %product, error = %e, "Camera close fault ignored");
            }
        }
        if let Some(mut surface) = self.surface.lock().take() {
            surface.release();
        }

        if closed {
            tracing::info!(role = %role, "Camera closed");
            self.shared.emit(StreamEvent::Closed);
        }
    }

    /// The device layer reported `product` gone. Reports it on the event
    /// channel, then closes the stream.
    pub fn detach(&self, product: ProductId) {
        let role = self.role();
        match self.product() {
            Some(held) if held == product => {
                tracing::warn!(role = %role, product = %product, "Camera detached");
                self.shared.emit(StreamEvent::Detached { product });
                self.close();
            }
            held => {
                tracing::debug!(role = %role, product = %product, ?held, "Detach for a camera this stream does not hold");
            }
        }
    }

    /// Closes the stream for good. Later opens fail with `AlreadyReleased`.
    pub fn release(&self) {
        if self.state() == StreamState::Released {
            return;
        }
        self.close();
        self.shared.inner.lock().state = StreamState::Released;
        self.shared.changed.notify_all();
        tracing::info!(role = %self.role(), "Stream released");
    }

    /// Pauses the attached surface without releasing anything.
    pub fn pause_surface(&self) {
        if let Some(surface) = self.surface.lock().as_mut() {
            surface.pause();
        }
    }

    pub fn resume_surface(&self) {
        if let Some(surface) = self.surface.lock().as_mut() {
            surface.resume();
        }
    }

    fn frame_sink(&self, generation: u64) -> FrameSink {
        let shared = Arc::clone(&self.shared);
        let dispatcher = Arc::clone(&self.dispatcher);
        Box::new(move |buffer: &[u8]| {
            {
                let mut inner = shared.inner.lock();
                if inner.generation != generation || !inner.state.is_delivering() {
                    return;
                }
                inner.worker = Some(std::thread::current().id());
            }

            let report = dispatcher.on_raw_frame(shared.role, buffer);
            if matches!(report.outcome, DispatchOutcome::Analyzed(_)) {
                shared.emit(StreamEvent::Frame(report));
            }
        })
    }
}

fn negotiate(
    role: DeviceRole,
    device: &mut dyn CameraDevice,
    width: u32,
    height: u32,
) -> Result<PreviewFormat, CameraError> {
    let primary = PreviewFormat::primary(width, height);
    match device.set_preview_format(&primary) {
        Ok(()) => Ok(primary),
        Err(e) => {
            tracing::warn!(role = %role, error = %e, "Primary preview format rejected, trying fallback");
            let fallback = PreviewFormat::fallback(width, height);
            device.set_preview_format(&fallback)?;
            Ok(fallback)
        }
    }
}

impl Drop for CameraStreamController {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisPath, AnalysisResult, FrameAnalyzer, ScriptedAnalyzer};
    use crate::capture::{DecodedFrame, FrameEncoding, MockCamera, MockCameraConfig};
    use crate::config::{LivenessMode, SessionConfig};
    use crate::dispatch::DispatchConfig;
    use crate::liveness::LivenessEngine;
    use std::sync::OnceLock;
    use std::time::Duration;

    const IR: DeviceRole = DeviceRole::LeftInfrared;
    const PRODUCT: ProductId = ProductId(0x2203);

    fn fast_camera(config: MockCameraConfig) -> CameraHandle {
        CameraHandle::new(MockCamera::with_config(
            PRODUCT,
            MockCameraConfig {
                frame_interval: Duration::from_millis(1),
                ..config
            },
        ))
    }

    fn controller_with(analyzer: Arc<dyn FrameAnalyzer>) -> (Arc<LivenessEngine>, CameraStreamController) {
        let engine = Arc::new(LivenessEngine::new());
        let dispatcher = FrameDispatcher::new(Arc::clone(&engine), analyzer).with_config(&DispatchConfig {
            analysis_interval_ms: 0,
        });
        (engine, CameraStreamController::new(IR, Arc::new(dispatcher)))
    }

    fn controller() -> CameraStreamController {
        controller_with(Arc::new(ScriptedAnalyzer::new())).1
    }

    fn drain_events(controller: &CameraStreamController) -> Vec<StreamEvent> {
        controller.events().try_iter().collect()
    }

    #[derive(Clone, Default)]
    struct RecordingSurface(Arc<Mutex<Vec<&'static str>>>);

    impl PreviewSurface for RecordingSurface {
        fn pause(&mut self) {
            self.0.lock().push("pause");
        }

        fn resume(&mut self) {
            self.0.lock().push("resume");
        }

        fn release(&mut self) {
            self.0.lock().push("release");
        }
    }

    #[test]
    fn test_open_twice_rejected() {
        let controller = controller();
        let format = controller
            .open(fast_camera(Default::default()), 640, 480)
            .unwrap();

        assert_eq!(format, PreviewFormat::primary(640, 480));
        assert_eq!(controller.state(), StreamState::Opening);
        assert_eq!(controller.product(), Some(PRODUCT));
        assert!(matches!(
            controller.open(fast_camera(Default::default()), 640, 480),
            Err(StreamError::AlreadyOpen { .. })
        ));
    }

    #[test]
    fn test_open_falls_back_once() {
        let controller = controller();
        let format = controller
            .open(
                fast_camera(MockCameraConfig {
                    unsupported: vec![FrameEncoding::Mjpeg],
                    ..Default::default()
                }),
                320,
                240,
            )
            .unwrap();
        assert_eq!(format.encoding, FrameEncoding::Yuyv);
    }

    #[test]
    fn test_negotiation_failure_leaves_stream_closed() {
        let controller = controller();
        let result = controller.open(
            fast_camera(MockCameraConfig {
                unsupported: vec![FrameEncoding::Mjpeg, FrameEncoding::Yuyv],
                ..Default::default()
            }),
            640,
            480,
        );

        assert!(matches!(result, Err(StreamError::FormatNegotiation { .. })));
        assert_eq!(controller.state(), StreamState::Closed);
        assert_eq!(controller.product(), None);
        assert!(matches!(drain_events(&controller)[..], [StreamEvent::Error { .. }]));

        // a fresh handle may be opened afterwards
        assert!(controller.open(fast_camera(Default::default()), 640, 480).is_ok());
    }

    #[test]
    fn test_start_requires_open_camera() {
        let controller = controller();
        assert!(matches!(
            controller.start_preview(None),
            Err(StreamError::NotOpen { .. })
        ));
    }

    #[test]
    fn test_preview_cycle() {
        let controller = controller();
        let delivered = {
            let camera = MockCamera::with_config(
                PRODUCT,
                MockCameraConfig {
                    frame_interval: Duration::from_millis(1),
                    ..Default::default()
                },
            );
            let counter = camera.delivered_counter();
            controller.open(CameraHandle::new(camera), 4, 2).unwrap();
            counter
        };

        controller.start_preview(None).unwrap();
        assert_eq!(controller.state(), StreamState::Streaming);
        assert!(matches!(
            controller.start_preview(None),
            Err(StreamError::InvalidState { .. })
        ));

        while delivered.load(std::sync::atomic::Ordering::Acquire) < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }
        controller.stop_preview();
        assert_eq!(controller.state(), StreamState::Closed);

        // drained: no frame arrives after stop returns
        let after_stop = delivered.load(std::sync::atomic::Ordering::Acquire);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(delivered.load(std::sync::atomic::Ordering::Acquire), after_stop);

        // the camera stays open and can preview again
        controller.start_preview(None).unwrap();
        controller.stop_preview();

        let events = drain_events(&controller);
        assert!(matches!(events[0], StreamEvent::Opened { .. }));
        assert_eq!(
            events[1..],
            [
                StreamEvent::PreviewStarted,
                StreamEvent::PreviewStopped,
                StreamEvent::PreviewStarted,
                StreamEvent::PreviewStopped,
            ]
        );
    }

    #[test]
    fn test_close_is_idempotent_and_swallows_faults() {
        let controller = controller();
        let surface = RecordingSurface::default();
        controller
            .open(
                fast_camera(MockCameraConfig {
                    fail_close: true,
                    ..Default::default()
                }),
                4,
                2,
            )
            .unwrap();
        controller.start_preview(Some(Box::new(surface.clone()))).unwrap();

        controller.pause_surface();
        controller.resume_surface();
        controller.close();
        controller.close();

        assert_eq!(controller.state(), StreamState::Closed);
        assert_eq!(controller.product(), None);
        assert_eq!(*surface.0.lock(), vec!["pause", "resume", "release"]);
        assert_eq!(
            drain_events(&controller)
                .iter()
                .filter(|e| **e == StreamEvent::Closed)
                .count(),
            1
        );
    }

    #[test]
    fn test_release_is_terminal() {
        let controller = controller();
        controller.open(fast_camera(Default::default()), 4, 2).unwrap();
        controller.release();
        controller.release();

        assert_eq!(controller.state(), StreamState::Released);
        assert!(matches!(
            controller.open(fast_camera(Default::default()), 4, 2),
            Err(StreamError::AlreadyReleased { .. })
        ));
        assert!(matches!(
            controller.start_preview(None),
            Err(StreamError::AlreadyReleased { .. })
        ));
    }

    /// Stops its own stream from inside the analysis call.
    struct StopFromWorker {
        controller: OnceLock<Arc<CameraStreamController>>,
        returned: crossbeam_channel::Sender<()>,
    }

    impl FrameAnalyzer for StopFromWorker {
        fn analyze(&self, path: AnalysisPath, frame: DecodedFrame) -> AnalysisResult {
            drop(frame);
            if let Some(controller) = self.controller.get() {
                controller.stop_preview();
                let _ = self.returned.try_send(());
            }
            AnalysisResult::visible(path, 1)
        }
    }

    #[test]
    fn test_stop_from_device_thread_does_not_deadlock() {
        let (returned_tx, returned_rx) = crossbeam_channel::bounded(4);
        let analyzer = Arc::new(StopFromWorker {
            controller: OnceLock::new(),
            returned: returned_tx,
        });
        let (engine, controller) = controller_with(analyzer.clone());
        let controller = Arc::new(controller);
        let _ = analyzer.controller.set(Arc::clone(&controller));

        engine.start(Arc::new(SessionConfig {
            preview_width: 4,
            preview_height: 2,
            mode: LivenessMode::VisibleSimple,
            ..Default::default()
        }));
        controller.open(fast_camera(Default::default()), 4, 2).unwrap();
        controller.start_preview(None).unwrap();

        returned_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // the outer stop waits for the drain the worker already requested
        controller.stop_preview();
        assert_eq!(controller.state(), StreamState::Closed);
        controller.release();
    }
}
