//! Owned session context tying binder, streams, dispatcher and engine
//! together behind the host control surface.

use crate::analysis::FrameAnalyzer;
use crate::capture::{
    CameraHandle, CameraStreamController, NoSurfaces, PreviewFormat, StreamError, StreamEvent,
    StreamState, SurfaceProvider,
};
use crate::config::{
    parse_payload, ConfigSlot, ConfigValidationError, FileConfig, SessionConfig, ValidatedPayload,
};
use crate::device::{
    BindError, DeviceLayer, DeviceRole, DeviceRoleBinder, ProductId, Reassignment, RoleStore,
};
use crate::dispatch::{DispatchConfig, FrameDispatcher};
use crate::liveness::{LivenessEngine, Verdict};
use crate::metrics::{MetricsSnapshot, RoleSnapshot};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to the host.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session config: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("role binding failed: {0}")]
    Bind(#[from] BindError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Notification from the platform device layer.
#[derive(Debug)]
pub enum DeviceEvent {
    /// A device appeared on the bus.
    Attached(ProductId),
    /// Permission was granted and the device opened.
    Connected(CameraHandle),
    /// A device left the bus.
    Detached(ProductId),
}

/// What the orchestrator did with a device event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceOutcome {
    /// Access was requested from the device layer.
    PermissionRequested(ProductId),
    /// Not a supported liveness camera, or not bound to any role.
    Ignored(ProductId),
    /// The device is bound to `role` and previewing.
    Streaming {
        role: DeviceRole,
        format: PreviewFormat,
    },
    /// The role lost its camera. The session continues on the other role.
    Detached(DeviceRole),
}

/// Dual-stream liveness orchestrator.
///
/// Owns every component explicitly; nothing is process-global. Device
/// events and host calls may arrive from different threads.
pub struct LivenessOrchestrator {
    binder: Mutex<DeviceRoleBinder>,
    controllers: [Arc<CameraStreamController>; 2],
    dispatcher: Arc<FrameDispatcher>,
    engine: Arc<LivenessEngine>,
    config: ConfigSlot,
    layer: Arc<dyn DeviceLayer>,
    surfaces: Box<dyn SurfaceProvider>,
}

impl LivenessOrchestrator {
    pub fn new(
        store: Box<dyn RoleStore>,
        layer: Arc<dyn DeviceLayer>,
        analyzer: Arc<dyn FrameAnalyzer>,
        dispatch: &DispatchConfig,
    ) -> Self {
        let engine = Arc::new(LivenessEngine::new());
        let dispatcher =
            Arc::new(FrameDispatcher::new(Arc::clone(&engine), analyzer).with_config(dispatch));
        let controllers = DeviceRole::ALL
            .map(|role| Arc::new(CameraStreamController::new(role, Arc::clone(&dispatcher))));

        Self {
            binder: Mutex::new(DeviceRoleBinder::new(store, Arc::clone(&layer))),
            controllers,
            dispatcher,
            engine,
            config: ConfigSlot::default(),
            layer,
            surfaces: Box::new(NoSurfaces),
        }
    }

    /// Builds an orchestrator from file configuration. Device ids named in
    /// the file are persisted through the binder.
    pub fn from_file_config(
        file: &FileConfig,
        store: Box<dyn RoleStore>,
        layer: Arc<dyn DeviceLayer>,
        analyzer: Arc<dyn FrameAnalyzer>,
    ) -> Result<Self, SessionError> {
        let orchestrator = Self::new(store, layer, analyzer, &file.dispatch);
        orchestrator.config.publish(file.session.clone())?;
        for role in DeviceRole::ALL {
            if let Some(product) = file.devices.get(role) {
                orchestrator.assign_role(role, product)?;
            }
        }
        Ok(orchestrator)
    }

    pub fn with_surfaces(mut self, surfaces: impl SurfaceProvider + 'static) -> Self {
        self.surfaces = Box::new(surfaces);
        self
    }

    /// Applies a host payload.
    ///
    /// All or nothing: the payload is fully validated and every named
    /// device checked for a conflicting live binding before anything is
    /// persisted or published.
    pub fn configure(&self, payload: &str) -> Result<ValidatedPayload, SessionError> {
        let mut binder = self.binder.lock();

        let validated = match parse_payload(payload, &self.config.current()) {
            Ok(validated) => validated,
            Err(e) => {
                tracing::warn!(error = %e, field = e.field(), "Config payload rejected");
                return Err(e.into());
            }
        };

        for role in DeviceRole::ALL {
            if let (Some(product), Some(holder)) =
                (validated.devices.get(role), binder.bound_device(role))
            {
                if product != holder {
                    tracing::warn!(role = %role, product = %product, holder = %holder, "Config payload rejected");
                    return Err(BindError::RoleOccupied { role, holder }.into());
                }
            }
        }

        let assignments: Vec<_> = DeviceRole::ALL
            .into_iter()
            .filter_map(|role| validated.devices.get(role).map(|product| (role, product)))
            .collect();
        for reassignment in binder.assign_roles(&assignments)? {
            self.close_unbound(&reassignment);
        }
        drop(binder);

        self.config.publish(validated.session.clone())?;
        Ok(validated)
    }

    /// Config in force for the next session.
    pub fn active_config(&self) -> Arc<SessionConfig> {
        self.config.current()
    }

    /// Starts a session with the config in force, replacing any previous one.
    pub fn start_session(&self) -> Arc<SessionConfig> {
        let config = self.config.current();
        self.engine.start(Arc::clone(&config));
        config
    }

    /// Publishes `config` and starts a session with it.
    pub fn start_session_with(&self, config: SessionConfig) -> Result<Arc<SessionConfig>, SessionError> {
        let config = self.config.publish(config)?;
        self.engine.start(Arc::clone(&config));
        Ok(config)
    }

    pub fn cancel_session(&self) -> Option<Verdict> {
        self.engine.cancel()
    }

    /// Settles a pending session as not live.
    pub fn reject_session(&self) -> Option<Verdict> {
        self.engine.reject()
    }

    /// Verdict of the current session; `None` before the first start.
    pub fn verdict(&self) -> Option<Verdict> {
        self.engine.verdict()
    }

    /// Blocks until the session settles or `limit` elapses.
    pub fn wait_for_verdict(&self, limit: Duration) -> Option<Verdict> {
        self.engine.wait_for_verdict(limit)
    }

    /// Routes one device-layer notification.
    pub fn handle_device_event(&self, event: DeviceEvent) -> Result<DeviceOutcome, SessionError> {
        match event {
            DeviceEvent::Attached(product) => {
                if !product.is_supported() {
                    tracing::debug!(product = %product, "Ignoring unsupported device");
                    return Ok(DeviceOutcome::Ignored(product));
                }
                self.binder.lock().on_attach(product);
                Ok(DeviceOutcome::PermissionRequested(product))
            }
            DeviceEvent::Connected(handle) => self.connect(handle),
            DeviceEvent::Detached(product) => {
                let Some(role) = self.binder.lock().on_detach(product) else {
                    return Ok(DeviceOutcome::Ignored(product));
                };
                self.controller(role).detach(product);
                tracing::warn!(
                    role = %role,
                    product = %product,
                    remaining = %role.other(),
                    "Device detached, session continues on remaining role"
                );
                Ok(DeviceOutcome::Detached(role))
            }
        }
    }

    /// Persists `product` as the camera for `role`.
    pub fn assign_role(&self, role: DeviceRole, product: ProductId) -> Result<Reassignment, SessionError> {
        let reassignment = self.binder.lock().assign_role(role, product)?;
        self.close_unbound(&reassignment);
        Ok(reassignment)
    }

    /// Forgets `role`'s assignment and closes its stream.
    pub fn clear_role(&self, role: DeviceRole) -> Result<Option<ProductId>, SessionError> {
        let previous = self.binder.lock().clear_role(role)?;
        if previous.is_some() {
            self.controller(role).close();
        }
        Ok(previous)
    }

    /// Device currently streaming for `role`.
    pub fn bound_device(&self, role: DeviceRole) -> Option<ProductId> {
        self.binder.lock().bound_device(role)
    }

    /// Re-registers the device watch and resumes preview surfaces.
    pub fn on_foreground(&self) {
        self.layer.register_watch();
        for controller in &self.controllers {
            controller.resume_surface();
        }
        tracing::info!("Host foregrounded");
    }

    /// Pauses preview surfaces and stops watching for devices. Camera
    /// handles stay open.
    pub fn on_background(&self) {
        for controller in &self.controllers {
            controller.pause_surface();
        }
        self.layer.unregister_watch();
        tracing::info!("Host backgrounded");
    }

    /// Cancels the session and releases every camera and the device watch.
    pub fn on_teardown(&self) {
        self.engine.cancel();
        for controller in &self.controllers {
            controller.release();
        }
        self.layer.unregister_watch();
        tracing::info!("Orchestrator torn down");
    }

    pub fn stream_state(&self, role: DeviceRole) -> StreamState {
        self.controller(role).state()
    }

    /// Ordered event channel for `role`.
    pub fn events(&self, role: DeviceRole) -> Receiver<StreamEvent> {
        self.controller(role).events()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            verdict: self.engine.verdict(),
            pass_evidence: self.engine.pass_evidence().unwrap_or(0),
            sessions_started: self.engine.sessions_started(),
            roles: DeviceRole::ALL
                .into_iter()
                .map(|role| RoleSnapshot {
                    role,
                    state: self.stream_state(role),
                    frames: self.dispatcher.stats(role),
                })
                .collect(),
        }
    }

    fn controller(&self, role: DeviceRole) -> &CameraStreamController {
        &self.controllers[role.index()]
    }

    fn connect(&self, handle: CameraHandle) -> Result<DeviceOutcome, SessionError> {
        let product = handle.product();
        if !product.is_supported() {
            tracing::debug!(product = %product, "Ignoring unsupported device");
            handle.discard();
            return Ok(DeviceOutcome::Ignored(product));
        }

        let role = match self.binder.lock().on_connect(product) {
            Ok(role) => role,
            Err(e) => {
                handle.discard();
                return Err(e.into());
            }
        };

        let config = self.config.current();
        let controller = self.controller(role);
        let started = controller
            .open(handle, config.preview_width, config.preview_height)
            .and_then(|format| {
                controller.start_preview(self.surfaces.surface_for(role))?;
                Ok(format)
            });

        match started {
            Ok(format) => Ok(DeviceOutcome::Streaming { role, format }),
            Err(e) => {
                if matches!(e, StreamError::Device { .. }) {
                    controller.close();
                }
                self.unbind_if_not_open(role, product);
                Err(e.into())
            }
        }
    }

    /// Drops the live binding of `product` unless `role`'s controller still
    /// holds its handle.
    fn unbind_if_not_open(&self, role: DeviceRole, product: ProductId) {
        if self.controller(role).product() == Some(product) {
            return;
        }
        if self.binder.lock().on_detach(product).is_some() {
            tracing::warn!(role = %role, product = %product, "Camera failed to start, binding dropped");
        }
    }

    fn close_unbound(&self, reassignment: &Reassignment) {
        if let Some(role) = reassignment.unbound {
            tracing::info!(role = %role, "Closing stream of reassigned device");
            self.controller(role).close();
        }
    }
}
