//! The owned VR session: startup, event pump, per-tick frames, teardown.

use std::collections::BTreeSet;

use openxr::sys;
use tracing::{debug, error, info, warn};

use crate::binding::{HostPlatform, NativeContext};
use crate::capability::{negotiate, CapabilityTable, GraphicsVersionRange, NegotiatedExtensions};
use crate::config::XrConfig;
use crate::error::{XrError, XrResult};
use crate::frame::{EyeRenderer, FrameContext, FrameDriver, FrameOutcome, FrameStats};
use crate::instance::{
    create_instance, query_min_max_graphics_version, query_system_properties, resolve_system,
};
use crate::runtime::{InstanceHandle, RuntimeEvent, SpaceHandle, SystemId, SystemProperties, XrRuntime};
use crate::session::Session;
use crate::status::set_vr_status;
use crate::swapchain::{allocate_swapchains, negotiate_format, SwapchainSet};
use crate::views::{resolve_stereo_views, ViewConfiguration};

/// What one host tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Session not running yet, or stopped by the runtime.
    Idle,
    Submitted,
    Skipped,
    /// The frame failed and was abandoned.
    Dropped,
    /// The runtime wants the application to exit.
    Exit,
}

/// Everything created between the instance and the first begin.
struct Established<R> {
    system: SystemId,
    system_properties: SystemProperties,
    capabilities: CapabilityTable<R>,
    graphics_versions: GraphicsVersionRange,
    views: ViewConfiguration,
    session: Session,
    space: SpaceHandle,
}

fn establish<R: XrRuntime>(
    runtime: &mut R,
    instance: InstanceHandle,
    extensions: &NegotiatedExtensions,
    platform: HostPlatform,
    ctx: &NativeContext,
) -> XrResult<Established<R>> {
    let system = resolve_system(runtime, instance)?;
    let system_properties = query_system_properties(runtime, instance, system);
    let capabilities = CapabilityTable::populate(runtime, instance, &extensions.enabled);
    let graphics_versions = query_min_max_graphics_version(runtime, &capabilities, instance, system)?;
    let views = resolve_stereo_views(runtime, instance, system)?;

    let session = Session::create(runtime, instance, system, platform, ctx)?;
    let space = match session.create_reference_space(runtime) {
        Ok(space) => space,
        Err(e) => {
            if let Err(code) = runtime.destroy_session(session.handle()) {
                warn!(?code, "xrDestroySession failed during startup cleanup");
            }
            return Err(e);
        }
    };

    Ok(Established {
        system,
        system_properties,
        capabilities,
        graphics_versions,
        views,
        session,
        space,
    })
}

/// A VR session bridged to the host's OpenGL context.
///
/// Owns every runtime handle and releases them in dependency order:
/// swapchains, reference space, session (ended first if running), instance.
pub struct VrSession<R: XrRuntime> {
    runtime: R,
    config: XrConfig,
    instance: Option<InstanceHandle>,
    system: SystemId,
    extensions: NegotiatedExtensions,
    capabilities: CapabilityTable<R>,
    system_properties: SystemProperties,
    graphics_versions: GraphicsVersionRange,
    views: ViewConfiguration,
    session: Option<Session>,
    space: Option<SpaceHandle>,
    swapchains: Option<SwapchainSet>,
    driver: FrameDriver,
    exit_requested: bool,
}

impl<R: XrRuntime> VrSession<R> {
    /// Run startup for the platform this binary was built for.
    pub fn initialize(runtime: R, config: XrConfig, ctx: &NativeContext) -> XrResult<Self> {
        Self::initialize_for(runtime, config, HostPlatform::current(), ctx)
    }

    /// Negotiate extensions, create the instance, resolve the HMD and its
    /// stereo views, and create the session and reference space. Anything
    /// created before a failure is destroyed again.
    pub fn initialize_for(
        mut runtime: R,
        config: XrConfig,
        platform: HostPlatform,
        ctx: &NativeContext,
    ) -> XrResult<Self> {
        // Fails before the runtime is touched.
        crate::binding::GraphicsBinding::select(platform, ctx)?;

        let extensions = negotiate(&runtime)?;
        let instance = create_instance(&mut runtime, &config, &extensions)?;

        let established = match establish(&mut runtime, instance, &extensions, platform, ctx) {
            Ok(established) => established,
            Err(e) => {
                if let Err(code) = runtime.destroy_instance(instance) {
                    warn!(?code, "xrDestroyInstance failed during startup cleanup");
                }
                set_vr_status(format!("VR: startup failed: {e}"));
                return Err(e);
            }
        };

        info!(
            system = %established.system_properties.system_name,
            gl_min = %established.graphics_versions.min,
            gl_max = %established.graphics_versions.max,
            "VR session created, waiting for runtime"
        );
        set_vr_status("VR: session created, waiting for runtime");

        Ok(Self {
            runtime,
            config,
            instance: Some(instance),
            system: established.system,
            extensions,
            capabilities: established.capabilities,
            system_properties: established.system_properties,
            graphics_versions: established.graphics_versions,
            views: established.views,
            session: Some(established.session),
            space: Some(established.space),
            swapchains: None,
            driver: FrameDriver::new(),
            exit_requested: false,
        })
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn config(&self) -> &XrConfig {
        &self.config
    }

    pub fn instance(&self) -> Option<InstanceHandle> {
        self.instance
    }

    pub fn system(&self) -> SystemId {
        self.system
    }

    pub fn extensions(&self) -> &BTreeSet<String> {
        &self.extensions.available
    }

    pub fn capabilities(&self) -> &CapabilityTable<R> {
        &self.capabilities
    }

    pub fn system_properties(&self) -> &SystemProperties {
        &self.system_properties
    }

    pub fn graphics_versions(&self) -> GraphicsVersionRange {
        self.graphics_versions
    }

    pub fn views(&self) -> &ViewConfiguration {
        &self.views
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn space(&self) -> Option<SpaceHandle> {
        self.space
    }

    pub fn swapchains(&self) -> Option<&SwapchainSet> {
        self.swapchains.as_ref()
    }

    pub fn driver(&self) -> &FrameDriver {
        &self.driver
    }

    pub fn stats(&self) -> FrameStats {
        self.driver.stats()
    }

    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_running)
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Begin the session and, the first time, allocate the eye swapchains.
    pub fn begin(&mut self) -> XrResult<()> {
        let session = self.session.as_mut().ok_or(XrError::SessionNotBegun)?;
        session.begin(&mut self.runtime)?;

        if self.swapchains.is_none() {
            let handle = session.handle();
            let allocated = negotiate_format(&self.runtime, handle).and_then(|format| {
                allocate_swapchains(&mut self.runtime, handle, &self.views, format)
            });
            match allocated {
                Ok(swapchains) => self.swapchains = Some(swapchains),
                Err(e) => {
                    if let Err(end_err) = session.end(&mut self.runtime) {
                        warn!("ending session after swapchain failure: {end_err}");
                    }
                    set_vr_status(format!("VR: swapchain allocation failed: {e}"));
                    return Err(e);
                }
            }
        }
        set_vr_status("VR: session running");
        Ok(())
    }

    /// End the running session. A frame left in flight is abandoned first.
    pub fn end(&mut self) -> XrResult<()> {
        if self.driver.in_flight() {
            self.driver.abort_frame(&mut self.runtime, self.swapchains.as_mut());
        }
        let session = self.session.as_mut().ok_or(XrError::SessionNotBegun)?;
        session.end(&mut self.runtime)?;
        set_vr_status("VR: session stopped");
        Ok(())
    }

    /// Drain pending runtime events and follow the session state they report.
    pub fn poll_events(&mut self) -> XrResult<()> {
        let Some(instance) = self.instance else {
            return Ok(());
        };
        while let Some(event) = self
            .runtime
            .poll_event(instance)
            .map_err(|code| XrError::runtime("xrPollEvent", code))?
        {
            match event {
                RuntimeEvent::SessionStateChanged { state, .. } => self.on_state_changed(state)?,
                RuntimeEvent::InstanceLossPending => {
                    warn!("runtime instance loss pending");
                    self.exit_requested = true;
                }
                RuntimeEvent::EventsLost(count) => warn!(count, "runtime dropped events"),
                RuntimeEvent::Other => {}
            }
        }
        Ok(())
    }

    fn on_state_changed(&mut self, state: sys::SessionState) -> XrResult<()> {
        info!(?state, "session state changed");
        match state {
            sys::SessionState::READY if !self.is_running() => self.begin()?,
            sys::SessionState::STOPPING if self.is_running() => self.end()?,
            sys::SessionState::EXITING | sys::SessionState::LOSS_PENDING => {
                self.exit_requested = true;
                set_vr_status("VR: runtime requested exit");
            }
            _ => {}
        }
        Ok(())
    }

    /// Run one frame, rendering each eye through `renderer`.
    pub fn run_frame<E: EyeRenderer + ?Sized>(&mut self, renderer: &mut E) -> XrResult<FrameOutcome> {
        let session = self.session.as_ref().ok_or(XrError::SessionNotBegun)?;
        session.ensure_running()?;
        let (Some(space), Some(swapchains)) = (self.space, self.swapchains.as_mut()) else {
            return Err(XrError::SessionNotBegun);
        };
        let ctx = FrameContext {
            session,
            space,
            views: &self.views,
            image_wait_timeout: self.config.image_wait_timeout(),
        };
        let outcome = self
            .driver
            .run_frame(&mut self.runtime, &ctx, swapchains, renderer)?;

        let stats = self.driver.stats();
        let interval = self.config.frame_log_interval;
        if interval > 0 && stats.submitted > 0 && stats.submitted % interval == 0 {
            if let FrameOutcome::Submitted { .. } = outcome {
                info!(
                    submitted = stats.submitted,
                    skipped = stats.skipped,
                    dropped = stats.dropped,
                    "frame stats"
                );
            }
        }
        Ok(outcome)
    }

    /// One host tick: pump events, then run a frame if the session is running.
    /// Frame failures are logged and counted; startup-class failures from the
    /// event pump are returned.
    pub fn tick<E: EyeRenderer + ?Sized>(&mut self, renderer: &mut E) -> XrResult<TickOutcome> {
        self.poll_events()?;
        if self.exit_requested {
            return Ok(TickOutcome::Exit);
        }
        if !self.is_running() {
            return Ok(TickOutcome::Idle);
        }

        match self.run_frame(renderer) {
            Ok(FrameOutcome::Submitted { .. }) => Ok(TickOutcome::Submitted),
            Ok(FrameOutcome::Skipped { .. }) => {
                debug!("runtime skipped rendering");
                Ok(TickOutcome::Skipped)
            }
            Err(XrError::Frame(e)) => {
                error!(step = %e.step, "frame dropped: {e}");
                set_vr_status(format!("VR: frame failed ({e})"));
                Ok(TickOutcome::Dropped)
            }
            Err(e) => Err(e),
        }
    }

    /// Release every runtime handle. Safe to call more than once; the first
    /// teardown error is returned after the remaining handles are released.
    pub fn shutdown(&mut self) -> XrResult<()> {
        let mut first_err: Option<XrError> = None;

        if self.driver.in_flight() {
            self.driver.abort_frame(&mut self.runtime, self.swapchains.as_mut());
        }
        if let Some(swapchains) = self.swapchains.take() {
            if let Err(e) = swapchains.destroy(&mut self.runtime) {
                first_err.get_or_insert(e);
            }
        }
        if let Some(space) = self.space.take() {
            if let Err(code) = self.runtime.destroy_space(space) {
                warn!(?code, "xrDestroySpace failed");
                first_err.get_or_insert(XrError::runtime("xrDestroySpace", code));
            }
        }
        if let Some(mut session) = self.session.take() {
            if session.is_running() {
                if let Err(e) = session.end(&mut self.runtime) {
                    warn!("ending session during shutdown failed: {e}");
                    first_err.get_or_insert(e);
                }
            }
            if let Err(code) = self.runtime.destroy_session(session.handle()) {
                warn!(?code, "xrDestroySession failed");
                first_err.get_or_insert(XrError::runtime("xrDestroySession", code));
            }
        }
        if let Some(instance) = self.instance.take() {
            if let Err(code) = self.runtime.destroy_instance(instance) {
                warn!(?code, "xrDestroyInstance failed");
                first_err.get_or_insert(XrError::runtime("xrDestroyInstance", code));
            }
            info!(stats = ?self.driver.stats(), "VR session shut down");
            set_vr_status("VR: idle");
        }

        first_err.map_or(Ok(()), Err)
    }
}

impl<R: XrRuntime> Drop for VrSession<R> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("VR session teardown incomplete: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{EyeTarget, RenderError};
    use crate::mock::{MockCall, MockConfig, MockRuntime};

    fn start(config: MockConfig) -> VrSession<MockRuntime> {
        VrSession::initialize_for(
            MockRuntime::new(config),
            XrConfig::default(),
            HostPlatform::LinuxX11,
            &NativeContext::xlib(1, 2, 3),
        )
        .unwrap()
    }

    fn ok_renderer() -> impl FnMut(&EyeTarget) -> Result<(), RenderError> {
        |_: &EyeTarget| Ok(())
    }

    #[test]
    fn test_ready_event_begins_and_allocates() {
        let mut vr = start(MockConfig::stereo(800, 600));
        assert!(!vr.is_running());
        assert!(vr.swapchains().is_none());

        let outcome = vr.tick(&mut ok_renderer()).unwrap();
        assert_eq!(outcome, TickOutcome::Submitted);
        assert!(vr.is_running());
        assert_eq!(vr.swapchains().unwrap().eye(crate::Eye::Left).extent(), (800, 600));
    }

    #[test]
    fn test_startup_failure_surfaces_view_error() {
        let mut config = MockConfig::stereo(800, 600);
        config.view_configuration_types = vec![sys::ViewConfigurationType::PRIMARY_MONO];
        let runtime = MockRuntime::new(config);

        let result = VrSession::initialize_for(
            runtime,
            XrConfig::default(),
            HostPlatform::Windows,
            &NativeContext::win32(1, 2),
        );
        assert!(matches!(result, Err(XrError::UnsupportedViewConfiguration { .. })));
    }

    #[test]
    fn test_stopping_ends_and_ready_restarts() {
        let mut vr = start(MockConfig::stereo(800, 600));
        vr.tick(&mut ok_renderer()).unwrap();

        vr.runtime_mut().push_session_state(sys::SessionState::STOPPING);
        assert_eq!(vr.tick(&mut ok_renderer()).unwrap(), TickOutcome::Idle);
        assert!(!vr.is_running());

        vr.runtime_mut().push_session_state(sys::SessionState::READY);
        assert_eq!(vr.tick(&mut ok_renderer()).unwrap(), TickOutcome::Submitted);
        assert_eq!(vr.runtime().count_calls(MockCall::CreateSwapchain), 2);
        assert_eq!(vr.stats().submitted, 2);
    }

    #[test]
    fn test_exit_events() {
        let mut vr = start(MockConfig::stereo(800, 600));
        vr.tick(&mut ok_renderer()).unwrap();
        vr.runtime_mut().push_session_state(sys::SessionState::EXITING);
        assert_eq!(vr.tick(&mut ok_renderer()).unwrap(), TickOutcome::Exit);
        assert!(vr.exit_requested());

        let mut vr = start(MockConfig::stereo(800, 600));
        vr.runtime_mut().push_event(RuntimeEvent::InstanceLossPending);
        assert_eq!(vr.tick(&mut ok_renderer()).unwrap(), TickOutcome::Exit);
    }

    #[test]
    fn test_frame_error_is_not_fatal() {
        let mut vr = start(MockConfig::stereo(800, 600));
        vr.tick(&mut ok_renderer()).unwrap();
        vr.runtime_mut()
            .fail_next(MockCall::EndFrame, sys::Result::ERROR_TIME_INVALID);

        assert_eq!(vr.tick(&mut ok_renderer()).unwrap(), TickOutcome::Dropped);
        assert_eq!(vr.tick(&mut ok_renderer()).unwrap(), TickOutcome::Submitted);
        assert_eq!(vr.stats().dropped, 1);
        assert_eq!(vr.stats().submitted, 2);
    }

    #[test]
    fn test_run_frame_before_begin() {
        let mut vr = start(MockConfig::stereo(800, 600));
        let err = vr.run_frame(&mut ok_renderer()).unwrap_err();
        assert!(matches!(err, XrError::SessionNotBegun));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut vr = start(MockConfig::stereo(800, 600));
        vr.tick(&mut ok_renderer()).unwrap();
        vr.shutdown().unwrap();
        vr.shutdown().unwrap();
        assert!(!vr.runtime().instance_alive());
        assert_eq!(vr.runtime().count_calls(MockCall::DestroyInstance), 1);
    }
}
