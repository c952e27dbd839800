//! Session creation, begin/end, and the reference space.

use openxr::sys;
use tracing::info;

use crate::binding::{GraphicsBinding, HostPlatform, NativeContext};
use crate::error::{XrError, XrResult};
use crate::runtime::{InstanceHandle, SessionHandle, SpaceHandle, SystemId, XrRuntime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycle {
    Created,
    Began,
    Ended,
}

#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    binding: GraphicsBinding,
    view_type: sys::ViewConfigurationType,
    lifecycle: SessionLifecycle,
}

impl Session {
    /// Select the platform binding and create the session. An unsupported
    /// platform fails before the runtime is touched.
    pub fn create<R: XrRuntime>(
        runtime: &mut R,
        instance: InstanceHandle,
        system: SystemId,
        platform: HostPlatform,
        ctx: &NativeContext,
    ) -> XrResult<Self> {
        let binding = GraphicsBinding::select(platform, ctx)?;
        let handle = runtime
            .create_session(instance, system, &binding)
            .map_err(XrError::SessionCreation)?;
        info!(binding = binding.kind(), "created OpenXR session");
        Ok(Self {
            handle,
            binding,
            view_type: sys::ViewConfigurationType::PRIMARY_STEREO,
            lifecycle: SessionLifecycle::Created,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn binding(&self) -> &GraphicsBinding {
        &self.binding
    }

    pub fn view_type(&self) -> sys::ViewConfigurationType {
        self.view_type
    }

    pub fn lifecycle(&self) -> SessionLifecycle {
        self.lifecycle
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle == SessionLifecycle::Began
    }

    pub fn ensure_running(&self) -> XrResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(XrError::SessionNotBegun)
        }
    }

    /// Created or Ended → Began, with primary stereo as the active view
    /// configuration.
    pub fn begin<R: XrRuntime>(&mut self, runtime: &mut R) -> XrResult<()> {
        if self.is_running() {
            return Err(XrError::SessionAlreadyRunning);
        }
        runtime
            .begin_session(self.handle, self.view_type)
            .map_err(|code| XrError::runtime("xrBeginSession", code))?;
        self.lifecycle = SessionLifecycle::Began;
        info!("session began");
        Ok(())
    }

    pub fn end<R: XrRuntime>(&mut self, runtime: &mut R) -> XrResult<()> {
        self.ensure_running()?;
        runtime
            .end_session(self.handle)
            .map_err(|code| XrError::runtime("xrEndSession", code))?;
        self.lifecycle = SessionLifecycle::Ended;
        info!("session ended");
        Ok(())
    }

    /// LOCAL space at the identity pose.
    pub fn create_reference_space<R: XrRuntime>(&self, runtime: &mut R) -> XrResult<SpaceHandle> {
        let pose = sys::Posef {
            orientation: sys::Quaternionf {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                w: 1.0,
            },
            position: sys::Vector3f {
                x: 0.0,
                y: 0.0,
                z: 0.0,
            },
        };
        runtime
            .create_reference_space(self.handle, sys::ReferenceSpaceType::LOCAL, pose)
            .map_err(|code| XrError::runtime("xrCreateReferenceSpace", code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConfig, MockRuntime};

    fn created_session() -> (MockRuntime, Session) {
        let mut runtime = MockRuntime::new(MockConfig::stereo(800, 600));
        let (instance, system) = runtime.bootstrap().unwrap();
        runtime.query_gl_requirements(instance, system).unwrap();
        let session = Session::create(
            &mut runtime,
            instance,
            system,
            HostPlatform::LinuxX11,
            &NativeContext::xlib(1, 2, 3),
        )
        .unwrap();
        (runtime, session)
    }

    #[test]
    fn test_begin_then_end() {
        let (mut runtime, mut session) = created_session();
        assert_eq!(session.lifecycle(), SessionLifecycle::Created);
        assert!(matches!(session.ensure_running(), Err(XrError::SessionNotBegun)));

        session.begin(&mut runtime).unwrap();
        assert!(session.is_running());
        assert!(runtime.session_running());

        session.end(&mut runtime).unwrap();
        assert_eq!(session.lifecycle(), SessionLifecycle::Ended);
        assert!(!runtime.session_running());
    }

    #[test]
    fn test_double_begin_is_rejected() {
        let (mut runtime, mut session) = created_session();
        session.begin(&mut runtime).unwrap();
        let calls = runtime.calls().len();

        let err = session.begin(&mut runtime).unwrap_err();
        assert!(matches!(err, XrError::SessionAlreadyRunning));
        assert_eq!(runtime.calls().len(), calls);
    }

    #[test]
    fn test_unsupported_platform_makes_no_runtime_call() {
        let mut runtime = MockRuntime::new(MockConfig::stereo(800, 600));
        let (instance, system) = runtime.bootstrap().unwrap();
        let calls = runtime.calls().len();

        let err = Session::create(
            &mut runtime,
            instance,
            system,
            HostPlatform::Unsupported("macos"),
            &NativeContext::default(),
        )
        .unwrap_err();
        assert!(matches!(err, XrError::UnsupportedPlatform(_)));
        assert_eq!(runtime.calls().len(), calls);
    }

    #[test]
    fn test_reference_space_is_local_identity() {
        let (mut runtime, session) = created_session();
        session.create_reference_space(&mut runtime).unwrap();

        let (space_type, pose) = runtime.last_reference_space().unwrap();
        assert_eq!(space_type, sys::ReferenceSpaceType::LOCAL);
        assert_eq!(pose.orientation.w, 1.0);
        assert_eq!(pose.position.x, 0.0);
        assert_eq!(pose.position.z, 0.0);
    }
}
