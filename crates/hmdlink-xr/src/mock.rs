//! In-process runtime for tests and dry runs.
//!
//! `MockRuntime` answers every call with the result codes a conforming OpenXR
//! runtime would return, records each call in order, and checks the parts of
//! the protocol the session code is responsible for: call ordering, structure
//! tags, handle validity and acquire/release pairing. Faults can be scripted
//! per call.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use openxr::sys;

use crate::binding::GraphicsBinding;
use crate::capability::OPENGL_ENABLE_EXTENSION;
use crate::runtime::{
    fill_two_call, ExtensionFn, FrameTiming, GraphicsRequirements, InstanceCreateRequest,
    InstanceHandle, ProjectionLayer, RuntimeEvent, RuntimeResult, SessionHandle, SpaceHandle,
    SwapchainHandle, SwapchainRequest, SystemId, SystemProperties, View, ViewDescriptor, XrRuntime,
};

/// Half the default interpupillary distance, in meters.
const EYE_OFFSET: f32 = 0.032;
const FIRST_TEXTURE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    EnumerateInstanceExtensions,
    CreateInstance,
    DestroyInstance,
    GetSystem,
    SystemProperties,
    EnumerateViewConfigurations,
    EnumerateViewConfigurationViews,
    GetGraphicsRequirements,
    CreateSession,
    BeginSession,
    EndSession,
    DestroySession,
    PollEvent,
    CreateReferenceSpace,
    DestroySpace,
    EnumerateSwapchainFormats,
    CreateSwapchain,
    DestroySwapchain,
    EnumerateSwapchainImages,
    AcquireSwapchainImage,
    WaitSwapchainImage,
    ReleaseSwapchainImage,
    WaitFrame,
    BeginFrame,
    LocateViews,
    EndFrame,
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub extensions: Vec<String>,
    pub hmd_attached: bool,
    pub view_configuration_types: Vec<sys::ViewConfigurationType>,
    /// Views reported for the primary stereo configuration.
    pub stereo_views: Vec<ViewDescriptor>,
    pub swapchain_formats: Vec<u32>,
    pub images_per_swapchain: u32,
    pub system_properties: SystemProperties,
    pub gl_requirements: GraphicsRequirements,
    pub should_render: bool,
    pub frame_period_ns: i64,
}

impl MockConfig {
    /// A stereo HMD with `width`×`height` per eye and a single RGBA8 format.
    pub fn stereo(width: u32, height: u32) -> Self {
        let view = ViewDescriptor {
            recommended_width: width,
            recommended_height: height,
            max_width: width.max(4096),
            max_height: height.max(4096),
            recommended_sample_count: 1,
            max_sample_count: 4,
        };
        Self {
            extensions: vec![
                OPENGL_ENABLE_EXTENSION.to_string(),
                "XR_EXT_debug_utils".to_string(),
            ],
            hmd_attached: true,
            view_configuration_types: vec![
                sys::ViewConfigurationType::PRIMARY_STEREO,
                sys::ViewConfigurationType::PRIMARY_MONO,
            ],
            stereo_views: vec![view, view],
            swapchain_formats: vec![glow::RGBA8],
            images_per_swapchain: 3,
            system_properties: SystemProperties {
                system_name: "hmdlink mock HMD".to_string(),
                vendor_id: 0x1209,
                max_layer_count: 16,
                max_swapchain_image_width: 4096,
                max_swapchain_image_height: 4096,
                orientation_tracking: true,
                position_tracking: true,
            },
            gl_requirements: GraphicsRequirements {
                min_api_version: openxr::Version::new(4, 0, 0).into_raw(),
                max_api_version: openxr::Version::new(4, 6, 0).into_raw(),
            },
            should_render: true,
            frame_period_ns: 11_111_111,
        }
    }
}

impl Default for MockConfig {
    fn default() -> Self {
        Self::stereo(1440, 1600)
    }
}

/// Every call made on a [`MockRuntime`], in order. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<MockCall>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<MockCall> {
        self.0.borrow().clone()
    }

    pub fn count(&self, call: MockCall) -> usize {
        self.0.borrow().iter().filter(|&&c| c == call).count()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

/// One accepted end-frame.
#[derive(Debug, Clone)]
pub struct SubmittedFrame {
    pub display_time: sys::Time,
    pub blend_mode: sys::EnvironmentBlendMode,
    pub layers: Vec<ProjectionLayer>,
}

#[derive(Debug)]
struct Fault {
    call: MockCall,
    countdown: u32,
    code: sys::Result,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockFrame {
    Idle,
    Waited,
    Began,
}

#[derive(Debug)]
struct MockSession {
    handle: SessionHandle,
    running: bool,
    frame: MockFrame,
    display_time: i64,
}

#[derive(Debug)]
struct MockSwapchain {
    width: u32,
    height: u32,
    images: Vec<u32>,
    next_image: usize,
    outstanding: u32,
    waited: bool,
    released_this_frame: bool,
}

#[derive(Debug)]
pub struct MockRuntime {
    config: MockConfig,
    calls: CallLog,
    faults: RefCell<Vec<Fault>>,
    next_handle: u64,
    next_texture: u32,
    instance: Option<InstanceHandle>,
    last_instance_request: Option<InstanceCreateRequest>,
    gl_requirements_queried: Cell<bool>,
    session: Option<MockSession>,
    spaces: HashMap<SpaceHandle, sys::ReferenceSpaceType>,
    last_space: Option<(sys::ReferenceSpaceType, sys::Posef)>,
    swapchains: HashMap<SwapchainHandle, MockSwapchain>,
    events: VecDeque<RuntimeEvent>,
    frames: Vec<SubmittedFrame>,
    located_view_count: usize,
}

const SYSTEM: SystemId = SystemId::from_raw(1);

impl MockRuntime {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            calls: CallLog::default(),
            faults: RefCell::new(Vec::new()),
            next_handle: 0x10,
            next_texture: FIRST_TEXTURE,
            instance: None,
            last_instance_request: None,
            gl_requirements_queried: Cell::new(false),
            session: None,
            spaces: HashMap::new(),
            last_space: None,
            swapchains: HashMap::new(),
            events: VecDeque::new(),
            frames: Vec::new(),
            located_view_count: 2,
        }
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    /// Fail the next `call` with `code`.
    pub fn fail_next(&mut self, call: MockCall, code: sys::Result) {
        self.fail_nth(call, 1, code);
    }

    /// Fail the `n`th upcoming `call` (1 is the next one) with `code`.
    pub fn fail_nth(&mut self, call: MockCall, n: u32, code: sys::Result) {
        self.faults.get_mut().push(Fault {
            call,
            countdown: n.max(1),
            code,
        });
    }

    pub fn push_event(&mut self, event: RuntimeEvent) {
        self.events.push_back(event);
    }

    /// Queue a session state change for the live session.
    pub fn push_session_state(&mut self, state: sys::SessionState) {
        if let Some(session) = &self.session {
            let event = RuntimeEvent::SessionStateChanged {
                session: session.handle,
                state,
            };
            self.events.push_back(event);
        }
    }

    /// Number of views `locate_views` reports from now on.
    pub fn set_located_view_count(&mut self, count: usize) {
        self.located_view_count = count;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.calls()
    }

    pub fn count_calls(&self, call: MockCall) -> usize {
        self.calls.count(call)
    }

    /// A view of the call log that outlives the runtime.
    pub fn call_log(&self) -> CallLog {
        self.calls.clone()
    }

    pub fn submitted_frames(&self) -> &[SubmittedFrame] {
        &self.frames
    }

    pub fn last_instance_request(&self) -> Option<&InstanceCreateRequest> {
        self.last_instance_request.as_ref()
    }

    pub fn last_reference_space(&self) -> Option<(sys::ReferenceSpaceType, sys::Posef)> {
        self.last_space
    }

    pub fn instance_alive(&self) -> bool {
        self.instance.is_some()
    }

    pub fn session_alive(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_running(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.running)
    }

    pub fn live_spaces(&self) -> usize {
        self.spaces.len()
    }

    pub fn live_swapchains(&self) -> usize {
        self.swapchains.len()
    }

    pub fn outstanding_acquires(&self, swapchain: SwapchainHandle) -> u32 {
        self.swapchains
            .get(&swapchain)
            .map_or(0, |sc| sc.outstanding)
    }

    /// Create an instance with the OpenGL extension enabled and resolve the HMD.
    pub fn bootstrap(&mut self) -> RuntimeResult<(InstanceHandle, SystemId)> {
        let request = InstanceCreateRequest {
            application: crate::instance::application_info(&crate::XrConfig::default()),
            enabled_extensions: vec![OPENGL_ENABLE_EXTENSION.to_string()],
        };
        let instance = self.create_instance(&request)?;
        let system = self.system(instance, sys::FormFactor::HEAD_MOUNTED_DISPLAY)?;
        Ok((instance, system))
    }

    /// [`bootstrap`](Self::bootstrap) plus a created, not yet running, session.
    pub fn bootstrap_session(&mut self) -> RuntimeResult<(InstanceHandle, SystemId, SessionHandle)> {
        let (instance, system) = self.bootstrap()?;
        self.query_gl_requirements(instance, system)?;
        let binding = GraphicsBinding::Xlib {
            x_display: 1,
            visual_id: 0,
            glx_fb_config: 0,
            glx_drawable: 2,
            glx_context: 3,
        };
        let session = self.create_session(instance, system, &binding)?;
        Ok((instance, system, session))
    }

    /// `xrGetOpenGLGraphicsRequirementsKHR`.
    pub fn query_gl_requirements(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<GraphicsRequirements> {
        self.enter(MockCall::GetGraphicsRequirements)?;
        self.check_instance(instance)?;
        if system != SYSTEM {
            return Err(sys::Result::ERROR_SYSTEM_INVALID);
        }
        self.gl_requirements_queried.set(true);
        Ok(self.config.gl_requirements)
    }

    fn enter(&self, call: MockCall) -> RuntimeResult<()> {
        self.calls.0.borrow_mut().push(call);
        let mut faults = self.faults.borrow_mut();
        let Some(pos) = faults.iter().position(|f| f.call == call) else {
            return Ok(());
        };
        if faults[pos].countdown <= 1 {
            let fault = faults.remove(pos);
            Err(fault.code)
        } else {
            faults[pos].countdown -= 1;
            Ok(())
        }
    }

    fn alloc_handle(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        raw
    }

    fn check_instance(&self, instance: InstanceHandle) -> RuntimeResult<()> {
        match self.instance {
            Some(live) if live == instance => Ok(()),
            _ => Err(sys::Result::ERROR_HANDLE_INVALID),
        }
    }

    fn session_mut(&mut self, session: SessionHandle) -> RuntimeResult<&mut MockSession> {
        match self.session.as_mut() {
            Some(live) if live.handle == session => Ok(live),
            _ => Err(sys::Result::ERROR_HANDLE_INVALID),
        }
    }

    fn running_session(&mut self, session: SessionHandle) -> RuntimeResult<&mut MockSession> {
        let live = self.session_mut(session)?;
        if !live.running {
            return Err(sys::Result::ERROR_SESSION_NOT_RUNNING);
        }
        Ok(live)
    }

    fn extension_enabled(&self, name: &str) -> bool {
        self.last_instance_request
            .as_ref()
            .is_some_and(|req| req.enabled_extensions.iter().any(|e| e == name))
    }

    fn mock_views(&self) -> Vec<View> {
        (0..self.located_view_count)
            .map(|i| {
                let x = if i == 0 { -EYE_OFFSET } else { EYE_OFFSET };
                View {
                    pose: sys::Posef {
                        orientation: sys::Quaternionf {
                            x: 0.0,
                            y: 0.0,
                            z: 0.0,
                            w: 1.0,
                        },
                        position: sys::Vector3f { x, y: 0.0, z: 0.0 },
                    },
                    fov: sys::Fovf {
                        angle_left: -0.8,
                        angle_right: 0.8,
                        angle_up: 0.8,
                        angle_down: -0.8,
                    },
                }
            })
            .collect()
    }

    fn validate_layer(&self, layer: &ProjectionLayer) -> RuntimeResult<()> {
        if layer.ty != sys::StructureType::COMPOSITION_LAYER_PROJECTION {
            return Err(sys::Result::ERROR_VALIDATION_FAILURE);
        }
        if !self.spaces.contains_key(&layer.space) {
            return Err(sys::Result::ERROR_HANDLE_INVALID);
        }
        if layer.views.len() != self.config.stereo_views.len() {
            return Err(sys::Result::ERROR_VALIDATION_FAILURE);
        }
        for view in &layer.views {
            if view.ty != sys::StructureType::COMPOSITION_LAYER_PROJECTION_VIEW {
                return Err(sys::Result::ERROR_VALIDATION_FAILURE);
            }
            let sub = &view.sub_image;
            let sc = self
                .swapchains
                .get(&sub.swapchain)
                .ok_or(sys::Result::ERROR_HANDLE_INVALID)?;
            if !sc.released_this_frame || sc.outstanding > 0 {
                return Err(sys::Result::ERROR_LAYER_INVALID);
            }
            if sub.image_array_index != 0 {
                return Err(sys::Result::ERROR_VALIDATION_FAILURE);
            }
            let rect = sub.image_rect;
            let in_bounds = rect.offset.x >= 0
                && rect.offset.y >= 0
                && rect.extent.width > 0
                && rect.extent.height > 0
                && (rect.offset.x + rect.extent.width) as u32 <= sc.width
                && (rect.offset.y + rect.extent.height) as u32 <= sc.height;
            if !in_bounds {
                return Err(sys::Result::ERROR_SWAPCHAIN_RECT_INVALID);
            }
        }
        Ok(())
    }
}

impl XrRuntime for MockRuntime {
    fn enumerate_instance_extensions(
        &self,
        capacity: u32,
        count: &mut u32,
        names: &mut [String],
    ) -> RuntimeResult<()> {
        self.enter(MockCall::EnumerateInstanceExtensions)?;
        fill_two_call(&self.config.extensions, capacity, count, names)
    }

    fn create_instance(&mut self, request: &InstanceCreateRequest) -> RuntimeResult<InstanceHandle> {
        self.enter(MockCall::CreateInstance)?;
        if self.instance.is_some() {
            return Err(sys::Result::ERROR_LIMIT_REACHED);
        }
        if let Some(missing) = request
            .enabled_extensions
            .iter()
            .find(|name| !self.config.extensions.contains(*name))
        {
            tracing::debug!(extension = %missing, "mock runtime rejects extension");
            return Err(sys::Result::ERROR_EXTENSION_NOT_PRESENT);
        }
        let instance = InstanceHandle::from_raw(self.alloc_handle());
        self.instance = Some(instance);
        self.last_instance_request = Some(request.clone());
        Ok(instance)
    }

    fn destroy_instance(&mut self, instance: InstanceHandle) -> RuntimeResult<()> {
        self.enter(MockCall::DestroyInstance)?;
        self.check_instance(instance)?;
        self.instance = None;
        self.session = None;
        self.spaces.clear();
        self.swapchains.clear();
        self.gl_requirements_queried.set(false);
        Ok(())
    }

    fn resolve_extension_fn(
        &self,
        instance: InstanceHandle,
        name: &str,
    ) -> Option<ExtensionFn<Self>> {
        self.check_instance(instance).ok()?;
        if name == OPENGL_ENABLE_EXTENSION && self.extension_enabled(name) {
            Some(ExtensionFn::OpenGlGraphicsRequirements(
                MockRuntime::query_gl_requirements,
            ))
        } else {
            None
        }
    }

    fn system(&self, instance: InstanceHandle, form_factor: sys::FormFactor) -> RuntimeResult<SystemId> {
        self.enter(MockCall::GetSystem)?;
        self.check_instance(instance)?;
        if form_factor != sys::FormFactor::HEAD_MOUNTED_DISPLAY || !self.config.hmd_attached {
            return Err(sys::Result::ERROR_FORM_FACTOR_UNAVAILABLE);
        }
        Ok(SYSTEM)
    }

    fn system_properties(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<SystemProperties> {
        self.enter(MockCall::SystemProperties)?;
        self.check_instance(instance)?;
        if system != SYSTEM {
            return Err(sys::Result::ERROR_SYSTEM_INVALID);
        }
        Ok(self.config.system_properties.clone())
    }

    fn enumerate_view_configurations(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        capacity: u32,
        count: &mut u32,
        types: &mut [sys::ViewConfigurationType],
    ) -> RuntimeResult<()> {
        self.enter(MockCall::EnumerateViewConfigurations)?;
        self.check_instance(instance)?;
        if system != SYSTEM {
            return Err(sys::Result::ERROR_SYSTEM_INVALID);
        }
        fill_two_call(&self.config.view_configuration_types, capacity, count, types)
    }

    fn enumerate_view_configuration_views(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        view_type: sys::ViewConfigurationType,
        capacity: u32,
        count: &mut u32,
        views: &mut [ViewDescriptor],
    ) -> RuntimeResult<()> {
        self.enter(MockCall::EnumerateViewConfigurationViews)?;
        self.check_instance(instance)?;
        if system != SYSTEM {
            return Err(sys::Result::ERROR_SYSTEM_INVALID);
        }
        if view_type != sys::ViewConfigurationType::PRIMARY_STEREO
            || !self.config.view_configuration_types.contains(&view_type)
        {
            return Err(sys::Result::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED);
        }
        fill_two_call(&self.config.stereo_views, capacity, count, views)
    }

    fn create_session(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        _binding: &GraphicsBinding,
    ) -> RuntimeResult<SessionHandle> {
        self.enter(MockCall::CreateSession)?;
        self.check_instance(instance)?;
        if system != SYSTEM {
            return Err(sys::Result::ERROR_SYSTEM_INVALID);
        }
        if !self.gl_requirements_queried.get() {
            return Err(sys::Result::ERROR_GRAPHICS_REQUIREMENTS_CALL_MISSING);
        }
        if self.session.is_some() {
            return Err(sys::Result::ERROR_LIMIT_REACHED);
        }
        let handle = SessionHandle::from_raw(self.alloc_handle());
        self.session = Some(MockSession {
            handle,
            running: false,
            frame: MockFrame::Idle,
            display_time: 1_000_000_000,
        });
        self.push_session_state(sys::SessionState::IDLE);
        self.push_session_state(sys::SessionState::READY);
        Ok(handle)
    }

    fn begin_session(
        &mut self,
        session: SessionHandle,
        view_type: sys::ViewConfigurationType,
    ) -> RuntimeResult<()> {
        self.enter(MockCall::BeginSession)?;
        let supported = self.config.view_configuration_types.contains(&view_type);
        let live = self.session_mut(session)?;
        if live.running {
            return Err(sys::Result::ERROR_SESSION_RUNNING);
        }
        if !supported {
            return Err(sys::Result::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED);
        }
        live.running = true;
        live.frame = MockFrame::Idle;
        Ok(())
    }

    fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.enter(MockCall::EndSession)?;
        let live = self.running_session(session)?;
        live.running = false;
        live.frame = MockFrame::Idle;
        Ok(())
    }

    fn destroy_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.enter(MockCall::DestroySession)?;
        self.session_mut(session)?;
        self.session = None;
        self.spaces.clear();
        self.swapchains.clear();
        Ok(())
    }

    fn poll_event(&mut self, instance: InstanceHandle) -> RuntimeResult<Option<RuntimeEvent>> {
        self.enter(MockCall::PollEvent)?;
        self.check_instance(instance)?;
        Ok(self.events.pop_front())
    }

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        space_type: sys::ReferenceSpaceType,
        pose: sys::Posef,
    ) -> RuntimeResult<SpaceHandle> {
        self.enter(MockCall::CreateReferenceSpace)?;
        self.session_mut(session)?;
        let space = SpaceHandle::from_raw(self.alloc_handle());
        self.spaces.insert(space, space_type);
        self.last_space = Some((space_type, pose));
        Ok(space)
    }

    fn destroy_space(&mut self, space: SpaceHandle) -> RuntimeResult<()> {
        self.enter(MockCall::DestroySpace)?;
        self.spaces
            .remove(&space)
            .map(|_| ())
            .ok_or(sys::Result::ERROR_HANDLE_INVALID)
    }

    fn enumerate_swapchain_formats(
        &self,
        session: SessionHandle,
        capacity: u32,
        count: &mut u32,
        formats: &mut [u32],
    ) -> RuntimeResult<()> {
        self.enter(MockCall::EnumerateSwapchainFormats)?;
        if !self.session.as_ref().is_some_and(|s| s.handle == session) {
            return Err(sys::Result::ERROR_HANDLE_INVALID);
        }
        fill_two_call(&self.config.swapchain_formats, capacity, count, formats)
    }

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        request: &SwapchainRequest,
    ) -> RuntimeResult<SwapchainHandle> {
        self.enter(MockCall::CreateSwapchain)?;
        self.session_mut(session)?;
        if !self.config.swapchain_formats.contains(&request.format) {
            return Err(sys::Result::ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED);
        }
        if request.width == 0
            || request.height == 0
            || request.mip_count == 0
            || request.array_size == 0
            || request.face_count != 1
            || request.sample_count == 0
        {
            return Err(sys::Result::ERROR_VALIDATION_FAILURE);
        }
        let handle = SwapchainHandle::from_raw(self.alloc_handle());
        let first = self.next_texture;
        self.next_texture += self.config.images_per_swapchain;
        self.swapchains.insert(
            handle,
            MockSwapchain {
                width: request.width,
                height: request.height,
                images: (first..self.next_texture).collect(),
                next_image: 0,
                outstanding: 0,
                waited: false,
                released_this_frame: false,
            },
        );
        Ok(handle)
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
        self.enter(MockCall::DestroySwapchain)?;
        self.swapchains
            .remove(&swapchain)
            .map(|_| ())
            .ok_or(sys::Result::ERROR_HANDLE_INVALID)
    }

    fn enumerate_swapchain_images(
        &self,
        swapchain: SwapchainHandle,
        capacity: u32,
        count: &mut u32,
        images: &mut [u32],
    ) -> RuntimeResult<()> {
        self.enter(MockCall::EnumerateSwapchainImages)?;
        let sc = self
            .swapchains
            .get(&swapchain)
            .ok_or(sys::Result::ERROR_HANDLE_INVALID)?;
        fill_two_call(&sc.images, capacity, count, images)
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32> {
        self.enter(MockCall::AcquireSwapchainImage)?;
        let sc = self
            .swapchains
            .get_mut(&swapchain)
            .ok_or(sys::Result::ERROR_HANDLE_INVALID)?;
        if sc.outstanding > 0 {
            return Err(sys::Result::ERROR_CALL_ORDER_INVALID);
        }
        let index = sc.next_image;
        sc.next_image = (sc.next_image + 1) % sc.images.len().max(1);
        sc.outstanding += 1;
        sc.waited = false;
        Ok(index as u32)
    }

    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        _timeout: sys::Duration,
    ) -> RuntimeResult<()> {
        self.enter(MockCall::WaitSwapchainImage)?;
        let sc = self
            .swapchains
            .get_mut(&swapchain)
            .ok_or(sys::Result::ERROR_HANDLE_INVALID)?;
        if sc.outstanding == 0 || sc.waited {
            return Err(sys::Result::ERROR_CALL_ORDER_INVALID);
        }
        sc.waited = true;
        Ok(())
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
        self.enter(MockCall::ReleaseSwapchainImage)?;
        let sc = self
            .swapchains
            .get_mut(&swapchain)
            .ok_or(sys::Result::ERROR_HANDLE_INVALID)?;
        if sc.outstanding == 0 || !sc.waited {
            return Err(sys::Result::ERROR_CALL_ORDER_INVALID);
        }
        sc.outstanding -= 1;
        sc.waited = false;
        sc.released_this_frame = true;
        Ok(())
    }

    fn wait_frame(&mut self, session: SessionHandle) -> RuntimeResult<FrameTiming> {
        self.enter(MockCall::WaitFrame)?;
        let period = self.config.frame_period_ns;
        let should_render = self.config.should_render;
        let live = self.running_session(session)?;
        live.display_time += period;
        live.frame = MockFrame::Waited;
        Ok(FrameTiming {
            predicted_display_time: sys::Time::from_nanos(live.display_time),
            predicted_display_period: sys::Duration::from_nanos(period),
            should_render,
        })
    }

    fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.enter(MockCall::BeginFrame)?;
        let live = self.running_session(session)?;
        if live.frame != MockFrame::Waited {
            return Err(sys::Result::ERROR_CALL_ORDER_INVALID);
        }
        live.frame = MockFrame::Began;
        for sc in self.swapchains.values_mut() {
            sc.released_this_frame = false;
        }
        Ok(())
    }

    fn locate_views(
        &self,
        session: SessionHandle,
        view_type: sys::ViewConfigurationType,
        _display_time: sys::Time,
        space: SpaceHandle,
    ) -> RuntimeResult<(sys::ViewStateFlags, Vec<View>)> {
        self.enter(MockCall::LocateViews)?;
        match &self.session {
            Some(live) if live.handle == session && live.running => {}
            Some(live) if live.handle == session => return Err(sys::Result::ERROR_SESSION_NOT_RUNNING),
            _ => return Err(sys::Result::ERROR_HANDLE_INVALID),
        }
        if !self.spaces.contains_key(&space) {
            return Err(sys::Result::ERROR_HANDLE_INVALID);
        }
        if view_type != sys::ViewConfigurationType::PRIMARY_STEREO {
            return Err(sys::Result::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED);
        }
        let flags = sys::ViewStateFlags::ORIENTATION_VALID
            | sys::ViewStateFlags::POSITION_VALID
            | sys::ViewStateFlags::ORIENTATION_TRACKED
            | sys::ViewStateFlags::POSITION_TRACKED;
        Ok((flags, self.mock_views()))
    }

    fn end_frame(
        &mut self,
        session: SessionHandle,
        display_time: sys::Time,
        blend_mode: sys::EnvironmentBlendMode,
        layers: &[ProjectionLayer],
    ) -> RuntimeResult<()> {
        self.enter(MockCall::EndFrame)?;
        let live = self.running_session(session)?;
        if live.frame != MockFrame::Began {
            return Err(sys::Result::ERROR_CALL_ORDER_INVALID);
        }
        if display_time.as_nanos() != live.display_time {
            return Err(sys::Result::ERROR_TIME_INVALID);
        }
        if blend_mode != sys::EnvironmentBlendMode::OPAQUE {
            return Err(sys::Result::ERROR_ENVIRONMENT_BLEND_MODE_UNSUPPORTED);
        }
        for layer in layers {
            self.validate_layer(layer)?;
        }

        if let Some(live) = self.session.as_mut() {
            live.frame = MockFrame::Idle;
        }
        self.frames.push(SubmittedFrame {
            display_time,
            blend_mode,
            layers: layers.to_vec(),
        });
        Ok(())
    }
}
