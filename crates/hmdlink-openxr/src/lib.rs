//! [`XrRuntime`] over the system OpenXR loader with the OpenGL graphics API.
//!
//! Handles handed out to `hmdlink-xr` are the raw OpenXR handle values. The
//! wrapper objects behind them live here and are dropped (destroying the native
//! object) when the matching `destroy_*` call arrives.

use std::collections::HashMap;
use std::ffi::CStr;
use std::ptr;

use openxr as xr;
use openxr::sys;
use openxr::sys::Handle as _;
use tracing::{debug, info};

use hmdlink_xr::capability::OPENGL_ENABLE_EXTENSION;
use hmdlink_xr::runtime::{
    fill_two_call, ExtensionFn, FrameTiming, GraphicsRequirements, InstanceCreateRequest,
    InstanceHandle, ProjectionLayer, RuntimeEvent, RuntimeResult, SessionHandle, SpaceHandle,
    SwapchainHandle, SwapchainRequest, SystemId, SystemProperties, View, ViewDescriptor,
};
use hmdlink_xr::{GraphicsBinding, XrError, XrResult, XrRuntime};

const DEBUG_UTILS_EXTENSION: &str = "XR_EXT_debug_utils";

struct SessionSlot {
    handle: SessionHandle,
    session: xr::Session<xr::OpenGL>,
    waiter: xr::FrameWaiter,
    stream: xr::FrameStream<xr::OpenGL>,
}

pub struct OpenXrRuntime {
    entry: xr::Entry,
    instance: Option<(InstanceHandle, xr::Instance)>,
    enabled_extensions: Vec<String>,
    session: Option<SessionSlot>,
    spaces: HashMap<SpaceHandle, xr::Space>,
    swapchains: HashMap<SwapchainHandle, xr::Swapchain<xr::OpenGL>>,
    event_buffer: xr::EventDataBuffer,
}

impl OpenXrRuntime {
    /// Load the OpenXR loader library.
    ///
    /// # Safety
    ///
    /// Every [`GraphicsBinding`] later passed to `create_session` must carry
    /// live native handles of an OpenGL context that is current on the calling
    /// thread, and that context must outlive the session.
    pub unsafe fn load() -> XrResult<Self> {
        let entry = xr::Entry::load()
            .map_err(|e| XrError::UnsupportedRuntime(format!("OpenXR load failed: {e:?}")))?;
        Ok(Self {
            entry,
            instance: None,
            enabled_extensions: Vec::new(),
            session: None,
            spaces: HashMap::new(),
            swapchains: HashMap::new(),
            event_buffer: xr::EventDataBuffer::new(),
        })
    }

    fn instance_for(&self, handle: InstanceHandle) -> RuntimeResult<&xr::Instance> {
        match &self.instance {
            Some((h, instance)) if *h == handle => Ok(instance),
            _ => Err(sys::Result::ERROR_HANDLE_INVALID),
        }
    }

    fn session_for(&self, handle: SessionHandle) -> RuntimeResult<&SessionSlot> {
        match &self.session {
            Some(slot) if slot.handle == handle => Ok(slot),
            _ => Err(sys::Result::ERROR_HANDLE_INVALID),
        }
    }

    fn session_for_mut(&mut self, handle: SessionHandle) -> RuntimeResult<&mut SessionSlot> {
        match &mut self.session {
            Some(slot) if slot.handle == handle => Ok(slot),
            _ => Err(sys::Result::ERROR_HANDLE_INVALID),
        }
    }

    fn swapchain_for(&self, handle: SwapchainHandle) -> RuntimeResult<&xr::Swapchain<xr::OpenGL>> {
        self.swapchains
            .get(&handle)
            .ok_or(sys::Result::ERROR_HANDLE_INVALID)
    }

    fn swapchain_for_mut(
        &mut self,
        handle: SwapchainHandle,
    ) -> RuntimeResult<&mut xr::Swapchain<xr::OpenGL>> {
        self.swapchains
            .get_mut(&handle)
            .ok_or(sys::Result::ERROR_HANDLE_INVALID)
    }

    /// `xrGetOpenGLGraphicsRequirementsKHR`.
    fn opengl_requirements(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<GraphicsRequirements> {
        let reqs = self
            .instance_for(instance)?
            .graphics_requirements::<xr::OpenGL>(sys::SystemId::from_raw(system.into_raw()))?;
        Ok(GraphicsRequirements {
            min_api_version: reqs.min_api_version_supported.into_raw(),
            max_api_version: reqs.max_api_version_supported.into_raw(),
        })
    }
}

impl std::fmt::Debug for OpenXrRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenXrRuntime")
            .field("instance", &self.instance.as_ref().map(|(h, _)| *h))
            .field("session", &self.session.as_ref().map(|s| s.handle))
            .field("spaces", &self.spaces.len())
            .field("swapchains", &self.swapchains.len())
            .finish()
    }
}

fn extension_set(names: &[String]) -> xr::ExtensionSet {
    let mut exts = xr::ExtensionSet::default();
    for name in names {
        match name.as_str() {
            OPENGL_ENABLE_EXTENSION => exts.khr_opengl_enable = true,
            DEBUG_UTILS_EXTENSION => exts.ext_debug_utils = true,
            other => {
                // Names go to the loader as C strings.
                let mut bytes = other.as_bytes().to_vec();
                bytes.push(0);
                exts.other.push(bytes);
            }
        }
    }
    exts
}

fn session_create_info(binding: &GraphicsBinding) -> RuntimeResult<xr::opengl::SessionCreateInfo> {
    match *binding {
        #[cfg(windows)]
        GraphicsBinding::Win32 { h_dc, h_glrc } => Ok(xr::opengl::SessionCreateInfo::Windows {
            h_dc: h_dc as *mut _,
            h_glrc: h_glrc as *mut _,
        }),
        #[cfg(target_os = "linux")]
        GraphicsBinding::Xlib {
            x_display,
            visual_id,
            glx_fb_config,
            glx_drawable,
            glx_context,
        } => Ok(xr::opengl::SessionCreateInfo::Xlib {
            x_display: x_display as *mut _,
            visualid: visual_id,
            glx_fb_config: glx_fb_config as *mut _,
            glx_drawable: glx_drawable as _,
            glx_context: glx_context as *mut _,
        }),
        #[allow(unreachable_patterns)]
        _ => Err(sys::Result::ERROR_GRAPHICS_DEVICE_INVALID),
    }
}

impl XrRuntime for OpenXrRuntime {
    fn enumerate_instance_extensions(
        &self,
        capacity: u32,
        count: &mut u32,
        names: &mut [String],
    ) -> RuntimeResult<()> {
        let enumerate = self.entry.fp().enumerate_instance_extension_properties;
        if capacity == 0 {
            let result = unsafe { enumerate(ptr::null(), 0, count, ptr::null_mut()) };
            return check(result);
        }
        if names.len() < capacity as usize {
            return Err(sys::Result::ERROR_SIZE_INSUFFICIENT);
        }

        let blank = sys::ExtensionProperties {
            ty: sys::ExtensionProperties::TYPE,
            next: ptr::null_mut(),
            extension_name: [0; sys::MAX_EXTENSION_NAME_SIZE],
            extension_version: 0,
        };
        let mut props = vec![blank; capacity as usize];
        let result = unsafe { enumerate(ptr::null(), capacity, count, props.as_mut_ptr()) };
        check(result)?;

        let filled = (*count).min(capacity) as usize;
        for (slot, prop) in names.iter_mut().zip(&props[..filled]) {
            // The runtime writes NUL-terminated names into the fixed buffer.
            let name = unsafe { CStr::from_ptr(prop.extension_name.as_ptr()) };
            *slot = name.to_string_lossy().into_owned();
        }
        Ok(())
    }

    fn create_instance(&mut self, request: &InstanceCreateRequest) -> RuntimeResult<InstanceHandle> {
        if self.instance.is_some() {
            return Err(sys::Result::ERROR_LIMIT_REACHED);
        }
        let app = &request.application;
        let app_info = xr::ApplicationInfo {
            application_name: &app.application_name,
            application_version: app.application_version,
            engine_name: &app.engine_name,
            engine_version: app.engine_version,
            api_version: xr::Version::from_raw(app.api_version),
        };
        let exts = extension_set(&request.enabled_extensions);
        let instance = self.entry.create_instance(&app_info, &exts, &[])?;

        if let Ok(props) = instance.properties() {
            info!(
                runtime = %props.runtime_name,
                version = ?props.runtime_version,
                "OpenXR runtime"
            );
        }
        let handle = InstanceHandle::from_raw(instance.as_raw().into_raw());
        self.enabled_extensions = request.enabled_extensions.clone();
        self.instance = Some((handle, instance));
        Ok(handle)
    }

    fn destroy_instance(&mut self, instance: InstanceHandle) -> RuntimeResult<()> {
        self.instance_for(instance)?;
        self.instance = None;
        self.enabled_extensions.clear();
        debug!(?instance, "dropped OpenXR instance");
        Ok(())
    }

    fn resolve_extension_fn(
        &self,
        instance: InstanceHandle,
        name: &str,
    ) -> Option<ExtensionFn<Self>> {
        self.instance_for(instance).ok()?;
        if !self.enabled_extensions.iter().any(|enabled| enabled == name) {
            return None;
        }
        match name {
            OPENGL_ENABLE_EXTENSION => Some(ExtensionFn::OpenGlGraphicsRequirements(
                Self::opengl_requirements,
            )),
            _ => None,
        }
    }

    fn system(&self, instance: InstanceHandle, form_factor: sys::FormFactor) -> RuntimeResult<SystemId> {
        let system = self.instance_for(instance)?.system(form_factor)?;
        Ok(SystemId::from_raw(system.into_raw()))
    }

    fn system_properties(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<SystemProperties> {
        let props = self
            .instance_for(instance)?
            .system_properties(sys::SystemId::from_raw(system.into_raw()))?;
        Ok(SystemProperties {
            system_name: props.system_name,
            vendor_id: props.vendor_id,
            max_layer_count: props.graphics_properties.max_layer_count,
            max_swapchain_image_width: props.graphics_properties.max_swapchain_image_width,
            max_swapchain_image_height: props.graphics_properties.max_swapchain_image_height,
            orientation_tracking: props.tracking_properties.orientation_tracking,
            position_tracking: props.tracking_properties.position_tracking,
        })
    }

    fn enumerate_view_configurations(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        capacity: u32,
        count: &mut u32,
        types: &mut [sys::ViewConfigurationType],
    ) -> RuntimeResult<()> {
        let offered = self
            .instance_for(instance)?
            .enumerate_view_configurations(sys::SystemId::from_raw(system.into_raw()))?;
        fill_two_call(&offered, capacity, count, types)
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
        let described: Vec<ViewDescriptor> = self
            .instance_for(instance)?
            .enumerate_view_configuration_views(
                sys::SystemId::from_raw(system.into_raw()),
                view_type,
            )?
            .into_iter()
            .map(|v| ViewDescriptor {
                recommended_width: v.recommended_image_rect_width,
                recommended_height: v.recommended_image_rect_height,
                max_width: v.max_image_rect_width,
                max_height: v.max_image_rect_height,
                recommended_sample_count: v.recommended_swapchain_sample_count,
                max_sample_count: v.max_swapchain_sample_count,
            })
            .collect();
        fill_two_call(&described, capacity, count, views)
    }

    fn create_session(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        binding: &GraphicsBinding,
    ) -> RuntimeResult<SessionHandle> {
        if self.session.is_some() {
            return Err(sys::Result::ERROR_LIMIT_REACHED);
        }
        let create_info = session_create_info(binding)?;
        let xr_instance = self.instance_for(instance)?;
        // SAFETY: `load` obliges the caller to supply live handles of a
        // context current on this thread.
        let (session, waiter, stream) = unsafe {
            xr_instance.create_session::<xr::OpenGL>(
                sys::SystemId::from_raw(system.into_raw()),
                &create_info,
            )?
        };
        let handle = SessionHandle::from_raw(session.as_raw().into_raw());
        debug!(?handle, binding = binding.kind(), "created OpenXR session");
        self.session = Some(SessionSlot {
            handle,
            session,
            waiter,
            stream,
        });
        Ok(handle)
    }

    fn begin_session(
        &mut self,
        session: SessionHandle,
        view_type: sys::ViewConfigurationType,
    ) -> RuntimeResult<()> {
        self.session_for(session)?.session.begin(view_type).map(|_| ())
    }

    fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.session_for(session)?.session.end().map(|_| ())
    }

    fn destroy_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.session_for(session)?;
        self.session = None;
        Ok(())
    }

    fn poll_event(&mut self, instance: InstanceHandle) -> RuntimeResult<Option<RuntimeEvent>> {
        let xr_instance = match &self.instance {
            Some((h, xr_instance)) if *h == instance => xr_instance,
            _ => return Err(sys::Result::ERROR_HANDLE_INVALID),
        };
        let event = match xr_instance.poll_event(&mut self.event_buffer)? {
            Some(event) => event,
            None => return Ok(None),
        };
        Ok(Some(match event {
            xr::Event::SessionStateChanged(e) => RuntimeEvent::SessionStateChanged {
                session: SessionHandle::from_raw(e.session().into_raw()),
                state: e.state(),
            },
            xr::Event::InstanceLossPending(_) => RuntimeEvent::InstanceLossPending,
            xr::Event::EventsLost(e) => RuntimeEvent::EventsLost(e.lost_event_count()),
            _ => RuntimeEvent::Other,
        }))
    }

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        space_type: sys::ReferenceSpaceType,
        pose: sys::Posef,
    ) -> RuntimeResult<SpaceHandle> {
        let space = self
            .session_for(session)?
            .session
            .create_reference_space(space_type, pose)?;
        let handle = SpaceHandle::from_raw(space.as_raw().into_raw());
        self.spaces.insert(handle, space);
        Ok(handle)
    }

    fn destroy_space(&mut self, space: SpaceHandle) -> RuntimeResult<()> {
        self.spaces
            .remove(&space)
            .map(drop)
            .ok_or(sys::Result::ERROR_HANDLE_INVALID)
    }

    fn enumerate_swapchain_formats(
        &self,
        session: SessionHandle,
        capacity: u32,
        count: &mut u32,
        formats: &mut [u32],
    ) -> RuntimeResult<()> {
        let offered = self.session_for(session)?.session.enumerate_swapchain_formats()?;
        fill_two_call(&offered, capacity, count, formats)
    }

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        request: &SwapchainRequest,
    ) -> RuntimeResult<SwapchainHandle> {
        let swapchain = self
            .session_for(session)?
            .session
            .create_swapchain(&xr::SwapchainCreateInfo {
                create_flags: xr::SwapchainCreateFlags::EMPTY,
                usage_flags: request.usage,
                format: request.format,
                sample_count: request.sample_count,
                width: request.width,
                height: request.height,
                face_count: request.face_count,
                array_size: request.array_size,
                mip_count: request.mip_count,
            })?;
        let handle = SwapchainHandle::from_raw(swapchain.as_raw().into_raw());
        self.swapchains.insert(handle, swapchain);
        Ok(handle)
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
        self.swapchains
            .remove(&swapchain)
            .map(drop)
            .ok_or(sys::Result::ERROR_HANDLE_INVALID)
    }

    fn enumerate_swapchain_images(
        &self,
        swapchain: SwapchainHandle,
        capacity: u32,
        count: &mut u32,
        images: &mut [u32],
    ) -> RuntimeResult<()> {
        let textures = self.swapchain_for(swapchain)?.enumerate_images()?;
        fill_two_call(&textures, capacity, count, images)
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32> {
        self.swapchain_for_mut(swapchain)?.acquire_image()
    }

    /// Reports `TIMEOUT_EXPIRED` as an error; the image stays acquired and
    /// may be waited on again.
    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        timeout: sys::Duration,
    ) -> RuntimeResult<()> {
        // Raw calls: the wrapper's own waited flag would assert on a release
        // after a failed wait, and it folds TIMEOUT_EXPIRED into success.
        let sc = self.swapchain_for(swapchain)?;
        let info = sys::SwapchainImageWaitInfo {
            ty: sys::SwapchainImageWaitInfo::TYPE,
            next: ptr::null(),
            timeout,
        };
        // SAFETY: `sc` is a live swapchain and `info` outlives the call.
        let result = unsafe { (sc.instance().fp().wait_swapchain_image)(sc.as_raw(), &info) };
        wait_result(result)
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
        let sc = self.swapchain_for(swapchain)?;
        // SAFETY: `sc` is a live swapchain; a null release info is allowed.
        let result =
            unsafe { (sc.instance().fp().release_swapchain_image)(sc.as_raw(), ptr::null()) };
        check(result)
    }

    fn wait_frame(&mut self, session: SessionHandle) -> RuntimeResult<FrameTiming> {
        let state = self.session_for_mut(session)?.waiter.wait()?;
        Ok(FrameTiming {
            predicted_display_time: state.predicted_display_time,
            predicted_display_period: state.predicted_display_period,
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.session_for_mut(session)?.stream.begin().map(|_| ())
    }

    fn locate_views(
        &self,
        session: SessionHandle,
        view_type: sys::ViewConfigurationType,
        display_time: sys::Time,
        space: SpaceHandle,
    ) -> RuntimeResult<(sys::ViewStateFlags, Vec<View>)> {
        let space = self
            .spaces
            .get(&space)
            .ok_or(sys::Result::ERROR_HANDLE_INVALID)?;
        let (flags, views) = self
            .session_for(session)?
            .session
            .locate_views(view_type, display_time, space)?;
        Ok((
            flags,
            views
                .into_iter()
                .map(|v| View {
                    pose: v.pose,
                    fov: v.fov,
                })
                .collect(),
        ))
    }

    fn end_frame(
        &mut self,
        session: SessionHandle,
        display_time: sys::Time,
        blend_mode: sys::EnvironmentBlendMode,
        layers: &[ProjectionLayer],
    ) -> RuntimeResult<()> {
        let mut view_sets = Vec::with_capacity(layers.len());
        for layer in layers {
            if layer.ty != sys::StructureType::COMPOSITION_LAYER_PROJECTION {
                return Err(sys::Result::ERROR_LAYER_INVALID);
            }
            let mut views = Vec::with_capacity(layer.views.len());
            for view in &layer.views {
                if view.ty != sys::StructureType::COMPOSITION_LAYER_PROJECTION_VIEW {
                    return Err(sys::Result::ERROR_VALIDATION_FAILURE);
                }
                let swapchain = self
                    .swapchains
                    .get(&view.sub_image.swapchain)
                    .ok_or(sys::Result::ERROR_HANDLE_INVALID)?;
                // SAFETY: the swapchain handle comes from a live wrapper that
                // outlives this call.
                let sub_image = unsafe {
                    xr::SwapchainSubImage::<xr::OpenGL>::from_raw(sys::SwapchainSubImage {
                        swapchain: swapchain.as_raw(),
                        image_rect: view.sub_image.image_rect,
                        image_array_index: view.sub_image.image_array_index,
                    })
                };
                views.push(
                    xr::CompositionLayerProjectionView::new()
                        .pose(view.pose)
                        .fov(view.fov)
                        .sub_image(sub_image),
                );
            }
            view_sets.push(views);
        }

        let mut projections = Vec::with_capacity(layers.len());
        for (layer, views) in layers.iter().zip(&view_sets) {
            let space = self
                .spaces
                .get(&layer.space)
                .ok_or(sys::Result::ERROR_HANDLE_INVALID)?;
            projections.push(
                xr::CompositionLayerProjection::new()
                    .layer_flags(layer.layer_flags)
                    .space(space)
                    .views(views),
            );
        }
        let bases: Vec<&xr::CompositionLayerBase<'_, xr::OpenGL>> =
            projections.iter().map(|p| &**p).collect();

        let slot = match &mut self.session {
            Some(slot) if slot.handle == session => slot,
            _ => return Err(sys::Result::ERROR_HANDLE_INVALID),
        };
        slot.stream.end(display_time, blend_mode, &bases)
    }
}

fn check(result: sys::Result) -> RuntimeResult<()> {
    if result.into_raw() < 0 {
        Err(result)
    } else {
        Ok(())
    }
}

fn wait_result(result: sys::Result) -> RuntimeResult<()> {
    if result == sys::Result::TIMEOUT_EXPIRED {
        return Err(result);
    }
    check(result)
}
