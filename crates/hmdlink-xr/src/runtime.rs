//! The boundary to the native XR runtime.
//!
//! Every call mirrors one OpenXR entry point. Enumerations keep the native
//! count-then-fill shape: a call with `capacity == 0` only writes `count`, a call
//! with `capacity >= count` fills the buffer. [`enumerate_two_call`] runs both
//! halves. Results carry raw OpenXR result codes so a failure reads the same
//! whichever backend produced it.

use openxr::sys;

use crate::binding::GraphicsBinding;

/// Raw OpenXR result code.
pub type RuntimeCode = sys::Result;

pub type RuntimeResult<T> = Result<T, RuntimeCode>;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn into_raw(self) -> u64 {
                self.0
            }
        }
    };
}

handle!(
    /// The process's runtime connection.
    InstanceHandle
);
handle!(
    /// Physical device class resolved for the head-mounted form factor.
    SystemId
);
handle!(SessionHandle);
handle!(SpaceHandle);
handle!(SwapchainHandle);

/// Application identity passed to instance creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationInfo {
    pub application_name: String,
    pub application_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
    /// Packed OpenXR API version the application targets.
    pub api_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceCreateRequest {
    pub application: ApplicationInfo,
    pub enabled_extensions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemProperties {
    pub system_name: String,
    pub vendor_id: u32,
    pub max_layer_count: u32,
    pub max_swapchain_image_width: u32,
    pub max_swapchain_image_height: u32,
    pub orientation_tracking: bool,
    pub position_tracking: bool,
}

/// One eye's entry of a view configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewDescriptor {
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub recommended_sample_count: u32,
    pub max_sample_count: u32,
}

/// Packed min/max OpenGL versions as reported by the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphicsRequirements {
    pub min_api_version: u64,
    pub max_api_version: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct SwapchainRequest {
    pub usage: sys::SwapchainUsageFlags,
    /// GL internal format.
    pub format: u32,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub array_size: u32,
    pub mip_count: u32,
}

/// Output of the runtime's frame wait.
#[derive(Debug, Clone, Copy)]
pub struct FrameTiming {
    pub predicted_display_time: sys::Time,
    pub predicted_display_period: sys::Duration,
    pub should_render: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct View {
    pub pose: sys::Posef,
    pub fov: sys::Fovf,
}

#[derive(Debug, Clone, Copy)]
pub struct SubImage {
    pub swapchain: SwapchainHandle,
    pub image_rect: sys::Rect2Di,
    pub image_array_index: u32,
}

/// Mirrors `XrCompositionLayerProjectionView`, including its structure tag.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionView {
    pub ty: sys::StructureType,
    pub pose: sys::Posef,
    pub fov: sys::Fovf,
    pub sub_image: SubImage,
}

/// Mirrors `XrCompositionLayerProjection`, including its structure tag.
#[derive(Debug, Clone)]
pub struct ProjectionLayer {
    pub ty: sys::StructureType,
    pub layer_flags: sys::CompositionLayerFlags,
    pub space: SpaceHandle,
    pub views: Vec<ProjectionView>,
}

#[derive(Debug, Clone, Copy)]
pub enum RuntimeEvent {
    SessionStateChanged {
        session: SessionHandle,
        state: sys::SessionState,
    },
    InstanceLossPending,
    EventsLost(u32),
    Other,
}

/// `xrGetOpenGLGraphicsRequirementsKHR`, bound to a concrete runtime.
pub type GraphicsRequirementsFn<R> =
    fn(&R, InstanceHandle, SystemId) -> RuntimeResult<GraphicsRequirements>;

/// Extension entry points a runtime resolves by name after instance creation.
pub enum ExtensionFn<R: ?Sized> {
    OpenGlGraphicsRequirements(GraphicsRequirementsFn<R>),
}

impl<R: ?Sized> Clone for ExtensionFn<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R: ?Sized> Copy for ExtensionFn<R> {}

impl<R: ?Sized> std::fmt::Debug for ExtensionFn<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenGlGraphicsRequirements(_) => f.write_str("OpenGlGraphicsRequirements"),
        }
    }
}

/// A VR runtime reachable through the OpenXR call surface.
///
/// Implementations perform no sequencing of their own; ordering is enforced by
/// the callers in this crate.
pub trait XrRuntime {
    fn enumerate_instance_extensions(
        &self,
        capacity: u32,
        count: &mut u32,
        names: &mut [String],
    ) -> RuntimeResult<()>;

    fn create_instance(&mut self, request: &InstanceCreateRequest) -> RuntimeResult<InstanceHandle>;

    fn destroy_instance(&mut self, instance: InstanceHandle) -> RuntimeResult<()>;

    /// Look up an extension entry point by its extension name.
    fn resolve_extension_fn(&self, instance: InstanceHandle, name: &str)
        -> Option<ExtensionFn<Self>>;

    fn system(&self, instance: InstanceHandle, form_factor: sys::FormFactor)
        -> RuntimeResult<SystemId>;

    fn system_properties(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<SystemProperties>;

    fn enumerate_view_configurations(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        capacity: u32,
        count: &mut u32,
        types: &mut [sys::ViewConfigurationType],
    ) -> RuntimeResult<()>;

    fn enumerate_view_configuration_views(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        view_type: sys::ViewConfigurationType,
        capacity: u32,
        count: &mut u32,
        views: &mut [ViewDescriptor],
    ) -> RuntimeResult<()>;

    fn create_session(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        binding: &GraphicsBinding,
    ) -> RuntimeResult<SessionHandle>;

    fn begin_session(
        &mut self,
        session: SessionHandle,
        view_type: sys::ViewConfigurationType,
    ) -> RuntimeResult<()>;

    fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()>;

    fn destroy_session(&mut self, session: SessionHandle) -> RuntimeResult<()>;

    fn poll_event(&mut self, instance: InstanceHandle) -> RuntimeResult<Option<RuntimeEvent>>;

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        space_type: sys::ReferenceSpaceType,
        pose: sys::Posef,
    ) -> RuntimeResult<SpaceHandle>;

    fn destroy_space(&mut self, space: SpaceHandle) -> RuntimeResult<()>;

    fn enumerate_swapchain_formats(
        &self,
        session: SessionHandle,
        capacity: u32,
        count: &mut u32,
        formats: &mut [u32],
    ) -> RuntimeResult<()>;

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        request: &SwapchainRequest,
    ) -> RuntimeResult<SwapchainHandle>;

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()>;

    /// Backing GL texture names of a swapchain.
    fn enumerate_swapchain_images(
        &self,
        swapchain: SwapchainHandle,
        capacity: u32,
        count: &mut u32,
        images: &mut [u32],
    ) -> RuntimeResult<()>;

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32>;

    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        timeout: sys::Duration,
    ) -> RuntimeResult<()>;

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()>;

    /// Blocks until the runtime paces the next frame.
    fn wait_frame(&mut self, session: SessionHandle) -> RuntimeResult<FrameTiming>;

    fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()>;

    fn locate_views(
        &self,
        session: SessionHandle,
        view_type: sys::ViewConfigurationType,
        display_time: sys::Time,
        space: SpaceHandle,
    ) -> RuntimeResult<(sys::ViewStateFlags, Vec<View>)>;

    fn end_frame(
        &mut self,
        session: SessionHandle,
        display_time: sys::Time,
        blend_mode: sys::EnvironmentBlendMode,
        layers: &[ProjectionLayer],
    ) -> RuntimeResult<()>;
}

/// Run a count-then-fill enumeration to completion.
///
/// `fill` seeds the buffer handed to the second call.
pub fn enumerate_two_call<T, F>(fill: T, mut call: F) -> RuntimeResult<Vec<T>>
where
    T: Clone,
    F: FnMut(u32, &mut u32, &mut [T]) -> RuntimeResult<()>,
{
    let mut count = 0u32;
    call(0, &mut count, &mut [])?;
    if count == 0 {
        return Ok(Vec::new());
    }

    let capacity = count;
    let mut items = vec![fill; capacity as usize];
    call(capacity, &mut count, &mut items)?;
    items.truncate(count.min(capacity) as usize);
    Ok(items)
}

/// Fill side of the count-then-fill protocol, for runtimes that hold the full list.
pub fn fill_two_call<T: Clone>(
    items: &[T],
    capacity: u32,
    count: &mut u32,
    out: &mut [T],
) -> RuntimeResult<()> {
    *count = items.len() as u32;
    if capacity == 0 {
        return Ok(());
    }
    if (capacity as usize) < items.len() || out.len() < items.len() {
        return Err(sys::Result::ERROR_SIZE_INSUFFICIENT);
    }
    out[..items.len()].clone_from_slice(items);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_call_round_trip() {
        let source = vec![3u32, 1, 4, 1, 5];
        let mut calls = Vec::new();
        let out = enumerate_two_call(0u32, |capacity, count, buf| {
            calls.push((capacity, buf.len()));
            fill_two_call(&source, capacity, count, buf)
        })
        .unwrap();

        assert_eq!(out, source);
        assert_eq!(calls, vec![(0, 0), (5, 5)]);
    }

    #[test]
    fn test_two_call_empty_list_skips_fill() {
        let mut fills = 0;
        let out = enumerate_two_call(0u32, |capacity, count, buf| {
            if capacity > 0 {
                fills += 1;
            }
            fill_two_call(&[], capacity, count, buf)
        })
        .unwrap();
        assert!(out.is_empty());
        assert_eq!(fills, 0);
    }

    #[test]
    fn test_fill_rejects_short_buffer() {
        let mut count = 0;
        let mut buf = [0u32; 2];
        let err = fill_two_call(&[1, 2, 3], 2, &mut count, &mut buf).unwrap_err();
        assert_eq!(err, sys::Result::ERROR_SIZE_INSUFFICIENT);
        assert_eq!(count, 3);
    }

    #[test]
    fn test_two_call_propagates_first_call_error() {
        let err = enumerate_two_call(0u32, |_, _, _| Err(sys::Result::ERROR_RUNTIME_FAILURE))
            .unwrap_err();
        assert_eq!(err, sys::Result::ERROR_RUNTIME_FAILURE);
    }
}
