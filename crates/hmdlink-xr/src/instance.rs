//! Runtime instance and HMD system resolution.

use openxr::sys;
use tracing::{info, warn};

use crate::capability::{CapabilityTable, GraphicsVersionRange, NegotiatedExtensions};
use crate::config::XrConfig;
use crate::error::{XrError, XrResult};
use crate::runtime::{
    ApplicationInfo, InstanceCreateRequest, InstanceHandle, SystemId, SystemProperties, XrRuntime,
};

/// `XR_MAX_APPLICATION_NAME_SIZE` and `XR_MAX_ENGINE_NAME_SIZE`, including the
/// trailing NUL.
pub const MAX_NAME_SIZE: usize = 128;

/// Cut `name` to fit a fixed-size C string field without splitting a character.
fn fit_name(field: &'static str, name: &str) -> String {
    let limit = MAX_NAME_SIZE - 1;
    if name.len() <= limit {
        return name.to_string();
    }
    let mut end = limit;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    warn!(field, len = name.len(), kept = end, "name truncated");
    name[..end].to_string()
}

pub fn application_info(config: &XrConfig) -> ApplicationInfo {
    ApplicationInfo {
        application_name: fit_name("application_name", &config.application_name),
        application_version: config.application_version,
        engine_name: fit_name("engine_name", &config.engine_name),
        engine_version: config.engine_version,
        api_version: config.api_version(),
    }
}

pub fn create_instance<R: XrRuntime>(
    runtime: &mut R,
    config: &XrConfig,
    extensions: &NegotiatedExtensions,
) -> XrResult<InstanceHandle> {
    let request = InstanceCreateRequest {
        application: application_info(config),
        enabled_extensions: extensions.enabled.iter().map(|s| s.to_string()).collect(),
    };
    let instance = runtime
        .create_instance(&request)
        .map_err(XrError::InstanceCreation)?;
    info!(
        application = %request.application.application_name,
        extensions = ?request.enabled_extensions,
        "created OpenXR instance"
    );
    Ok(instance)
}

pub fn resolve_system<R: XrRuntime>(runtime: &R, instance: InstanceHandle) -> XrResult<SystemId> {
    runtime
        .system(instance, sys::FormFactor::HEAD_MOUNTED_DISPLAY)
        .map_err(XrError::NoHmdAttached)
}

/// Diagnostics only: a runtime that cannot describe the system yields zeroed
/// properties.
pub fn query_system_properties<R: XrRuntime>(
    runtime: &R,
    instance: InstanceHandle,
    system: SystemId,
) -> SystemProperties {
    match runtime.system_properties(instance, system) {
        Ok(props) => {
            info!(
                name = %props.system_name,
                vendor_id = props.vendor_id,
                max_layers = props.max_layer_count,
                max_width = props.max_swapchain_image_width,
                max_height = props.max_swapchain_image_height,
                orientation_tracking = props.orientation_tracking,
                position_tracking = props.position_tracking,
                "HMD system"
            );
            props
        }
        Err(code) => {
            warn!(?code, "system properties unavailable");
            SystemProperties::default()
        }
    }
}

/// OpenGL version range the runtime accepts. Must run before session creation.
pub fn query_min_max_graphics_version<R: XrRuntime>(
    runtime: &R,
    table: &CapabilityTable<R>,
    instance: InstanceHandle,
    system: SystemId,
) -> XrResult<GraphicsVersionRange> {
    let requirements = table
        .graphics_requirements(runtime, instance, system)
        .ok_or_else(|| {
            XrError::UnsupportedRuntime("xrGetOpenGLGraphicsRequirementsKHR not resolved".into())
        })?
        .map_err(|code| XrError::runtime("xrGetOpenGLGraphicsRequirementsKHR", code))?;

    let range = GraphicsVersionRange::from(requirements);
    info!(min = %range.min, max = %range.max, "runtime OpenGL version range");
    Ok(range)
}
