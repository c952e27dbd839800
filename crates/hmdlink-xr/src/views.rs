//! Stereo view configuration.

use openxr::sys;
use tracing::info;

use crate::error::{XrError, XrResult};
use crate::runtime::{enumerate_two_call, InstanceHandle, SystemId, ViewDescriptor, XrRuntime};

/// Stereo only; there is no mono fallback.
pub const VIEW_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const BOTH: [Eye; VIEW_COUNT] = [Eye::Left, Eye::Right];

    pub const fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }

    pub const fn other(self) -> Eye {
        match self {
            Eye::Left => Eye::Right,
            Eye::Right => Eye::Left,
        }
    }
}

impl std::fmt::Display for Eye {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Eye::Left => f.write_str("left"),
            Eye::Right => f.write_str("right"),
        }
    }
}

/// Per-eye view descriptors, immutable once resolved.
#[derive(Debug, Clone, Copy)]
pub struct ViewConfiguration {
    view_type: sys::ViewConfigurationType,
    views: [ViewDescriptor; VIEW_COUNT],
}

impl ViewConfiguration {
    pub fn new(view_type: sys::ViewConfigurationType, views: [ViewDescriptor; VIEW_COUNT]) -> Self {
        Self { view_type, views }
    }

    pub fn view_type(&self) -> sys::ViewConfigurationType {
        self.view_type
    }

    pub fn views(&self) -> &[ViewDescriptor; VIEW_COUNT] {
        &self.views
    }

    pub fn eye(&self, eye: Eye) -> &ViewDescriptor {
        &self.views[eye.index()]
    }

    pub fn len(&self) -> usize {
        VIEW_COUNT
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

pub fn resolve_stereo_views<R: XrRuntime>(
    runtime: &R,
    instance: InstanceHandle,
    system: SystemId,
) -> XrResult<ViewConfiguration> {
    resolve_view_configuration(
        runtime,
        instance,
        system,
        sys::ViewConfigurationType::PRIMARY_STEREO,
    )
}

/// Resolve `view_type`, which must be offered by the system and describe
/// exactly two views.
pub fn resolve_view_configuration<R: XrRuntime>(
    runtime: &R,
    instance: InstanceHandle,
    system: SystemId,
    view_type: sys::ViewConfigurationType,
) -> XrResult<ViewConfiguration> {
    let unsupported = |reason: String| XrError::UnsupportedViewConfiguration { view_type, reason };

    let offered = enumerate_two_call(
        sys::ViewConfigurationType::PRIMARY_MONO,
        |capacity, count, buf| {
            runtime.enumerate_view_configurations(instance, system, capacity, count, buf)
        },
    )
    .map_err(|code| XrError::runtime("xrEnumerateViewConfigurations", code))?;
    if !offered.contains(&view_type) {
        return Err(unsupported(format!("runtime offers {offered:?}")));
    }

    let views = enumerate_two_call(ViewDescriptor::default(), |capacity, count, buf| {
        runtime.enumerate_view_configuration_views(instance, system, view_type, capacity, count, buf)
    })
    .map_err(|code| {
        if code == sys::Result::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED {
            unsupported(format!("{code:?}"))
        } else {
            XrError::runtime("xrEnumerateViewConfigurationViews", code)
        }
    })?;

    let views: [ViewDescriptor; VIEW_COUNT] = match views.as_slice() {
        [left, right] => [*left, *right],
        other => {
            return Err(unsupported(format!(
                "runtime describes {} views, expected {VIEW_COUNT}",
                other.len()
            )))
        }
    };

    for eye in Eye::BOTH {
        let view = &views[eye.index()];
        info!(
            %eye,
            recommended_width = view.recommended_width,
            recommended_height = view.recommended_height,
            max_width = view.max_width,
            max_height = view.max_height,
            recommended_samples = view.recommended_sample_count,
            max_samples = view.max_sample_count,
            "resolved view configuration"
        );
    }

    Ok(ViewConfiguration::new(view_type, views))
}
