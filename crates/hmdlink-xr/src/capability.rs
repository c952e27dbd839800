//! Runtime extension discovery and the extension function table.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tracing::{error, info, warn};

use crate::error::{XrError, XrResult};
use crate::runtime::{
    enumerate_two_call, ExtensionFn, GraphicsRequirements, InstanceHandle, RuntimeResult, SystemId,
    XrRuntime,
};

pub const OPENGL_ENABLE_EXTENSION: &str = "XR_KHR_opengl_enable";

/// Extensions enabled on every instance.
pub const REQUIRED_EXTENSIONS: &[&str] = &[OPENGL_ENABLE_EXTENSION];

/// Enumerate the runtime's extensions and check the OpenGL interop extension
/// is among them.
pub fn discover_extensions<R: XrRuntime>(runtime: &R) -> XrResult<BTreeSet<String>> {
    let names = enumerate_two_call(String::new(), |capacity, count, buf| {
        runtime.enumerate_instance_extensions(capacity, count, buf)
    })
    .map_err(|code| XrError::runtime("xrEnumerateInstanceExtensionProperties", code))?;

    info!(count = names.len(), "runtime extensions");
    for name in &names {
        info!(extension = %name, "  available");
    }

    let available: BTreeSet<String> = names.into_iter().collect();
    for &required in REQUIRED_EXTENSIONS {
        if !available.contains(required) {
            let found: Vec<String> = available.iter().cloned().collect();
            error!(missing = required, found = ?found, "required extension not offered");
            return Err(XrError::MissingExtension {
                name: required,
                available: found,
            });
        }
    }
    Ok(available)
}

#[derive(Debug, Clone)]
pub struct NegotiatedExtensions {
    pub available: BTreeSet<String>,
    pub enabled: Vec<&'static str>,
}

/// Discovery as seen by startup: a missing mandatory extension means the
/// runtime cannot host an OpenGL session at all.
pub fn negotiate<R: XrRuntime>(runtime: &R) -> XrResult<NegotiatedExtensions> {
    let available = match discover_extensions(runtime) {
        Ok(available) => available,
        Err(XrError::MissingExtension { name, .. }) => {
            return Err(XrError::UnsupportedRuntime(format!(
                "{name} is required for OpenGL session interop"
            )))
        }
        Err(e) => return Err(e),
    };
    Ok(NegotiatedExtensions {
        available,
        enabled: REQUIRED_EXTENSIONS.to_vec(),
    })
}

/// A packed OpenXR version split into its 16-bit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ApiVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl ApiVersion {
    pub const fn decode(packed: u64) -> Self {
        Self {
            major: ((packed >> 48) & 0xffff) as u16,
            minor: ((packed >> 32) & 0xffff) as u16,
            patch: ((packed >> 16) & 0xffff) as u16,
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// OpenGL versions the runtime can composite from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsVersionRange {
    pub min: ApiVersion,
    pub max: ApiVersion,
}

impl From<GraphicsRequirements> for GraphicsVersionRange {
    fn from(req: GraphicsRequirements) -> Self {
        Self {
            min: ApiVersion::decode(req.min_api_version),
            max: ApiVersion::decode(req.max_api_version),
        }
    }
}

/// Extension entry points keyed by extension name, resolved once after the
/// instance exists.
pub struct CapabilityTable<R> {
    entries: HashMap<&'static str, ExtensionFn<R>>,
}

impl<R> fmt::Debug for CapabilityTable<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl<R> Default for CapabilityTable<R> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<R: XrRuntime> CapabilityTable<R> {
    pub fn populate(runtime: &R, instance: InstanceHandle, enabled: &[&'static str]) -> Self {
        let mut table = Self::default();
        for &name in enabled {
            match runtime.resolve_extension_fn(instance, name) {
                Some(func) => {
                    table.entries.insert(name, func);
                }
                None => warn!(extension = name, "no entry point resolved"),
            }
        }
        table
    }

    pub fn get(&self, name: &str) -> Option<ExtensionFn<R>> {
        self.entries.get(name).copied()
    }

    /// Invoke `xrGetOpenGLGraphicsRequirementsKHR`, if it was resolved.
    pub fn graphics_requirements(
        &self,
        runtime: &R,
        instance: InstanceHandle,
        system: SystemId,
    ) -> Option<RuntimeResult<GraphicsRequirements>> {
        match self.get(OPENGL_ENABLE_EXTENSION)? {
            ExtensionFn::OpenGlGraphicsRequirements(func) => Some(func(runtime, instance, system)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
