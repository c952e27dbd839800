//! OpenXR session lifecycle and stereo frame loop for hosts that already own an
//! OpenGL context.
//!
//! Startup runs strictly downward through the modules:
//!
//! 1. [`capability`]: extension discovery and the extension function table
//! 2. [`instance`]: runtime instance, HMD system, GL version range
//! 3. [`views`]: stereo view configuration
//! 4. [`session`] and [`binding`]: graphics binding, session, reference space
//! 5. [`swapchain`]: format negotiation and per-eye swapchains
//!
//! after which [`frame`] drives wait → begin → acquire/render/release → locate →
//! end once per host tick. [`lifecycle::VrSession`] owns every handle and ties the
//! steps together. All runtime access goes through the [`runtime::XrRuntime`]
//! trait; [`mock::MockRuntime`] implements it for tests and dry runs.

#![forbid(unsafe_code)]

pub mod binding;
pub mod capability;
pub mod config;
pub mod error;
pub mod frame;
pub mod instance;
pub mod lifecycle;
pub mod mock;
pub mod runtime;
pub mod session;
pub mod status;
pub mod swapchain;
pub mod views;

pub use binding::{GraphicsBinding, HostPlatform, NativeContext};
pub use capability::{ApiVersion, CapabilityTable, GraphicsVersionRange, OPENGL_ENABLE_EXTENSION};
pub use config::XrConfig;
pub use error::{FrameFault, FrameStep, FrameStepError, XrError, XrResult};
pub use frame::{
    EyeRenderer, EyeTarget, FrameDriver, FrameOutcome, FramePhase, FrameStats, RenderError,
};
pub use lifecycle::{TickOutcome, VrSession};
pub use runtime::XrRuntime;
pub use status::{set_vr_status, vr_status};
pub use views::{Eye, ViewConfiguration, VIEW_COUNT};
