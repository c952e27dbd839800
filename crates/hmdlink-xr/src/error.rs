use openxr::sys;
use thiserror::Error;

use crate::frame::{FramePhase, RenderError};
use crate::runtime::RuntimeCode;
use crate::views::Eye;

pub type XrResult<T> = Result<T, XrError>;

#[derive(Debug, Error)]
pub enum XrError {
    #[error("runtime does not offer required extension {name} ({} extensions offered)", .available.len())]
    MissingExtension {
        name: &'static str,
        available: Vec<String>,
    },
    #[error("unsupported runtime: {0}")]
    UnsupportedRuntime(String),
    #[error("instance creation failed: {0:?}")]
    InstanceCreation(RuntimeCode),
    #[error("no head-mounted display attached: {0:?}")]
    NoHmdAttached(RuntimeCode),
    #[error("unsupported view configuration {view_type:?}: {reason}")]
    UnsupportedViewConfiguration {
        view_type: sys::ViewConfigurationType,
        reason: String,
    },
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("session creation failed: {0:?}")]
    SessionCreation(RuntimeCode),
    #[error("session has not begun")]
    SessionNotBegun,
    #[error("session is already running")]
    SessionAlreadyRunning,
    #[error("swapchain creation failed for {eye} eye: {code:?}")]
    SwapchainCreation { eye: Eye, code: RuntimeCode },
    #[error("swapchain image enumeration failed for {eye} eye: {code:?}")]
    SwapchainImageEnumeration { eye: Eye, code: RuntimeCode },
    #[error(transparent)]
    Frame(#[from] FrameStepError),
    #[error("{call} failed: {code:?}")]
    Runtime {
        call: &'static str,
        code: RuntimeCode,
    },
    #[error(transparent)]
    Config(#[from] hmdlink_common::Error),
}

impl XrError {
    pub fn runtime(call: &'static str, code: RuntimeCode) -> Self {
        Self::Runtime { call, code }
    }
}

/// A failed step of the per-frame protocol. The frame is abandoned; the next
/// tick starts again at wait-frame.
#[derive(Debug, Error)]
#[error("{step} failed: {fault}")]
pub struct FrameStepError {
    pub step: FrameStep,
    pub fault: FrameFault,
}

impl FrameStepError {
    pub fn new(step: FrameStep, fault: FrameFault) -> Self {
        Self { step, fault }
    }

    pub fn runtime(step: FrameStep, code: RuntimeCode) -> Self {
        Self::new(step, FrameFault::Runtime(code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStep {
    WaitFrame,
    BeginFrame,
    AcquireImage(Eye),
    WaitImage(Eye),
    Render(Eye),
    ReleaseImage(Eye),
    LocateViews,
    EndFrame,
}

impl std::fmt::Display for FrameStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WaitFrame => f.write_str("wait-frame"),
            Self::BeginFrame => f.write_str("begin-frame"),
            Self::AcquireImage(eye) => write!(f, "acquire-image ({eye})"),
            Self::WaitImage(eye) => write!(f, "wait-image ({eye})"),
            Self::Render(eye) => write!(f, "render ({eye})"),
            Self::ReleaseImage(eye) => write!(f, "release-image ({eye})"),
            Self::LocateViews => f.write_str("locate-views"),
            Self::EndFrame => f.write_str("end-frame"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameFault {
    #[error("runtime returned {0:?}")]
    Runtime(RuntimeCode),
    #[error("called while the frame is {0}")]
    OutOfOrder(FramePhase),
    #[error("swapchain image is already acquired")]
    AlreadyAcquired,
    #[error("swapchain image is not acquired")]
    NotAcquired,
    #[error("swapchain image did not become available before the wait timed out")]
    ImageWaitTimeout,
    #[error("eye was already rendered this frame")]
    EyeAlreadyRendered,
    #[error("not every eye was released this frame")]
    EyesPending,
    #[error("runtime asked not to render this frame")]
    RenderNotRequested,
    #[error("runtime located {0} views, expected 2")]
    ViewCount(usize),
    #[error(transparent)]
    Render(#[from] RenderError),
}
