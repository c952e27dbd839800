//! Swapchain format negotiation and per-eye allocation.

use openxr::sys;
use tracing::{info, warn};

use crate::error::{FrameFault, FrameStep, FrameStepError, XrError, XrResult};
use crate::runtime::{
    enumerate_two_call, SessionHandle, SwapchainHandle, SwapchainRequest, ViewDescriptor, XrRuntime,
};
use crate::views::{Eye, ViewConfiguration, VIEW_COUNT};

pub fn gl_format_name(format: u32) -> Option<&'static str> {
    let name = match format {
        glow::RGBA8 => "GL_RGBA8",
        glow::SRGB8_ALPHA8 => "GL_SRGB8_ALPHA8",
        glow::RGB10_A2 => "GL_RGB10_A2",
        glow::RGBA16F => "GL_RGBA16F",
        glow::RGBA32F => "GL_RGBA32F",
        glow::R11F_G11F_B10F => "GL_R11F_G11F_B10F",
        glow::RGB8 => "GL_RGB8",
        glow::SRGB8 => "GL_SRGB8",
        glow::DEPTH_COMPONENT16 => "GL_DEPTH_COMPONENT16",
        glow::DEPTH_COMPONENT24 => "GL_DEPTH_COMPONENT24",
        glow::DEPTH_COMPONENT32F => "GL_DEPTH_COMPONENT32F",
        glow::DEPTH24_STENCIL8 => "GL_DEPTH24_STENCIL8",
        _ => return None,
    };
    Some(name)
}

/// Take the runtime's first listed format; runtimes list them in preference order.
pub fn negotiate_format<R: XrRuntime>(runtime: &R, session: SessionHandle) -> XrResult<u32> {
    let formats = enumerate_two_call(0u32, |capacity, count, buf| {
        runtime.enumerate_swapchain_formats(session, capacity, count, buf)
    })
    .map_err(|code| XrError::runtime("xrEnumerateSwapchainFormats", code))?;

    let Some(&format) = formats.first() else {
        return Err(XrError::runtime(
            "xrEnumerateSwapchainFormats",
            sys::Result::ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED,
        ));
    };
    match gl_format_name(format) {
        Some(name) => info!(format = name, offered = formats.len(), "swapchain format"),
        None => info!(format = format!("0x{format:x}"), offered = formats.len(), "swapchain format"),
    }
    Ok(format)
}

pub fn swapchain_request(view: &ViewDescriptor, format: u32) -> SwapchainRequest {
    SwapchainRequest {
        usage: sys::SwapchainUsageFlags::SAMPLED | sys::SwapchainUsageFlags::COLOR_ATTACHMENT,
        format,
        sample_count: view.recommended_sample_count,
        width: view.recommended_width,
        height: view.recommended_height,
        face_count: 1,
        array_size: 1,
        mip_count: 1,
    }
}

/// One eye's swapchain and the GL texture names backing it.
#[derive(Debug)]
pub struct EyeSwapchain {
    eye: Eye,
    handle: SwapchainHandle,
    format: u32,
    width: u32,
    height: u32,
    images: Vec<u32>,
    acquired: Option<u32>,
    waited: bool,
}

impl EyeSwapchain {
    pub fn eye(&self) -> Eye {
        self.eye
    }

    pub fn handle(&self) -> SwapchainHandle {
        self.handle
    }

    pub fn format(&self) -> u32 {
        self.format
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn images(&self) -> &[u32] {
        &self.images
    }

    /// Image index currently held by the application, if any.
    pub fn acquired(&self) -> Option<u32> {
        self.acquired
    }

    /// Texture name behind an acquired image index.
    pub fn texture(&self, index: u32) -> Option<u32> {
        self.images.get(index as usize).copied()
    }

    pub fn acquire<R: XrRuntime>(&mut self, runtime: &mut R) -> Result<u32, FrameStepError> {
        let step = FrameStep::AcquireImage(self.eye);
        if self.acquired.is_some() {
            return Err(FrameStepError::new(step, FrameFault::AlreadyAcquired));
        }
        let index = runtime
            .acquire_swapchain_image(self.handle)
            .map_err(|code| FrameStepError::runtime(step, code))?;
        self.acquired = Some(index);
        self.waited = false;
        Ok(index)
    }

    pub fn wait<R: XrRuntime>(
        &mut self,
        runtime: &mut R,
        timeout: sys::Duration,
    ) -> Result<(), FrameStepError> {
        let step = FrameStep::WaitImage(self.eye);
        if self.acquired.is_none() {
            return Err(FrameStepError::new(step, FrameFault::NotAcquired));
        }
        match runtime.wait_swapchain_image(self.handle, timeout) {
            Ok(()) => {
                self.waited = true;
                Ok(())
            }
            Err(sys::Result::TIMEOUT_EXPIRED) => {
                Err(FrameStepError::new(step, FrameFault::ImageWaitTimeout))
            }
            Err(code) => Err(FrameStepError::runtime(step, code)),
        }
    }

    /// Whether the acquired image has been waited on and may be released.
    pub fn waited(&self) -> bool {
        self.waited
    }

    pub fn release<R: XrRuntime>(&mut self, runtime: &mut R) -> Result<(), FrameStepError> {
        let step = FrameStep::ReleaseImage(self.eye);
        if self.acquired.is_none() {
            return Err(FrameStepError::new(step, FrameFault::NotAcquired));
        }
        runtime
            .release_swapchain_image(self.handle)
            .map_err(|code| FrameStepError::runtime(step, code))?;
        self.acquired = None;
        self.waited = false;
        Ok(())
    }
}

/// Both eyes' swapchains, left first.
#[derive(Debug)]
pub struct SwapchainSet {
    eyes: [EyeSwapchain; VIEW_COUNT],
}

impl SwapchainSet {
    pub fn eye(&self, eye: Eye) -> &EyeSwapchain {
        &self.eyes[eye.index()]
    }

    pub fn eye_mut(&mut self, eye: Eye) -> &mut EyeSwapchain {
        &mut self.eyes[eye.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &EyeSwapchain> {
        self.eyes.iter()
    }

    pub fn format(&self) -> u32 {
        self.eyes[0].format
    }

    /// Eyes holding an image that has not been released.
    pub fn outstanding(&self) -> Vec<Eye> {
        self.eyes
            .iter()
            .filter(|sc| sc.acquired.is_some())
            .map(|sc| sc.eye)
            .collect()
    }

    /// Release whatever is still acquired. An image that was never waited on
    /// is waited on without a timeout first, since the runtime only accepts
    /// the release of a waited image. Failures are logged and the image is
    /// treated as returned.
    pub fn force_release<R: XrRuntime>(&mut self, runtime: &mut R) {
        for sc in self.eyes.iter_mut().filter(|sc| sc.acquired.is_some()) {
            let result = if sc.waited {
                Ok(())
            } else {
                sc.wait(runtime, sys::Duration::INFINITE)
            };
            if let Err(e) = result.and_then(|()| sc.release(runtime)) {
                warn!(eye = %sc.eye, "force release failed: {e}");
                sc.acquired = None;
                sc.waited = false;
            }
        }
    }

    pub fn destroy<R: XrRuntime>(self, runtime: &mut R) -> XrResult<()> {
        let mut first_err = None;
        for sc in self.eyes {
            if let Err(code) = runtime.destroy_swapchain(sc.handle) {
                warn!(eye = %sc.eye, ?code, "xrDestroySwapchain failed");
                first_err.get_or_insert(XrError::runtime("xrDestroySwapchain", code));
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

fn allocate_eye<R: XrRuntime>(
    runtime: &mut R,
    session: SessionHandle,
    eye: Eye,
    view: &ViewDescriptor,
    format: u32,
) -> XrResult<EyeSwapchain> {
    let request = swapchain_request(view, format);
    let handle = runtime
        .create_swapchain(session, &request)
        .map_err(|code| XrError::SwapchainCreation { eye, code })?;

    let images = match enumerate_two_call(0u32, |capacity, count, buf| {
        runtime.enumerate_swapchain_images(handle, capacity, count, buf)
    }) {
        Ok(images) => images,
        Err(code) => {
            let _ = runtime.destroy_swapchain(handle);
            return Err(XrError::SwapchainImageEnumeration { eye, code });
        }
    };

    info!(
        %eye,
        width = request.width,
        height = request.height,
        samples = request.sample_count,
        images = images.len(),
        "allocated swapchain"
    );
    Ok(EyeSwapchain {
        eye,
        handle,
        format,
        width: request.width,
        height: request.height,
        images,
        acquired: None,
        waited: false,
    })
}

/// One swapchain per eye sized to the recommended view extent. A failure on
/// either eye leaves no swapchain behind.
pub fn allocate_swapchains<R: XrRuntime>(
    runtime: &mut R,
    session: SessionHandle,
    views: &ViewConfiguration,
    format: u32,
) -> XrResult<SwapchainSet> {
    let left = allocate_eye(runtime, session, Eye::Left, views.eye(Eye::Left), format)?;
    let right = match allocate_eye(runtime, session, Eye::Right, views.eye(Eye::Right), format) {
        Ok(right) => right,
        Err(e) => {
            if let Err(code) = runtime.destroy_swapchain(left.handle) {
                warn!(?code, "failed to destroy left swapchain after right eye failed");
            }
            return Err(e);
        }
    };
    Ok(SwapchainSet {
        eyes: [left, right],
    })
}
