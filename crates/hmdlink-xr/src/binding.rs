//! Platform graphics binding for session creation.
//!
//! The host hands over the native handles of the GL context it already made
//! current. They stay opaque integers here; only the runtime backend turns them
//! back into pointers.

use crate::error::{XrError, XrResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    LinuxX11,
    Unsupported(&'static str),
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "linux") {
            Self::LinuxX11
        } else {
            Self::Unsupported(std::env::consts::OS)
        }
    }
}

/// Native handles supplied by the host's rendering context provider.
///
/// On Windows `surface` is the device context (`HDC`) and `gl_context` the
/// `HGLRC`. On X11 `surface` is the GLX drawable, `gl_context` the `GLXContext`
/// and `x_display` the `Display*`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeContext {
    pub gl_context: usize,
    pub surface: u64,
    pub x_display: usize,
    pub visual_id: u32,
    pub glx_fb_config: usize,
}

impl NativeContext {
    pub fn win32(h_dc: usize, h_glrc: usize) -> Self {
        Self {
            gl_context: h_glrc,
            surface: h_dc as u64,
            ..Self::default()
        }
    }

    pub fn xlib(x_display: usize, glx_drawable: u64, glx_context: usize) -> Self {
        Self {
            gl_context: glx_context,
            surface: glx_drawable,
            x_display,
            ..Self::default()
        }
    }

    /// Visual and framebuffer config of the drawable, when the host knows them.
    pub fn with_glx_visual(mut self, visual_id: u32, glx_fb_config: usize) -> Self {
        self.visual_id = visual_id;
        self.glx_fb_config = glx_fb_config;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsBinding {
    Win32 {
        h_dc: usize,
        h_glrc: usize,
    },
    Xlib {
        x_display: usize,
        visual_id: u32,
        glx_fb_config: usize,
        glx_drawable: u64,
        glx_context: usize,
    },
}

impl GraphicsBinding {
    /// Pick the binding for `platform`. Anything but Windows or X11 is fatal.
    pub fn select(platform: HostPlatform, ctx: &NativeContext) -> XrResult<Self> {
        match platform {
            HostPlatform::Windows => Ok(Self::Win32 {
                h_dc: ctx.surface as usize,
                h_glrc: ctx.gl_context,
            }),
            HostPlatform::LinuxX11 => Ok(Self::Xlib {
                x_display: ctx.x_display,
                visual_id: ctx.visual_id,
                glx_fb_config: ctx.glx_fb_config,
                glx_drawable: ctx.surface,
                glx_context: ctx.gl_context,
            }),
            HostPlatform::Unsupported(os) => Err(XrError::UnsupportedPlatform(format!(
                "no OpenGL graphics binding for {os}"
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Win32 { .. } => "win32",
            Self::Xlib { .. } => "xlib",
        }
    }
}
