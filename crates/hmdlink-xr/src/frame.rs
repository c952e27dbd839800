//! Per-frame protocol: wait, begin, per-eye acquire/render/release, locate,
//! compose, end.
//!
//! [`FrameDriver`] exposes each step so a host can interleave its own work, and
//! [`FrameDriver::run_frame`] runs them all in order. A failed step abandons
//! the frame: held images are released and the driver returns to `Idle`.

use std::fmt;

use openxr::sys;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{FrameFault, FrameStep, FrameStepError, XrResult};
use crate::runtime::{
    FrameTiming, ProjectionLayer, ProjectionView, SpaceHandle, SubImage, View, XrRuntime,
};
use crate::session::Session;
use crate::swapchain::SwapchainSet;
use crate::views::{Eye, ViewConfiguration, VIEW_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Waited,
    Began,
    /// One eye's image is held by the application.
    Acquired(Eye),
    Located,
    Submitted,
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Waited => f.write_str("waited"),
            Self::Began => f.write_str("began"),
            Self::Acquired(eye) => write!(f, "acquired ({eye})"),
            Self::Located => f.write_str("located"),
            Self::Submitted => f.write_str("submitted"),
        }
    }
}

/// Failure reported by the host renderer.
#[derive(Debug, Error)]
#[error("render failed: {0}")]
pub struct RenderError(String);

impl RenderError {
    pub fn new(msg: impl fmt::Display) -> Self {
        Self(msg.to_string())
    }
}

/// The texture the host draws one eye into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EyeTarget {
    pub eye: Eye,
    pub image_index: u32,
    /// GL texture name.
    pub texture: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
}

/// Renders one eye into the acquired swapchain texture. Called with the GL
/// context current, between acquire and release.
pub trait EyeRenderer {
    fn render_eye(&mut self, target: &EyeTarget) -> Result<(), RenderError>;
}

impl<F> EyeRenderer for F
where
    F: FnMut(&EyeTarget) -> Result<(), RenderError>,
{
    fn render_eye(&mut self, target: &EyeTarget) -> Result<(), RenderError> {
        self(target)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FrameOutcome {
    Submitted {
        display_time: sys::Time,
        layer_views: usize,
    },
    /// The runtime asked for no rendering; an empty frame was submitted.
    Skipped { display_time: sys::Time },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub submitted: u64,
    pub skipped: u64,
    pub dropped: u64,
}

/// Handles a frame reads but never changes.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    pub session: &'a Session,
    pub space: SpaceHandle,
    pub views: &'a ViewConfiguration,
    pub image_wait_timeout: sys::Duration,
}

#[derive(Debug)]
pub struct FrameDriver {
    phase: FramePhase,
    timing: Option<FrameTiming>,
    released: [bool; VIEW_COUNT],
    located: Option<[View; VIEW_COUNT]>,
    stats: FrameStats,
}

impl Default for FrameDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDriver {
    pub fn new() -> Self {
        Self {
            phase: FramePhase::Idle,
            timing: None,
            released: [false; VIEW_COUNT],
            located: None,
            stats: FrameStats::default(),
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Timing of the frame in progress.
    pub fn timing(&self) -> Option<&FrameTiming> {
        self.timing.as_ref()
    }

    /// True between begin-frame and end-frame.
    pub fn in_flight(&self) -> bool {
        matches!(
            self.phase,
            FramePhase::Began | FramePhase::Acquired(_) | FramePhase::Located
        )
    }

    fn expect_phase(&self, step: FrameStep, ok: bool) -> Result<(), FrameStepError> {
        if ok {
            Ok(())
        } else {
            Err(FrameStepError::new(step, FrameFault::OutOfOrder(self.phase)))
        }
    }

    fn should_render(&self) -> bool {
        self.timing.map_or(false, |t| t.should_render)
    }

    fn display_time(&self) -> sys::Time {
        self.timing
            .map_or(sys::Time::from_nanos(0), |t| t.predicted_display_time)
    }

    pub fn wait_frame<R: XrRuntime>(
        &mut self,
        runtime: &mut R,
        ctx: &FrameContext<'_>,
    ) -> XrResult<FrameTiming> {
        ctx.session.ensure_running()?;
        let step = FrameStep::WaitFrame;
        self.expect_phase(
            step,
            matches!(self.phase, FramePhase::Idle | FramePhase::Submitted),
        )?;
        let timing = runtime
            .wait_frame(ctx.session.handle())
            .map_err(|code| FrameStepError::runtime(step, code))?;
        self.timing = Some(timing);
        self.released = [false; VIEW_COUNT];
        self.located = None;
        self.phase = FramePhase::Waited;
        Ok(timing)
    }

    pub fn begin_frame<R: XrRuntime>(
        &mut self,
        runtime: &mut R,
        ctx: &FrameContext<'_>,
    ) -> XrResult<()> {
        ctx.session.ensure_running()?;
        let step = FrameStep::BeginFrame;
        self.expect_phase(step, self.phase == FramePhase::Waited)?;
        runtime
            .begin_frame(ctx.session.handle())
            .map_err(|code| FrameStepError::runtime(step, code))?;
        self.phase = FramePhase::Began;
        Ok(())
    }

    /// Acquire and wait on `eye`'s next image. Only one eye is held at a time.
    pub fn acquire_image<R: XrRuntime>(
        &mut self,
        runtime: &mut R,
        ctx: &FrameContext<'_>,
        swapchains: &mut SwapchainSet,
        eye: Eye,
    ) -> XrResult<EyeTarget> {
        ctx.session.ensure_running()?;
        let step = FrameStep::AcquireImage(eye);
        self.expect_phase(step, self.phase == FramePhase::Began)?;
        if !self.should_render() {
            return Err(FrameStepError::new(step, FrameFault::RenderNotRequested).into());
        }
        if self.released[eye.index()] {
            return Err(FrameStepError::new(step, FrameFault::EyeAlreadyRendered).into());
        }

        let sc = swapchains.eye_mut(eye);
        let index = sc.acquire(runtime)?;
        self.phase = FramePhase::Acquired(eye);
        sc.wait(runtime, ctx.image_wait_timeout)?;

        let (width, height) = sc.extent();
        let texture = sc.texture(index).ok_or_else(|| {
            FrameStepError::runtime(step, sys::Result::ERROR_RUNTIME_FAILURE)
        })?;
        Ok(EyeTarget {
            eye,
            image_index: index,
            texture,
            width,
            height,
            format: sc.format(),
        })
    }

    pub fn release_image<R: XrRuntime>(
        &mut self,
        runtime: &mut R,
        ctx: &FrameContext<'_>,
        swapchains: &mut SwapchainSet,
        eye: Eye,
    ) -> XrResult<()> {
        ctx.session.ensure_running()?;
        let step = FrameStep::ReleaseImage(eye);
        self.expect_phase(step, self.phase == FramePhase::Acquired(eye))?;
        swapchains.eye_mut(eye).release(runtime)?;
        self.released[eye.index()] = true;
        self.phase = FramePhase::Began;
        Ok(())
    }

    /// Eye poses and fields of view at the predicted display time. Both eyes
    /// must have been released first.
    pub fn locate_views<R: XrRuntime>(
        &mut self,
        runtime: &mut R,
        ctx: &FrameContext<'_>,
    ) -> XrResult<[View; VIEW_COUNT]> {
        ctx.session.ensure_running()?;
        let step = FrameStep::LocateViews;
        self.expect_phase(step, self.phase == FramePhase::Began)?;
        if !self.released.iter().all(|&r| r) {
            return Err(FrameStepError::new(step, FrameFault::EyesPending).into());
        }

        let (state, views) = runtime
            .locate_views(
                ctx.session.handle(),
                ctx.views.view_type(),
                self.display_time(),
                ctx.space,
            )
            .map_err(|code| FrameStepError::runtime(step, code))?;
        let views: [View; VIEW_COUNT] = match views.as_slice() {
            [left, right] => [*left, *right],
            other => return Err(FrameStepError::new(step, FrameFault::ViewCount(other.len())).into()),
        };
        if !state.contains(sys::ViewStateFlags::ORIENTATION_VALID) {
            debug!("view orientation not valid this frame");
        }

        self.located = Some(views);
        self.phase = FramePhase::Located;
        Ok(views)
    }

    /// Submit the frame: one projection layer after a located frame, no layers
    /// when the runtime asked to skip rendering.
    pub fn end_frame<R: XrRuntime>(
        &mut self,
        runtime: &mut R,
        ctx: &FrameContext<'_>,
        swapchains: &SwapchainSet,
    ) -> XrResult<FrameOutcome> {
        ctx.session.ensure_running()?;
        let step = FrameStep::EndFrame;
        let display_time = self.display_time();

        let layers = match (self.phase, self.located) {
            (FramePhase::Located, Some(views)) => {
                vec![compose_projection_layer(ctx.space, &views, swapchains, ctx.views)]
            }
            (FramePhase::Began, _) if !self.should_render() => Vec::new(),
            _ => return Err(FrameStepError::new(step, FrameFault::OutOfOrder(self.phase)).into()),
        };

        runtime
            .end_frame(
                ctx.session.handle(),
                display_time,
                sys::EnvironmentBlendMode::OPAQUE,
                &layers,
            )
            .map_err(|code| FrameStepError::runtime(step, code))?;

        self.phase = FramePhase::Submitted;
        self.located = None;
        let outcome = match layers.first() {
            Some(layer) => {
                self.stats.submitted += 1;
                FrameOutcome::Submitted {
                    display_time,
                    layer_views: layer.views.len(),
                }
            }
            None => {
                self.stats.skipped += 1;
                FrameOutcome::Skipped { display_time }
            }
        };
        debug!(
            display_time = display_time.as_nanos(),
            ?outcome,
            "frame submitted"
        );
        Ok(outcome)
    }

    /// Abandon the frame in progress and release any held image. The next
    /// frame starts at wait-frame.
    pub fn abort_frame<R: XrRuntime>(&mut self, runtime: &mut R, swapchains: Option<&mut SwapchainSet>) {
        if !matches!(self.phase, FramePhase::Idle | FramePhase::Submitted) {
            self.stats.dropped += 1;
        }
        self.reset_frame(runtime, swapchains);
    }

    fn reset_frame<R: XrRuntime>(&mut self, runtime: &mut R, swapchains: Option<&mut SwapchainSet>) {
        if let Some(swapchains) = swapchains {
            let held = swapchains.outstanding();
            if !held.is_empty() {
                warn!(eyes = ?held, "releasing images of abandoned frame");
            }
            swapchains.force_release(runtime);
        }
        self.phase = FramePhase::Idle;
        self.timing = None;
        self.located = None;
        self.released = [false; VIEW_COUNT];
    }

    /// Run one complete frame, rendering each eye through `renderer`.
    pub fn run_frame<R, E>(
        &mut self,
        runtime: &mut R,
        ctx: &FrameContext<'_>,
        swapchains: &mut SwapchainSet,
        renderer: &mut E,
    ) -> XrResult<FrameOutcome>
    where
        R: XrRuntime,
        E: EyeRenderer + ?Sized,
    {
        ctx.session.ensure_running()?;
        match self.run_steps(runtime, ctx, swapchains, renderer) {
            Ok(outcome) => Ok(outcome),
            // A failed wait-frame never leaves Idle but still costs a frame.
            Err(e) => {
                self.stats.dropped += 1;
                self.reset_frame(runtime, Some(swapchains));
                Err(e)
            }
        }
    }

    fn run_steps<R, E>(
        &mut self,
        runtime: &mut R,
        ctx: &FrameContext<'_>,
        swapchains: &mut SwapchainSet,
        renderer: &mut E,
    ) -> XrResult<FrameOutcome>
    where
        R: XrRuntime,
        E: EyeRenderer + ?Sized,
    {
        let timing = self.wait_frame(runtime, ctx)?;
        self.begin_frame(runtime, ctx)?;

        if timing.should_render {
            for eye in Eye::BOTH {
                let target = self.acquire_image(runtime, ctx, swapchains, eye)?;
                renderer
                    .render_eye(&target)
                    .map_err(|e| FrameStepError::new(FrameStep::Render(eye), e.into()))?;
                self.release_image(runtime, ctx, swapchains, eye)?;
            }
            self.locate_views(runtime, ctx)?;
        }

        self.end_frame(runtime, ctx, swapchains)
    }
}

/// One projection layer in `space` covering both eyes, each eye showing the
/// whole recommended extent of its swapchain image.
pub fn compose_projection_layer(
    space: SpaceHandle,
    views: &[View; VIEW_COUNT],
    swapchains: &SwapchainSet,
    config: &ViewConfiguration,
) -> ProjectionLayer {
    let views = Eye::BOTH
        .iter()
        .map(|&eye| {
            let view = &views[eye.index()];
            let desc = config.eye(eye);
            ProjectionView {
                ty: sys::StructureType::COMPOSITION_LAYER_PROJECTION_VIEW,
                pose: view.pose,
                fov: view.fov,
                sub_image: SubImage {
                    swapchain: swapchains.eye(eye).handle(),
                    image_rect: sys::Rect2Di {
                        offset: sys::Offset2Di { x: 0, y: 0 },
                        extent: sys::Extent2Di {
                            width: rect_extent(desc.recommended_width),
                            height: rect_extent(desc.recommended_height),
                        },
                    },
                    image_array_index: 0,
                },
            }
        })
        .collect();

    ProjectionLayer {
        ty: sys::StructureType::COMPOSITION_LAYER_PROJECTION,
        layer_flags: sys::CompositionLayerFlags::EMPTY,
        space,
        views,
    }
}

/// Image rects are signed; an extent past `i32::MAX` saturates.
fn rect_extent(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{HostPlatform, NativeContext};
    use crate::error::XrError;
    use crate::mock::{MockCall, MockConfig, MockRuntime};
    use crate::runtime::ViewDescriptor;
    use crate::swapchain::{allocate_swapchains, negotiate_format};
    use crate::views::resolve_stereo_views;

    struct Rig {
        runtime: MockRuntime,
        session: Session,
        space: SpaceHandle,
        views: ViewConfiguration,
        swapchains: SwapchainSet,
    }

    impl Rig {
        fn new(config: MockConfig) -> Self {
            let mut runtime = MockRuntime::new(config);
            let (instance, system) = runtime.bootstrap().unwrap();
            runtime.query_gl_requirements(instance, system).unwrap();
            let views = resolve_stereo_views(&runtime, instance, system).unwrap();
            let mut session = Session::create(
                &mut runtime,
                instance,
                system,
                HostPlatform::Windows,
                &NativeContext::win32(0x1, 0x2),
            )
            .unwrap();
            let space = session.create_reference_space(&mut runtime).unwrap();
            let format = negotiate_format(&runtime, session.handle()).unwrap();
            let swapchains =
                allocate_swapchains(&mut runtime, session.handle(), &views, format).unwrap();
            session.begin(&mut runtime).unwrap();
            Self {
                runtime,
                session,
                space,
                views,
                swapchains,
            }
        }

        fn run(&mut self, driver: &mut FrameDriver) -> XrResult<FrameOutcome> {
            let ctx = FrameContext {
                session: &self.session,
                space: self.space,
                views: &self.views,
                image_wait_timeout: sys::Duration::INFINITE,
            };
            let mut renderer = |_: &EyeTarget| -> Result<(), RenderError> { Ok(()) };
            driver.run_frame(&mut self.runtime, &ctx, &mut self.swapchains, &mut renderer)
        }
    }

    #[test]
    fn test_full_frame_submits_two_views() {
        let mut rig = Rig::new(MockConfig::stereo(800, 600));
        let mut driver = FrameDriver::new();

        let outcome = rig.run(&mut driver).unwrap();
        assert!(matches!(outcome, FrameOutcome::Submitted { layer_views: 2, .. }));
        assert_eq!(driver.phase(), FramePhase::Submitted);
        assert_eq!(driver.stats().submitted, 1);

        let frames = rig.runtime.submitted_frames();
        assert_eq!(frames.len(), 1);
        let layer = &frames[0].layers[0];
        assert_eq!(layer.ty, sys::StructureType::COMPOSITION_LAYER_PROJECTION);
        assert_eq!(layer.space, rig.space);
        for (view, eye) in layer.views.iter().zip(Eye::BOTH) {
            assert_eq!(view.ty, sys::StructureType::COMPOSITION_LAYER_PROJECTION_VIEW);
            assert_eq!(view.sub_image.swapchain, rig.swapchains.eye(eye).handle());
            assert_eq!(view.sub_image.image_rect.extent.width, 800);
            assert_eq!(view.sub_image.image_rect.extent.height, 600);
        }
    }

    #[test]
    fn test_renderer_sees_backing_texture() {
        let mut rig = Rig::new(MockConfig::stereo(640, 480));
        let mut driver = FrameDriver::new();
        let mut seen = Vec::new();
        let mut renderer = |target: &EyeTarget| -> Result<(), RenderError> {
            seen.push(*target);
            Ok(())
        };
        let ctx = FrameContext {
            session: &rig.session,
            space: rig.space,
            views: &rig.views,
            image_wait_timeout: sys::Duration::INFINITE,
        };
        driver
            .run_frame(&mut rig.runtime, &ctx, &mut rig.swapchains, &mut renderer)
            .unwrap();

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].eye, Eye::Left);
        assert_eq!(seen[1].eye, Eye::Right);
        for target in &seen {
            let sc = rig.swapchains.eye(target.eye);
            assert_eq!(sc.texture(target.image_index), Some(target.texture));
            assert_eq!((target.width, target.height), (640, 480));
        }
    }

    #[test]
    fn test_should_render_false_submits_no_layers() {
        let mut config = MockConfig::stereo(800, 600);
        config.should_render = false;
        let mut rig = Rig::new(config);
        let mut driver = FrameDriver::new();

        let outcome = rig.run(&mut driver).unwrap();
        assert!(matches!(outcome, FrameOutcome::Skipped { .. }));
        assert_eq!(driver.stats().skipped, 1);
        assert!(rig.runtime.submitted_frames()[0].layers.is_empty());
        assert_eq!(rig.runtime.count_calls(MockCall::AcquireSwapchainImage), 0);
        assert_eq!(rig.runtime.count_calls(MockCall::LocateViews), 0);
    }

    #[test]
    fn test_steps_out_of_order() {
        let mut rig = Rig::new(MockConfig::stereo(800, 600));
        let mut driver = FrameDriver::new();
        let ctx = FrameContext {
            session: &rig.session,
            space: rig.space,
            views: &rig.views,
            image_wait_timeout: sys::Duration::INFINITE,
        };
        let runtime = &mut rig.runtime;

        let err = driver.begin_frame(runtime, &ctx).unwrap_err();
        assert!(matches!(
            err,
            XrError::Frame(FrameStepError { step: FrameStep::BeginFrame, fault: FrameFault::OutOfOrder(FramePhase::Idle) })
        ));

        driver.wait_frame(runtime, &ctx).unwrap();
        driver.begin_frame(runtime, &ctx).unwrap();
        let err = driver.locate_views(runtime, &ctx).unwrap_err();
        assert!(matches!(
            err,
            XrError::Frame(FrameStepError { fault: FrameFault::EyesPending, .. })
        ));
    }

    #[test]
    fn test_eye_cannot_render_twice() {
        let mut rig = Rig::new(MockConfig::stereo(800, 600));
        let mut driver = FrameDriver::new();
        let ctx = FrameContext {
            session: &rig.session,
            space: rig.space,
            views: &rig.views,
            image_wait_timeout: sys::Duration::INFINITE,
        };
        let runtime = &mut rig.runtime;
        let swapchains = &mut rig.swapchains;

        driver.wait_frame(runtime, &ctx).unwrap();
        driver.begin_frame(runtime, &ctx).unwrap();
        driver.acquire_image(runtime, &ctx, swapchains, Eye::Left).unwrap();

        let err = driver
            .acquire_image(runtime, &ctx, swapchains, Eye::Right)
            .unwrap_err();
        assert!(matches!(
            err,
            XrError::Frame(FrameStepError { fault: FrameFault::OutOfOrder(FramePhase::Acquired(Eye::Left)), .. })
        ));

        driver.release_image(runtime, &ctx, swapchains, Eye::Left).unwrap();
        let err = driver
            .acquire_image(runtime, &ctx, swapchains, Eye::Left)
            .unwrap_err();
        assert!(matches!(
            err,
            XrError::Frame(FrameStepError { fault: FrameFault::EyeAlreadyRendered, .. })
        ));
    }

    #[test]
    fn test_render_error_releases_image_and_drops_frame() {
        let mut rig = Rig::new(MockConfig::stereo(800, 600));
        let mut driver = FrameDriver::new();
        let ctx = FrameContext {
            session: &rig.session,
            space: rig.space,
            views: &rig.views,
            image_wait_timeout: sys::Duration::INFINITE,
        };
        let mut renderer = |target: &EyeTarget| {
            if target.eye == Eye::Right {
                Err(RenderError::new("shader compile failed"))
            } else {
                Ok(())
            }
        };

        let err = driver
            .run_frame(&mut rig.runtime, &ctx, &mut rig.swapchains, &mut renderer)
            .unwrap_err();
        assert!(matches!(
            err,
            XrError::Frame(FrameStepError { step: FrameStep::Render(Eye::Right), fault: FrameFault::Render(_) })
        ));
        assert_eq!(driver.phase(), FramePhase::Idle);
        assert_eq!(driver.stats().dropped, 1);
        assert!(rig.swapchains.outstanding().is_empty());
        for eye in Eye::BOTH {
            let handle = rig.swapchains.eye(eye).handle();
            assert_eq!(rig.runtime.outstanding_acquires(handle), 0);
        }
    }

    #[test]
    fn test_runtime_fault_then_recovery() {
        let mut rig = Rig::new(MockConfig::stereo(800, 600));
        let mut driver = FrameDriver::new();
        rig.runtime
            .fail_next(MockCall::LocateViews, sys::Result::ERROR_TIME_INVALID);

        let err = rig.run(&mut driver).unwrap_err();
        assert!(matches!(
            err,
            XrError::Frame(FrameStepError { step: FrameStep::LocateViews, fault: FrameFault::Runtime(_) })
        ));
        assert_eq!(driver.stats().dropped, 1);

        rig.run(&mut driver).unwrap();
        assert_eq!(driver.stats().submitted, 1);
        assert_eq!(rig.runtime.submitted_frames().len(), 1);
    }

    #[test]
    fn test_frames_require_running_session() {
        let mut rig = Rig::new(MockConfig::stereo(800, 600));
        rig.session.end(&mut rig.runtime).unwrap();
        let mut driver = FrameDriver::new();

        let err = rig.run(&mut driver).unwrap_err();
        assert!(matches!(err, XrError::SessionNotBegun));
        assert_eq!(rig.runtime.count_calls(MockCall::WaitFrame), 0);
        assert_eq!(driver.stats(), FrameStats::default());
    }

    #[test]
    fn test_wrong_view_count_from_runtime() {
        let mut rig = Rig::new(MockConfig::stereo(800, 600));
        rig.runtime.set_located_view_count(1);
        let mut driver = FrameDriver::new();

        let err = rig.run(&mut driver).unwrap_err();
        assert!(matches!(
            err,
            XrError::Frame(FrameStepError { fault: FrameFault::ViewCount(1), .. })
        ));
    }

    #[test]
    fn test_wait_frame_failure_counts_as_dropped() {
        let mut rig = Rig::new(MockConfig::stereo(800, 600));
        let mut driver = FrameDriver::new();
        rig.runtime
            .fail_next(MockCall::WaitFrame, sys::Result::ERROR_RUNTIME_FAILURE);

        let err = rig.run(&mut driver).unwrap_err();
        assert!(matches!(
            err,
            XrError::Frame(FrameStepError { step: FrameStep::WaitFrame, .. })
        ));
        assert_eq!(driver.phase(), FramePhase::Idle);
        assert_eq!(driver.stats().dropped, 1);

        rig.run(&mut driver).unwrap();
        assert_eq!(driver.stats().dropped, 1);
        assert_eq!(driver.stats().submitted, 1);
    }

    #[test]
    fn test_failed_image_wait_still_releases_image() {
        let mut rig = Rig::new(MockConfig::stereo(800, 600));
        let mut driver = FrameDriver::new();
        rig.runtime
            .fail_next(MockCall::WaitSwapchainImage, sys::Result::ERROR_RUNTIME_FAILURE);

        let err = rig.run(&mut driver).unwrap_err();
        assert!(matches!(
            err,
            XrError::Frame(FrameStepError { step: FrameStep::WaitImage(Eye::Left), fault: FrameFault::Runtime(_) })
        ));
        assert_eq!(driver.stats().dropped, 1);
        assert!(rig.swapchains.outstanding().is_empty());
        let left = rig.swapchains.eye(Eye::Left).handle();
        assert_eq!(rig.runtime.outstanding_acquires(left), 0);
        assert_eq!(rig.runtime.count_calls(MockCall::WaitSwapchainImage), 2);
        assert_eq!(rig.runtime.count_calls(MockCall::ReleaseSwapchainImage), 1);

        rig.run(&mut driver).unwrap();
        assert_eq!(driver.stats().submitted, 1);
    }

    #[test]
    fn test_image_wait_timeout_drops_frame() {
        let mut rig = Rig::new(MockConfig::stereo(800, 600));
        let mut driver = FrameDriver::new();
        rig.runtime
            .fail_next(MockCall::WaitSwapchainImage, sys::Result::TIMEOUT_EXPIRED);

        let err = rig.run(&mut driver).unwrap_err();
        assert!(matches!(
            err,
            XrError::Frame(FrameStepError { step: FrameStep::WaitImage(Eye::Left), fault: FrameFault::ImageWaitTimeout })
        ));
        assert_eq!(driver.stats().dropped, 1);
        assert!(rig.swapchains.outstanding().is_empty());
        assert!(rig.runtime.submitted_frames().is_empty());
    }

    #[test]
    fn test_oversized_extent_saturates() {
        let mut rig = Rig::new(MockConfig::stereo(800, 600));
        let mut driver = FrameDriver::new();
        let ctx = FrameContext {
            session: &rig.session,
            space: rig.space,
            views: &rig.views,
            image_wait_timeout: sys::Duration::INFINITE,
        };
        let runtime = &mut rig.runtime;
        let swapchains = &mut rig.swapchains;
        driver.wait_frame(runtime, &ctx).unwrap();
        driver.begin_frame(runtime, &ctx).unwrap();
        for eye in Eye::BOTH {
            driver.acquire_image(runtime, &ctx, swapchains, eye).unwrap();
            driver.release_image(runtime, &ctx, swapchains, eye).unwrap();
        }
        let located = driver.locate_views(runtime, &ctx).unwrap();

        let huge = ViewDescriptor {
            recommended_width: u32::MAX,
            recommended_height: i32::MAX as u32 + 1,
            max_width: u32::MAX,
            max_height: u32::MAX,
            recommended_sample_count: 1,
            max_sample_count: 1,
        };
        let config = ViewConfiguration::new(rig.views.view_type(), [huge, huge]);
        let layer = compose_projection_layer(rig.space, &located, swapchains, &config);
        for view in &layer.views {
            assert_eq!(view.sub_image.image_rect.extent.width, i32::MAX);
            assert_eq!(view.sub_image.image_rect.extent.height, i32::MAX);
        }
        assert_eq!(rect_extent(600), 600);
    }
}
