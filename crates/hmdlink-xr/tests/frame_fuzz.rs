use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use hmdlink_xr::capability::{discover_extensions, ApiVersion, OPENGL_ENABLE_EXTENSION};
use hmdlink_xr::frame::FrameContext;
use hmdlink_xr::mock::{MockCall, MockConfig, MockRuntime};
use hmdlink_xr::session::Session;
use hmdlink_xr::swapchain::{allocate_swapchains, negotiate_format, SwapchainSet};
use hmdlink_xr::views::resolve_stereo_views;
use hmdlink_xr::{
    Eye, EyeTarget, FrameDriver, HostPlatform, NativeContext, RenderError, TickOutcome, VrSession,
    XrConfig,
};
use openxr::sys;

fn clear(_: &EyeTarget) -> Result<(), RenderError> {
    Ok(())
}

fn assert_paired(runtime: &MockRuntime, swapchains: &SwapchainSet) {
    for eye in Eye::BOTH {
        let sc = swapchains.eye(eye);
        let outstanding = runtime.outstanding_acquires(sc.handle());
        assert!(outstanding <= 1, "{eye} swapchain has {outstanding} outstanding acquires");
        assert_eq!(outstanding == 1, sc.acquired().is_some());
    }
}

#[test]
fn fuzz_frame_steps_never_double_acquire() {
    let mut rng = StdRng::seed_from_u64(0x6d64_6c6b);

    let mut runtime = MockRuntime::new(MockConfig::stereo(320, 240));
    let (instance, system) = runtime.bootstrap().unwrap();
    runtime.query_gl_requirements(instance, system).unwrap();
    let views = resolve_stereo_views(&runtime, instance, system).unwrap();
    let mut session = Session::create(
        &mut runtime,
        instance,
        system,
        HostPlatform::LinuxX11,
        &NativeContext::xlib(1, 2, 3),
    )
    .unwrap();
    let space = session.create_reference_space(&mut runtime).unwrap();
    let format = negotiate_format(&runtime, session.handle()).unwrap();
    let mut swapchains = allocate_swapchains(&mut runtime, session.handle(), &views, format).unwrap();
    session.begin(&mut runtime).unwrap();

    let ctx = FrameContext {
        session: &session,
        space,
        views: &views,
        image_wait_timeout: sys::Duration::INFINITE,
    };
    let mut driver = FrameDriver::new();
    let mut submitted = 0u64;

    for _ in 0..20_000 {
        let eye = if rng.gen_bool(0.5) { Eye::Left } else { Eye::Right };
        match rng.gen_range(0..8) {
            0 => {
                let _ = driver.wait_frame(&mut runtime, &ctx);
            }
            1 => {
                let _ = driver.begin_frame(&mut runtime, &ctx);
            }
            2 | 3 => {
                let _ = driver.acquire_image(&mut runtime, &ctx, &mut swapchains, eye);
            }
            4 | 5 => {
                let _ = driver.release_image(&mut runtime, &ctx, &mut swapchains, eye);
            }
            6 => {
                let _ = driver.locate_views(&mut runtime, &ctx);
            }
            _ => {
                if driver.end_frame(&mut runtime, &ctx, &swapchains).is_ok() {
                    submitted += 1;
                    for eye in Eye::BOTH {
                        assert!(swapchains.eye(eye).acquired().is_none());
                    }
                    assert_eq!(
                        runtime.count_calls(MockCall::AcquireSwapchainImage),
                        runtime.count_calls(MockCall::ReleaseSwapchainImage)
                    );
                }
            }
        }
        if rng.gen_ratio(1, 200) {
            driver.abort_frame(&mut runtime, Some(&mut swapchains));
        }
        assert_paired(&runtime, &swapchains);
    }

    assert!(submitted > 0);
    assert_eq!(runtime.submitted_frames().len() as u64, submitted);
}

#[test]
fn fuzz_frame_faults_never_leak_acquires() {
    let mut rng = StdRng::seed_from_u64(42);
    let frame_calls = [
        MockCall::WaitFrame,
        MockCall::BeginFrame,
        MockCall::AcquireSwapchainImage,
        MockCall::WaitSwapchainImage,
        MockCall::ReleaseSwapchainImage,
        MockCall::LocateViews,
        MockCall::EndFrame,
    ];
    let codes = [
        sys::Result::ERROR_RUNTIME_FAILURE,
        sys::Result::ERROR_TIME_INVALID,
        sys::Result::ERROR_CALL_ORDER_INVALID,
        sys::Result::ERROR_SESSION_LOST,
    ];

    let mut vr = VrSession::initialize_for(
        MockRuntime::new(MockConfig::stereo(640, 480)),
        XrConfig::default(),
        HostPlatform::Windows,
        &NativeContext::win32(0x1, 0x2),
    )
    .unwrap();
    assert_eq!(vr.tick(&mut clear).unwrap(), TickOutcome::Submitted);

    let mut dropped = 0u64;
    for _ in 0..2_000 {
        let inject = rng.gen_ratio(1, 4);
        if inject {
            let call = frame_calls[rng.gen_range(0..frame_calls.len())];
            let code = codes[rng.gen_range(0..codes.len())];
            vr.runtime_mut().fail_next(call, code);
        }

        let outcome = vr.tick(&mut clear).unwrap();
        if inject {
            assert_eq!(outcome, TickOutcome::Dropped);
            dropped += 1;
        } else {
            assert_eq!(outcome, TickOutcome::Submitted);
        }

        let swapchains = vr.swapchains().unwrap();
        for eye in Eye::BOTH {
            assert_eq!(vr.runtime().outstanding_acquires(swapchains.eye(eye).handle()), 0);
        }
    }
    assert_eq!(vr.stats().dropped, dropped);
    assert_eq!(vr.stats().submitted, 2_001 - dropped);
}

#[test]
fn fuzz_renderer_failures_drop_only_their_frame() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut vr = VrSession::initialize_for(
        MockRuntime::new(MockConfig::stereo(256, 256)),
        XrConfig::default(),
        HostPlatform::LinuxX11,
        &NativeContext::xlib(1, 2, 3),
    )
    .unwrap();

    for _ in 0..500 {
        let fail_eye = match rng.gen_range(0..4) {
            0 => Some(Eye::Left),
            1 => Some(Eye::Right),
            _ => None,
        };
        let mut renderer = |target: &EyeTarget| -> Result<(), RenderError> {
            if Some(target.eye) == fail_eye {
                Err(RenderError::new("lost GL context"))
            } else {
                Ok(())
            }
        };
        let outcome = vr.tick(&mut renderer).unwrap();
        let expected = if fail_eye.is_some() {
            TickOutcome::Dropped
        } else {
            TickOutcome::Submitted
        };
        assert_eq!(outcome, expected);
        assert!(vr.swapchains().unwrap().outstanding().is_empty());
    }
}

#[test]
fn fuzz_extension_enumeration_round_trips() {
    let mut rng = StdRng::seed_from_u64(1234);
    for _ in 0..500 {
        let count = rng.gen_range(0..64);
        let mut names: Vec<String> = (0..count)
            .map(|i| format!("XR_FUZZ_ext_{i}_{}", rng.gen::<u32>()))
            .collect();
        let insert_at = rng.gen_range(0..=names.len());
        names.insert(insert_at, OPENGL_ENABLE_EXTENSION.to_string());

        let mut config = MockConfig::stereo(64, 64);
        config.extensions = names.clone();
        let runtime = MockRuntime::new(config);

        let found = discover_extensions(&runtime).unwrap();
        assert_eq!(found.len(), names.len());
        assert!(names.iter().all(|name| found.contains(name)));
        assert_eq!(runtime.count_calls(MockCall::EnumerateInstanceExtensions), 2);
    }
}

#[test]
fn fuzz_version_decode() {
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..10_000 {
        let major: u16 = rng.gen();
        let minor: u16 = rng.gen();
        let patch: u16 = rng.gen();
        let low: u16 = rng.gen();
        let packed = (u64::from(major) << 48)
            | (u64::from(minor) << 32)
            | (u64::from(patch) << 16)
            | u64::from(low);
        assert_eq!(
            ApiVersion::decode(packed),
            ApiVersion {
                major,
                minor,
                patch
            }
        );
    }
}
