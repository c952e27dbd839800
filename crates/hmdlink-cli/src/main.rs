//! hmdlink CLI tools: runtime probing, mock session simulation.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use openxr::sys;
use tracing::info;

use hmdlink_openxr::OpenXrRuntime;
use hmdlink_xr::capability::{negotiate, CapabilityTable};
use hmdlink_xr::instance::{
    create_instance, query_min_max_graphics_version, query_system_properties, resolve_system,
};
use hmdlink_xr::mock::{MockConfig, MockRuntime};
use hmdlink_xr::views::resolve_stereo_views;
use hmdlink_xr::{
    Eye, EyeTarget, FrameStats, HostPlatform, NativeContext, RenderError, TickOutcome, VrSession,
    XrConfig, XrRuntime,
};

#[derive(Parser, Debug)]
#[command(name = "hmdlink")]
#[command(about = "hmdlink CLI tools")]
struct Args {
    /// JSON config file, overlaid by HMDLINK_* environment variables
    #[arg(short, long, global = true, env = "HMDLINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query the installed OpenXR runtime without creating a session
    Probe,

    /// Drive the session and frame loop against the in-process mock runtime
    Simulate {
        /// Frames to submit before the runtime is asked to stop
        #[arg(short, long, default_value_t = 90)]
        frames: u64,

        /// Recommended per-eye width
        #[arg(long, default_value_t = 1440)]
        width: u32,

        /// Recommended per-eye height
        #[arg(long, default_value_t = 1600)]
        height: u32,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    hmdlink_common::init_tracing();

    let args = Args::parse();
    let config = XrConfig::load(args.config.as_deref()).context("loading config")?;

    match args.command {
        Command::Probe => probe(&config)?,
        Command::Simulate {
            frames,
            width,
            height,
        } => simulate(config, frames, width, height)?,
        Command::Version => {
            println!("hmdlink {}", env!("CARGO_PKG_VERSION"));
            println!("OpenXR API 1.0, OpenGL session interop");
        }
    }

    Ok(())
}

#[allow(unsafe_code)]
fn probe(config: &XrConfig) -> Result<()> {
    // SAFETY: probing never creates a session, so no GL handles are involved.
    let mut runtime = unsafe { OpenXrRuntime::load() }.context("loading OpenXR")?;

    let extensions = negotiate(&runtime)?;
    println!("Extensions ({}):", extensions.available.len());
    for name in &extensions.available {
        println!("  {name}");
    }

    let instance = create_instance(&mut runtime, config, &extensions)?;
    let report = probe_system(&runtime, instance, &extensions.enabled);
    if let Err(code) = runtime.destroy_instance(instance) {
        tracing::warn!(?code, "xrDestroyInstance failed");
    }
    report
}

fn probe_system<R: XrRuntime>(
    runtime: &R,
    instance: hmdlink_xr::runtime::InstanceHandle,
    enabled: &[&'static str],
) -> Result<()> {
    let system = resolve_system(runtime, instance)?;
    let props = query_system_properties(runtime, instance, system);
    println!("System:     {} (vendor {:#06x})", props.system_name, props.vendor_id);
    println!(
        "Limits:     {} layers, {}x{} max image",
        props.max_layer_count, props.max_swapchain_image_width, props.max_swapchain_image_height
    );

    let table = CapabilityTable::populate(runtime, instance, enabled);
    let gl = query_min_max_graphics_version(runtime, &table, instance, system)?;
    println!("OpenGL:     {} .. {}", gl.min, gl.max);

    let views = resolve_stereo_views(runtime, instance, system)?;
    for eye in Eye::BOTH {
        let view = views.eye(eye);
        println!(
            "{:<11} {}x{} recommended, {}x{} max, {} samples",
            format!("{eye}:"),
            view.recommended_width,
            view.recommended_height,
            view.max_width,
            view.max_height,
            view.recommended_sample_count
        );
    }
    Ok(())
}

/// Counters from one mock simulation run.
#[derive(Debug, Clone, Copy)]
struct SimulationReport {
    ticks: u64,
    rendered: u64,
    stats: FrameStats,
}

fn simulate(config: XrConfig, frames: u64, width: u32, height: u32) -> Result<()> {
    let report = run_simulation(config, frames, width, height)?;
    info!(ticks = report.ticks, "simulation finished");
    println!(
        "Submitted {} frames ({} eye renders), skipped {}, dropped {}",
        report.stats.submitted, report.rendered, report.stats.skipped, report.stats.dropped
    );
    println!("Status:    {}", hmdlink_xr::vr_status());
    Ok(())
}

/// Tick the mock session until it exits. Once `frames` have been submitted the
/// runtime is asked to stop, which also covers `frames == 0`.
fn run_simulation(config: XrConfig, frames: u64, width: u32, height: u32) -> Result<SimulationReport> {
    let runtime = MockRuntime::new(MockConfig::stereo(width, height));
    let ctx = NativeContext::xlib(0x1, 0x2, 0x3).with_glx_visual(0x21, 0x4);
    let mut vr = VrSession::initialize_for(runtime, config, HostPlatform::LinuxX11, &ctx)?;

    let mut rendered = 0u64;
    let mut renderer = |target: &EyeTarget| -> Result<(), RenderError> {
        tracing::trace!(eye = %target.eye, texture = target.texture, "render");
        rendered += 1;
        Ok(())
    };

    let mut ticks = 0u64;
    let mut stop_requested = false;
    loop {
        if !stop_requested && vr.stats().submitted >= frames {
            vr.runtime_mut().push_session_state(sys::SessionState::STOPPING);
            vr.runtime_mut().push_session_state(sys::SessionState::EXITING);
            stop_requested = true;
        }
        ticks += 1;
        if vr.tick(&mut renderer)? == TickOutcome::Exit {
            break;
        }
    }

    let stats = vr.stats();
    vr.shutdown()?;
    Ok(SimulationReport {
        ticks,
        rendered,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_zero_frames_exits() {
        let report = run_simulation(XrConfig::default(), 0, 64, 64).unwrap();
        assert_eq!(report.stats.submitted, 0);
        assert_eq!(report.rendered, 0);
        assert_eq!(report.ticks, 1);
    }

    #[test]
    fn test_simulate_submits_requested_frames() {
        let report = run_simulation(XrConfig::default(), 3, 64, 64).unwrap();
        assert_eq!(report.stats.submitted, 3);
        assert_eq!(report.stats.dropped, 0);
        assert_eq!(report.rendered, 6);
        assert_eq!(report.ticks, 4);
    }
}
