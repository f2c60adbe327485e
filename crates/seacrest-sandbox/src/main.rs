use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use winit::dpi::LogicalSize;

use seacrest_engine::device::{BackendKind, GpuInit, HeadlessConfig};
use seacrest_engine::logging::{init_logging, LoggingConfig, CLIENT_TARGET};
use seacrest_engine::window::{Runtime, RuntimeConfig};

mod sandbox;

use sandbox::{SandboxApp, SandboxOptions};

#[derive(Parser, Debug)]
#[command(author, version, about = "Seacrest engine sandbox")]
struct Arguments {
    /// Render on the WARP software rasterizer.
    #[arg(long)]
    warp: bool,
    /// Run on the simulated device without a window.
    #[arg(long, conflicts_with = "warp")]
    headless: bool,
    /// Frames to render in headless mode.
    #[arg(long, default_value_t = 120)]
    frames: u64,
    /// Frames the simulated GPU lags behind submission (headless only).
    #[arg(long, default_value_t = 1)]
    latency: usize,
    /// Headless: capture the last frame here.
    #[arg(long, value_parser)]
    screenshot: Option<PathBuf>,
    /// Where F12 screenshots go.
    #[arg(long, value_parser, default_value = "screenshots")]
    screenshot_dir: PathBuf,
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    /// Swapchain buffers, 2 or 3.
    #[arg(long, default_value_t = 2)]
    frame_count: u32,
    /// Present without waiting for vblank.
    #[arg(long)]
    no_vsync: bool,
    /// Force the native debug layer on (always on in debug builds).
    #[arg(long)]
    debug_layer: bool,
    /// Log filter in env_logger syntax; falls back to RUST_LOG.
    #[arg(long)]
    log: Option<String>,
    /// Record the application lifetime to this file on exit.
    #[arg(long, value_parser)]
    timer_log: Option<PathBuf>,
    /// Start with the triangle moving.
    #[arg(long)]
    animate: bool,
    /// Start with the clear color cycling.
    #[arg(long)]
    cycle_clear: bool,
}

fn main() -> Result<()> {
    let args = Arguments::parse();

    init_logging(LoggingConfig {
        env_filter: args.log.clone(),
        ..LoggingConfig::default()
    });

    let backend = if args.headless {
        BackendKind::Headless(HeadlessConfig {
            queue_latency: args.latency,
            ..HeadlessConfig::default()
        })
    } else if args.warp {
        BackendKind::Warp
    } else {
        BackendKind::Hardware
    };

    let defaults = GpuInit::default();
    let gpu_init = GpuInit {
        backend,
        frame_count: args.frame_count,
        sync_interval: if args.no_vsync { 0 } else { 1 },
        debug_layer: !args.headless && (args.debug_layer || defaults.debug_layer),
        ..defaults
    };

    let config = RuntimeConfig {
        initial_size: LogicalSize::new(f64::from(args.width), f64::from(args.height)),
        lifetime_log: args.timer_log.clone(),
        ..RuntimeConfig::default()
    };

    let options = SandboxOptions {
        animate: args.animate,
        cycle_clear: args.cycle_clear,
        screenshot_dir: args.screenshot_dir.clone(),
        final_screenshot: args
            .screenshot
            .clone()
            .filter(|_| args.headless)
            .map(|path| (args.frames.saturating_sub(1), path)),
    };
    let app = SandboxApp::new(options);

    if args.headless {
        let frames = Runtime::run_headless(config, gpu_init, args.frames, app)?;
        log::info!(target: CLIENT_TARGET, "rendered {frames} headless frames");
        Ok(())
    } else {
        Runtime::run(config, gpu_init, app)
    }
}
