//! # Mipview - Progressive Multi-Resolution Viewer
//!
//! Renders a short camera motion over procedural cache-backed volumes with the
//! adaptive progressive renderer and writes the final frame as PNG.
//!
//! ## Pipeline
//!
//! - synthetic volumes with an async tile loader per volume
//! - a painter thread driving `MultiResolutionRenderer::paint`
//! - the main task moving the camera and requesting repaints

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use mipview::cache::CacheControl;
use mipview::display::BufferedTarget;
use mipview::painter::{PainterThread, RepaintSignal};
use mipview::source::{LinearRangeConverter, SourceState};
use mipview::synthetic::{run_loader, SyntheticVolume};
use mipview::{Affine3, MultiResolutionRenderer, RenderPhase, RendererConfig, ViewerState};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Channel colors for successive sources
const SOURCE_COLORS: [u32; 4] = [0x00ff_40ff, 0x0040_ff40, 0x00ff_c040, 0x0040_c0ff];

/// Camera steps per second while moving
const MOTION_FPS: u64 = 60;

/// Longest wait for the last frame to complete
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (built ",
        env!("BUILD_DATE"),
        " for ",
        env!("TARGET_TRIPLE"),
        ")"
    )
}

#[derive(Parser)]
#[command(name = "mipview")]
#[command(about = "Adaptive multi-resolution progressive renderer for large image volumes")]
#[command(version, long_version = long_version())]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/mipview/mipview.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Canvas width in pixels
    #[arg(long, default_value_t = 800)]
    width: u32,

    /// Canvas height in pixels
    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Number of camera steps
    #[arg(long, default_value_t = 60)]
    frames: u32,

    /// Number of overlaid synthetic sources
    #[arg(long, default_value_t = 1)]
    sources: usize,

    /// Simulated latency of one cell load (ms)
    #[arg(long, default_value_t = 2)]
    latency_ms: u64,

    /// Where to write the final frame
    #[arg(short, long, default_value = "mipview.png")]
    output: PathBuf,
}

/// Forwards frame-level cache control to every volume
struct VolumeGroup(Vec<Arc<SyntheticVolume>>);

impl CacheControl for VolumeGroup {
    fn prepare_next_frame(&self) {
        self.0.iter().for_each(|v| v.prepare_next_frame());
    }

    fn reset_io_budget(&self, budget: &[Duration]) {
        self.0.iter().for_each(|v| v.reset_io_budget(budget));
    }
}

/// World-to-canvas transform looking at the center of `dims`, rotated by `angle`
fn camera(dims: [u64; 3], width: u32, height: u32, angle: f64) -> Affine3 {
    let center = dims.map(|d| d as f64 / 2.0);
    let zoom = (f64::from(width) / dims[0] as f64).min(f64::from(height) / dims[1] as f64) * 1.5;
    Affine3::translation(-center[0], -center[1], -center[2])
        .pre_concatenate(&Affine3::rotation_z(angle))
        .pre_concatenate(&Affine3::scaling(zoom, zoom, zoom))
        .pre_concatenate(&Affine3::translation(f64::from(width) / 2.0, f64::from(height) / 2.0, 0.0))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("🚀 Starting mipview");
    info!("📄 Version: {}", long_version());
    if let Some(commit) = option_env!("GIT_COMMIT") {
        info!("📄 Commit: {}", commit);
    }

    // Load configuration
    let config = match RendererConfig::load(&cli.config) {
        Ok(config) => {
            info!("✅ Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            error!("❌ Failed to load configuration: {}", e);
            info!("📝 Using default configuration");
            RendererConfig::default()
        }
    };

    let dims = [2048, 2048, 128];
    let volumes: Vec<Arc<SyntheticVolume>> = (0..cli.sources.max(1))
        .map(|i| Arc::new(SyntheticVolume::new(format!("volume-{}", i), dims, 6, i as u64 + 1)))
        .collect();
    let sources = volumes
        .iter()
        .enumerate()
        .map(|(i, volume)| {
            let color = SOURCE_COLORS[i % SOURCE_COLORS.len()];
            SourceState::new(volume.clone(), Arc::new(LinearRangeConverter::new(0.0, 1.0, color)))
                .with_volatile(volume.clone())
        })
        .collect();
    let viewer = Arc::new(RwLock::new(ViewerState::new(sources)));

    let target = Arc::new(BufferedTarget::new(cli.width, cli.height));
    let signal = RepaintSignal::new();
    let renderer = Arc::new(
        MultiResolutionRenderer::new(&config, target.clone(), Arc::new(signal.clone()))
            .context("Failed to create renderer")?
            .with_cache_control(Arc::new(VolumeGroup(volumes.clone()))),
    );

    let latency = Duration::from_millis(cli.latency_ms);
    let loaders: Vec<_> = volumes
        .iter()
        .map(|v| tokio::spawn(run_loader(v.clone(), latency, Arc::new(signal.clone()))))
        .collect();

    let painter = {
        let renderer = renderer.clone();
        let viewer = viewer.clone();
        PainterThread::spawn(signal.clone(), move || {
            let snapshot = viewer.read().clone();
            renderer.paint(&snapshot);
        })
        .context("Failed to spawn painter thread")?
    };

    info!(
        "🎥 Rendering {} camera steps of {} source(s) at {}x{}",
        cli.frames, volumes.len(), cli.width, cli.height
    );
    let step = Duration::from_millis(1000 / MOTION_FPS);
    for frame in 0..cli.frames {
        let angle = f64::from(frame) * 0.01;
        viewer.write().set_viewer_transform(camera(dims, cli.width, cli.height, angle));
        renderer.request_repaint();
        tokio::time::sleep(step).await;
    }

    let started = Instant::now();
    loop {
        let pending: usize = volumes.iter().map(|v| v.pending_loads()).sum();
        if renderer.phase() == RenderPhase::Idle && pending == 0 {
            break;
        }
        if started.elapsed() > SETTLE_TIMEOUT {
            warn!("⚠️ Final frame did not settle within {:?}", SETTLE_TIMEOUT);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    info!("✅ Final frame settled after {:?}", started.elapsed());

    let stats = renderer.render_stats();
    info!(
        "📊 {} renders ({} cancelled, {} over budget), avg {:?}, start scale {}",
        stats.total_renders,
        stats.cancelled_renders,
        stats.over_budget_renders,
        stats.avg_render_time,
        renderer.max_screen_scale_index()
    );
    let pool = renderer.pool_stats();
    info!(
        "📊 {} buffer acquisitions, {} starvations",
        pool.acquisitions, pool.starvations
    );

    target
        .export_png(&cli.output)
        .with_context(|| format!("Failed to export {}", cli.output.display()))?;

    painter.shutdown();
    for volume in &volumes {
        volume.shutdown_loader();
    }
    for loader in loaders {
        if let Err(e) = loader.await {
            warn!("⚠️ Loader task failed: {}", e);
        }
    }
    renderer.kill();

    info!("👋 mipview shut down");
    Ok(())
}
