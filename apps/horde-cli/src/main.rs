use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use horde_pipeline::{FrameCoordinator, FrameOutcome, FrameStats, FrameTimer, HordeConfig};
use horde_render::{HeadlessBackend, HeadlessSwapchain, TrackCamera, DEMO_MODES};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "horde-cli", about = "Drive the horde tile pipeline headlessly")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Print the effective configuration as YAML
    Config {
        /// Configuration file to load instead of the defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Fly the demo camera over the tile grid for a number of frames
    Run {
        /// Number of frames to run
        #[arg(short, long, default_value = "600")]
        frames: u64,
        /// Configuration file (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override grid width
        #[arg(long)]
        tiles_x: Option<u32>,
        /// Override grid depth
        #[arg(long)]
        tiles_z: Option<u32>,
        /// Visibility worker count (default: hardware threads - 1)
        #[arg(long)]
        visibility_threads: Option<usize>,
        /// Regeneration worker count (default: hardware threads - 1)
        #[arg(long)]
        regen_threads: Option<usize>,
        #[arg(long, default_value = "3")]
        swap_images: u32,
        /// Simulated seconds per frame
        #[arg(long, default_value = "0.016")]
        dt: f32,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct RunSummary {
    tiles: usize,
    frames: u64,
    dropped: u64,
    avg_frame_us: u128,
    min_frame_us: u128,
    max_frame_us: u128,
    totals: FrameStats,
    buffers_destroyed: usize,
    blocks_destroyed: usize,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<HordeConfig> {
    match path {
        Some(path) => HordeConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(HordeConfig::default()),
    }
}

fn accumulate(total: &mut FrameStats, frame: &FrameStats) {
    total.queued_for_regen += frame.queued_for_regen;
    total.drawn_unchanged += frame.drawn_unchanged;
    total.regenerated += frame.regenerated;
    total.encode_failures += frame.encode_failures;
    total.released += frame.released;
    total.discarded += frame.discarded;
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_thread_names(true)
        .init();

    match cli.command {
        Commands::Info => {
            println!("horde-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", horde_common::crate_info());
            println!("world: {}", horde_world::crate_info());
            println!("render: {}", horde_render::crate_info());
            println!("pipeline: {}", horde_pipeline::crate_info());
            println!("camera modes: {}", DEMO_MODES.len());
        }
        Commands::Config { config } => {
            let config = load_config(config.as_ref())?;
            config.validate()?;
            print!("{}", config.to_yaml()?);
        }
        Commands::Run {
            frames,
            config,
            tiles_x,
            tiles_z,
            visibility_threads,
            regen_threads,
            swap_images,
            dt,
            json,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(x) = tiles_x {
                config.world.tiles_x = x;
            }
            if let Some(z) = tiles_z {
                config.world.tiles_z = z;
            }
            if visibility_threads.is_some() {
                config.workers.visibility_threads = visibility_threads;
            }
            if regen_threads.is_some() {
                config.workers.regen_threads = regen_threads;
            }

            let backend = Arc::new(HeadlessBackend::new());
            let mut coordinator =
                FrameCoordinator::start(config, backend, HeadlessSwapchain::new(swap_images))
                    .context("starting pipeline")?;
            let tiles = coordinator.world().len();
            tracing::info!(
                tiles,
                visibility = coordinator.visibility_threads(),
                regen = coordinator.regen_threads(),
                "running {frames} frames"
            );

            let mut camera = TrackCamera::new(coordinator.world().config().world_size(), 16.0 / 9.0);
            let mut timer = FrameTimer::new(frames.clamp(1, 10_000) as usize);
            let mut totals = FrameStats::default();
            let mut dropped = 0;
            let mut mode = camera.current_mode();

            for _ in 0..frames {
                let report = match coordinator.run_frame(camera.advance(dt)) {
                    Ok(report) => report,
                    Err(e) => {
                        let shutdown = coordinator.shutdown();
                        tracing::error!(
                            workers_panicked = shutdown.workers_panicked,
                            "pipeline stopped after a fatal error"
                        );
                        return Err(e).context("running frame");
                    }
                };
                if report.outcome == FrameOutcome::Dropped {
                    dropped += 1;
                }
                if camera.current_mode() != mode {
                    mode = camera.current_mode();
                    tracing::info!(frame = report.frame, mode, "camera mode changed");
                }
                accumulate(&mut totals, &report.stats);
                timer.record(report.elapsed);
            }

            let shutdown = coordinator.shutdown();
            let summary = RunSummary {
                tiles,
                frames,
                dropped,
                avg_frame_us: timer.average().as_micros(),
                min_frame_us: timer.min().as_micros(),
                max_frame_us: timer.max().as_micros(),
                totals,
                buffers_destroyed: shutdown.buffers_destroyed,
                blocks_destroyed: shutdown.blocks_destroyed,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Ran {frames} frames over {tiles} tiles ({dropped} dropped)");
                println!(
                    "Frame time: avg {:?}, min {:?}, max {:?}",
                    timer.average(),
                    timer.min(),
                    timer.max()
                );
                println!(
                    "Tiles: {} regenerated, {} drawn unchanged, {} discarded, {} encode failures",
                    totals.regenerated, totals.drawn_unchanged, totals.discarded, totals.encode_failures
                );
                println!(
                    "Shutdown: {} buffers and {} blocks destroyed",
                    shutdown.buffers_destroyed, shutdown.blocks_destroyed
                );
            }
        }
    }

    Ok(())
}
