//! Fire Plasma Terminal Demo
//!
//! Runs the fire engine and draws every frame in the terminal until a key is
//! pressed. Without a terminal (or with `--headless`) it runs a fixed number of
//! steps and prints statistics instead.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --bin fire-plasma
//! cargo run --release --bin fire-plasma -- --quality supersampled --backend host
//! cargo run --release --bin fire-plasma -- --headless --iterations 500 --dump
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`). While the display is up,
//! logs go to `--log-file` or nowhere.

mod display;

use clap::{Parser, ValueEnum};
use display::FireView;
use fire_plasma_core::palette::render_text;
use fire_plasma_core::{
    BackendPreference, ExecutionContext, FireConfig, FireEngine, FrameTimer, Quality, RandomFuel,
};
use ratatui::crossterm::event::{self, Event, KeyEventKind};
use ratatui::DefaultTerminal;
use std::error::Error;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum QualityArg {
    /// Simulate at display resolution
    Basic,
    /// Simulate 8x larger per axis and box-filter down
    Supersampled,
}

impl From<QualityArg> for Quality {
    fn from(arg: QualityArg) -> Self {
        match arg {
            QualityArg::Basic => Quality::Basic,
            QualityArg::Supersampled => Quality::Supersampled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    /// GPU if one passes its self-test, host otherwise
    Auto,
    /// Parallel host device
    Host,
    /// GPU only
    Gpu,
}

impl From<BackendArg> for BackendPreference {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => BackendPreference::Auto,
            BackendArg::Host => BackendPreference::Host,
            BackendArg::Gpu => BackendPreference::Gpu,
        }
    }
}

/// Scrolling fire simulation in the terminal
#[derive(Debug, Parser)]
#[command(name = "fire-plasma")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Grid width in cells
    #[arg(long, default_value_t = fire_plasma_core::config::DEFAULT_WIDTH)]
    width: u32,

    /// Grid height in cells
    #[arg(long, default_value_t = fire_plasma_core::config::DEFAULT_HEIGHT)]
    height: u32,

    /// Simulation quality
    #[arg(long, value_enum, default_value_t = QualityArg::Basic)]
    quality: QualityArg,

    /// Execution backend
    #[arg(long, value_enum, default_value_t = BackendArg::Auto)]
    backend: BackendArg,

    /// Host kernel threads (default: one per core)
    #[arg(long)]
    threads: Option<usize>,

    /// Run without the display even on a terminal
    #[arg(long)]
    headless: bool,

    /// Steps to run in headless mode
    #[arg(long, default_value_t = 100)]
    iterations: u32,

    /// Frame rate cap for the display, 0 for uncapped
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Seed the fuel generator for a reproducible run
    #[arg(long)]
    seed: Option<u64>,

    /// Print the final frame as text in headless mode
    #[arg(long)]
    dump: bool,
}

fn setup_logging(log_file: Option<&Path>, interactive: bool) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(path) = log_file {
        let file = std::fs::File::create(path)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else if !interactive {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .init();
    }
    // Interactive without a log file: logs would corrupt the screen, drop them
    Ok(())
}

/// Clear the working grid; a failure is logged and the run carries on, since
/// every update rebuilds the grid from fuel anyway
fn warm_up(engine: &mut FireEngine, ctx: &ExecutionContext) {
    if engine.init(ctx).is_err() {
        warn!("Starting from an uncleared grid");
    }
}

/// Advance one step and publish it; failures are logged by the engine
fn step(engine: &mut FireEngine, ctx: &ExecutionContext) -> bool {
    engine.update(ctx).and_then(|()| engine.flush_to_host()).is_ok()
}

fn run_interactive(
    terminal: &mut DefaultTerminal,
    ctx: &ExecutionContext,
    engine: &mut FireEngine,
    fps: u32,
) -> io::Result<()> {
    let frame_budget = if fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(1) / fps
    };
    let device = ctx.describe();
    let mut timer = FrameTimer::new();

    loop {
        let frame_start = Instant::now();

        timer.begin();
        step(engine, ctx);
        timer.end();

        let status = format!(
            " {} | {:?} | step {} | {:.2} ms/step | any key quits",
            device,
            engine.config().quality,
            engine.steps(),
            timer.average_frame_time_ms()
        );
        let dims = engine.logical_dims();
        terminal.draw(|frame| {
            display::draw(frame, FireView::new(engine.host_intensity(), dims), &status);
        })?;

        // Always poll at least once so a key press ends an uncapped run too
        let timeout = frame_budget
            .saturating_sub(frame_start.elapsed())
            .max(Duration::from_millis(1));
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(());
                }
            }
        }
    }
}

fn run_headless(
    ctx: &ExecutionContext,
    engine: &mut FireEngine,
    iterations: u32,
    dump: bool,
) {
    let mut timer = FrameTimer::new();
    let mut failed = 0_u32;
    let started = Instant::now();

    for _ in 0..iterations {
        timer.begin();
        if !step(engine, ctx) {
            failed += 1;
        }
        timer.end();
    }

    let stats = engine.snapshot().stats();
    println!("Device:     {}", ctx.describe());
    println!(
        "Grid:       {}x{} ({:?})",
        engine.logical_dims().width,
        engine.logical_dims().height,
        engine.config().quality
    );
    println!("Steps:      {} ({} failed)", engine.steps(), failed);
    println!(
        "Step time:  {:.3} ms average, {:.2} s total",
        timer.average_frame_time_ms(),
        started.elapsed().as_secs_f64()
    );
    println!(
        "Intensity:  min {:.2}, max {:.2}, mean {:.2}",
        stats.min, stats.max, stats.mean
    );

    if dump {
        println!();
        print!(
            "{}",
            render_text(engine.host_intensity(), engine.logical_dims().width as usize)
        );
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let interactive = !args.headless && io::stdout().is_terminal();
    setup_logging(args.log_file.as_deref(), interactive)?;

    let ctx = ExecutionContext::select(args.backend.into(), args.threads)?;
    let config = FireConfig::new(args.width, args.height, args.quality.into());
    let mut engine = match args.seed {
        Some(seed) => FireEngine::with_fuel_source(&ctx, config, RandomFuel::seeded(seed))?,
        None => FireEngine::new(&ctx, config)?,
    };
    warm_up(&mut engine, &ctx);

    if interactive {
        let mut terminal = ratatui::init();
        let result = run_interactive(&mut terminal, &ctx, &mut engine, args.fps);
        ratatui::restore();
        result?;
    } else {
        run_headless(&ctx, &mut engine, args.iterations, args.dump);
    }

    // Outstanding work must finish before the engine's buffers go away
    ctx.drain()?;
    let steps = engine.steps();
    drop(engine);
    info!("Shut down after {} steps", steps);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fire_plasma_core::ConstantFuel;

    #[test]
    fn test_failed_warm_up_does_not_stop_the_run() {
        let owner = ExecutionContext::host(Some(1)).unwrap();
        let stranger = ExecutionContext::host(Some(1)).unwrap();
        let config = FireConfig::new(4, 4, Quality::Basic);
        let mut engine = FireEngine::with_fuel_source(&owner, config, ConstantFuel(100.0)).unwrap();

        // init rejects the foreign context; the demo keeps going
        warm_up(&mut engine, &stranger);
        assert!(step(&mut engine, &owner));
        assert_eq!(engine.steps(), 1);
        assert_eq!(engine.host_intensity()[0], 100.0);
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["fire-plasma"]);
        assert_eq!(args.width, 128);
        assert_eq!(args.height, 32);
        assert_eq!(args.quality, QualityArg::Basic);
        assert_eq!(args.iterations, 100);
        assert!(!args.headless);
    }
}
