use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use stepwatch_core::{
    collect_doctor_info, format_interval_line, render_markdown_summary, run_ingest,
    BaselineMode, DecoderKind, DeviceWatcher, DisplayZone, IngestOptions, MarkerCheck,
    SystemVolumes, Volume, WaitOutcome, WatchOptions, DEFAULT_MARKER_PATH,
    DEFAULT_MONITOR_PATTERN,
};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "stepwatch",
    version,
    about = "Find a connected fitness tracker and report walking activity from its monitoring logs."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Wait for the tracker to be connected and print its mount point.
    Watch(WatchArgs),
    /// Read monitoring logs and print walking intervals.
    Steps(StepsArgs),
    /// Show detected volumes and which one is the tracker.
    Volumes(VolumesArgs),
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliDecoderKind {
    Auto,
    Fit,
    Json,
}

impl From<CliDecoderKind> for DecoderKind {
    fn from(value: CliDecoderKind) -> Self {
        match value {
            CliDecoderKind::Auto => DecoderKind::Auto,
            CliDecoderKind::Fit => DecoderKind::Fit,
            CliDecoderKind::Json => DecoderKind::Json,
        }
    }
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliBaselineMode {
    PreviousDelta,
    Cumulative,
}

impl From<CliBaselineMode> for BaselineMode {
    fn from(value: CliBaselineMode) -> Self {
        match value {
            CliBaselineMode::PreviousDelta => BaselineMode::PreviousDelta,
            CliBaselineMode::Cumulative => BaselineMode::Cumulative,
        }
    }
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliDisplayZone {
    Utc,
    Local,
}

impl From<CliDisplayZone> for DisplayZone {
    fn from(value: CliDisplayZone) -> Self {
        match value {
            CliDisplayZone::Utc => DisplayZone::Utc,
            CliDisplayZone::Local => DisplayZone::Local,
        }
    }
}

#[derive(Debug, Args)]
struct DeviceArgs {
    /// Path, relative to a volume root, whose presence identifies the tracker.
    #[arg(long, default_value = DEFAULT_MARKER_PATH, value_name = "PATH")]
    marker: PathBuf,

    /// Volume poll interval while waiting.
    #[arg(long, default_value_t = 1_000, value_name = "MS")]
    poll_interval_ms: u64,

    /// Return immediately if the tracker is not connected.
    #[arg(long)]
    no_wait: bool,
}

#[derive(Debug, Args)]
struct WatchArgs {
    #[command(flatten)]
    device: DeviceArgs,
}

#[derive(Debug, Args)]
struct StepsArgs {
    /// Read logs from this directory instead of detecting the tracker.
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(flatten)]
    device: DeviceArgs,

    /// Monitoring log glob, relative to the device root.
    #[arg(long, default_value = DEFAULT_MONITOR_PATTERN, value_name = "GLOB")]
    pattern: String,

    /// Match the glob case-sensitively.
    #[arg(long)]
    case_sensitive: bool,

    /// Log decoder (`auto` picks by file extension).
    #[arg(long, default_value = "auto")]
    decoder: CliDecoderKind,

    /// How the counter baseline advances between samples.
    #[arg(long, default_value = "previous-delta")]
    baseline: CliBaselineMode,

    /// Time zone used when printing timestamps.
    #[arg(long, default_value = "utc")]
    zone: CliDisplayZone,

    /// Optional JSON report output file.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Optional markdown summary output file.
    #[arg(long, value_name = "FILE")]
    md: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct VolumesArgs {
    /// Path, relative to a volume root, whose presence identifies the tracker.
    #[arg(long, default_value = DEFAULT_MARKER_PATH, value_name = "PATH")]
    marker: PathBuf,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch(args) => run_watch_command(args),
        Commands::Steps(args) => run_steps_command(args),
        Commands::Volumes(args) => run_volumes_command(args),
    }
}

fn run_watch_command(args: WatchArgs) -> Result<()> {
    let volume = locate_device(&args.device)?;
    println!("{}", volume.mount_point.display());
    Ok(())
}

fn run_steps_command(args: StepsArgs) -> Result<()> {
    let root = match args.root {
        Some(root) => root,
        None => locate_device(&args.device)?.mount_point,
    };

    let options = IngestOptions {
        root,
        pattern: args.pattern,
        decoder: args.decoder.into(),
        baseline: args.baseline.into(),
        case_insensitive: !args.case_sensitive,
    };
    let report = run_ingest(&options)?;
    let zone: DisplayZone = args.zone.into();

    for interval in &report.intervals {
        println!("{}", format_interval_line(interval, zone));
    }
    println!(
        "{} interval(s) from {} file(s), {} record(s) dropped, {} warning(s).",
        report.intervals.len(),
        report.files.len(),
        report.drops.total(),
        report.warnings.len()
    );
    for warning in &report.warnings {
        println!("Warning: {}", warning);
    }

    if let Some(output) = args.output {
        let payload =
            serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        fs::write(&output, payload)
            .with_context(|| format!("failed to write report to {}", output.display()))?;
        println!("Report written to {}", output.display());
    }

    if let Some(md_path) = args.md {
        let markdown = render_markdown_summary(&report, zone);
        fs::write(&md_path, markdown).with_context(|| {
            format!("failed to write markdown summary to {}", md_path.display())
        })?;
        println!("Markdown summary written to {}", md_path.display());
    }

    Ok(())
}

fn run_volumes_command(args: VolumesArgs) -> Result<()> {
    let info = collect_doctor_info(&MarkerCheck::new(args.marker))?;
    println!("OS: {} ({})", info.os, info.arch);
    if let Some(current_dir) = info.current_dir {
        println!("Current directory: {}", current_dir);
    }
    println!("Marker path: {}", info.marker_path);
    println!("Detected volumes: {}", info.volumes.len());
    for status in &info.volumes {
        let volume = &status.volume;
        println!(
            "- {} [{}] label={} type={} fs={} target={}",
            volume.id,
            volume.mount_point.display(),
            volume.label,
            volume.kind,
            volume.file_system.as_deref().unwrap_or("unknown"),
            status.is_target
        );
    }
    for note in info.notes {
        println!("Note: {}", note);
    }
    Ok(())
}

fn locate_device(args: &DeviceArgs) -> Result<Volume> {
    let marker = MarkerCheck::new(&args.marker);

    if args.no_wait {
        let watcher = DeviceWatcher::new(
            SystemVolumes,
            WatchOptions {
                marker,
                ..WatchOptions::default()
            },
        );
        return match watcher.find_target()? {
            Some(volume) => Ok(volume),
            None => bail!("unable to find connected device"),
        };
    }

    let interrupt = Arc::new(InterruptState::default());
    let handler_state = Arc::clone(&interrupt);
    if let Err(err) = ctrlc::set_handler(move || {
        if !handler_state.interrupt() {
            process::exit(INTERRUPTED_EXIT_CODE);
        }
    }) {
        warn!("failed to install Ctrl-C handler: {}", err);
    }

    let options = WatchOptions {
        marker,
        poll_interval_ms: args.poll_interval_ms,
        cancel_flag: Some(Arc::clone(&interrupt.cancel)),
        ..WatchOptions::default()
    };
    let watcher = DeviceWatcher::new(SystemVolumes, options);
    let outcome = watcher.wait_for_target();
    interrupt.finish_wait();

    match outcome? {
        WaitOutcome::Found(volume) => Ok(volume),
        WaitOutcome::Cancelled => {
            error!("unable to find connected device");
            bail!("device not found: wait canceled before the device was connected")
        }
    }
}

const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Routes Ctrl-C to the device wait while it runs; afterwards the process
/// should just exit.
#[derive(Debug)]
struct InterruptState {
    cancel: Arc<AtomicBool>,
    waiting: AtomicBool,
}

impl Default for InterruptState {
    fn default() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            waiting: AtomicBool::new(true),
        }
    }
}

impl InterruptState {
    /// Returns false when no wait is in progress to absorb the interrupt.
    fn interrupt(&self) -> bool {
        if self.waiting.load(Ordering::SeqCst) {
            self.cancel.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn finish_wait(&self) {
        self.waiting.store(false, Ordering::SeqCst);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
