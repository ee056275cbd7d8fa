//! Framesight - Main Application Entrypoint
//!
//! Parses command-line arguments, initializes logging and configuration, and
//! dispatches to the library's caller-facing operations. Every command prints
//! its result as JSON on stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use framesight::jobs::JobState;
use framesight::models::BatchAnalysisRequest;
use framesight::service::IngestOptions;
use framesight::{Config, VideoService};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

/// Samples videos into timestamped frames and asks a vision model about them.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Storage root holding `videos/` and `frames/` (overrides FRAMESIGHT_STORAGE_DIR)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a video and sample it into frames
    Ingest {
        /// Local video file to ingest
        #[arg(short, long, conflicts_with = "url", required_unless_present = "url")]
        file: Option<PathBuf>,

        /// Remote video URL to fetch and ingest
        #[arg(short, long)]
        url: Option<String>,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        /// Seconds between sampled frames
        #[arg(short, long)]
        interval: Option<f64>,
    },
    /// Show the processing status of a video
    Status { video_id: String },
    /// List the stored frame files of a video in chronological order
    Frames { video_id: String },
    /// Show one frame by its 1-based position
    Frame { video_id: String, frame_number: usize },
    /// Analyze a batch of frames; reads a JSON request from a file or `-` for stdin
    Analyze {
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Print stream properties of a video file
    Probe { path: PathBuf },
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum LogLevel {
    Error,
    Info,
    Debug,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn sampling_progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Sampling frames [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) [{elapsed_precise}<{eta}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    bar
}

fn read_request(path: &Path) -> Result<BatchAnalysisRequest> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read request from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?
    };
    serde_json::from_str(&raw).context("Invalid analysis request")
}

/// Runs one command. `Ok(false)` means the command completed but reported a failure.
fn run(args: Args) -> Result<bool> {
    let mut config = Config::from_env();
    if let Some(storage) = args.storage {
        config.storage_dir = storage;
    }
    info!("Initializing with config: {:?}", config);

    match args.command {
        Command::Ingest {
            file,
            url,
            title,
            description,
            interval,
        } => {
            let bar = sampling_progress_bar();
            let hook_bar = bar.clone();
            let service = VideoService::new(config)?.with_progress_hook(Arc::new(
                move |_id: &str, done: u64, total: u64| {
                    hook_bar.set_length(total);
                    hook_bar.set_position(done);
                },
            ));
            let options = IngestOptions {
                title,
                description,
                frame_interval: interval,
            };

            let video = match (file, url) {
                (Some(file), _) => service.ingest_path(&file, options)?,
                (None, Some(url)) => service.ingest_url(&url, options)?,
                (None, None) => anyhow::bail!("Either --file or --url is required"),
            };
            bar.enable_steady_tick(std::time::Duration::from_millis(100));

            // The process must outlive the background job.
            let outcome = service.wait_for(&video.id);
            bar.finish_and_clear();
            let ok = matches!(outcome, Some(JobState::Completed { .. }));
            let video = service.video(&video.id).unwrap_or(video);
            print_json(&video)?;
            print_json(&service.get_status(&video.id)?)?;
            Ok(ok)
        }
        Command::Status { video_id } => {
            print_json(&VideoService::new(config)?.get_status(&video_id)?)?;
            Ok(true)
        }
        Command::Frames { video_id } => {
            print_json(&VideoService::new(config)?.list_frames(&video_id)?)?;
            Ok(true)
        }
        Command::Frame {
            video_id,
            frame_number,
        } => {
            print_json(&VideoService::new(config)?.frame(&video_id, frame_number)?)?;
            Ok(true)
        }
        Command::Analyze { request } => {
            let request = read_request(&request)?;
            let result = VideoService::new(config)?.analyze(&request);
            print_json(&result)?;
            Ok(result.is_success())
        }
        Command::Probe { path } => {
            print_json(&VideoService::new(config)?.probe(&path)?)?;
            Ok(true)
        }
    }
}

fn main() {
    let args = Args::parse();

    // 1. Initialize Logger
    let log_level = match args.log_level {
        LogLevel::Error => "error",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    info!("Starting Framesight...");

    let code = {
        #[cfg(feature = "dhat-heap")]
        let _profiler = dhat::Profiler::new_heap();

        match run(args) {
            Ok(true) => 0,
            Ok(false) => 2,
            Err(e) => {
                error!("Application failed: {:#}", e);
                match e.downcast_ref::<framesight::Error>() {
                    Some(framesight::Error::NotFound(_))
                    | Some(framesight::Error::UnsupportedFormat(_))
                    | Some(framesight::Error::FileTooLarge { .. })
                    | Some(framesight::Error::InvalidInterval(_)) => 1,
                    _ => 2,
                }
            }
        }
    };
    std::process::exit(code);
}
