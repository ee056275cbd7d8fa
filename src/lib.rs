//! Framesight - Core Library
//!
//! Samples videos into timestamp-labelled frames and asks a vision model
//! about ordered batches of them. The modules follow the pipeline: decoding,
//! sampling, storage, cataloguing, batch assembly and analysis, with
//! [`service::VideoService`] tying them together for callers.

use log::warn;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub mod analysis;
pub mod batch_assembler;
pub mod error;
pub mod fetch;
pub mod frame_catalog;
pub mod frame_sampler;
pub mod frame_store;
pub mod jobs;
pub mod label;
pub mod models;
pub mod service;
pub mod video_processor;
pub mod vision;

pub use error::{Error, ModelError, Result};
pub use service::VideoService;

/// Application configuration structure.
#[derive(Clone)]
pub struct Config {
    pub storage_dir: PathBuf,
    /// Seconds between sampled frames when a request does not say otherwise.
    pub default_frame_interval: f64,
    pub max_video_size_mb: u64,
    /// Accepted upload extensions, lowercase, without the dot.
    pub supported_formats: Vec<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub request_timeout: Duration,
    pub max_output_tokens: u32,
    /// Prior conversation turns kept in the prompt.
    pub history_window: usize,
    /// Long-edge limit for frames sent to the model; `None` sends them as stored.
    pub max_image_side: Option<u32>,
    pub jpeg_quality: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_dir: PathBuf::from("storage"),
            default_frame_interval: 10.0,
            max_video_size_mb: 500,
            supported_formats: ["mp4", "avi", "mov", "mkv"].iter().map(|s| s.to_string()).collect(),
            openai_api_key: None,
            openai_base_url: vision::DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(60),
            max_output_tokens: 500,
            history_window: 20,
            max_image_side: None,
            jpeg_quality: 90,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("storage_dir", &self.storage_dir)
            .field("default_frame_interval", &self.default_frame_interval)
            .field("max_video_size_mb", &self.max_video_size_mb)
            .field("supported_formats", &self.supported_formats)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .field("openai_base_url", &self.openai_base_url)
            .field("request_timeout", &self.request_timeout)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("history_window", &self.history_window)
            .field("max_image_side", &self.max_image_side)
            .field("jpeg_quality", &self.jpeg_quality)
            .finish()
    }
}

impl Config {
    /// Defaults overridden by the process environment, after loading `.env` if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        fn parsed<T: FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring {}={:?}: not a valid value", key, raw);
                    None
                }
            }
        }
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Config::default();
        if let Some(dir) = get("FRAMESIGHT_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(v) = parsed("FRAMESIGHT_FRAME_INTERVAL", get("FRAMESIGHT_FRAME_INTERVAL")) {
            config.default_frame_interval = v;
        }
        if let Some(v) = parsed("FRAMESIGHT_MAX_VIDEO_SIZE_MB", get("FRAMESIGHT_MAX_VIDEO_SIZE_MB")) {
            config.max_video_size_mb = v;
        }
        if let Some(formats) = get("FRAMESIGHT_SUPPORTED_FORMATS") {
            config.supported_formats = formats
                .split(',')
                .map(|f| f.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|f| !f.is_empty())
                .collect();
        }
        config.openai_api_key = get("OPENAI_API_KEY");
        if let Some(url) = get("OPENAI_BASE_URL") {
            config.openai_base_url = url;
        }
        if let Some(secs) = parsed::<u64>("FRAMESIGHT_REQUEST_TIMEOUT_SECS", get("FRAMESIGHT_REQUEST_TIMEOUT_SECS")) {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = parsed("FRAMESIGHT_MAX_OUTPUT_TOKENS", get("FRAMESIGHT_MAX_OUTPUT_TOKENS")) {
            config.max_output_tokens = v;
        }
        if let Some(v) = parsed("FRAMESIGHT_HISTORY_WINDOW", get("FRAMESIGHT_HISTORY_WINDOW")) {
            config.history_window = v;
        }
        if let Some(v) = parsed("FRAMESIGHT_MAX_IMAGE_SIDE", get("FRAMESIGHT_MAX_IMAGE_SIDE")) {
            config.max_image_side = Some(v);
        }
        if let Some(v) = parsed::<u8>("FRAMESIGHT_JPEG_QUALITY", get("FRAMESIGHT_JPEG_QUALITY")) {
            config.jpeg_quality = v.clamp(1, 100);
        }
        config
    }

    pub fn video_dir(&self) -> PathBuf {
        self.storage_dir.join("videos")
    }

    pub fn frame_dir(&self) -> PathBuf {
        self.storage_dir.join("frames")
    }

    /// Creates the storage tree.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.video_dir(), self.frame_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| Error::Storage { path: dir.clone(), source: e })?;
        }
        Ok(())
    }
}
