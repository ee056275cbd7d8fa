//! Video Service
//!
//! Caller-facing operations: ingest a video from an upload or a URL, follow
//! its sampling job, list its frames and run analyses over them.

use crate::analysis::AnalysisOrchestrator;
use crate::batch_assembler::BatchAssembler;
use crate::error::{Error, Result};
use crate::fetch::{MediaFetcher, YtDlpFetcher};
use crate::frame_catalog::FrameCatalog;
use crate::frame_sampler::{interval_millis, sample_video, FrameSampler};
use crate::frame_store::FsFrameStore;
use crate::jobs::{JobGuard, JobRegistry, JobState};
use crate::models::{
    AnalysisResult, BatchAnalysisRequest, Frame, MediaInfo, ProcessingState, Video, VideoSource,
    VideoStatus,
};
use crate::video_processor::{self, MediaOpener};
use crate::vision::{OpenAiVisionClient, VisionModel};
use crate::Config;
use chrono::Utc;
use log::{error, info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use uuid::Uuid;

/// Observer of sampling progress: `(video_id, ticks_done, ticks_total)`.
pub type ProgressHook = Arc<dyn Fn(&str, u64, u64) + Send + Sync>;

/// What a caller supplies alongside the media when ingesting.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Seconds between frames; the configured default when `None`.
    pub frame_interval: Option<f64>,
}

pub struct VideoService {
    config: Config,
    store: Arc<FsFrameStore>,
    model: Arc<dyn VisionModel>,
    fetcher: Arc<dyn MediaFetcher>,
    opener: MediaOpener,
    jobs: Arc<JobRegistry>,
    videos: Arc<Mutex<HashMap<String, Video>>>,
    progress_hook: Option<ProgressHook>,
}

impl VideoService {
    /// Service wired to the OpenAI client and `yt-dlp`.
    pub fn new(config: Config) -> Result<Self> {
        let model = OpenAiVisionClient::new(config.openai_api_key.clone(), config.request_timeout)?
            .with_base_url(config.openai_base_url.clone());
        Self::with_parts(config, Arc::new(model), Arc::new(YtDlpFetcher::default()))
    }

    pub fn with_parts(
        config: Config,
        model: Arc<dyn VisionModel>,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> Result<Self> {
        config.ensure_dirs()?;
        Ok(VideoService {
            store: Arc::new(FsFrameStore::new(config.frame_dir())),
            config,
            model,
            fetcher,
            opener: video_processor::ffmpeg_opener(),
            jobs: JobRegistry::new(),
            videos: Arc::new(Mutex::new(HashMap::new())),
            progress_hook: None,
        })
    }

    /// Replaces the ffmpeg reader used to validate and sample stored videos.
    pub fn with_media_opener(mut self, opener: MediaOpener) -> Self {
        self.opener = opener;
        self
    }

    pub fn with_progress_hook(mut self, hook: ProgressHook) -> Self {
        self.progress_hook = Some(hook);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stores uploaded bytes and starts sampling them in the background.
    pub fn ingest_upload(&self, bytes: &[u8], filename: &str, options: IngestOptions) -> Result<Video> {
        let id = Uuid::new_v4().to_string();
        let extension = self.check_format(filename)?;
        self.check_size(bytes.len() as u64)?;

        let path = self.config.video_dir().join(format!("{id}.{extension}"));
        fs::write(&path, bytes).map_err(|e| Error::storage(&path, e))?;
        self.start(id, filename, path, VideoSource::Upload, None, options)
    }

    /// Like [`ingest_upload`](Self::ingest_upload) for a file already on disk.
    pub fn ingest_path(&self, source: &Path, options: IngestOptions) -> Result<Video> {
        let id = Uuid::new_v4().to_string();
        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.clone());
        let extension = self.check_format(&filename)?;
        let size = fs::metadata(source).map_err(|e| Error::storage(source, e))?.len();
        self.check_size(size)?;

        let path = self.config.video_dir().join(format!("{id}.{extension}"));
        fs::copy(source, &path).map_err(|e| Error::storage(&path, e))?;
        self.start(id, &filename, path, VideoSource::Upload, None, options)
    }

    /// Downloads `url` and starts sampling it in the background.
    pub fn ingest_url(&self, url: &str, options: IngestOptions) -> Result<Video> {
        let id = Uuid::new_v4().to_string();
        let fetched = self.fetcher.fetch(url, &self.config.video_dir())?;
        let filename = fetched
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.clone());
        let checked = self.check_format(&filename).and_then(|extension| {
            let size = fs::metadata(&fetched).map_err(|e| Error::storage(&fetched, e))?.len();
            self.check_size(size)?;
            let path = self.config.video_dir().join(format!("{id}.{extension}"));
            fs::rename(&fetched, &path).map_err(|e| Error::storage(&path, e))?;
            Ok(path)
        });
        let path = match checked {
            Ok(path) => path,
            Err(e) => {
                let _ = fs::remove_file(&fetched);
                return Err(e);
            }
        };
        self.start(id, &filename, path, VideoSource::Remote, Some(url.to_string()), options)
    }

    fn check_format(&self, filename: &str) -> Result<String> {
        let extension = Path::new(filename)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if self.config.supported_formats.iter().any(|f| *f == extension) {
            Ok(extension)
        } else {
            Err(Error::UnsupportedFormat(filename.to_string()))
        }
    }

    fn check_size(&self, bytes: u64) -> Result<()> {
        let limit = self.config.max_video_size_mb.saturating_mul(1024 * 1024);
        if bytes > limit {
            return Err(Error::FileTooLarge {
                size_mb: bytes.div_ceil(1024 * 1024),
                limit_mb: self.config.max_video_size_mb,
            });
        }
        Ok(())
    }

    /// Validates the stored media, records the video and spawns its sampling job.
    /// On any failure the stored file is removed and no record is kept.
    fn start(
        &self,
        id: String,
        filename: &str,
        path: PathBuf,
        source: VideoSource,
        source_url: Option<String>,
        options: IngestOptions,
    ) -> Result<Video> {
        let interval = options.frame_interval.unwrap_or(self.config.default_frame_interval);
        let prepared = interval_millis(interval).and_then(|_| {
            let media = (self.opener)(&path)?;
            Ok((media.duration(), media.frame_count()))
        });
        let (duration, frame_count) = match prepared {
            Ok(probed) => probed,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(e);
            }
        };

        let video = Video {
            title: options.title.unwrap_or_else(|| filename.to_string()),
            description: options.description.unwrap_or_default(),
            source,
            source_url,
            filename: filename.to_string(),
            file_path: path,
            created_at: Utc::now(),
            frame_interval: interval,
            processed: false,
            duration: Some(duration),
            frame_count: Some(frame_count),
            id,
        };

        let guard = self.jobs.try_begin(&video.id)?;
        self.lock_videos().insert(video.id.clone(), video.clone());
        info!(
            "Ingested video {} ({:?}), sampling every {}s in the background",
            video.id, video.filename, video.frame_interval
        );
        self.spawn_sampling(video.clone(), guard);
        Ok(video)
    }

    /// Samples a known video again. Rejected while a pass for it is running.
    pub fn resample(&self, video_id: &str) -> Result<()> {
        let video = self
            .video(video_id)
            .ok_or_else(|| Error::NotFound(format!("video {video_id}")))?;
        let guard = self.jobs.try_begin(video_id)?;
        self.spawn_sampling(video, guard);
        Ok(())
    }

    fn spawn_sampling(&self, video: Video, guard: JobGuard) {
        let store = Arc::clone(&self.store);
        let videos = Arc::clone(&self.videos);
        let hook = self.progress_hook.clone();
        let opener = Arc::clone(&self.opener);
        let quality = self.config.jpeg_quality;

        thread::spawn(move || {
            guard.progress(0, 1);
            let sampler = match FrameSampler::new(store.as_ref(), video.frame_interval, quality) {
                Ok(sampler) => sampler,
                Err(e) => return guard.fail(e.to_string()),
            };
            let on_progress = |done: u64, total: u64| {
                guard.progress(done, total);
                if let Some(hook) = &hook {
                    hook(&video.id, done, total);
                }
            };

            match sample_video(&opener, &video.file_path, &video.id, &sampler, on_progress) {
                Ok(report) => {
                    if let Some(v) = videos
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get_mut(&video.id)
                    {
                        v.processed = true;
                    }
                    guard.complete(report.frames_written());
                }
                Err(e) => {
                    error!("Sampling of video {} failed: {}", video.id, e);
                    guard.fail(e.to_string());
                }
            }
        });
    }

    fn lock_videos(&self) -> std::sync::MutexGuard<'_, HashMap<String, Video>> {
        self.videos.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The record created at ingestion, if this service created it.
    pub fn video(&self, video_id: &str) -> Option<Video> {
        self.lock_videos().get(video_id).cloned()
    }

    /// Blocks until the sampling job of `video_id` has finished.
    pub fn wait_for(&self, video_id: &str) -> Option<JobState> {
        self.jobs.wait(video_id)
    }

    /// Job state when this service ran the job; otherwise inferred from
    /// whether any frames exist for the video.
    pub fn get_status(&self, video_id: &str) -> Result<VideoStatus> {
        if let Some(state) = self.jobs.state(video_id) {
            return Ok(state.to_status(video_id));
        }

        let count = self.catalog().count(video_id)?;
        Ok(if count == 0 {
            VideoStatus {
                video_id: video_id.to_string(),
                status: ProcessingState::Pending,
                progress: 0.0,
                message: Some("Processing not started or no frames extracted yet".to_string()),
            }
        } else {
            JobState::Completed { frames: count }.to_status(video_id)
        })
    }

    fn catalog(&self) -> FrameCatalog<'_> {
        FrameCatalog::new(self.store.as_ref())
    }

    pub fn list_frames(&self, video_id: &str) -> Result<Vec<PathBuf>> {
        self.catalog().frame_paths(video_id)
    }

    pub fn frames(&self, video_id: &str) -> Result<Vec<Frame>> {
        self.catalog().list(video_id)
    }

    pub fn frame(&self, video_id: &str, frame_number: usize) -> Result<Frame> {
        self.catalog().get(video_id, frame_number)
    }

    /// Resolves the requested frames and asks the model about them.
    /// Always returns an envelope; failures are reported inside it.
    pub fn analyze(&self, request: &BatchAnalysisRequest) -> AnalysisResult {
        let batch = BatchAssembler::new(self.store.as_ref())
            .with_max_image_side(self.config.max_image_side)
            .with_jpeg_quality(self.config.jpeg_quality)
            .assemble(&request.video_id, &request.frame_ids);
        if batch.len() < request.frame_ids.len() {
            warn!(
                "Only {} of {} requested frames of video {} were found",
                batch.len(),
                request.frame_ids.len(),
                request.video_id
            );
        }

        AnalysisOrchestrator::new(
            self.model.as_ref(),
            self.config.max_output_tokens,
            self.config.history_window,
        )
        .analyze(&batch, request)
    }

    pub fn probe(&self, path: &Path) -> Result<MediaInfo> {
        video_processor::probe(path)
    }
}
