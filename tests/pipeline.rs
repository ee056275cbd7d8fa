use framesight::analysis::EMPTY_BATCH_ERROR;
use framesight::fetch::MediaFetcher;
use framesight::frame_sampler::FrameSampler;
use framesight::frame_store::FsFrameStore;
use framesight::models::{AnalysisResult, BatchAnalysisRequest, ProcessingState, TimeRange};
use framesight::video_processor::FrameSource;
use framesight::vision::{ContentBlock, ModelRequest, VisionModel};
use framesight::{Config, Error, ModelError, VideoService};
use image::{Rgb, RgbImage};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const VIDEO_ID: &str = "clip";

/// Thirty frames a second of solid grey, `duration` seconds long.
struct GreySource {
    duration: f64,
}

impl FrameSource for GreySource {
    fn frame_rate(&self) -> f64 {
        30.0
    }

    fn frame_count(&self) -> u64 {
        (self.duration * 30.0).round() as u64
    }

    fn seek_and_read(&mut self, position: u64) -> anyhow::Result<Option<RgbImage>> {
        if position >= self.frame_count() {
            return Ok(None);
        }
        Ok(Some(RgbImage::from_pixel(96, 64, Rgb([40, 40, 40]))))
    }
}

#[derive(Default)]
struct ScriptedModel {
    calls: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    fn calls(&self) -> Vec<ModelRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl VisionModel for ScriptedModel {
    fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        self.calls.lock().unwrap().push(request.clone());
        Ok("A grey screen that never changes.".to_string())
    }
}

struct Offline;

impl MediaFetcher for Offline {
    fn fetch(&self, url: &str, _dest_dir: &Path) -> framesight::Result<PathBuf> {
        Err(Error::Fetch(format!("offline: {url}")))
    }
}

/// A service whose store already holds the frames of a 25 second clip
/// sampled every 10 seconds.
fn sampled_service(root: &Path, model: Arc<ScriptedModel>) -> VideoService {
    let config = Config {
        storage_dir: root.to_path_buf(),
        ..Config::default()
    };
    let service = VideoService::with_parts(config, model, Arc::new(Offline)).unwrap();

    let store = FsFrameStore::new(service.config().frame_dir());
    let sampler = FrameSampler::new(&store, 10.0, 90).unwrap();
    let report = sampler.run(VIDEO_ID, &mut GreySource { duration: 25.0 }, |_, _| {});
    assert_eq!(report.frames_written(), 3);
    service
}

fn request(frame_ids: &[&str]) -> BatchAnalysisRequest {
    serde_json::from_value(json!({
        "video_id": VIDEO_ID,
        "frame_ids": frame_ids,
        "model": "gpt-4o",
        "sequence_prompt": "What is on screen?",
    }))
    .unwrap()
}

#[test]
fn sampled_frames_are_listed_in_time_order() {
    let root = tempfile::tempdir().unwrap();
    let service = sampled_service(root.path(), Arc::default());

    let names: Vec<String> = service
        .list_frames(VIDEO_ID)
        .unwrap()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["clip_0.000.jpg", "clip_10.000.jpg", "clip_20.000.jpg"]);

    let frames = service.frames(VIDEO_ID).unwrap();
    let timestamps: Vec<f64> = frames.iter().map(|f| f.timestamp).collect();
    assert_eq!(timestamps, [0.0, 10.0, 20.0]);
    assert_eq!(service.frame(VIDEO_ID, 2).unwrap().id, "10.000");
    assert!(matches!(service.frame(VIDEO_ID, 4), Err(Error::NotFound(_))));
    assert!(matches!(service.frame(VIDEO_ID, 0), Err(Error::NotFound(_))));
}

#[test]
fn status_of_a_sampled_video_is_completed_and_stable() {
    let root = tempfile::tempdir().unwrap();
    let service = sampled_service(root.path(), Arc::default());

    let first = service.get_status(VIDEO_ID).unwrap();
    let second = service.get_status(VIDEO_ID).unwrap();
    assert_eq!(first.status, ProcessingState::Completed);
    assert_eq!(first.progress, 100.0);
    assert!(first.message.as_deref().unwrap_or_default().contains('3'));
    assert_eq!(first, second);
}

#[test]
fn empty_batch_reports_an_error_without_calling_the_model() {
    let root = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::default());
    let service = sampled_service(root.path(), Arc::clone(&model));

    let result = service.analyze(&request(&[]));
    assert_eq!(
        result,
        AnalysisResult::Error {
            error: EMPTY_BATCH_ERROR.to_string(),
            frame_count: 0,
        }
    );
    assert!(model.calls().is_empty());
}

#[test]
fn full_batch_is_analyzed_in_time_order() {
    let root = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::default());
    let service = sampled_service(root.path(), Arc::clone(&model));

    let result = service.analyze(&request(&["20.000", "0.000", "10.000"]));
    assert_eq!(
        result,
        AnalysisResult::Success {
            sequence_analysis: "A grey screen that never changes.".to_string(),
            frame_count: 3,
            time_range: TimeRange { start: 0.0, end: 20.0 },
        }
    );

    let calls = model.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].model, "gpt-4o");
    let images = calls[0]
        .content
        .iter()
        .filter(|block| matches!(block, ContentBlock::ImageUrl { .. }))
        .count();
    assert_eq!(images, 3);
    match &calls[0].content[0] {
        ContentBlock::Text { text } => assert!(text.ends_with("What is on screen?")),
        other => panic!("prompt should come first, got {other:?}"),
    }
}

#[test]
fn missing_frames_are_dropped_from_the_batch() {
    let root = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::default());
    let service = sampled_service(root.path(), Arc::clone(&model));

    let result = service.analyze(&request(&["0.000", "15.000", "20.000"]));
    assert!(result.is_success());
    assert_eq!(result.frame_count(), 2);
    match result {
        AnalysisResult::Success { time_range, .. } => {
            assert_eq!(time_range, TimeRange { start: 0.0, end: 20.0 })
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[test]
fn frames_of_another_video_cannot_be_requested() {
    let root = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::default());
    let service = sampled_service(root.path(), Arc::clone(&model));

    let mut foreign = request(&["0.000", "10.000"]);
    foreign.video_id = "other".to_string();
    let result = service.analyze(&foreign);
    assert!(!result.is_success());
    assert_eq!(result.frame_count(), 0);
    assert!(model.calls().is_empty());
}
