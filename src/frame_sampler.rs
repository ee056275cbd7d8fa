//! Frame Sampler
//!
//! Walks a video's time axis at a fixed interval, pulls one frame per tick,
//! stamps it with its timestamp and hands it to the frame store.

use crate::error::{Error, Result};
use crate::frame_store::FrameStore;
use crate::label::{burn_label, timestamp_label};
use crate::models::FrameTimestamp;
use crate::video_processor::{FrameSource, MediaOpener};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Outcome of one sampling pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplingReport {
    pub ticks_attempted: u64,
    pub timestamps: Vec<FrameTimestamp>,
    pub frame_paths: Vec<PathBuf>,
}

impl SamplingReport {
    pub fn frames_written(&self) -> usize {
        self.frame_paths.len()
    }
}

/// Slack for binary rounding, e.g. `0.1 * 1000.0`.
const MILLIS_TOLERANCE: f64 = 1e-6;

/// Converts an interval in seconds to whole milliseconds. Intervals that are
/// not positive or not a whole number of milliseconds are rejected, so every
/// tick is an exact multiple of the requested interval.
pub fn interval_millis(seconds: f64) -> Result<u64> {
    let millis = seconds * 1000.0;
    if !millis.is_finite() || (millis - millis.round()).abs() > MILLIS_TOLERANCE {
        return Err(Error::InvalidInterval(seconds));
    }
    match FrameTimestamp::from_secs_f64(seconds) {
        Ok(ts) if ts.as_millis() > 0 => Ok(ts.as_millis()),
        _ => Err(Error::InvalidInterval(seconds)),
    }
}

/// Tick instants `0, I, 2I, ...` strictly before `duration` seconds.
pub fn tick_timestamps(
    interval_ms: u64,
    duration: f64,
) -> impl Iterator<Item = FrameTimestamp> + Clone {
    (0u64..)
        .map(move |k| k.saturating_mul(interval_ms))
        .take_while(move |&ms| (ms as f64 / 1000.0) < duration)
        .map(FrameTimestamp::from_millis)
}

/// Encodes an RGB frame as JPEG.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).encode(
        img.as_raw(),
        img.width(),
        img.height(),
        ColorType::Rgb8,
    )?;
    Ok(bytes)
}

pub struct FrameSampler<'a> {
    store: &'a dyn FrameStore,
    interval_ms: u64,
    jpeg_quality: u8,
}

impl<'a> FrameSampler<'a> {
    pub fn new(store: &'a dyn FrameStore, interval_secs: f64, jpeg_quality: u8) -> Result<Self> {
        Ok(FrameSampler {
            store,
            interval_ms: interval_millis(interval_secs)?,
            jpeg_quality,
        })
    }

    /// Samples `source` for `video_id`. Ticks whose frame cannot be read,
    /// encoded or stored are skipped; they only shrink the report.
    ///
    /// `on_progress` receives `(ticks_done, ticks_total)` after every tick.
    pub fn run<S, P>(&self, video_id: &str, source: &mut S, mut on_progress: P) -> SamplingReport
    where
        S: FrameSource + ?Sized,
        P: FnMut(u64, u64),
    {
        let start_time = Instant::now();
        let fps = source.frame_rate();
        let duration = source.duration();
        let ticks = tick_timestamps(self.interval_ms, duration);
        let total = ticks.clone().count() as u64;

        info!(
            "Sampling video {} every {} ms over {:.2}s ({} ticks)",
            video_id, self.interval_ms, duration, total
        );

        let mut report = SamplingReport::default();
        for timestamp in ticks {
            report.ticks_attempted += 1;
            let position = (timestamp.as_secs_f64() * fps).round() as u64;

            match self.sample_tick(video_id, source, timestamp, position) {
                Ok(Some(path)) => {
                    report.timestamps.push(timestamp);
                    report.frame_paths.push(path);
                }
                Ok(None) => debug!("No frame at position {} ({}s), skipping", position, timestamp),
                Err(e) => warn!("Skipping tick {}s of video {}: {}", timestamp, video_id, e),
            }
            on_progress(report.ticks_attempted, total);
        }

        info!(
            "Sampling of {} complete in {:.2?}. Attempted {}, wrote {}.",
            video_id,
            start_time.elapsed(),
            report.ticks_attempted,
            report.frames_written()
        );
        report
    }

    fn sample_tick<S: FrameSource + ?Sized>(
        &self,
        video_id: &str,
        source: &mut S,
        timestamp: FrameTimestamp,
        position: u64,
    ) -> anyhow::Result<Option<PathBuf>> {
        let Some(mut frame) = source.seek_and_read(position)? else {
            return Ok(None);
        };
        burn_label(&mut frame, &timestamp_label(timestamp));
        let bytes = encode_jpeg(&frame, self.jpeg_quality)?;
        Ok(Some(self.store.put(video_id, timestamp, &bytes)?))
    }
}

/// Opens the video at `path` with `open` and samples it. Failing to open the
/// container is the only fatal error; nothing is written in that case.
pub fn sample_video<P: FnMut(u64, u64)>(
    open: &MediaOpener,
    path: &Path,
    video_id: &str,
    sampler: &FrameSampler<'_>,
    on_progress: P,
) -> Result<SamplingReport> {
    let mut source = open(path)?;
    Ok(sampler.run(video_id, source.as_mut(), on_progress))
}
