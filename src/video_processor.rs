//! Video Processing Module
//!
//! Opens video containers with the ffmpeg-next crate and hands out single
//! decoded frames by position.

use crate::error::Error;
use crate::models::MediaInfo;
use anyhow::{anyhow, Context, Result};
use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{flag::Flags, Context as ScalingContext};
use ffmpeg::util::frame::video::Video;
use ffmpeg_next as ffmpeg;
use image::{ImageBuffer, RgbImage};
use log::{debug, info};
use std::path::Path;
use std::sync::Arc;

/// `AV_TIME_BASE`: container-level timestamps are in microseconds.
const AV_TIME_BASE: f64 = 1_000_000.0;

/// Random access to the frames of a decoded video.
pub trait FrameSource {
    /// Frames per second.
    fn frame_rate(&self) -> f64;

    /// Total number of frames. May be an estimate for variable frame rate media.
    fn frame_count(&self) -> u64;

    /// Decodes the frame at `position`. `Ok(None)` means the stream ended first.
    fn seek_and_read(&mut self, position: u64) -> Result<Option<RgbImage>>;

    /// Length of the video in seconds.
    fn duration(&self) -> f64 {
        let fps = self.frame_rate();
        if fps > 0.0 {
            self.frame_count() as f64 / fps
        } else {
            0.0
        }
    }
}

/// Opens a video file as a [`FrameSource`].
pub type MediaOpener = Arc<dyn Fn(&Path) -> Result<Box<dyn FrameSource>, Error> + Send + Sync>;

/// The ffmpeg-backed opener used outside of tests.
pub fn ffmpeg_opener() -> MediaOpener {
    Arc::new(|path: &Path| -> Result<Box<dyn FrameSource>, Error> {
        Ok(Box::new(MediaReader::open(path)?))
    })
}

/// An open video file. Dropping it releases the demuxer, decoder and scaler.
pub struct MediaReader {
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ScalingContext,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    /// Presentation time of the first frame, in stream time base units.
    start_pts: i64,
    frame_rate: f64,
    frame_count: u64,
}

impl MediaReader {
    /// Opens `path`, failing with [`Error::MediaOpen`] if no video stream can be decoded.
    pub fn open(path: &Path) -> Result<Self, Error> {
        Self::open_container(path).map_err(|e| Error::MediaOpen {
            path: path.to_path_buf(),
            reason: format!("{e:#}"),
        })
    }

    fn open_container(path: &Path) -> Result<Self> {
        ffmpeg::init().context("Failed to initialize FFmpeg")?;

        let ictx = input(path).context("Failed to open input file")?;
        let stream = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| anyhow!("Could not find video stream in file"))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let start_pts = match stream.start_time() {
            ffmpeg::ffi::AV_NOPTS_VALUE => 0,
            pts => pts,
        };

        let mut frame_rate = f64::from(stream.avg_frame_rate());
        if !(frame_rate.is_finite() && frame_rate > 0.0) {
            frame_rate = f64::from(stream.rate());
        }
        if !(frame_rate.is_finite() && frame_rate > 0.0) {
            return Err(anyhow!("Could not determine frame rate"));
        }

        // Container metadata first; fall back to duration times frame rate.
        let frame_count = match stream.frames() {
            n if n > 0 => n as u64,
            _ if ictx.duration() > 0 => {
                (ictx.duration() as f64 / AV_TIME_BASE * frame_rate).round() as u64
            }
            _ => return Err(anyhow!("Could not determine frame count from video metadata")),
        };

        let context_decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("Failed to create decoder context")?;
        let decoder = context_decoder
            .decoder()
            .video()
            .context("Failed to create video decoder")?;

        let scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )
        .context("Failed to create scaler")?;

        info!(
            "Opened {:?}: {}x{} @ {:.2}fps, {} frames",
            path,
            decoder.width(),
            decoder.height(),
            frame_rate,
            frame_count
        );

        Ok(MediaReader {
            ictx,
            decoder,
            scaler,
            stream_index,
            time_base,
            start_pts,
            frame_rate,
            frame_count,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.decoder.width(), self.decoder.height())
    }

    pub fn info(&self) -> MediaInfo {
        let (width, height) = self.dimensions();
        MediaInfo {
            fps: self.frame_rate,
            frame_count: self.frame_count,
            width,
            height,
            duration: self.duration(),
        }
    }

    fn start_secs(&self) -> f64 {
        self.start_pts as f64 * f64::from(self.time_base)
    }
}

impl FrameSource for MediaReader {
    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn seek_and_read(&mut self, position: u64) -> Result<Option<RgbImage>> {
        let target_secs = position as f64 / self.frame_rate + self.start_secs();
        let seek_ts = (target_secs * AV_TIME_BASE) as i64;
        self.ictx
            .seek(seek_ts, ..seek_ts)
            .with_context(|| format!("Failed to seek to frame {position}"))?;
        self.decoder.flush();
        let (start_pts, time_base, fps) = (self.start_pts, self.time_base, self.frame_rate);

        let mut decoded = Video::empty();
        let mut hit = false;
        for (stream, packet) in self.ictx.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("Failed to send packet to decoder")?;
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                if reached(&decoded, position, start_pts, time_base, fps) {
                    hit = true;
                    break;
                }
            }
            if hit {
                break;
            }
        }

        if !hit {
            self.decoder.send_eof().context("Failed to drain decoder")?;
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                if reached(&decoded, position, start_pts, time_base, fps) {
                    hit = true;
                    break;
                }
            }
        }

        if !hit {
            debug!("End of stream before frame {}", position);
            return Ok(None);
        }
        debug!(
            "Decoded frame {} for target {}",
            decoded
                .timestamp()
                .map(|pts| frame_index(pts, start_pts, time_base, fps))
                .unwrap_or(position),
            position
        );
        to_rgb_image(&mut self.scaler, &decoded).map(Some)
    }
}

/// True once a decoded frame is at or past the target position. Frames
/// without a timestamp are taken as they come.
fn reached(frame: &Video, position: u64, start_pts: i64, time_base: ffmpeg::Rational, fps: f64) -> bool {
    match frame.timestamp().or_else(|| frame.pts()) {
        Some(pts) => frame_index(pts, start_pts, time_base, fps) >= position,
        None => true,
    }
}

/// Frame index of a presentation timestamp, counted from the stream's first frame.
fn frame_index(pts: i64, start_pts: i64, time_base: ffmpeg::Rational, fps: f64) -> u64 {
    let secs = pts.saturating_sub(start_pts) as f64 * f64::from(time_base);
    (secs * fps).round().max(0.0) as u64
}

/// Converts a decoded frame to packed RGB, dropping any row padding.
fn to_rgb_image(scaler: &mut ScalingContext, decoded: &Video) -> Result<RgbImage> {
    let mut rgb_frame = Video::empty();
    scaler.run(decoded, &mut rgb_frame).context("Scaler failed")?;

    let frame_data = rgb_frame.data(0);
    let width = rgb_frame.width() as usize;
    let height = rgb_frame.height() as usize;
    let stride = rgb_frame.stride(0);

    if stride == 0 {
        return Err(anyhow!("Invalid frame stride"));
    }

    let mut pixels = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let start_index = y * stride;
        let end_index = start_index + (width * 3);
        if end_index > frame_data.len() {
            return Err(anyhow!("Frame data is smaller than expected"));
        }
        pixels.extend_from_slice(&frame_data[start_index..end_index]);
    }

    ImageBuffer::from_vec(width as u32, height as u32, pixels)
        .context("Failed to create image buffer from frame data")
}

/// Reads stream properties without decoding any frames.
pub fn probe(path: &Path) -> Result<MediaInfo, Error> {
    MediaReader::open(path).map(|reader| reader.info())
}
