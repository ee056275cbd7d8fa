//! Data Model
//!
//! Records exchanged between the pipeline stages and handed back to callers.
//! Nothing here is persisted on its own: frames are rebuilt from the files in
//! the frame store and video records live only as long as the service.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Position of a sampled frame on the video's time axis, in whole milliseconds.
///
/// The text form is `<seconds>.<mmm>` with exactly three fractional digits
/// (`0.000`, `10.000`, `2.500`). It is what frame files carry in their names
/// and what callers use as a frame id, so parsing it back is lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameTimestamp(u64);

impl FrameTimestamp {
    pub const ZERO: FrameTimestamp = FrameTimestamp(0);

    pub fn from_millis(millis: u64) -> Self {
        FrameTimestamp(millis)
    }

    /// Rounds to the nearest millisecond.
    pub fn from_secs_f64(secs: f64) -> Result<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(Error::InvalidTimestamp(secs.to_string()));
        }
        Ok(FrameTimestamp((secs * 1000.0).round() as u64))
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Truncated seconds, as shown in the burned-in label.
    pub fn whole_seconds(self) -> u64 {
        self.0 / 1000
    }
}

impl fmt::Display for FrameTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1000, self.0 % 1000)
    }
}

impl FromStr for FrameTimestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidTimestamp(s.to_string());
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());

        let (whole, frac) = match s.split_once('.') {
            Some((whole, frac)) if frac.len() == 3 && digits(frac) => (whole, frac),
            Some(_) => return Err(invalid()),
            None => (s, "000"),
        };
        if !digits(whole) {
            return Err(invalid());
        }

        let secs: u64 = whole.parse().map_err(|_| invalid())?;
        let millis: u64 = frac.parse().map_err(|_| invalid())?;
        secs.checked_mul(1000)
            .and_then(|ms| ms.checked_add(millis))
            .map(FrameTimestamp)
            .ok_or_else(invalid)
    }
}

/// Where the video file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoSource {
    Upload,
    Remote,
}

/// An ingested video. Created before sampling starts; `processed` flips once
/// its sampling job completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub description: String,
    pub source: VideoSource,
    pub source_url: Option<String>,
    pub filename: String,
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Sampling interval in seconds.
    pub frame_interval: f64,
    pub processed: bool,
    pub duration: Option<f64>,
    pub frame_count: Option<u64>,
}

/// A sampled frame as seen by one catalog scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Canonical timestamp text; stable for the lifetime of the file.
    pub id: String,
    pub video_id: String,
    pub timestamp: f64,
    /// 1-based rank by timestamp within this scan. Not an identity.
    pub frame_number: usize,
    pub file_path: PathBuf,
    pub processed: bool,
}

/// Stream properties reported by [`crate::video_processor::probe`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub fps: f64,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

fn default_analysis_type() -> String {
    "sequence".to_string()
}

fn default_language() -> String {
    "English".to_string()
}

/// One request to analyze an ordered subset of a video's frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAnalysisRequest {
    pub video_id: String,
    pub frame_ids: Vec<String>,
    #[serde(default = "default_analysis_type")]
    pub analysis_type: String,
    #[serde(default)]
    pub sequence_prompt: String,
    #[serde(default)]
    pub description: String,
    /// Conversation so far; the last entry is the question being asked now.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

/// Response envelope of an analysis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AnalysisResult {
    Success {
        sequence_analysis: String,
        frame_count: usize,
        time_range: TimeRange,
    },
    Error {
        error: String,
        frame_count: usize,
    },
}

impl AnalysisResult {
    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisResult::Success { .. })
    }

    pub fn frame_count(&self) -> usize {
        match self {
            AnalysisResult::Success { frame_count, .. } | AnalysisResult::Error { frame_count, .. } => {
                *frame_count
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStatus {
    pub video_id: String,
    pub status: ProcessingState,
    pub progress: f64,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_text_form_is_lossless() {
        for millis in [0, 1, 999, 1000, 2500, 10_000, 86_400_123] {
            let ts = FrameTimestamp::from_millis(millis);
            let parsed: FrameTimestamp = ts.to_string().parse().unwrap();
            assert_eq!(parsed, ts);
        }
        assert_eq!(FrameTimestamp::from_millis(2500).to_string(), "2.500");
        assert_eq!(FrameTimestamp::from_millis(10_000).to_string(), "10.000");
    }

    #[test]
    fn timestamp_accepts_bare_seconds() {
        let ts: FrameTimestamp = "20".parse().unwrap();
        assert_eq!(ts.as_millis(), 20_000);
    }

    #[test]
    fn timestamp_rejects_malformed_text() {
        for bad in ["", ".500", "1.5", "1.5000", "-1.000", "+1.000", "1.abc", "ten", "1..000"] {
            assert!(bad.parse::<FrameTimestamp>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn timestamp_from_seconds_rounds_to_millis() {
        assert_eq!(FrameTimestamp::from_secs_f64(0.1).unwrap().as_millis(), 100);
        assert_eq!(FrameTimestamp::from_secs_f64(2.0004).unwrap().as_millis(), 2000);
        assert!(FrameTimestamp::from_secs_f64(-1.0).is_err());
        assert!(FrameTimestamp::from_secs_f64(f64::NAN).is_err());
    }

    #[test]
    fn label_seconds_are_truncated() {
        assert_eq!(FrameTimestamp::from_millis(2999).whole_seconds(), 2);
    }

    #[test]
    fn analysis_result_serializes_as_tagged_envelope() {
        let ok = AnalysisResult::Success {
            sequence_analysis: "a cat walks in".to_string(),
            frame_count: 2,
            time_range: TimeRange { start: 0.0, end: 10.0 },
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["time_range"]["end"], 10.0);

        let err = AnalysisResult::Error {
            error: "boom".to_string(),
            frame_count: 0,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["frame_count"], 0);
    }

    #[test]
    fn batch_request_fills_defaults() {
        let req: BatchAnalysisRequest = serde_json::from_str(
            r#"{"video_id":"v","frame_ids":["0.000"],"model":"gpt-4o"}"#,
        )
        .unwrap();
        assert_eq!(req.language, "English");
        assert_eq!(req.analysis_type, "sequence");
        assert!(req.messages.is_empty());
    }
}
