//! Frame Catalog
//!
//! Chronological view of a video's sampled frames, rebuilt from storage on
//! every call.

use crate::error::{Error, Result};
use crate::frame_store::FrameStore;
use crate::models::Frame;
use std::path::PathBuf;

pub struct FrameCatalog<'a> {
    store: &'a dyn FrameStore,
}

impl<'a> FrameCatalog<'a> {
    pub fn new(store: &'a dyn FrameStore) -> Self {
        FrameCatalog { store }
    }

    /// Frames of `video_id` ordered by timestamp, numbered from 1.
    /// Empty if nothing has been sampled yet.
    pub fn list(&self, video_id: &str) -> Result<Vec<Frame>> {
        let mut stored = self.store.list(video_id)?;
        stored.sort_by_key(|f| f.timestamp);

        Ok(stored
            .into_iter()
            .enumerate()
            .map(|(i, f)| Frame {
                id: f.timestamp.to_string(),
                video_id: f.video_id,
                timestamp: f.timestamp.as_secs_f64(),
                frame_number: i + 1,
                file_path: f.path,
                processed: false,
            })
            .collect())
    }

    /// The frame ranked `frame_number` in the current scan.
    pub fn get(&self, video_id: &str, frame_number: usize) -> Result<Frame> {
        self.list(video_id)?
            .into_iter()
            .find(|f| f.frame_number == frame_number)
            .ok_or_else(|| Error::NotFound(format!("frame {frame_number} of video {video_id}")))
    }

    pub fn frame_paths(&self, video_id: &str) -> Result<Vec<PathBuf>> {
        Ok(self.list(video_id)?.into_iter().map(|f| f.file_path).collect())
    }

    pub fn count(&self, video_id: &str) -> Result<usize> {
        Ok(self.store.list(video_id)?.len())
    }
}
