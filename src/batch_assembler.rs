//! Batch Assembler
//!
//! Turns a caller's list of frame ids into a chronological batch of
//! embeddable images. Ids that do not resolve to a stored frame are logged
//! and left out; the batch is never rejected because of them.

use crate::error::Result;
use crate::frame_sampler::encode_jpeg;
use crate::frame_store::{is_valid_video_id, FrameStore, StoredFrame};
use crate::models::FrameTimestamp;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::imageops::FilterType;
use image::GenericImageView;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

pub const IMAGE_MIME: &str = "image/jpeg";

/// A frame ready to be sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedFrame {
    pub id: String,
    pub timestamp: f64,
    pub file_path: PathBuf,
    /// `data:image/jpeg;base64,...`
    pub image_url: String,
}

pub fn data_uri(bytes: &[u8]) -> String {
    format!("data:{};base64,{}", IMAGE_MIME, STANDARD.encode(bytes))
}

pub struct BatchAssembler<'a> {
    store: &'a dyn FrameStore,
    max_image_side: Option<u32>,
    jpeg_quality: u8,
}

impl<'a> BatchAssembler<'a> {
    pub fn new(store: &'a dyn FrameStore) -> Self {
        BatchAssembler {
            store,
            max_image_side: None,
            jpeg_quality: 90,
        }
    }

    /// Frames larger than `side` on their long edge are downscaled before encoding.
    pub fn with_max_image_side(mut self, side: Option<u32>) -> Self {
        self.max_image_side = side;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    /// Resolves `frame_ids` within `video_id` and returns them sorted by
    /// timestamp, whatever order they were requested in.
    pub fn assemble(&self, video_id: &str, frame_ids: &[String]) -> Vec<ResolvedFrame> {
        if !is_valid_video_id(video_id) {
            warn!("Rejecting frame lookup for invalid video id {:?}", video_id);
            return Vec::new();
        }
        let wanted: BTreeSet<FrameTimestamp> = frame_ids
            .iter()
            .filter_map(|id| match id.parse::<FrameTimestamp>() {
                Ok(ts) => Some(ts),
                Err(e) => {
                    warn!("Ignoring frame id {:?}: {}", id, e);
                    None
                }
            })
            .collect();

        let stored: Vec<StoredFrame> = wanted
            .into_iter()
            .filter_map(|ts| match self.store.resolve(video_id, ts) {
                Ok(Some(frame)) => Some(frame),
                Ok(None) => {
                    warn!("Frame {} of video {} not found, skipping", ts, video_id);
                    None
                }
                Err(e) => {
                    warn!("Could not resolve frame {} of video {}: {}", ts, video_id, e);
                    None
                }
            })
            .collect();

        let mut batch: Vec<ResolvedFrame> = stored
            .par_iter()
            .filter_map(|frame| match self.load(frame) {
                Ok(resolved) => Some(resolved),
                Err(e) => {
                    warn!("Error processing frame {:?}: {}", frame.path, e);
                    None
                }
            })
            .collect();
        batch.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        info!(
            "Assembled {} of {} requested frames for video {}",
            batch.len(),
            frame_ids.len(),
            video_id
        );
        batch
    }

    fn load(&self, frame: &StoredFrame) -> Result<ResolvedFrame> {
        let mut bytes = self.store.read(frame)?;

        if let Some(side) = self.max_image_side {
            let img = image::load_from_memory(&bytes)?;
            if img.width().max(img.height()) > side {
                debug!("Downscaling {:?} to fit {}px", frame.path, side);
                let scaled = img.resize(side, side, FilterType::Lanczos3).to_rgb8();
                bytes = encode_jpeg(&scaled, self.jpeg_quality)?;
            }
        }

        Ok(ResolvedFrame {
            id: frame.timestamp.to_string(),
            timestamp: frame.timestamp.as_secs_f64(),
            file_path: frame.path.clone(),
            image_url: data_uri(&bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_store::FsFrameStore;
    use image::{Rgb, RgbImage};

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn seeded_store(dir: &std::path::Path) -> FsFrameStore {
        let store = FsFrameStore::new(dir);
        let jpeg = encode_jpeg(&RgbImage::from_pixel(32, 24, Rgb([10, 20, 30])), 90).unwrap();
        for ms in [0, 10_000, 20_000, 30_000] {
            store.put("v", FrameTimestamp::from_millis(ms), &jpeg).unwrap();
        }
        store
    }

    #[test]
    fn output_is_chronological_for_every_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        let assembler = BatchAssembler::new(&store);

        let orders = [
            ids(&["0.000", "10.000", "20.000"]),
            ids(&["20.000", "0.000", "10.000"]),
            ids(&["10.000", "20.000", "0.000"]),
        ];
        for order in &orders {
            let batch = assembler.assemble("v", order);
            let stamps: Vec<f64> = batch.iter().map(|f| f.timestamp).collect();
            assert_eq!(stamps, vec![0.0, 10.0, 20.0]);
        }
    }

    #[test]
    fn unresolvable_ids_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        let batch = BatchAssembler::new(&store).assemble("v", &ids(&["10.000", "99.000", "0.000"]));
        let got: Vec<&str> = batch.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(got, vec!["0.000", "10.000"]);
    }

    #[test]
    fn malformed_and_foreign_ids_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        let assembler = BatchAssembler::new(&store);
        assert!(assembler.assemble("v", &ids(&["frame-one", "../etc"])).is_empty());
        assert!(assembler.assemble("other", &ids(&["0.000"])).is_empty());
        assert!(assembler.assemble("v", &[]).is_empty());
    }

    #[test]
    fn video_ids_cannot_reach_outside_the_frame_directory() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("frames");
        let store = seeded_store(&frames);
        let outside = dir.path().join("videos");
        std::fs::create_dir_all(&outside).unwrap();
        let jpeg = encode_jpeg(&RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])), 90).unwrap();
        std::fs::write(outside.join("x_0.000.jpg"), &jpeg).unwrap();

        let assembler = BatchAssembler::new(&store);
        assert!(assembler.assemble("../videos/x", &ids(&["0.000"])).is_empty());
        assert!(assembler.assemble("..\\videos\\x", &ids(&["0.000"])).is_empty());
        assert_eq!(assembler.assemble("v", &ids(&["0.000"])).len(), 1);
    }

    #[test]
    fn duplicate_ids_collapse() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        let batch = BatchAssembler::new(&store).assemble("v", &ids(&["20.000", "20", "20.000"]));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn payload_is_a_jpeg_data_uri_of_the_stored_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        let batch = BatchAssembler::new(&store).assemble("v", &ids(&["30.000"]));

        let uri = &batch[0].image_url;
        let encoded = uri.strip_prefix("data:image/jpeg;base64,").unwrap();
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, std::fs::read(&batch[0].file_path).unwrap());
    }

    #[test]
    fn large_frames_are_downscaled() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsFrameStore::new(dir.path());
        let jpeg = encode_jpeg(&RgbImage::from_pixel(400, 200, Rgb([200, 0, 0])), 90).unwrap();
        store.put("v", FrameTimestamp::ZERO, &jpeg).unwrap();

        let batch = BatchAssembler::new(&store)
            .with_max_image_side(Some(100))
            .assemble("v", &ids(&["0.000"]));
        let encoded = batch[0].image_url.strip_prefix("data:image/jpeg;base64,").unwrap();
        let img = image::load_from_memory(&STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!((img.width(), img.height()), (100, 50));
    }
}
