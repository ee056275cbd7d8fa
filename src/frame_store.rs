//! Frame Storage
//!
//! Durable home of sampled frames. Every frame is one JPEG file named
//! `<video_id>_<timestamp>.jpg`; the name is the only index, so listing and
//! resolving are both directory scans.

use crate::error::{Error, Result};
use crate::models::FrameTimestamp;
use log::debug;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

const FRAME_EXTENSION: &str = "jpg";

/// A frame file found in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFrame {
    pub video_id: String,
    pub timestamp: FrameTimestamp,
    pub path: PathBuf,
}

/// List/resolve/write access to sampled frames, keyed by video and timestamp.
pub trait FrameStore: Send + Sync {
    /// Stores one encoded frame. Readers never observe a partially written file.
    fn put(&self, video_id: &str, timestamp: FrameTimestamp, bytes: &[u8]) -> Result<PathBuf>;

    /// All frames of a video, in no particular order.
    fn list(&self, video_id: &str) -> Result<Vec<StoredFrame>>;

    fn resolve(&self, video_id: &str, timestamp: FrameTimestamp) -> Result<Option<StoredFrame>>;

    fn read(&self, frame: &StoredFrame) -> Result<Vec<u8>>;
}

/// Name of the file holding the frame of `video_id` at `timestamp`.
pub fn frame_file_name(video_id: &str, timestamp: FrameTimestamp) -> String {
    format!("{video_id}_{timestamp}.{FRAME_EXTENSION}")
}

/// Inverse of [`frame_file_name`]. Returns `None` for anything that is not a frame file.
pub fn parse_frame_file_name(name: &str) -> Option<(&str, FrameTimestamp)> {
    let stem = name.strip_suffix(FRAME_EXTENSION)?.strip_suffix('.')?;
    let (video_id, timestamp) = stem.rsplit_once('_')?;
    if video_id.is_empty() || video_id.starts_with('.') {
        return None;
    }
    Some((video_id, timestamp.parse().ok()?))
}

/// True when `video_id` names a single file-name component, so it can never
/// address anything outside the frame directory.
pub fn is_valid_video_id(video_id: &str) -> bool {
    !video_id.is_empty()
        && !video_id.starts_with('.')
        && !video_id.contains(['/', '\\'])
        && !video_id.contains("..")
}

/// Frame store backed by one flat directory.
#[derive(Debug, Clone)]
pub struct FsFrameStore {
    dir: PathBuf,
}

impl FsFrameStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FrameStore for FsFrameStore {
    fn put(&self, video_id: &str, timestamp: FrameTimestamp, bytes: &[u8]) -> Result<PathBuf> {
        if !is_valid_video_id(video_id) {
            return Err(Error::InvalidVideoId(video_id.to_string()));
        }
        fs::create_dir_all(&self.dir).map_err(|e| Error::storage(&self.dir, e))?;

        let name = frame_file_name(video_id, timestamp);
        let final_path = self.dir.join(&name);
        // Hidden and without the frame extension, so scans skip it.
        let tmp_path = self.dir.join(format!(".{name}.tmp"));

        fs::write(&tmp_path, bytes).map_err(|e| Error::storage(&tmp_path, e))?;
        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(Error::storage(&final_path, e));
        }

        debug!("Stored frame {:?}", final_path);
        Ok(final_path)
    }

    fn list(&self, video_id: &str) -> Result<Vec<StoredFrame>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(&self.dir, e)),
        };

        let mut frames = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::storage(&self.dir, e))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else { continue };
            if let Some((owner, timestamp)) = parse_frame_file_name(name) {
                if owner == video_id {
                    frames.push(StoredFrame {
                        video_id: video_id.to_string(),
                        timestamp,
                        path: entry.path(),
                    });
                }
            }
        }
        Ok(frames)
    }

    fn resolve(&self, video_id: &str, timestamp: FrameTimestamp) -> Result<Option<StoredFrame>> {
        if !is_valid_video_id(video_id) {
            return Ok(None);
        }
        let path = self.dir.join(frame_file_name(video_id, timestamp));
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(StoredFrame {
                video_id: video_id.to_string(),
                timestamp,
                path,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(&path, e)),
        }
    }

    fn read(&self, frame: &StoredFrame) -> Result<Vec<u8>> {
        fs::read(&frame.path).map_err(|e| Error::storage(&frame.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_round_trips() {
        let ts = FrameTimestamp::from_millis(12_500);
        let name = frame_file_name("abc-123", ts);
        assert_eq!(name, "abc-123_12.500.jpg");
        assert_eq!(parse_frame_file_name(&name), Some(("abc-123", ts)));
    }

    #[test]
    fn foreign_names_are_ignored() {
        for name in [
            "abc.mp4",
            "abc_12.500.png",
            "abc_twelve.jpg",
            ".abc_12.500.jpg.tmp",
            "_12.500.jpg",
        ] {
            assert_eq!(parse_frame_file_name(name), None, "{name}");
        }
    }

    #[test]
    fn list_only_returns_frames_of_the_requested_video() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsFrameStore::new(dir.path());
        store.put("a", FrameTimestamp::from_millis(0), b"x").unwrap();
        store.put("a", FrameTimestamp::from_millis(10_000), b"y").unwrap();
        store.put("b", FrameTimestamp::from_millis(0), b"z").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut frames = store.list("a").unwrap();
        frames.sort_by_key(|f| f.timestamp);
        let stamps: Vec<u64> = frames.iter().map(|f| f.timestamp.as_millis()).collect();
        assert_eq!(stamps, vec![0, 10_000]);
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsFrameStore::new(dir.path().join("not-yet"));
        assert!(store.list("a").unwrap().is_empty());
    }

    #[test]
    fn put_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsFrameStore::new(dir.path());
        store.put("a", FrameTimestamp::from_millis(2000), b"data").unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a_2.000.jpg".to_string()]);
    }

    #[test]
    fn path_like_video_ids_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("frames");
        let outside = dir.path().join("videos");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("x_0.000.jpg"), b"secret").unwrap();

        let store = FsFrameStore::new(&frames);
        assert!(store.resolve("../videos/x", FrameTimestamp::ZERO).unwrap().is_none());
        assert!(matches!(
            store.put("../videos/y", FrameTimestamp::ZERO, b"data"),
            Err(Error::InvalidVideoId(_))
        ));
        assert!(!outside.join("y_0.000.jpg").exists());

        for id in ["", ".hidden", "a/b", "a\\b", "..", "x..y"] {
            assert!(!is_valid_video_id(id), "{id:?}");
        }
        assert!(is_valid_video_id("0b6f1c2e-9d1a-4c3e-8f57-2a1d9e4b7c10"));
    }

    #[test]
    fn resolve_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsFrameStore::new(dir.path());
        let ts = FrameTimestamp::from_millis(5000);
        store.put("a", ts, b"pixels").unwrap();

        let found = store.resolve("a", ts).unwrap().unwrap();
        assert_eq!(store.read(&found).unwrap(), b"pixels");
        assert!(store.resolve("a", FrameTimestamp::from_millis(6000)).unwrap().is_none());
        assert!(store.resolve("b", ts).unwrap().is_none());
    }
}
