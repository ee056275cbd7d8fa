//! Remote Video Fetching
//!
//! Resolves a shareable link to a local media file by running `yt-dlp`.

use crate::error::{Error, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub trait MediaFetcher: Send + Sync {
    /// Downloads `url` into `dest_dir` and returns the path of the media file.
    fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf>;
}

pub struct YtDlpFetcher {
    program: String,
    format: String,
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        YtDlpFetcher {
            program: "yt-dlp".to_string(),
            format: "best[ext=mp4]".to_string(),
        }
    }
}

impl YtDlpFetcher {
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl MediaFetcher for YtDlpFetcher {
    fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dest_dir).map_err(|e| Error::storage(dest_dir, e))?;
        let template = dest_dir.join("%(id)s.%(ext)s");
        info!("Fetching {} with {}", url, self.program);

        let output = Command::new(&self.program)
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("-f")
            .arg(&self.format)
            .arg("-o")
            .arg(&template)
            .arg("--print")
            .arg("after_move:filepath")
            .arg(url)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Fetch(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Fetch(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("{} output: {}", self.program, stdout.trim());
        let path = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(PathBuf::from)
            .ok_or_else(|| Error::Fetch(format!("{} did not report a file path", self.program)))?;

        if !path.is_file() {
            return Err(Error::Fetch(format!("downloaded file {path:?} is missing")));
        }
        Ok(path)
    }
}
