//! Sampling Jobs
//!
//! Tracks background sampling per video (`pending -> running -> completed |
//! failed`) and makes sure only one pass runs for a given video at a time.

use crate::error::{Error, Result};
use crate::models::{ProcessingState, VideoStatus};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Pending,
    Running { progress: f64 },
    Completed { frames: usize },
    Failed { reason: String },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }

    pub fn to_status(&self, video_id: &str) -> VideoStatus {
        let (status, progress, message) = match self {
            JobState::Pending => (ProcessingState::Pending, 0.0, "Queued for frame sampling".to_string()),
            JobState::Running { progress } => {
                (ProcessingState::Running, *progress, "Sampling frames".to_string())
            }
            JobState::Completed { frames } => (
                ProcessingState::Completed,
                100.0,
                format!("Processing completed. {frames} frames extracted"),
            ),
            JobState::Failed { reason } => {
                (ProcessingState::Failed, 0.0, format!("Processing failed: {reason}"))
            }
        };
        VideoStatus {
            video_id: video_id.to_string(),
            status,
            progress,
            message: Some(message),
        }
    }
}

#[derive(Default)]
struct Jobs {
    states: HashMap<String, JobState>,
    active: HashSet<String>,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<Jobs>,
    changed: Condvar,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(JobRegistry::default())
    }

    fn lock(&self) -> MutexGuard<'_, Jobs> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims `video_id` for a new sampling pass, or fails if one is in flight.
    pub fn try_begin(self: &Arc<Self>, video_id: &str) -> Result<JobGuard> {
        let mut jobs = self.lock();
        if !jobs.active.insert(video_id.to_string()) {
            return Err(Error::SamplingInProgress(video_id.to_string()));
        }
        jobs.states.insert(video_id.to_string(), JobState::Pending);
        debug!("Sampling job for {} registered", video_id);
        Ok(JobGuard {
            registry: Arc::clone(self),
            video_id: video_id.to_string(),
            finished: false,
        })
    }

    pub fn state(&self, video_id: &str) -> Option<JobState> {
        self.lock().states.get(video_id).cloned()
    }

    pub fn is_active(&self, video_id: &str) -> bool {
        self.lock().active.contains(video_id)
    }

    /// Blocks until the job for `video_id` reaches a terminal state.
    /// `None` if no job was ever registered for it.
    pub fn wait(&self, video_id: &str) -> Option<JobState> {
        let mut jobs = self.lock();
        loop {
            match jobs.states.get(video_id) {
                None => return None,
                Some(state) if state.is_terminal() => return Some(state.clone()),
                Some(_) => {
                    jobs = self
                        .changed
                        .wait(jobs)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn set(&self, video_id: &str, state: JobState) {
        let terminal = state.is_terminal();
        let mut jobs = self.lock();
        jobs.states.insert(video_id.to_string(), state);
        if terminal {
            jobs.active.remove(video_id);
        }
        drop(jobs);
        self.changed.notify_all();
    }
}

/// Exclusive handle on one video's sampling pass. Dropping it without
/// finishing marks the job failed and frees the video for another pass.
pub struct JobGuard {
    registry: Arc<JobRegistry>,
    video_id: String,
    finished: bool,
}

impl JobGuard {
    pub fn progress(&self, done: u64, total: u64) {
        let progress = if total == 0 {
            100.0
        } else {
            (done as f64 / total as f64 * 100.0).min(100.0)
        };
        self.registry.set(&self.video_id, JobState::Running { progress });
    }

    pub fn complete(mut self, frames: usize) {
        self.finished = true;
        self.registry.set(&self.video_id, JobState::Completed { frames });
    }

    pub fn fail(mut self, reason: impl Into<String>) {
        self.finished = true;
        self.registry.set(
            &self.video_id,
            JobState::Failed {
                reason: reason.into(),
            },
        );
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.registry.set(
                &self.video_id,
                JobState::Failed {
                    reason: "sampling aborted".to_string(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn second_pass_for_same_video_is_rejected() {
        let registry = JobRegistry::new();
        let guard = registry.try_begin("v").unwrap();
        assert!(matches!(
            registry.try_begin("v"),
            Err(Error::SamplingInProgress(_))
        ));
        assert!(registry.try_begin("other").is_ok());

        guard.complete(3);
        assert!(registry.try_begin("v").is_ok());
    }

    #[test]
    fn state_moves_through_running_to_completed() {
        let registry = JobRegistry::new();
        let guard = registry.try_begin("v").unwrap();
        assert_eq!(registry.state("v"), Some(JobState::Pending));

        guard.progress(1, 4);
        assert_eq!(registry.state("v"), Some(JobState::Running { progress: 25.0 }));

        guard.complete(4);
        assert_eq!(registry.state("v"), Some(JobState::Completed { frames: 4 }));
        assert!(!registry.is_active("v"));
    }

    #[test]
    fn dropped_guard_marks_failure() {
        let registry = JobRegistry::new();
        drop(registry.try_begin("v").unwrap());
        assert!(matches!(registry.state("v"), Some(JobState::Failed { .. })));
        assert!(!registry.is_active("v"));
    }

    #[test]
    fn wait_returns_when_another_thread_finishes() {
        let registry = JobRegistry::new();
        let guard = registry.try_begin("v").unwrap();

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            guard.fail("corrupt container");
        });

        assert_eq!(
            registry.wait("v"),
            Some(JobState::Failed {
                reason: "corrupt container".to_string()
            })
        );
        worker.join().unwrap();
        assert_eq!(registry.wait("unknown"), None);
    }

    #[test]
    fn statuses_carry_progress_and_message() {
        let done = JobState::Completed { frames: 3 }.to_status("v");
        assert_eq!(done.status, ProcessingState::Completed);
        assert_eq!(done.progress, 100.0);
        assert_eq!(
            done.message.as_deref(),
            Some("Processing completed. 3 frames extracted")
        );

        let running = JobState::Running { progress: 40.0 }.to_status("v");
        assert_eq!(running.status, ProcessingState::Running);
        assert_eq!(running.progress, 40.0);
    }
}
