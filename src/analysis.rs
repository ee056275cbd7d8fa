//! Analysis Orchestrator
//!
//! Builds a single model call out of the conversation so far, the video
//! description, the caller's question and a chronological batch of frames,
//! and shapes the answer into an [`AnalysisResult`].

use crate::batch_assembler::ResolvedFrame;
use crate::models::{AnalysisResult, BatchAnalysisRequest, ChatMessage, TimeRange};
use crate::vision::{ContentBlock, ModelRequest, VisionModel};
use log::{info, warn};

pub const DEFAULT_SEQUENCE_PROMPT: &str = "What are in these images? Analyze the sequence of \
frames and describe any changes, patterns, or notable differences between them. Focus on \
movement, behavior, and significant changes over time.";

pub const EMPTY_BATCH_ERROR: &str = "No frames could be resolved for analysis";

/// Turns prior to the current question, newest last, at most `window` of them.
fn prior_turns(messages: &[ChatMessage], window: usize) -> &[ChatMessage] {
    let earlier = match messages.split_last() {
        Some((_, earlier)) => earlier,
        None => return &[],
    };
    &earlier[earlier.len().saturating_sub(window)..]
}

/// The text block sent ahead of the images.
pub fn compose_prompt(request: &BatchAnalysisRequest, history_window: usize) -> String {
    let question = match request.sequence_prompt.trim() {
        "" => DEFAULT_SEQUENCE_PROMPT,
        prompt => prompt,
    };

    let mut prompt = String::new();
    let turns = prior_turns(&request.messages, history_window);
    if !turns.is_empty() {
        prompt.push_str("Previous context:\n");
        for turn in turns {
            prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
        }
    }
    prompt.push_str("Analyze the sequence of video frames.\n");
    let description = request.description.trim();
    if !description.is_empty() {
        prompt.push_str(&format!("Video description: {}\n", description));
    }
    prompt.push_str("Each frame has a timestamp in the top left corner.\n");
    prompt.push_str(&format!(
        "Answer the following questions in {}: {}",
        request.language, question
    ));
    prompt
}

pub struct AnalysisOrchestrator<'a> {
    model: &'a dyn VisionModel,
    max_tokens: u32,
    history_window: usize,
}

impl<'a> AnalysisOrchestrator<'a> {
    pub fn new(model: &'a dyn VisionModel, max_tokens: u32, history_window: usize) -> Self {
        AnalysisOrchestrator {
            model,
            max_tokens,
            history_window,
        }
    }

    pub fn build_request(&self, frames: &[ResolvedFrame], request: &BatchAnalysisRequest) -> ModelRequest {
        let mut content = Vec::with_capacity(frames.len() + 1);
        content.push(ContentBlock::text(compose_prompt(request, self.history_window)));
        content.extend(frames.iter().map(|f| ContentBlock::image(f.image_url.clone())));

        ModelRequest {
            model: request.model.clone(),
            content,
            max_tokens: self.max_tokens,
        }
    }

    /// Runs one analysis. Failures come back as an error envelope; nothing is retried.
    pub fn analyze(&self, frames: &[ResolvedFrame], request: &BatchAnalysisRequest) -> AnalysisResult {
        let (first, last) = match (frames.first(), frames.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                warn!("Analysis of video {} has no frames, not calling the model", request.video_id);
                return AnalysisResult::Error {
                    error: EMPTY_BATCH_ERROR.to_string(),
                    frame_count: 0,
                };
            }
        };

        info!(
            "Analyzing {} frames ({}s to {}s) of video {} with {}",
            frames.len(),
            first.timestamp,
            last.timestamp,
            request.video_id,
            request.model
        );

        match self.model.complete(&self.build_request(frames, request)) {
            Ok(text) => AnalysisResult::Success {
                sequence_analysis: text,
                frame_count: frames.len(),
                time_range: TimeRange {
                    start: first.timestamp,
                    end: last.timestamp,
                },
            },
            Err(e) => {
                warn!("Model call for video {} failed: {}", request.video_id, e);
                AnalysisResult::Error {
                    error: e.to_string(),
                    frame_count: frames.len(),
                }
            }
        }
    }
}
