//! Vision Model Client
//!
//! The remote model is reached through the [`VisionModel`] trait: one message
//! made of ordered text and image blocks goes in, generated text comes out.
//! [`OpenAiVisionClient`] speaks the OpenAI chat-completions protocol.

use crate::error::ModelError;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// One unit of a model message. Order is significant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentBlock::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub max_tokens: u32,
}

pub trait VisionModel: Send + Sync {
    fn complete(&self, request: &ModelRequest) -> Result<String, ModelError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a [ContentBlock],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Blocking OpenAI-compatible chat-completions client.
pub struct OpenAiVisionClient {
    client: reqwest::blocking::Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

impl OpenAiVisionClient {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Transport(e.to_string()))?;
        Ok(OpenAiVisionClient {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn body(request: &ModelRequest) -> ChatRequest<'_> {
        ChatRequest {
            model: &request.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.content,
            }],
            max_tokens: request.max_tokens,
        }
    }

    fn classify(&self, e: reqwest::Error) -> ModelError {
        if e.is_timeout() {
            ModelError::Timeout(self.timeout)
        } else {
            ModelError::Transport(e.to_string())
        }
    }
}

impl VisionModel for OpenAiVisionClient {
    fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let api_key = self.api_key.as_deref().ok_or(ModelError::MissingApiKey)?;
        let start = Instant::now();
        info!(
            "Sending {} content blocks to model {}",
            request.content.len(),
            request.model
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&Self::body(request))
            .send()
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().map_err(|e| self.classify(e))?;
        debug!("Model {} answered in {:.2?}", request.model, start.elapsed());

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .ok_or(ModelError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ModelRequest {
        ModelRequest {
            model: "gpt-4o".to_string(),
            content: vec![
                ContentBlock::text("what changed?"),
                ContentBlock::image("data:image/jpeg;base64,AAAA"),
                ContentBlock::image("data:image/jpeg;base64,BBBB"),
            ],
            max_tokens: 500,
        }
    }

    #[test]
    fn body_keeps_block_order_in_one_user_message() {
        let req = request();
        let json = serde_json::to_value(OpenAiVisionClient::body(&req)).unwrap();

        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["max_tokens"], 500);
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        let content = &json["messages"][0]["content"];
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "what changed?");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/jpeg;base64,AAAA");
        assert_eq!(content[2]["image_url"]["url"], "data:image/jpeg;base64,BBBB");
    }

    #[test]
    fn missing_key_fails_before_any_request() {
        let client = OpenAiVisionClient::new(None, Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.complete(&request()),
            Err(ModelError::MissingApiKey)
        ));
    }

    #[test]
    fn unreachable_endpoint_is_a_transport_error() {
        let client = OpenAiVisionClient::new(Some("key".to_string()), Duration::from_secs(5))
            .unwrap()
            .with_base_url("http://127.0.0.1:9/v1/");
        match client.complete(&request()) {
            Err(ModelError::Transport(_)) | Err(ModelError::Timeout(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
