use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::app_config::EnhancerConfig;
use crate::language_utils::language_name;
use crate::pipeline::collaborators::{EnhanceTask, TextEnhancer};

/// Client for OpenAI-compatible chat completion endpoints
pub struct ChatClient {
    /// HTTP client for API requests
    client: Client,
    /// Bearer token
    api_key: String,
    /// Base URL, e.g. `https://openrouter.ai/api/v1`
    endpoint: String,
}

/// Chat completion request
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    /// The model to use
    model: String,

    /// The conversation so far
    messages: Vec<ChatMessage>,

    /// Temperature for generation
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// One chat message
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the sender (system, user, assistant)
    pub role: String,

    /// Message text
    #[serde(default)]
    pub content: Option<String>,
}

/// Chat completion response
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    /// Generated alternatives
    pub choices: Vec<ChatChoice>,
}

/// One generated alternative
#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

impl ChatRequest {
    /// Create a new request
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: None,
        }
    }

    /// Add a message to the request
    pub fn add_message(mut self, role: impl Into<String>, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage {
            role: role.into(),
            content: Some(content.into()),
        });
        self
    }

    /// Set the temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

impl ChatClient {
    /// Create a new client
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Complete a chat request
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let api_url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&api_url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to send request to chat API: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("Chat API error ({}): {}", status, error_text);
            return Err(anyhow!("Chat API error ({}): {}", status, error_text));
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| anyhow!("Failed to parse chat API response: {}", e))
    }

    /// Extract the first choice's text
    pub fn extract_text(response: &ChatResponse) -> String {
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default()
    }
}

/// Parse a numbered reply (`1. text`, `1、text`, `1) text`, `1） text`) into
/// one entry per original line; missing or malformed lines keep the original.
pub fn parse_numbered(raw: &str, originals: &[String]) -> Vec<String> {
    const SEPARATORS: [&str; 4] = [". ", "、", ") ", "） "];

    let mut results: Vec<Option<String>> = vec![None; originals.len()];
    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((head, body)) = SEPARATORS
            .iter()
            .find_map(|separator| line.split_once(separator))
        else {
            continue;
        };
        let Ok(number) = head.trim().parse::<usize>() else {
            continue;
        };
        if let Some(slot) = number.checked_sub(1).and_then(|i| results.get_mut(i)) {
            *slot = Some(body.trim().to_string());
        }
    }

    results
        .into_iter()
        .zip(originals)
        .map(|(result, original)| result.unwrap_or_else(|| original.clone()))
        .collect()
}

fn numbered(batch: &[String]) -> String {
    batch
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}. {}", i + 1, text))
        .collect::<Vec<_>>()
        .join("\n")
}

// @returns: Duration as H:MM:SS or M:SS, "unknown" when not positive
fn format_duration(seconds: i64) -> String {
    if seconds <= 0 {
        return "unknown".to_string();
    }
    let (hours, rest) = (seconds / 3600, seconds % 3600);
    let (minutes, secs) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Text enhancer backed by a chat model
pub struct ChatEnhancer {
    client: ChatClient,
    model: String,
}

impl ChatEnhancer {
    pub fn new(client: ChatClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Enhancer for the configured endpoint, `None` when no key is set
    pub fn from_config(config: &EnhancerConfig, timeout: Duration) -> Option<Self> {
        if !config.is_enabled() {
            return None;
        }
        let client = ChatClient::new(&config.api_key, &config.endpoint, timeout);
        Some(Self::new(client, &config.model))
    }

    fn prompt(task: &EnhanceTask, batch: &[String]) -> (String, f32) {
        match task {
            EnhanceTask::Translate { target } => (
                format!(
                    "Translate each numbered subtitle line below into {}. Keep the numbering \
                     and the order, output exactly one line per entry formatted as \
                     \"N. translation\", and add no explanations.\n\n{}",
                    language_name(target),
                    numbered(batch)
                ),
                0.1,
            ),
            EnhanceTask::RestorePunctuation => (
                format!(
                    "The numbered subtitle lines below are missing punctuation. Add suitable \
                     punctuation to each line without changing any words. Keep the numbering \
                     and the order, output exactly one line per entry formatted as \
                     \"N. text\", and add no explanations.\n\n{}",
                    numbered(batch)
                ),
                0.1,
            ),
            EnhanceTask::Outline {
                title,
                duration_secs,
            } => (
                format!(
                    "You are a video content analyst. Below is the transcript of a video.\n\
                     Title: {}\nDuration: {}\n\nTranscript:\n{}\n\n\
                     Write a structured Markdown outline with three sections: \"## Topic\" \
                     (one or two sentences), \"## Structure\" (3-6 bullet points, each \
                     \"- **Chapter**: summary\") and \"## Key points\" (3-5 bullet points). \
                     Output nothing else.",
                    title,
                    format_duration(*duration_secs),
                    batch.join("")
                ),
                0.3,
            ),
        }
    }
}

#[async_trait]
impl TextEnhancer for ChatEnhancer {
    async fn process(&self, task: &EnhanceTask, batch: &[String]) -> Result<Vec<String>> {
        let (prompt, temperature) = Self::prompt(task, batch);
        let request = ChatRequest::new(&self.model)
            .add_message("user", prompt)
            .temperature(temperature);

        let response = self.client.complete(&request).await?;
        let text = ChatClient::extract_text(&response);
        debug!("Chat reply of {} chars for {} lines", text.len(), batch.len());

        Ok(match task {
            EnhanceTask::Outline { .. } => vec![text.trim().to_string()],
            _ => parse_numbered(&text, batch),
        })
    }
}
