//! OpenAI-compatible chat-completions client.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::prompts;
use super::AiAssistant;
use crate::config::AiConfig;
use crate::conflict::Conflict;
use crate::errors::AiError;

const CONFLICT_TEMPERATURE: f32 = 0.1;
const COMMIT_TEMPERATURE: f32 = 0.3;
const COMMIT_MAX_TOKENS: u32 = 150;
const PR_TEMPERATURE: f32 = 0.4;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

/// Chat-completions client.
#[derive(Clone)]
pub struct OpenAiAssistant {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiAssistant {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, AiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("rebaiser/0.1"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let model = model.into();
        info!(endpoint = %endpoint, model = %model, "created OpenAiAssistant");
        Ok(Self {
            http,
            endpoint,
            api_key: api_key.into(),
            model,
            max_tokens,
        })
    }

    /// Build from the `ai` config section. Fails without an API key.
    pub fn from_config(config: &AiConfig) -> Result<Self, AiError> {
        let key = config.api_key().ok_or(AiError::MissingApiKey)?;
        Self::new(
            config.base_url(),
            key,
            config.model.clone(),
            config.max_tokens,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, AiError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens,
            temperature,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, "chat completion request failed");
            return Err(AiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = resp.json().await?;
        if let Some(usage) = &parsed.usage {
            debug!(tokens_used = usage.total_tokens, "chat completion finished");
        }

        completion_text(parsed, max_tokens)
    }
}

/// Text of the first choice. A reply cut off at the token limit is an error.
fn completion_text(response: ChatResponse, max_tokens: u32) -> Result<String, AiError> {
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(AiError::EmptyResponse);
    };
    if choice.finish_reason.as_deref() == Some("length") {
        warn!(max_tokens, "chat completion hit the token limit");
        return Err(AiError::Truncated { max_tokens });
    }

    let content = choice
        .message
        .content
        .map(|c| prompts::clean_completion(&c))
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(AiError::EmptyResponse);
    }
    Ok(content)
}

#[async_trait]
impl AiAssistant for OpenAiAssistant {
    #[instrument(skip(self, conflict), fields(file = %conflict.file.display()))]
    async fn resolve_conflict(&self, conflict: &Conflict) -> Result<String, AiError> {
        info!(hunks = conflict.hunks.len(), "resolving conflict with AI");
        let prompt = prompts::conflict_prompt(conflict);
        self.complete(
            prompts::CONFLICT_SYSTEM,
            &prompt,
            self.max_tokens,
            CONFLICT_TEMPERATURE,
        )
        .await
    }

    #[instrument(skip_all, fields(files = files.len()))]
    async fn generate_commit_message(
        &self,
        files: &[PathBuf],
        conflicts: &[Conflict],
    ) -> Result<String, AiError> {
        let prompt = prompts::commit_message_prompt(files, conflicts);
        let message = self
            .complete(
                prompts::COMMIT_SYSTEM,
                &prompt,
                COMMIT_MAX_TOKENS,
                COMMIT_TEMPERATURE,
            )
            .await?;
        info!(message = %message, "generated commit message");
        Ok(message)
    }

    #[instrument(skip_all, fields(commits = commits.len(), conflicts = conflicts.len()))]
    async fn generate_pr_description(
        &self,
        commits: &[String],
        conflicts: &[Conflict],
    ) -> Result<String, AiError> {
        let prompt = prompts::pr_description_prompt(commits, conflicts);
        self.complete(prompts::PR_SYSTEM, &prompt, self.max_tokens, PR_TEMPERATURE)
            .await
    }
}
