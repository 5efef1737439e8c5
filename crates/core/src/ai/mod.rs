//! Language-model collaborator.
//!
//! The pipeline only sees [`AiAssistant`]. [`OpenAiAssistant`] talks to any
//! OpenAI-compatible chat-completions endpoint (OpenAI, OpenRouter, a local
//! proxy).

pub mod openai;
pub mod prompts;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::conflict::Conflict;
use crate::errors::AiError;

pub use openai::OpenAiAssistant;

#[async_trait]
pub trait AiAssistant: Send + Sync {
    /// Return the full resolved content of the conflicted file.
    async fn resolve_conflict(&self, conflict: &Conflict) -> Result<String, AiError>;

    /// One commit message covering every resolved file.
    async fn generate_commit_message(
        &self,
        files: &[PathBuf],
        conflicts: &[Conflict],
    ) -> Result<String, AiError>;

    /// Markdown body for the pull request.
    async fn generate_pr_description(
        &self,
        commits: &[String],
        conflicts: &[Conflict],
    ) -> Result<String, AiError>;
}
