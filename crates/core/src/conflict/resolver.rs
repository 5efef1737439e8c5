//! Applies AI resolutions to conflicted files and records them in one commit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, instrument};

use super::extractor::{contains_conflict_markers, Conflict};
use crate::ai::AiAssistant;
use crate::errors::ResolutionError;
use crate::git::GitBackend;

/// What a successful resolution pass produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionReport {
    /// Resolved files, in the order they were resolved.
    pub files: Vec<PathBuf>,
    pub commit_message: String,
}

/// Resolves conflicts one file at a time.
pub struct ConflictResolver {
    ai: Arc<dyn AiAssistant>,
    git: Arc<dyn GitBackend>,
}

impl ConflictResolver {
    pub fn new(ai: Arc<dyn AiAssistant>, git: Arc<dyn GitBackend>) -> Self {
        Self { ai, git }
    }

    /// Resolve every conflict in order, then commit once.
    ///
    /// The first failure aborts the pass; nothing is committed in that case.
    /// A resolution that still carries conflict markers counts as a failure.
    #[instrument(skip(self, conflicts), fields(dir = %dir.display(), count = conflicts.len()))]
    pub async fn resolve_all(
        &self,
        dir: &Path,
        conflicts: &[Conflict],
    ) -> Result<ResolutionReport, ResolutionError> {
        let mut files = Vec::with_capacity(conflicts.len());

        for conflict in conflicts {
            let file = conflict.file.clone();
            info!(file = %file.display(), "resolving conflict");

            let resolved = self
                .ai
                .resolve_conflict(conflict)
                .await
                .map_err(|source| ResolutionError::Ai {
                    file: file.clone(),
                    source,
                })?;

            if contains_conflict_markers(&resolved) {
                error!(file = %file.display(), "AI resolution still contains conflict markers");
                return Err(ResolutionError::ResidualMarkers { file });
            }

            self.git
                .stage_resolution(dir, &file, &resolved)
                .await
                .map_err(|source| ResolutionError::Apply {
                    file: file.clone(),
                    source,
                })?;

            files.push(file);
        }

        let commit_message = self
            .ai
            .generate_commit_message(&files, conflicts)
            .await
            .map_err(ResolutionError::CommitMessage)?;

        self.git
            .commit(dir, &commit_message)
            .await
            .map_err(ResolutionError::Commit)?;

        info!(files = files.len(), "committed resolved conflicts");
        Ok(ResolutionReport {
            files,
            commit_message,
        })
    }
}
