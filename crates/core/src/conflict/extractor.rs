//! Reads conflicted files out of a paused rebase.
//!
//! Files are parsed line by line. Each `<<<<<<<` ... `>>>>>>>` region becomes
//! a [`ConflictHunk`]; diff3-style `|||||||` base sections are kept apart from
//! the two sides. For compatibility with single-region consumers,
//! [`Conflict::ours`] and [`Conflict::theirs`] mirror the first hunk.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::errors::ConflictError;
use crate::git::GitBackend;

const OURS_MARKER: &str = "<<<<<<<";
const BASE_MARKER: &str = "|||||||";
const SEPARATOR: &str = "=======";
const THEIRS_MARKER: &str = ">>>>>>>";

/// One conflict region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictHunk {
    pub ours: String,
    /// Present only for diff3-style markers.
    pub base: Option<String>,
    pub theirs: String,
}

/// A conflicted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Path relative to the checkout.
    pub file: PathBuf,
    /// Full file content, markers included.
    pub raw_content: String,
    /// Lines between the first `<<<<<<<` and its separator.
    pub ours: String,
    /// Lines between the first separator and `>>>>>>>`.
    pub theirs: String,
    /// Every region, in file order.
    pub hunks: Vec<ConflictHunk>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Outside,
    Ours,
    Base,
    Theirs,
}

/// Parse the conflict regions of `content`.
///
/// A file without markers yields a conflict with no hunks and empty sides.
/// An unterminated region is kept as it stands.
pub fn parse_conflict(file: impl Into<PathBuf>, content: &str) -> Conflict {
    let mut hunks = Vec::new();
    let mut current: Option<(Vec<&str>, Option<Vec<&str>>, Vec<&str>)> = None;
    let mut section = Section::Outside;

    for line in content.lines() {
        if line.starts_with(OURS_MARKER) {
            if let Some(hunk) = current.take() {
                hunks.push(finish_hunk(hunk));
            }
            current = Some((Vec::new(), None, Vec::new()));
            section = Section::Ours;
            continue;
        }

        let Some((ours, base, theirs)) = current.as_mut() else {
            continue;
        };

        let mut closed = false;
        match section {
            Section::Ours | Section::Base if line.trim_end() == SEPARATOR => {
                section = Section::Theirs;
            }
            Section::Ours if line.starts_with(BASE_MARKER) => {
                *base = Some(Vec::new());
                section = Section::Base;
            }
            Section::Theirs if line.starts_with(THEIRS_MARKER) => {
                closed = true;
                section = Section::Outside;
            }
            Section::Ours => ours.push(line),
            Section::Base => {
                if let Some(base) = base.as_mut() {
                    base.push(line);
                }
            }
            Section::Theirs => theirs.push(line),
            Section::Outside => {}
        }

        if closed {
            if let Some(hunk) = current.take() {
                hunks.push(finish_hunk(hunk));
            }
        }
    }

    if let Some(hunk) = current.take() {
        hunks.push(finish_hunk(hunk));
    }

    let (ours, theirs) = hunks
        .first()
        .map(|h: &ConflictHunk| (h.ours.clone(), h.theirs.clone()))
        .unwrap_or_default();

    Conflict {
        file: file.into(),
        raw_content: content.to_string(),
        ours,
        theirs,
        hunks,
    }
}

fn finish_hunk((ours, base, theirs): (Vec<&str>, Option<Vec<&str>>, Vec<&str>)) -> ConflictHunk {
    ConflictHunk {
        ours: ours.join("\n"),
        base: base.map(|b| b.join("\n")),
        theirs: theirs.join("\n"),
    }
}

/// True if any line of `text` starts with a conflict marker.
pub fn contains_conflict_markers(text: &str) -> bool {
    text.lines().any(|line| {
        line.starts_with(OURS_MARKER)
            || line.starts_with(THEIRS_MARKER)
            || line.trim_end() == SEPARATOR
    })
}

/// List unmerged paths in `dir` and parse each one.
///
/// Unreadable files are logged and skipped; they stay unmerged.
#[instrument(skip(git), fields(dir = %dir.display()))]
pub async fn extract_conflicts(
    git: &dyn GitBackend,
    dir: &Path,
) -> Result<Vec<Conflict>, ConflictError> {
    let paths = git.conflicted_paths(dir).await?;
    let mut conflicts = Vec::with_capacity(paths.len());

    for path in paths {
        match tokio::fs::read(dir.join(&path)).await {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                let conflict = parse_conflict(path, &content);
                debug!(
                    file = %conflict.file.display(),
                    hunks = conflict.hunks.len(),
                    "parsed conflicted file"
                );
                conflicts.push(conflict);
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unreadable conflicted file");
            }
        }
    }

    info!(count = conflicts.len(), "extracted conflicts");
    Ok(conflicts)
}
