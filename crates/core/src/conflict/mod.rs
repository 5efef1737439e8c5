//! Conflict extraction and AI-driven resolution.
//!
//! 1. **Extraction** reads every unmerged path after a rebase stops and
//!    parses its conflict regions.
//! 2. **Resolution** asks the AI for each file's merged content, stages it,
//!    and records everything in a single commit.

pub mod extractor;
pub mod resolver;

pub use extractor::{
    contains_conflict_markers, extract_conflicts, parse_conflict, Conflict, ConflictHunk,
};
pub use resolver::{ConflictResolver, ResolutionReport};
