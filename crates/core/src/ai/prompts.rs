//! Prompt builders for the chat-completions client.

use std::fmt::Write as _;
use std::path::PathBuf;

use crate::conflict::Conflict;

pub const CONFLICT_SYSTEM: &str = "You are an expert software engineer helping resolve Git merge \
conflicts. Your task is to intelligently merge conflicting code changes, preserving the intent of \
both sides where possible. Always return only the complete resolved file content without any \
markdown formatting, explanations or conflict markers.";

pub const COMMIT_SYSTEM: &str = "You are an expert at writing clear, concise Git commit messages \
following conventional commit format. Analyze the conflicts and generate a commit message that \
describes the nature of the conflicts resolved (e.g. 'config: reconcile compiler toolchain \
defaults', 'gpio: align drive strength configurations', 'devicetree: merge panel timing \
settings'). Use format 'type: description' where type is one of: feat, fix, docs, style, \
refactor, test, chore, config. Keep the summary under 50 characters.";

pub const PR_SYSTEM: &str = "You are an expert at writing clear, professional GitHub pull request \
descriptions. Generate a well-structured PR description in markdown format that summarizes the \
changes, conflicts resolved, and any important notes for reviewers.";

/// Prompt asking for the resolved content of one file.
pub fn conflict_prompt(conflict: &Conflict) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "I have a Git merge conflict in file: {}\n",
        conflict.file.display()
    );
    let _ = writeln!(prompt, "Here is the full file:\n\n{}\n", conflict.raw_content);

    if conflict.hunks.len() > 1 {
        let _ = writeln!(prompt, "The file contains {} conflict regions:\n", conflict.hunks.len());
    }
    for (i, hunk) in conflict.hunks.iter().enumerate() {
        if conflict.hunks.len() > 1 {
            let _ = writeln!(prompt, "Region {}:", i + 1);
        }
        let _ = writeln!(prompt, "- HEAD (our changes):\n{}\n", hunk.ours);
        if let Some(base) = &hunk.base {
            let _ = writeln!(prompt, "- Common ancestor:\n{}\n", base);
        }
        let _ = writeln!(prompt, "- Incoming changes (theirs):\n{}\n", hunk.theirs);
    }

    prompt.push_str(
        "Please resolve this conflict by:\n\
         1. Analyzing both versions\n\
         2. Merging the changes intelligently\n\
         3. Preserving the intent of both sides where possible\n\
         4. Ensuring the code remains functional\n\
         5. Following the existing code style and patterns\n\n\
         Return only the resolved file without any markdown formatting, explanations, or conflict markers.",
    );
    prompt
}

/// Prompt for the single commit that records every resolution.
pub fn commit_message_prompt(files: &[PathBuf], conflicts: &[Conflict]) -> String {
    let mut prompt = String::from(
        "Generate a conventional commit message for an AI-assisted rebase operation that resolved merge conflicts.\n\n",
    );

    if !files.is_empty() {
        prompt.push_str("Files modified:\n");
        for file in files {
            let _ = writeln!(prompt, "- {}", file.display());
        }
        prompt.push('\n');
    }

    if !conflicts.is_empty() {
        prompt.push_str("Conflicts resolved:\n");
        for conflict in conflicts {
            let _ = writeln!(prompt, "- {}", conflict.file.display());
            if !conflict.ours.is_empty() && !conflict.theirs.is_empty() {
                let _ = writeln!(prompt, "  Conflict type: {}", conflict_kind(conflict));
            }
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Analyze the conflicts and generate a commit message that describes the nature of the conflicts resolved.\n\
         Examples:\n\
         - 'config: reconcile compiler toolchain defaults'\n\
         - 'gpio: align drive strength configurations'\n\
         - 'devicetree: merge panel timing settings'\n\
         - 'soc: update register definitions'\n\
         - 'kconfig: resolve build configuration conflicts'\n\n\
         Use conventional commit format: type: description",
    );
    prompt
}

/// Prompt for the pull request body.
pub fn pr_description_prompt(commits: &[String], conflicts: &[Conflict]) -> String {
    let mut prompt =
        String::from("Generate a GitHub pull request description for an AI-assisted rebase operation.\n\n");

    if !commits.is_empty() {
        prompt.push_str("Recent commits:\n");
        for commit in commits {
            let _ = writeln!(prompt, "- {}", commit);
        }
        prompt.push('\n');
    }

    if !conflicts.is_empty() {
        let _ = writeln!(prompt, "Conflicts resolved in {} files:", conflicts.len());
        for conflict in conflicts {
            let _ = writeln!(prompt, "- {}", conflict.file.display());
        }
        prompt.push('\n');
    }

    prompt.push_str("This is an automated rebase operation that:\n");
    prompt.push_str("- Rebased the internal repository against the latest upstream changes\n");
    if conflicts.is_empty() {
        prompt.push_str("- Completed successfully with no merge conflicts\n");
    } else {
        prompt.push_str("- Used AI to resolve merge conflicts intelligently\n");
    }
    prompt.push_str("- Ran all configured tests to ensure functionality\n\n");

    if conflicts.is_empty() {
        prompt.push_str(
            "Generate a professional, well-structured PR description in markdown format with sections for \
             Summary, Changes, and Testing. Do not include a conflicts section since no conflicts occurred.",
        );
    } else {
        prompt.push_str(
            "Generate a professional, well-structured PR description in markdown format with sections for \
             Summary, Changes, Conflicts Resolved, and Testing.",
        );
    }
    prompt
}

/// Rough classification of a conflict from its path and content.
pub fn conflict_kind(conflict: &Conflict) -> &'static str {
    let file = conflict.file.to_string_lossy().to_lowercase();
    let content = conflict.raw_content.to_lowercase();

    if file.contains("kconfig") {
        "Kconfig option definition"
    } else if file.contains("devicetree") || file.ends_with(".cb") || file.ends_with(".dts") {
        "Device tree configuration"
    } else if file.contains("gpio") && content.contains("gpio_") {
        "GPIO pin configuration"
    } else if content.contains("register") || content.contains("#define") {
        "Register definition"
    } else if content.contains("config") || content.contains("cfg") {
        "Configuration setting"
    } else if content.contains("delay") || content.contains("timing") {
        "Timing parameter"
    } else {
        "Code change"
    }
}

/// Drop trailing blank space and a markdown fence wrapping the whole answer.
///
/// Leading text is kept as is and a final newline survives. The fence only
/// goes when the opening line is a bare fence or a fence with a language
/// tag, the closing line is a bare fence, and no other fence sits between.
pub fn clean_completion(text: &str) -> String {
    let trimmed = text.trim_end();
    let (body, fenced) = match unwrap_fence(trimmed) {
        Some(inner) => (inner, true),
        None => (trimmed, false),
    };

    let mut out = body.to_string();
    if !out.is_empty() && (fenced || text.ends_with('\n')) {
        out.push('\n');
    }
    out
}

fn unwrap_fence(text: &str) -> Option<&str> {
    let text = text.trim_start_matches(['\r', '\n']);
    let (opening, rest) = text.split_once('\n')?;
    let tag = opening.trim_end().strip_prefix("```")?;
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "+-_.#".contains(c))
    {
        return None;
    }

    let inner = rest.strip_suffix("```")?;
    let inner = if inner.is_empty() {
        inner
    } else {
        let inner = inner.strip_suffix('\n')?;
        inner.strip_suffix('\r').unwrap_or(inner)
    };
    if inner.lines().any(|l| l.trim_start().starts_with("```")) {
        return None;
    }
    Some(inner)
}
