//! Deterministic stand-ins for the completion service.
//!
//! Used when no completion backend is configured and whenever a backend fails to
//! produce a decomposition.

use crate::core::decision::compound_clauses;
use crate::core::text::{contains_any, words};
use crate::core::tree::Intention;
use crate::core::types::{Action, Cycle, IntentionDraft, truncate_chars};

/// Upper bound on children in any decomposition.
pub const MAX_CHILDREN: usize = 5;
/// Lower bound on children in any decomposition.
pub const MIN_CHILDREN: usize = 2;

const GOAL_EXCERPT_CHARS: usize = 50;

/// Split a goal on its clause connectives, or into setup + core phases when it has none.
pub fn decompose(intention: &Intention) -> Vec<IntentionDraft> {
    let mut clauses = compound_clauses(&intention.what);
    if clauses.len() >= MIN_CHILDREN {
        if clauses.len() > MAX_CHILDREN {
            let tail = clauses.split_off(MAX_CHILDREN - 1).join("; ");
            clauses.push(tail);
        }
        return clauses
            .into_iter()
            .map(|clause| {
                let acceptance = format!("{clause} produces the expected result");
                IntentionDraft::new(clause, acceptance)
            })
            .collect();
    }

    let excerpt = truncate_chars(&intention.what, GOAL_EXCERPT_CHARS);
    vec![
        IntentionDraft::new(
            format!("Set up prerequisites for: {excerpt}"),
            "prerequisite setup runs without errors",
        ),
        IntentionDraft::new(
            format!("Implement core logic: {excerpt}"),
            intention.acceptance.clone(),
        ),
    ]
}

/// Pick an action from keywords in the goal.
///
/// `file_exists` reports whether a workspace-relative path already exists, which turns
/// a create into an edit.
pub fn propose_action(
    intention: &Intention,
    test_command: &str,
    file_exists: impl Fn(&str) -> bool,
) -> (String, Action) {
    let goal_words = words(&intention.what);

    if contains_any(&goal_words, &["create", "write", "add", "implement"]) {
        let content = inline_content(&intention.what)
            .unwrap_or_else(|| format!("{}\n", intention.what.trim()));
        return match filename_in(&intention.what) {
            Some(target) if file_exists(&target) => (
                format!("Adding to existing file {target}"),
                Action::edit(target, content),
            ),
            Some(target) => (
                format!("Creating file {target}"),
                Action::create(target, content),
            ),
            None => (
                "Creating new file".to_string(),
                Action::create("new_file.txt", content),
            ),
        };
    }

    if contains_any(&goal_words, &["test", "verify", "check"]) {
        return (
            "Running tests to verify".to_string(),
            Action::command(test_command),
        );
    }

    (
        "Exploring workspace for context".to_string(),
        Action::query(truncate_chars(intention.what.trim(), GOAL_EXCERPT_CHARS)),
    )
}

pub fn reflect(cycle: &Cycle) -> String {
    format!(
        "Action ended with judgment {}. Retrying with a different approach.",
        cycle.judgment
    )
}

/// First whitespace token that looks like a file name (`name.ext`).
fn filename_in(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|token| token.trim_matches(|c: char| "'\"(),:;`".contains(c)))
        .map(|token| token.trim_end_matches('.'))
        .find(|token| {
            token.len() < 50
                && token
                    .rsplit_once('.')
                    .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        })
        .map(str::to_string)
}

/// Text after "containing" / "with content" / "with text", if the goal spells it out.
fn inline_content(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    ["containing ", "with content ", "with text "]
        .iter()
        .filter_map(|marker| lower.find(marker).map(|idx| idx + marker.len()))
        .min()
        .and_then(|start| text.get(start..))
        .map(|rest| {
            rest.trim()
                .trim_matches(|c: char| c == '"' || c == '\'')
                .to_string()
        })
        .filter(|content| !content.is_empty())
}
