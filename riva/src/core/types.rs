//! Shared deterministic types for the intention engine.
//!
//! These types define stable contracts between the navigator, the cycle executor,
//! checkpoint gates, and the session record. They never touch I/O.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one intention.
///
/// Transitions only move forward: `Pending -> Active -> {Verified | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentionStatus {
    Pending,
    Active,
    Verified,
    Failed,
}

impl IntentionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentionStatus::Pending => "pending",
            IntentionStatus::Active => "active",
            IntentionStatus::Verified => "verified",
            IntentionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, IntentionStatus::Verified | IntentionStatus::Failed)
    }

    /// True if the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: IntentionStatus) -> bool {
        matches!(
            (self, next),
            (IntentionStatus::Pending, IntentionStatus::Active)
                | (IntentionStatus::Active, IntentionStatus::Verified)
                | (IntentionStatus::Active, IntentionStatus::Failed)
        )
    }
}

impl fmt::Display for IntentionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of operation a cycle attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Run a shell command in the workspace.
    Command,
    /// Modify (append to) an existing file.
    Edit,
    /// Create a new file.
    Create,
    /// Delete a file.
    Delete,
    /// Read-only search of the workspace.
    Query,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Command => "command",
            ActionType::Edit => "edit",
            ActionType::Create => "create",
            ActionType::Delete => "delete",
            ActionType::Query => "query",
        }
    }

    /// True for action types that act on a file path.
    pub fn needs_target(self) -> bool {
        matches!(
            self,
            ActionType::Edit | ActionType::Create | ActionType::Delete
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Four-valued outcome of a cycle.
///
/// The deterministic evaluator never produces `Partial`; only a checkpoint override can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Judgment {
    Success,
    Failure,
    Partial,
    Unclear,
}

impl Judgment {
    pub fn as_str(self) -> &'static str {
        match self {
            Judgment::Success => "success",
            Judgment::Failure => "failure",
            Judgment::Partial => "partial",
            Judgment::Unclear => "unclear",
        }
    }

    pub fn is_success(self) -> bool {
        self == Judgment::Success
    }
}

impl fmt::Display for Judgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Judgment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" | "s" => Ok(Judgment::Success),
            "failure" | "fail" | "f" => Ok(Judgment::Failure),
            "partial" | "p" => Ok(Judgment::Partial),
            "unclear" | "u" => Ok(Judgment::Unclear),
            other => Err(format!("unknown judgment '{other}'")),
        }
    }
}

/// A concrete operation proposed for one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    /// Command line, file content, or search text depending on `kind`.
    pub content: String,
    /// Workspace-relative path for file actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Action {
    pub fn command(content: impl Into<String>) -> Self {
        Self {
            kind: ActionType::Command,
            content: content.into(),
            target: None,
        }
    }

    pub fn create(target: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: ActionType::Create,
            content: content.into(),
            target: Some(target.into()),
        }
    }

    pub fn edit(target: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: ActionType::Edit,
            content: content.into(),
            target: Some(target.into()),
        }
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self {
            kind: ActionType::Delete,
            content: String::new(),
            target: Some(target.into()),
        }
    }

    pub fn query(content: impl Into<String>) -> Self {
        Self {
            kind: ActionType::Query,
            content: content.into(),
            target: None,
        }
    }
}

/// File state observed by the dispatcher right after a file action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    pub exists: bool,
    /// For edits: whether the file now contains the written content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_expected: Option<bool>,
}

/// Raw outcome of dispatching an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code, or a synthetic 0/1 for file actions. `None` when unknown.
    pub exit_status: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetState>,
}

impl ActionResult {
    /// Result for a successful action with a synthetic zero exit.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_status: Some(0),
            ..Self::default()
        }
    }

    /// Result for an action that ran and failed.
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_status: Some(1),
            ..Self::default()
        }
    }

    /// Result recorded when the action never produced an authoritative outcome
    /// (planning failed, the dispatcher was unreachable, or the call timed out).
    pub fn not_dispatched(reason: impl Into<String>) -> Self {
        Self {
            stderr: reason.into(),
            exit_status: None,
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target: TargetState) -> Self {
        self.target = Some(target);
        self
    }

    /// Short single-string rendering used in prompts and reports.
    pub fn summary(&self, limit: usize) -> String {
        let mut text = String::new();
        if let Some(code) = self.exit_status {
            text.push_str(&format!("exit {code}; "));
        }
        if self.timed_out {
            text.push_str("timed out; ");
        }
        text.push_str(self.stdout.trim());
        if !self.stderr.trim().is_empty() {
            text.push_str(" | ");
            text.push_str(self.stderr.trim());
        }
        truncate_chars(&text, limit)
    }
}

/// A finished attempt at verifying an intention directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    pub thought: String,
    pub action: Action,
    pub result: ActionResult,
    pub judgment: Judgment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<String>,
    /// Set when the checkpoint refused the reflection; it is kept for the audit
    /// trail but never steers later attempts.
    #[serde(default)]
    pub reflection_rejected: bool,
}

impl Cycle {
    /// Reflection text the engine may act on.
    pub fn usable_reflection(&self) -> Option<&str> {
        if self.reflection_rejected {
            return None;
        }
        self.reflection.as_deref()
    }
}

/// An attempt that has been dispatched and evaluated but not yet judged by a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleDraft {
    pub thought: String,
    pub action: Action,
    pub result: ActionResult,
    /// Verdict of the deterministic evaluator.
    pub evaluated: Judgment,
}

impl CycleDraft {
    pub fn finish(self, judgment: Judgment) -> Cycle {
        Cycle {
            thought: self.thought,
            action: self.action,
            result: self.result,
            judgment,
            reflection: None,
            reflection_rejected: false,
        }
    }
}

/// A proposed child intention, before it is attached to the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentionDraft {
    pub what: String,
    pub acceptance: String,
}

impl IntentionDraft {
    pub fn new(what: impl Into<String>, acceptance: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            acceptance: acceptance.into(),
        }
    }
}

/// Truncate to at most `limit` characters without splitting a code point.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
