//! Run timeline recording and session files under `.riva/sessions/`.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::checkpoint::{CheckpointKind, DecisionOrigin};
use crate::core::budget::BudgetBreach;
use crate::core::decision::{DecomposeTrigger, Directness};
use crate::core::invariants::validate_invariants;
use crate::core::tree::{IntentionId, IntentionTree};
use crate::core::types::{ActionType, IntentionStatus, Judgment};
use crate::io::config::write_atomic;
use crate::io::schema::{SESSION_V1, validate_schema};

/// Which limit stopped work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Limit {
    Depth { depth: u32, max_depth: u32 },
    Deadline,
    Iterations { used: u32, max: u32 },
}

impl From<BudgetBreach> for Limit {
    fn from(breach: BudgetBreach) -> Self {
        match breach {
            BudgetBreach::Deadline => Limit::Deadline,
            BudgetBreach::Iterations { used, max } => Limit::Iterations { used, max },
        }
    }
}

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEvent {
    IntentionStarted {
        depth: u32,
    },
    VerifiabilityAssessed {
        directness: Directness,
    },
    CycleCompleted {
        /// Zero-based position in the intention's trace.
        index: usize,
        action_type: ActionType,
        evaluated: Judgment,
        judgment: Judgment,
    },
    Checkpoint {
        kind: CheckpointKind,
        answer: String,
        origin: DecisionOrigin,
    },
    DecompositionProposed {
        children: Vec<String>,
        /// The heuristic decomposition stood in for the completion service.
        fallback: bool,
    },
    PlanningUnavailable {
        call: String,
        error: String,
    },
    DispatchFailed {
        error: String,
    },
    LimitReached {
        limit: Limit,
    },
    DecompositionTriggered {
        trigger: DecomposeTrigger,
    },
    IntentionFinished {
        status: IntentionStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intention: Option<IntentionId>,
    pub event: TimelineEvent,
}

/// Append-only timeline for one run.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    run_id: String,
    started_at: DateTime<Utc>,
    timeline: Vec<TimelineEntry>,
}

impl SessionRecorder {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            timeline: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    pub fn record(&mut self, intention: Option<IntentionId>, event: TimelineEvent) -> &TimelineEntry {
        let seq = self.timeline.len() as u64;
        debug!(seq, intention = ?intention, ?event, "timeline event");
        self.timeline.push(TimelineEntry {
            seq,
            at: Utc::now(),
            intention,
            event,
        });
        &self.timeline[self.timeline.len() - 1]
    }

    /// Close the run and attach the final tree.
    pub fn finish(self, tree: IntentionTree) -> Session {
        let finished_at = Utc::now();
        let duration = finished_at - self.started_at;
        let metadata = SessionMetadata {
            total_cycles: tree.total_cycles(),
            max_depth: tree.max_depth(),
            intention_count: tree.len(),
            outcome: tree.root().status,
            duration_secs: duration.num_milliseconds().max(0) as f64 / 1000.0,
        };
        Session {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at,
            tree,
            timeline: self.timeline,
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub total_cycles: usize,
    pub max_depth: u32,
    pub intention_count: usize,
    /// Final status of the root intention.
    pub outcome: IntentionStatus,
    pub duration_secs: f64,
}

/// Full record of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tree: IntentionTree,
    pub timeline: Vec<TimelineEntry>,
    pub metadata: SessionMetadata,
}

/// `run-YYYYMMDD_HHMMSS-xxxxxx`, UTC plus six lowercase alphanumerics.
pub fn new_run_id() -> String {
    let mut rng = rand::thread_rng();
    let short: String = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("run-{}-{short}", Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Default location of a session file inside a workspace.
pub fn session_path(root: &Path, run_id: &str) -> PathBuf {
    root.join(".riva")
        .join("sessions")
        .join(format!("{run_id}.json"))
}

/// Write a session as pretty JSON with a trailing newline (temp file + rename).
#[instrument(skip_all, fields(run_id = %session.run_id, path = %path.display()))]
pub fn save_session(path: &Path, session: &Session) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(session).context("serialize session json")?;
    buf.push('\n');
    write_atomic(path, &buf)?;
    info!(entries = session.timeline.len(), "session saved");
    Ok(())
}

/// Load a session, checking the schema first and the tree invariants second.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_session(path: &Path) -> Result<Session> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let json: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    validate_schema(&json, SESSION_V1)?;
    let session: Session = serde_json::from_value(json).context("parse session as v1 struct")?;
    let errors = validate_invariants(&session.tree);
    if !errors.is_empty() {
        bail!("invariant violations:\n- {}", errors.join("\n- "));
    }
    Ok(session)
}

/// Indented depth-first outline: `[status] id what (n cycles)`.
pub fn render_outline(tree: &IntentionTree) -> String {
    let mut out = String::new();
    for node in tree.depth_first(IntentionId::ROOT) {
        let cycles = node.trace.len();
        let _ = writeln!(
            out,
            "{:indent$}[{}] {} {} ({cycles} {})",
            "",
            node.status,
            node.id,
            node.what,
            if cycles == 1 { "cycle" } else { "cycles" },
            indent = node.depth as usize * 2,
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Action, ActionResult, CycleDraft, IntentionDraft};

    fn finished_tree() -> IntentionTree {
        let mut tree = IntentionTree::new("set up A and configure B", "B responds");
        tree.transition(IntentionId::ROOT, IntentionStatus::Active)
            .expect("active");
        for what in ["set up A", "configure B"] {
            let id = tree
                .add_child(IntentionId::ROOT, IntentionDraft::new(what, "it runs"))
                .expect("child");
            tree.transition(id, IntentionStatus::Active).expect("active");
            let cycle = CycleDraft {
                thought: "do it".to_string(),
                action: Action::command("true"),
                result: ActionResult::ok(""),
                evaluated: Judgment::Success,
            }
            .finish(Judgment::Success);
            tree.append_cycle(id, cycle).expect("cycle");
            tree.transition(id, IntentionStatus::Verified)
                .expect("verified");
        }
        tree.transition(IntentionId::ROOT, IntentionStatus::Verified)
            .expect("verified");
        tree
    }

    fn recorded_session() -> Session {
        let mut recorder = SessionRecorder::new(new_run_id());
        recorder.record(
            Some(IntentionId::ROOT),
            TimelineEvent::IntentionStarted { depth: 0 },
        );
        recorder.record(
            Some(IntentionId::ROOT),
            TimelineEvent::Checkpoint {
                kind: CheckpointKind::ApproveDecomposition,
                answer: "true".to_string(),
                origin: DecisionOrigin::Fallback {
                    reason: "deferred".to_string(),
                },
            },
        );
        recorder.record(
            None,
            TimelineEvent::LimitReached {
                limit: BudgetBreach::Iterations { used: 3, max: 3 }.into(),
            },
        );
        recorder.finish(finished_tree())
    }

    #[test]
    fn run_ids_follow_the_documented_shape() {
        let id = new_run_id();
        let re = regex::Regex::new(r"^run-\d{8}_\d{6}-[a-z0-9]{6}$").expect("regex");
        assert!(re.is_match(&id), "{id}");
    }

    #[test]
    fn recorder_numbers_entries_and_summarises() {
        let session = recorded_session();
        let seqs: Vec<u64> = session.timeline.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(session.metadata.total_cycles, 2);
        assert_eq!(session.metadata.intention_count, 3);
        assert_eq!(session.metadata.max_depth, 1);
        assert_eq!(session.metadata.outcome, IntentionStatus::Verified);
        assert!(session.finished_at >= session.started_at);
    }

    /// Verifies save -> load round-trips through schema and invariant checks.
    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let session = recorded_session();
        let path = session_path(temp.path(), &session.run_id);
        save_session(&path, &session).expect("save");

        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.ends_with("}\n"));
        assert!(raw.contains("\"type\": \"limit_reached\""));

        let loaded = load_session(&path).expect("load");
        assert_eq!(loaded, session);
    }

    #[test]
    fn load_rejects_schema_violations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bad.json");
        fs::write(&path, r#"{"run_id": "nope"}"#).expect("write");
        let err = load_session(&path).expect_err("schema");
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn load_rejects_invariant_violations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session.json");
        let session = recorded_session();
        let mut json = serde_json::to_value(&session).expect("json");
        json["tree"]["nodes"][1]["status"] = Value::from("pending");
        fs::write(&path, serde_json::to_string(&json).expect("text")).expect("write");

        let err = load_session(&path).expect_err("invariants");
        let text = err.to_string();
        assert!(text.starts_with("invariant violations"));
        assert!(text.contains("int-0001: pending node has work recorded"), "{text}");
    }

    #[test]
    fn outline_indents_by_depth() {
        let outline = render_outline(&finished_tree());
        let lines: Vec<&str> = outline.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[verified] int-0000 set up A and configure B (0 cycles)",
                "  [verified] int-0001 set up A (1 cycle)",
                "  [verified] int-0002 configure B (1 cycle)",
            ]
        );
    }
}
