//! Deterministic judgment of one dispatched action.
//!
//! [`evaluate`] is a pure function of `(action, result)`: the same pair always yields the
//! same verdict. It never returns `Partial`; that verdict is reserved for checkpoint
//! overrides.

use crate::core::text::{contains_any, words};
use crate::core::types::{Action, ActionResult, ActionType, Judgment};

const FAILURE_MARKERS: &[&str] = &[
    "error",
    "failed",
    "exception",
    "traceback",
    "permission denied",
];

const SUCCESS_MARKERS: &[&str] = &["success", "succeeded", "passed", "completed", "done", "ok"];

fn action_success_markers(kind: ActionType) -> &'static [&'static str] {
    match kind {
        ActionType::Create => &["created"],
        ActionType::Edit => &["edited", "updated"],
        ActionType::Delete => &["deleted", "removed"],
        ActionType::Command | ActionType::Query => &[],
    }
}

/// Classify an action outcome.
///
/// Exit status is authoritative when present. Otherwise observed file effects decide,
/// then failure markers, then success markers; anything else is `Unclear`.
pub fn evaluate(action: &Action, result: &ActionResult) -> Judgment {
    match result.exit_status {
        Some(0) => return Judgment::Success,
        Some(_) => return Judgment::Failure,
        None => {}
    }
    if result.timed_out {
        return Judgment::Unclear;
    }

    if let Some(target) = result.target {
        match action.kind {
            ActionType::Create if target.exists => return Judgment::Success,
            ActionType::Edit if target.contains_expected == Some(true) => {
                return Judgment::Success;
            }
            _ => {}
        }
    }

    let output = words(&format!("{}\n{}", result.stdout, result.stderr));
    if contains_any(&output, FAILURE_MARKERS) {
        return Judgment::Failure;
    }
    if contains_any(&output, SUCCESS_MARKERS)
        || contains_any(&output, action_success_markers(action.kind))
    {
        return Judgment::Success;
    }
    Judgment::Unclear
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TargetState;

    fn no_exit(stdout: &str) -> ActionResult {
        ActionResult {
            stdout: stdout.to_string(),
            ..ActionResult::default()
        }
    }

    #[test]
    fn exit_status_is_authoritative() {
        let action = Action::command("cargo test");
        let mut result = ActionResult::ok("test result: 1 error ignored");
        assert_eq!(evaluate(&action, &result), Judgment::Success);
        result.exit_status = Some(101);
        result.stdout = "all tests passed".to_string();
        assert_eq!(evaluate(&action, &result), Judgment::Failure);
    }

    #[test]
    fn created_target_is_success() {
        let action = Action::create("out.txt", "hi");
        let result = no_exit("").with_target(TargetState {
            exists: true,
            contains_expected: None,
        });
        assert_eq!(evaluate(&action, &result), Judgment::Success);
    }

    #[test]
    fn edit_needs_expected_content() {
        let action = Action::edit("out.txt", "hi");
        let missing = no_exit("").with_target(TargetState {
            exists: true,
            contains_expected: Some(false),
        });
        assert_eq!(evaluate(&action, &missing), Judgment::Unclear);
        let present = no_exit("").with_target(TargetState {
            exists: true,
            contains_expected: Some(true),
        });
        assert_eq!(evaluate(&action, &present), Judgment::Success);
    }

    #[test]
    fn failure_markers_beat_success_markers() {
        let action = Action::command("make");
        let result = no_exit("build completed\nTraceback (most recent call last)");
        assert_eq!(evaluate(&action, &result), Judgment::Failure);
        let denied = ActionResult {
            stderr: "Permission denied".to_string(),
            ..ActionResult::default()
        };
        assert_eq!(evaluate(&action, &denied), Judgment::Failure);
    }

    #[test]
    fn action_specific_markers_apply_to_their_kind() {
        let deleted = no_exit("Deleted file: a.txt");
        assert_eq!(evaluate(&Action::delete("a.txt"), &deleted), Judgment::Success);
        assert_eq!(evaluate(&Action::query("a"), &deleted), Judgment::Unclear);
    }

    #[test]
    fn silence_and_timeouts_are_unclear() {
        let action = Action::command("sleep 10");
        assert_eq!(evaluate(&action, &no_exit("")), Judgment::Unclear);
        let timed_out = ActionResult {
            timed_out: true,
            stdout: "done".to_string(),
            ..ActionResult::default()
        };
        assert_eq!(evaluate(&action, &timed_out), Judgment::Unclear);
    }

    #[test]
    fn plural_words_do_not_trigger_markers() {
        let action = Action::command("lint");
        assert_eq!(evaluate(&action, &no_exit("0 errors, 0 warnings")), Judgment::Unclear);
    }

    #[test]
    fn evaluation_is_repeatable() {
        let action = Action::command("ls");
        let result = no_exit("created 3 files");
        let first = evaluate(&action, &result);
        for _ in 0..5 {
            assert_eq!(evaluate(&action, &result), first);
        }
    }
}
