//! Cycle executor: one thought, action, judgment, and optional reflection.

use tracing::{debug, instrument, warn};

use crate::checkpoint::{CheckpointGate, CheckpointKind};
use crate::core::judgment::evaluate;
use crate::core::tree::{IntentionId, IntentionTree};
use crate::core::types::{Action, ActionResult, Cycle, CycleDraft, Judgment, truncate_chars};
use crate::error::EngineError;
use crate::io::completion::{CompletionService, PlanRequest};
use crate::io::dispatcher::ActionDispatcher;
use crate::io::session::TimelineEvent;
use crate::navigator::WorkContext;

const GOAL_EXCERPT_CHARS: usize = 50;

/// Run one cycle for `id` and append it to the trace.
///
/// Every started cycle ends with a judgment. Planning and dispatch errors become an
/// `Unclear` cycle whose reflection carries the error text; only tree errors escape.
#[instrument(skip_all, fields(intention = %id))]
pub fn run_cycle<C, D, G>(
    tree: &mut IntentionTree,
    id: IntentionId,
    ctx: &mut WorkContext<'_, C, D, G>,
) -> Result<Cycle, EngineError>
where
    C: CompletionService + ?Sized,
    D: ActionDispatcher + ?Sized,
    G: CheckpointGate + ?Sized,
{
    let index = tree.get(id)?.trace.len();

    let proposal = {
        let request = PlanRequest::from_tree(tree, id)?;
        ctx.completion
            .propose_action(&request, ctx.completion_call_timeout())
    };
    let (thought, action) = match proposal {
        Ok(proposal) => proposal,
        Err(err) => {
            let error = format!("{err:#}");
            warn!(%error, "action planning unavailable");
            ctx.emit(
                Some(id),
                TimelineEvent::PlanningUnavailable {
                    call: "propose_action".to_string(),
                    error: error.clone(),
                },
            );
            let goal = truncate_chars(tree.get(id)?.what.trim(), GOAL_EXCERPT_CHARS);
            let mut cycle = CycleDraft {
                thought: "planning unavailable".to_string(),
                action: Action::query(goal),
                result: ActionResult::not_dispatched(&error),
                evaluated: Judgment::Unclear,
            }
            .finish(Judgment::Unclear);
            cycle.reflection = Some(EngineError::PlanningUnavailable(error).to_string());
            return record(tree, id, index, Judgment::Unclear, cycle, ctx);
        }
    };

    debug!(kind = %action.kind, target = ?action.target, "dispatching");
    let draft = match ctx.dispatcher.execute(&action, ctx.dispatch_call_timeout()) {
        Ok(result) => {
            let evaluated = evaluate(&action, &result);
            CycleDraft {
                thought,
                action,
                result,
                evaluated,
            }
        }
        Err(err) => {
            let error = format!("{err:#}");
            warn!(%error, "dispatch failed");
            ctx.emit(
                Some(id),
                TimelineEvent::DispatchFailed {
                    error: error.clone(),
                },
            );
            let mut cycle = CycleDraft {
                thought,
                action,
                result: ActionResult::not_dispatched(&error),
                evaluated: Judgment::Unclear,
            }
            .finish(Judgment::Unclear);
            cycle.reflection = Some(EngineError::DispatchFailure(error).to_string());
            return record(tree, id, index, Judgment::Unclear, cycle, ctx);
        }
    };

    let evaluated = draft.evaluated;
    let decision = ctx.checkpoint.judge_action(tree.get(id)?, &draft);
    ctx.record_decision(id, CheckpointKind::JudgeAction, &decision);
    let mut cycle = draft.finish(decision.answer);

    if !cycle.judgment.is_success() {
        let reflection = {
            let request = PlanRequest::from_tree(tree, id)?;
            ctx.completion
                .propose_reflection(&request, &cycle, ctx.completion_call_timeout())
        };
        let reflection = match reflection {
            Ok(text) => text,
            Err(err) => {
                let error = format!("{err:#}");
                warn!(%error, "reflection planning unavailable");
                ctx.emit(
                    Some(id),
                    TimelineEvent::PlanningUnavailable {
                        call: "propose_reflection".to_string(),
                        error: error.clone(),
                    },
                );
                EngineError::PlanningUnavailable(error).to_string()
            }
        };
        cycle.reflection = Some(reflection);
        let review = ctx.checkpoint.review_reflection(tree.get(id)?, &cycle);
        ctx.record_decision(id, CheckpointKind::ReviewReflection, &review);
        cycle.reflection_rejected = !review.answer;
    }

    record(tree, id, index, evaluated, cycle, ctx)
}

fn record<C, D, G>(
    tree: &mut IntentionTree,
    id: IntentionId,
    index: usize,
    evaluated: Judgment,
    cycle: Cycle,
    ctx: &mut WorkContext<'_, C, D, G>,
) -> Result<Cycle, EngineError>
where
    C: ?Sized,
    D: ?Sized,
    G: ?Sized,
{
    tree.append_cycle(id, cycle.clone())?;
    debug!(index, judgment = %cycle.judgment, "cycle recorded");
    ctx.emit(
        Some(id),
        TimelineEvent::CycleCompleted {
            index,
            action_type: cycle.action.kind,
            evaluated,
            judgment: cycle.judgment,
        },
    );
    Ok(cycle)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::checkpoint::auto::AutoCheckpoint;
    use crate::core::budget::{Budget, Limits};
    use crate::core::types::ActionType;
    use crate::io::session::{SessionRecorder, TimelineEntry};
    use crate::test_support::{
        ScriptedCompletion, ScriptedDispatch, ScriptedDispatcher, active_tree, propose,
    };

    fn cycle_once(
        completion: &ScriptedCompletion,
        dispatcher: &ScriptedDispatcher,
        what: &str,
    ) -> (Cycle, Vec<TimelineEvent>) {
        let mut tree = active_tree(what, "build passes");
        let limits = Limits::default();
        let mut recorder = SessionRecorder::new("run-20260101_000000-abc123".to_string());
        let mut seen = Vec::new();
        let mut observe = |entry: &TimelineEntry| seen.push(entry.event.clone());
        let mut ctx = WorkContext {
            completion,
            dispatcher,
            checkpoint: &AutoCheckpoint,
            limits,
            budget: Budget::start(&limits),
            completion_timeout: Duration::from_secs(1),
            dispatch_timeout: Duration::from_secs(1),
            recorder: &mut recorder,
            on_event: &mut observe,
        };
        let cycle = run_cycle(&mut tree, IntentionId::ROOT, &mut ctx).expect("cycle");
        assert_eq!(tree.root().trace.last(), Some(&cycle));
        (cycle, seen)
    }

    #[test]
    fn successful_action_skips_reflection() {
        let completion = ScriptedCompletion::new(vec![propose("go", Action::command("make"))]);
        let (cycle, events) = cycle_once(&completion, &ScriptedDispatcher::default(), "build");

        assert_eq!(cycle.judgment, Judgment::Success);
        assert!(cycle.reflection.is_none());
        assert_eq!(completion.calls(), vec!["action:int-0000"]);
        assert!(matches!(
            events.last(),
            Some(TimelineEvent::CycleCompleted { index: 0, .. })
        ));
    }

    /// Verifies a refused reflection stays in the trace but is not usable.
    #[test]
    fn rejected_reflection_is_kept_but_flagged() {
        let completion = ScriptedCompletion::new(vec![propose("go", Action::command("make"))])
            .with_reflections(vec![Ok("   ".to_string())]);
        let dispatcher =
            ScriptedDispatcher::new(vec![ScriptedDispatch::Result(ActionResult::failed("boom"))]);
        let (cycle, _) = cycle_once(&completion, &dispatcher, "build");

        assert_eq!(cycle.judgment, Judgment::Failure);
        assert_eq!(cycle.reflection.as_deref(), Some("   "));
        assert!(cycle.reflection_rejected);
        assert!(cycle.usable_reflection().is_none());
    }

    #[test]
    fn planning_failure_records_query_without_dispatch() {
        let completion = ScriptedCompletion::default();
        let dispatcher = ScriptedDispatcher::default();
        let goal = "an intention whose goal text runs well past fifty characters";
        let (cycle, events) = cycle_once(&completion, &dispatcher, goal);

        assert!(dispatcher.executed().is_empty());
        assert_eq!(cycle.judgment, Judgment::Unclear);
        assert_eq!(cycle.thought, "planning unavailable");
        assert_eq!(cycle.action.kind, ActionType::Query);
        assert!(cycle.action.content.starts_with("an intention whose goal"));
        assert!(cycle.action.content.ends_with("..."));
        assert_eq!(cycle.result.exit_status, None);
        assert_eq!(
            cycle.reflection.as_deref(),
            Some("planning unavailable: no scripted action left")
        );
        assert!(events.iter().any(|e| matches!(
            e,
            TimelineEvent::PlanningUnavailable { call, .. } if call == "propose_action"
        )));
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, TimelineEvent::Checkpoint { .. }))
        );
    }

    #[test]
    fn reflection_failure_is_recorded_as_text() {
        let completion = ScriptedCompletion::new(vec![propose("go", Action::command("make"))])
            .with_reflections(vec![Err("model offline".to_string())]);
        let dispatcher =
            ScriptedDispatcher::new(vec![ScriptedDispatch::Result(ActionResult::failed("no"))]);
        let (cycle, events) = cycle_once(&completion, &dispatcher, "build");

        assert_eq!(
            cycle.reflection.as_deref(),
            Some("planning unavailable: model offline")
        );
        assert!(events.iter().any(|e| matches!(
            e,
            TimelineEvent::PlanningUnavailable { call, .. } if call == "propose_reflection"
        )));
    }
}
