//! Recursive navigator: drives one intention through its state machine.
//!
//! `work` is the only recursive entry point. It sequences cycles, decomposition, and
//! integration, enforces the limits carried in [`WorkContext`], and records every step
//! through the session recorder. Domain decisions live in `core` and the checkpoint gate.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::checkpoint::{CheckpointGate, CheckpointKind, Decision};
use crate::core::budget::{Budget, BudgetBreach, Limits};
use crate::core::decision::{Directness, assess_directness, decomposition_trigger};
use crate::core::heuristics;
use crate::core::tree::{Intention, IntentionId, IntentionTree};
use crate::core::types::IntentionStatus;
use crate::cycle::run_cycle;
use crate::error::EngineError;
use crate::io::completion::{CompletionService, PlanRequest};
use crate::io::dispatcher::ActionDispatcher;
use crate::io::session::{Limit, SessionRecorder, TimelineEntry, TimelineEvent};

/// Services, limits, and recording state shared by every recursive call.
pub struct WorkContext<'a, C: ?Sized, D: ?Sized, G: ?Sized> {
    pub completion: &'a C,
    pub dispatcher: &'a D,
    pub checkpoint: &'a G,
    pub limits: Limits,
    pub budget: Budget,
    /// Upper bound for one completion call; the remaining budget may shorten it.
    pub completion_timeout: Duration,
    /// Upper bound for one dispatched action; the remaining budget may shorten it.
    pub dispatch_timeout: Duration,
    pub recorder: &'a mut SessionRecorder,
    pub on_event: &'a mut dyn FnMut(&TimelineEntry),
}

impl<C: ?Sized, D: ?Sized, G: ?Sized> WorkContext<'_, C, D, G> {
    /// Record an event and hand it to the observer.
    pub fn emit(&mut self, intention: Option<IntentionId>, event: TimelineEvent) {
        let entry = self.recorder.record(intention, event);
        (self.on_event)(entry);
    }

    pub fn record_decision<T: fmt::Display>(
        &mut self,
        id: IntentionId,
        kind: CheckpointKind,
        decision: &Decision<T>,
    ) {
        self.emit(
            Some(id),
            TimelineEvent::Checkpoint {
                kind,
                answer: decision.answer.to_string(),
                origin: decision.origin.clone(),
            },
        );
    }

    pub fn completion_call_timeout(&self) -> Duration {
        self.budget.call_timeout(self.completion_timeout)
    }

    pub fn dispatch_call_timeout(&self) -> Duration {
        self.budget.call_timeout(self.dispatch_timeout)
    }
}

/// Whether the caller may keep driving siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// A run-wide limit was hit; every unfinished ancestor must fail as the stack unwinds.
    Abort(BudgetBreach),
}

/// Drive `id` to a terminal status.
///
/// Returns `Err` only for tree invariant violations. Terminal intentions are left
/// untouched.
#[instrument(skip_all, fields(intention = %id))]
pub fn work<C, D, G>(
    tree: &mut IntentionTree,
    id: IntentionId,
    ctx: &mut WorkContext<'_, C, D, G>,
) -> Result<Flow, EngineError>
where
    C: CompletionService + ?Sized,
    D: ActionDispatcher + ?Sized,
    G: CheckpointGate + ?Sized,
{
    let (status, depth) = {
        let node = tree.get(id)?;
        (node.status, node.depth)
    };
    if status.is_terminal() {
        debug!(%status, "already terminal");
        return Ok(Flow::Continue);
    }
    if status == IntentionStatus::Pending {
        tree.transition(id, IntentionStatus::Active)?;
    }
    ctx.emit(Some(id), TimelineEvent::IntentionStarted { depth });

    if let Err(breach) = ctx.budget.check() {
        return abort(tree, id, breach, ctx);
    }
    if depth >= ctx.limits.max_depth {
        let err = EngineError::DepthExceeded {
            id,
            depth,
            max_depth: ctx.limits.max_depth,
        };
        warn!(%err, "depth limit reached");
        ctx.emit(
            Some(id),
            TimelineEvent::LimitReached {
                limit: Limit::Depth {
                    depth,
                    max_depth: ctx.limits.max_depth,
                },
            },
        );
        settle(tree, id, IntentionStatus::Failed, ctx)?;
        return Ok(Flow::Continue);
    }

    let directness = assess_directness(tree.get(id)?);
    ctx.emit(
        Some(id),
        TimelineEvent::VerifiabilityAssessed { directness },
    );
    if directness == Directness::Direct {
        loop {
            if let Err(breach) = ctx.budget.check() {
                return abort(tree, id, breach, ctx);
            }
            ctx.budget.charge_iteration();
            let cycle = run_cycle(tree, id, ctx)?;
            if cycle.judgment.is_success() {
                settle(tree, id, IntentionStatus::Verified, ctx)?;
                return Ok(Flow::Continue);
            }
            let trigger = decomposition_trigger(
                tree.get(id)?,
                Some(&cycle),
                ctx.limits.max_cycles_per_intention,
            );
            if let Some(trigger) = trigger {
                info!(?trigger, "decomposing after direct attempts");
                ctx.emit(Some(id), TimelineEvent::DecompositionTriggered { trigger });
                break;
            }
        }
    }

    decompose(tree, id, ctx)
}

fn decompose<C, D, G>(
    tree: &mut IntentionTree,
    id: IntentionId,
    ctx: &mut WorkContext<'_, C, D, G>,
) -> Result<Flow, EngineError>
where
    C: CompletionService + ?Sized,
    D: ActionDispatcher + ?Sized,
    G: CheckpointGate + ?Sized,
{
    // No planning once the run budget is spent.
    if let Err(breach) = ctx.budget.check() {
        return abort(tree, id, breach, ctx);
    }
    let request = PlanRequest::from_tree(tree, id)?;
    let (proposed, fallback) =
        match ctx
            .completion
            .propose_decomposition(&request, ctx.completion_call_timeout())
        {
            Ok(children) => (children, false),
            Err(err) => {
                let error = format!("{err:#}");
                warn!(%error, "decomposition planning unavailable, using heuristic split");
                ctx.emit(
                    Some(id),
                    TimelineEvent::PlanningUnavailable {
                        call: "propose_decomposition".to_string(),
                        error,
                    },
                );
                (heuristics::decompose(request.intention), true)
            }
        };
    ctx.emit(
        Some(id),
        TimelineEvent::DecompositionProposed {
            children: proposed.iter().map(|child| child.what.clone()).collect(),
            fallback,
        },
    );

    let approval = ctx.checkpoint.approve_decomposition(tree.get(id)?, &proposed);
    ctx.record_decision(id, CheckpointKind::ApproveDecomposition, &approval);
    if !approval.answer {
        settle(tree, id, IntentionStatus::Failed, ctx)?;
        return Ok(Flow::Continue);
    }

    let children = proposed
        .into_iter()
        .map(|draft| tree.add_child(id, draft))
        .collect::<Result<Vec<_>, _>>()?;
    for child in children {
        if let Err(breach) = ctx.budget.check() {
            return abort(tree, id, breach, ctx);
        }
        if let Flow::Abort(breach) = work(tree, child, ctx)? {
            settle(tree, id, IntentionStatus::Failed, ctx)?;
            return Ok(Flow::Abort(breach));
        }
        if tree.get(child)?.status == IntentionStatus::Failed {
            info!(%child, "child failed, skipping remaining siblings");
            settle(tree, id, IntentionStatus::Failed, ctx)?;
            return Ok(Flow::Continue);
        }
    }

    let parent = tree.get(id)?;
    let children: Vec<&Intention> = parent
        .children
        .iter()
        .map(|child| tree.get(*child))
        .collect::<Result<_, _>>()?;
    let integration = ctx.checkpoint.verify_integration(parent, &children);
    ctx.record_decision(id, CheckpointKind::VerifyIntegration, &integration);
    let status = if integration.answer {
        IntentionStatus::Verified
    } else {
        IntentionStatus::Failed
    };
    settle(tree, id, status, ctx)?;
    Ok(Flow::Continue)
}

fn abort<C, D, G>(
    tree: &mut IntentionTree,
    id: IntentionId,
    breach: BudgetBreach,
    ctx: &mut WorkContext<'_, C, D, G>,
) -> Result<Flow, EngineError>
where
    C: ?Sized,
    D: ?Sized,
    G: ?Sized,
{
    warn!(%breach, "run budget exhausted");
    ctx.emit(
        Some(id),
        TimelineEvent::LimitReached {
            limit: breach.into(),
        },
    );
    settle(tree, id, IntentionStatus::Failed, ctx)?;
    Ok(Flow::Abort(breach))
}

fn settle<C, D, G>(
    tree: &mut IntentionTree,
    id: IntentionId,
    status: IntentionStatus,
    ctx: &mut WorkContext<'_, C, D, G>,
) -> Result<(), EngineError>
where
    C: ?Sized,
    D: ?Sized,
    G: ?Sized,
{
    tree.transition(id, status)?;
    info!(intention = %id, %status, "intention finished");
    ctx.emit(Some(id), TimelineEvent::IntentionFinished { status });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::auto::AutoCheckpoint;
    use crate::core::types::{Action, ActionResult, Judgment};
    use crate::test_support::{ScriptedCompletion, ScriptedDispatcher, active_tree, cycle};

    fn work_root(tree: &mut IntentionTree, limits: Limits) -> (Flow, Vec<TimelineEvent>) {
        let completion = ScriptedCompletion::default();
        let dispatcher = ScriptedDispatcher::default();
        let mut recorder = SessionRecorder::new("run-20260101_000000-abc123".to_string());
        let mut ctx = WorkContext {
            completion: &completion,
            dispatcher: &dispatcher,
            checkpoint: &AutoCheckpoint,
            limits,
            budget: Budget::start(&limits),
            completion_timeout: Duration::from_secs(1),
            dispatch_timeout: Duration::from_secs(1),
            recorder: &mut recorder,
            on_event: &mut |_| {},
        };
        let flow = work(tree, IntentionId::ROOT, &mut ctx).expect("work");
        let events = recorder.timeline().iter().map(|e| e.event.clone()).collect();
        (flow, events)
    }

    #[test]
    fn terminal_intention_is_left_alone() {
        let mut tree = active_tree("build", "build passes");
        tree.append_cycle(
            IntentionId::ROOT,
            cycle(Action::command("make"), ActionResult::ok(""), Judgment::Success),
        )
        .expect("cycle");
        tree.transition(IntentionId::ROOT, IntentionStatus::Verified)
            .expect("verify");
        let before = tree.clone();

        let (flow, events) = work_root(&mut tree, Limits::default());
        assert_eq!(flow, Flow::Continue);
        assert!(events.is_empty());
        assert_eq!(tree.nodes(), before.nodes());
    }

    #[test]
    fn node_at_depth_limit_fails_without_attempts() {
        let mut tree = IntentionTree::new("build", "build passes");
        let limits = Limits {
            max_depth: 0,
            ..Limits::default()
        };

        let (flow, events) = work_root(&mut tree, limits);
        assert_eq!(flow, Flow::Continue);
        assert_eq!(tree.root().status, IntentionStatus::Failed);
        assert!(tree.root().trace.is_empty());
        assert_eq!(
            events,
            vec![
                TimelineEvent::IntentionStarted { depth: 0 },
                TimelineEvent::LimitReached {
                    limit: Limit::Depth {
                        depth: 0,
                        max_depth: 0
                    }
                },
                TimelineEvent::IntentionFinished {
                    status: IntentionStatus::Failed
                },
            ]
        );
    }
}
