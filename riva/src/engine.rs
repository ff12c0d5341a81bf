//! Engine entry point: build the root intention, drive it, return the session.

use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::checkpoint::CheckpointGate;
use crate::core::budget::{Budget, Limits};
use crate::core::tree::{Intention, IntentionId, IntentionTree};
use crate::error::EngineError;
use crate::io::completion::CompletionService;
use crate::io::dispatcher::ActionDispatcher;
use crate::io::session::{Session, SessionRecorder, TimelineEntry, new_run_id};
use crate::navigator::{Flow, WorkContext, work};

/// The three external capabilities plus per-call timeout caps.
pub struct Services<C, D, G> {
    pub completion: C,
    pub dispatcher: D,
    pub checkpoint: G,
    pub completion_timeout: Duration,
    pub dispatch_timeout: Duration,
}

impl<C, D, G> Services<C, D, G> {
    pub fn new(completion: C, dispatcher: D, checkpoint: G) -> Self {
        Self {
            completion,
            dispatcher,
            checkpoint,
            completion_timeout: Duration::from_secs(30),
            dispatch_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeouts(mut self, completion: Duration, dispatch: Duration) -> Self {
        self.completion_timeout = completion;
        self.dispatch_timeout = dispatch;
        self
    }
}

/// Drive a new root intention to a terminal status.
///
/// Returns the terminal root plus the full session. `Err` means a tree invariant was
/// violated; every runtime failure ends up in the tree instead.
pub fn run<C, D, G>(
    goal: &str,
    acceptance: &str,
    limits: Limits,
    services: &Services<C, D, G>,
) -> Result<(Intention, Session), EngineError>
where
    C: CompletionService,
    D: ActionDispatcher,
    G: CheckpointGate,
{
    run_with_observer(goal, acceptance, limits, services, &mut |_| {})
}

/// Like [`run`], streaming every timeline entry to `on_event` as it is recorded.
#[instrument(skip_all, fields(run_id))]
pub fn run_with_observer<C, D, G>(
    goal: &str,
    acceptance: &str,
    limits: Limits,
    services: &Services<C, D, G>,
    on_event: &mut dyn FnMut(&TimelineEntry),
) -> Result<(Intention, Session), EngineError>
where
    C: CompletionService,
    D: ActionDispatcher,
    G: CheckpointGate,
{
    let run_id = new_run_id();
    tracing::Span::current().record("run_id", run_id.as_str());
    info!(goal, ?limits, "run started");

    let mut recorder = SessionRecorder::new(run_id);
    let mut tree = IntentionTree::new(goal, acceptance);
    let flow = {
        let mut ctx = WorkContext {
            completion: &services.completion,
            dispatcher: &services.dispatcher,
            checkpoint: &services.checkpoint,
            limits,
            budget: Budget::start(&limits),
            completion_timeout: services.completion_timeout,
            dispatch_timeout: services.dispatch_timeout,
            recorder: &mut recorder,
            on_event,
        };
        work(&mut tree, IntentionId::ROOT, &mut ctx)?
    };
    if let Flow::Abort(breach) = flow {
        warn!(%breach, "run stopped early");
    }

    let root = tree.root().clone();
    let session = recorder.finish(tree);
    info!(
        outcome = %root.status,
        cycles = session.metadata.total_cycles,
        intentions = session.metadata.intention_count,
        "run finished"
    );
    Ok((root, session))
}
