//! Test-only doubles for the engine's external capabilities.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::checkpoint::auto::AutoCheckpoint;
use crate::checkpoint::human::{Answer, DecisionSource, Question};
use crate::core::heuristics;
use crate::core::tree::{IntentionId, IntentionTree};
use crate::core::types::{
    Action, ActionResult, Cycle, CycleDraft, IntentionDraft, IntentionStatus, Judgment,
};
use crate::engine::Services;
use crate::error::EngineError;
use crate::io::completion::{CompletionService, HeuristicCompletion, PlanRequest};
use crate::io::dispatcher::{ActionDispatcher, WorkspaceDispatcher};

/// Completion service replaying queued answers.
///
/// Exhausted queues behave like this: actions fail as unavailable, decompositions and
/// reflections fall back to the heuristics.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    actions: RefCell<VecDeque<Result<(String, Action), String>>>,
    decompositions: RefCell<VecDeque<Result<Vec<IntentionDraft>, String>>>,
    reflections: RefCell<VecDeque<Result<String, String>>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new(actions: Vec<Result<(String, Action), String>>) -> Self {
        Self {
            actions: RefCell::new(actions.into()),
            ..Self::default()
        }
    }

    pub fn with_decompositions(self, decompositions: Vec<Result<Vec<IntentionDraft>, String>>) -> Self {
        *self.decompositions.borrow_mut() = decompositions.into();
        self
    }

    pub fn with_reflections(self, reflections: Vec<Result<String, String>>) -> Self {
        *self.reflections.borrow_mut() = reflections.into();
        self
    }

    /// Calls received so far, as `call:intention` strings (e.g. `action:int-0001`).
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn remaining_actions(&self) -> usize {
        self.actions.borrow().len()
    }

    fn log(&self, call: &str, request: &PlanRequest<'_>) {
        self.calls
            .borrow_mut()
            .push(format!("{call}:{}", request.intention.id));
    }
}

impl CompletionService for ScriptedCompletion {
    fn propose_action(
        &self,
        request: &PlanRequest<'_>,
        _timeout: Duration,
    ) -> Result<(String, Action)> {
        self.log("action", request);
        match self.actions.borrow_mut().pop_front() {
            Some(answer) => answer.map_err(|err| anyhow!(err)),
            None => Err(anyhow!("no scripted action left")),
        }
    }

    fn propose_decomposition(
        &self,
        request: &PlanRequest<'_>,
        _timeout: Duration,
    ) -> Result<Vec<IntentionDraft>> {
        self.log("decomposition", request);
        match self.decompositions.borrow_mut().pop_front() {
            Some(answer) => answer.map_err(|err| anyhow!(err)),
            None => Ok(heuristics::decompose(request.intention)),
        }
    }

    fn propose_reflection(
        &self,
        request: &PlanRequest<'_>,
        cycle: &Cycle,
        _timeout: Duration,
    ) -> Result<String> {
        self.log("reflection", request);
        match self.reflections.borrow_mut().pop_front() {
            Some(answer) => answer.map_err(|err| anyhow!(err)),
            None => Ok(heuristics::reflect(cycle)),
        }
    }
}

/// One scripted dispatcher outcome.
#[derive(Debug, Clone)]
pub enum ScriptedDispatch {
    Result(ActionResult),
    /// Transport failure: `execute` returns `Err`.
    Error(String),
    /// Block for the whole timeout, then report a timed-out action.
    Hang,
}

/// Dispatcher replaying queued outcomes; exhausted queues succeed with exit 0.
#[derive(Debug, Default)]
pub struct ScriptedDispatcher {
    outcomes: RefCell<VecDeque<ScriptedDispatch>>,
    executed: RefCell<Vec<(Action, Duration)>>,
}

impl ScriptedDispatcher {
    pub fn new(outcomes: Vec<ScriptedDispatch>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            executed: RefCell::new(Vec::new()),
        }
    }

    /// Actions executed so far, in order.
    pub fn executed(&self) -> Vec<Action> {
        self.executed
            .borrow()
            .iter()
            .map(|(action, _)| action.clone())
            .collect()
    }

    /// Timeouts the engine passed with each action.
    pub fn timeouts(&self) -> Vec<Duration> {
        self.executed.borrow().iter().map(|(_, t)| *t).collect()
    }

    pub fn remaining(&self) -> usize {
        self.outcomes.borrow().len()
    }
}

impl ActionDispatcher for ScriptedDispatcher {
    fn execute(&self, action: &Action, timeout: Duration) -> Result<ActionResult> {
        self.executed.borrow_mut().push((action.clone(), timeout));
        match self.outcomes.borrow_mut().pop_front() {
            Some(ScriptedDispatch::Result(result)) => Ok(result),
            Some(ScriptedDispatch::Error(err)) => Err(anyhow!(err)),
            Some(ScriptedDispatch::Hang) => {
                thread::sleep(timeout);
                Ok(ActionResult {
                    stderr: format!("killed after {}ms", timeout.as_millis()),
                    timed_out: true,
                    ..ActionResult::default()
                })
            }
            None => Ok(ActionResult::ok("")),
        }
    }
}

/// Decision source replaying queued replies; exhausted queues are unavailable.
#[derive(Debug, Default)]
pub struct ScriptedDecisionSource {
    replies: RefCell<VecDeque<Result<Answer, EngineError>>>,
    questions: RefCell<Vec<Question>>,
}

impl ScriptedDecisionSource {
    pub fn new(replies: Vec<Result<Answer, EngineError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            questions: RefCell::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<Question> {
        self.questions.borrow().clone()
    }
}

impl DecisionSource for ScriptedDecisionSource {
    fn ask(&self, question: &Question, _timeout: Duration) -> Result<Answer, EngineError> {
        self.questions.borrow_mut().push(question.clone());
        self.replies.borrow_mut().pop_front().unwrap_or_else(|| {
            Err(EngineError::CheckpointUnavailable {
                checkpoint: question.kind().as_str(),
                reason: "no scripted reply left".to_string(),
            })
        })
    }
}

/// Scripted action proposal.
pub fn propose(thought: &str, action: Action) -> Result<(String, Action), String> {
    Ok((thought.to_string(), action))
}

/// Drafts from `(what, acceptance)` pairs.
pub fn drafts(children: &[(&str, &str)]) -> Vec<IntentionDraft> {
    children
        .iter()
        .map(|(what, acceptance)| IntentionDraft::new(*what, *acceptance))
        .collect()
}

/// Services wired to scripted doubles and the automatic gate, with short timeouts.
pub fn scripted_services(
    completion: ScriptedCompletion,
    dispatcher: ScriptedDispatcher,
) -> Services<ScriptedCompletion, ScriptedDispatcher, AutoCheckpoint> {
    Services::new(completion, dispatcher, AutoCheckpoint)
        .with_timeouts(Duration::from_secs(1), Duration::from_secs(1))
}

/// Heuristic planner and real dispatcher rooted in a fresh temp directory.
///
/// Keep the returned `TempDir` alive for as long as the services are used.
pub fn workspace_services() -> Result<(
    tempfile::TempDir,
    Services<HeuristicCompletion, WorkspaceDispatcher, AutoCheckpoint>,
)> {
    let temp = tempfile::tempdir()?;
    let services = Services::new(
        HeuristicCompletion::new(temp.path(), "cargo test"),
        WorkspaceDispatcher::new(temp.path()),
        AutoCheckpoint,
    )
    .with_timeouts(Duration::from_secs(5), Duration::from_secs(10));
    Ok((temp, services))
}

/// A finished cycle with the given judgment.
pub fn cycle(action: Action, result: ActionResult, judgment: Judgment) -> Cycle {
    CycleDraft {
        thought: "scripted".to_string(),
        action,
        result,
        evaluated: judgment,
    }
    .finish(judgment)
}

/// A tree whose root is already `Active`.
pub fn active_tree(what: &str, acceptance: &str) -> IntentionTree {
    let mut tree = IntentionTree::new(what, acceptance);
    // A fresh root is always Pending, so this transition cannot fail.
    let _ = tree.transition(IntentionId::ROOT, IntentionStatus::Active);
    tree
}
