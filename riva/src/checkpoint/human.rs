//! Human-mediated checkpoint decorator.
//!
//! [`HumanCheckpoint`] wraps any gate. Each call is first put to a [`DecisionSource`]
//! with a timeout; when the source times out, is unavailable, defers, or answers with
//! the wrong kind, the wrapped gate's answer is used for that call only.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::checkpoint::{CheckpointGate, CheckpointKind, Decision};
use crate::core::tree::Intention;
use crate::core::types::{Cycle, CycleDraft, IntentionDraft, Judgment};
use crate::error::EngineError;

const RESULT_EXCERPT_CHARS: usize = 400;

/// A checkpoint call rendered for a person, with the automatic suggestion attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "checkpoint", rename_all = "snake_case")]
pub enum Question {
    JudgeAction {
        goal: String,
        thought: String,
        action: String,
        result: String,
        suggested: Judgment,
    },
    ApproveDecomposition {
        goal: String,
        children: Vec<String>,
        suggested: bool,
    },
    VerifyIntegration {
        goal: String,
        acceptance: String,
        children: Vec<String>,
        suggested: bool,
    },
    ReviewReflection {
        goal: String,
        reflection: String,
        suggested: bool,
    },
}

impl Question {
    pub fn kind(&self) -> CheckpointKind {
        match self {
            Question::JudgeAction { .. } => CheckpointKind::JudgeAction,
            Question::ApproveDecomposition { .. } => CheckpointKind::ApproveDecomposition,
            Question::VerifyIntegration { .. } => CheckpointKind::VerifyIntegration,
            Question::ReviewReflection { .. } => CheckpointKind::ReviewReflection,
        }
    }
}

/// A person's reply to a [`Question`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "answer", content = "value", rename_all = "snake_case")]
pub enum Answer {
    Judgment(Judgment),
    Approve(bool),
    /// Let the automatic gate decide this one.
    Defer,
}

/// External source of human decisions.
pub trait DecisionSource {
    /// Ask `question`, waiting at most `timeout`.
    ///
    /// Returns `CheckpointTimeout` when no answer arrived in time and
    /// `CheckpointUnavailable` when the source cannot be reached.
    fn ask(&self, question: &Question, timeout: Duration) -> Result<Answer, EngineError>;
}

/// Decorates `inner` with human decisions from `source`.
pub struct HumanCheckpoint<G, S> {
    inner: G,
    source: S,
    timeout: Duration,
}

impl<G: CheckpointGate, S: DecisionSource> HumanCheckpoint<G, S> {
    pub fn new(inner: G, source: S, timeout: Duration) -> Self {
        Self {
            inner,
            source,
            timeout,
        }
    }

    /// Ask the source; use `fallback` unless `pick` accepts the answer.
    fn resolve<T>(
        &self,
        question: Question,
        fallback: Decision<T>,
        pick: impl FnOnce(Answer) -> Option<T>,
    ) -> Decision<T> {
        let kind = question.kind();
        match self.source.ask(&question, self.timeout) {
            Ok(Answer::Defer) => {
                debug!(checkpoint = %kind, "human deferred to automatic gate");
                fallback.into_fallback("deferred")
            }
            Ok(answer) => match pick(answer) {
                Some(value) => Decision::human(value),
                None => {
                    warn!(checkpoint = %kind, ?answer, "answer does not fit checkpoint");
                    fallback.into_fallback(format!("unusable answer {answer:?}"))
                }
            },
            Err(err) => {
                warn!(checkpoint = %kind, err = %err, "falling back to automatic gate");
                fallback.into_fallback(err.to_string())
            }
        }
    }
}

impl<G: CheckpointGate, S: DecisionSource> CheckpointGate for HumanCheckpoint<G, S> {
    fn judge_action(&self, intention: &Intention, draft: &CycleDraft) -> Decision<Judgment> {
        let fallback = self.inner.judge_action(intention, draft);
        let question = Question::JudgeAction {
            goal: intention.what.clone(),
            thought: draft.thought.clone(),
            action: describe_action(draft),
            result: draft.result.summary(RESULT_EXCERPT_CHARS),
            suggested: fallback.answer,
        };
        self.resolve(question, fallback, |answer| match answer {
            Answer::Judgment(judgment) => Some(judgment),
            _ => None,
        })
    }

    fn approve_decomposition(
        &self,
        intention: &Intention,
        proposed: &[IntentionDraft],
    ) -> Decision<bool> {
        let fallback = self.inner.approve_decomposition(intention, proposed);
        let question = Question::ApproveDecomposition {
            goal: intention.what.clone(),
            children: proposed.iter().map(|child| child.what.clone()).collect(),
            suggested: fallback.answer,
        };
        self.resolve(question, fallback, approval)
    }

    fn verify_integration(&self, intention: &Intention, children: &[&Intention]) -> Decision<bool> {
        let fallback = self.inner.verify_integration(intention, children);
        let question = Question::VerifyIntegration {
            goal: intention.what.clone(),
            acceptance: intention.acceptance.clone(),
            children: children
                .iter()
                .map(|child| format!("[{}] {}", child.status, child.what))
                .collect(),
            suggested: fallback.answer,
        };
        self.resolve(question, fallback, approval)
    }

    fn review_reflection(&self, intention: &Intention, cycle: &Cycle) -> Decision<bool> {
        let fallback = self.inner.review_reflection(intention, cycle);
        let question = Question::ReviewReflection {
            goal: intention.what.clone(),
            reflection: cycle.reflection.clone().unwrap_or_default(),
            suggested: fallback.answer,
        };
        self.resolve(question, fallback, approval)
    }
}

fn approval(answer: Answer) -> Option<bool> {
    match answer {
        Answer::Approve(value) => Some(value),
        _ => None,
    }
}

fn describe_action(draft: &CycleDraft) -> String {
    match &draft.action.target {
        Some(target) => format!("{} {}", draft.action.kind, target),
        None => format!("{} {}", draft.action.kind, draft.action.content),
    }
}

/// A question plus the channel its answer goes back on.
#[derive(Debug)]
pub struct Prompt {
    pub question: Question,
    pub reply: Sender<Answer>,
}

/// Decision source backed by a channel to a responder (a console, a UI thread, ...).
///
/// Answers that arrive after the timeout are dropped by the closed reply channel.
#[derive(Debug, Clone)]
pub struct ChannelDecisionSource {
    requests: Sender<Prompt>,
}

impl ChannelDecisionSource {
    pub fn new(requests: Sender<Prompt>) -> Self {
        Self { requests }
    }
}

impl DecisionSource for ChannelDecisionSource {
    fn ask(&self, question: &Question, timeout: Duration) -> Result<Answer, EngineError> {
        let checkpoint = question.kind().as_str();
        let (reply, answers) = mpsc::channel();
        self.requests
            .send(Prompt {
                question: question.clone(),
                reply,
            })
            .map_err(|_| EngineError::CheckpointUnavailable {
                checkpoint,
                reason: "responder is gone".to_string(),
            })?;
        answers.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => EngineError::CheckpointTimeout {
                checkpoint,
                timeout,
            },
            RecvTimeoutError::Disconnected => EngineError::CheckpointUnavailable {
                checkpoint,
                reason: "responder hung up without answering".to_string(),
            },
        })
    }
}
