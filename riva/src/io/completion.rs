//! Completion services: where thoughts, actions, decompositions, and reflections come from.
//!
//! [`HeuristicCompletion`] is deterministic and never fails. [`CommandCompletion`] pipes a
//! rendered prompt to an external command and validates the JSON it prints. Callers decide
//! what a failure means; neither adapter retries.

use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::heuristics;
use crate::core::tree::{Intention, IntentionId, IntentionTree};
use crate::core::types::{Action, Cycle, IntentionDraft, truncate_chars};
use crate::error::EngineError;
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::schema::{ACTION_V1, DECOMPOSITION_V1, validate_schema};

const STDERR_EXCERPT_CHARS: usize = 300;

/// The intention being planned, plus the goals above it.
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub intention: &'a Intention,
    /// Ancestor goals, nearest first.
    pub ancestors: Vec<&'a str>,
}

impl<'a> PlanRequest<'a> {
    pub fn new(intention: &'a Intention) -> Self {
        Self {
            intention,
            ancestors: Vec::new(),
        }
    }

    pub fn from_tree(tree: &'a IntentionTree, id: IntentionId) -> Result<Self, EngineError> {
        let intention = tree.get(id)?;
        let ancestors = tree
            .ancestors(id)?
            .into_iter()
            .map(|ancestor| tree.get(ancestor).map(|node| node.what.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            intention,
            ancestors,
        })
    }

    fn prompt_inputs(&self) -> PromptInputs {
        PromptInputs::new(self.intention, &self.ancestors)
    }
}

/// Source of plans for the engine. Every call is bounded by `timeout`.
pub trait CompletionService {
    /// Next thought and action for an intention, given its trace so far.
    fn propose_action(
        &self,
        request: &PlanRequest<'_>,
        timeout: Duration,
    ) -> Result<(String, Action)>;

    fn propose_decomposition(
        &self,
        request: &PlanRequest<'_>,
        timeout: Duration,
    ) -> Result<Vec<IntentionDraft>>;

    /// Explain why `cycle` (not yet appended to the trace) fell short.
    fn propose_reflection(
        &self,
        request: &PlanRequest<'_>,
        cycle: &Cycle,
        timeout: Duration,
    ) -> Result<String>;
}

impl<C: CompletionService + ?Sized> CompletionService for Box<C> {
    fn propose_action(
        &self,
        request: &PlanRequest<'_>,
        timeout: Duration,
    ) -> Result<(String, Action)> {
        (**self).propose_action(request, timeout)
    }

    fn propose_decomposition(
        &self,
        request: &PlanRequest<'_>,
        timeout: Duration,
    ) -> Result<Vec<IntentionDraft>> {
        (**self).propose_decomposition(request, timeout)
    }

    fn propose_reflection(
        &self,
        request: &PlanRequest<'_>,
        cycle: &Cycle,
        timeout: Duration,
    ) -> Result<String> {
        (**self).propose_reflection(request, cycle, timeout)
    }
}

/// Keyword heuristics over the goal text; used when no completion command is configured.
#[derive(Debug, Clone)]
pub struct HeuristicCompletion {
    root: PathBuf,
    test_command: String,
}

impl HeuristicCompletion {
    pub fn new(root: impl Into<PathBuf>, test_command: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            test_command: test_command.into(),
        }
    }
}

impl CompletionService for HeuristicCompletion {
    fn propose_action(
        &self,
        request: &PlanRequest<'_>,
        _timeout: Duration,
    ) -> Result<(String, Action)> {
        Ok(heuristics::propose_action(
            request.intention,
            &self.test_command,
            |target| self.root.join(target).exists(),
        ))
    }

    fn propose_decomposition(
        &self,
        request: &PlanRequest<'_>,
        _timeout: Duration,
    ) -> Result<Vec<IntentionDraft>> {
        Ok(heuristics::decompose(request.intention))
    }

    fn propose_reflection(
        &self,
        _request: &PlanRequest<'_>,
        cycle: &Cycle,
        _timeout: Duration,
    ) -> Result<String> {
        Ok(heuristics::reflect(cycle))
    }
}

#[derive(Debug, Deserialize)]
struct ActionProposal {
    thought: String,
    action: Action,
}

#[derive(Debug, Deserialize)]
struct DecompositionProposal {
    children: Vec<IntentionDraft>,
}

/// Completion backed by an external command that reads a prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandCompletion {
    command: Vec<String>,
    workdir: PathBuf,
    prompts: PromptBuilder,
    output_limit_bytes: usize,
}

impl CommandCompletion {
    pub fn new(
        command: Vec<String>,
        workdir: impl Into<PathBuf>,
        prompt_budget_bytes: usize,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            command,
            workdir: workdir.into(),
            prompts: PromptBuilder::new(prompt_budget_bytes),
            output_limit_bytes,
        }
    }

    #[instrument(skip_all, fields(call = call, prompt_bytes = prompt.len()))]
    fn complete(&self, call: &'static str, prompt: &str, timeout: Duration) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("completion command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);

        info!("requesting completion");
        let output =
            run_command_with_timeout(cmd, Some(prompt.as_bytes()), timeout, self.output_limit_bytes)
                .with_context(|| format!("run completion command {program}"))?;
        if output.timed_out {
            bail!("completion command timed out after {}s", timeout.as_secs_f64());
        }
        match output.exit_code() {
            Some(0) => {}
            code => bail!(
                "completion command exited with {}: {}",
                code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                truncate_chars(output.stderr_text().trim(), STDERR_EXCERPT_CHARS)
            ),
        }
        let text = output.stdout_text();
        debug!(bytes = text.len(), "completion returned");
        Ok(text)
    }
}

impl CompletionService for CommandCompletion {
    fn propose_action(
        &self,
        request: &PlanRequest<'_>,
        timeout: Duration,
    ) -> Result<(String, Action)> {
        let prompt = self.prompts.build_action(&request.prompt_inputs())?;
        let output = self.complete("action", &prompt, timeout)?;
        let payload = extract_json(&output)?;
        validate_schema(&payload, ACTION_V1).context("validate action proposal")?;
        let proposal: ActionProposal =
            serde_json::from_value(payload).context("parse action proposal")?;
        Ok((proposal.thought, proposal.action))
    }

    fn propose_decomposition(
        &self,
        request: &PlanRequest<'_>,
        timeout: Duration,
    ) -> Result<Vec<IntentionDraft>> {
        let prompt = self.prompts.build_decomposition(&request.prompt_inputs())?;
        let output = self.complete("decomposition", &prompt, timeout)?;
        let payload = extract_json(&output)?;
        validate_schema(&payload, DECOMPOSITION_V1).context("validate decomposition proposal")?;
        let proposal: DecompositionProposal =
            serde_json::from_value(payload).context("parse decomposition proposal")?;
        Ok(proposal.children)
    }

    fn propose_reflection(
        &self,
        request: &PlanRequest<'_>,
        cycle: &Cycle,
        timeout: Duration,
    ) -> Result<String> {
        let prompt = self
            .prompts
            .build_reflection(&request.prompt_inputs(), cycle)?;
        let output = self.complete("reflection", &prompt, timeout)?;
        let reflection = output.trim();
        if reflection.is_empty() {
            warn!("completion returned an empty reflection");
            bail!("completion command returned an empty reflection");
        }
        Ok(reflection.to_string())
    }
}

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?[ \t]*\r?\n(.*?)\r?\n?```").expect("fence pattern is valid")
});

/// Pull the JSON object out of completion output, with or without a markdown fence.
pub fn extract_json(output: &str) -> Result<Value> {
    let candidate = match JSON_FENCE.captures(output).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => {
            let start = output.find('{');
            let end = output.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => &output[start..=end],
                _ => bail!(
                    "no JSON object in completion output: {}",
                    truncate_chars(output.trim(), STDERR_EXCERPT_CHARS)
                ),
            }
        }
    };
    serde_json::from_str(candidate).context("parse completion JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ActionResult, ActionType, CycleDraft, IntentionStatus, Judgment};

    fn tree() -> IntentionTree {
        IntentionTree::new("create notes.md containing hello", "notes.md exists")
    }

    #[test]
    fn extracts_fenced_and_bare_json() {
        let fenced = "Sure:\n```json\n{\"a\": 1}\n```\nbye";
        assert_eq!(extract_json(fenced).expect("fenced")["a"], 1);
        let bare = "thinking... {\"a\": {\"b\": 2}} done";
        assert_eq!(extract_json(bare).expect("bare")["a"]["b"], 2);
        assert!(extract_json("no json here").is_err());
    }

    #[test]
    fn heuristic_completion_never_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tree = tree();
        let request = PlanRequest::from_tree(&tree, IntentionId::ROOT).expect("request");
        let service = HeuristicCompletion::new(temp.path(), "cargo test");
        let (_, action) = service
            .propose_action(&request, Duration::from_secs(1))
            .expect("action");
        assert_eq!(action.kind, ActionType::Create);
        assert_eq!(action.target.as_deref(), Some("notes.md"));

        std::fs::write(temp.path().join("notes.md"), "").expect("seed");
        let (_, action) = service
            .propose_action(&request, Duration::from_secs(1))
            .expect("action");
        assert_eq!(action.kind, ActionType::Edit);
    }

    #[test]
    fn request_lists_ancestors_nearest_first() {
        let mut tree = IntentionTree::new("root goal", "root exists");
        tree.transition(IntentionId::ROOT, IntentionStatus::Active)
            .expect("active");
        let mid = tree
            .add_child(IntentionId::ROOT, IntentionDraft::new("middle goal", "mid exists"))
            .expect("mid");
        tree.transition(mid, IntentionStatus::Active).expect("active");
        let leaf = tree
            .add_child(mid, IntentionDraft::new("leaf goal", "leaf exists"))
            .expect("leaf");
        let request = PlanRequest::from_tree(&tree, leaf).expect("request");
        assert_eq!(request.ancestors, vec!["middle goal", "root goal"]);
    }

    #[cfg(unix)]
    mod command {
        use super::*;

        fn script(temp: &tempfile::TempDir, body: &str) -> CommandCompletion {
            let path = temp.path().join("complete.sh");
            std::fs::write(&path, format!("cat > /dev/null\n{body}\n")).expect("script");
            CommandCompletion::new(
                vec!["sh".to_string(), path.display().to_string()],
                temp.path(),
                10_000,
                10_000,
            )
        }

        #[test]
        fn parses_valid_action_proposal() {
            let temp = tempfile::tempdir().expect("tempdir");
            let service = script(
                &temp,
                r#"printf '```json\n{"thought":"write it","action":{"type":"create","content":"hello","target":"notes.md"}}\n```\n'"#,
            );
            let tree = tree();
            let (thought, action) = service
                .propose_action(&PlanRequest::new(tree.root()), Duration::from_secs(10))
                .expect("action");
            assert_eq!(thought, "write it");
            assert_eq!(action, Action::create("notes.md", "hello"));
        }

        #[test]
        fn schema_violations_are_errors() {
            let temp = tempfile::tempdir().expect("tempdir");
            let service = script(&temp, r#"echo '{"children": []}'"#);
            let tree = tree();
            let err = service
                .propose_decomposition(&PlanRequest::new(tree.root()), Duration::from_secs(10))
                .expect_err("empty children");
            assert!(format!("{err:#}").contains("schema validation failed"));
        }

        #[test]
        fn non_zero_exit_and_timeout_are_errors() {
            let temp = tempfile::tempdir().expect("tempdir");
            let tree = tree();
            let request = PlanRequest::new(tree.root());

            let failing = script(&temp, "echo nope >&2; exit 7");
            let err = failing
                .propose_decomposition(&request, Duration::from_secs(10))
                .expect_err("exit 7");
            assert!(err.to_string().contains("exited with 7: nope"));

            let slow = script(&temp, "exec sleep 5");
            let err = slow
                .propose_action(&request, Duration::from_millis(200))
                .expect_err("timeout");
            assert!(err.to_string().contains("timed out"));
        }

        #[test]
        fn reflection_is_plain_text() {
            let temp = tempfile::tempdir().expect("tempdir");
            let service = script(&temp, "echo '  Split into smaller steps.  '");
            let tree = tree();
            let cycle = CycleDraft {
                thought: "t".to_string(),
                action: Action::query("x"),
                result: ActionResult::failed("boom"),
                evaluated: Judgment::Failure,
            }
            .finish(Judgment::Failure);
            let reflection = service
                .propose_reflection(&PlanRequest::new(tree.root()), &cycle, Duration::from_secs(10))
                .expect("reflection");
            assert_eq!(reflection, "Split into smaller steps.");
        }
    }
}
