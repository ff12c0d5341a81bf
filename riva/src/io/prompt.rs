//! Prompt rendering for the command-backed completion service.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::tree::Intention;
use crate::core::types::{Action, Cycle, truncate_chars};

const ACTION_TEMPLATE: &str = include_str!("prompts/action.md");
const DECOMPOSITION_TEMPLATE: &str = include_str!("prompts/decomposition.md");
const REFLECTION_TEMPLATE: &str = include_str!("prompts/reflection.md");

const ACTION_EXCERPT_CHARS: usize = 160;
const RESULT_EXCERPT_CHARS: usize = 600;

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 3] = ["history", "ancestry", "reflection"];

#[derive(Debug, Clone, Serialize)]
struct GoalContext {
    what: String,
    acceptance: String,
    depth: u32,
}

#[derive(Debug, Clone, Serialize)]
struct CycleContext {
    thought: String,
    action: String,
    result: String,
    judgment: String,
}

impl CycleContext {
    fn from_cycle(cycle: &Cycle) -> Self {
        Self {
            thought: cycle.thought.trim().to_string(),
            action: describe_action(&cycle.action),
            result: cycle.result.summary(RESULT_EXCERPT_CHARS),
            judgment: cycle.judgment.to_string(),
        }
    }
}

/// One-line rendering of an action, e.g. `create notes.md: hello`.
pub fn describe_action(action: &Action) -> String {
    let content = truncate_chars(action.content.trim(), ACTION_EXCERPT_CHARS);
    match action.target.as_deref() {
        Some(target) => format!("{} {target}: {content}", action.kind),
        None => format!("{}: {content}", action.kind),
    }
}

/// Everything a prompt may mention about one intention.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    goal: GoalContext,
    /// Ancestor goals, root first.
    ancestry: Vec<String>,
    history: Vec<CycleContext>,
    /// Latest reflection the checkpoint accepted.
    reflection: Option<String>,
}

impl PromptInputs {
    /// `ancestors` are ancestor goals ordered nearest first, as the tree reports them.
    pub fn new(intention: &Intention, ancestors: &[&str]) -> Self {
        Self {
            goal: GoalContext {
                what: intention.what.trim().to_string(),
                acceptance: intention.acceptance.trim().to_string(),
                depth: intention.depth,
            },
            ancestry: ancestors.iter().rev().map(|goal| goal.trim().to_string()).collect(),
            history: intention.trace.iter().map(CycleContext::from_cycle).collect(),
            reflection: intention
                .last_cycle()
                .and_then(Cycle::usable_reflection)
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty()),
        }
    }
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("action", ACTION_TEMPLATE)
            .context("load action template")?;
        env.add_template("decomposition", DECOMPOSITION_TEMPLATE)
            .context("load decomposition template")?;
        env.add_template("reflection", REFLECTION_TEMPLATE)
            .context("load reflection template")?;
        Ok(Self { env })
    }

    fn render(&self, name: &str, input: &PromptInputs, cycle: Option<&Cycle>) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(context! {
                goal => &input.goal,
                ancestry => &input.ancestry,
                history => &input.history,
                reflection => input.reflection.as_deref(),
                cycle => cycle.map(CycleContext::from_cycle),
            })
            .with_context(|| format!("render {name} prompt"))?;
        Ok(rendered)
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    /// Required sections survive every budget.
    required: bool,
    content: String,
}

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker pattern is valid")
});

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Drop droppable sections in [`DROP_ORDER`] until the prompt fits, then truncate the
/// last section if it still does not.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let other_len: usize = sections
        .iter()
        .rev()
        .skip(1)
        .map(|s| s.content.len())
        .sum();
    let allowed = budget.saturating_sub(other_len);
    if let Some(last) = sections.last_mut() {
        let before_len = last.content.len();
        const MARKER: &str = "\n[truncated]";
        if allowed > MARKER.len() {
            truncate_at_boundary(&mut last.content, allowed - MARKER.len());
            last.content.push_str(MARKER);
        } else {
            truncate_at_boundary(&mut last.content, allowed);
        }
        debug!(
            section = last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn truncate_at_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_action(&self, input: &PromptInputs) -> Result<String> {
        self.build("action", input, None)
    }

    pub fn build_decomposition(&self, input: &PromptInputs) -> Result<String> {
        self.build("decomposition", input, None)
    }

    /// Prompt asking why `cycle` (not yet in the trace) fell short.
    pub fn build_reflection(&self, input: &PromptInputs, cycle: &Cycle) -> Result<String> {
        self.build("reflection", input, Some(cycle))
    }

    fn build(&self, name: &str, input: &PromptInputs, cycle: Option<&Cycle>) -> Result<String> {
        let rendered = PromptEngine::new()?.render(name, input, cycle)?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree::{IntentionId, IntentionTree};
    use crate::core::types::{ActionResult, CycleDraft, IntentionDraft, IntentionStatus, Judgment};

    fn cycle(judgment: Judgment, reflection: Option<&str>) -> Cycle {
        let mut cycle = CycleDraft {
            thought: "look for the config loader".to_string(),
            action: Action::query("load_config"),
            result: ActionResult::failed("No matches found"),
            evaluated: judgment,
        }
        .finish(judgment);
        cycle.reflection = reflection.map(str::to_string);
        cycle
    }

    fn child_with_history() -> (IntentionTree, IntentionId) {
        let mut tree = IntentionTree::new("ship the service", "service responds");
        tree.transition(IntentionId::ROOT, IntentionStatus::Active)
            .expect("active");
        let id = tree
            .add_child(
                IntentionId::ROOT,
                IntentionDraft::new("write config.toml", "config.toml exists"),
            )
            .expect("child");
        tree.transition(id, IntentionStatus::Active).expect("active");
        tree.append_cycle(id, cycle(Judgment::Failure, Some("search the src dir instead")))
            .expect("cycle");
        (tree, id)
    }

    fn inputs(tree: &IntentionTree, id: IntentionId) -> PromptInputs {
        let intention = tree.get(id).expect("intention");
        PromptInputs::new(intention, &[tree.root().what.as_str()])
    }

    /// Verifies sections render in a stable order with XML tags.
    #[test]
    fn action_prompt_ordering_is_stable() {
        let (tree, id) = child_with_history();
        let content = PromptBuilder::new(10_000)
            .build_action(&inputs(&tree, id))
            .expect("render");

        let contract = content.find("<contract>").expect("contract");
        let goal = content.find("<goal>").expect("goal");
        let ancestry = content.find("<ancestry>").expect("ancestry");
        let history = content.find("<history>").expect("history");
        let reflection = content.find("<reflection>").expect("reflection");
        assert!(contract < goal && goal < ancestry && ancestry < history && history < reflection);
        assert!(content.contains("What: write config.toml"));
        assert!(content.contains("- ship the service"));
        assert!(content.contains("[failure] query: load_config"));
        assert!(!content.contains("<!--"), "markers are stripped");
    }

    /// Verifies the budget drops history before ancestry and keeps required sections.
    #[test]
    fn budget_drops_history_first() {
        let (mut tree, id) = child_with_history();
        for _ in 0..20 {
            tree.append_cycle(id, cycle(Judgment::Unclear, None)).expect("cycle");
        }
        let input = inputs(&tree, id);
        let full = PromptBuilder::new(100_000).build_action(&input).expect("full");
        assert!(full.contains("<history>"));
        assert!(full.len() > 1_100);

        let content = PromptBuilder::new(1_100).build_action(&input).expect("render");
        assert!(!content.contains("<history>"), "history dropped");
        assert!(content.contains("<contract>"), "contract kept");
        assert!(content.contains("<goal>"), "goal kept");
    }

    #[test]
    fn rejected_reflection_is_left_out() {
        let (mut tree, id) = child_with_history();
        let mut rejected = cycle(Judgment::Failure, Some("ignore this advice"));
        rejected.reflection_rejected = true;
        tree.append_cycle(id, rejected).expect("cycle");
        let content = PromptBuilder::new(10_000)
            .build_action(&inputs(&tree, id))
            .expect("render");
        assert!(!content.contains("ignore this advice"));
        assert!(!content.contains("<reflection>"));
    }

    #[test]
    fn reflection_prompt_shows_latest_cycle() {
        let (tree, id) = child_with_history();
        let latest = cycle(Judgment::Unclear, None);
        let content = PromptBuilder::new(10_000)
            .build_reflection(&inputs(&tree, id), &latest)
            .expect("render");
        assert!(content.contains("<cycle>"));
        assert!(content.contains("Judgment: unclear"));
        assert!(content.contains("Thought: look for the config loader"));
    }

    #[test]
    fn tiny_budget_truncates_required_sections_on_char_boundary() {
        let mut sections = vec![ParsedSection {
            key: "goal".to_string(),
            required: true,
            content: "é".repeat(40),
        }];
        apply_budget_to_sections(&mut sections, 31);
        assert!(sections[0].content.ends_with("[truncated]"));
        assert!(sections[0].content.len() <= 31);
    }
}
