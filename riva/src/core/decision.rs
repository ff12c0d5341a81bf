//! Pure predicates that steer the navigator: try directly, or decompose.

use serde::{Deserialize, Serialize};

use crate::core::text::{contains_any, words};
use crate::core::tree::Intention;
use crate::core::types::Cycle;

/// Goals longer than this many characters are decomposed rather than attempted.
pub const MAX_DIRECT_GOAL_CHARS: usize = 200;

/// Connectives that join independent clauses, longest first.
const CONNECTIVES: &[&[&str]] = &[
    &["as", "well", "as"],
    &["and", "then"],
    &["and"],
    &["then"],
    &["also"],
    &["additionally"],
    &["plus"],
];

/// Words or phrases in an acceptance criterion that name a checkable condition.
const VERIFIABLE_INDICATORS: &[&str] = &[
    "file exists",
    "test passes",
    "exit code",
    "exists",
    "exist",
    "returns",
    "outputs",
    "prints",
    "displays",
    "shows",
    "passes",
    "compiles",
    "runs",
    "responds",
    "contains",
    "matches",
    "equals",
    "creates",
    "produces",
    "succeeds",
];

const DECOMPOSITION_HINTS: &[&str] = &[
    "need to first",
    "requires",
    "depends on",
    "multiple steps",
    "break down",
    "decompose",
    "split into",
];

/// Why an intention can or cannot be attempted directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Directness {
    Direct,
    Compound { clauses: usize },
    TooLong { chars: usize },
    NoVerifiableIndicator,
}

/// Classify an intention for [`can_verify_directly`].
pub fn assess_directness(intention: &Intention) -> Directness {
    let clauses = compound_clauses(&intention.what).len();
    if clauses >= 2 {
        return Directness::Compound { clauses };
    }
    let chars = intention.what.chars().count();
    if chars > MAX_DIRECT_GOAL_CHARS {
        return Directness::TooLong { chars };
    }
    if !has_verifiable_indicator(&intention.acceptance) {
        return Directness::NoVerifiableIndicator;
    }
    Directness::Direct
}

pub fn can_verify_directly(intention: &Intention) -> bool {
    assess_directness(intention) == Directness::Direct
}

pub fn has_verifiable_indicator(acceptance: &str) -> bool {
    contains_any(&words(acceptance), VERIFIABLE_INDICATORS)
}

/// Which trigger asked for decomposition after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecomposeTrigger {
    CycleLimit,
    /// The two most recent cycles were both non-success, in any mix of
    /// failure, unclear, and partial.
    RepeatedNonSuccess,
    ReflectionHint,
}

/// First decomposition trigger that fires for `intention`, if any.
///
/// `latest` is the cycle just completed; its reflection is only consulted when the
/// checkpoint accepted it.
pub fn decomposition_trigger(
    intention: &Intention,
    latest: Option<&Cycle>,
    max_cycles: u32,
) -> Option<DecomposeTrigger> {
    if intention.trace.len() >= max_cycles as usize {
        return Some(DecomposeTrigger::CycleLimit);
    }
    if let [.., previous, last] = intention.trace.as_slice()
        && !previous.judgment.is_success()
        && !last.judgment.is_success()
    {
        return Some(DecomposeTrigger::RepeatedNonSuccess);
    }
    let hint = latest
        .and_then(Cycle::usable_reflection)
        .is_some_and(|text| contains_any(&words(text), DECOMPOSITION_HINTS));
    if hint {
        return Some(DecomposeTrigger::ReflectionHint);
    }
    None
}

pub fn should_decompose(intention: &Intention, latest: Option<&Cycle>, max_cycles: u32) -> bool {
    decomposition_trigger(intention, latest, max_cycles).is_some()
}

/// Split a goal into independent clauses.
///
/// Splits on sentence breaks, `;`, and the clause connectives. A fragment of fewer
/// than two words is glued back onto its neighbour, so "cats and dogs" stays whole
/// while "set up A and configure B" yields two clauses.
pub fn compound_clauses(what: &str) -> Vec<String> {
    let mut fragments: Vec<(String, String)> = Vec::new();
    for (sentence_joiner, sentence) in split_sentences(what) {
        let mut joiner = sentence_joiner;
        let mut current: Vec<&str> = Vec::new();
        let tokens: Vec<&str> = sentence.split_whitespace().collect();
        let mut i = 0;
        while i < tokens.len() {
            match connective_at(&tokens[i..]) {
                Some(len) if !current.is_empty() => {
                    fragments.push((joiner, current.join(" ")));
                    joiner = format!(" {} ", tokens[i..i + len].join(" "));
                    current.clear();
                    i += len;
                }
                // "...; then do X" folds the connective into the sentence joiner.
                Some(len) if !fragments.is_empty() => {
                    joiner = format!("{joiner}{} ", tokens[i..i + len].join(" "));
                    i += len;
                }
                _ => {
                    current.push(tokens[i]);
                    i += 1;
                }
            }
        }
        if !current.is_empty() {
            fragments.push((joiner, current.join(" ")));
        }
    }

    let mut clauses: Vec<String> = Vec::new();
    let mut carry = String::new();
    for (joiner, fragment) in fragments {
        let fragment = fragment.trim_end_matches(',').to_string();
        if !carry.is_empty() {
            carry.push_str(&joiner);
            carry.push_str(&fragment);
            if words(&carry).len() >= 2 {
                clauses.push(std::mem::take(&mut carry));
            }
            continue;
        }
        if words(&fragment).len() >= 2 {
            clauses.push(fragment);
        } else if let Some(last) = clauses.last_mut() {
            last.push_str(&joiner);
            last.push_str(&fragment);
        } else {
            carry = fragment;
        }
    }
    if !carry.is_empty() {
        match clauses.last_mut() {
            Some(last) => last.push_str(&carry),
            None => clauses.push(carry),
        }
    }
    clauses
}

/// Length in tokens of the connective starting at `tokens[0]`, if any.
fn connective_at(tokens: &[&str]) -> Option<usize> {
    CONNECTIVES.iter().find_map(|connective| {
        let matches = connective.len() <= tokens.len()
            && connective.iter().zip(tokens).all(|(word, token)| {
                token
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .eq_ignore_ascii_case(word)
            });
        matches.then_some(connective.len())
    })
}

/// Split on `;` and on `.`/`!`/`?` followed by whitespace. Each piece carries the joiner
/// that preceded it (empty for the first).
fn split_sentences(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut joiner = String::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let boundary = match c {
            ';' => true,
            '.' | '!' | '?' => chars.peek().is_none_or(|next| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            if !current.trim().is_empty() {
                out.push((joiner, current.trim().to_string()));
                joiner = format!("{c} ");
            }
            current.clear();
        } else {
            current.push(c);
        }
    }
    if !current.trim().is_empty() {
        out.push((joiner, current.trim().to_string()));
    }
    out
}
