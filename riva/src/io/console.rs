//! Terminal responder for human checkpoints (`riva run --human`).

use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::checkpoint::human::{Answer, ChannelDecisionSource, Prompt, Question};

/// Start a thread that answers checkpoint questions from stdin, printing them to stderr.
pub fn spawn_console_responder() -> Result<(ChannelDecisionSource, JoinHandle<()>)> {
    let (requests, prompts) = mpsc::channel();
    let handle = thread::Builder::new()
        .name("riva-console".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            if let Err(err) = respond(prompts, stdin.lock(), io::stderr()) {
                warn!(err = %err, "console responder stopped");
            }
        })
        .context("spawn console responder")?;
    Ok((ChannelDecisionSource::new(requests), handle))
}

/// Answer prompts one line at a time until the engine drops its sender or input ends.
pub fn respond<R: BufRead, W: Write>(
    prompts: Receiver<Prompt>,
    mut input: R,
    mut output: W,
) -> Result<()> {
    for prompt in prompts {
        write!(output, "{}", render_question(&prompt.question))?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line).context("read answer")? == 0 {
            debug!("console input closed");
            return Ok(());
        }
        let answer = match parse_answer(&prompt.question, &line) {
            Some(answer) => answer,
            None => {
                writeln!(output, "unrecognised answer, using the suggestion")?;
                Answer::Defer
            }
        };
        if prompt.reply.send(answer).is_err() {
            writeln!(
                output,
                "answer arrived after the checkpoint timed out; the automatic decision was used"
            )?;
        }
    }
    Ok(())
}

/// Parse one line for `question`. Empty input defers to the automatic suggestion.
pub fn parse_answer(question: &Question, line: &str) -> Option<Answer> {
    let text = line.trim();
    if text.is_empty() {
        return Some(Answer::Defer);
    }
    match question {
        Question::JudgeAction { .. } => text.parse().ok().map(Answer::Judgment),
        Question::ApproveDecomposition { .. }
        | Question::VerifyIntegration { .. }
        | Question::ReviewReflection { .. } => match text.to_ascii_lowercase().as_str() {
            "y" | "yes" => Some(Answer::Approve(true)),
            "n" | "no" => Some(Answer::Approve(false)),
            _ => None,
        },
    }
}

pub fn render_question(question: &Question) -> String {
    let mut out = format!("\n== checkpoint: {} ==\n", question.kind());
    match question {
        Question::JudgeAction {
            goal,
            thought,
            action,
            result,
            suggested,
        } => {
            out.push_str(&format!(
                "goal:    {goal}\nthought: {thought}\naction:  {action}\nresult:  {result}\n"
            ));
            out.push_str(&format!(
                "judgment [success/failure/partial/unclear, empty = {suggested}]: "
            ));
        }
        Question::ApproveDecomposition {
            goal,
            children,
            suggested,
        } => {
            out.push_str(&format!("goal: {goal}\n"));
            for (index, child) in children.iter().enumerate() {
                out.push_str(&format!("  {}. {child}\n", index + 1));
            }
            out.push_str(&approve_line("approve this split", *suggested));
        }
        Question::VerifyIntegration {
            goal,
            acceptance,
            children,
            suggested,
        } => {
            out.push_str(&format!("goal:       {goal}\nacceptance: {acceptance}\n"));
            for child in children {
                out.push_str(&format!("  {child}\n"));
            }
            out.push_str(&approve_line("children satisfy the goal", *suggested));
        }
        Question::ReviewReflection {
            goal,
            reflection,
            suggested,
        } => {
            out.push_str(&format!("goal:       {goal}\nreflection: {reflection}\n"));
            out.push_str(&approve_line("use this reflection", *suggested));
        }
    }
    out
}

fn approve_line(label: &str, suggested: bool) -> String {
    let default = if suggested { "y" } else { "n" };
    format!("{label}? [y/n, empty = {default}]: ")
}
