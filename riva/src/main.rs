//! `riva`: drive a goal through the recursive intention engine.
//!
//! Runs happen inside a workspace directory; each run writes a session file under
//! `.riva/sessions/` that `riva show` and `riva validate` read back.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use riva::checkpoint::CheckpointGate;
use riva::checkpoint::auto::AutoCheckpoint;
use riva::checkpoint::human::HumanCheckpoint;
use riva::core::types::IntentionStatus;
use riva::engine::{self, Services};
use riva::exit_codes;
use riva::io::completion::{CommandCompletion, CompletionService, HeuristicCompletion};
use riva::io::config::{CONFIG_FILE, CheckpointMode, EngineConfig, load_config, write_config};
use riva::io::console::spawn_console_responder;
use riva::io::dispatcher::WorkspaceDispatcher;
use riva::io::session::{
    TimelineEntry, TimelineEvent, load_session, render_outline, save_session, session_path,
};
use riva::logging;

#[derive(Parser)]
#[command(
    name = "riva",
    version,
    about = "Recursive intention engine: verify goals directly or decompose them"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `riva.toml` if missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = CONFIG_FILE)]
        config: PathBuf,
    },
    /// Drive a goal to VERIFIED or FAILED and record the session.
    Run(RunArgs),
    /// Print the intention tree of a recorded session.
    Show {
        session: PathBuf,
    },
    /// Check a session file against the schema and tree invariants.
    Validate {
        session: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Goal for the root intention.
    #[arg(long)]
    goal: String,
    /// Verification criterion for the root intention.
    #[arg(long)]
    acceptance: String,
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,
    /// Workspace the dispatcher acts on (default: current directory).
    #[arg(long)]
    workdir: Option<PathBuf>,
    /// Session output path (default: `.riva/sessions/<run_id>.json` in the workspace).
    #[arg(long)]
    session: Option<PathBuf>,
    /// Ask on the terminal at every checkpoint, falling back to automatic answers.
    #[arg(long)]
    human: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Run(args) => cmd_run(args),
        Command::Show { session } => cmd_show(&session),
        Command::Validate { session } => cmd_validate(&session),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &EngineConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let cfg = load_config(&args.config)?;
    logging::init(&cfg.log_level);

    let workdir = match args.workdir {
        Some(dir) => dir,
        None => env::current_dir().context("resolve current directory")?,
    };
    if !workdir.is_dir() {
        anyhow::bail!("workspace {} is not a directory", workdir.display());
    }

    let dispatcher = WorkspaceDispatcher::new(&workdir)
        .with_shell(cfg.dispatch.shell.clone())
        .with_output_limit(cfg.dispatch.output_limit_bytes)
        .with_query_max_results(cfg.dispatch.query_max_results);
    let completion = build_completion(&cfg, &workdir);
    let checkpoint = build_checkpoint(&cfg, args.human)?;
    let services = Services::new(completion, dispatcher, checkpoint)
        .with_timeouts(cfg.completion_timeout(), cfg.dispatch_timeout());

    let (root, session) = engine::run_with_observer(
        &args.goal,
        &args.acceptance,
        cfg.limits(),
        &services,
        &mut print_progress,
    )?;

    let path = args
        .session
        .unwrap_or_else(|| session_path(&workdir, &session.run_id));
    save_session(&path, &session)?;

    println!("run: {}", session.run_id);
    println!("outcome: {}", root.status);
    println!(
        "cycles: {}, intentions: {}",
        session.metadata.total_cycles, session.metadata.intention_count
    );
    println!("session: {}", path.display());
    Ok(match root.status {
        IntentionStatus::Verified => exit_codes::OK,
        _ => exit_codes::ROOT_FAILED,
    })
}

fn build_completion(cfg: &EngineConfig, workdir: &Path) -> Box<dyn CompletionService> {
    if cfg.completion.command.is_empty() {
        return Box::new(HeuristicCompletion::new(
            workdir,
            cfg.completion.test_command.clone(),
        ));
    }
    Box::new(CommandCompletion::new(
        cfg.completion.command.clone(),
        workdir,
        cfg.completion.prompt_budget_bytes,
        cfg.completion.output_limit_bytes,
    ))
}

fn build_checkpoint(cfg: &EngineConfig, human: bool) -> Result<Box<dyn CheckpointGate>> {
    if !human && cfg.checkpoint.mode == CheckpointMode::Auto {
        return Ok(Box::new(AutoCheckpoint));
    }
    // The responder thread stays blocked on stdin; it ends with the process.
    let (source, _responder) = spawn_console_responder()?;
    Ok(Box::new(HumanCheckpoint::new(
        AutoCheckpoint,
        source,
        cfg.human_timeout(),
    )))
}

fn print_progress(entry: &TimelineEntry) {
    let who = entry
        .intention
        .map_or_else(String::new, |id| format!("{id} "));
    match &entry.event {
        TimelineEvent::CycleCompleted {
            index,
            action_type,
            judgment,
            ..
        } => eprintln!("{who}cycle {}: {action_type} -> {judgment}", index + 1),
        TimelineEvent::DecompositionProposed { children, fallback } => eprintln!(
            "{who}decomposing into {} children{}",
            children.len(),
            if *fallback { " (heuristic)" } else { "" }
        ),
        TimelineEvent::LimitReached { limit } => eprintln!("{who}limit reached: {limit:?}"),
        TimelineEvent::IntentionFinished { status } => eprintln!("{who}{status}"),
        _ => {}
    }
}

fn cmd_show(path: &Path) -> Result<i32> {
    let session = load_session(path)?;
    println!(
        "{} [{}] {:.1}s",
        session.run_id, session.metadata.outcome, session.metadata.duration_secs
    );
    print!("{}", render_outline(&session.tree));
    Ok(exit_codes::OK)
}

fn cmd_validate(path: &Path) -> Result<i32> {
    let session = load_session(path)?;
    println!(
        "ok: {} ({} intentions, {} timeline entries)",
        session.run_id,
        session.metadata.intention_count,
        session.timeline.len()
    );
    Ok(exit_codes::OK)
}
