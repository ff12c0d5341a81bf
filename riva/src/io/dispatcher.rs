//! Action dispatch against a workspace directory.
//!
//! The [`ActionDispatcher`] trait decouples the cycle executor from how actions are run.
//! [`WorkspaceDispatcher`] runs them inside one root directory; tests use scripted
//! dispatchers that never touch the filesystem.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::core::types::{Action, ActionResult, ActionType, TargetState};
use crate::io::process::run_command_with_timeout;

/// Executes one action and reports its raw outcome.
///
/// An `Err` means the action could not be run at all (spawn or transport failure). An
/// action that ran and failed is reported as an `ActionResult` with a non-zero exit.
pub trait ActionDispatcher {
    fn execute(&self, action: &Action, timeout: Duration) -> Result<ActionResult>;
}

impl<D: ActionDispatcher + ?Sized> ActionDispatcher for Box<D> {
    fn execute(&self, action: &Action, timeout: Duration) -> Result<ActionResult> {
        (**self).execute(action, timeout)
    }
}

/// Dispatcher confined to one workspace directory.
#[derive(Debug, Clone)]
pub struct WorkspaceDispatcher {
    root: PathBuf,
    /// Program and leading args used to run COMMAND content (e.g. `["sh", "-c"]`).
    shell: Vec<String>,
    output_limit_bytes: usize,
    query_max_results: usize,
}

impl WorkspaceDispatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            shell: vec!["sh".to_string(), "-c".to_string()],
            output_limit_bytes: 100_000,
            query_max_results: 10,
        }
    }

    pub fn with_shell(mut self, shell: Vec<String>) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }

    pub fn with_query_max_results(mut self, max: usize) -> Self {
        self.query_max_results = max;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_command(&self, content: &str, timeout: Duration) -> Result<ActionResult> {
        let (program, args) = self
            .shell
            .split_first()
            .ok_or_else(|| anyhow!("dispatch shell is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(content).current_dir(&self.root);
        let output = run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes)
            .with_context(|| format!("run command in {}", self.root.display()))?;
        Ok(ActionResult {
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
            exit_status: output.exit_code(),
            timed_out: output.timed_out,
            target: None,
        })
    }

    fn create(&self, target: &str, path: &Path, content: &str) -> ActionResult {
        let written = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(path, strip_code_fence(content)));
        match written {
            Ok(()) => ActionResult::ok(format!("Created file: {target}")).with_target(TargetState {
                exists: path.exists(),
                contains_expected: None,
            }),
            Err(e) => ActionResult::failed(format!("Error: create {target}: {e}")),
        }
    }

    fn edit(&self, target: &str, path: &Path, content: &str) -> ActionResult {
        let clean = strip_code_fence(content);
        let existing = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return ActionResult::failed(format!("Error: read {target}: {e}")),
        };
        if existing.contains(clean.trim()) && !clean.trim().is_empty() {
            return ActionResult::ok(format!("Edited file: {target} (already present)"))
                .with_target(TargetState {
                    exists: true,
                    contains_expected: Some(true),
                });
        }

        let mut merged = existing;
        if !merged.is_empty() && !merged.ends_with('\n') {
            merged.push('\n');
        }
        merged.push_str(&clean);
        if !merged.ends_with('\n') {
            merged.push('\n');
        }
        let written = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(path, &merged));
        if let Err(e) = written {
            return ActionResult::failed(format!("Error: edit {target}: {e}"));
        }
        let contains = fs::read_to_string(path)
            .map(|text| text.contains(clean.trim()))
            .unwrap_or(false);
        ActionResult::ok(format!("Edited file: {target}")).with_target(TargetState {
            exists: path.exists(),
            contains_expected: Some(contains),
        })
    }

    fn delete(&self, target: &str, path: &Path) -> ActionResult {
        if !path.exists() {
            return ActionResult::failed(format!("Error: no such file {target}"));
        }
        match fs::remove_file(path) {
            Ok(()) => ActionResult::ok(format!("Deleted file: {target}")).with_target(TargetState {
                exists: path.exists(),
                contains_expected: None,
            }),
            Err(e) => ActionResult::failed(format!("Error: delete {target}: {e}")),
        }
    }

    fn query(&self, needle: &str) -> ActionResult {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return ActionResult::failed("Error: empty query");
        }
        let mut matches = Vec::new();
        let walker = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry.file_name()));
        'files: for entry in walker.filter_map(|entry| entry.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(text) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            for (index, line) in text.lines().enumerate() {
                if line.to_lowercase().contains(&needle) {
                    matches.push(format!("  {rel}:{}: {}", index + 1, line.trim()));
                    if matches.len() >= self.query_max_results {
                        break 'files;
                    }
                }
            }
        }
        if matches.is_empty() {
            return ActionResult {
                stdout: "No matches found".to_string(),
                exit_status: Some(1),
                ..ActionResult::default()
            };
        }
        ActionResult::ok(format!(
            "Found {} matches:\n{}",
            matches.len(),
            matches.join("\n")
        ))
    }
}

impl ActionDispatcher for WorkspaceDispatcher {
    #[instrument(skip_all, fields(kind = %action.kind, target = ?action.target, timeout_ms = timeout.as_millis() as u64))]
    fn execute(&self, action: &Action, timeout: Duration) -> Result<ActionResult> {
        if action.kind == ActionType::Command {
            info!("running command");
            return self.run_command(&action.content, timeout);
        }
        if action.kind == ActionType::Query {
            return Ok(self.query(&action.content));
        }

        let Some(target) = action.target.as_deref() else {
            warn!("file action without target");
            return Ok(ActionResult::failed(format!(
                "Error: No target specified for {} action",
                action.kind
            )));
        };
        let path = match resolve_target(&self.root, target) {
            Ok(path) => path,
            Err(reason) => {
                warn!(%reason, "rejected target");
                return Ok(ActionResult::failed(format!("Error: {reason}")));
            }
        };
        debug!(path = %path.display(), "resolved target");
        let result = match action.kind {
            ActionType::Create => self.create(target, &path, &action.content),
            ActionType::Edit => self.edit(target, &path, &action.content),
            ActionType::Delete => self.delete(target, &path),
            ActionType::Command | ActionType::Query => {
                return Err(anyhow!("{} is not a file action", action.kind));
            }
        };
        Ok(result)
    }
}

/// Resolve a workspace-relative target, refusing absolute paths and `..` escapes.
pub fn resolve_target(root: &Path, target: &str) -> Result<PathBuf, String> {
    let relative = Path::new(target.trim());
    if relative.as_os_str().is_empty() {
        return Err("empty target path".to_string());
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(format!("target {target} escapes the workspace")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("target {target} must be relative"));
            }
        }
    }
    Ok(root.join(relative))
}

fn is_skipped_dir(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || name == "target" || name == "node_modules"
}

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[\w+.-]*[ \t]*\r?\n(.*?)\r?\n?```$").expect("fence pattern is valid")
});

/// Strip a surrounding markdown code fence, if the whole content is one fenced block.
pub fn strip_code_fence(content: &str) -> String {
    let trimmed = content.trim();
    match FENCED_BLOCK.captures(trimmed).and_then(|caps| caps.get(1)) {
        Some(inner) => format!("{}\n", inner.as_str().trim_end()),
        None => content.to_string(),
    }
}
