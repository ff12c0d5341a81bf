//! Engine configuration stored in `riva.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::Limits;

/// Default config file name, resolved against the working directory.
pub const CONFIG_FILE: &str = "riva.toml";

/// Upper bound for every `*_secs` setting (one year).
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Engine configuration (TOML).
///
/// Every field is optional; missing values take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Fallback `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub limits: LimitsConfig,
    pub dispatch: DispatchConfig,
    pub completion: CompletionConfig,
    pub checkpoint: CheckpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_depth: u32,
    pub max_cycles_per_intention: u32,
    pub wall_clock_secs: u64,
    /// Total cycles across the whole run.
    pub max_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatchConfig {
    pub command_timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Program and leading args that receive COMMAND content as the final argument.
    pub shell: Vec<String>,
    pub query_max_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompletionConfig {
    /// External completion command (e.g. `["claude","-p"]`). Empty means heuristics only.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    pub prompt_budget_bytes: usize,
    /// Command proposed by the heuristic planner for test/verify/check goals.
    pub test_command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CheckpointConfig {
    pub mode: CheckpointMode,
    pub human_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    #[default]
    Auto,
    Human,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            limits: LimitsConfig::default(),
            dispatch: DispatchConfig::default(),
            completion: CompletionConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_depth: limits.max_depth,
            max_cycles_per_intention: limits.max_cycles_per_intention,
            wall_clock_secs: limits.wall_clock.as_secs(),
            max_iterations: limits.max_iterations,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 60,
            output_limit_bytes: 100_000,
            shell: vec!["sh".to_string(), "-c".to_string()],
            query_max_results: 10,
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 30,
            output_limit_bytes: 200_000,
            prompt_budget_bytes: 24_000,
            test_command: "cargo test".to_string(),
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            mode: CheckpointMode::Auto,
            human_timeout_secs: 120,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("limits.max_depth", u64::from(self.limits.max_depth)),
            (
                "limits.max_cycles_per_intention",
                u64::from(self.limits.max_cycles_per_intention),
            ),
            ("limits.wall_clock_secs", self.limits.wall_clock_secs),
            ("limits.max_iterations", u64::from(self.limits.max_iterations)),
            ("dispatch.command_timeout_secs", self.dispatch.command_timeout_secs),
            ("dispatch.output_limit_bytes", self.dispatch.output_limit_bytes as u64),
            ("dispatch.query_max_results", self.dispatch.query_max_results as u64),
            ("completion.timeout_secs", self.completion.timeout_secs),
            ("completion.output_limit_bytes", self.completion.output_limit_bytes as u64),
            ("completion.prompt_budget_bytes", self.completion.prompt_budget_bytes as u64),
            ("checkpoint.human_timeout_secs", self.checkpoint.human_timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        let durations = [
            ("limits.wall_clock_secs", self.limits.wall_clock_secs),
            ("dispatch.command_timeout_secs", self.dispatch.command_timeout_secs),
            ("completion.timeout_secs", self.completion.timeout_secs),
            ("checkpoint.human_timeout_secs", self.checkpoint.human_timeout_secs),
        ];
        for (name, secs) in durations {
            if secs > MAX_DURATION_SECS {
                return Err(anyhow!("{name} must be <= {MAX_DURATION_SECS}"));
            }
        }
        if self.dispatch.shell.first().is_none_or(|p| p.trim().is_empty()) {
            return Err(anyhow!("dispatch.shell must be a non-empty array"));
        }
        if self
            .completion
            .command
            .first()
            .is_some_and(|p| p.trim().is_empty())
        {
            return Err(anyhow!("completion.command[0] must not be blank"));
        }
        if self.completion.test_command.trim().is_empty() {
            return Err(anyhow!("completion.test_command must not be blank"));
        }
        Ok(())
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_depth: self.limits.max_depth,
            max_cycles_per_intention: self.limits.max_cycles_per_intention,
            wall_clock: Duration::from_secs(self.limits.wall_clock_secs),
            max_iterations: self.limits.max_iterations,
        }
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.command_timeout_secs)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion.timeout_secs)
    }

    pub fn human_timeout(&self) -> Duration {
        Duration::from_secs(self.checkpoint.human_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    write_atomic(path, &buf)
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.limits(), Limits::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join(CONFIG_FILE);
        let mut cfg = EngineConfig::default();
        cfg.completion.command = vec!["llm".to_string(), "--json".to_string()];
        cfg.checkpoint.mode = CheckpointMode::Human;
        write_config(&path, &cfg).expect("write");
        assert!(!temp.path().join("nested").join("riva.toml.tmp").exists());
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    /// Partial files keep defaults for every omitted field.
    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[limits]\nmax_depth = 3\n\n[checkpoint]\nmode = \"human\"\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.limits.max_depth, 3);
        assert_eq!(cfg.limits.max_cycles_per_intention, 5);
        assert_eq!(cfg.checkpoint.mode, CheckpointMode::Human);
        assert_eq!(cfg.dispatch.shell, vec!["sh", "-c"]);
    }

    #[test]
    fn validate_rejects_zero_limits_and_blank_commands() {
        let mut cfg = EngineConfig::default();
        cfg.limits.max_iterations = 0;
        let err = cfg.validate().expect_err("zero iterations");
        assert!(err.to_string().contains("limits.max_iterations"));

        let mut cfg = EngineConfig::default();
        cfg.dispatch.shell.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.completion.command = vec![" ".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_durations_beyond_a_year() {
        let mut cfg = EngineConfig::default();
        cfg.limits.wall_clock_secs = u64::MAX;
        let err = cfg.validate().expect_err("huge wall clock");
        assert!(err.to_string().contains("limits.wall_clock_secs"));

        let mut cfg = EngineConfig::default();
        cfg.dispatch.command_timeout_secs = MAX_DURATION_SECS;
        assert!(cfg.validate().is_ok());
        cfg.dispatch.command_timeout_secs += 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[checkpoint]\nmode = \"sometimes\"\n").expect("write");
        assert!(load_config(&path).is_err());
    }
}
