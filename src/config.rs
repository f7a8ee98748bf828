use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{rlog_debug, Error, Result};

pub const DEFAULT_GRACE_PERIOD_MS: u64 = 3000;
pub const DEFAULT_DONE_STATUS: &str = "Done";
pub const DEFAULT_LOG_SAMPLE_FIRST: u64 = 5;
pub const DEFAULT_LOG_SAMPLE_EVERY: u64 = 50;

/// Tuning knobs for the task runner.
///
/// Every field has a default so a partial `runner.toml` is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// How long to wait after the agent reports completion for the task
    /// to show up as Done before skipping it.
    pub grace_period_ms: u64,
    /// Status value that marks a task finished. Compared case-insensitively.
    pub done_status: String,
    /// Store change events logged unconditionally at the start of a run.
    pub log_sample_first: u64,
    /// After the first events, log every Nth one.
    pub log_sample_every: u64,
    /// Closing line appended to every rendered agent instruction.
    pub instruction_suffix: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            done_status: DEFAULT_DONE_STATUS.to_string(),
            log_sample_first: DEFAULT_LOG_SAMPLE_FIRST,
            log_sample_every: DEFAULT_LOG_SAMPLE_EVERY,
            instruction_suffix: None,
        }
    }
}

impl RunnerConfig {
    pub fn runner_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or(Error::NoHomeDir)?
            .join(".backlog-runner"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::runner_dir()?.join("runner.toml"))
    }

    /// Builder-style override of the grace period.
    pub fn with_grace_period(mut self, period: Duration) -> Self {
        self.grace_period_ms = period.as_millis() as u64;
        self
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Whether `status` is the configured Done value.
    pub fn is_done(&self, status: &str) -> bool {
        status.trim().eq_ignore_ascii_case(self.done_status.trim())
    }

    pub fn effective_instruction_suffix(&self) -> &str {
        self.instruction_suffix.as_deref().unwrap_or(
            "Please implement the task described above, satisfying all acceptance criteria.",
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.done_status.trim().is_empty() {
            return Err(Error::Validation("done_status must not be blank".to_string()));
        }
        if self.log_sample_every == 0 {
            return Err(Error::Validation(
                "log_sample_every must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load `~/.backlog-runner/runner.toml`, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        rlog_debug!("RunnerConfig::load path={}", path.display());
        if !path.exists() {
            rlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        rlog_debug!(
            "Config loaded: grace_period_ms={}, done_status={:?}, sampling={}/{}",
            config.grace_period_ms,
            config.done_status,
            config.log_sample_first,
            config.log_sample_every
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                rlog_debug!("Creating config directory: {}", parent.display());
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        rlog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}
