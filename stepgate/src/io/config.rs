//! Workspace configuration stored under `.stepgate/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::policies::Policies;

/// Stepgate configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below; unknown policy keys are carried into new jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StepgateConfig {
    /// Policies applied to newly created jobs.
    pub policies: Policies,
    pub shell: ShellConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShellConfig {
    /// Upper bound on any command gate timeout, whatever the gate or job asks for.
    pub timeout_secs: u64,
    /// Bytes of stdout/stderr kept in memory per command.
    pub output_limit_bytes: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            output_limit_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventsConfig {
    /// Per-subscriber queue depth before events are dropped.
    pub queue_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

impl StepgateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.shell.timeout_secs == 0 {
            return Err(anyhow!("shell.timeout_secs must be > 0"));
        }
        if self.shell.output_limit_bytes == 0 {
            return Err(anyhow!("shell.output_limit_bytes must be > 0"));
        }
        if self.events.queue_capacity == 0 {
            return Err(anyhow!("events.queue_capacity must be > 0"));
        }
        if self.policies.shell_gate_timeout_secs == 0 {
            return Err(anyhow!("policies.shell_gate_timeout_secs must be > 0"));
        }
        if self.policies.enable_shell_gates && self.policies.shell_gate_allowlist.is_empty() {
            tracing::warn!("shell gates enabled with an empty allowlist; every command gate will fail");
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `StepgateConfig::default()`.
pub fn load_config(path: &Path) -> Result<StepgateConfig> {
    if !path.exists() {
        let cfg = StepgateConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: StepgateConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &StepgateConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
