//! Orchestrator configuration stored under `.orchestrator/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::guardrail::GuardrailPolicy;

/// Orchestrator configuration (TOML).
///
/// Edited by humans. Missing fields default to values that run with no
/// credentials at all: a SQLite store next to the config and no agent backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub store: StoreConfig,
    pub agent: AgentConfig,
    pub runs: RunsConfig,
    pub guardrail: GuardrailPolicy,
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database file, relative to the project root unless absolute.
    pub path: PathBuf,
    /// Use an in-memory store when the database cannot be opened.
    pub fallback_to_memory: bool,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from(".orchestrator/orchestrator.db"),
            fallback_to_memory: true,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentBackendKind {
    None,
    Command,
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub backend: AgentBackendKind,
    /// Wall-clock bound on a single agent call.
    pub timeout_secs: u64,
    pub temperature: f32,
    pub command: CommandBackendConfig,
    pub openai: OpenAiConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backend: AgentBackendKind::None,
            timeout_secs: 60,
            temperature: 0.2,
            command: CommandBackendConfig::default(),
            openai: OpenAiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandBackendConfig {
    /// Program and leading arguments (e.g. `["codex", "exec"]`).
    pub command: Vec<String>,
    pub output_limit_bytes: usize,
}

impl Default for CommandBackendConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string()],
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4.1-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunsConfig {
    /// A task whose highest attempt reaches this value is exhausted.
    pub max_attempts: u32,
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self { max_attempts: 6 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub batch_size: usize,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Sqlite && self.store.path.as_os_str().is_empty() {
            return Err(anyhow!("store.path must be set for the sqlite backend"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return Err(anyhow!("agent.temperature must be within 0.0..=2.0"));
        }
        if self.agent.backend == AgentBackendKind::Command
            && self
                .agent
                .command
                .command
                .first()
                .is_none_or(|program| program.trim().is_empty())
        {
            return Err(anyhow!("agent.command.command must be a non-empty array"));
        }
        if self.agent.command.output_limit_bytes == 0 {
            return Err(anyhow!("agent.command.output_limit_bytes must be > 0"));
        }
        if self.agent.backend == AgentBackendKind::Openai
            && self.agent.openai.api_key_env.trim().is_empty()
        {
            return Err(anyhow!("agent.openai.api_key_env must be set"));
        }
        if self.runs.max_attempts == 0 {
            return Err(anyhow!("runs.max_attempts must be > 0"));
        }
        if self.guardrail.max_changed_files == 0 {
            return Err(anyhow!("guardrail.max_changed_files must be > 0"));
        }
        if self.guardrail.allowed_path_prefixes.is_empty() {
            return Err(anyhow!("guardrail.allowed_path_prefixes must not be empty"));
        }
        if self.heartbeat.batch_size == 0 {
            return Err(anyhow!("heartbeat.batch_size must be > 0"));
        }
        Ok(())
    }

    /// Database path resolved against the project root.
    pub fn store_path(&self, root: &Path) -> PathBuf {
        if self.store.path.is_absolute() {
            self.store.path.clone()
        } else {
            root.join(&self.store.path)
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
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
