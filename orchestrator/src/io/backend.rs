//! Generation backends behind the agent gateway.
//!
//! A backend turns a rendered prompt plus an output schema into raw JSON. It
//! does not validate the JSON beyond parsing it; schema and semantic checks
//! belong to the gateway, which also owns the fallback path.

use std::fs;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::types::AgentKind;
use crate::io::config::{AgentBackendKind, AgentConfig, CommandBackendConfig, OpenAiConfig};
use crate::io::process::run_command_with_timeout;

/// One generation call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub kind: AgentKind,
    pub system_prompt: String,
    /// Pretty-printed JSON of the agent input.
    pub user_input: String,
    pub schema: Value,
    pub timeout: Duration,
    pub temperature: f32,
}

/// Abstraction over generative backends.
pub trait AgentBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Produce structured output for `request`. Fails on transport errors,
    /// timeouts and output that is not JSON.
    fn generate(&self, request: &GenerateRequest) -> Result<Value>;
}

/// Build the configured backend, or `None` when generation is unavailable.
///
/// Unavailable means the backend is `none`, the `openai` key env var is unset
/// or empty, or the `command` backend has no program.
pub fn backend_from_config(config: &AgentConfig) -> Result<Option<Box<dyn AgentBackend>>> {
    match config.backend {
        AgentBackendKind::None => Ok(None),
        AgentBackendKind::Command => {
            let has_program = config
                .command
                .command
                .first()
                .is_some_and(|program| !program.trim().is_empty());
            if !has_program {
                info!("agent command is empty, using fallbacks");
                return Ok(None);
            }
            Ok(Some(Box::new(CommandBackend::new(config.command.clone()))))
        }
        AgentBackendKind::Openai => {
            let key = std::env::var(&config.openai.api_key_env)
                .ok()
                .filter(|key| !key.trim().is_empty());
            match key {
                Some(key) => Ok(Some(Box::new(OpenAiBackend::new(
                    config.openai.clone(),
                    key,
                )?))),
                None => {
                    info!(
                        env = %config.openai.api_key_env,
                        "openai api key not set, using fallbacks"
                    );
                    Ok(None)
                }
            }
        }
    }
}

/// Backend that spawns a local agent CLI (`codex exec` by default).
///
/// The schema is written to a scratch directory and passed with
/// `--output-schema`; the agent writes its final message to the path given by
/// `--output-last-message`. The prompt is fed on stdin (`-`).
pub struct CommandBackend {
    config: CommandBackendConfig,
}

impl CommandBackend {
    pub fn new(config: CommandBackendConfig) -> Self {
        Self { config }
    }
}

impl AgentBackend for CommandBackend {
    fn name(&self) -> &str {
        "command"
    }

    #[instrument(skip_all, fields(kind = %request.kind, timeout_secs = request.timeout.as_secs()))]
    fn generate(&self, request: &GenerateRequest) -> Result<Value> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent command is empty"))?;

        let scratch = tempfile::tempdir().context("create agent scratch dir")?;
        let schema_path = scratch.path().join("output.schema.json");
        let output_path = scratch.path().join("output.json");
        let schema = serde_json::to_string_pretty(&request.schema)?;
        fs::write(&schema_path, schema)
            .with_context(|| format!("write schema {}", schema_path.display()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--output-schema")
            .arg(&schema_path)
            .arg("--output-last-message")
            .arg(&output_path)
            .arg("-")
            .current_dir(scratch.path());

        let prompt = format!("{}\n\n## Input\n\n{}\n", request.system_prompt, request.user_input);
        info!(program = %program, "starting agent command");
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            request.timeout,
            self.config.output_limit_bytes,
        )
        .with_context(|| format!("run {program}"))?;

        if output.timed_out {
            bail!("{program} timed out after {:?}", request.timeout);
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent command failed");
            bail!(
                "{program} failed with status {:?}: {}",
                output.status.code(),
                output.stderr_excerpt(400)
            );
        }

        let contents = fs::read_to_string(&output_path)
            .with_context(|| format!("read agent output {}", output_path.display()))?;
        debug!(bytes = contents.len(), "agent command produced output");
        parse_json_message(&contents)
    }
}

/// Backend for an OpenAI-compatible chat-completions endpoint.
///
/// The blocking HTTP client must not be created or dropped on an async
/// executor thread; it is built on the first `generate`.
pub struct OpenAiBackend {
    config: OpenAiConfig,
    api_key: String,
    client: OnceLock<reqwest::blocking::Client>,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            config,
            api_key,
            client: OnceLock::new(),
        })
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let built = reqwest::blocking::Client::builder()
            .build()
            .context("build http client")?;
        // A concurrent caller may have won the race; either client is fine.
        let _ = self.client.set(built);
        self.client
            .get()
            .ok_or_else(|| anyhow!("http client not initialized"))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl AgentBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip_all, fields(kind = %request.kind, model = %self.config.model))]
    fn generate(&self, request: &GenerateRequest) -> Result<Value> {
        let system = format!(
            "{}\n\nRespond with a single JSON object matching this schema:\n{}",
            request.system_prompt,
            serde_json::to_string(&request.schema)?
        );
        let body = json!({
            "model": self.config.model,
            "temperature": request.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": request.user_input },
            ],
        });

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client()?
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        let text = response.text().context("read chat completion body")?;
        if !status.is_success() {
            let excerpt: String = text.chars().take(300).collect();
            bail!("chat completion failed ({status}): {excerpt}");
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).context("parse chat completion response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat completion returned no content"))?;
        parse_json_message(&content)
    }
}

/// Parse a model message as JSON, tolerating a surrounding markdown fence.
pub fn parse_json_message(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).context("agent output is not valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_backend_is_unavailable() {
        let config = AgentConfig::default();
        assert!(backend_from_config(&config).expect("build").is_none());
    }

    #[test]
    fn openai_without_key_is_unavailable() {
        let mut config = AgentConfig::default();
        config.backend = AgentBackendKind::Openai;
        config.openai.api_key_env = "ORCHESTRATOR_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        assert!(backend_from_config(&config).expect("build").is_none());
    }

    #[test]
    fn openai_with_key_builds_without_touching_the_network() {
        let mut config = AgentConfig::default();
        config.backend = AgentBackendKind::Openai;
        // Any variable that is always set works as the key source.
        config.openai.api_key_env = "PATH".to_string();
        let backend = backend_from_config(&config)
            .expect("build")
            .expect("available");
        assert_eq!(backend.name(), "openai");
    }

    #[test]
    fn empty_command_is_unavailable() {
        let mut config = AgentConfig::default();
        config.backend = AgentBackendKind::Command;
        config.command.command = Vec::new();
        assert!(backend_from_config(&config).expect("build").is_none());
    }

    #[test]
    fn parses_fenced_json() {
        let value = parse_json_message("```json\n{\"a\": 1}\n```").expect("parse");
        assert_eq!(value, json!({"a": 1}));
        assert!(parse_json_message("not json").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_backend_reads_last_message_file() {
        // `sh -c <script> <$0> <args...>`: the backend appends the schema and
        // output flags, so the output path lands in $4.
        let backend = CommandBackend::new(CommandBackendConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "cat >/dev/null; printf '{\"ok\":true}' > \"$4\"".to_string(),
                "agent".to_string(),
            ],
            output_limit_bytes: 1024,
        });
        let request = GenerateRequest {
            kind: AgentKind::Classify,
            system_prompt: "system".to_string(),
            user_input: "{}".to_string(),
            schema: json!({"type": "object"}),
            timeout: Duration::from_secs(5),
            temperature: 0.2,
        };
        let value = backend.generate(&request).expect("generate");
        assert_eq!(value, json!({"ok": true}));
    }
}
