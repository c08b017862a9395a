//! Generation agents and the gateway that runs them.
//!
//! Each agent is a type implementing [`Agent`]: it owns its kind tag, output
//! schema, prompt template, semantic validation and deterministic fallback.
//! [`AgentGateway::invoke`] is the only entry point. It never fails: when no
//! backend is configured, or the backend call fails in any way, the agent's
//! fallback is returned instead.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use minijinja::Environment;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::core::types::AgentKind;
use crate::io::backend::{AgentBackend, GenerateRequest, backend_from_config};
use crate::io::config::AgentConfig;

pub mod brief;
pub mod classify;
pub mod estimate;
pub mod plan;
pub mod repair;
pub mod triage;

/// Categories a project can be classified into.
pub const CATEGORIES: [&str; 5] = ["design", "development", "research", "content", "data-ml"];

/// One generation agent.
pub trait Agent {
    type Input: Serialize;
    type Output: Serialize + DeserializeOwned;

    const KIND: AgentKind;
    /// JSON Schema the raw backend output must satisfy.
    const OUTPUT_SCHEMA: &'static str;
    /// minijinja template for the system prompt. Rendered with `input` plus
    /// whatever [`Agent::prompt_vars`] returns.
    const PROMPT: &'static str;

    fn prompt_vars(_input: &Self::Input) -> Map<String, Value> {
        Map::new()
    }

    /// Checks the schema cannot express (cross-field and cross-input rules).
    fn validate(input: &Self::Input, output: &Self::Output) -> Result<()>;

    /// Deterministic output used whenever generation is unavailable or fails.
    fn fallback(input: &Self::Input) -> Self::Output;
}

/// Runs agents against an optional backend.
pub struct AgentGateway {
    backend: Option<Box<dyn AgentBackend>>,
    timeout: Duration,
    temperature: f32,
    templates: Environment<'static>,
}

impl AgentGateway {
    pub fn new(backend: Option<Box<dyn AgentBackend>>, timeout: Duration, temperature: f32) -> Self {
        Self {
            backend,
            timeout,
            temperature,
            templates: Environment::new(),
        }
    }

    /// Gateway with no backend; every invocation returns the fallback.
    pub fn fallback_only() -> Self {
        Self::new(None, Duration::from_secs(60), 0.2)
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let backend = backend_from_config(config)?;
        Ok(Self::new(
            backend,
            Duration::from_secs(config.timeout_secs),
            config.temperature,
        ))
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.backend.as_deref().map(|backend| backend.name())
    }

    /// Produce `A`'s output for `input`.
    #[instrument(skip_all, fields(kind = %A::KIND))]
    pub fn invoke<A: Agent>(&self, input: &A::Input) -> A::Output {
        let Some(backend) = self.backend.as_deref() else {
            debug!("no agent backend configured, using fallback");
            return A::fallback(input);
        };
        match self.generate::<A>(backend, input) {
            Ok(output) => output,
            Err(err) => {
                warn!(
                    backend = backend.name(),
                    err = %format!("{err:#}"),
                    "agent call failed, using fallback"
                );
                A::fallback(input)
            }
        }
    }

    fn generate<A: Agent>(&self, backend: &dyn AgentBackend, input: &A::Input) -> Result<A::Output> {
        let input_value = serde_json::to_value(input).context("serialize agent input")?;
        let system_prompt = self.render_prompt::<A>(input, &input_value)?;
        let schema: Value = serde_json::from_str(A::OUTPUT_SCHEMA)
            .with_context(|| format!("parse {} output schema", A::KIND))?;

        let request = GenerateRequest {
            kind: A::KIND,
            system_prompt,
            user_input: serde_json::to_string_pretty(&input_value)?,
            schema,
            timeout: self.timeout,
            temperature: self.temperature,
        };

        let started = Instant::now();
        let raw = backend.generate(&request)?;
        let elapsed = started.elapsed();
        if elapsed > self.timeout {
            bail!("agent call exceeded {:?} (took {:?})", self.timeout, elapsed);
        }

        validate_schema(&request.schema, &raw)?;
        let output: A::Output =
            serde_json::from_value(raw).with_context(|| format!("deserialize {} output", A::KIND))?;
        A::validate(input, &output).with_context(|| format!("validate {} output", A::KIND))?;
        debug!(elapsed_ms = elapsed.as_millis() as u64, "agent output accepted");
        Ok(output)
    }

    fn render_prompt<A: Agent>(&self, input: &A::Input, input_value: &Value) -> Result<String> {
        let mut vars = A::prompt_vars(input);
        vars.insert("input".to_string(), input_value.clone());
        vars.insert(
            "categories".to_string(),
            Value::from(CATEGORIES.iter().map(|c| Value::from(*c)).collect::<Vec<_>>()),
        );
        self.templates
            .render_str(A::PROMPT, Value::Object(vars))
            .with_context(|| format!("render {} prompt", A::KIND))
    }
}

fn validate_schema(schema: &Value, instance: &Value) -> Result<()> {
    let compiled = validator_for(schema).map_err(|err| anyhow!("invalid schema: {err}"))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed: {}", messages.join("; "));
    }
    Ok(())
}
