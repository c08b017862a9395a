//! The orchestrator handle shared by every operation.
//!
//! [`Orchestrator`] owns the store, the agent gateway and the tunables read
//! from config. Operations live in their own modules as `impl Orchestrator`
//! blocks ([`crate::step`], [`crate::intake`], [`crate::devops`], ...).

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::agents::AgentGateway;
use crate::core::guardrail::GuardrailPolicy;
use crate::io::config::OrchestratorConfig;
use crate::io::store::{Store, StoreHealth, open_store};
use crate::model::EventRecord;

/// Observer notified after each event is appended.
pub type EventSink = Arc<dyn Fn(&EventRecord) + Send + Sync>;

/// Tunables read from config.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Run attempts after which a blocked task needs manual intervention.
    pub max_attempts: u32,
    pub guardrail: GuardrailPolicy,
    /// Default number of projects advanced per heartbeat.
    pub heartbeat_batch: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

impl Settings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_attempts: config.runs.max_attempts,
            guardrail: config.guardrail.clone(),
            heartbeat_batch: config.heartbeat.batch_size,
        }
    }
}

pub struct Orchestrator {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) gateway: AgentGateway,
    pub(crate) settings: Settings,
    pub(crate) sink: Option<EventSink>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backend", &self.gateway.backend_name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Store>, gateway: AgentGateway, settings: Settings) -> Self {
        Self {
            store,
            gateway,
            settings,
            sink: None,
        }
    }

    /// Build from a validated config rooted at `root`.
    pub fn from_config(root: &Path, config: &OrchestratorConfig) -> Result<(Self, StoreHealth)> {
        config.validate().context("validate config")?;
        let (store, health) = open_store(config, root)?;
        let gateway = AgentGateway::from_config(&config.agent).context("configure agent backend")?;
        Ok((Self::new(store, gateway, Settings::from_config(config)), health))
    }

    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn gateway(&self) -> &AgentGateway {
        &self.gateway
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}
