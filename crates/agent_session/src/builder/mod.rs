use std::{collections::BTreeMap, time::Duration};

use agent_trace::IngestLimits;

use crate::{
    manager::{AgentBackend, SessionManager},
    ConfigError,
};

#[derive(Debug, Clone)]
pub struct SessionManagerBuilder {
    pub(crate) backend: AgentBackend,
    pub(crate) env: BTreeMap<String, String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) limits: IngestLimits,
}

impl SessionManagerBuilder {
    pub fn new(backend: impl Into<AgentBackend>) -> Self {
        Self {
            backend: backend.into(),
            env: BTreeMap::new(),
            timeout: Some(Duration::from_secs(120)),
            limits: IngestLimits::default(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Per-turn timeout used when the agent config sets none. `None` waits indefinitely.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn limits(mut self, limits: IngestLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn build(self) -> Result<SessionManager, ConfigError> {
        match &self.backend {
            AgentBackend::Headless(config) => config.validate()?,
            AgentBackend::Native(config) => config.validate()?,
        }

        Ok(SessionManager::new(
            self.backend,
            self.env,
            self.timeout,
            self.limits,
        ))
    }
}
