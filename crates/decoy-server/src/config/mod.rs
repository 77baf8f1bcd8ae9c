//! Configuration for the decoy server.
//!
//! [`EngineSettings`] carries the process-wide knobs every imposter shares.
//! [`ConfigFile`] is the optional startup document listing imposters to
//! create; it is YAML, and since YAML is a superset of JSON a Mountebank-style
//! `imposters.json` loads unchanged.

use crate::imposter::ImposterConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_INJECTION_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PROXY_TIMEOUT_MS: u64 = 30_000;

/// Settings shared by all imposters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Accept stubs with injected JavaScript.
    pub allow_injection: bool,
    /// Budget for one injected function, callbacks included.
    pub injection_timeout: Duration,
    /// Budget for one origin round trip.
    pub proxy_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            allow_injection: false,
            injection_timeout: Duration::from_millis(DEFAULT_INJECTION_TIMEOUT_MS),
            proxy_timeout: Duration::from_millis(DEFAULT_PROXY_TIMEOUT_MS),
        }
    }
}

impl EngineSettings {
    pub fn with_injection(mut self, allow: bool) -> Self {
        self.allow_injection = allow;
        self
    }
}

/// Startup document: `{ imposters: [...] }`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub imposters: Vec<ImposterConfig>,
}

impl ConfigFile {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, anyhow::Error> {
        let config: ConfigFile = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that do not need a running engine. Stub contents are validated
    /// when each imposter is created.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let mut seen = std::collections::HashSet::new();
        for imposter in &self.imposters {
            if let Some(port) = imposter.port {
                if !seen.insert(port) {
                    anyhow::bail!("Port {} is configured for more than one imposter", port);
                }
            }
        }
        Ok(())
    }
}
