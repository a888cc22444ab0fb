//! Runtime configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// The default number of times a rejected pod update is retried after a re-fetch.
pub const DEFAULT_UPDATE_RETRIES: u32 = 3;
/// The default timeout in seconds to use for individual API calls.
pub const DEFAULT_API_TIMEOUT_SECONDS: u64 = 5;
/// The default component name reported on emitted events.
pub const DEFAULT_EVENT_COMPONENT: &str = "petset-controller";

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,

    /// The Kubernetes namespace of the target StatefulSet.
    pub namespace: String,
    /// The name of the StatefulSet to reconcile.
    pub statefulset: String,

    /// The number of times a rejected pod update is retried, after re-fetching the pod.
    #[serde(default = "Config::default_update_retries")]
    pub update_retries: u32,
    /// The timeout in seconds applied to each individual API call.
    #[serde(default = "Config::default_api_timeout_seconds")]
    pub api_timeout_seconds: u64,
    /// The component name reported as the source of emitted events.
    #[serde(default = "Config::default_event_component")]
    pub event_component: String,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routine just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        envy::from_env().context("error building config from env")
    }

    /// The timeout to use for individual API calls.
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_seconds)
    }

    fn default_update_retries() -> u32 {
        DEFAULT_UPDATE_RETRIES
    }

    fn default_api_timeout_seconds() -> u64 {
        DEFAULT_API_TIMEOUT_SECONDS
    }

    fn default_event_component() -> String {
        DEFAULT_EVENT_COMPONENT.into()
    }

    /// Build a config suitable for tests.
    #[cfg(test)]
    pub fn new_test() -> Self {
        Self {
            rust_log: "error".into(),
            namespace: "default".into(),
            statefulset: "web".into(),
            update_retries: DEFAULT_UPDATE_RETRIES,
            api_timeout_seconds: DEFAULT_API_TIMEOUT_SECONDS,
            event_component: DEFAULT_EVENT_COMPONENT.into(),
        }
    }
}
