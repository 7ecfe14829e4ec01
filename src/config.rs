//! Service-level configuration.
//!
//! Values come from code through [`ServiceConfigBuilder`] or from the process
//! environment (and an optional `.env` file) through [`ServiceConfig::from_env`].

use std::{path::PathBuf, sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    client::{OpenAiClient, DEFAULT_API_BASE, DEFAULT_MODEL, DEFAULT_TIMEOUT},
    error::{BatchError, Result},
    sink::JsonFileSink,
    store::{MemoryStatusStore, TaskStatusStore},
};

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_API_BASE: &str = "OPENAI_API_BASE";
pub const ENV_MODEL: &str = "OPENAI_MODEL";
pub const ENV_REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT_SECS";
pub const ENV_OUTPUT_DIR: &str = "OUTPUT_DIR";
pub const ENV_REDIS_URL: &str = "REDIS_URL";

/// Settings shared by every job a service runs.
#[derive(Clone)]
pub struct ServiceConfig {
    /// Bearer token for the generation service. Required only for [`openai_client`](Self::openai_client).
    pub api_key: Option<String>,
    /// Base URL of an OpenAI-compatible API (default: `https://api.openai.com/v1`)
    pub api_base: String,
    /// Model name sent with every call (default: `gpt-4o`)
    pub model: String,
    /// Upper bound on a single generation call (default: 120s)
    pub request_timeout: Duration,
    /// Directory artifacts are written to (default: `output`)
    pub output_dir: PathBuf,
    /// Redis connection URL; the in-memory store is used when unset.
    pub redis_url: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: DEFAULT_TIMEOUT,
            output_dir: PathBuf::from("output"),
            redis_url: None,
        }
    }
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .field("output_dir", &self.output_dir)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Load a `.env` file if one exists, then read the process environment.
    ///
    /// Unset or empty variables keep their defaults. A malformed
    /// `REQUEST_TIMEOUT_SECS` is a configuration error.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "Loaded .env file"),
            Err(err) if err.not_found() => {}
            Err(err) => warn!(error = %err, "Ignoring unreadable .env file"),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        config.api_key = get(ENV_API_KEY);
        if let Some(base) = get(ENV_API_BASE) {
            config.api_base = base;
        }
        if let Some(model) = get(ENV_MODEL) {
            config.model = model;
        }
        if let Some(raw) = get(ENV_REQUEST_TIMEOUT) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                BatchError::Config(format!("{ENV_REQUEST_TIMEOUT} must be whole seconds, got {raw:?}"))
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = get(ENV_OUTPUT_DIR) {
            config.output_dir = PathBuf::from(dir);
        }
        config.redis_url = get(ENV_REDIS_URL);

        Ok(config)
    }

    /// Build the HTTP generation client described by this config.
    pub fn openai_client(&self) -> Result<OpenAiClient> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| BatchError::Config(format!("{ENV_API_KEY} is not set")))?;
        OpenAiClient::builder(api_key)
            .with_api_base(self.api_base.clone())
            .with_model(self.model.clone())
            .with_timeout(self.request_timeout)
            .build()
    }

    pub fn sink(&self) -> JsonFileSink {
        JsonFileSink::new(self.output_dir.clone())
    }

    /// Connect the status store: Redis when a URL is configured and the
    /// `redis` feature is enabled, otherwise an in-memory store.
    pub async fn status_store(&self) -> Result<Arc<dyn TaskStatusStore>> {
        #[cfg(feature = "redis")]
        {
            if let Some(url) = &self.redis_url {
                let store = crate::store::RedisStatusStore::connect(url).await?;
                store.health_check().await?;
                return Ok(Arc::new(store));
            }
        }

        #[cfg(not(feature = "redis"))]
        {
            if self.redis_url.is_some() {
                warn!("{ENV_REDIS_URL} is set but the redis feature is disabled, using the in-memory status store");
            }
        }

        Ok(Arc::new(MemoryStatusStore::new()))
    }
}

/// Fluent builder for [`ServiceConfig`].
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.api_key = Some(api_key.into());
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.config.api_base = api_base.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.redis_url = Some(url.into());
        self
    }

    pub fn build(self) -> ServiceConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_keeps_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.api_key.is_none());
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn reads_every_variable() {
        let config = ServiceConfig::from_lookup(lookup(&[
            (ENV_API_KEY, "sk-test"),
            (ENV_API_BASE, "http://localhost:8080/v1"),
            (ENV_MODEL, "qwen-max"),
            (ENV_REQUEST_TIMEOUT, "30"),
            (ENV_OUTPUT_DIR, "/tmp/records"),
            (ENV_REDIS_URL, "redis://localhost:6379/0"),
        ]))
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.api_base, "http://localhost:8080/v1");
        assert_eq!(config.model, "qwen-max");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.output_dir, PathBuf::from("/tmp/records"));
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379/0"));
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = ServiceConfig::from_lookup(lookup(&[(ENV_MODEL, "  "), (ENV_API_KEY, "")]))
            .unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn malformed_timeout_is_rejected() {
        let err = ServiceConfig::from_lookup(lookup(&[(ENV_REQUEST_TIMEOUT, "soon")])).unwrap_err();
        assert!(matches!(err, BatchError::Config(_)));
    }

    #[test]
    fn client_requires_api_key() {
        let err = ServiceConfig::default().openai_client().unwrap_err();
        assert!(matches!(err, BatchError::Config(ref msg) if msg.contains(ENV_API_KEY)));

        let client = ServiceConfig::builder()
            .with_api_key("sk-test")
            .with_model("gpt-4o-mini")
            .build()
            .openai_client()
            .unwrap();
        assert_eq!(client.model(), "gpt-4o-mini");
    }

    #[test]
    fn debug_hides_secrets() {
        let config = ServiceConfig::builder()
            .with_api_key("sk-secret")
            .with_redis_url("redis://user:pw@host")
            .build();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(!rendered.contains("pw@host"));
    }

    #[tokio::test]
    async fn memory_store_when_no_redis_url() {
        let store = ServiceConfig::default().status_store().await.unwrap();
        assert!(store.get_status("nothing").await.unwrap().is_none());
    }
}
