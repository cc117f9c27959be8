//! Configuration management

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Response cache configuration
    pub cache: CacheConfig,
    /// Query classifier configuration
    pub classifier: ClassifierConfig,
    /// Provider configurations by id
    pub providers: HashMap<String, ProviderConfig>,
    /// Refund-status lookup configuration
    pub refund: RefundLookupConfig,
    /// Response policy (fixed lists, confidence table, fallback)
    pub responses: ResponsesConfig,
    /// Streaming configuration
    pub streaming: StreamingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: Vec::new(),
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            classifier: ClassifierConfig::default(),
            providers: default_providers(),
            refund: RefundLookupConfig::default(),
            responses: ResponsesConfig::default(),
            streaming: StreamingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Environment variables override file values (TAX_AGENT_ prefix)
        figment = figment.merge(Env::prefixed("TAX_AGENT_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files feed provider key resolution, so load them first
        config.load_env_files();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Check invariants the rest of the gateway relies on
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(Error::Config(
                "cache.max_entries must be greater than 0".to_string(),
            ));
        }
        if self.classifier.status_subject.trim().is_empty() {
            return Err(Error::Config(
                "classifier.status_subject must not be empty".to_string(),
            ));
        }
        if self.refund.url.is_empty() {
            return Err(Error::Config("refund.url must not be empty".to_string()));
        }
        for (id, provider) in &self.providers {
            if provider.enabled && provider.base_url.is_empty() {
                return Err(Error::Config(format!(
                    "providers.{id}.base_url must not be empty"
                )));
            }
        }
        Ok(())
    }

    /// Enabled providers only
    pub fn enabled_providers(&self) -> impl Iterator<Item = (&String, &ProviderConfig)> {
        self.providers.iter().filter(|(_, p)| p.enabled)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Cache configuration for response caching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching
    pub enabled: bool,
    /// Default TTL for cached responses
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Shorter TTL for status answers, which go stale quickly
    #[serde(with = "humantime_serde")]
    pub status_ttl: Duration,
    /// Maximum number of entries before eviction
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(300),
            status_ttl: Duration::from_secs(120),
            max_entries: 1000,
        }
    }
}

/// Query classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Subject keyword that marks a status inquiry
    pub status_subject: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            status_subject: "refund".to_string(),
        }
    }
}

/// Kind of generative backend behind a provider id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local Ollama daemon (`/api/generate`)
    Ollama,
    /// OpenAI-compatible chat completions API
    OpenAi,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Whether this provider is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Backend kind
    pub kind: ProviderKind,
    /// Base URL of the backend
    pub base_url: String,
    /// Model to generate with
    pub model: String,
    /// API key (supports literal value or `env:VAR_NAME`)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout for this provider
    #[serde(default = "default_provider_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_true() -> bool {
    true
}

fn default_provider_timeout() -> Duration {
    Duration::from_secs(60)
}

impl ProviderConfig {
    /// Resolve the API key, expanding `env:VAR_NAME` indirection
    ///
    /// Returns `None` when no key is configured or the referenced variable
    /// is unset.
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        let key = self.api_key.as_ref()?;
        if let Some(var_name) = key.strip_prefix("env:") {
            env::var(var_name).ok().filter(|v| !v.is_empty())
        } else if key.is_empty() {
            None
        } else {
            Some(key.clone())
        }
    }
}

fn default_providers() -> HashMap<String, ProviderConfig> {
    let mut providers = HashMap::new();
    providers.insert(
        "ollama".to_string(),
        ProviderConfig {
            enabled: true,
            kind: ProviderKind::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "llama2".to_string(),
            api_key: None,
            timeout: default_provider_timeout(),
        },
    );
    providers.insert(
        "openai".to_string(),
        ProviderConfig {
            enabled: true,
            kind: ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key: Some("env:OPENAI_API_KEY".to_string()),
            timeout: default_provider_timeout(),
        },
    );
    providers
}

/// Refund-status lookup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefundLookupConfig {
    /// Refund-status service URL
    pub url: String,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RefundLookupConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:7000/api/v1/refund-status".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Response policy: fixed lists, per-provider confidence, fallback wording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponsesConfig {
    /// Suggested actions attached to every response
    pub suggestions: Vec<String>,
    /// Recommended next steps attached to every response
    pub next_steps: Vec<String>,
    /// Confidence score per provider id
    pub confidence: HashMap<String, f64>,
    /// Confidence for providers missing from the table
    pub default_confidence: f64,
    /// Confidence attached to fallback responses
    pub degraded_confidence: f64,
    /// User-safe message served when a backend fails
    pub fallback_message: String,
}

impl Default for ResponsesConfig {
    fn default() -> Self {
        Self {
            suggestions: vec![
                "Consider consulting a tax professional for complex situations".to_string(),
                "Keep all tax-related documents organized".to_string(),
                "Review your tax return before filing".to_string(),
            ],
            next_steps: vec![
                "Gather all necessary tax documents".to_string(),
                "Review your tax situation with a professional".to_string(),
                "File your taxes by the deadline".to_string(),
            ],
            confidence: HashMap::from([
                ("ollama".to_string(), 0.85),
                ("openai".to_string(), 0.90),
            ]),
            default_confidence: 0.85,
            degraded_confidence: 0.30,
            fallback_message: "I'm sorry, I'm currently unable to process your tax \
                query. Please try again later or consult a tax professional."
                .to_string(),
        }
    }
}

/// Streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Frame buffer between the relay producer and the transport
    pub buffer_size: usize,
    /// Keep-alive interval for SSE streams
    #[serde(with = "humantime_serde")]
    pub keep_alive_interval: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            buffer_size: 32,
            keep_alive_interval: Duration::from_secs(15),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: ProviderKind::Ollama,
            base_url: String::new(),
            model: String::new(),
            api_key: None,
            timeout: default_provider_timeout(),
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() > 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    /// Deserialize a human-readable duration string ("100ms", "30s", "5m")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else {
            // Bare numbers are seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
