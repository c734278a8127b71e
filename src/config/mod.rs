//! Configuration management for Quarry
//!
//! Loads the TOML configuration, applies profiles and `QUARRY_*`
//! environment overrides, validates it, and turns it into backend clients
//! and orchestrator settings.

use crate::backend::{
    Backends, DenseMetric, EmbeddingProvider, HttpEmbeddingProvider, HttpFederatedSearch,
    HttpMetadataStore, HttpVectorStore, OpenAiCompletionProvider,
};
use crate::error::{QuarryError, Result};
use crate::handler::VectorHandlerSettings;
use crate::orchestrator::{AggregationSettings, OrchestratorSettings};
use crate::retrieval::{HybridFusionEngine, SearchMode};
use crate::scope::ScopeResolver;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

const ENV_PREFIX: &str = "QUARRY_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_sources: Vec<ExternalSourceConfig>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Embedding service (OpenAI-compatible `/embeddings`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub model: String,
    /// Vector dimension; also part of every index name
    pub dimension: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    #[serde(default)]
    pub dense_metric: DenseMetric,
    #[serde(default = "default_dense_field")]
    pub dense_field: String,
    #[serde(default = "default_sparse_field")]
    pub sparse_field: String,
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
}

/// Document metadata gateway; title enrichment is off when no endpoint is set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    #[serde(default = "default_metadata_timeout_ms")]
    pub timeout_ms: u64,
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub temperature: f32,
    /// System prompt for the final synthesized answer
    pub system_prompt: String,
    /// System prompt for per-scope answers
    pub scope_system_prompt: String,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub mode: SearchMode,
    pub rrf_k: f64,
    pub top_k: usize,
    /// Default threshold on the 0-100 scale
    pub min_relevance_score: f64,
    pub max_context_size: usize,
    pub scope_answers: bool,
    pub scope_answer_top_n: usize,
    pub handler_timeout_ms: u64,
}

/// A federated search service reachable at `{endpoint}/search`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSourceConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_mode: Option<SearchMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token_env: None,
            timeout_ms: default_metadata_timeout_ms(),
        }
    }
}

fn default_backend_timeout_ms() -> u64 {
    10_000
}

fn default_metadata_timeout_ms() -> u64 {
    3_000
}

fn default_llm_timeout_ms() -> u64 {
    60_000
}

fn default_dense_field() -> String {
    "embedding".to_string()
}

fn default_sparse_field() -> String {
    "sparse".to_string()
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_profile(profile)?;
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(QuarryError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QuarryError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self.profiles.get(profile).cloned().ok_or_else(|| {
            QuarryError::Config(format!("Unknown profile: {}", profile))
        })?;
        if let Some(mode) = overrides.search_mode {
            self.retrieval.mode = mode;
        }
        if let Some(enabled) = overrides.llm_enabled {
            self.llm.enabled = enabled;
        }
        if let Some(top_k) = overrides.top_k {
            self.retrieval.top_k = top_k;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: QUARRY_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `QUARRY_SECTION__KEY` pairs; other keys are ignored
    pub fn apply_overrides<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let key = key.as_ref();
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                if let Err(e) = self.set_value_from_env(config_key, value.as_ref()) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "LLM__ENABLED" => self.llm.enabled = parse_value(path, value)?,
            "LLM__ENDPOINT" => self.llm.endpoint = value.to_string(),
            "LLM__MODEL" => self.llm.model = value.to_string(),
            "EMBEDDING__ENDPOINT" => self.embedding.endpoint = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "VECTOR_STORE__ENDPOINT" => self.vector_store.endpoint = value.to_string(),
            "OBJECT_STORE__ENDPOINT" => self.object_store.endpoint = Some(value.to_string()),
            "RETRIEVAL__MODE" => {
                self.retrieval.mode =
                    value.parse().map_err(|message| QuarryError::InvalidConfigValue {
                        path: path.to_string(),
                        message,
                    })?;
            }
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse_value(path, value)?,
            "RETRIEVAL__MIN_RELEVANCE_SCORE" => {
                self.retrieval.min_relevance_score = parse_value(path, value)?
            }
            "RETRIEVAL__HANDLER_TIMEOUT_MS" => {
                self.retrieval.handler_timeout_ms = parse_value(path, value)?
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| QuarryError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("quarry").join("config.toml"))
    }

    pub fn resolver(&self) -> ScopeResolver {
        ScopeResolver::new(self.embedding.dimension)
    }

    /// HTTP clients for every configured backend
    pub fn backends(&self) -> Result<Backends> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            HttpEmbeddingProvider::new(
                &self.embedding.endpoint,
                &self.embedding.model,
                self.embedding.dimension,
                read_secret(self.embedding.api_key_env.as_deref()),
                Duration::from_millis(self.embedding.timeout_ms),
            )
            .map_err(backend_error)?,
        );

        let store = HttpVectorStore::new(
            &self.vector_store.endpoint,
            read_secret(self.vector_store.token_env.as_deref()),
            &self.vector_store.dense_field,
            &self.vector_store.sparse_field,
            self.vector_store.dense_metric,
            Duration::from_millis(self.vector_store.timeout_ms),
        )
        .map_err(backend_error)?;

        let mut backends = Backends::new(embedder, Arc::new(store));

        if let Some(endpoint) = &self.object_store.endpoint {
            let metadata = HttpMetadataStore::new(
                endpoint,
                read_secret(self.object_store.token_env.as_deref()),
                Duration::from_millis(self.object_store.timeout_ms),
            )
            .map_err(backend_error)?;
            backends = backends.with_metadata(Arc::new(metadata));
        }

        if self.llm.enabled {
            let completion = OpenAiCompletionProvider::new(
                &self.llm.endpoint,
                &self.llm.model,
                read_secret(self.llm.api_key_env.as_deref()),
                self.llm.temperature,
                Duration::from_millis(self.llm.timeout_ms),
            )
            .map_err(backend_error)?;
            backends = backends.with_completion(Arc::new(completion));
        }

        for source in &self.external_sources {
            let timeout = Duration::from_millis(
                source
                    .timeout_ms
                    .unwrap_or(self.retrieval.handler_timeout_ms),
            );
            let client = HttpFederatedSearch::new(&source.endpoint, timeout).map_err(backend_error)?;
            backends = backends.with_federated(&source.name, Arc::new(client));
        }

        Ok(backends)
    }

    pub fn orchestrator_settings(&self) -> Result<OrchestratorSettings> {
        let retrieval = &self.retrieval;
        let fusion = HybridFusionEngine::new(retrieval.rrf_k).map_err(|e| {
            QuarryError::InvalidConfigValue {
                path: "retrieval.rrf_k".to_string(),
                message: e.to_string(),
            }
        })?;

        let external_timeouts = self
            .external_sources
            .iter()
            .filter_map(|s| Some((s.name.clone(), Duration::from_millis(s.timeout_ms?))))
            .collect();

        Ok(OrchestratorSettings {
            handler_timeout: Duration::from_millis(retrieval.handler_timeout_ms),
            external_timeouts,
            vector: VectorHandlerSettings {
                mode: retrieval.mode,
                fusion,
                scope_answers: retrieval.scope_answers && self.llm.enabled,
                answer_top_n: retrieval.scope_answer_top_n,
                system_prompt: self.llm.scope_system_prompt.clone(),
            },
            aggregation: AggregationSettings {
                max_context_size: retrieval.max_context_size,
                system_prompt: self.llm.system_prompt.clone(),
                ..AggregationSettings::default()
            },
        })
    }
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| QuarryError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Cannot parse '{}'", value),
        })
}

fn backend_error(err: crate::backend::BackendError) -> QuarryError {
    QuarryError::Backend(err.to_string())
}

/// Value of the named environment variable, if set and non-empty
fn read_secret(env_var: Option<&str>) -> Option<String> {
    let value = std::env::var(env_var?).ok()?;
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            embedding: EmbeddingConfig {
                endpoint: "http://localhost:11434/v1".to_string(),
                model: "all-minilm".to_string(),
                dimension: 384,
                api_key_env: None,
                timeout_ms: default_backend_timeout_ms(),
            },
            vector_store: VectorStoreConfig {
                endpoint: "http://localhost:19530".to_string(),
                token_env: Some("QUARRY_VECTOR_TOKEN".to_string()),
                dense_metric: DenseMetric::CosineSimilarity,
                dense_field: default_dense_field(),
                sparse_field: default_sparse_field(),
                timeout_ms: default_backend_timeout_ms(),
            },
            object_store: ObjectStoreConfig::default(),
            llm: LlmConfig {
                enabled: false,
                endpoint: "https://api.groq.com/openai/v1".to_string(),
                model: "llama-3.1-70b-versatile".to_string(),
                api_key_env: Some("GROQ_API_KEY".to_string()),
                temperature: 0.1,
                system_prompt: AggregationSettings::default().system_prompt,
                scope_system_prompt: VectorHandlerSettings::default().system_prompt,
                timeout_ms: default_llm_timeout_ms(),
            },
            retrieval: RetrievalConfig {
                mode: SearchMode::Hybrid,
                rrf_k: crate::retrieval::DEFAULT_RRF_K,
                top_k: 10,
                min_relevance_score: 0.0,
                max_context_size: 8,
                scope_answers: false,
                scope_answer_top_n: 5,
                handler_timeout_ms: 30_000,
            },
            external_sources: Vec::new(),
            profiles: HashMap::new(),
        }
    }
}
