use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{QuarryError, Result, ValidationError};
use std::collections::HashSet;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, reporting every violation at once
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_vector_store(config, &mut errors);
        Self::validate_object_store(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_external_sources(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(QuarryError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        Self::require_url("embedding.endpoint", &config.embedding.endpoint, errors);

        if config.embedding.model.trim().is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Vector dimension must be greater than 0",
            ));
        }

        Self::require_timeout("embedding.timeout_ms", config.embedding.timeout_ms, errors);
    }

    fn validate_vector_store(config: &Config, errors: &mut Vec<ValidationError>) {
        let store = &config.vector_store;
        Self::require_url("vector_store.endpoint", &store.endpoint, errors);

        if store.dense_field.trim().is_empty() {
            errors.push(ValidationError::new(
                "vector_store.dense_field",
                "Dense field name cannot be empty",
            ));
        }
        if store.sparse_field.trim().is_empty() {
            errors.push(ValidationError::new(
                "vector_store.sparse_field",
                "Sparse field name cannot be empty",
            ));
        }

        Self::require_timeout("vector_store.timeout_ms", store.timeout_ms, errors);
    }

    fn validate_object_store(config: &Config, errors: &mut Vec<ValidationError>) {
        if let Some(endpoint) = &config.object_store.endpoint {
            Self::require_url("object_store.endpoint", endpoint, errors);
            Self::require_timeout(
                "object_store.timeout_ms",
                config.object_store.timeout_ms,
                errors,
            );
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        let llm = &config.llm;
        if llm.enabled {
            Self::require_url("llm.endpoint", &llm.endpoint, errors);

            if llm.model.trim().is_empty() {
                errors.push(ValidationError::new("llm.model", "Model name cannot be empty"));
            }

            // Local servers need no key; a named variable must be set
            if let Some(env_var) = &llm.api_key_env {
                match std::env::var(env_var) {
                    Ok(key) if key.is_empty() => errors.push(ValidationError::new(
                        "llm.api_key_env",
                        format!("Environment variable {} is empty", env_var),
                    )),
                    Ok(_) => {}
                    Err(_) => errors.push(ValidationError::new(
                        "llm.api_key_env",
                        format!("Environment variable {} is not set", env_var),
                    )),
                }
            }

            Self::require_timeout("llm.timeout_ms", llm.timeout_ms, errors);
        }

        let temp = llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if !retrieval.rrf_k.is_finite() || retrieval.rrf_k < 0.0 {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                format!("RRF k must be a non-negative number, got {}", retrieval.rrf_k),
            ));
        }

        if retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }

        if !(0.0..=100.0).contains(&retrieval.min_relevance_score) {
            errors.push(ValidationError::new(
                "retrieval.min_relevance_score",
                format!(
                    "Relevance threshold must be between 0 and 100, got {}",
                    retrieval.min_relevance_score
                ),
            ));
        }

        if retrieval.max_context_size == 0 {
            errors.push(ValidationError::new(
                "retrieval.max_context_size",
                "Context size must be greater than 0",
            ));
        }

        if retrieval.scope_answers && retrieval.scope_answer_top_n == 0 {
            errors.push(ValidationError::new(
                "retrieval.scope_answer_top_n",
                "Scope answers need at least one result",
            ));
        }

        Self::require_timeout(
            "retrieval.handler_timeout_ms",
            retrieval.handler_timeout_ms,
            errors,
        );
    }

    fn validate_external_sources(config: &Config, errors: &mut Vec<ValidationError>) {
        let mut seen = HashSet::new();
        for (i, source) in config.external_sources.iter().enumerate() {
            let path = format!("external_sources[{}]", i);
            let name = source.name.trim();

            if name.is_empty() || name.chars().any(char::is_whitespace) {
                errors.push(ValidationError::new(
                    format!("{}.name", path),
                    format!("Source name must be non-empty without whitespace, got '{}'", source.name),
                ));
            } else if !seen.insert(name.to_string()) {
                errors.push(ValidationError::new(
                    format!("{}.name", path),
                    format!("Duplicate external source '{}'", name),
                ));
            }

            Self::require_url(&format!("{}.endpoint", path), &source.endpoint, errors);

            if let Some(timeout) = source.timeout_ms {
                Self::require_timeout(&format!("{}.timeout_ms", path), timeout, errors);
            }
        }
    }

    fn require_url(path: &str, value: &str, errors: &mut Vec<ValidationError>) {
        if !(value.starts_with("http://") || value.starts_with("https://")) {
            errors.push(ValidationError::new(
                path,
                format!("Expected an http(s) URL, got '{}'", value),
            ));
        }
    }

    fn require_timeout(path: &str, value: u64, errors: &mut Vec<ValidationError>) {
        if value == 0 {
            errors.push(ValidationError::new(path, "Timeout must be greater than 0"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExternalSourceConfig;

    fn errors_of(config: &Config) -> Vec<ValidationError> {
        match ConfigValidator::validate(config) {
            Err(QuarryError::ConfigValidation { errors }) => errors,
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.embedding.dimension = 0;
        config.retrieval.top_k = 0;
        config.retrieval.min_relevance_score = 150.0;

        let paths: Vec<String> = errors_of(&config).into_iter().map(|e| e.path).collect();
        assert_eq!(
            paths,
            vec![
                "embedding.dimension",
                "retrieval.top_k",
                "retrieval.min_relevance_score"
            ]
        );
    }

    #[test]
    fn test_duplicate_external_source() {
        let mut config = Config::default();
        let source = ExternalSourceConfig {
            name: "wiki".into(),
            endpoint: "https://wiki.example".into(),
            timeout_ms: None,
        };
        config.external_sources = vec![source.clone(), source];

        let errors = errors_of(&config);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "external_sources[1].name");
    }

    #[test]
    fn test_invalid_endpoint() {
        let mut config = Config::default();
        config.vector_store.endpoint = "localhost:19530".into();
        let errors = errors_of(&config);
        assert_eq!(errors[0].path, "vector_store.endpoint");
    }
}
