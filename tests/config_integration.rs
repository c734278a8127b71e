//! Configuration file integration tests

use quarry::config::{Config, ExternalSourceConfig, ProfileOverrides};
use quarry::error::QuarryError;
use quarry::retrieval::SearchMode;
use std::time::Duration;
use tempfile::TempDir;

fn sample_config() -> Config {
    let mut config = Config::default();
    config.external_sources.push(ExternalSourceConfig {
        name: "wiki".to_string(),
        endpoint: "https://wiki.example/api".to_string(),
        timeout_ms: Some(1_500),
    });
    config.profiles.insert(
        "fast".to_string(),
        ProfileOverrides {
            search_mode: Some(SearchMode::Keyword),
            llm_enabled: Some(false),
            top_k: Some(3),
        },
    );
    config
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.toml");

    sample_config().save(&path).unwrap();
    assert!(path.exists());

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.external_sources.len(), 1);
    assert_eq!(loaded.external_sources[0].name, "wiki");
    assert!(loaded.profiles.contains_key("fast"));
    assert_eq!(loaded.retrieval.top_k, Config::default().retrieval.top_k);

    let settings = loaded.orchestrator_settings().unwrap();
    assert_eq!(
        settings.external_timeouts.get("wiki"),
        Some(&Duration::from_millis(1_500))
    );
    println!("✓ Config saved and reloaded from {}", path.display());
}

#[test]
fn missing_file_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");

    match Config::load(&path) {
        Err(QuarryError::ConfigNotFound { path: reported }) => assert_eq!(reported, path),
        other => panic!("expected ConfigNotFound, got {:?}", other),
    }
}

#[test]
fn profile_applied_on_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    sample_config().save(&path).unwrap();

    let config = Config::load_with_profile(&path, "fast").unwrap();
    assert_eq!(config.retrieval.mode, SearchMode::Keyword);
    assert_eq!(config.retrieval.top_k, 3);
    assert!(!config.llm.enabled);

    assert!(matches!(
        Config::load_with_profile(&path, "missing"),
        Err(QuarryError::Config(_))
    ));
}

#[test]
fn invalid_file_fails_validation() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");

    let mut config = sample_config();
    config.retrieval.top_k = 0;
    config.external_sources[0].endpoint = "wiki.example".to_string();
    config.save(&path).unwrap();

    match Config::load(&path) {
        Err(QuarryError::ConfigValidation { errors }) => {
            let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
            assert!(paths.contains(&"retrieval.top_k"));
            assert!(paths.contains(&"external_sources[0].endpoint"));
        }
        other => panic!("expected ConfigValidation, got {:?}", other),
    }
}

#[test]
fn malformed_toml_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "[retrieval\ntop_k = ").unwrap();

    assert!(matches!(Config::load(&path), Err(QuarryError::Toml(_))));
}
