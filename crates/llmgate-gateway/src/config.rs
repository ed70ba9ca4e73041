//! Configuration loading for the gateway binary.
//!
//! Loads [`GatewayConfig`] from a YAML file, then applies environment
//! variable overrides. CLI flags (handled in `main`) take the highest
//! precedence.

use llmgate_core::GatewayConfig;
use std::path::Path;

/// Load a [`GatewayConfig`] from a YAML file at `path`.
pub fn load_config(path: &Path) -> anyhow::Result<GatewayConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: GatewayConfig = serde_yaml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {}", e))?;
    Ok(config)
}

/// Apply `LLMGATE_*` environment variable overrides.
pub fn apply_env_overrides(config: &mut GatewayConfig) {
    if let Ok(value) = std::env::var("LLMGATE_LISTEN_ADDR") {
        config.listen_addr = value;
    }
    if let Ok(value) = std::env::var("LLMGATE_TOKEN_SECRET") {
        config.auth.token_secret = value;
    }
    if let Ok(value) = std::env::var("LLMGATE_SIGNATURE_SECRET") {
        config.auth.signature_secret = Some(value);
    }
    if let Ok(value) = std::env::var("LLMGATE_STORAGE_PROFILE") {
        config.storage.profile = value;
    }
    if let Ok(value) = std::env::var("LLMGATE_DATABASE_PATH") {
        config.storage.database_path = value;
    }
    if let Ok(value) = std::env::var("LLMGATE_AUDIT_LOG") {
        config.audit.log_file = Some(value);
    }
    if let Ok(value) = std::env::var("LLMGATE_LOG_LEVEL") {
        config.logging.level = value;
    }
    if let Ok(value) = std::env::var("LLMGATE_LOG_FORMAT") {
        config.logging.format = value;
    }
}

/// Validate the resolved configuration before startup.
pub fn validate_config(config: &GatewayConfig) -> anyhow::Result<()> {
    if config.auth.token_secret.is_empty() {
        anyhow::bail!(
            "auth.token_secret must be set (config file or LLMGATE_TOKEN_SECRET)"
        );
    }
    if config.limits.max_request_size_bytes == 0 {
        anyhow::bail!("limits.max_request_size_bytes must be greater than zero");
    }
    if config.pipeline.queue_capacity == 0 {
        anyhow::bail!("pipeline.queue_capacity must be greater than zero");
    }
    if config.payload_schemas.is_empty() {
        anyhow::bail!("payload_schemas must register at least one schema");
    }

    let weights = config.routing.cost_weight
        + config.routing.latency_weight
        + config.routing.quality_weight;
    if weights <= 0.0 {
        anyhow::bail!("routing weights must sum to a positive value");
    }

    match config.logging.format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("logging.format must be 'text' or 'json', got '{other}'"),
    }

    for backend in &config.backends {
        if backend.id.is_empty() {
            anyhow::bail!("backend with empty id in configuration");
        }
        if backend.cost_per_1k_tokens < 0.0 {
            anyhow::bail!("backend '{}' has negative cost", backend.id);
        }
        if backend.max_tokens == 0 {
            anyhow::bail!("backend '{}' has zero max_tokens", backend.id);
        }
        if !(0.0..=1.0).contains(&backend.confidence_threshold) {
            anyhow::bail!(
                "backend '{}' confidence_threshold outside [0, 1]",
                backend.id
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_yaml(yaml: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        f
    }

    fn valid_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.auth.token_secret = "secret".to_string();
        config
    }

    #[test]
    fn test_load_config_minimal() {
        let yaml = r#"
listen_addr: "127.0.0.1:9090"
auth:
  token_secret: "dev-secret"
storage:
  profile: "memory"
"#;
        let f = write_yaml(yaml);
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9090");
        assert_eq!(config.auth.token_secret, "dev-secret");
        assert_eq!(config.storage.profile, "memory");
        // Defaults for everything unspecified.
        assert_eq!(config.pipeline.queue_capacity, 4096);
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config(Path::new("/nonexistent/config.yaml")).is_err());
    }

    #[test]
    fn test_load_config_invalid_yaml() {
        let f = write_yaml("listen_addr: [not: {valid");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_validate_requires_secret() {
        let config = GatewayConfig::default();
        assert!(validate_config(&config).is_err());
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_log_format() {
        let mut config = valid_config();
        config.logging.format = "xml".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_backend() {
        let mut config = valid_config();
        config.backends = crate::registry::default_descriptors();
        config.backends[0].confidence_threshold = 1.5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_queue() {
        let mut config = valid_config();
        config.pipeline.queue_capacity = 0;
        assert!(validate_config(&config).is_err());
    }
}
