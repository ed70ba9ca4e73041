//! Gateway configuration types.
//!
//! Every tunable named in the system design lives here with its default so a
//! configuration file only needs to state deviations. Loading and env-var
//! overrides live in the gateway crate.

use crate::{AnomalySeverity, BackendDescriptor};
use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address and port the ingress binds to.
    pub listen_addr: String,
    pub logging: LoggingConfig,
    pub limits: LimitsConfig,
    pub auth: AuthConfig,
    pub pii: PiiConfig,
    pub injection: InjectionConfig,
    pub routing: RoutingConfig,
    pub idempotency: IdempotencyConfig,
    pub pipeline: PipelineConfig,
    pub anomaly: AnomalyConfig,
    pub alerts: AlertsConfig,
    pub audit: AuditConfig,
    pub storage: StorageConfig,
    /// Registered payload schema identifiers.
    pub payload_schemas: Vec<String>,
    /// Backend catalog. Empty means the built-in default catalog.
    pub backends: Vec<BackendDescriptor>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            logging: LoggingConfig::default(),
            limits: LimitsConfig::default(),
            auth: AuthConfig::default(),
            pii: PiiConfig::default(),
            injection: InjectionConfig::default(),
            routing: RoutingConfig::default(),
            idempotency: IdempotencyConfig::default(),
            pipeline: PipelineConfig::default(),
            anomaly: AnomalyConfig::default(),
            alerts: AlertsConfig::default(),
            audit: AuditConfig::default(),
            storage: StorageConfig::default(),
            payload_schemas: vec!["llm.request.v1".to_string()],
            backends: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,
    /// Output format: text or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Request admission limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum serialized request size in bytes.
    pub max_request_size_bytes: u64,
    /// Maximum tolerated clock skew between request timestamp and wall
    /// clock, in seconds, in either direction.
    pub clock_skew_secs: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_size_bytes: 5 * 1024 * 1024,
            clock_skew_secs: 300,
        }
    }
}

/// Authentication and authorization configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret for token signature verification. Never logged.
    #[serde(skip_serializing)]
    pub token_secret: String,
    /// Shared secret for optional HMAC payload signatures. Falls back to
    /// `token_secret` when unset. Never logged.
    #[serde(skip_serializing)]
    pub signature_secret: Option<String>,
    /// TTL applied to tokens issued by this process, in minutes.
    pub token_ttl_minutes: u64,
    /// Per-role per-request cost ceilings in USD.
    pub cost_ceilings: CostCeilings,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            signature_secret: None,
            token_ttl_minutes: 15,
            cost_ceilings: CostCeilings::default(),
        }
    }
}

// Secrets are redacted from debug output.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_secret", &"<redacted>")
            .field("signature_secret", &"<redacted>")
            .field("token_ttl_minutes", &self.token_ttl_minutes)
            .field("cost_ceilings", &self.cost_ceilings)
            .finish()
    }
}

/// Per-role cost ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostCeilings {
    pub admin: f64,
    pub service: f64,
    pub read_only: f64,
}

impl Default for CostCeilings {
    fn default() -> Self {
        Self {
            admin: 10.0,
            service: 1.0,
            read_only: 0.10,
        }
    }
}

/// One named PII pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiPatternConfig {
    /// Type name; must be one of the recognized PII type names.
    pub pii_type: String,
    /// Regex applied to the prompt text.
    pub pattern: String,
}

/// Strategy applied when redacting PII matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionStrategy {
    /// Replace with `[REDACTED:TYPE]`.
    Redact,
    /// Replace with `****`.
    Mask,
    /// Replace with `[TYPE:<hash-prefix>]`.
    Hash,
    /// Replace with a stable opaque token; reversible within this process.
    Tokenize,
}

impl Default for RedactionStrategy {
    fn default() -> Self {
        RedactionStrategy::Redact
    }
}

/// PII engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PiiConfig {
    pub enabled: bool,
    /// Pattern overrides. Empty means the built-in pattern set.
    pub patterns: Vec<PiiPatternConfig>,
    pub redaction: RedactionStrategy,
    /// Forward the redacted prompt to the backend instead of the original.
    pub redact_outbound: bool,
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: Vec::new(),
            redaction: RedactionStrategy::Redact,
            redact_outbound: false,
        }
    }
}

/// Injection detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    pub enabled: bool,
    /// Pattern overrides. Empty means the built-in pattern set.
    pub patterns: Vec<String>,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: Vec::new(),
        }
    }
}

/// Router scoring weights and cascade settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub cost_weight: f64,
    pub latency_weight: f64,
    pub quality_weight: f64,
    pub use_cascade: bool,
    /// Maximum fallback backends after the primary.
    pub max_fallbacks: usize,
    /// Cascade halts when the remaining deadline drops below this slice.
    pub min_deadline_slice_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            cost_weight: 0.5,
            latency_weight: 0.3,
            quality_weight: 0.2,
            use_cascade: true,
            max_fallbacks: 2,
            min_deadline_slice_ms: 200,
        }
    }
}

/// Idempotency cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 900,
        }
    }
}

/// Behavior when the event queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued event to admit the new one.
    DropOldest,
    /// Wait for space up to a short deadline, then drop the new event.
    Backpressure,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropOldest
    }
}

/// Event pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Deadline for the backpressure enqueue path, in milliseconds.
    pub backpressure_deadline_ms: u64,
    /// Bounded drain deadline during shutdown, in seconds.
    pub shutdown_drain_secs: u64,
    /// Interval between pattern-level anomaly passes, in seconds.
    pub pattern_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            overflow: OverflowPolicy::DropOldest,
            backpressure_deadline_ms: 100,
            shutdown_drain_secs: 5,
            pattern_interval_secs: 60,
        }
    }
}

/// Anomaly detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub cost_threshold_usd: f64,
    pub latency_threshold_ms: u64,
    pub token_threshold: u32,
    /// A value above `spike_multiplier × mean(history)` is a spike.
    pub spike_multiplier: f64,
    /// History window for spike baselines, in minutes, per model.
    pub spike_window_minutes: i64,
    /// Minimum samples before spike detection activates.
    pub spike_min_samples: usize,
    /// Window for error-rate and request-rate patterns, in minutes.
    pub pattern_window_minutes: i64,
    /// Minimum events before the global error-rate pattern fires.
    pub pattern_min_events: usize,
    pub error_rate_threshold: f64,
    pub request_rate_per_minute: f64,
    pub cost_rate_per_hour: f64,
    /// Per-model error-rate threshold.
    pub model_error_rate_threshold: f64,
    /// Minimum per-model samples before the model-errors pattern fires.
    pub model_min_samples: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            cost_threshold_usd: 0.50,
            latency_threshold_ms: 5000,
            token_threshold: 8000,
            spike_multiplier: 3.0,
            spike_window_minutes: 10,
            spike_min_samples: 5,
            pattern_window_minutes: 5,
            pattern_min_events: 10,
            error_rate_threshold: 0.10,
            request_rate_per_minute: 50.0,
            cost_rate_per_hour: 10.0,
            model_error_rate_threshold: 0.2,
            model_min_samples: 5,
        }
    }
}

/// Alert emitter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub enabled: bool,
    /// Minimum anomaly severity that triggers an alert.
    pub min_severity: AnomalySeverity,
    /// Optional webhook sink in addition to stderr.
    pub webhook_url: Option<String>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_severity: AnomalySeverity::High,
            webhook_url: None,
        }
    }
}

/// Audit sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// NDJSON audit log path. `None` writes to stderr.
    pub log_file: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_file: Some("llmgate_audit.log".to_string()),
        }
    }
}

/// Event storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage profile: `sqlite` or `memory`.
    pub profile: String,
    /// SQLite database path (ignored for the memory profile).
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            profile: "sqlite".to_string(),
            database_path: "llmgate.db".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.limits.max_request_size_bytes, 5 * 1024 * 1024);
        assert_eq!(config.limits.clock_skew_secs, 300);
        assert_eq!(config.pipeline.queue_capacity, 4096);
        assert_eq!(config.pipeline.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.idempotency.ttl_secs, 900);
        assert_eq!(config.routing.max_fallbacks, 2);
        assert_eq!(config.routing.min_deadline_slice_ms, 200);
        assert_eq!(config.routing.cost_weight, 0.5);
        assert_eq!(config.routing.latency_weight, 0.3);
        assert_eq!(config.routing.quality_weight, 0.2);
        assert_eq!(config.anomaly.cost_threshold_usd, 0.50);
        assert_eq!(config.anomaly.latency_threshold_ms, 5000);
        assert_eq!(config.anomaly.token_threshold, 8000);
        assert_eq!(config.anomaly.spike_multiplier, 3.0);
        assert_eq!(config.anomaly.spike_window_minutes, 10);
        assert_eq!(config.alerts.min_severity, AnomalySeverity::High);
        assert_eq!(config.payload_schemas, vec!["llm.request.v1".to_string()]);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
listen_addr: "127.0.0.1:9090"
anomaly:
  cost_threshold_usd: 0.25
"#;
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9090");
        assert_eq!(config.anomaly.cost_threshold_usd, 0.25);
        // Untouched sections keep their defaults.
        assert_eq!(config.anomaly.latency_threshold_ms, 5000);
        assert_eq!(config.pipeline.queue_capacity, 4096);
    }

    #[test]
    fn test_secret_not_serialized() {
        let mut config = GatewayConfig::default();
        config.auth.token_secret = "super-secret".to_string();
        let rendered = serde_yaml::to_string(&config).unwrap();
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn test_secret_redacted_in_debug() {
        let mut config = AuthConfig::default();
        config.token_secret = "super-secret".to_string();
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
