//! Core types, traits, and errors for LLMGate
//!
//! This crate contains the foundational types shared across all LLMGate
//! components: the request/response contract, backend descriptors, the
//! event and anomaly model consumed by the monitoring pipeline, audit
//! records, and the storage/adapter traits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

pub mod config;

pub use config::GatewayConfig;

/// Protocol version spoken on the wire.
pub const PROTOCOL_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Classification enums
// ---------------------------------------------------------------------------

/// Declared classification of request data. Determines which backends may
/// process it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Public,
    Internal,
    Sensitive,
    Pii,
    /// Stricter than `pii`: requires a backend explicitly opted in via
    /// `confidential_allowed`.
    Confidential,
}

impl std::fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Sensitivity::Public => "public",
            Sensitivity::Internal => "internal",
            Sensitivity::Sensitive => "sensitive",
            Sensitivity::Pii => "pii",
            Sensitivity::Confidential => "confidential",
        };
        write!(f, "{s}")
    }
}

/// Preferred processing backend hint from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingHint {
    Auto,
    RuleEngine,
    ModelSmall,
    ModelLarge,
    ModelPrivate,
    Hybrid,
}

impl Default for ProcessingHint {
    fn default() -> Self {
        ProcessingHint::Auto
    }
}

impl std::fmt::Display for ProcessingHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessingHint::Auto => "auto",
            ProcessingHint::RuleEngine => "rule_engine",
            ProcessingHint::ModelSmall => "model_small",
            ProcessingHint::ModelLarge => "model_large",
            ProcessingHint::ModelPrivate => "model_private",
            ProcessingHint::Hybrid => "hybrid",
        };
        write!(f, "{s}")
    }
}

/// How the response should be returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnRoute {
    Sync,
    Async,
}

impl Default for ReturnRoute {
    fn default() -> Self {
        ReturnRoute::Sync
    }
}

/// Type of request carried by the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    ProcessRequest,
}

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
    Queued,
    Processing,
}

/// Stable machine-readable error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SchemaInvalid,
    ClockSkew,
    AuthInvalid,
    AuthExpired,
    AuthzDenied,
    PiiRoutingBlocked,
    NoBackendAvailable,
    BackendTimeout,
    BackendError,
    RateLimited,
    InternalError,
}

impl ErrorCode {
    /// Whether a caller may safely retry with the same idempotency key.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ErrorCode::BackendTimeout | ErrorCode::RateLimited | ErrorCode::InternalError
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::SchemaInvalid => "SCHEMA_INVALID",
            ErrorCode::ClockSkew => "CLOCK_SKEW",
            ErrorCode::AuthInvalid => "AUTH_INVALID",
            ErrorCode::AuthExpired => "AUTH_EXPIRED",
            ErrorCode::AuthzDenied => "AUTHZ_DENIED",
            ErrorCode::PiiRoutingBlocked => "PII_ROUTING_BLOCKED",
            ErrorCode::NoBackendAvailable => "NO_BACKEND_AVAILABLE",
            ErrorCode::BackendTimeout => "BACKEND_TIMEOUT",
            ErrorCode::BackendError => "BACKEND_ERROR",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Request / response contract
// ---------------------------------------------------------------------------

/// Information about the source application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Unique identifier for the calling application.
    pub application_id: String,
    /// Deployment environment: dev, staging, prod.
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Application version.
    #[serde(default)]
    pub version: Option<String>,
}

fn default_environment() -> String {
    "prod".to_string()
}

/// Authentication material carried by a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthInfo {
    /// Bearer token (signed claims).
    pub token: String,
    /// Optional HMAC signature over the raw payload bytes.
    #[serde(default)]
    pub signature: Option<String>,
}

/// Per-request processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_sensitivity")]
    pub sensitivity: Sensitivity,
    #[serde(default)]
    pub processing_hint: ProcessingHint,
    #[serde(default)]
    pub return_route: ReturnRoute,
    /// Request timeout in milliseconds. Must be greater than zero.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub enable_pii_detection: bool,
    #[serde(default = "default_true")]
    pub enable_injection_detection: bool,
}

fn default_sensitivity() -> Sensitivity {
    Sensitivity::Internal
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity(),
            processing_hint: ProcessingHint::Auto,
            return_route: ReturnRoute::Sync,
            timeout_ms: default_timeout_ms(),
            enable_pii_detection: true,
            enable_injection_detection: true,
        }
    }
}

/// The gateway ingress envelope.
///
/// The payload is kept opaque (`RawValue`) and decoded lazily against the
/// schema named by `payload_schema`. This preserves forward compatibility
/// without dynamic typing leaking into the core.
#[derive(Debug, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub mpc_version: String,
    pub request_id: Uuid,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source: SourceInfo,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    /// Registered payload schema identifier, e.g. `llm.request.v1`.
    pub payload_schema: String,
    pub payload: Box<RawValue>,
    #[serde(default)]
    pub config: ProcessingConfig,
    pub auth: AuthInfo,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// The `llm.request.v1` payload schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequestPayload {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Processing metadata echoed in every response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingInfo {
    /// Backend that processed (or would have processed) the request.
    pub backend: String,
    pub latency_ms: u64,
    pub cost_usd: f64,
    pub confidence: f64,
    pub fallback_used: bool,
}

/// Error detail carried by failed responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Security detection flags echoed in every response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SecurityFlags {
    pub has_pii: bool,
    pub injection_detected: bool,
}

/// The gateway egress envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub mpc_version: String,
    pub request_id: Uuid,
    pub response_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing: Option<ProcessingInfo>,
    #[serde(default)]
    pub security_flags: SecurityFlags,
}

impl GatewayResponse {
    /// Build a successful response for `request_id`.
    pub fn ok(
        request_id: Uuid,
        result: serde_json::Value,
        processing: ProcessingInfo,
        security_flags: SecurityFlags,
    ) -> Self {
        Self {
            mpc_version: PROTOCOL_VERSION.to_string(),
            request_id,
            response_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            status: ResponseStatus::Ok,
            result: Some(result),
            error: None,
            processing: Some(processing),
            security_flags,
        }
    }

    /// Build an error response for `request_id`.
    pub fn error(request_id: Uuid, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            mpc_version: PROTOCOL_VERSION.to_string(),
            request_id,
            response_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            status: ResponseStatus::Error,
            result: None,
            error: Some(ErrorInfo {
                code,
                message: message.into(),
                retry_after_ms: None,
            }),
            processing: None,
            security_flags: SecurityFlags::default(),
        }
    }

    /// Attach security flags to an error response.
    pub fn with_security_flags(mut self, flags: SecurityFlags) -> Self {
        self.security_flags = flags;
        self
    }
}

// ---------------------------------------------------------------------------
// Principals and permissions
// ---------------------------------------------------------------------------

/// Role carried by an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Service,
    ReadOnly,
}

impl Role {
    /// Default permission grant for the role. Token-carried permissions are
    /// merged on top of this closure.
    pub fn default_permissions(&self) -> HashSet<Permission> {
        match self {
            Role::Admin => [
                Permission::Read,
                Permission::Write,
                Permission::Execute,
                Permission::Admin,
                Permission::PiiAccess,
                Permission::SensitiveAccess,
            ]
            .into_iter()
            .collect(),
            Role::Service => [Permission::Read, Permission::Execute].into_iter().collect(),
            Role::ReadOnly => [Permission::Read].into_iter().collect(),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Admin => "admin",
            Role::Service => "service",
            Role::ReadOnly => "read_only",
        };
        write!(f, "{s}")
    }
}

/// Fine-grained permission types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Execute,
    Admin,
    PiiAccess,
    SensitiveAccess,
}

/// An authenticated principal derived from a verified token.
///
/// Never persisted; lives only for the duration of one request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub subject: String,
    pub role: Role,
    pub permissions: HashSet<Permission>,
    pub expires_at: DateTime<Utc>,
}

impl Principal {
    /// Check whether the principal holds a permission. The `admin`
    /// permission implies everything.
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission) || self.permissions.contains(&Permission::Admin)
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Task category a backend claims to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextGeneration,
    Classification,
    Extraction,
    Summarization,
    CodeGeneration,
    SecurityScan,
    Analysis,
    Translation,
}

/// Backend classification used for hint routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    LlmLarge,
    LlmSmall,
    LlmPrivate,
    RuleEngine,
    Hybrid,
}

/// Immutable descriptor of a registered backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub id: String,
    pub kind: BackendKind,
    pub capabilities: BTreeSet<Capability>,
    pub cost_per_1k_tokens: f64,
    pub avg_latency_ms: f64,
    pub max_tokens: u32,
    /// Minimum confidence this backend is expected to deliver, in `[0, 1]`.
    #[serde(default)]
    pub confidence_threshold: f64,
    #[serde(default)]
    pub pii_allowed: bool,
    /// Opt-in for `confidential` traffic. Defaults to false everywhere.
    #[serde(default)]
    pub confidential_allowed: bool,
    pub sensitivity_allowed: BTreeSet<Sensitivity>,
}

impl BackendDescriptor {
    /// Whether this backend may process data at the given sensitivity.
    ///
    /// `confidential` requires both `pii_allowed` and the explicit
    /// `confidential_allowed` opt-in on top of the sensitivity set.
    pub fn allows_sensitivity(&self, sensitivity: Sensitivity) -> bool {
        match sensitivity {
            Sensitivity::Confidential => {
                self.pii_allowed
                    && self.confidential_allowed
                    && self.sensitivity_allowed.contains(&Sensitivity::Confidential)
            }
            other => self.sensitivity_allowed.contains(&other),
        }
    }

    /// Provider portion of the backend id (`openai:gpt-4` → `openai`).
    pub fn provider(&self) -> &str {
        self.id.split(':').next().unwrap_or(&self.id)
    }

    /// Model portion of the backend id (`openai:gpt-4` → `gpt-4`).
    pub fn model(&self) -> &str {
        self.id.split(':').nth(1).unwrap_or(&self.id)
    }
}

/// Parameters forwarded to a backend invocation.
#[derive(Debug, Clone, Default)]
pub struct ProcessParams {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// Successful outcome of a backend invocation.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub response: String,
    pub tokens: TokenUsage,
    pub cost_usd: f64,
    pub confidence: f64,
    pub latency_ms: u64,
}

/// Failure of a backend invocation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendFailure {
    #[error("backend timed out")]
    Timeout,
    #[error("backend rate limited")]
    RateLimited,
    #[error("upstream error (status {status}): {message}")]
    UpstreamError { status: u16, message: String },
    #[error("invalid backend response: {message}")]
    InvalidResponse { message: String },
}

impl BackendFailure {
    /// A retriable failure triggers cascade to the next candidate.
    pub fn is_retriable(&self) -> bool {
        match self {
            BackendFailure::Timeout | BackendFailure::RateLimited => true,
            BackendFailure::UpstreamError { status, .. } => *status >= 500,
            BackendFailure::InvalidResponse { .. } => false,
        }
    }

    /// Map the failure to the stable error code surfaced to callers.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            BackendFailure::Timeout => ErrorCode::BackendTimeout,
            BackendFailure::RateLimited => ErrorCode::RateLimited,
            BackendFailure::UpstreamError { .. } | BackendFailure::InvalidResponse { .. } => {
                ErrorCode::BackendError
            }
        }
    }
}

/// Health of a backend adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Ok,
    Degraded,
    Unhealthy,
}

/// Uniform contract implemented by every processing backend adapter
/// (cloud LLM, local LLM, rule engine, hybrid chain).
#[async_trait::async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Static descriptor for routing decisions.
    fn descriptor(&self) -> &BackendDescriptor;

    /// Process a prompt within the given deadline.
    async fn process(
        &self,
        prompt: &str,
        params: &ProcessParams,
        deadline: Duration,
    ) -> std::result::Result<ProcessOutcome, BackendFailure>;

    /// Current health of the adapter.
    async fn health(&self) -> HealthState;
}

// ---------------------------------------------------------------------------
// Events, anomalies, audit
// ---------------------------------------------------------------------------

/// Token usage for a single interaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Coarse per-event risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// One monitoring event per request attempt chain.
///
/// Carries fingerprints, never raw prompt or response text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event_id: Uuid,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 prefix of the principal subject; `anonymous` before
    /// authentication succeeds.
    pub principal_hash: String,
    pub provider: String,
    pub model: String,
    pub prompt_fingerprint: String,
    #[serde(default)]
    pub response_fingerprint: Option<String>,
    pub latency_ms: u64,
    pub tokens: TokenUsage,
    pub cost_usd: f64,
    pub success: bool,
    #[serde(default)]
    pub error_code: Option<ErrorCode>,
    pub has_pii: bool,
    #[serde(default)]
    pub pii_types: Vec<String>,
    pub injection_detected: bool,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Severity of a detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AnomalySeverity::Medium => "medium",
            AnomalySeverity::High => "high",
            AnomalySeverity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AnomalySeverity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "medium" => Ok(AnomalySeverity::Medium),
            "high" => Ok(AnomalySeverity::High),
            "critical" => Ok(AnomalySeverity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Category of a detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    HighCost,
    HighLatency,
    HighTokens,
    PiiDetected,
    PromptInjection,
    RequestFailure,
    CostSpike,
    LatencySpike,
    HighErrorRate,
    HighRequestRate,
    HighCostRate,
    ModelErrors,
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AnomalyType::HighCost => "high_cost",
            AnomalyType::HighLatency => "high_latency",
            AnomalyType::HighTokens => "high_tokens",
            AnomalyType::PiiDetected => "pii_detected",
            AnomalyType::PromptInjection => "prompt_injection",
            AnomalyType::RequestFailure => "request_failure",
            AnomalyType::CostSpike => "cost_spike",
            AnomalyType::LatencySpike => "latency_spike",
            AnomalyType::HighErrorRate => "high_error_rate",
            AnomalyType::HighRequestRate => "high_request_rate",
            AnomalyType::HighCostRate => "high_cost_rate",
            AnomalyType::ModelErrors => "model_errors",
        };
        write!(f, "{s}")
    }
}

/// A detected anomaly, persisted alongside the event that triggered it.
///
/// Pattern-level anomalies span many events and carry no `event_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub anomaly_id: Uuid,
    #[serde(default)]
    pub event_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub anomaly_type: AnomalyType,
    pub severity: AnomalySeverity,
    pub description: String,
    #[serde(default)]
    pub details: HashMap<String, String>,
    pub recommended_action: String,
}

impl Anomaly {
    /// Create a new anomaly tied to a specific event.
    pub fn for_event(
        event_id: Uuid,
        anomaly_type: AnomalyType,
        severity: AnomalySeverity,
        description: impl Into<String>,
        recommended_action: impl Into<String>,
    ) -> Self {
        Self {
            anomaly_id: Uuid::new_v4(),
            event_id: Some(event_id),
            timestamp: Utc::now(),
            anomaly_type,
            severity,
            description: description.into(),
            details: HashMap::new(),
            recommended_action: recommended_action.into(),
        }
    }

    /// Create a pattern-level anomaly not tied to a single event.
    pub fn for_pattern(
        anomaly_type: AnomalyType,
        severity: AnomalySeverity,
        description: impl Into<String>,
        recommended_action: impl Into<String>,
    ) -> Self {
        Self {
            anomaly_id: Uuid::new_v4(),
            event_id: None,
            timestamp: Utc::now(),
            anomaly_type,
            severity,
            description: description.into(),
            details: HashMap::new(),
            recommended_action: recommended_action.into(),
        }
    }

    /// Attach a detail key/value pair.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Families of audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Authz,
    Pii,
    Processing,
    Violation,
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
    Error,
}

/// One append-only audit record.
///
/// Never contains raw prompt or response text; principal identifiers are
/// hashed before they reach this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    pub principal_hash: String,
    pub event_type: AuditEventType,
    pub outcome: AuditOutcome,
    #[serde(default)]
    pub attrs: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Core error types.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

// ---------------------------------------------------------------------------
// Event store
// ---------------------------------------------------------------------------

/// Windowed aggregate statistics over stored events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventStats {
    pub total_events: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    pub pii_events: u64,
    pub injection_events: u64,
    pub anomaly_count: u64,
}

/// Append-only persistence for events and anomalies.
///
/// Writes are durable before the pipeline reports completion for an event.
/// Readers never block writers.
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    /// Persist one event.
    async fn insert_event(&self, event: &GatewayEvent) -> Result<()>;

    /// Persist one anomaly.
    async fn insert_anomaly(&self, anomaly: &Anomaly) -> Result<()>;

    /// The most recent `limit` events, newest first.
    async fn recent_events(&self, limit: u32) -> Result<Vec<GatewayEvent>>;

    /// Events since `since`, oldest first.
    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<GatewayEvent>>;

    /// Events for one model since `since`, oldest first.
    async fn events_for_model_since(
        &self,
        model: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<GatewayEvent>>;

    /// Anomalies at or above `min_severity`, newest first.
    async fn anomalies_with_min_severity(
        &self,
        min_severity: AnomalySeverity,
        limit: u32,
    ) -> Result<Vec<Anomaly>>;

    /// Aggregate statistics over the trailing window.
    async fn stats(&self, window: Duration) -> Result<EventStats>;

    /// Health check for the store.
    async fn health_check(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
