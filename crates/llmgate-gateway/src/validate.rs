//! Request admission: schema validation and clock-skew checks.
//!
//! Rejects malformed envelopes before any authentication work happens.
//! No semantic validation of the payload beyond shape; typed payload
//! decoding happens lazily against the registered schema.

use chrono::{DateTime, Utc};
use llmgate_core::config::LimitsConfig;
use llmgate_core::{ErrorCode, GatewayRequest, LlmRequestPayload, PROTOCOL_VERSION};
use std::collections::HashSet;

/// A rejected request, with the field that failed and why.
#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub code: ErrorCode,
    pub field: String,
    pub reason: String,
}

impl ValidationFailure {
    fn schema(field: &str, reason: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::SchemaInvalid,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Caller-facing message.
    pub fn message(&self) -> String {
        format!("{}: {}", self.field, self.reason)
    }
}

/// The set of payload schemas this deployment accepts.
pub struct SchemaRegistry {
    registered: HashSet<String>,
}

impl SchemaRegistry {
    pub fn new(schemas: &[String]) -> Self {
        Self {
            registered: schemas.iter().cloned().collect(),
        }
    }

    pub fn is_registered(&self, schema: &str) -> bool {
        self.registered.contains(schema)
    }

    /// Decode the typed LLM payload once the envelope is admitted.
    pub fn decode_llm_payload(
        &self,
        request: &GatewayRequest,
    ) -> Result<LlmRequestPayload, ValidationFailure> {
        serde_json::from_str(request.payload.get())
            .map_err(|e| ValidationFailure::schema("payload", e.to_string()))
    }
}

/// Validate a raw request body against the envelope contract.
///
/// Checks, in order: size cap, JSON shape and enum membership (via serde),
/// protocol version, request id, timeout range, registered payload schema,
/// and finally timestamp skew (`CLOCK_SKEW`).
pub fn validate_request(
    raw: &[u8],
    limits: &LimitsConfig,
    schemas: &SchemaRegistry,
    now: DateTime<Utc>,
) -> Result<GatewayRequest, ValidationFailure> {
    if raw.len() as u64 > limits.max_request_size_bytes {
        return Err(ValidationFailure::schema(
            "body",
            format!(
                "request size {} exceeds maximum {}",
                raw.len(),
                limits.max_request_size_bytes
            ),
        ));
    }

    let request: GatewayRequest = serde_json::from_slice(raw)
        .map_err(|e| ValidationFailure::schema("body", e.to_string()))?;

    if request.mpc_version != PROTOCOL_VERSION {
        return Err(ValidationFailure::schema(
            "mpc_version",
            format!("unsupported protocol version '{}'", request.mpc_version),
        ));
    }

    if request.request_id.is_nil() {
        return Err(ValidationFailure::schema("request_id", "must not be nil"));
    }

    if request.config.timeout_ms == 0 {
        return Err(ValidationFailure::schema(
            "config.timeout_ms",
            "must be greater than zero",
        ));
    }

    if request.source.application_id.trim().is_empty() {
        return Err(ValidationFailure::schema(
            "source.application_id",
            "must not be empty",
        ));
    }

    if !schemas.is_registered(&request.payload_schema) {
        return Err(ValidationFailure::schema(
            "payload_schema",
            format!("unknown payload schema '{}'", request.payload_schema),
        ));
    }

    let skew = (request.timestamp - now).num_seconds().abs();
    if skew > limits.clock_skew_secs {
        return Err(ValidationFailure {
            code: ErrorCode::ClockSkew,
            field: "timestamp".to_string(),
            reason: format!(
                "timestamp skew {skew}s exceeds maximum {}s",
                limits.clock_skew_secs
            ),
        });
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new(&["llm.request.v1".to_string()])
    }

    fn request_json() -> serde_json::Value {
        serde_json::json!({
            "mpc_version": "1.0",
            "request_id": Uuid::new_v4(),
            "timestamp": Utc::now().to_rfc3339(),
            "source": { "application_id": "app-orders" },
            "type": "process_request",
            "payload_schema": "llm.request.v1",
            "payload": { "model": "gpt-4", "prompt": "hello" },
            "config": { "sensitivity": "public" },
            "auth": { "token": "tok" }
        })
    }

    fn validate(value: &serde_json::Value) -> Result<GatewayRequest, ValidationFailure> {
        validate_request(
            &serde_json::to_vec(value).unwrap(),
            &LimitsConfig::default(),
            &registry(),
            Utc::now(),
        )
    }

    #[test]
    fn test_valid_request_passes() {
        let request = validate(&request_json()).unwrap();
        assert_eq!(request.payload_schema, "llm.request.v1");
        let payload = registry().decode_llm_payload(&request).unwrap();
        assert_eq!(payload.prompt, "hello");
    }

    #[test]
    fn test_not_json_rejected() {
        let result = validate_request(
            b"not json",
            &LimitsConfig::default(),
            &registry(),
            Utc::now(),
        );
        assert_eq!(result.unwrap_err().code, ErrorCode::SchemaInvalid);
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let mut value = request_json();
        value.as_object_mut().unwrap().remove("source");
        let failure = validate(&value).unwrap_err();
        assert_eq!(failure.code, ErrorCode::SchemaInvalid);
    }

    #[test]
    fn test_bad_enum_member_rejected() {
        let mut value = request_json();
        value["config"]["sensitivity"] = serde_json::json!("ultra_secret");
        let failure = validate(&value).unwrap_err();
        assert_eq!(failure.code, ErrorCode::SchemaInvalid);
    }

    #[test]
    fn test_wrong_protocol_version_rejected() {
        let mut value = request_json();
        value["mpc_version"] = serde_json::json!("2.0");
        let failure = validate(&value).unwrap_err();
        assert_eq!(failure.code, ErrorCode::SchemaInvalid);
        assert_eq!(failure.field, "mpc_version");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut value = request_json();
        value["config"]["timeout_ms"] = serde_json::json!(0);
        let failure = validate(&value).unwrap_err();
        assert_eq!(failure.field, "config.timeout_ms");
    }

    #[test]
    fn test_unregistered_schema_rejected() {
        let mut value = request_json();
        value["payload_schema"] = serde_json::json!("custom.v9");
        let failure = validate(&value).unwrap_err();
        assert_eq!(failure.field, "payload_schema");
    }

    #[test]
    fn test_stale_timestamp_is_clock_skew() {
        let mut value = request_json();
        value["timestamp"] =
            serde_json::json!((Utc::now() - chrono::Duration::minutes(10)).to_rfc3339());
        let failure = validate(&value).unwrap_err();
        assert_eq!(failure.code, ErrorCode::ClockSkew);
    }

    #[test]
    fn test_future_timestamp_is_clock_skew() {
        let mut value = request_json();
        value["timestamp"] =
            serde_json::json!((Utc::now() + chrono::Duration::minutes(10)).to_rfc3339());
        let failure = validate(&value).unwrap_err();
        assert_eq!(failure.code, ErrorCode::ClockSkew);
    }

    #[test]
    fn test_skew_within_tolerance_passes() {
        let mut value = request_json();
        value["timestamp"] =
            serde_json::json!((Utc::now() - chrono::Duration::minutes(4)).to_rfc3339());
        assert!(validate(&value).is_ok());
    }

    #[test]
    fn test_oversized_request_rejected() {
        let limits = LimitsConfig {
            max_request_size_bytes: 64,
            ..LimitsConfig::default()
        };
        let raw = serde_json::to_vec(&request_json()).unwrap();
        let failure =
            validate_request(&raw, &limits, &registry(), Utc::now()).unwrap_err();
        assert_eq!(failure.code, ErrorCode::SchemaInvalid);
        assert_eq!(failure.field, "body");
    }

    #[test]
    fn test_malformed_payload_decodes_lazily() {
        // The envelope admits any JSON payload shape; decoding is lazy.
        let mut value = request_json();
        value["payload"] = serde_json::json!({ "model": "gpt-4" }); // no prompt
        let request = validate(&value).unwrap();
        assert!(registry().decode_llm_payload(&request).is_err());
    }
}
