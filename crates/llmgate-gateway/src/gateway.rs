//! The gateway orchestrator.
//!
//! Drives each request through validation, authentication, authorization,
//! PII screening, routing, and backend invocation with cascade fallback,
//! then emits exactly one monitoring event per request into the pipeline.
//! All collaborators are injected at construction; nothing here is a
//! process-wide global.

use crate::audit::AuditLog;
use crate::idempotency::IdempotencyCache;
use crate::pipeline::EventPipeline;
use crate::registry::BackendRegistry;
use crate::router::{self, RouteError, RouteRequest};
use crate::validate::{self, SchemaRegistry};
use chrono::Utc;
use llmgate_core::{
    AuditOutcome, BackendFailure, Capability, ErrorCode, GatewayConfig, GatewayEvent,
    GatewayResponse, LlmRequestPayload, ProcessOutcome, ProcessParams,
    ProcessingHint, ProcessingInfo, ResponseStatus, Result, RiskLevel, SecurityFlags, TokenUsage,
};
use llmgate_security::{
    fingerprint, AuthFailure, AuthzPolicy, InjectionEngine, PiiEngine, Redactor,
    ResourceAttributes, SignatureVerifier, TokenService, Tokenizer,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Principal hash used before authentication succeeds.
const ANONYMOUS: &str = "anonymous";

/// Accumulated facts about one request, folded into the single event
/// emitted when the request reaches a terminal state.
struct EventDraft {
    request_id: Uuid,
    principal_hash: String,
    provider: String,
    model: String,
    prompt_fingerprint: String,
    response_fingerprint: Option<String>,
    latency_ms: u64,
    tokens: TokenUsage,
    cost_usd: f64,
    success: bool,
    error_code: Option<ErrorCode>,
    has_pii: bool,
    pii_types: Vec<String>,
    injection_detected: bool,
    metadata: HashMap<String, String>,
}

impl EventDraft {
    fn new(request_id: Uuid, raw_fingerprint: String) -> Self {
        Self {
            request_id,
            principal_hash: ANONYMOUS.to_string(),
            provider: "unknown".to_string(),
            model: "unknown".to_string(),
            prompt_fingerprint: raw_fingerprint,
            response_fingerprint: None,
            latency_ms: 0,
            tokens: TokenUsage::default(),
            cost_usd: 0.0,
            success: false,
            error_code: None,
            has_pii: false,
            pii_types: Vec::new(),
            injection_detected: false,
            metadata: HashMap::new(),
        }
    }

    fn into_event(self) -> GatewayEvent {
        GatewayEvent {
            event_id: Uuid::new_v4(),
            request_id: self.request_id,
            timestamp: Utc::now(),
            principal_hash: self.principal_hash,
            provider: self.provider,
            model: self.model,
            prompt_fingerprint: self.prompt_fingerprint,
            response_fingerprint: self.response_fingerprint,
            latency_ms: self.latency_ms,
            tokens: self.tokens,
            cost_usd: self.cost_usd,
            success: self.success,
            error_code: self.error_code,
            has_pii: self.has_pii,
            pii_types: self.pii_types,
            injection_detected: self.injection_detected,
            // Assigned by the pipeline's processor stage.
            risk_level: RiskLevel::Low,
            metadata: self.metadata,
        }
    }
}

/// The request-path orchestrator.
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<BackendRegistry>,
    pipeline: Arc<EventPipeline>,
    audit: AuditLog,
    tokens: TokenService,
    signatures: SignatureVerifier,
    authz: AuthzPolicy,
    pii: Arc<PiiEngine>,
    redactor: Redactor,
    injection: Arc<InjectionEngine>,
    idempotency: Option<IdempotencyCache>,
    schemas: SchemaRegistry,
}

impl Gateway {
    /// Wire up the orchestrator from configuration and injected
    /// collaborators.
    pub fn new(
        config: GatewayConfig,
        registry: Arc<BackendRegistry>,
        pipeline: Arc<EventPipeline>,
        audit: AuditLog,
    ) -> Result<Self> {
        let tokens = TokenService::new(
            &config.auth.token_secret,
            Duration::from_secs(config.auth.token_ttl_minutes * 60),
        );
        let signature_secret = config
            .auth
            .signature_secret
            .as_deref()
            .unwrap_or(&config.auth.token_secret);
        let signatures = SignatureVerifier::new(signature_secret);
        let authz = AuthzPolicy::new(config.auth.cost_ceilings.clone());
        let pii = Arc::new(PiiEngine::new(&config.pii.patterns)?);
        let redactor = Redactor::new(config.pii.redaction, Arc::new(Tokenizer::new()));
        let injection = Arc::new(InjectionEngine::new(&config.injection.patterns)?);
        let idempotency = config.idempotency.enabled.then(|| {
            IdempotencyCache::new(Duration::from_secs(config.idempotency.ttl_secs))
        });
        let schemas = SchemaRegistry::new(&config.payload_schemas);

        Ok(Self {
            config,
            registry,
            pipeline,
            audit,
            tokens,
            signatures,
            authz,
            pii,
            redactor,
            injection,
            idempotency,
            schemas,
        })
    }

    /// The PII engine (shared with rule-engine adapters).
    pub fn pii_engine(&self) -> Arc<PiiEngine> {
        Arc::clone(&self.pii)
    }

    /// The injection engine (shared with rule-engine adapters).
    pub fn injection_engine(&self) -> Arc<InjectionEngine> {
        Arc::clone(&self.injection)
    }

    pub fn token_service(&self) -> &TokenService {
        &self.tokens
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn pipeline(&self) -> &Arc<EventPipeline> {
        &self.pipeline
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Handle one raw request body end to end.
    ///
    /// Every terminal response is paired with exactly one event emitted to
    /// the pipeline, on success and on every failure path alike.
    pub async fn handle(&self, raw: &[u8]) -> GatewayResponse {
        let (response, draft, cache_under) = self.process_inner(raw).await;

        self.pipeline.emit(draft.into_event()).await;

        if let (Some(cache), Some((subject, key))) = (&self.idempotency, cache_under) {
            // Retriable failures are not cached: a retry with the same key
            // must re-execute rather than replay the failure.
            let cacheable = match (response.status, &response.error) {
                (ResponseStatus::Ok, _) => true,
                (_, Some(error)) => !error.code.is_retriable(),
                _ => false,
            };
            if cacheable {
                cache.insert(&subject, &key, response.clone());
            }
        }

        response
    }

    /// The full request path. Returns the response, the event draft, and
    /// the idempotency slot to cache the response under (when any).
    async fn process_inner(
        &self,
        raw: &[u8],
    ) -> (GatewayResponse, EventDraft, Option<(String, String)>) {
        let started = Instant::now();

        // ---- VALIDATED -----------------------------------------------------
        let request = match validate::validate_request(
            raw,
            &self.config.limits,
            &self.schemas,
            Utc::now(),
        ) {
            Ok(request) => request,
            Err(failure) => {
                let request_id = salvage_request_id(raw);
                let mut draft =
                    EventDraft::new(request_id, fingerprint(&String::from_utf8_lossy(raw)));
                draft.error_code = Some(failure.code);
                draft.latency_ms = elapsed_ms(started);
                self.audit_stage_failure(request_id, ANONYMOUS, "validate", &failure.message());
                let response =
                    GatewayResponse::error(request_id, failure.code, failure.message());
                return (response, draft, None);
            }
        };

        let request_id = request.request_id;
        let payload: LlmRequestPayload = match self.schemas.decode_llm_payload(&request) {
            Ok(payload) => payload,
            Err(failure) => {
                let mut draft = EventDraft::new(request_id, fingerprint(request.payload.get()));
                draft.error_code = Some(ErrorCode::SchemaInvalid);
                draft.latency_ms = elapsed_ms(started);
                self.audit_stage_failure(request_id, ANONYMOUS, "payload", &failure.message());
                let response = GatewayResponse::error(
                    request_id,
                    ErrorCode::SchemaInvalid,
                    failure.message(),
                );
                return (response, draft, None);
            }
        };

        let prompt = payload.prompt.clone();
        let mut draft = EventDraft::new(request_id, fingerprint(&prompt));
        draft.model = payload.model.clone();
        draft
            .metadata
            .insert("application_id".to_string(), request.source.application_id.clone());

        // ---- AUTHENTICATED -------------------------------------------------
        let principal = match self.tokens.verify(&request.auth.token) {
            Ok(principal) => principal,
            Err(failure) => {
                let code = match failure {
                    AuthFailure::Expired => ErrorCode::AuthExpired,
                    AuthFailure::Invalid => ErrorCode::AuthInvalid,
                };
                self.audit.authz(request_id, ANONYMOUS, false, Some("token rejected"));
                draft.error_code = Some(code);
                draft.latency_ms = elapsed_ms(started);
                // Fixed message: never reveals which check failed.
                let response =
                    GatewayResponse::error(request_id, code, "Authentication failed");
                return (response, draft, None);
            }
        };
        let principal_hash = fingerprint(&principal.subject);
        draft.principal_hash = principal_hash.clone();

        if let Some(ref signature) = request.auth.signature {
            if !self
                .signatures
                .verify(request.payload.get().as_bytes(), signature)
            {
                self.audit
                    .authz(request_id, &principal_hash, false, Some("signature rejected"));
                draft.error_code = Some(ErrorCode::AuthInvalid);
                draft.latency_ms = elapsed_ms(started);
                let response = GatewayResponse::error(
                    request_id,
                    ErrorCode::AuthInvalid,
                    "Authentication failed",
                );
                return (response, draft, None);
            }
        }

        // ---- Idempotency replay -------------------------------------------
        let cache_slot = request
            .idempotency_key
            .as_ref()
            .map(|key| (principal.subject.clone(), key.clone()));
        if let (Some(cache), Some((subject, key))) = (&self.idempotency, &cache_slot) {
            if let Some(cached) = cache.get(subject, key) {
                debug!(%request_id, "Idempotent replay");
                self.audit.processing(
                    request_id,
                    &principal_hash,
                    "cache",
                    AuditOutcome::Success,
                    Some(elapsed_ms(started)),
                    None,
                    None,
                );
                draft.success = cached.status == ResponseStatus::Ok;
                draft.error_code = cached.error.as_ref().map(|e| e.code);
                draft.latency_ms = elapsed_ms(started);
                draft.metadata.insert("replay".to_string(), "true".to_string());
                if let Some(ref processing) = cached.processing {
                    draft.metadata.insert("backend".to_string(), processing.backend.clone());
                }
                // Cached responses are returned unmodified.
                return (cached, draft, None);
            }
        }

        // ---- AUTHORIZED ----------------------------------------------------
        let estimated_tokens = estimate_tokens(&prompt, payload.max_tokens);
        let snapshot = self.registry.snapshot();
        let descriptors = snapshot.descriptors();
        let capability = infer_capability(&request.payload_schema);

        let optimistic_cost = descriptors
            .iter()
            .filter(|d| {
                d.capabilities.contains(&capability)
                    && d.allows_sensitivity(request.config.sensitivity)
            })
            .map(|d| (estimated_tokens as f64 / 1000.0) * d.cost_per_1k_tokens)
            .fold(f64::INFINITY, f64::min);
        let estimated_cost_usd = if optimistic_cost.is_finite() {
            optimistic_cost
        } else {
            0.0
        };

        let decision = self.authz.authorize(
            &principal,
            &ResourceAttributes {
                sensitivity: request.config.sensitivity,
                processing_hint: request.config.processing_hint,
                estimated_cost_usd,
            },
        );
        self.audit.authz(
            request_id,
            &principal_hash,
            decision.allowed,
            decision.reason.as_deref(),
        );
        if !decision.allowed {
            draft.error_code = Some(ErrorCode::AuthzDenied);
            draft.latency_ms = elapsed_ms(started);
            let response = GatewayResponse::error(
                request_id,
                ErrorCode::AuthzDenied,
                decision.reason.unwrap_or_else(|| "Not authorized".to_string()),
            );
            return (response, draft, None);
        }

        // ---- SCREENED ------------------------------------------------------
        let pii_report = if self.config.pii.enabled && request.config.enable_pii_detection {
            self.pii.detect(&prompt)
        } else {
            Default::default()
        };
        if pii_report.has_pii {
            draft.has_pii = true;
            draft.pii_types = pii_report.types.clone();
            let action = format!("{:?}", self.config.pii.redaction).to_lowercase();
            self.audit
                .pii(request_id, &principal_hash, &pii_report.types, &action);
        }

        let outbound_prompt = if pii_report.has_pii && self.config.pii.redact_outbound {
            self.redactor.apply(&prompt, &pii_report.matches)
        } else {
            prompt.clone()
        };

        let injection_detected = self.config.injection.enabled
            && request.config.enable_injection_detection
            && self.injection.scan(&prompt).detected;
        draft.injection_detected = injection_detected;
        if injection_detected {
            info!(%request_id, "Prompt injection patterns detected; continuing with raised risk");
        }

        let security_flags = SecurityFlags {
            has_pii: pii_report.has_pii,
            injection_detected,
        };

        // ---- ROUTED --------------------------------------------------------
        let ceiling = self.authz.cost_ceiling(principal.role);
        let route_request = RouteRequest {
            capability,
            sensitivity: request.config.sensitivity,
            hint: request.config.processing_hint,
            max_cost: Some(ceiling),
            max_latency_ms: Some(request.config.timeout_ms as f64),
            estimated_tokens,
            has_pii: pii_report.has_pii,
            prior_failures: Default::default(),
        };

        let plan = match router::plan(&descriptors, &route_request, &self.config.routing) {
            Ok(plan) => plan,
            Err(RouteError::PiiBlocked) => {
                let detail = format!(
                    "requested backend family may not process PII (types: {})",
                    pii_report.types.join(",")
                );
                self.audit
                    .violation(request_id, &principal_hash, "pii_routing", &detail);
                draft.error_code = Some(ErrorCode::PiiRoutingBlocked);
                draft.latency_ms = elapsed_ms(started);
                let response = GatewayResponse::error(
                    request_id,
                    ErrorCode::PiiRoutingBlocked,
                    detail,
                )
                .with_security_flags(security_flags);
                return (response, draft, None);
            }
            Err(RouteError::NoCandidates) => {
                self.audit_stage_failure(
                    request_id,
                    &principal_hash,
                    "route",
                    "no backend satisfies the request constraints",
                );
                draft.error_code = Some(ErrorCode::NoBackendAvailable);
                draft.latency_ms = elapsed_ms(started);
                let response = GatewayResponse::error(
                    request_id,
                    ErrorCode::NoBackendAvailable,
                    "No backend satisfies the request constraints",
                )
                .with_security_flags(security_flags);
                return (response, draft, None);
            }
        };

        if plan.hint_ignored {
            draft
                .metadata
                .insert("hint_ignored".to_string(), "true".to_string());
        }

        debug!(
            %request_id,
            primary = %plan.primary(),
            fallbacks = plan.candidates.len() - 1,
            "Routing decision"
        );

        // ---- EXECUTING (with cascade) -------------------------------------
        let params = ProcessParams {
            model: payload.model.clone(),
            max_tokens: payload.max_tokens,
            temperature: payload.temperature,
        };
        let total_budget = Duration::from_millis(request.config.timeout_ms);
        let min_slice = Duration::from_millis(self.config.routing.min_deadline_slice_ms);
        let hybrid_mode = request.config.processing_hint == ProcessingHint::Hybrid;

        let mut last_failure: Option<BackendFailure> = None;
        let mut accepted: Option<(usize, String, ProcessOutcome)> = None;
        let mut soft_accepted: Option<(usize, String, ProcessOutcome)> = None;
        let mut attempts = 0u32;

        for (index, backend_id) in plan.candidates.iter().enumerate() {
            let remaining = total_budget.saturating_sub(started.elapsed());
            if remaining < min_slice {
                debug!(%request_id, "Cascade halted: remaining budget below minimum slice");
                break;
            }
            let Some(adapter) = snapshot.get(backend_id) else {
                continue;
            };
            attempts += 1;

            match timeout(remaining, adapter.process(&outbound_prompt, &params, remaining)).await
            {
                Err(_) => {
                    // The deadline fired around the adapter call.
                    self.audit.processing(
                        request_id,
                        &principal_hash,
                        backend_id,
                        AuditOutcome::Failure,
                        Some(elapsed_ms(started)),
                        None,
                        Some("timeout"),
                    );
                    last_failure = Some(BackendFailure::Timeout);
                    continue;
                }
                Ok(Err(failure)) => {
                    self.audit.processing(
                        request_id,
                        &principal_hash,
                        backend_id,
                        AuditOutcome::Failure,
                        Some(elapsed_ms(started)),
                        None,
                        Some(&failure.to_string()),
                    );
                    let retriable = failure.is_retriable();
                    last_failure = Some(failure);
                    if retriable {
                        continue;
                    }
                    break;
                }
                Ok(Ok(outcome)) => {
                    let descriptor = adapter.descriptor();
                    let confident = outcome.confidence >= descriptor.confidence_threshold;
                    self.audit.processing(
                        request_id,
                        &principal_hash,
                        backend_id,
                        AuditOutcome::Success,
                        Some(outcome.latency_ms),
                        Some(outcome.cost_usd),
                        (!confident).then_some("low_confidence"),
                    );
                    if confident {
                        accepted = Some((index, backend_id.clone(), outcome));
                        break;
                    }
                    // Soft failure: cascade in hybrid mode, otherwise keep
                    // the result and record the condition.
                    if hybrid_mode && index + 1 < plan.candidates.len() {
                        if soft_accepted.is_none() {
                            soft_accepted = Some((index, backend_id.clone(), outcome));
                        }
                        continue;
                    }
                    draft
                        .metadata
                        .insert("low_confidence".to_string(), "true".to_string());
                    accepted = Some((index, backend_id.clone(), outcome));
                    break;
                }
            }
        }

        // A low-confidence result beats no result when hybrid cascade ran dry.
        if accepted.is_none() {
            if let Some(soft) = soft_accepted {
                draft
                    .metadata
                    .insert("low_confidence".to_string(), "true".to_string());
                accepted = Some(soft);
            }
        }

        draft
            .metadata
            .insert("attempts".to_string(), attempts.to_string());

        // ---- COMPLETED → RESPONDED ----------------------------------------
        match accepted {
            Some((index, backend_id, outcome)) => {
                if let Some(descriptor) =
                    descriptors.iter().find(|d| d.id == backend_id)
                {
                    draft.provider = descriptor.provider().to_string();
                    draft.model = descriptor.model().to_string();
                }
                draft.success = true;
                draft.tokens = outcome.tokens;
                draft.cost_usd = outcome.cost_usd;
                draft.response_fingerprint = Some(fingerprint(&outcome.response));
                draft.latency_ms = elapsed_ms(started);
                draft
                    .metadata
                    .insert("backend".to_string(), backend_id.clone());

                let fallback_used = index > 0;
                let result = serde_json::json!({
                    "response": outcome.response,
                    "tokens": outcome.tokens.total_tokens,
                    "prompt_tokens": outcome.tokens.prompt_tokens,
                    "completion_tokens": outcome.tokens.completion_tokens,
                    "backend": backend_id,
                });
                let response = GatewayResponse::ok(
                    request_id,
                    result,
                    ProcessingInfo {
                        backend: backend_id,
                        latency_ms: elapsed_ms(started),
                        cost_usd: outcome.cost_usd,
                        confidence: outcome.confidence,
                        fallback_used,
                    },
                    security_flags,
                );
                (response, draft, cache_slot)
            }
            None => {
                let (code, message) = match &last_failure {
                    Some(failure) => (failure.error_code(), failure.to_string()),
                    // Budget exhausted before any attempt completed.
                    None => (
                        ErrorCode::BackendTimeout,
                        "request deadline exhausted before a backend attempt".to_string(),
                    ),
                };
                warn!(%request_id, %code, "All backend attempts failed");
                draft.error_code = Some(code);
                draft.latency_ms = elapsed_ms(started);
                let response = GatewayResponse::error(request_id, code, message)
                    .with_security_flags(security_flags);
                (response, draft, cache_slot)
            }
        }
    }

    /// Processing-family audit record for a failed pipeline stage.
    fn audit_stage_failure(&self, request_id: Uuid, principal_hash: &str, stage: &str, detail: &str) {
        self.audit.processing(
            request_id,
            principal_hash,
            stage,
            AuditOutcome::Failure,
            None,
            None,
            Some(detail),
        );
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Pull the request id out of an otherwise-invalid body, for correlation.
fn salvage_request_id(raw: &[u8]) -> Uuid {
    serde_json::from_slice::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.get("request_id").cloned())
        .and_then(|v| v.as_str().map(str::to_string))
        .and_then(|s| Uuid::parse_str(&s).ok())
        .unwrap_or(Uuid::nil())
}

/// Rough token estimate from prompt length plus the requested completion.
fn estimate_tokens(prompt: &str, max_tokens: Option<u32>) -> u32 {
    let prompt_tokens = (prompt.split_whitespace().count() as f64 * 1.5).ceil() as u32;
    prompt_tokens.max(1) + max_tokens.unwrap_or(0)
}

/// Infer the required capability from the payload schema identifier.
fn infer_capability(payload_schema: &str) -> Capability {
    if payload_schema.contains("security") {
        Capability::SecurityScan
    } else if payload_schema.contains("extract") {
        Capability::Extraction
    } else if payload_schema.contains("classif") {
        Capability::Classification
    } else {
        Capability::TextGeneration
    }
}
