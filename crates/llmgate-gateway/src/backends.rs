//! Backend adapters.
//!
//! Concrete provider adapters (OpenAI, Anthropic, Ollama) live behind the
//! uniform [`BackendAdapter`] contract and are out of scope here. This
//! module provides the in-process adapters: a rule engine that serves
//! `security_scan`/`extraction` with the security crate's detectors, a
//! canned-response stub standing in for model backends, and a scriptable
//! adapter for tests and local development.

use async_trait::async_trait;
use llmgate_core::{
    BackendAdapter, BackendDescriptor, BackendFailure, HealthState, ProcessOutcome,
    ProcessParams, TokenUsage,
};
use llmgate_security::{InjectionEngine, PiiEngine};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Rough token count used by the stub backends.
fn estimate_tokens(text: &str) -> u32 {
    text.split_whitespace().count().max(1) as u32
}

// ---------------------------------------------------------------------------
// StubLlmBackend
// ---------------------------------------------------------------------------

/// Canned-response stand-in for a model backend.
///
/// Produces deterministic output and cost so the request path, routing,
/// and event pipeline can run end-to-end without network access.
pub struct StubLlmBackend {
    descriptor: BackendDescriptor,
}

impl StubLlmBackend {
    pub fn new(descriptor: BackendDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl BackendAdapter for StubLlmBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn process(
        &self,
        prompt: &str,
        params: &ProcessParams,
        _deadline: Duration,
    ) -> Result<ProcessOutcome, BackendFailure> {
        let started = Instant::now();

        let prompt_tokens = estimate_tokens(prompt);
        let completion_tokens = params
            .max_tokens
            .unwrap_or(64)
            .min(self.descriptor.max_tokens);
        let total_tokens = prompt_tokens + completion_tokens;

        let preview: String = prompt.chars().take(50).collect();
        Ok(ProcessOutcome {
            response: format!("Processed by {}: {preview}", self.descriptor.id),
            tokens: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens,
            },
            cost_usd: (total_tokens as f64 / 1000.0) * self.descriptor.cost_per_1k_tokens,
            confidence: (self.descriptor.confidence_threshold + 0.05).min(1.0),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn health(&self) -> HealthState {
        HealthState::Ok
    }
}

// ---------------------------------------------------------------------------
// RuleEngineBackend
// ---------------------------------------------------------------------------

/// Deterministic rule-based backend serving security scans and extraction
/// by running the PII and injection engines over the prompt.
pub struct RuleEngineBackend {
    descriptor: BackendDescriptor,
    pii: Arc<PiiEngine>,
    injection: Arc<InjectionEngine>,
}

impl RuleEngineBackend {
    pub fn new(
        descriptor: BackendDescriptor,
        pii: Arc<PiiEngine>,
        injection: Arc<InjectionEngine>,
    ) -> Self {
        Self {
            descriptor,
            pii,
            injection,
        }
    }
}

#[async_trait]
impl BackendAdapter for RuleEngineBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn process(
        &self,
        prompt: &str,
        _params: &ProcessParams,
        _deadline: Duration,
    ) -> Result<ProcessOutcome, BackendFailure> {
        let started = Instant::now();

        let pii_report = self.pii.detect(prompt);
        let injection_report = self.injection.scan(prompt);

        let report = serde_json::json!({
            "has_pii": pii_report.has_pii,
            "pii_types": pii_report.types,
            "injection_detected": injection_report.detected,
            "injection_patterns": injection_report.patterns_hit,
        });
        let response = serde_json::to_string(&report)
            .map_err(|e| BackendFailure::InvalidResponse {
                message: format!("report serialization failed: {e}"),
            })?;

        let prompt_tokens = estimate_tokens(prompt);
        Ok(ProcessOutcome {
            response,
            tokens: TokenUsage {
                prompt_tokens,
                completion_tokens: 0,
                total_tokens: prompt_tokens,
            },
            cost_usd: 0.0,
            confidence: self.descriptor.confidence_threshold,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn health(&self) -> HealthState {
        HealthState::Ok
    }
}

// ---------------------------------------------------------------------------
// ScriptedBackend
// ---------------------------------------------------------------------------

/// Adapter that replays a programmed sequence of outcomes.
///
/// Used by tests (cascade, timeout, low-confidence paths) and handy as a
/// local fault-injection harness. When the script is exhausted it behaves
/// like a healthy stub.
pub struct ScriptedBackend {
    descriptor: BackendDescriptor,
    script: Mutex<VecDeque<Result<ProcessOutcome, BackendFailure>>>,
    invocations: Mutex<u32>,
}

impl ScriptedBackend {
    pub fn new(descriptor: BackendDescriptor) -> Self {
        Self {
            descriptor,
            script: Mutex::new(VecDeque::new()),
            invocations: Mutex::new(0),
        }
    }

    /// Queue a successful outcome with the given confidence.
    pub fn push_ok(&self, response: &str, confidence: f64) {
        let tokens = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 20,
            total_tokens: 30,
        };
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(Ok(ProcessOutcome {
                response: response.to_string(),
                tokens,
                cost_usd: (tokens.total_tokens as f64 / 1000.0)
                    * self.descriptor.cost_per_1k_tokens,
                confidence,
                latency_ms: 5,
            }));
    }

    /// Queue a failure.
    pub fn push_failure(&self, failure: BackendFailure) {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(Err(failure));
    }

    /// How many times `process` ran.
    pub fn invocations(&self) -> u32 {
        *self.invocations.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl BackendAdapter for ScriptedBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn process(
        &self,
        prompt: &str,
        _params: &ProcessParams,
        _deadline: Duration,
    ) -> Result<ProcessOutcome, BackendFailure> {
        *self.invocations.lock().unwrap_or_else(|p| p.into_inner()) += 1;

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => {
                let prompt_tokens = estimate_tokens(prompt);
                Ok(ProcessOutcome {
                    response: format!("Processed by {}", self.descriptor.id),
                    tokens: TokenUsage {
                        prompt_tokens,
                        completion_tokens: 16,
                        total_tokens: prompt_tokens + 16,
                    },
                    cost_usd: ((prompt_tokens + 16) as f64 / 1000.0)
                        * self.descriptor.cost_per_1k_tokens,
                    confidence: (self.descriptor.confidence_threshold + 0.05).min(1.0),
                    latency_ms: 1,
                })
            }
        }
    }

    async fn health(&self) -> HealthState {
        HealthState::Ok
    }
}
