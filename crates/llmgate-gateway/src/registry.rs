//! Backend registry.
//!
//! An in-memory catalog of backend adapters keyed by id. Read-mostly:
//! request handling only clones the current snapshot `Arc`; reloads swap
//! in a fresh immutable snapshot.

use crate::backends::{RuleEngineBackend, StubLlmBackend};
use llmgate_core::{
    BackendAdapter, BackendDescriptor, BackendKind, Capability, Sensitivity,
};
use llmgate_security::{InjectionEngine, PiiEngine};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Immutable view of the registered backends.
pub struct RegistrySnapshot {
    backends: BTreeMap<String, Arc<dyn BackendAdapter>>,
}

impl RegistrySnapshot {
    pub fn get(&self, id: &str) -> Option<Arc<dyn BackendAdapter>> {
        self.backends.get(id).cloned()
    }

    /// Descriptors in id order (the router's deterministic iteration order).
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.backends
            .values()
            .map(|b| b.descriptor().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn BackendAdapter>> {
        self.backends.values()
    }
}

/// Registry with atomic snapshot swap on reload.
pub struct BackendRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl BackendRegistry {
    pub fn new(adapters: Vec<Arc<dyn BackendAdapter>>) -> Self {
        Self {
            current: RwLock::new(Arc::new(Self::snapshot_from(adapters))),
        }
    }

    fn snapshot_from(adapters: Vec<Arc<dyn BackendAdapter>>) -> RegistrySnapshot {
        let backends = adapters
            .into_iter()
            .map(|a| (a.descriptor().id.clone(), a))
            .collect();
        RegistrySnapshot { backends }
    }

    /// Clone the current snapshot. Lock-free on the hot path apart from a
    /// short read-lock around the `Arc` clone.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the catalog wholesale.
    pub fn reload(&self, adapters: Vec<Arc<dyn BackendAdapter>>) {
        let snapshot = Arc::new(Self::snapshot_from(adapters));
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = snapshot;
    }
}

// ---------------------------------------------------------------------------
// Default catalog
// ---------------------------------------------------------------------------

fn descriptor(
    id: &str,
    kind: BackendKind,
    capabilities: &[Capability],
    cost_per_1k_tokens: f64,
    avg_latency_ms: f64,
    max_tokens: u32,
    confidence_threshold: f64,
    pii_allowed: bool,
    sensitivity_allowed: &[Sensitivity],
) -> BackendDescriptor {
    BackendDescriptor {
        id: id.to_string(),
        kind,
        capabilities: capabilities.iter().copied().collect(),
        cost_per_1k_tokens,
        avg_latency_ms,
        max_tokens,
        confidence_threshold,
        pii_allowed,
        confidential_allowed: false,
        sensitivity_allowed: sensitivity_allowed.iter().copied().collect(),
    }
}

const CLOUD_SENSITIVITIES: &[Sensitivity] = &[Sensitivity::Public, Sensitivity::Internal];
const PRIVATE_SENSITIVITIES: &[Sensitivity] = &[
    Sensitivity::Public,
    Sensitivity::Internal,
    Sensitivity::Sensitive,
    Sensitivity::Pii,
];

/// Descriptors of the built-in catalog, used when the `backends`
/// configuration section is empty.
pub fn default_descriptors() -> Vec<BackendDescriptor> {
    use Capability::*;

    vec![
        descriptor(
            "openai:gpt-4",
            BackendKind::LlmLarge,
            &[
                TextGeneration,
                Classification,
                Extraction,
                Summarization,
                Analysis,
                CodeGeneration,
            ],
            0.03,
            2000.0,
            8192,
            0.9,
            false,
            CLOUD_SENSITIVITIES,
        ),
        descriptor(
            "openai:gpt-3.5-turbo",
            BackendKind::LlmSmall,
            &[TextGeneration, Classification, Extraction, Summarization],
            0.0015,
            800.0,
            4096,
            0.8,
            false,
            CLOUD_SENSITIVITIES,
        ),
        descriptor(
            "anthropic:claude-3-opus",
            BackendKind::LlmLarge,
            &[
                TextGeneration,
                Classification,
                Extraction,
                Summarization,
                Analysis,
                CodeGeneration,
            ],
            0.015,
            1800.0,
            4096,
            0.95,
            false,
            CLOUD_SENSITIVITIES,
        ),
        descriptor(
            "ollama:llama2",
            BackendKind::LlmPrivate,
            &[TextGeneration, Classification, Summarization],
            0.0,
            3000.0,
            2048,
            0.7,
            true,
            PRIVATE_SENSITIVITIES,
        ),
        descriptor(
            "rules:pii-detector",
            BackendKind::RuleEngine,
            &[Extraction, SecurityScan],
            0.0,
            50.0,
            100_000,
            0.85,
            true,
            PRIVATE_SENSITIVITIES,
        ),
        descriptor(
            "rules:injection-detector",
            BackendKind::RuleEngine,
            &[SecurityScan],
            0.0,
            30.0,
            100_000,
            0.9,
            true,
            PRIVATE_SENSITIVITIES,
        ),
    ]
}

/// Build adapters for a list of descriptors: rule-engine descriptors get
/// the real rule engine, everything else the scripted stub that stands in
/// for concrete provider adapters.
pub fn build_adapters(
    descriptors: Vec<BackendDescriptor>,
    pii: Arc<PiiEngine>,
    injection: Arc<InjectionEngine>,
) -> Vec<Arc<dyn BackendAdapter>> {
    descriptors
        .into_iter()
        .map(|d| match d.kind {
            BackendKind::RuleEngine => Arc::new(RuleEngineBackend::new(
                d,
                Arc::clone(&pii),
                Arc::clone(&injection),
            )) as Arc<dyn BackendAdapter>,
            _ => Arc::new(StubLlmBackend::new(d)) as Arc<dyn BackendAdapter>,
        })
        .collect()
}
