//! Backend selection.
//!
//! A pure function over the registry snapshot: filter on hard constraints,
//! apply the processing hint, order by a weighted composite score, and
//! build the cascade chain. Ties break on lexicographic backend id so the
//! decision is deterministic.

use llmgate_core::config::RoutingConfig;
use llmgate_core::{BackendDescriptor, BackendKind, Capability, ProcessingHint, Sensitivity};
use std::collections::HashSet;

/// Routing inputs for one request.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub capability: Capability,
    pub sensitivity: Sensitivity,
    pub hint: ProcessingHint,
    /// Per-request cost ceiling in USD, when set.
    pub max_cost: Option<f64>,
    /// Latency ceiling in milliseconds, when set.
    pub max_latency_ms: Option<f64>,
    pub estimated_tokens: u32,
    pub has_pii: bool,
    /// Backends that already failed this request (cascade re-entry).
    pub prior_failures: HashSet<String>,
}

/// Ordered routing decision: primary plus fallbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    /// Candidate backend ids, primary first.
    pub candidates: Vec<String>,
    pub hint_ignored: bool,
    /// Estimated cost of the primary backend for this request, in USD.
    pub estimated_cost: f64,
}

impl RoutePlan {
    pub fn primary(&self) -> &str {
        &self.candidates[0]
    }
}

/// Why no plan could be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Candidates exist but the request's PII excludes all of them.
    PiiBlocked,
    /// Nothing satisfies the hard constraints.
    NoCandidates,
}

/// The backend kind a non-auto hint restricts to.
fn hint_kind(hint: ProcessingHint) -> Option<BackendKind> {
    match hint {
        ProcessingHint::Auto => None,
        ProcessingHint::RuleEngine => Some(BackendKind::RuleEngine),
        ProcessingHint::ModelSmall => Some(BackendKind::LlmSmall),
        ProcessingHint::ModelLarge => Some(BackendKind::LlmLarge),
        ProcessingHint::ModelPrivate => Some(BackendKind::LlmPrivate),
        ProcessingHint::Hybrid => Some(BackendKind::Hybrid),
    }
}

fn estimated_cost(backend: &BackendDescriptor, estimated_tokens: u32) -> f64 {
    (estimated_tokens as f64 / 1000.0) * backend.cost_per_1k_tokens
}

/// All hard filter predicates except the PII check.
fn passes_non_pii_predicates(backend: &BackendDescriptor, request: &RouteRequest) -> bool {
    if !backend.capabilities.contains(&request.capability) {
        return false;
    }
    if !backend.allows_sensitivity(request.sensitivity) {
        return false;
    }
    if let Some(max_cost) = request.max_cost {
        if estimated_cost(backend, request.estimated_tokens) > max_cost {
            return false;
        }
    }
    if let Some(max_latency) = request.max_latency_ms {
        if backend.avg_latency_ms > max_latency {
            return false;
        }
    }
    if request.prior_failures.contains(&backend.id) {
        return false;
    }
    true
}

fn passes_all_predicates(backend: &BackendDescriptor, request: &RouteRequest) -> bool {
    if request.has_pii && !backend.pii_allowed {
        return false;
    }
    passes_non_pii_predicates(backend, request)
}

/// Min–max normalize `value` over `[min, max]`; zero when the range is
/// degenerate (all candidates equal, including the all-free case).
fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if max > min {
        (value - min) / (max - min)
    } else {
        0.0
    }
}

/// Produce the routing plan for a request, or a typed refusal.
///
/// `descriptors` must be the registry snapshot's id-ordered list.
pub fn plan(
    descriptors: &[BackendDescriptor],
    request: &RouteRequest,
    config: &RoutingConfig,
) -> Result<RoutePlan, RouteError> {
    // PII-aware hint gate: a non-auto hint names a backend family. When
    // the request carries PII and that family exists but none of it may
    // see PII, the request is blocked rather than silently re-routed.
    if request.has_pii {
        if let Some(kind) = hint_kind(request.hint) {
            let hinted: Vec<&BackendDescriptor> =
                descriptors.iter().filter(|d| d.kind == kind).collect();
            if !hinted.is_empty() && hinted.iter().all(|d| !d.pii_allowed) {
                return Err(RouteError::PiiBlocked);
            }
        }
    }

    // Step 1: hard filter.
    let filtered: Vec<&BackendDescriptor> = descriptors
        .iter()
        .filter(|d| passes_all_predicates(d, request))
        .collect();

    if filtered.is_empty() {
        // Distinguish "PII excluded everything" from "nothing fits".
        let would_fit_without_pii = request.has_pii
            && descriptors
                .iter()
                .any(|d| passes_non_pii_predicates(d, request));
        return if would_fit_without_pii {
            Err(RouteError::PiiBlocked)
        } else {
            Err(RouteError::NoCandidates)
        };
    }

    // Step 2: apply the hint, falling back to the full candidate set when
    // the hinted family has no survivors.
    let mut hint_ignored = false;
    let candidates: Vec<&BackendDescriptor> = match hint_kind(request.hint) {
        Some(kind) => {
            let hinted: Vec<&BackendDescriptor> = filtered
                .iter()
                .copied()
                .filter(|d| d.kind == kind)
                .collect();
            if hinted.is_empty() {
                hint_ignored = true;
                filtered
            } else {
                hinted
            }
        }
        None => filtered,
    };

    // Step 3: composite score, lower is better.
    let costs: Vec<f64> = candidates
        .iter()
        .map(|d| estimated_cost(d, request.estimated_tokens))
        .collect();
    let latencies: Vec<f64> = candidates.iter().map(|d| d.avg_latency_ms).collect();
    let (cost_min, cost_max) = min_max(&costs);
    let (lat_min, lat_max) = min_max(&latencies);

    let mut scored: Vec<(f64, &BackendDescriptor)> = candidates
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let score = config.cost_weight * normalize(costs[i], cost_min, cost_max)
                + config.latency_weight * normalize(latencies[i], lat_min, lat_max)
                - config.quality_weight * d.confidence_threshold;
            (score, *d)
        })
        .collect();
    scored.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.id.cmp(&b.1.id))
    });

    // Step 4: cascade chain. Fallback confidence thresholds are
    // non-decreasing so each fallback is at least as capable as its
    // predecessor.
    let primary = scored[0].1;
    let mut chain: Vec<&BackendDescriptor> = vec![primary];
    if config.use_cascade {
        for (_, candidate) in scored.iter().skip(1) {
            if chain.len() > config.max_fallbacks {
                break;
            }
            let last = chain[chain.len() - 1];
            if candidate.confidence_threshold >= last.confidence_threshold {
                chain.push(candidate);
            }
        }
        chain.truncate(config.max_fallbacks + 1);
    }

    Ok(RoutePlan {
        candidates: chain.iter().map(|d| d.id.clone()).collect(),
        hint_ignored,
        estimated_cost: estimated_cost(primary, request.estimated_tokens),
    })
}

fn min_max(values: &[f64]) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_descriptors;

    fn request(capability: Capability, sensitivity: Sensitivity) -> RouteRequest {
        RouteRequest {
            capability,
            sensitivity,
            hint: ProcessingHint::Auto,
            max_cost: Some(1.0),
            max_latency_ms: Some(30_000.0),
            estimated_tokens: 100,
            has_pii: false,
            prior_failures: HashSet::new(),
        }
    }

    fn config() -> RoutingConfig {
        RoutingConfig::default()
    }

    #[test]
    fn test_primary_satisfies_all_filter_predicates() {
        let descriptors = default_descriptors();
        let req = request(Capability::TextGeneration, Sensitivity::Public);
        let plan = plan(&descriptors, &req, &config()).unwrap();

        let primary = descriptors
            .iter()
            .find(|d| d.id == *plan.primary())
            .expect("primary must exist in the registry");
        assert!(primary.capabilities.contains(&req.capability));
        assert!(primary.allows_sensitivity(req.sensitivity));
        assert!(
            (req.estimated_tokens as f64 / 1000.0) * primary.cost_per_1k_tokens
                <= req.max_cost.unwrap()
        );
        assert!(primary.avg_latency_ms <= req.max_latency_ms.unwrap());
        assert!(!req.prior_failures.contains(&primary.id));
    }

    #[test]
    fn test_public_text_generation_picks_small_model() {
        // With default weights the small cloud model wins: near-free,
        // fastest, decent confidence.
        let plan = plan(
            &default_descriptors(),
            &request(Capability::TextGeneration, Sensitivity::Public),
            &config(),
        )
        .unwrap();
        assert_eq!(plan.primary(), "openai:gpt-3.5-turbo");
        assert!(!plan.hint_ignored);
    }

    #[test]
    fn test_cascade_confidence_non_decreasing() {
        let descriptors = default_descriptors();
        let plan = plan(
            &descriptors,
            &request(Capability::TextGeneration, Sensitivity::Public),
            &config(),
        )
        .unwrap();
        assert!(plan.candidates.len() >= 2, "cascade expected");

        let conf = |id: &str| {
            descriptors
                .iter()
                .find(|d| d.id == id)
                .unwrap()
                .confidence_threshold
        };
        for pair in plan.candidates.windows(2) {
            assert!(conf(&pair[1]) >= conf(&pair[0]));
        }
    }

    #[test]
    fn test_cascade_disabled_returns_primary_only() {
        let cfg = RoutingConfig {
            use_cascade: false,
            ..config()
        };
        let plan = plan(
            &default_descriptors(),
            &request(Capability::TextGeneration, Sensitivity::Public),
            &cfg,
        )
        .unwrap();
        assert_eq!(plan.candidates.len(), 1);
    }

    #[test]
    fn test_pii_restricts_to_pii_allowed() {
        let mut req = request(Capability::TextGeneration, Sensitivity::Internal);
        req.has_pii = true;
        let plan = plan(&default_descriptors(), &req, &config()).unwrap();
        assert_eq!(plan.primary(), "ollama:llama2");
    }

    #[test]
    fn test_pii_with_cloud_hint_blocked() {
        // Hinted family exists (large cloud models) but none may see PII.
        let mut req = request(Capability::TextGeneration, Sensitivity::Pii);
        req.has_pii = true;
        req.hint = ProcessingHint::ModelLarge;
        assert_eq!(
            plan(&default_descriptors(), &req, &config()),
            Err(RouteError::PiiBlocked)
        );
    }

    #[test]
    fn test_pii_blocked_distinct_from_no_candidates() {
        // security_scan + PII: rule engines are pii_allowed, so this works.
        let mut req = request(Capability::SecurityScan, Sensitivity::Internal);
        req.has_pii = true;
        assert!(plan(&default_descriptors(), &req, &config()).is_ok());

        // code_generation + PII: only cloud models generate code and none
        // may see PII.
        let mut req = request(Capability::CodeGeneration, Sensitivity::Internal);
        req.has_pii = true;
        assert_eq!(
            plan(&default_descriptors(), &req, &config()),
            Err(RouteError::PiiBlocked)
        );
    }

    #[test]
    fn test_no_candidates_for_impossible_request() {
        // Nothing serves translation in the default catalog.
        let req = request(Capability::Translation, Sensitivity::Public);
        assert_eq!(
            plan(&default_descriptors(), &req, &config()),
            Err(RouteError::NoCandidates)
        );
    }

    #[test]
    fn test_confidential_rejected_without_opt_in() {
        let req = request(Capability::TextGeneration, Sensitivity::Confidential);
        assert_eq!(
            plan(&default_descriptors(), &req, &config()),
            Err(RouteError::NoCandidates)
        );
    }

    #[test]
    fn test_hint_respected_when_satisfiable() {
        let mut req = request(Capability::TextGeneration, Sensitivity::Public);
        req.hint = ProcessingHint::ModelLarge;
        let plan = plan(&default_descriptors(), &req, &config()).unwrap();
        assert!(!plan.hint_ignored);
        assert!(plan.primary() == "openai:gpt-4" || plan.primary() == "anthropic:claude-3-opus");
    }

    #[test]
    fn test_hint_ignored_when_family_absent() {
        // No hybrid backend in the default catalog.
        let mut req = request(Capability::TextGeneration, Sensitivity::Public);
        req.hint = ProcessingHint::Hybrid;
        let plan = plan(&default_descriptors(), &req, &config()).unwrap();
        assert!(plan.hint_ignored);
        assert_eq!(plan.primary(), "openai:gpt-3.5-turbo");
    }

    #[test]
    fn test_prior_failures_excluded() {
        let mut req = request(Capability::TextGeneration, Sensitivity::Public);
        req.prior_failures.insert("openai:gpt-3.5-turbo".to_string());
        let plan = plan(&default_descriptors(), &req, &config()).unwrap();
        assert_ne!(plan.primary(), "openai:gpt-3.5-turbo");
    }

    #[test]
    fn test_cost_ceiling_filters_expensive_backends() {
        let mut req = request(Capability::TextGeneration, Sensitivity::Public);
        req.estimated_tokens = 1000;
        req.max_cost = Some(0.01); // gpt-4 would cost 0.03
        let plan = plan(&default_descriptors(), &req, &config()).unwrap();
        assert!(!plan.candidates.contains(&"openai:gpt-4".to_string()));
    }

    #[test]
    fn test_latency_ceiling_filters_slow_backends() {
        let mut req = request(Capability::TextGeneration, Sensitivity::Public);
        req.max_latency_ms = Some(1000.0);
        let plan = plan(&default_descriptors(), &req, &config()).unwrap();
        assert_eq!(plan.primary(), "openai:gpt-3.5-turbo");
        assert_eq!(plan.candidates.len(), 1);
    }

    #[test]
    fn test_lexicographic_tie_break() {
        let mk = |id: &str| BackendDescriptor {
            id: id.to_string(),
            kind: BackendKind::LlmSmall,
            capabilities: [Capability::TextGeneration].into_iter().collect(),
            cost_per_1k_tokens: 0.001,
            avg_latency_ms: 100.0,
            max_tokens: 4096,
            confidence_threshold: 0.8,
            pii_allowed: false,
            confidential_allowed: false,
            sensitivity_allowed: [Sensitivity::Public].into_iter().collect(),
        };
        // Identical scores: the plan must order by id.
        let descriptors = vec![mk("zeta:model"), mk("alpha:model"), mk("mid:model")];
        let plan = plan(
            &descriptors,
            &request(Capability::TextGeneration, Sensitivity::Public),
            &config(),
        )
        .unwrap();
        assert_eq!(plan.primary(), "alpha:model");
        assert_eq!(
            plan.candidates,
            vec!["alpha:model", "mid:model", "zeta:model"]
        );
    }

    #[test]
    fn test_all_free_backends_latency_dominates() {
        let mk = |id: &str, latency: f64| BackendDescriptor {
            id: id.to_string(),
            kind: BackendKind::RuleEngine,
            capabilities: [Capability::SecurityScan].into_iter().collect(),
            cost_per_1k_tokens: 0.0,
            avg_latency_ms: latency,
            max_tokens: 100_000,
            confidence_threshold: 0.85,
            pii_allowed: true,
            confidential_allowed: false,
            sensitivity_allowed: [Sensitivity::Public].into_iter().collect(),
        };
        let descriptors = vec![mk("rules:slow", 500.0), mk("rules:fast", 10.0)];
        let plan = plan(
            &descriptors,
            &request(Capability::SecurityScan, Sensitivity::Public),
            &config(),
        )
        .unwrap();
        assert_eq!(plan.primary(), "rules:fast");
    }

    #[test]
    fn test_max_fallbacks_bound() {
        let cfg = RoutingConfig {
            max_fallbacks: 0,
            ..config()
        };
        let plan = plan(
            &default_descriptors(),
            &request(Capability::TextGeneration, Sensitivity::Public),
            &cfg,
        )
        .unwrap();
        assert_eq!(plan.candidates.len(), 1);
    }
}
