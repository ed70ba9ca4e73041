//! Event enrichment and risk scoring.
//!
//! The first pipeline stage: a pure function over one event. The risk
//! score is additive over the event's flags and maps onto the four risk
//! levels.

use llmgate_core::{GatewayEvent, RiskLevel};

/// Flag weights. Fixed by the event contract, not configuration.
const WEIGHT_FAILURE: u32 = 3;
const WEIGHT_INJECTION: u32 = 4;
const WEIGHT_PII: u32 = 2;
const WEIGHT_SLOW: u32 = 1;
const WEIGHT_TOKEN_HEAVY: u32 = 1;
const WEIGHT_EXPENSIVE: u32 = 2;

const SLOW_LATENCY_MS: u64 = 10_000;
const TOKEN_HEAVY_TOTAL: u32 = 10_000;
const EXPENSIVE_COST_USD: f64 = 1.0;

/// Compute the additive risk score for an event.
fn risk_score(event: &GatewayEvent) -> u32 {
    let mut score = 0;
    if !event.success {
        score += WEIGHT_FAILURE;
    }
    if event.injection_detected {
        score += WEIGHT_INJECTION;
    }
    if event.has_pii {
        score += WEIGHT_PII;
    }
    if event.latency_ms > SLOW_LATENCY_MS {
        score += WEIGHT_SLOW;
    }
    if event.tokens.total_tokens > TOKEN_HEAVY_TOTAL {
        score += WEIGHT_TOKEN_HEAVY;
    }
    if event.cost_usd > EXPENSIVE_COST_USD {
        score += WEIGHT_EXPENSIVE;
    }
    score
}

/// Map a risk score onto a level.
fn level_for(score: u32) -> RiskLevel {
    match score {
        s if s >= 5 => RiskLevel::Critical,
        s if s >= 3 => RiskLevel::High,
        s if s >= 1 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

/// Derive the risk level for an event.
pub fn assess_risk(event: &GatewayEvent) -> RiskLevel {
    level_for(risk_score(event))
}

/// Enrich an event in place with its derived risk level.
pub fn enrich(mut event: GatewayEvent) -> GatewayEvent {
    event.risk_level = assess_risk(&event);
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use llmgate_core::TokenUsage;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn base_event() -> GatewayEvent {
        GatewayEvent {
            event_id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            principal_hash: "h".to_string(),
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            prompt_fingerprint: "fp".to_string(),
            response_fingerprint: None,
            latency_ms: 100,
            tokens: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 10,
                total_tokens: 20,
            },
            cost_usd: 0.01,
            success: true,
            error_code: None,
            has_pii: false,
            pii_types: Vec::new(),
            injection_detected: false,
            risk_level: RiskLevel::Low,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_clean_event_is_low() {
        assert_eq!(assess_risk(&base_event()), RiskLevel::Low);
    }

    #[test]
    fn test_pii_alone_is_medium() {
        let mut event = base_event();
        event.has_pii = true; // score 2
        assert_eq!(assess_risk(&event), RiskLevel::Medium);
    }

    #[test]
    fn test_failure_alone_is_high() {
        let mut event = base_event();
        event.success = false; // score 3
        assert_eq!(assess_risk(&event), RiskLevel::High);
    }

    #[test]
    fn test_injection_alone_is_high() {
        let mut event = base_event();
        event.injection_detected = true; // score 4
        assert_eq!(assess_risk(&event), RiskLevel::High);
    }

    #[test]
    fn test_injection_plus_pii_is_critical() {
        let mut event = base_event();
        event.injection_detected = true;
        event.has_pii = true; // score 6
        assert_eq!(assess_risk(&event), RiskLevel::Critical);
    }

    #[test]
    fn test_slow_token_heavy_expensive_accumulate() {
        let mut event = base_event();
        event.latency_ms = 12_000; // +1
        event.tokens.total_tokens = 15_000; // +1
        event.cost_usd = 2.0; // +2 → 4 total
        assert_eq!(assess_risk(&event), RiskLevel::High);
    }

    #[test]
    fn test_thresholds_are_exclusive() {
        let mut event = base_event();
        event.latency_ms = 10_000; // exactly at the boundary: no points
        event.tokens.total_tokens = 10_000;
        event.cost_usd = 1.0;
        assert_eq!(assess_risk(&event), RiskLevel::Low);
    }

    #[test]
    fn test_risk_monotone_in_flags() {
        // Adding a risk-raising flag never lowers the level.
        let flags: Vec<Box<dyn Fn(&mut GatewayEvent)>> = vec![
            Box::new(|e| e.success = false),
            Box::new(|e| e.injection_detected = true),
            Box::new(|e| e.has_pii = true),
            Box::new(|e| e.latency_ms = 20_000),
            Box::new(|e| e.tokens.total_tokens = 20_000),
            Box::new(|e| e.cost_usd = 5.0),
        ];

        for (i, flag) in flags.iter().enumerate() {
            let mut with_one = base_event();
            flag(&mut with_one);
            let single = assess_risk(&with_one);
            assert!(single >= assess_risk(&base_event()));

            for (j, other) in flags.iter().enumerate() {
                if i == j {
                    continue;
                }
                let mut with_two = base_event();
                flag(&mut with_two);
                other(&mut with_two);
                assert!(
                    assess_risk(&with_two) >= single,
                    "flag {j} on top of {i} lowered the level"
                );
            }
        }
    }

    #[test]
    fn test_enrich_sets_level() {
        let mut event = base_event();
        event.injection_detected = true;
        event.has_pii = true;
        let enriched = enrich(event);
        assert_eq!(enriched.risk_level, RiskLevel::Critical);
    }
}
