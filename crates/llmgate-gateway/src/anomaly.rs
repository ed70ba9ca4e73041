//! Anomaly detection.
//!
//! Two evaluation modes: event-local checks run synchronously against the
//! new event plus a recent per-model history slice; pattern-level checks
//! run over sliding windows when the pipeline flushes.

use llmgate_core::config::AnomalyConfig;
use llmgate_core::{Anomaly, AnomalySeverity, AnomalyType, GatewayEvent};
use std::collections::HashMap;

/// Threshold- and statistics-based anomaly detector.
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    // -- event-local ---------------------------------------------------------

    /// Analyze a single event. `history` is the recent slice for the same
    /// model (spike baselines are per-model, not global).
    pub fn analyze_event(&self, event: &GatewayEvent, history: &[GatewayEvent]) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        if event.cost_usd > self.config.cost_threshold_usd {
            anomalies.push(
                Anomaly::for_event(
                    event.event_id,
                    AnomalyType::HighCost,
                    AnomalySeverity::High,
                    format!(
                        "Request cost ${:.4} exceeds threshold ${:.2}",
                        event.cost_usd, self.config.cost_threshold_usd
                    ),
                    "Review model usage and consider a cheaper backend",
                )
                .with_detail("cost_usd", format!("{:.6}", event.cost_usd))
                .with_detail(
                    "threshold",
                    format!("{:.2}", self.config.cost_threshold_usd),
                ),
            );
        }

        if event.latency_ms > self.config.latency_threshold_ms {
            anomalies.push(
                Anomaly::for_event(
                    event.event_id,
                    AnomalyType::HighLatency,
                    AnomalySeverity::Medium,
                    format!(
                        "Request latency {}ms exceeds threshold {}ms",
                        event.latency_ms, self.config.latency_threshold_ms
                    ),
                    "Check backend service status and network conditions",
                )
                .with_detail("latency_ms", event.latency_ms.to_string()),
            );
        }

        if event.tokens.total_tokens > self.config.token_threshold {
            anomalies.push(
                Anomaly::for_event(
                    event.event_id,
                    AnomalyType::HighTokens,
                    AnomalySeverity::Medium,
                    format!(
                        "Token usage {} exceeds threshold {}",
                        event.tokens.total_tokens, self.config.token_threshold
                    ),
                    "Review prompt size and enforce token limits",
                )
                .with_detail("total_tokens", event.tokens.total_tokens.to_string()),
            );
        }

        if event.has_pii {
            anomalies.push(
                Anomaly::for_event(
                    event.event_id,
                    AnomalyType::PiiDetected,
                    AnomalySeverity::High,
                    "Personally identifiable information detected",
                    "Review data handling policies for the source application",
                )
                .with_detail("pii_types", event.pii_types.join(",")),
            );
        }

        if event.injection_detected {
            anomalies.push(Anomaly::for_event(
                event.event_id,
                AnomalyType::PromptInjection,
                AnomalySeverity::Critical,
                "Potential prompt injection attack detected",
                "Review source application input validation and filtering",
            ));
        }

        if !event.success {
            let mut anomaly = Anomaly::for_event(
                event.event_id,
                AnomalyType::RequestFailure,
                AnomalySeverity::High,
                "Request failed",
                "Check error logs and backend credentials",
            );
            if let Some(code) = event.error_code {
                anomaly = anomaly.with_detail("error_code", code.to_string());
            }
            anomalies.push(anomaly);
        }

        // Spike checks against the per-model baseline.
        if history.len() >= self.config.spike_min_samples {
            let costs: Vec<f64> = history.iter().map(|e| e.cost_usd).collect();
            if let Some(mean_cost) = mean(&costs) {
                if mean_cost > 0.0 && event.cost_usd > mean_cost * self.config.spike_multiplier {
                    anomalies.push(
                        Anomaly::for_event(
                            event.event_id,
                            AnomalyType::CostSpike,
                            AnomalySeverity::High,
                            format!(
                                "Cost spike: ${:.4} vs model average ${:.4}",
                                event.cost_usd, mean_cost
                            ),
                            "Investigate unusual activity on this model",
                        )
                        .with_detail("current_cost", format!("{:.6}", event.cost_usd))
                        .with_detail("average_cost", format!("{mean_cost:.6}"))
                        .with_detail("model", event.model.clone()),
                    );
                }
            }

            let latencies: Vec<f64> = history.iter().map(|e| e.latency_ms as f64).collect();
            if let Some(mean_latency) = mean(&latencies) {
                if mean_latency > 0.0
                    && event.latency_ms as f64 > mean_latency * self.config.spike_multiplier
                {
                    anomalies.push(
                        Anomaly::for_event(
                            event.event_id,
                            AnomalyType::LatencySpike,
                            AnomalySeverity::Medium,
                            format!(
                                "Latency spike: {}ms vs model average {:.0}ms",
                                event.latency_ms, mean_latency
                            ),
                            "Monitor backend performance",
                        )
                        .with_detail("current_latency_ms", event.latency_ms.to_string())
                        .with_detail("average_latency_ms", format!("{mean_latency:.1}")),
                    );
                }
            }
        }

        anomalies
    }

    // -- pattern-level -------------------------------------------------------

    /// Analyze sliding windows of events.
    ///
    /// `short_window` holds events from the last `pattern_window_minutes`
    /// (global error rate, request rate); `hourly_window` holds the last
    /// hour (cost rate, per-model error rates).
    pub fn analyze_patterns(
        &self,
        short_window: &[GatewayEvent],
        hourly_window: &[GatewayEvent],
    ) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        // Global error rate over the short window.
        if short_window.len() >= self.config.pattern_min_events {
            let failed = short_window.iter().filter(|e| !e.success).count();
            let error_rate = failed as f64 / short_window.len() as f64;
            if error_rate > self.config.error_rate_threshold {
                anomalies.push(
                    Anomaly::for_pattern(
                        AnomalyType::HighErrorRate,
                        AnomalySeverity::Critical,
                        format!(
                            "High error rate: {:.1}% over the last {} minutes",
                            error_rate * 100.0,
                            self.config.pattern_window_minutes
                        ),
                        "Check backend status and investigate the root cause",
                    )
                    .with_detail("error_rate", format!("{error_rate:.4}"))
                    .with_detail("total_requests", short_window.len().to_string())
                    .with_detail("failed_requests", failed.to_string()),
                );
            }
        }

        // Global request rate over the short window.
        if self.config.pattern_window_minutes > 0 {
            let per_minute =
                short_window.len() as f64 / self.config.pattern_window_minutes as f64;
            if per_minute > self.config.request_rate_per_minute {
                anomalies.push(
                    Anomaly::for_pattern(
                        AnomalyType::HighRequestRate,
                        AnomalySeverity::Medium,
                        format!("Unusual request rate: {per_minute:.1} req/min"),
                        "Check for runaway clients",
                    )
                    .with_detail("requests_per_minute", format!("{per_minute:.1}")),
                );
            }
        }

        // Global cost rate over the hourly window.
        let hourly_cost: f64 = hourly_window.iter().map(|e| e.cost_usd).sum();
        if hourly_cost > self.config.cost_rate_per_hour {
            anomalies.push(
                Anomaly::for_pattern(
                    AnomalyType::HighCostRate,
                    AnomalySeverity::High,
                    format!("High cost rate: ${hourly_cost:.2}/hour"),
                    "Review usage and tighten cost ceilings",
                )
                .with_detail("hourly_cost_usd", format!("{hourly_cost:.4}")),
            );
        }

        // Per-model error rates over the hourly window.
        let mut totals: HashMap<&str, (usize, usize)> = HashMap::new();
        for event in hourly_window {
            let entry = totals.entry(event.model.as_str()).or_insert((0, 0));
            entry.0 += 1;
            if !event.success {
                entry.1 += 1;
            }
        }
        for (model, (total, failed)) in totals {
            if total < self.config.model_min_samples {
                continue;
            }
            let error_rate = failed as f64 / total as f64;
            if error_rate > self.config.model_error_rate_threshold {
                anomalies.push(
                    Anomaly::for_pattern(
                        AnomalyType::ModelErrors,
                        AnomalySeverity::High,
                        format!(
                            "High error rate for model {model}: {:.1}%",
                            error_rate * 100.0
                        ),
                        format!("Check {model} availability or switch to a backup backend"),
                    )
                    .with_detail("model", model.to_string())
                    .with_detail("error_rate", format!("{error_rate:.4}"))
                    .with_detail("errors", failed.to_string())
                    .with_detail("total", total.to_string()),
                );
            }
        }

        anomalies
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use llmgate_core::{ErrorCode, RiskLevel, TokenUsage};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(AnomalyConfig::default())
    }

    fn event(model: &str, cost: f64, latency: u64, success: bool) -> GatewayEvent {
        GatewayEvent {
            event_id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            principal_hash: "h".to_string(),
            provider: "openai".to_string(),
            model: model.to_string(),
            prompt_fingerprint: "fp".to_string(),
            response_fingerprint: None,
            latency_ms: latency,
            tokens: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 10,
                total_tokens: 20,
            },
            cost_usd: cost,
            success,
            error_code: (!success).then_some(ErrorCode::BackendError),
            has_pii: false,
            pii_types: Vec::new(),
            injection_detected: false,
            risk_level: RiskLevel::Low,
            metadata: HashMap::new(),
        }
    }

    fn types(anomalies: &[Anomaly]) -> Vec<AnomalyType> {
        anomalies.iter().map(|a| a.anomaly_type).collect()
    }

    // -- event-local ---------------------------------------------------------

    #[test]
    fn test_clean_event_no_anomalies() {
        let anomalies = detector().analyze_event(&event("m", 0.01, 100, true), &[]);
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_high_cost() {
        let anomalies = detector().analyze_event(&event("m", 0.75, 100, true), &[]);
        assert_eq!(types(&anomalies), vec![AnomalyType::HighCost]);
        assert_eq!(anomalies[0].severity, AnomalySeverity::High);
    }

    #[test]
    fn test_high_latency() {
        let anomalies = detector().analyze_event(&event("m", 0.01, 6000, true), &[]);
        assert_eq!(types(&anomalies), vec![AnomalyType::HighLatency]);
        assert_eq!(anomalies[0].severity, AnomalySeverity::Medium);
    }

    #[test]
    fn test_high_tokens() {
        let mut e = event("m", 0.01, 100, true);
        e.tokens.total_tokens = 9000;
        let anomalies = detector().analyze_event(&e, &[]);
        assert_eq!(types(&anomalies), vec![AnomalyType::HighTokens]);
    }

    #[test]
    fn test_pii_detected_is_high() {
        let mut e = event("m", 0.01, 100, true);
        e.has_pii = true;
        e.pii_types = vec!["email".to_string()];
        let anomalies = detector().analyze_event(&e, &[]);
        assert_eq!(types(&anomalies), vec![AnomalyType::PiiDetected]);
        assert_eq!(anomalies[0].severity, AnomalySeverity::High);
        assert_eq!(anomalies[0].details.get("pii_types").unwrap(), "email");
    }

    #[test]
    fn test_injection_is_critical() {
        let mut e = event("m", 0.01, 100, true);
        e.injection_detected = true;
        let anomalies = detector().analyze_event(&e, &[]);
        assert_eq!(types(&anomalies), vec![AnomalyType::PromptInjection]);
        assert_eq!(anomalies[0].severity, AnomalySeverity::Critical);
    }

    #[test]
    fn test_request_failure_is_high() {
        let anomalies = detector().analyze_event(&event("m", 0.01, 100, false), &[]);
        assert_eq!(types(&anomalies), vec![AnomalyType::RequestFailure]);
        assert_eq!(
            anomalies[0].details.get("error_code").unwrap(),
            "BACKEND_ERROR"
        );
    }

    #[test]
    fn test_cost_spike_with_baseline() {
        let history: Vec<GatewayEvent> =
            (0..10).map(|_| event("m", 0.01, 100, true)).collect();
        // 0.10 ≥ 3 × 0.01 mean.
        let anomalies = detector().analyze_event(&event("m", 0.10, 100, true), &history);
        assert!(types(&anomalies).contains(&AnomalyType::CostSpike));
        let spike = anomalies
            .iter()
            .find(|a| a.anomaly_type == AnomalyType::CostSpike)
            .unwrap();
        assert_eq!(spike.severity, AnomalySeverity::High);
    }

    #[test]
    fn test_no_spike_without_enough_samples() {
        let history: Vec<GatewayEvent> = (0..4).map(|_| event("m", 0.01, 100, true)).collect();
        let anomalies = detector().analyze_event(&event("m", 0.10, 100, true), &history);
        assert!(!types(&anomalies).contains(&AnomalyType::CostSpike));
    }

    #[test]
    fn test_no_spike_for_stable_values() {
        let history: Vec<GatewayEvent> =
            (0..10).map(|_| event("m", 0.01, 100, true)).collect();
        let anomalies = detector().analyze_event(&event("m", 0.02, 100, true), &history);
        assert!(!types(&anomalies).contains(&AnomalyType::CostSpike));
    }

    #[test]
    fn test_latency_spike() {
        let history: Vec<GatewayEvent> =
            (0..10).map(|_| event("m", 0.01, 100, true)).collect();
        let anomalies = detector().analyze_event(&event("m", 0.01, 400, true), &history);
        assert!(types(&anomalies).contains(&AnomalyType::LatencySpike));
    }

    // -- pattern-level -------------------------------------------------------

    #[test]
    fn test_high_error_rate_pattern() {
        let mut window: Vec<GatewayEvent> =
            (0..9).map(|_| event("m", 0.01, 100, true)).collect();
        window.extend((0..3).map(|_| event("m", 0.01, 100, false)));
        // 3/12 = 25% > 10% over ≥ 10 events.
        let anomalies = detector().analyze_patterns(&window, &window);
        assert!(types(&anomalies).contains(&AnomalyType::HighErrorRate));
        let pattern = anomalies
            .iter()
            .find(|a| a.anomaly_type == AnomalyType::HighErrorRate)
            .unwrap();
        assert_eq!(pattern.severity, AnomalySeverity::Critical);
        assert!(pattern.event_id.is_none());
    }

    #[test]
    fn test_error_rate_needs_min_events() {
        let window: Vec<GatewayEvent> = (0..5).map(|_| event("m", 0.01, 100, false)).collect();
        let anomalies = detector().analyze_patterns(&window, &[]);
        assert!(!types(&anomalies).contains(&AnomalyType::HighErrorRate));
    }

    #[test]
    fn test_high_request_rate_pattern() {
        // 5-minute window: 300 events → 60/min > 50/min.
        let window: Vec<GatewayEvent> =
            (0..300).map(|_| event("m", 0.0, 100, true)).collect();
        let anomalies = detector().analyze_patterns(&window, &[]);
        assert!(types(&anomalies).contains(&AnomalyType::HighRequestRate));
    }

    #[test]
    fn test_high_cost_rate_pattern() {
        let hourly: Vec<GatewayEvent> =
            (0..60).map(|_| event("m", 0.25, 100, true)).collect();
        // $15/hour > $10/hour.
        let anomalies = detector().analyze_patterns(&[], &hourly);
        assert!(types(&anomalies).contains(&AnomalyType::HighCostRate));
    }

    #[test]
    fn test_model_errors_per_model_window() {
        let mut hourly: Vec<GatewayEvent> =
            (0..5).map(|_| event("flaky", 0.01, 100, false)).collect();
        hourly.extend((0..20).map(|_| event("stable", 0.01, 100, true)));

        let anomalies = detector().analyze_patterns(&[], &hourly);
        let model_errors: Vec<&Anomaly> = anomalies
            .iter()
            .filter(|a| a.anomaly_type == AnomalyType::ModelErrors)
            .collect();
        assert_eq!(model_errors.len(), 1);
        assert_eq!(model_errors[0].details.get("model").unwrap(), "flaky");
    }

    #[test]
    fn test_model_errors_needs_min_samples() {
        let hourly: Vec<GatewayEvent> =
            (0..4).map(|_| event("flaky", 0.01, 100, false)).collect();
        let anomalies = detector().analyze_patterns(&[], &hourly);
        assert!(!types(&anomalies).contains(&AnomalyType::ModelErrors));
    }
}
