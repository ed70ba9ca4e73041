//! In-memory event store for tests and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use llmgate_core::{
    Anomaly, AnomalySeverity, EventStats, EventStore, GatewayEvent, Result,
};
use std::time::Duration;
use tokio::sync::RwLock;

/// Volatile [`EventStore`] backed by vectors behind an async lock.
pub struct InMemoryEventStore {
    events: RwLock<Vec<GatewayEvent>>,
    anomalies: RwLock<Vec<Anomaly>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            anomalies: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert_event(&self, event: &GatewayEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn insert_anomaly(&self, anomaly: &Anomaly) -> Result<()> {
        self.anomalies.write().await.push(anomaly.clone());
        Ok(())
    }

    async fn recent_events(&self, limit: u32) -> Result<Vec<GatewayEvent>> {
        let events = self.events.read().await;
        let mut sorted: Vec<GatewayEvent> = events.clone();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        sorted.truncate(limit as usize);
        Ok(sorted)
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<GatewayEvent>> {
        let events = self.events.read().await;
        let mut filtered: Vec<GatewayEvent> = events
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect();
        filtered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(filtered)
    }

    async fn events_for_model_since(
        &self,
        model: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<GatewayEvent>> {
        let events = self.events.read().await;
        let mut filtered: Vec<GatewayEvent> = events
            .iter()
            .filter(|e| e.model == model && e.timestamp >= since)
            .cloned()
            .collect();
        filtered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(filtered)
    }

    async fn anomalies_with_min_severity(
        &self,
        min_severity: AnomalySeverity,
        limit: u32,
    ) -> Result<Vec<Anomaly>> {
        let anomalies = self.anomalies.read().await;
        let mut filtered: Vec<Anomaly> = anomalies
            .iter()
            .filter(|a| a.severity >= min_severity)
            .cloned()
            .collect();
        filtered.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        filtered.truncate(limit as usize);
        Ok(filtered)
    }

    async fn stats(&self, window: Duration) -> Result<EventStats> {
        let since = Utc::now()
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());

        let events = self.events.read().await;
        let windowed: Vec<&GatewayEvent> =
            events.iter().filter(|e| e.timestamp >= since).collect();

        let total_events = windowed.len() as u64;
        let successful = windowed.iter().filter(|e| e.success).count() as u64;
        let latencies: Vec<u64> = windowed.iter().map(|e| e.latency_ms).collect();
        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };

        let anomalies = self.anomalies.read().await;
        let anomaly_count = anomalies.iter().filter(|a| a.timestamp >= since).count() as u64;

        Ok(EventStats {
            total_events,
            successful,
            failed: total_events - successful,
            total_tokens: windowed.iter().map(|e| e.tokens.total_tokens as u64).sum(),
            total_cost_usd: windowed.iter().map(|e| e.cost_usd).sum(),
            avg_latency_ms,
            max_latency_ms: latencies.iter().copied().max().unwrap_or(0),
            pii_events: windowed.iter().filter(|e| e.has_pii).count() as u64,
            injection_events: windowed.iter().filter(|e| e.injection_detected).count() as u64,
            anomaly_count,
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
