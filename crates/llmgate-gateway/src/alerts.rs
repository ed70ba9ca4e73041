//! Alert emitter.
//!
//! Anomalies at or above the configured severity become structured alert
//! records dispatched to the configured channels. Delivery is
//! fire-and-forget: a slow or failing channel never blocks persistence.

use async_trait::async_trait;
use llmgate_core::config::AlertsConfig;
use llmgate_core::{Anomaly, AnomalySeverity};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Structured record handed to every channel.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub anomaly_id: Uuid,
    pub event_id: Option<Uuid>,
    pub timestamp: String,
    pub anomaly_type: String,
    pub severity: String,
    pub description: String,
    pub recommended_action: String,
}

impl AlertRecord {
    fn from_anomaly(anomaly: &Anomaly) -> Self {
        Self {
            anomaly_id: anomaly.anomaly_id,
            event_id: anomaly.event_id,
            timestamp: anomaly.timestamp.to_rfc3339(),
            anomaly_type: anomaly.anomaly_type.to_string(),
            severity: anomaly.severity.to_string(),
            description: anomaly.description.clone(),
            recommended_action: anomaly.recommended_action.clone(),
        }
    }
}

/// Errors from a channel delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Channel error: {0}")]
    Channel(String),
}

/// One alert delivery mechanism.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send_alert(&self, alert: &AlertRecord) -> Result<(), AlertError>;
    fn channel_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// StderrChannel — the default sink
// ---------------------------------------------------------------------------

/// Writes one JSON line per alert to stderr.
pub struct StderrChannel;

#[async_trait]
impl AlertChannel for StderrChannel {
    async fn send_alert(&self, alert: &AlertRecord) -> Result<(), AlertError> {
        let line = serde_json::to_string(alert)
            .map_err(|e| AlertError::Channel(format!("serialization failed: {e}")))?;
        eprintln!("{line}");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "stderr"
    }
}

// ---------------------------------------------------------------------------
// WebhookChannel — generic HTTP POST
// ---------------------------------------------------------------------------

/// Posts the alert as JSON to an arbitrary URL.
pub struct WebhookChannel {
    url: String,
    client: Client,
}

impl WebhookChannel {
    pub fn new(url: String, client: Client) -> Self {
        Self { url, client }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    async fn send_alert(&self, alert: &AlertRecord) -> Result<(), AlertError> {
        let resp = self.client.post(&self.url).json(alert).send().await?;
        if !resp.status().is_success() {
            error!(
                channel = "webhook",
                status = %resp.status(),
                url = %self.url,
                "Webhook alert delivery failed"
            );
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

// ---------------------------------------------------------------------------
// AlertEmitter
// ---------------------------------------------------------------------------

/// Filters anomalies by severity and dispatches alerts to all channels.
pub struct AlertEmitter {
    min_severity: AnomalySeverity,
    channels: Vec<Arc<dyn AlertChannel>>,
}

impl AlertEmitter {
    /// Build from configuration. Returns `None` when alerting is disabled.
    /// Stderr is always present; a webhook channel is added when
    /// configured.
    pub fn from_config(config: &AlertsConfig, client: Client) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let mut channels: Vec<Arc<dyn AlertChannel>> = vec![Arc::new(StderrChannel)];
        if let Some(url) = config.webhook_url.as_ref().filter(|u| !u.is_empty()) {
            channels.push(Arc::new(WebhookChannel::new(url.clone(), client)));
        }
        Some(Self {
            min_severity: config.min_severity,
            channels,
        })
    }

    /// Emitter over explicit channels (tests, embedding).
    pub fn with_channels(
        min_severity: AnomalySeverity,
        channels: Vec<Arc<dyn AlertChannel>>,
    ) -> Self {
        Self {
            min_severity,
            channels,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Dispatch an anomaly to every channel as a spawned task.
    pub fn emit(&self, anomaly: &Anomaly) {
        if anomaly.severity < self.min_severity {
            return;
        }
        let record = AlertRecord::from_anomaly(anomaly);
        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let record = record.clone();
            tokio::spawn(async move {
                let name = channel.channel_name().to_string();
                if let Err(e) = channel.send_alert(&record).await {
                    error!(channel = %name, "Alert delivery failed: {e}");
                } else {
                    debug!(channel = %name, anomaly_id = %record.anomaly_id, "Alert delivered");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_core::AnomalyType;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Channel that captures alerts for assertions.
    struct CapturingChannel {
        received: Arc<Mutex<Vec<AlertRecord>>>,
    }

    #[async_trait]
    impl AlertChannel for CapturingChannel {
        async fn send_alert(&self, alert: &AlertRecord) -> Result<(), AlertError> {
            self.received
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(alert.clone());
            Ok(())
        }

        fn channel_name(&self) -> &str {
            "capturing"
        }
    }

    fn capturing_emitter(
        min_severity: AnomalySeverity,
    ) -> (AlertEmitter, Arc<Mutex<Vec<AlertRecord>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let channel = Arc::new(CapturingChannel {
            received: Arc::clone(&received),
        });
        (
            AlertEmitter::with_channels(min_severity, vec![channel]),
            received,
        )
    }

    fn anomaly(severity: AnomalySeverity) -> Anomaly {
        Anomaly::for_pattern(
            AnomalyType::HighErrorRate,
            severity,
            "test anomaly",
            "none",
        )
    }

    #[test]
    fn test_disabled_config_returns_none() {
        let config = AlertsConfig {
            enabled: false,
            ..AlertsConfig::default()
        };
        assert!(AlertEmitter::from_config(&config, Client::new()).is_none());
    }

    #[test]
    fn test_default_config_has_stderr_channel() {
        let emitter = AlertEmitter::from_config(&AlertsConfig::default(), Client::new()).unwrap();
        assert_eq!(emitter.channel_count(), 1);
    }

    #[test]
    fn test_webhook_adds_channel() {
        let config = AlertsConfig {
            webhook_url: Some("https://example.com/hook".to_string()),
            ..AlertsConfig::default()
        };
        let emitter = AlertEmitter::from_config(&config, Client::new()).unwrap();
        assert_eq!(emitter.channel_count(), 2);
    }

    #[tokio::test]
    async fn test_severity_filter() {
        let (emitter, received) = capturing_emitter(AnomalySeverity::High);

        emitter.emit(&anomaly(AnomalySeverity::Medium));
        emitter.emit(&anomaly(AnomalySeverity::High));
        emitter.emit(&anomaly(AnomalySeverity::Critical));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let alerts = received.lock().unwrap();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.severity != "medium"));
    }

    #[tokio::test]
    async fn test_alert_record_shape() {
        let (emitter, received) = capturing_emitter(AnomalySeverity::Medium);
        let source = anomaly(AnomalySeverity::Critical);
        emitter.emit(&source);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let alerts = received.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].anomaly_id, source.anomaly_id);
        assert_eq!(alerts[0].anomaly_type, "high_error_rate");
        assert_eq!(alerts[0].severity, "critical");
    }
}
