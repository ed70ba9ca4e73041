//! Append-only audit sink.
//!
//! Writes one NDJSON record per audited action. Principal identifiers are
//! hashed before they get here and no record ever carries raw prompt or
//! response text — PII appears only as type names.

use chrono::Utc;
use llmgate_core::config::AuditConfig;
use llmgate_core::{AuditEventType, AuditOutcome, AuditRecord, GatewayError, Result};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

enum AuditTarget {
    /// NDJSON file, appends serialized by the mutex.
    File(Mutex<File>),
    /// Fallback sink.
    Stderr,
    /// Capturing sink for tests and introspection.
    Memory(Mutex<Vec<AuditRecord>>),
    /// Auditing disabled.
    Disabled,
}

/// The gateway's audit log.
pub struct AuditLog {
    target: AuditTarget,
}

impl AuditLog {
    /// Build from configuration: file sink when a path is set, stderr
    /// otherwise.
    pub fn from_config(config: &AuditConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Self {
                target: AuditTarget::Disabled,
            });
        }
        let target = match &config.log_file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| {
                        GatewayError::Config(format!("Cannot open audit log '{path}': {e}"))
                    })?;
                AuditTarget::File(Mutex::new(file))
            }
            None => AuditTarget::Stderr,
        };
        Ok(Self { target })
    }

    /// In-memory sink; records are retrievable via [`AuditLog::records`].
    pub fn memory() -> Self {
        Self {
            target: AuditTarget::Memory(Mutex::new(Vec::new())),
        }
    }

    /// Append one record. Best-effort: a failing sink logs a warning and
    /// never fails the request path.
    pub fn record(&self, record: AuditRecord) {
        match &self.target {
            AuditTarget::Disabled => {}
            AuditTarget::Memory(records) => {
                records
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(record);
            }
            AuditTarget::Stderr => match serde_json::to_string(&record) {
                Ok(line) => eprintln!("{line}"),
                Err(e) => warn!("Failed to serialize audit record: {e}"),
            },
            AuditTarget::File(file) => match serde_json::to_string(&record) {
                Ok(line) => {
                    let mut guard = file.lock().unwrap_or_else(|p| p.into_inner());
                    if let Err(e) = writeln!(guard, "{line}") {
                        warn!("Failed to write audit record: {e}");
                    }
                }
                Err(e) => warn!("Failed to serialize audit record: {e}"),
            },
        }
    }

    /// Records captured by the memory sink. Empty for other targets.
    pub fn records(&self) -> Vec<AuditRecord> {
        match &self.target {
            AuditTarget::Memory(records) => {
                records.lock().unwrap_or_else(|p| p.into_inner()).clone()
            }
            _ => Vec::new(),
        }
    }

    // -- record constructors -------------------------------------------------

    /// Authorization decision (covers authentication failures too).
    pub fn authz(
        &self,
        request_id: Uuid,
        principal_hash: &str,
        allowed: bool,
        reason: Option<&str>,
    ) {
        let mut attrs = HashMap::new();
        if let Some(reason) = reason {
            attrs.insert("reason".to_string(), reason.to_string());
        }
        self.record(AuditRecord {
            timestamp: Utc::now(),
            request_id,
            principal_hash: principal_hash.to_string(),
            event_type: AuditEventType::Authz,
            outcome: if allowed {
                AuditOutcome::Success
            } else {
                AuditOutcome::Denied
            },
            attrs,
        });
    }

    /// PII detection outcome: type names only, never values.
    pub fn pii(&self, request_id: Uuid, principal_hash: &str, pii_types: &[String], action: &str) {
        let mut attrs = HashMap::new();
        attrs.insert("pii_types".to_string(), pii_types.join(","));
        attrs.insert("action".to_string(), action.to_string());
        self.record(AuditRecord {
            timestamp: Utc::now(),
            request_id,
            principal_hash: principal_hash.to_string(),
            event_type: AuditEventType::Pii,
            outcome: AuditOutcome::Success,
            attrs,
        });
    }

    /// Security policy violation (PII routing block and similar).
    pub fn violation(
        &self,
        request_id: Uuid,
        principal_hash: &str,
        violation_type: &str,
        detail: &str,
    ) {
        let mut attrs = HashMap::new();
        attrs.insert("violation_type".to_string(), violation_type.to_string());
        attrs.insert("detail".to_string(), detail.to_string());
        self.record(AuditRecord {
            timestamp: Utc::now(),
            request_id,
            principal_hash: principal_hash.to_string(),
            event_type: AuditEventType::Violation,
            outcome: AuditOutcome::Denied,
            attrs,
        });
    }

    /// Processing attempt against a backend (one record per attempt).
    #[allow(clippy::too_many_arguments)]
    pub fn processing(
        &self,
        request_id: Uuid,
        principal_hash: &str,
        backend: &str,
        outcome: AuditOutcome,
        latency_ms: Option<u64>,
        cost_usd: Option<f64>,
        error: Option<&str>,
    ) {
        let mut attrs = HashMap::new();
        attrs.insert("backend".to_string(), backend.to_string());
        if let Some(latency) = latency_ms {
            attrs.insert("latency_ms".to_string(), latency.to_string());
        }
        if let Some(cost) = cost_usd {
            attrs.insert("cost_usd".to_string(), format!("{cost:.6}"));
        }
        if let Some(error) = error {
            attrs.insert("error".to_string(), error.to_string());
        }
        self.record(AuditRecord {
            timestamp: Utc::now(),
            request_id,
            principal_hash: principal_hash.to_string(),
            event_type: AuditEventType::Processing,
            outcome,
            attrs,
        });
    }
}
