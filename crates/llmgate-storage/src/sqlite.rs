//! SQLite event store.
//!
//! Events and anomalies live in two tables with indexes on timestamp,
//! provider, model, risk level, and anomaly severity. Writes go through a
//! single pool; SQLite's WAL mode gives readers a consistent snapshot
//! without blocking the writer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use llmgate_core::{
    Anomaly, AnomalySeverity, AnomalyType, ErrorCode, EventStats, EventStore, GatewayError,
    GatewayEvent, Result, RiskLevel, TokenUsage,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Schema migrations
// ---------------------------------------------------------------------------

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS events (
        id TEXT NOT NULL PRIMARY KEY,
        request_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        principal_hash TEXT NOT NULL,
        provider TEXT NOT NULL,
        model TEXT NOT NULL,
        prompt_fingerprint TEXT NOT NULL,
        response_fingerprint TEXT,
        latency_ms INTEGER NOT NULL,
        prompt_tokens INTEGER NOT NULL,
        completion_tokens INTEGER NOT NULL,
        total_tokens INTEGER NOT NULL,
        cost_usd REAL NOT NULL,
        success INTEGER NOT NULL,
        error_code TEXT,
        has_pii INTEGER NOT NULL,
        pii_types TEXT NOT NULL DEFAULT '[]',
        injection_detected INTEGER NOT NULL,
        risk_level TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}'
    )",
    "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_provider ON events(provider)",
    "CREATE INDEX IF NOT EXISTS idx_events_model ON events(model)",
    "CREATE INDEX IF NOT EXISTS idx_events_risk ON events(risk_level)",
    "CREATE TABLE IF NOT EXISTS anomalies (
        id TEXT NOT NULL PRIMARY KEY,
        event_id TEXT,
        timestamp TEXT NOT NULL,
        anomaly_type TEXT NOT NULL,
        severity TEXT NOT NULL,
        description TEXT NOT NULL,
        details TEXT NOT NULL DEFAULT '{}',
        recommended_action TEXT NOT NULL,
        FOREIGN KEY (event_id) REFERENCES events(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_anomalies_timestamp ON anomalies(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_anomalies_severity ON anomalies(severity)",
];

/// Open (or create) a SQLite pool configured for the gateway.
async fn open_pool(database_url: &str) -> Result<SqlitePool> {
    let connect_opts = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| GatewayError::Storage(format!("Invalid database URL: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    // In-memory databases give every connection its own database; a single
    // connection keeps a consistent view.
    let max_conns: u32 = if database_url.contains(":memory:") { 1 } else { 10 };

    sqlx::pool::PoolOptions::<Sqlite>::new()
        .max_connections(max_conns)
        .connect_with(connect_opts)
        .await
        .map_err(|e| GatewayError::Storage(format!("Failed to connect to SQLite: {e}")))
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for statement in MIGRATIONS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| GatewayError::Storage(format!("Migration failed: {e}")))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| GatewayError::Storage(format!("Invalid UUID '{s}': {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GatewayError::Storage(format!("Invalid datetime '{s}': {e}")))
}

fn parse_risk(s: &str) -> Result<RiskLevel> {
    match s {
        "low" => Ok(RiskLevel::Low),
        "medium" => Ok(RiskLevel::Medium),
        "high" => Ok(RiskLevel::High),
        "critical" => Ok(RiskLevel::Critical),
        other => Err(GatewayError::Storage(format!("Invalid risk level '{other}'"))),
    }
}

/// Error codes are stored as their wire (JSON) representation.
fn serialize_error_code(code: Option<ErrorCode>) -> Result<Option<String>> {
    code.map(|c| serde_json::to_string(&c).map_err(GatewayError::from))
        .transpose()
}

fn deserialize_error_code(s: Option<String>) -> Result<Option<ErrorCode>> {
    s.map(|raw| {
        serde_json::from_str(&raw)
            .map_err(|e| GatewayError::Storage(format!("Invalid error code '{raw}': {e}")))
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Row conversions
// ---------------------------------------------------------------------------

fn event_from_row(row: &SqliteRow) -> Result<GatewayEvent> {
    let pii_types: Vec<String> = {
        let raw: String = row.get("pii_types");
        serde_json::from_str(&raw)
            .map_err(|e| GatewayError::Storage(format!("Invalid pii_types JSON: {e}")))?
    };
    let metadata: HashMap<String, String> = {
        let raw: String = row.get("metadata");
        serde_json::from_str(&raw)
            .map_err(|e| GatewayError::Storage(format!("Invalid metadata JSON: {e}")))?
    };

    Ok(GatewayEvent {
        event_id: parse_uuid(&row.get::<String, _>("id"))?,
        request_id: parse_uuid(&row.get::<String, _>("request_id"))?,
        timestamp: parse_datetime(&row.get::<String, _>("timestamp"))?,
        principal_hash: row.get("principal_hash"),
        provider: row.get("provider"),
        model: row.get("model"),
        prompt_fingerprint: row.get("prompt_fingerprint"),
        response_fingerprint: row.get("response_fingerprint"),
        latency_ms: row.get::<i64, _>("latency_ms") as u64,
        tokens: TokenUsage {
            prompt_tokens: row.get::<i64, _>("prompt_tokens") as u32,
            completion_tokens: row.get::<i64, _>("completion_tokens") as u32,
            total_tokens: row.get::<i64, _>("total_tokens") as u32,
        },
        cost_usd: row.get("cost_usd"),
        success: row.get::<i64, _>("success") != 0,
        error_code: deserialize_error_code(row.get("error_code"))?,
        has_pii: row.get::<i64, _>("has_pii") != 0,
        pii_types,
        injection_detected: row.get::<i64, _>("injection_detected") != 0,
        risk_level: parse_risk(&row.get::<String, _>("risk_level"))?,
        metadata,
    })
}

fn anomaly_from_row(row: &SqliteRow) -> Result<Anomaly> {
    let anomaly_type: AnomalyType = {
        let raw: String = row.get("anomaly_type");
        serde_json::from_str(&format!("\"{raw}\""))
            .map_err(|e| GatewayError::Storage(format!("Invalid anomaly type '{raw}': {e}")))?
    };
    let details: HashMap<String, String> = {
        let raw: String = row.get("details");
        serde_json::from_str(&raw)
            .map_err(|e| GatewayError::Storage(format!("Invalid details JSON: {e}")))?
    };
    let severity = row
        .get::<String, _>("severity")
        .parse::<AnomalySeverity>()
        .map_err(GatewayError::Storage)?;

    Ok(Anomaly {
        anomaly_id: parse_uuid(&row.get::<String, _>("id"))?,
        event_id: row
            .get::<Option<String>, _>("event_id")
            .map(|s| parse_uuid(&s))
            .transpose()?,
        timestamp: parse_datetime(&row.get::<String, _>("timestamp"))?,
        anomaly_type,
        severity,
        description: row.get("description"),
        details,
        recommended_action: row.get("recommended_action"),
    })
}

// ---------------------------------------------------------------------------
// SqliteEventStore
// ---------------------------------------------------------------------------

/// SQLite-backed [`EventStore`].
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    /// Open (or create) the database and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = open_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn insert_event(&self, event: &GatewayEvent) -> Result<()> {
        let pii_types_json = serde_json::to_string(&event.pii_types)?;
        let metadata_json = serde_json::to_string(&event.metadata)?;

        sqlx::query(
            "INSERT INTO events (
                id, request_id, timestamp, principal_hash, provider, model,
                prompt_fingerprint, response_fingerprint, latency_ms,
                prompt_tokens, completion_tokens, total_tokens, cost_usd,
                success, error_code, has_pii, pii_types, injection_detected,
                risk_level, metadata
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9,
                ?10, ?11, ?12, ?13,
                ?14, ?15, ?16, ?17, ?18,
                ?19, ?20
            )",
        )
        .bind(event.event_id.to_string())
        .bind(event.request_id.to_string())
        .bind(event.timestamp.to_rfc3339())
        .bind(&event.principal_hash)
        .bind(&event.provider)
        .bind(&event.model)
        .bind(&event.prompt_fingerprint)
        .bind(event.response_fingerprint.as_deref())
        .bind(event.latency_ms as i64)
        .bind(event.tokens.prompt_tokens as i64)
        .bind(event.tokens.completion_tokens as i64)
        .bind(event.tokens.total_tokens as i64)
        .bind(event.cost_usd)
        .bind(if event.success { 1i64 } else { 0i64 })
        .bind(serialize_error_code(event.error_code)?)
        .bind(if event.has_pii { 1i64 } else { 0i64 })
        .bind(&pii_types_json)
        .bind(if event.injection_detected { 1i64 } else { 0i64 })
        .bind(event.risk_level.to_string())
        .bind(&metadata_json)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::Storage(format!("Failed to insert event: {e}")))?;

        Ok(())
    }

    async fn insert_anomaly(&self, anomaly: &Anomaly) -> Result<()> {
        let details_json = serde_json::to_string(&anomaly.details)?;

        sqlx::query(
            "INSERT INTO anomalies (
                id, event_id, timestamp, anomaly_type, severity,
                description, details, recommended_action
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(anomaly.anomaly_id.to_string())
        .bind(anomaly.event_id.map(|id| id.to_string()))
        .bind(anomaly.timestamp.to_rfc3339())
        .bind(anomaly.anomaly_type.to_string())
        .bind(anomaly.severity.to_string())
        .bind(&anomaly.description)
        .bind(&details_json)
        .bind(&anomaly.recommended_action)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::Storage(format!("Failed to insert anomaly: {e}")))?;

        Ok(())
    }

    async fn recent_events(&self, limit: u32) -> Result<Vec<GatewayEvent>> {
        let rows = sqlx::query("SELECT * FROM events ORDER BY timestamp DESC LIMIT ?1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| GatewayError::Storage(format!("Failed to query events: {e}")))?;

        rows.iter().map(event_from_row).collect()
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<GatewayEvent>> {
        let rows =
            sqlx::query("SELECT * FROM events WHERE timestamp >= ?1 ORDER BY timestamp ASC")
                .bind(since.to_rfc3339())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| GatewayError::Storage(format!("Failed to query events: {e}")))?;

        rows.iter().map(event_from_row).collect()
    }

    async fn events_for_model_since(
        &self,
        model: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<GatewayEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM events WHERE model = ?1 AND timestamp >= ?2 ORDER BY timestamp ASC",
        )
        .bind(model)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::Storage(format!("Failed to query events: {e}")))?;

        rows.iter().map(event_from_row).collect()
    }

    async fn anomalies_with_min_severity(
        &self,
        min_severity: AnomalySeverity,
        limit: u32,
    ) -> Result<Vec<Anomaly>> {
        let accepted: Vec<String> = [
            AnomalySeverity::Medium,
            AnomalySeverity::High,
            AnomalySeverity::Critical,
        ]
        .into_iter()
        .filter(|s| *s >= min_severity)
        .map(|s| s.to_string())
        .collect();

        // At most three severity levels, so a fixed IN clause suffices.
        let placeholders: Vec<String> =
            (0..accepted.len()).map(|i| format!("?{}", i + 1)).collect();
        let sql = format!(
            "SELECT * FROM anomalies WHERE severity IN ({}) ORDER BY timestamp DESC LIMIT ?{}",
            placeholders.join(", "),
            accepted.len() + 1
        );

        let mut query = sqlx::query(&sql);
        for severity in &accepted {
            query = query.bind(severity);
        }
        query = query.bind(limit as i64);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| GatewayError::Storage(format!("Failed to query anomalies: {e}")))?;

        rows.iter().map(anomaly_from_row).collect()
    }

    async fn stats(&self, window: Duration) -> Result<EventStats> {
        let since = (Utc::now()
            - chrono::Duration::from_std(window)
                .map_err(|e| GatewayError::Storage(format!("Invalid stats window: {e}")))?)
        .to_rfc3339();

        let row = sqlx::query(
            "SELECT
                COUNT(*) AS total_events,
                COALESCE(SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END), 0) AS successful,
                COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0) AS failed,
                COALESCE(SUM(total_tokens), 0) AS total_tokens,
                COALESCE(SUM(cost_usd), 0.0) AS total_cost,
                COALESCE(AVG(latency_ms), 0.0) AS avg_latency,
                COALESCE(MAX(latency_ms), 0) AS max_latency,
                COALESCE(SUM(CASE WHEN has_pii = 1 THEN 1 ELSE 0 END), 0) AS pii_events,
                COALESCE(SUM(CASE WHEN injection_detected = 1 THEN 1 ELSE 0 END), 0)
                    AS injection_events
            FROM events WHERE timestamp >= ?1",
        )
        .bind(&since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| GatewayError::Storage(format!("Failed to compute stats: {e}")))?;

        let anomaly_row =
            sqlx::query("SELECT COUNT(*) AS anomaly_count FROM anomalies WHERE timestamp >= ?1")
                .bind(&since)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| GatewayError::Storage(format!("Failed to count anomalies: {e}")))?;

        Ok(EventStats {
            total_events: row.get::<i64, _>("total_events") as u64,
            successful: row.get::<i64, _>("successful") as u64,
            failed: row.get::<i64, _>("failed") as u64,
            total_tokens: row.get::<i64, _>("total_tokens") as u64,
            total_cost_usd: row.get::<f64, _>("total_cost"),
            avg_latency_ms: row.get::<f64, _>("avg_latency"),
            max_latency_ms: row.get::<i64, _>("max_latency") as u64,
            pii_events: row.get::<i64, _>("pii_events") as u64,
            injection_events: row.get::<i64, _>("injection_events") as u64,
            anomaly_count: anomaly_row.get::<i64, _>("anomaly_count") as u64,
        })
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| GatewayError::Storage(format!("Health check failed: {e}")))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
