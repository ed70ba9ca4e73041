//! Storage backends for LLMGate events and anomalies.
//!
//! Two [`EventStore`] implementations: SQLite (the reference embedded
//! store) and an in-memory twin for tests and development.

use llmgate_core::{EventStore, Result};
use std::sync::Arc;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryEventStore;
pub use sqlite::SqliteEventStore;

/// Storage deployment profile.
#[derive(Debug, Clone)]
pub enum StorageProfile {
    /// Volatile in-memory store.
    Memory,
    /// Embedded SQLite database file.
    Sqlite { database_path: String },
}

impl StorageProfile {
    /// Parse a profile from configuration.
    pub fn from_config(profile: &str, database_path: &str) -> Self {
        match profile {
            "memory" => StorageProfile::Memory,
            _ => StorageProfile::Sqlite {
                database_path: database_path.to_string(),
            },
        }
    }

    /// Build the event store for this profile.
    pub async fn build(&self) -> Result<Arc<dyn EventStore>> {
        match self {
            StorageProfile::Memory => Ok(Arc::new(InMemoryEventStore::new())),
            StorageProfile::Sqlite { database_path } => {
                let url = if database_path == ":memory:" {
                    "sqlite::memory:".to_string()
                } else {
                    format!("sqlite:{database_path}")
                };
                Ok(Arc::new(SqliteEventStore::new(&url).await?))
            }
        }
    }
}
