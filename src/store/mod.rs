//! SQLite persistence: analyses, cost log, profile history
//!
//! Three append/insert-only record sets in one database file. Historical
//! rows are never mutated in place, so contention is limited to insert
//! ordering and a key's newest record is always well defined.

pub mod analyses;
pub mod costs;
pub mod database;
pub mod profiles;
pub mod schema;

pub use analyses::{AnalysisRecord, AnalysisStore, NewAnalysis};
pub use costs::{generate_session_id, AllTimeCosts, CostLedger, NewCostEntry, SessionCosts};
pub use database::Database;
pub use profiles::{ProfileSnapshot, ProfileStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
