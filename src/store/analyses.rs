//! Analysis cache: (product, profile version) -> newest analysis record
//!
//! Records are append-only; the cache always serves the most recently
//! created record for an exact key. Older records are retained for audit
//! and only removed by the explicit staleness sweep or per-product delete.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use tracing::instrument;

use crate::prompt::AnalysisMode;
use crate::provider::TokenBreakdown;
use crate::store::database::Database;
use crate::store::StoreError;

const RECORD_COLUMNS: &str = "id, product_id, profile_version, model_used, mode, analysis_data, \
     tokens_input, tokens_output, tokens_cache_read, tokens_cache_write, cost_usd, created_at";

/// A stored analysis. Immutable once written.
#[derive(Debug, Clone)]
pub struct AnalysisRecord {
    pub id: i64,
    pub product_id: i64,
    pub profile_version: String,
    pub model_used: String,
    pub mode: AnalysisMode,
    pub analysis: Value,
    pub tokens: TokenBreakdown,
    pub cost_usd: f64,
    pub created_at: String,
}

/// Fields for a record about to be appended.
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub product_id: i64,
    pub profile_version: String,
    pub model_used: String,
    pub mode: AnalysisMode,
    pub analysis: Value,
    pub tokens: TokenBreakdown,
    pub cost_usd: f64,
}

pub struct AnalysisStore {
    db: Database,
}

impl AnalysisStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Primary cache lookup: the single newest record for the exact
    /// (product, profile version) key, or none. No fuzzy matching; a single
    /// preference change produces a different version token and misses.
    #[instrument(skip(self))]
    pub fn get(
        &self,
        product_id: i64,
        profile_version: &str,
    ) -> Result<Option<AnalysisRecord>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM analyses
                     WHERE product_id = ?1 AND profile_version = ?2
                     ORDER BY created_at DESC, id DESC
                     LIMIT 1"
                ),
                params![product_id, profile_version],
                row_to_record,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// Append a new record; prior records for the same key are preserved.
    #[instrument(skip(self, analysis), fields(product_id = analysis.product_id))]
    pub fn put(&self, analysis: &NewAnalysis) -> Result<i64, StoreError> {
        let analysis_json = serde_json::to_string(&analysis.analysis)?;
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO analyses
                 (product_id, profile_version, model_used, mode, analysis_data,
                  tokens_input, tokens_output, tokens_cache_read, tokens_cache_write,
                  cost_usd, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    analysis.product_id,
                    analysis.profile_version,
                    analysis.model_used,
                    analysis.mode.to_string(),
                    analysis_json,
                    analysis.tokens.input,
                    analysis.tokens.output,
                    analysis.tokens.cache_read,
                    analysis.tokens.cache_write,
                    analysis.cost_usd,
                    now,
                ],
            )?;

            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<AnalysisRecord>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM analyses WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// All analyses for a product, newest first.
    pub fn list_for_subject(&self, product_id: i64) -> Result<Vec<AnalysisRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM analyses
                 WHERE product_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ))?;

            let rows = stmt.query_map(params![product_id], row_to_record)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    /// Remove every analysis for a product. Returns the number deleted.
    pub fn delete_for_subject(&self, product_id: i64) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM analyses WHERE product_id = ?1", params![product_id])
                .map_err(StoreError::from)
        })
    }

    /// Maintenance sweep after a profile update: remove full-mode records
    /// whose version differs from the current one. Basic-mode records are
    /// not profile-dependent and are never touched.
    #[instrument(skip(self))]
    pub fn invalidate_stale(&self, current_version: &str) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM analyses
                 WHERE mode = 'full' AND profile_version != ?1",
                params![current_version],
            )
            .map_err(StoreError::from)
        })
    }
}

fn row_to_record(row: &Row<'_>) -> Result<AnalysisRecord, rusqlite::Error> {
    let mode_text: String = row.get(4)?;
    let mode = mode_text.parse::<AnalysisMode>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;

    let analysis_json: String = row.get(5)?;
    let analysis = serde_json::from_str(&analysis_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(AnalysisRecord {
        id: row.get(0)?,
        product_id: row.get(1)?,
        profile_version: row.get(2)?,
        model_used: row.get(3)?,
        mode,
        analysis,
        tokens: TokenBreakdown {
            input: row.get(6)?,
            output: row.get(7)?,
            cache_read: row.get(8)?,
            cache_write: row.get(9)?,
        },
        cost_usd: row.get(10)?,
        created_at: row.get(11)?,
    })
}
