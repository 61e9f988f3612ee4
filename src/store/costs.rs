//! Append-only cost ledger with session and all-time aggregation
//!
//! Entries are never updated or deleted by normal operation. Session
//! aggregation includes an estimated savings figure for cache-read tokens:
//! what they would have cost at the full input rate minus what the
//! discounted rate charged.

use chrono::Utc;
use rusqlite::params;
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

use crate::pricing::round6;
use crate::prompt::AnalysisMode;
use crate::provider::TokenBreakdown;
use crate::store::database::Database;
use crate::store::StoreError;

/// One invocation to be appended to the ledger.
#[derive(Debug, Clone)]
pub struct NewCostEntry {
    pub session_id: String,
    pub model: String,
    pub mode: AnalysisMode,
    pub tokens: TokenBreakdown,
    pub cost_usd: f64,
}

/// Session-scoped aggregate.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SessionCosts {
    pub total: f64,
    pub by_mode: HashMap<String, f64>,
    pub by_model: HashMap<String, f64>,
    pub request_count: u64,
    pub estimated_cache_savings: f64,
}

/// All-time aggregate.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AllTimeCosts {
    pub total: f64,
    pub request_count: u64,
    pub total_tokens: u64,
    pub average_cost_per_request: f64,
}

pub struct CostLedger {
    db: Database,
}

impl CostLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append an entry. No dedup, no update.
    #[instrument(skip(self, entry), fields(session_id = %entry.session_id, model = %entry.model))]
    pub fn record(&self, entry: &NewCostEntry) -> Result<i64, StoreError> {
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cost_log
                 (session_id, model, request_mode, tokens_prompt, tokens_completion,
                  tokens_cache_read, tokens_cache_write, cost_usd, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.session_id,
                    entry.model,
                    entry.mode.to_string(),
                    entry.tokens.input,
                    entry.tokens.output,
                    entry.tokens.cache_read,
                    entry.tokens.cache_write,
                    entry.cost_usd,
                    now,
                ],
            )?;

            Ok(conn.last_insert_rowid())
        })
    }

    /// Aggregate all entries sharing a session identifier.
    pub fn session_totals(&self, session_id: &str) -> Result<SessionCosts, StoreError> {
        let rows: Vec<(String, String, f64, u64)> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT model, request_mode, cost_usd, tokens_cache_read
                 FROM cost_log
                 WHERE session_id = ?1",
            )?;

            let rows = stmt.query_map(params![session_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })?;

        let mut totals = SessionCosts::default();

        for (model, mode, cost, cache_read_tokens) in rows {
            totals.total += cost;
            *totals.by_mode.entry(mode).or_insert(0.0) += cost;
            *totals.by_model.entry(model.clone()).or_insert(0.0) += cost;
            totals.request_count += 1;

            if cache_read_tokens > 0 {
                totals.estimated_cache_savings +=
                    estimated_savings(&model, cache_read_tokens);
            }
        }

        totals.total = round6(totals.total);
        totals.estimated_cache_savings = round6(totals.estimated_cache_savings);
        for cost in totals.by_mode.values_mut() {
            *cost = round6(*cost);
        }
        for cost in totals.by_model.values_mut() {
            *cost = round6(*cost);
        }

        Ok(totals)
    }

    /// Simple aggregate across every entry ever recorded.
    pub fn all_time_totals(&self) -> Result<AllTimeCosts, StoreError> {
        let (total, request_count, total_tokens): (f64, u64, u64) =
            self.db.with_conn(|conn| {
                conn.query_row(
                    "SELECT
                         COALESCE(SUM(cost_usd), 0.0),
                         COUNT(*),
                         COALESCE(SUM(tokens_prompt + tokens_completion), 0)
                     FROM cost_log",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(StoreError::from)
            })?;

        let average = if request_count > 0 {
            total / request_count as f64
        } else {
            0.0
        };

        Ok(AllTimeCosts {
            total: round6(total),
            request_count,
            total_tokens,
            average_cost_per_request: round6(average),
        })
    }
}

/// Approximate what the cache-read tokens saved versus full input pricing.
/// Uses a hardcoded category rate (per 1K tokens), not the live pricing
/// table: the ledger does not retain per-entry pricing snapshots, so this
/// figure is an estimate and drifts if provider rates change. Not a source
/// of truth for billing.
fn estimated_savings(model: &str, cache_read_tokens: u64) -> f64 {
    let rate_per_1k = category_rate(model);
    (cache_read_tokens as f64 / 1000.0) * rate_per_1k * 0.9
}

fn category_rate(model: &str) -> f64 {
    let model = model.to_ascii_lowercase();
    if model.contains("sonnet") {
        0.003
    } else if model.contains("haiku") {
        0.00025
    } else {
        0.001
    }
}

/// Fresh session identifier for grouping ledger entries.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> CostLedger {
        CostLedger::new(Database::in_memory().unwrap())
    }

    fn entry(session: &str, model: &str, mode: AnalysisMode, cost: f64) -> NewCostEntry {
        NewCostEntry {
            session_id: session.to_string(),
            model: model.to_string(),
            mode,
            tokens: TokenBreakdown::new(1000, 500),
            cost_usd: cost,
        }
    }

    #[test]
    fn test_session_totals_aggregate() {
        let ledger = ledger();
        ledger
            .record(&entry("s1", "claude-sonnet-4-5-20250929", AnalysisMode::Full, 0.01))
            .unwrap();
        ledger
            .record(&entry("s1", "claude-haiku-4-5-20250929", AnalysisMode::Basic, 0.005))
            .unwrap();
        ledger
            .record(&entry("s2", "claude-haiku-4-5-20250929", AnalysisMode::Basic, 0.002))
            .unwrap();

        let totals = ledger.session_totals("s1").unwrap();

        assert!((totals.total - 0.015).abs() < 1e-9);
        assert_eq!(totals.request_count, 2);
        assert!((totals.by_mode["full"] - 0.01).abs() < 1e-9);
        assert!((totals.by_mode["basic"] - 0.005).abs() < 1e-9);
        assert!((totals.by_model["claude-sonnet-4-5-20250929"] - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_session_totals_empty_session() {
        let totals = ledger().session_totals("nope").unwrap();

        assert_eq!(totals.total, 0.0);
        assert_eq!(totals.request_count, 0);
        assert!(totals.by_mode.is_empty());
        assert_eq!(totals.estimated_cache_savings, 0.0);
    }

    #[test]
    fn test_cache_savings_estimate() {
        let ledger = ledger();
        let mut e = entry("s1", "claude-sonnet-4-5-20250929", AnalysisMode::Full, 0.01);
        e.tokens.cache_read = 800;
        ledger.record(&e).unwrap();

        let totals = ledger.session_totals("s1").unwrap();

        // 800 cache-read tokens at the sonnet category rate:
        // (800 / 1000) * 0.003 * 0.9 = 0.00216
        assert!((totals.estimated_cache_savings - 0.00216).abs() < 1e-9);
    }

    #[test]
    fn test_cache_savings_unknown_model_uses_fallback_rate() {
        let ledger = ledger();
        let mut e = entry("s1", "some-future-model", AnalysisMode::Full, 0.01);
        e.tokens.cache_read = 1000;
        ledger.record(&e).unwrap();

        let totals = ledger.session_totals("s1").unwrap();
        assert!((totals.estimated_cache_savings - 0.0009).abs() < 1e-9);
    }

    #[test]
    fn test_all_time_totals() {
        let ledger = ledger();
        ledger
            .record(&entry("s1", "claude-sonnet-4-5-20250929", AnalysisMode::Full, 0.01))
            .unwrap();
        ledger
            .record(&entry("s2", "claude-haiku-4-5-20250929", AnalysisMode::Basic, 0.002))
            .unwrap();

        let totals = ledger.all_time_totals().unwrap();

        assert!((totals.total - 0.012).abs() < 1e-9);
        assert_eq!(totals.request_count, 2);
        assert_eq!(totals.total_tokens, 3000);
        assert!((totals.average_cost_per_request - 0.006).abs() < 1e-9);
    }

    #[test]
    fn test_all_time_average_with_no_entries() {
        let totals = ledger().all_time_totals().unwrap();

        assert_eq!(totals.request_count, 0);
        assert_eq!(totals.average_cost_per_request, 0.0);
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(generate_session_id(), generate_session_id());
    }
}
