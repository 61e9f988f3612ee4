//! Caller-facing orchestration: cache lookup, invocation, accounting
//!
//! One analyze call resolves the profile version, consults the analysis
//! cache, and on a miss runs the invocation strategy under a per-key
//! in-flight guard before persisting the record and its ledger entry.
//! Two concurrent requests for the same (product, profile version) key on a
//! cold cache would otherwise both invoke the provider and double the cost;
//! the guard coalesces them onto a single call and the waiter re-checks the
//! cache once the winner has committed.

use crate::analysis::{AnalysisEngine, EngineError};
use crate::config::{BrokerConfig, ModelSettings};
use crate::pricing::{PricingError, PricingTable};
use crate::product::ProductDetails;
use crate::profile::{version_of, StyleProfile, BASIC_VERSION};
use crate::prompt::AnalysisMode;
use crate::provider::{AiProvider, ClaudeClient, ProviderError};
use crate::store::{
    generate_session_id, AllTimeCosts, AnalysisRecord, AnalysisStore, CostLedger, Database,
    NewAnalysis, NewCostEntry, ProfileSnapshot, ProfileStore, SessionCosts, StoreError,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Pricing(#[from] PricingError),
}

impl From<EngineError> for BrokerError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Provider(e) => Self::Provider(e),
            EngineError::Pricing(e) => Self::Pricing(e),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Skip the cache read and always invoke the provider.
    pub force_refresh: bool,

    /// Session to log the cost under; a fresh id is generated when absent.
    pub session_id: Option<String>,
}

/// What a caller gets back from one analyze call.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeOutcome {
    pub analysis: Value,
    pub model_used: String,
    pub mode: AnalysisMode,
    pub cost_usd: f64,
    pub was_cache_hit: bool,
    pub profile_version: String,

    /// Session the cost was logged under. None for cache hits, which cost
    /// nothing and are not logged.
    pub session_id: Option<String>,
}

/// Long-lived broker owning the provider, engine, and stores.
pub struct AnalysisBroker {
    engine: AnalysisEngine,
    provider: Arc<dyn AiProvider>,
    analyses: AnalysisStore,
    ledger: CostLedger,
    profiles: ProfileStore,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AnalysisBroker {
    /// Build the full stack from configuration: one Claude client, one
    /// database, built-in pricing.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let provider: Arc<dyn AiProvider> = Arc::new(ClaudeClient::new(&config.provider)?);
        let db = Database::open(&config.store.database_path)?;

        Ok(Self::with_components(
            provider,
            db,
            PricingTable::builtin(),
            config.models.clone(),
        ))
    }

    /// Assemble from explicit components (tests, embedding applications).
    pub fn with_components(
        provider: Arc<dyn AiProvider>,
        db: Database,
        pricing: PricingTable,
        models: ModelSettings,
    ) -> Self {
        Self {
            engine: AnalysisEngine::new(provider.clone(), pricing, models),
            provider,
            analyses: AnalysisStore::new(db.clone()),
            ledger: CostLedger::new(db.clone()),
            profiles: ProfileStore::new(db),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Analyze a product for the given profile (or none). Serves the newest
    /// cached record for the exact (product, profile version) key when one
    /// exists; otherwise invokes the provider, persists the result, and logs
    /// its cost.
    pub async fn analyze(
        &self,
        product: &ProductDetails,
        profile: Option<&StyleProfile>,
        options: AnalyzeOptions,
    ) -> Result<AnalyzeOutcome, BrokerError> {
        let profile_version = version_of(profile);

        if !options.force_refresh {
            if let Some(record) = self.analyses.get(product.id, &profile_version)? {
                info!(
                    product_id = product.id,
                    %profile_version,
                    "analysis cache hit"
                );
                return Ok(hit_outcome(record, profile_version));
            }
        }

        let key = format!("{}:{}", product.id, profile_version);
        let guard = self.inflight_guard(&key).await;

        let result = {
            let _held = guard.lock().await;
            self.analyze_uncached(product, profile, &profile_version, &options)
                .await
        };

        self.release_guard(&key, &guard).await;
        result
    }

    /// The miss path, run while holding the key's in-flight guard.
    async fn analyze_uncached(
        &self,
        product: &ProductDetails,
        profile: Option<&StyleProfile>,
        profile_version: &str,
        options: &AnalyzeOptions,
    ) -> Result<AnalyzeOutcome, BrokerError> {
        // A concurrent request may have committed while this caller waited
        // on the guard.
        if !options.force_refresh {
            if let Some(record) = self.analyses.get(product.id, profile_version)? {
                debug!(
                    product_id = product.id,
                    "cache filled while waiting on in-flight guard"
                );
                return Ok(hit_outcome(record, profile_version.to_string()));
            }
        }

        info!(
            product_id = product.id,
            %profile_version,
            "analysis cache miss, invoking provider"
        );

        let outcome = self.engine.run(product, profile).await?;

        self.analyses.put(&NewAnalysis {
            product_id: product.id,
            profile_version: profile_version.to_string(),
            model_used: outcome.model_used.clone(),
            mode: outcome.mode,
            analysis: outcome.analysis.clone(),
            tokens: outcome.tokens,
            cost_usd: outcome.cost_usd,
        })?;

        let session_id = options
            .session_id
            .clone()
            .unwrap_or_else(generate_session_id);

        self.ledger.record(&NewCostEntry {
            session_id: session_id.clone(),
            model: outcome.model_used.clone(),
            mode: outcome.mode,
            tokens: outcome.tokens,
            cost_usd: outcome.cost_usd,
        })?;

        Ok(AnalyzeOutcome {
            analysis: outcome.analysis,
            model_used: outcome.model_used,
            mode: outcome.mode,
            cost_usd: outcome.cost_usd,
            was_cache_hit: false,
            profile_version: profile_version.to_string(),
            session_id: Some(session_id),
        })
    }

    async fn inflight_guard(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.inflight.lock().await;
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_guard(&self, key: &str, guard: &Arc<Mutex<()>>) {
        let mut map = self.inflight.lock().await;
        // One reference held by the map plus ours: nobody else is waiting.
        // A latecomer that raced the removal re-checks the cache anyway.
        if Arc::strong_count(guard) <= 2 {
            map.remove(key);
        }
    }

    /// Append a profile revision to the history and return it with its
    /// version token.
    pub fn save_profile(&self, profile: &StyleProfile) -> Result<ProfileSnapshot, BrokerError> {
        Ok(self.profiles.save(profile)?)
    }

    /// The newest saved profile, or none.
    pub fn current_profile(&self) -> Result<Option<ProfileSnapshot>, BrokerError> {
        Ok(self.profiles.current()?)
    }

    /// Sweep full-mode analyses that no longer match the current profile
    /// version. With no saved profile every full-mode record is stale.
    pub fn invalidate_stale(&self) -> Result<usize, BrokerError> {
        let current_version = self
            .profiles
            .current()?
            .map(|snapshot| snapshot.version)
            .unwrap_or_else(|| BASIC_VERSION.to_string());

        let removed = self.analyses.invalidate_stale(&current_version)?;
        info!(removed, %current_version, "stale analyses removed");
        Ok(removed)
    }

    pub fn session_costs(&self, session_id: &str) -> Result<SessionCosts, BrokerError> {
        Ok(self.ledger.session_totals(session_id)?)
    }

    pub fn all_time_costs(&self) -> Result<AllTimeCosts, BrokerError> {
        Ok(self.ledger.all_time_totals()?)
    }

    /// Minimal provider call to verify credentials and connectivity.
    pub async fn verify_connection(&self) -> bool {
        self.provider.verify_connection().await
    }

    /// Administrative access to the underlying analysis store.
    pub fn analyses(&self) -> &AnalysisStore {
        &self.analyses
    }
}

fn hit_outcome(record: AnalysisRecord, profile_version: String) -> AnalyzeOutcome {
    AnalyzeOutcome {
        analysis: record.analysis,
        model_used: record.model_used,
        mode: record.mode,
        cost_usd: 0.0,
        was_cache_hit: true,
        profile_version,
        session_id: None,
    }
}
