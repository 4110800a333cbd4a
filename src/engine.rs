use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::gaps::{compute_gaps, GapQuery, GapReport};
use crate::ingest::RawTable;
use crate::reconcile::{ReconcileCache, Reconciled};

/// A configuration plus the memoized reconciliation of the current inputs.
///
/// Re-querying gaps for other institutions, booklets or groupings reuses the
/// cached record set as long as the three tables are unchanged.
#[derive(Debug, Default)]
pub struct Engine {
    config: EngineConfig,
    cache: ReconcileCache,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache: ReconcileCache::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ReconcileCache {
        &self.cache
    }

    pub fn reconcile(
        &mut self,
        responses: &RawTable,
        answer_key: &RawTable,
        taxonomy: &RawTable,
    ) -> Result<Arc<Reconciled>> {
        self.cache
            .get_or_reconcile(responses, answer_key, taxonomy, &self.config)
    }

    /// Reconcile (or reuse the cached set) and compute one gap report.
    pub fn gaps(
        &mut self,
        responses: &RawTable,
        answer_key: &RawTable,
        taxonomy: &RawTable,
        query: &GapQuery,
    ) -> Result<GapReport> {
        let reconciled = self.reconcile(responses, answer_key, taxonomy)?;
        Ok(compute_gaps(&reconciled, query, &self.config))
    }
}
