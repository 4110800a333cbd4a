use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use super::{reconcile, Reconciled};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::ingest::RawTable;

/// Content fingerprint of the three inputs plus the configuration that
/// shapes their reconciliation.
pub fn fingerprint(
    responses: &RawTable,
    answer_key: &RawTable,
    taxonomy: &RawTable,
    config: &EngineConfig,
) -> Result<String> {
    let mut hasher = Sha256::new();
    for table in [responses, answer_key, taxonomy] {
        table.fingerprint_into(&mut hasher);
    }
    let cfg = serde_json::to_vec(config)
        .map_err(|e| EngineError::Config(format!("cannot fingerprint configuration: {}", e)))?;
    hasher.update(&cfg);
    Ok(hex::encode(hasher.finalize()))
}

/// Holds the reconciled set of the most recent inputs.
///
/// A lookup with different inputs recomputes and replaces the entry, so the
/// cache never serves results for tables that are no longer current.
#[derive(Debug, Default)]
pub struct ReconcileCache {
    entry: Option<(String, Arc<Reconciled>)>,
    hits: u64,
    misses: u64,
}

impl ReconcileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_reconcile(
        &mut self,
        responses: &RawTable,
        answer_key: &RawTable,
        taxonomy: &RawTable,
        config: &EngineConfig,
    ) -> Result<Arc<Reconciled>> {
        let key = fingerprint(responses, answer_key, taxonomy, config)?;
        if let Some((cached_key, value)) = &self.entry {
            if *cached_key == key {
                self.hits += 1;
                debug!(fingerprint = %key, hits = self.hits, "reconcile cache hit");
                return Ok(Arc::clone(value));
            }
        }

        self.misses += 1;
        info!(fingerprint = %key, misses = self.misses, "reconcile cache miss, recomputing");
        let value = Arc::new(reconcile(responses, answer_key, taxonomy, config)?);
        self.entry = Some((key, Arc::clone(&value)));
        Ok(value)
    }

    /// Drop the cached entry.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.entry.as_ref().map(|(k, _)| k.as_str())
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Scalar;
    use crate::reconcile::fixtures;
    use anyhow::Result;

    #[test]
    fn unchanged_inputs_hit_the_cache() -> Result<()> {
        let (r, k, t) = fixtures::tables()?;
        let cfg = EngineConfig::default();
        let mut cache = ReconcileCache::new();

        let first = cache.get_or_reconcile(&r, &k, &t, &cfg)?;
        let second = cache.get_or_reconcile(&r, &k, &t, &cfg)?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
        Ok(())
    }

    #[test]
    fn changed_input_or_config_invalidates() -> Result<()> {
        let (r, mut k, t) = fixtures::tables()?;
        let cfg = EngineConfig::default();
        let mut cache = ReconcileCache::new();

        let before = cache.get_or_reconcile(&r, &k, &t, &cfg)?;
        let fp_before = cache.fingerprint().map(str::to_string);

        k.rows[0][1] = Scalar::Text("C".into());
        let after = cache.get_or_reconcile(&r, &k, &t, &cfg)?;
        assert!(!Arc::ptr_eq(&before, &after));
        assert_ne!(cache.fingerprint().map(str::to_string), fp_before);

        let mut other = cfg.clone();
        other.sentinels.area = "NAO MAPEADO".into();
        let relabelled = cache.get_or_reconcile(&r, &k, &t, &other)?;
        assert!(relabelled.records.iter().any(|rec| rec.area == "NAO MAPEADO"));
        assert_eq!(cache.misses(), 3);

        cache.invalidate();
        assert!(cache.fingerprint().is_none());
        Ok(())
    }

    #[test]
    fn fingerprint_is_stable() -> Result<()> {
        let (r, k, t) = fixtures::tables()?;
        let cfg = EngineConfig::default();
        let fp = fingerprint(&r, &k, &t, &cfg)?;
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, fingerprint(&r, &k, &t, &cfg)?);
        assert_ne!(fp, fingerprint(&k, &r, &t, &cfg)?);

        let mut other = cfg.clone();
        other.top_n = 3;
        assert_ne!(fp, fingerprint(&r, &k, &t, &other)?);
        Ok(())
    }
}
