//! Reconciliation and gap analytics for ENAMED exam results.
//!
//! Three independently sourced tables (per-student responses, the per-booklet
//! answer key and the question taxonomy) are normalized, reshaped to long
//! form, joined on (booklet, question) and scored. The gap engine then
//! compares one institution against the comparison cohort per taxonomy
//! bucket.
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod gaps;
pub mod ingest;
pub mod process;
pub mod reconcile;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use gaps::{compute_gaps, GapQuery, GapRecord, GapReport, TaxonomyLevel};
pub use reconcile::{reconcile, Reconciled, ReconciledRecord};
