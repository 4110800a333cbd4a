// src/process/mod.rs
//! Table-level transforms between ingestion and reconciliation:
//! column detection, key coercion and wide-to-long reshaping.
pub mod columns;
pub mod keys;
pub mod reshape;

pub use columns::{find_column, require_column, value_columns};
pub use keys::{coerce_key, coerce_keys, CoercionReport};
pub use reshape::{melt, question_number, LongRow};
