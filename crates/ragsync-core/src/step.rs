//! Three-way result for per-document build steps.
//!
//! A step either produced data, was deliberately skipped (with a reason
//! that ends up in the build log and `unitsSkipped`), or failed fatally.

use crate::error::SyncError;

#[derive(Debug)]
pub enum StepOutcome<T> {
    Ok(T),
    Skip(String),
    Fatal(SyncError),
}
