// src/scheduler_error.rs
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl SchedulerError {
    /// Systemic failures abort multi-item operations; everything else is per item.
    pub fn is_systemic(&self) -> bool {
        matches!(self, SchedulerError::Storage(e) if e.is_systemic())
    }
}
