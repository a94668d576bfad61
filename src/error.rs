// src/error.rs
use serde::Serialize;

use crate::listing::SourceKind;

/// Errors surfaced to feed consumers. Carried as a value on [`crate::FeedView`],
/// never raised across the orchestrator boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum FeedError {
    /// One source failed; the page degrades to the remaining sources.
    #[error("{kind} source failed: {message}")]
    Source { kind: SourceKind, message: String },

    /// Every enabled source failed for this page.
    #[error("all enabled sources failed ({} errors)", failures.len())]
    AllSourcesFailed { failures: Vec<FeedError> },

    /// Snapshot persistence problem. Only reported by snapshot writes and logged.
    #[error("snapshot store: {0}")]
    Store(String),
}

impl FeedError {
    pub fn source_failed(kind: SourceKind, err: &anyhow::Error) -> Self {
        FeedError::Source {
            kind,
            message: format!("{err:#}"),
        }
    }
}
