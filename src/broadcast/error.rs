use std::time::Duration;

use thiserror::Error;

use super::model::RunSummary;

/// Errors that cross the engine boundary. Per-chat failures never do.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("failed to enumerate destinations: {0:#}")]
    Enumeration(#[source] anyhow::Error),
    #[error(
        "broadcast finished (sent {}, failed {}) but the audit record was not stored: {source:#}",
        .summary.success_count,
        .summary.failure_count
    )]
    Persistence {
        summary: Box<RunSummary>,
        #[source]
        source: anyhow::Error,
    },
}

impl BroadcastError {
    /// Summary of the deliveries that did happen, if dispatch ran at all.
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            BroadcastError::Enumeration(_) => None,
            BroadcastError::Persistence { summary, .. } => Some(summary),
        }
    }
}

/// Why a single chat did not receive the broadcast. Always absorbed into a
/// failed outcome.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{0:#}")]
    Transport(anyhow::Error),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("delivery task panicked")]
    Panicked,
}
