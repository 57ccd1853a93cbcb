//! Broadcast delivery engine.
//!
//! A run takes a snapshot of eligible chats from a [`DestinationSource`],
//! admits them in order through a bounded gate (paced by [`PacingPolicy`]),
//! delivers through a [`DeliveryTransport`], tallies outcomes in an
//! [`OutcomeAggregator`] and finally hands the [`RunSummary`] to a
//! [`RunRecorder`].
//!
//! Per-chat failures are absorbed into the summary. Only enumeration and
//! persistence failures surface as [`BroadcastError`].

pub mod aggregator;
pub mod engine;
pub mod error;
pub mod model;
pub mod pacing;
pub mod recorder;
pub mod source;
pub mod transport;

/// Number of outcomes retained in a run summary.
pub const RECENT_OUTCOMES_CAP: usize = 50;

pub use aggregator::OutcomeAggregator;
pub use engine::{BroadcastEngine, EngineConfig};
pub use error::{BroadcastError, DeliveryError};
pub use model::{
    BroadcastMode, DeliveryOperation, DeliveryOutcome, Destination, MessageRef, RunPhase,
    RunSummary,
};
pub use pacing::{Pace, PacingPolicy};
pub use recorder::RunRecorder;
pub use source::{DestinationSource, Snapshot, StaticSource};
pub use transport::DeliveryTransport;
