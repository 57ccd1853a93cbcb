use std::collections::VecDeque;

use tokio::sync::Mutex;

use super::model::DeliveryOutcome;
use super::RECENT_OUTCOMES_CAP;

#[derive(Debug, Default)]
struct Tally {
    success: u64,
    failure: u64,
    recent: VecDeque<DeliveryOutcome>,
}

/// Shared sink for worker outcomes. Counts are exact; only the most recent
/// outcomes (in arrival order) are retained.
#[derive(Debug, Default)]
pub struct OutcomeAggregator {
    inner: Mutex<Tally>,
}

/// Aggregated counts handed back by [`OutcomeAggregator::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub success_count: u64,
    pub failure_count: u64,
    pub recent_outcomes: Vec<DeliveryOutcome>,
}

impl OutcomeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, outcome: DeliveryOutcome) {
        let mut tally = self.inner.lock().await;
        if outcome.ok {
            tally.success += 1;
        } else {
            tally.failure += 1;
        }
        if tally.recent.len() == RECENT_OUTCOMES_CAP {
            tally.recent.pop_front();
        }
        tally.recent.push_back(outcome);
    }

    /// Drain the tally. Call once, after every worker has been joined.
    pub async fn finalize(&self) -> Aggregate {
        let tally = std::mem::take(&mut *self.inner.lock().await);
        Aggregate {
            success_count: tally.success,
            failure_count: tally.failure,
            recent_outcomes: tally.recent.into(),
        }
    }
}
