use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::aggregator::OutcomeAggregator;
use super::error::{BroadcastError, DeliveryError};
use super::model::{DeliveryOperation, DeliveryOutcome, RunPhase, RunSummary};
use super::pacing::{Pace, PacingPolicy};
use super::recorder::RunRecorder;
use super::source::{DestinationSource, Snapshot};
use super::transport::DeliveryTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of deliveries in flight at once.
    pub concurrency: usize,
    pub pacing: PacingPolicy,
    /// Per-chat deadline; `None` waits for the transport indefinitely.
    pub delivery_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 15,
            pacing: PacingPolicy::default(),
            delivery_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Fans one payload out to every eligible chat and records the run.
#[derive(Clone)]
pub struct BroadcastEngine {
    source: Arc<dyn DestinationSource>,
    transport: Arc<dyn DeliveryTransport>,
    recorder: Arc<dyn RunRecorder>,
    config: EngineConfig,
}

impl BroadcastEngine {
    pub fn new(
        source: Arc<dyn DestinationSource>,
        transport: Arc<dyn DeliveryTransport>,
        recorder: Arc<dyn RunRecorder>,
        config: EngineConfig,
    ) -> Self {
        Self {
            source,
            transport,
            recorder,
            config,
        }
    }

    /// Execute one complete run. Returns once every admitted chat has an
    /// outcome and the summary has been persisted.
    #[instrument(skip_all, fields(mode = operation.mode().as_str()))]
    pub async fn run(&self, operation: DeliveryOperation) -> Result<RunSummary, BroadcastError> {
        let run_id = Uuid::new_v4();
        let mode = operation.mode();
        let started_at = Utc::now();
        let mut phase = RunPhase::Created;

        advance(&mut phase, RunPhase::Enumerating, run_id);
        let destinations = match self.source.enumerate().await {
            Ok(destinations) => destinations,
            Err(err) => {
                error!(%run_id, ?err, "failed to enumerate destinations; nothing sent");
                return Err(BroadcastError::Enumeration(err));
            }
        };
        info!(%run_id, destinations = destinations.remaining(), "starting broadcast");

        advance(&mut phase, RunPhase::Dispatching, run_id);
        let aggregator = Arc::new(OutcomeAggregator::new());
        let admitted = self
            .dispatch(destinations, Arc::new(operation), aggregator.clone())
            .await;

        advance(&mut phase, RunPhase::Aggregating, run_id);
        let aggregate = aggregator.finalize().await;
        let summary = RunSummary {
            run_id,
            mode,
            started_at,
            finished_at: Utc::now(),
            success_count: aggregate.success_count,
            failure_count: aggregate.failure_count,
            recent_outcomes: aggregate.recent_outcomes,
        };
        debug_assert_eq!(summary.attempted(), admitted as u64);

        let persisted = self.recorder.persist(&summary).await;
        advance(&mut phase, terminal_phase(&persisted), run_id);
        match persisted {
            Ok(record_id) => {
                info!(
                    %run_id,
                    record_id,
                    sent = summary.success_count,
                    failed = summary.failure_count,
                    "broadcast finished"
                );
                Ok(summary)
            }
            Err(err) => {
                error!(
                    %run_id,
                    ?err,
                    sent = summary.success_count,
                    failed = summary.failure_count,
                    "broadcast finished but audit record was not stored"
                );
                Err(BroadcastError::Persistence {
                    summary: Box::new(summary),
                    source: err,
                })
            }
        }
    }

    /// Admit chats in snapshot order through the gate, pausing per the pacing
    /// policy, then wait for every worker. Returns the number admitted.
    async fn dispatch(
        &self,
        destinations: Snapshot,
        operation: Arc<DeliveryOperation>,
        aggregator: Arc<OutcomeAggregator>,
    ) -> usize {
        let gate = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut workers = JoinSet::new();
        let mut admitted = 0usize;

        for chat_id in destinations {
            if let Pace::Sleep(pause) = self.config.pacing.decide(admitted) {
                debug!(admitted, ?pause, "pacing pause");
                tokio::time::sleep(pause).await;
            }
            // The gate is local to this call and never closed.
            let Ok(permit) = gate.clone().acquire_owned().await else {
                break;
            };
            admitted += 1;

            let transport = self.transport.clone();
            let operation = operation.clone();
            let aggregator = aggregator.clone();
            let timeout = self.config.delivery_timeout;
            workers.spawn(async move {
                let result = attempt(transport.as_ref(), chat_id, &operation, timeout).await;
                drop(permit);
                let outcome = match result {
                    Ok(()) => DeliveryOutcome::delivered(chat_id),
                    Err(err) => {
                        warn!(chat_id, error = %err, "delivery failed");
                        DeliveryOutcome::failed(chat_id, err.to_string())
                    }
                };
                aggregator.record(outcome).await;
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(?err, "broadcast worker did not complete");
            }
        }
        admitted
    }
}

fn advance(phase: &mut RunPhase, next: RunPhase, run_id: Uuid) {
    debug_assert!(!phase.is_terminal(), "run already finished as {phase:?}");
    debug!(%run_id, from = ?phase, to = ?next, "run phase");
    *phase = next;
}

/// Where a run ends once the audit write has returned.
fn terminal_phase<T>(persisted: &anyhow::Result<T>) -> RunPhase {
    if persisted.is_ok() {
        RunPhase::Recorded
    } else {
        RunPhase::RecordFailed
    }
}

/// One delivery attempt with transport errors, deadline and panics all
/// folded into [`DeliveryError`].
async fn attempt(
    transport: &dyn DeliveryTransport,
    chat_id: i64,
    operation: &DeliveryOperation,
    timeout: Option<Duration>,
) -> Result<(), DeliveryError> {
    let delivery = AssertUnwindSafe(transport.deliver(chat_id, operation)).catch_unwind();
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, delivery)
            .await
            .map_err(|_| DeliveryError::TimedOut(limit))?,
        None => delivery.await,
    };
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(DeliveryError::Transport(err)),
        Err(_) => Err(DeliveryError::Panicked),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    struct Scripted;

    #[async_trait]
    impl DeliveryTransport for Scripted {
        async fn deliver(&self, chat_id: i64, _operation: &DeliveryOperation) -> Result<()> {
            match chat_id {
                1 => Ok(()),
                2 => Err(anyhow!("Forbidden: bot is not a member of the channel chat")),
                3 => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
                _ => panic!("chat vanished"),
            }
        }
    }

    fn op() -> DeliveryOperation {
        DeliveryOperation::SendText("hello".into())
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_classifies_failures() {
        let limit = Some(Duration::from_secs(5));
        assert!(attempt(&Scripted, 1, &op(), limit).await.is_ok());

        let err = attempt(&Scripted, 2, &op(), limit).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
        assert!(err.to_string().contains("Forbidden"));

        let err = attempt(&Scripted, 3, &op(), limit).await.unwrap_err();
        assert!(matches!(err, DeliveryError::TimedOut(d) if d == Duration::from_secs(5)));

        let err = attempt(&Scripted, 4, &op(), limit).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Panicked));
    }

    #[tokio::test(start_paused = true)]
    async fn no_deadline_waits_for_slow_transport() {
        assert!(attempt(&Scripted, 3, &op(), None).await.is_ok());
    }

    #[test]
    fn audit_write_decides_terminal_phase() {
        let stored: Result<i64> = Ok(7);
        let lost: Result<i64> = Err(anyhow!("database is locked"));
        assert_eq!(terminal_phase(&stored), RunPhase::Recorded);
        assert_eq!(terminal_phase(&lost), RunPhase::RecordFailed);
    }

    #[test]
    fn phases_advance_in_order() {
        let run_id = Uuid::new_v4();
        let mut phase = RunPhase::Created;
        for next in [
            RunPhase::Enumerating,
            RunPhase::Dispatching,
            RunPhase::Aggregating,
            RunPhase::RecordFailed,
        ] {
            advance(&mut phase, next, run_id);
            assert_eq!(phase, next);
        }
        assert!(phase.is_terminal());
    }

    #[test]
    #[should_panic(expected = "run already finished")]
    fn finished_run_cannot_advance() {
        let mut phase = RunPhase::Recorded;
        advance(&mut phase, RunPhase::Dispatching, Uuid::new_v4());
    }
}
