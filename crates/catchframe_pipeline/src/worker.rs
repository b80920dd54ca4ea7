//! Stage worker
//!
//! Design principles:
//! - Handlers are stateless; everything shared lives in the stores
//! - A semaphore bounds in-flight deliveries across all consumed topics
//! - Every handler runs under the stage deadline; a timeout is a failure
//! - Deliveries tracked with JoinHandles, drained on graceful shutdown

use catchframe_protocol::{ReportId, StatusUpdate, TriggerPayload};
use catchframe_store::{DeadLetterReason, Delivery};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::context::PipelineContext;
use crate::error::{ErrorClass, PipelineError};
use crate::fsm::{Stage, Transition};
use crate::handler::{StageHandler, StageOutcome};
use crate::metrics::METRICS;
use crate::retry::RetryDecision;
use crate::sweep::Sweeper;

/// How one delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handler succeeded; delivery acked
    Settled(StageOutcome),
    /// Handler failed; delivery released for redelivery after the backoff
    Retrying(Duration),
    DeadLettered(DeadLetterReason),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub deliveries: usize,
    pub advanced: usize,
    pub skipped: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &DeliveryOutcome) {
        self.deliveries += 1;
        match outcome {
            DeliveryOutcome::Settled(StageOutcome::Advanced { .. }) => self.advanced += 1,
            DeliveryOutcome::Settled(_) => self.skipped += 1,
            DeliveryOutcome::Retrying(_) => self.retried += 1,
            DeliveryOutcome::DeadLettered(_) => self.dead_lettered += 1,
        }
    }
}

/// Handle for controlling a running worker
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join_handle: JoinHandle<RunSummary>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for in-flight deliveries.
    pub async fn shutdown(self) -> Result<RunSummary, tokio::task::JoinError> {
        let _ = self.shutdown_tx.send(()).await;
        self.join_handle.await
    }
}

pub struct StageWorker {
    ctx: Arc<PipelineContext>,
    handler: StageHandler,
    transitions: Vec<Transition>,
    permits: Arc<Semaphore>,
    active: HashMap<i64, JoinHandle<DeliveryOutcome>>,
    sweep_interval: Option<Duration>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl StageWorker {
    /// Worker over every active transition.
    /// Returns (StageWorker, shutdown sender); dropping the sender also stops it.
    pub fn new(ctx: Arc<PipelineContext>) -> (Self, mpsc::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let transitions = ctx.table.transitions().to_vec();
        let permits = Arc::new(Semaphore::new(ctx.config.worker.concurrency));
        (
            Self {
                handler: StageHandler::new(ctx.clone()),
                ctx,
                transitions,
                permits,
                active: HashMap::new(),
                sweep_interval: None,
                shutdown_rx,
            },
            shutdown_tx,
        )
    }

    /// Consume only the listed stages' topics.
    pub fn only_stages(mut self, stages: &[Stage]) -> Self {
        self.transitions.retain(|t| stages.contains(&t.stage));
        self
    }

    /// Run the stall sweep every `interval` from the poll loop.
    pub fn with_sweep(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    pub fn topics(&self) -> Vec<&str> {
        self.transitions.iter().map(|t| t.topic.as_str()).collect()
    }

    /// Spawn `run`; the handle takes over the shutdown sender.
    pub fn spawn(self, shutdown_tx: mpsc::Sender<()>) -> WorkerHandle {
        WorkerHandle {
            shutdown_tx,
            join_handle: tokio::spawn(self.run()),
        }
    }

    /// Main poll loop - consumes self (can only be called once)
    pub async fn run(mut self) -> RunSummary {
        info!(topics = ?self.topics(), concurrency = self.ctx.config.worker.concurrency, "Worker started");
        let mut summary = RunSummary::default();
        let mut poll = tokio::time::interval(self.ctx.config.worker.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let sweeper = Sweeper::new(self.ctx.clone());
        let mut last_sweep: Option<Instant> = None;

        loop {
            self.reap_completed(&mut summary).await;

            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, waiting for {} active deliveries...", self.active.len());
                    self.wait_for_all(&mut summary).await;
                    break;
                }

                _ = poll.tick() => {
                    self.claim_and_spawn().await;

                    if let Some(every) = self.sweep_interval {
                        if last_sweep.map_or(true, |at| at.elapsed() >= every) {
                            last_sweep = Some(Instant::now());
                            if let Err(e) = sweeper.sweep_once().await {
                                warn!(error = %e, "Sweep failed");
                            }
                        }
                    }
                }
            }
        }

        info!(summary = ?summary, metrics = ?METRICS.snapshot(), "Worker stopped");
        summary
    }

    /// Process everything currently visible, stage by stage, then return.
    /// Triggers published by an earlier stage are picked up by later ones
    /// in the same call.
    pub async fn run_once(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for transition in &self.transitions {
            loop {
                let mut batch = Vec::new();
                while let Ok(permit) = self.permits.clone().try_acquire_owned() {
                    match self.receive(transition).await {
                        Some(delivery) => {
                            batch.push(self.spawn_delivery(transition, delivery, permit))
                        }
                        None => break,
                    }
                }
                if batch.is_empty() {
                    break;
                }
                for handle in batch {
                    match handle.await {
                        Ok(outcome) => summary.record(&outcome),
                        Err(e) => warn!("Delivery task panicked: {:?}", e),
                    }
                }
            }
        }
        summary
    }

    async fn receive(&self, transition: &Transition) -> Option<Delivery> {
        match self
            .ctx
            .stores
            .channel
            .receive(&transition.topic, self.ctx.config.worker.lease())
            .await
        {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(topic = %transition.topic, error = %e, "Receive failed");
                None
            }
        }
    }

    async fn claim_and_spawn(&mut self) {
        for i in 0..self.transitions.len() {
            loop {
                let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                    return;
                };
                let Some(delivery) = self.receive(&self.transitions[i]).await else {
                    break;
                };
                let message_id = delivery.message_id;
                let handle = self.spawn_delivery(&self.transitions[i], delivery, permit);
                self.active.insert(message_id, handle);
            }
        }
    }

    fn spawn_delivery(
        &self,
        transition: &Transition,
        delivery: Delivery,
        permit: OwnedSemaphorePermit,
    ) -> JoinHandle<DeliveryOutcome> {
        debug!(
            delivery_id = delivery.message_id,
            topic = %delivery.topic,
            attempt = delivery.attempt,
            "Claimed delivery"
        );
        let handler = self.handler.clone();
        let transition = transition.clone();
        tokio::spawn(async move {
            let _permit = permit;
            process_delivery(&handler, &transition, &delivery).await
        })
    }

    /// Remove finished delivery handles and count their outcomes
    async fn reap_completed(&mut self, summary: &mut RunSummary) {
        let finished: Vec<i64> = self
            .active
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            if let Some(handle) = self.active.remove(&id) {
                match handle.await {
                    Ok(outcome) => summary.record(&outcome),
                    Err(e) => warn!("Delivery {} task panicked: {:?}", id, e),
                }
            }
        }
    }

    async fn wait_for_all(&mut self, summary: &mut RunSummary) {
        for (id, handle) in self.active.drain() {
            match handle.await {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => warn!("Delivery {} task panicked during shutdown: {:?}", id, e),
            }
        }
        info!("Graceful shutdown complete");
    }
}

// ============================================================================
// Delivery settlement
// ============================================================================

/// Decode, run under the stage deadline, then ack / nack / dead-letter.
pub async fn process_delivery(
    handler: &StageHandler,
    transition: &Transition,
    delivery: &Delivery,
) -> DeliveryOutcome {
    let ctx = handler.context();
    let channel = &ctx.stores.channel;

    let report_id = match TriggerPayload::decode(&delivery.payload) {
        Ok(payload) => payload.report_id,
        Err(e) => {
            warn!(delivery_id = delivery.message_id, error = %e, "Malformed trigger payload");
            let reason = DeadLetterReason::Malformed;
            if let Err(e) = channel.dead_letter(delivery, reason, &e.to_string()).await {
                warn!(delivery_id = delivery.message_id, error = %e, "Failed to dead-letter delivery");
            }
            METRICS.inc_dead_lettered();
            return DeliveryOutcome::DeadLettered(reason);
        }
    };

    let deadline = ctx.config.worker.stage_timeout();
    let result = match tokio::time::timeout(deadline, handler.handle(transition, &report_id)).await
    {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Deadline {
            report_id: report_id.clone(),
            stage: transition.stage,
            deadline,
        }),
    };

    match result {
        Ok(outcome) => {
            if let Err(e) = channel.ack(delivery).await {
                // The lease expired mid-run; the redelivery will short-circuit
                warn!(report_id = %report_id, delivery_id = delivery.message_id, error = %e, "Ack failed");
            }
            DeliveryOutcome::Settled(outcome)
        }
        Err(err) => settle_failure(ctx, transition, delivery, &report_id, err).await,
    }
}

async fn settle_failure(
    ctx: &PipelineContext,
    transition: &Transition,
    delivery: &Delivery,
    report_id: &ReportId,
    err: PipelineError,
) -> DeliveryOutcome {
    METRICS.inc_stage_failures();
    let class = err.class();
    let message = err.to_string();

    match ctx
        .stores
        .records
        .record_failure(report_id, transition.from, &message)
        .await
    {
        Ok(true) => {}
        Ok(false) => debug!(report_id = %report_id, from = %transition.from, "Report not at stage source; failure not recorded"),
        Err(e) => debug!(report_id = %report_id, error = %e, "Could not record failure on report"),
    }

    match ctx.config.retry.decide(class, delivery.attempt) {
        RetryDecision::RetryAfter(backoff) => {
            info!(
                report_id = %report_id,
                stage = %transition.stage,
                attempt = delivery.attempt,
                backoff_secs = backoff.as_secs(),
                error = %message,
                "Scheduling retry with exponential backoff"
            );
            if let Err(e) = ctx.stores.channel.nack(delivery, backoff, &message).await {
                warn!(report_id = %report_id, error = %e, "Nack failed; lease expiry will redeliver");
            }
            METRICS.inc_retries_scheduled();
            DeliveryOutcome::Retrying(backoff)
        }
        RetryDecision::DeadLetter(reason) => {
            warn!(
                report_id = %report_id,
                stage = %transition.stage,
                attempt = delivery.attempt,
                reason = reason.as_str(),
                error = %message,
                "Delivery moving to dead letter queue"
            );
            match ctx.stores.channel.dead_letter(delivery, reason, &message).await {
                Ok(()) => {
                    METRICS.inc_dead_lettered();
                    if class == ErrorClass::Inconsistency {
                        error!(report_id = %report_id, stage = %transition.stage, "Report stuck: {}", message);
                    }
                    if err.marks_failed() {
                        mark_failed(ctx, transition, report_id, &message).await;
                    }
                }
                Err(e) => {
                    warn!(report_id = %report_id, error = %e, "Failed to dead-letter delivery");
                }
            }
            DeliveryOutcome::DeadLettered(reason)
        }
    }
}

/// Compare-and-set `transition.from -> failed`. A no-op once the record has
/// left this stage's source status, so a concurrent advance is kept.
async fn mark_failed(
    ctx: &PipelineContext,
    transition: &Transition,
    report_id: &ReportId,
    message: &str,
) {
    match ctx
        .stores
        .records
        .advance(report_id, transition.from, &StatusUpdate::failed(message))
        .await
    {
        Ok(true) => warn!(report_id = %report_id, from = %transition.from, "Report marked failed"),
        Ok(false) => debug!(report_id = %report_id, from = %transition.from, "Report moved on before it could be marked failed"),
        Err(e) => warn!(report_id = %report_id, error = %e, "Failed to mark report failed"),
    }
}
