use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use relay_api::{Bus, InboundRecord, RecordStream, SinkConnection, SubscriptionSpec};

use crate::acker::ack_all;
use crate::batcher::{Batch, Batcher};
use crate::config::{BatchConfig, TableConfig};
use crate::inbound::{InboundStats, run_subscription};
use crate::lifecycle::Lifecycle;
use crate::log::LogContext;
use crate::writer::SinkWriter;
use crate::PipelineError;

// ═══════════════════════════════════════════════════════════════
//  Stats
// ═══════════════════════════════════════════════════════════════

/// Counters of the batching side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub batches_written: u64,
    pub batches_failed: u64,
    pub records_written: u64,
    /// Records of failed batches. Not acked, redelivered by the bus.
    pub records_dropped: u64,
    pub records_acked: u64,
    pub ack_failures: u64,
    /// Records still queued in the channel when draining finished.
    pub records_abandoned: u64,
}

/// Final report of a stopped relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub inbound: InboundStats,
    pub batches: BatchStats,
}

// ═══════════════════════════════════════════════════════════════
//  Relay
// ═══════════════════════════════════════════════════════════════

/// Subscribe `spec` on `bus`, mapping the failure to a startup error.
pub async fn subscribe(bus: &dyn Bus, spec: &SubscriptionSpec) -> Result<Box<dyn RecordStream>, PipelineError> {
    bus.subscribe(spec).await.map_err(|e| PipelineError::Subscription {
        subject: spec.subject.clone(),
        source: e,
    })
}

/// Связка subscription → bounded channel → batcher → sink → ack.
///
/// Две задачи на relay:
/// - subscription: читает поток шины и кладёт записи в канал (backpressure
///   через `send().await`);
/// - batcher: единственный владелец буфера, flush по размеру, по таймеру и
///   один раз при остановке. Ack только после успешной записи.
///
/// Третья, супервизор, дожидается обеих и переводит lifecycle в `Stopped`.
pub struct Relay {
    batch: BatchConfig,
    writer: SinkWriter,
    lifecycle: Lifecycle,
    log: LogContext,
}

impl Relay {
    pub fn new(
        batch: BatchConfig,
        table: &TableConfig,
        sink: Arc<dyn SinkConnection>,
        lifecycle: Lifecycle,
        log: LogContext,
    ) -> Result<Self, PipelineError> {
        batch.validate().map_err(PipelineError::Config)?;
        table.validate().map_err(PipelineError::Config)?;
        let writer = SinkWriter::new(sink, table.descriptor(), table.partition_key_segment);
        Ok(Self { batch, writer, lifecycle, log })
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Start both tasks on `stream`. Must be called inside a tokio runtime.
    pub fn start(self, stream: Box<dyn RecordStream>) -> RelayHandle {
        let Relay { batch, writer, lifecycle, log } = self;
        let (tx, rx) = mpsc::channel::<InboundRecord>(batch.channel_capacity());

        tracing::dispatcher::with_default(log.dispatch(), || {
            tracing::info!(
                relay = %log.relay(),
                table = %writer.table().table,
                batch_size = batch.size,
                batch_timeout_ms = batch.timeout_ms,
                channel_capacity = batch.channel_capacity(),
                "relay starting"
            );
        });

        let subscription = log.spawn("subscription", run_subscription(stream, tx, lifecycle.token()));
        let batcher = log.spawn("batcher", run_batcher(rx, writer, batch, lifecycle.clone()));
        let supervisor = log.spawn("supervisor", supervise(subscription, batcher, lifecycle.clone()));

        RelayHandle { supervisor, lifecycle }
    }
}

/// Handle of a started relay.
pub struct RelayHandle {
    supervisor: JoinHandle<Result<RelayStats, PipelineError>>,
    lifecycle: Lifecycle,
}

impl RelayHandle {
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Request a graceful stop. Idempotent.
    pub fn shutdown(&self) {
        self.lifecycle.shutdown();
    }

    /// Wait for `Stopped` and return the final counters.
    pub async fn join(self) -> Result<RelayStats, PipelineError> {
        self.supervisor
            .await
            .map_err(|source| PipelineError::Join { task: "supervisor", source })?
    }
}

async fn supervise(
    subscription: JoinHandle<(InboundStats, Box<dyn RecordStream>)>,
    batcher: JoinHandle<BatchStats>,
    lifecycle: Lifecycle,
) -> Result<RelayStats, PipelineError> {
    let subscription = subscription.await;
    let batches = batcher.await;

    // Stream is dropped (unsubscribed) only after the last batch was acked.
    let inbound = match subscription {
        Ok((stats, stream)) => {
            drop(stream);
            Ok(stats)
        }
        Err(source) => Err(PipelineError::Join { task: "subscription", source }),
    };
    let batches = batches.map_err(|source| PipelineError::Join { task: "batcher", source });

    lifecycle.mark_stopped();

    let stats = RelayStats { inbound: inbound?, batches: batches? };
    tracing::info!(
        received = stats.inbound.received,
        skipped = stats.inbound.skipped,
        batches_written = stats.batches.batches_written,
        batches_failed = stats.batches.batches_failed,
        records_acked = stats.batches.records_acked,
        "relay stopped"
    );
    Ok(stats)
}

// ═══════════════════════════════════════════════════════════════
//  Batcher task
// ═══════════════════════════════════════════════════════════════

async fn run_batcher(
    mut rx: mpsc::Receiver<InboundRecord>,
    writer: SinkWriter,
    config: BatchConfig,
    lifecycle: Lifecycle,
) -> BatchStats {
    let token = lifecycle.token();
    let mut batcher = Batcher::new(config.size);
    let mut stats = BatchStats::default();

    let period = config.timeout();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::info!(buffered = batcher.len(), "shutdown requested, draining");
                break;
            }
            _ = ticker.tick() => {
                if let Some(batch) = batcher.on_timer() {
                    flush(&writer, batch, &mut stats).await;
                }
            }
            received = rx.recv() => {
                let Some(record) = received else {
                    tracing::info!(buffered = batcher.len(), "inbound channel closed, draining");
                    break;
                };
                match batcher.accept(record) {
                    Ok(Some(batch)) => flush(&writer, batch, &mut stats).await,
                    Ok(None) => {}
                    Err(record) => {
                        tracing::warn!(sequence = record.sequence(), "batcher closed, record left for redelivery");
                    }
                }
            }
        }
    }

    lifecycle.begin_draining();
    if let Some(batch) = batcher.on_shutdown() {
        flush(&writer, batch, &mut stats).await;
    }

    rx.close();
    while let Ok(record) = rx.try_recv() {
        stats.records_abandoned += 1;
        drop(record);
    }
    if stats.records_abandoned > 0 {
        tracing::info!(count = stats.records_abandoned, "queued records left un-acked for redelivery");
    }
    stats
}

/// Write one batch, ack it on success, drop it on failure.
async fn flush(writer: &SinkWriter, batch: Batch, stats: &mut BatchStats) {
    let size = batch.len();
    let trigger = batch.trigger;
    let (first_sequence, last_sequence) = batch.sequence_range().unwrap_or_default();
    let age_ms = batch.opened_at.elapsed().as_millis() as u64;

    match writer.write(&batch).await {
        Ok(receipt) => {
            stats.batches_written += 1;
            stats.records_written += receipt.rows as u64;
            let report = ack_all(batch).await;
            stats.records_acked += report.acked as u64;
            stats.ack_failures += report.failed as u64;
            tracing::info!(
                rows = receipt.rows,
                %trigger,
                first_sequence,
                last_sequence,
                age_ms,
                ack_failures = report.failed,
                "batch committed"
            );
        }
        Err(e) => {
            stats.batches_failed += 1;
            stats.records_dropped += size as u64;
            tracing::error!(
                size,
                %trigger,
                first_sequence,
                last_sequence,
                error = %e,
                "batch write failed, records left un-acked for redelivery"
            );
        }
    }
}
