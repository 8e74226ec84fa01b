use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relay_api::{InboundRecord, RecordStream};

/// Counters of the subscription side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InboundStats {
    pub received: u64,
    /// Records that failed to decode: skipped, not acked.
    pub skipped: u64,
    pub stream_errors: u64,
}

/// Subscription loop: bus stream → bounded channel.
///
/// `send().await` blocks while the channel is full, which is the only flow
/// control towards the bus. The loop ends when the token is cancelled, the
/// stream closes, or the batching side has gone away. Dropping `tx` on exit
/// closes the channel.
///
/// The stream is handed back instead of dropped: the caller keeps the
/// subscription alive until the final batch has been acked.
pub async fn run_subscription(
    mut stream: Box<dyn RecordStream>,
    tx: mpsc::Sender<InboundRecord>,
    token: CancellationToken,
) -> (InboundStats, Box<dyn RecordStream>) {
    let mut stats = InboundStats::default();

    loop {
        let item = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            item = stream.next() => item,
        };

        let record = match item {
            Some(Ok(record)) => record,
            Some(Err(e)) if e.is_undecodable() => {
                stats.skipped += 1;
                tracing::warn!(error = %e, "undecodable message, skipping without ack");
                continue;
            }
            Some(Err(e)) => {
                stats.stream_errors += 1;
                tracing::error!(error = %e, "subscription stream error");
                continue;
            }
            None => {
                tracing::info!("subscription stream closed");
                break;
            }
        };

        stats.received += 1;
        let sequence = record.sequence();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(sequence, "shutdown while enqueuing, record left for redelivery");
                break;
            }
            sent = tx.send(record) => {
                if sent.is_err() {
                    tracing::warn!("batcher gone, stopping subscription");
                    break;
                }
            }
        }
    }

    tracing::info!(
        received = stats.received,
        skipped = stats.skipped,
        stream_errors = stats.stream_errors,
        "subscription stopped"
    );
    (stats, stream)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bus_memory::MemoryBus;
    use relay_api::{Bus, SubscriptionSpec};

    use super::*;

    fn spec() -> SubscriptionSpec {
        SubscriptionSpec {
            subject: "chat.>".into(),
            group: "relay".into(),
            durable: "relay-durable".into(),
            stream: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_blocked_on_full_channel() {
        let bus = MemoryBus::new();
        for i in 0..3 {
            bus.publish("chat.v1.msg.1", format!("m{i}")).await.unwrap();
        }
        let stream = bus.subscribe(&spec()).await.unwrap();

        // Capacity 1 and nobody reads: the second send parks.
        let (tx, mut rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let task = tokio::spawn(run_subscription(stream, tx, token.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        token.cancel();
        let (stats, _stream) = task.await.unwrap();
        assert_eq!(stats.received, 2);

        let queued = rx.recv().await.unwrap();
        assert_eq!(queued.sequence(), 1);
        assert!(rx.recv().await.is_none());
        assert!(bus.acked().await.is_empty());
    }

    #[tokio::test]
    async fn ends_with_the_stream() {
        let bus = MemoryBus::new();
        bus.publish("chat.v1.msg.1", "a").await.unwrap();
        bus.publish_undecodable().await.unwrap();
        bus.end_stream().await;
        let stream = bus.subscribe(&spec()).await.unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let (stats, _stream) = run_subscription(stream, tx, CancellationToken::new()).await;

        assert_eq!(stats, InboundStats { received: 1, skipped: 1, stream_errors: 0 });
        assert_eq!(rx.recv().await.unwrap().sequence(), 1);
        assert!(rx.recv().await.is_none());
    }
}
