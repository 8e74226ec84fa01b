#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bus_memory::MemoryBus;
use pipeline::{BatchConfig, Lifecycle, LogContext, Relay, RelayHandle, TableConfig, subscribe};
use relay_api::SubscriptionSpec;
use storage_memory::MemorySink;

pub const SUBJECT: &str = "chat.v1.msg.1001";

pub struct Harness {
    pub bus: MemoryBus,
    pub sink: MemorySink,
    pub relay: RelayHandle,
}

pub fn spec() -> SubscriptionSpec {
    SubscriptionSpec {
        subject: "chat.>".into(),
        group: "relay".into(),
        durable: "relay-durable".into(),
        stream: None,
    }
}

pub fn batch(size: usize, timeout: Duration) -> BatchConfig {
    BatchConfig::new(size, timeout)
}

/// Start a relay over fresh in-memory bus and sink. Messages published on
/// `bus` before the call are already queued for the subscription.
pub async fn start_with(bus: MemoryBus, sink: MemorySink, config: BatchConfig) -> Harness {
    let stream = subscribe(&bus, &spec()).await.expect("subscribe");
    let relay = Relay::new(
        config,
        &TableConfig::default(),
        Arc::new(sink.clone()),
        Lifecycle::new(),
        LogContext::disabled("test"),
    )
    .expect("relay config")
    .start(stream);
    Harness { bus, sink, relay }
}

pub async fn start(config: BatchConfig) -> Harness {
    start_with(MemoryBus::new(), MemorySink::new(), config).await
}

pub async fn publish_n(bus: &MemoryBus, n: usize) -> Vec<u64> {
    let mut sequences = Vec::with_capacity(n);
    for i in 0..n {
        let seq = bus.publish(SUBJECT, format!("{{\"n\":{i}}}")).await.expect("publish");
        sequences.push(seq);
    }
    sequences
}

/// Let the relay tasks run. Under a paused clock this also advances time.
pub async fn settle(duration: Duration) {
    tokio::time::sleep(duration).await;
}
