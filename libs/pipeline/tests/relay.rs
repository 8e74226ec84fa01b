mod common;

use std::sync::Arc;
use std::time::Duration;

use bus_memory::MemoryBus;
use pipeline::{Lifecycle, LifecycleState, LogContext, PipelineError, Relay, TableConfig};
use storage_memory::MemorySink;

use common::{SUBJECT, batch, publish_n, settle, start, start_with};

const SHORT: Duration = Duration::from_millis(100);
const LONG_TIMEOUT: Duration = Duration::from_secs(60);

// ═══════════════════════════════════════════════════════════════
//  Flush triggers
// ═══════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn size_trigger_flushes_full_batches() {
    let h = start(batch(10, LONG_TIMEOUT)).await;
    publish_n(&h.bus, 25).await;
    settle(SHORT).await;

    assert_eq!(h.sink.batch_sizes().await, vec![10, 10]);
    assert_eq!(h.bus.acked().await, (1..=20).collect::<Vec<u64>>());

    h.relay.shutdown();
    let stats = h.relay.join().await.unwrap();
    assert_eq!(h.sink.batch_sizes().await, vec![10, 10, 5]);
    assert_eq!(h.bus.acked().await, (1..=25).collect::<Vec<u64>>());
    assert_eq!(stats.batches.batches_written, 3);
    assert_eq!(stats.batches.records_acked, 25);
}

#[tokio::test(start_paused = true)]
async fn timer_flushes_partial_batch() {
    let h = start(batch(1000, Duration::from_secs(5))).await;
    publish_n(&h.bus, 3).await;
    settle(SHORT).await;
    assert_eq!(h.sink.row_count().await, 0);
    assert!(h.bus.acked().await.is_empty());

    settle(Duration::from_secs(5)).await;
    assert_eq!(h.sink.batch_sizes().await, vec![3]);
    assert_eq!(h.bus.acked().await, vec![1, 2, 3]);

    h.relay.shutdown();
    h.relay.join().await.unwrap();
    assert_eq!(h.sink.batch_sizes().await, vec![3]);
}

#[tokio::test(start_paused = true)]
async fn idle_ticks_never_touch_the_sink() {
    let h = start(batch(10, Duration::from_secs(1))).await;
    settle(Duration::from_secs(30)).await;
    assert_eq!(h.sink.prepare_calls(), 0);

    h.relay.shutdown();
    let stats = h.relay.join().await.unwrap();
    assert_eq!(h.sink.prepare_calls(), 0);
    assert_eq!(stats.batches.batches_written, 0);
}

#[tokio::test(start_paused = true)]
async fn size_flush_does_not_reset_the_timer() {
    let h = start(batch(5, Duration::from_secs(1))).await;
    settle(Duration::from_millis(900)).await;

    publish_n(&h.bus, 6).await;
    settle(Duration::from_millis(10)).await;
    assert_eq!(h.sink.batch_sizes().await, vec![5]);

    // Next tick is still due at t=1s, not one period after the size flush.
    settle(Duration::from_millis(140)).await;
    assert_eq!(h.sink.batch_sizes().await, vec![5, 1]);
    assert_eq!(h.bus.acked().await, (1..=6).collect::<Vec<u64>>());

    h.relay.shutdown();
    h.relay.join().await.unwrap();
    assert_eq!(h.sink.prepare_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn rows_keep_arrival_order() {
    let h = start(batch(7, Duration::from_secs(1))).await;
    publish_n(&h.bus, 30).await;
    settle(Duration::from_secs(2)).await;

    let sequences: Vec<u64> = h.sink.rows().await.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, (1..=30).collect::<Vec<u64>>());
    assert_eq!(h.sink.batch_sizes().await, vec![7, 7, 7, 7, 2]);

    let row = &h.sink.rows().await[0];
    assert_eq!(row.routing_key, SUBJECT);
    assert_eq!(row.partition_key, "1001");
    assert_eq!(&row.payload[..], b"{\"n\":0}");
}

// ═══════════════════════════════════════════════════════════════
//  Failures
// ═══════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn failed_write_is_neither_acked_nor_retried() {
    let h = start(batch(5, LONG_TIMEOUT)).await;
    h.sink.fail_next(1).await;

    publish_n(&h.bus, 5).await;
    settle(SHORT).await;
    assert_eq!(h.sink.send_calls(), 1);
    assert_eq!(h.sink.row_count().await, 0);
    assert!(h.bus.acked().await.is_empty());

    // The relay keeps going with the next batch.
    publish_n(&h.bus, 5).await;
    settle(SHORT).await;
    assert_eq!(h.sink.send_calls(), 2);
    assert_eq!(h.sink.batch_sizes().await, vec![5]);
    assert_eq!(h.bus.acked().await, (6..=10).collect::<Vec<u64>>());

    h.relay.shutdown();
    let stats = h.relay.join().await.unwrap();
    assert_eq!(stats.batches.batches_failed, 1);
    assert_eq!(stats.batches.records_dropped, 5);
    assert_eq!(stats.batches.records_acked, 5);
}

#[tokio::test(start_paused = true)]
async fn ack_failure_does_not_stop_the_batch() {
    let bus = MemoryBus::new();
    bus.fail_ack(2).await;
    let h = start_with(bus, MemorySink::new(), batch(3, LONG_TIMEOUT)).await;

    publish_n(&h.bus, 6).await;
    settle(SHORT).await;
    assert_eq!(h.bus.acked().await, vec![1, 3, 4, 5, 6]);
    assert_eq!(h.bus.ack_attempts(), 6);
    assert_eq!(h.sink.row_count().await, 6);

    h.relay.shutdown();
    let stats = h.relay.join().await.unwrap();
    assert_eq!(stats.batches.ack_failures, 1);
    assert_eq!(stats.batches.records_acked, 5);
}

#[tokio::test(start_paused = true)]
async fn undecodable_message_is_skipped() {
    let h = start(batch(100, Duration::from_secs(1))).await;
    h.bus.publish(SUBJECT, "a").await.unwrap();
    h.bus.publish_undecodable().await.unwrap();
    h.bus.publish(SUBJECT, "b").await.unwrap();
    settle(Duration::from_secs(2)).await;

    let sequences: Vec<u64> = h.sink.rows().await.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![1, 3]);
    assert_eq!(h.bus.acked().await, vec![1, 3]);

    h.relay.shutdown();
    let stats = h.relay.join().await.unwrap();
    assert_eq!(stats.inbound.received, 2);
    assert_eq!(stats.inbound.skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn transport_error_keeps_subscription_alive() {
    let h = start(batch(2, LONG_TIMEOUT)).await;
    h.bus.publish(SUBJECT, "a").await.unwrap();
    h.bus.inject_error("connection reset").await.unwrap();
    h.bus.publish(SUBJECT, "b").await.unwrap();
    settle(SHORT).await;

    assert_eq!(h.sink.batch_sizes().await, vec![2]);
    h.relay.shutdown();
    let stats = h.relay.join().await.unwrap();
    assert_eq!(stats.inbound.stream_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn slow_sink_applies_backpressure_without_reordering() {
    let sink = MemorySink::new();
    sink.set_send_delay(Some(Duration::from_millis(500))).await;
    let mut config = batch(10, Duration::from_secs(1));
    config.channel_capacity = Some(2);
    let h = start_with(MemoryBus::new(), sink, config).await;

    publish_n(&h.bus, 50).await;
    settle(Duration::from_secs(10)).await;

    let sequences: Vec<u64> = h.sink.rows().await.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, (1..=50).collect::<Vec<u64>>());
    assert_eq!(h.bus.acked().await.len(), 50);
}

// ═══════════════════════════════════════════════════════════════
//  Lifecycle
// ═══════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn shutdown_drains_buffer_once() {
    let h = start(batch(100, LONG_TIMEOUT)).await;
    let mut states = h.relay.lifecycle().subscribe();
    assert_eq!(*states.borrow_and_update(), LifecycleState::Running);

    publish_n(&h.bus, 7).await;
    settle(SHORT).await;
    assert_eq!(h.sink.row_count().await, 0);

    h.relay.shutdown();
    assert_eq!(h.relay.lifecycle().state(), LifecycleState::Draining);
    h.relay.shutdown();

    let lifecycle = h.relay.lifecycle().clone();
    h.relay.join().await.unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    assert_eq!(h.sink.batch_sizes().await, vec![7]);
    assert_eq!(h.bus.acked().await, (1..=7).collect::<Vec<u64>>());
    assert_eq!(h.sink.prepare_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn stream_end_drains_and_stops() {
    let bus = MemoryBus::new();
    publish_n(&bus, 4).await;
    bus.end_stream().await;
    let h = start_with(bus, MemorySink::new(), batch(100, LONG_TIMEOUT)).await;

    let lifecycle = h.relay.lifecycle().clone();
    let stats = h.relay.join().await.unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    assert!(!lifecycle.is_shutdown_requested());
    assert_eq!(h.sink.batch_sizes().await, vec![4]);
    assert_eq!(stats.inbound.received, 4);
    assert_eq!(stats.batches.records_acked, 4);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_stopped_can_be_awaited() {
    let h = start(batch(10, LONG_TIMEOUT)).await;
    let lifecycle = h.relay.lifecycle().clone();
    let waiter = tokio::spawn({
        let lifecycle = lifecycle.clone();
        async move { lifecycle.stopped().await }
    });

    lifecycle.shutdown();
    waiter.await.unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    h.relay.join().await.unwrap();
    assert_eq!(h.sink.prepare_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_with_empty_buffer_writes_nothing() {
    let h = start(batch(10, Duration::from_secs(1))).await;
    publish_n(&h.bus, 10).await;
    settle(SHORT).await;
    assert_eq!(h.sink.batch_sizes().await, vec![10]);

    h.relay.shutdown();
    let stats = h.relay.join().await.unwrap();
    assert_eq!(h.sink.prepare_calls(), 1);
    assert_eq!(h.sink.send_calls(), 1);
    assert_eq!(stats.batches.batches_written, 1);
    assert_eq!(stats.batches.records_abandoned, 0);
}

#[tokio::test]
async fn oversized_batch_config_is_rejected() {
    let err = Relay::new(
        batch(usize::MAX, LONG_TIMEOUT),
        &TableConfig::default(),
        Arc::new(MemorySink::new()),
        Lifecycle::new(),
        LogContext::disabled("test"),
    )
    .err()
    .expect("config error");
    assert!(matches!(err, PipelineError::Config(_)), "{err}");
}

// ═══════════════════════════════════════════════════════════════
//  End to end
// ═══════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn twenty_five_hundred_records_in_three_batches() {
    let bus = MemoryBus::new();
    publish_n(&bus, 2500).await;
    let h = start_with(bus, MemorySink::new(), batch(1000, Duration::from_secs(5))).await;

    settle(SHORT).await;
    assert_eq!(h.sink.batch_sizes().await, vec![1000, 1000]);

    settle(Duration::from_secs(5)).await;
    assert_eq!(h.sink.batch_sizes().await, vec![1000, 1000, 500]);

    let acked = h.bus.acked().await;
    assert_eq!(acked, (1..=2500).collect::<Vec<u64>>());

    h.relay.shutdown();
    let stats = h.relay.join().await.unwrap();
    assert_eq!(stats.batches.batches_written, 3);
    assert_eq!(stats.batches.records_written, 2500);
    assert_eq!(h.sink.prepare_calls(), 3);
}
