use std::sync::Arc;

use bus_nats::NatsBus;
use pipeline::{Lifecycle, LogContext, Relay};
use relay_api::Bus;
use storage_clickhouse::ClickHouseSink;

use crate::config::{ServeArgs, ServiceConfig};
use crate::error::ServeError;
use crate::logging;

pub async fn run(args: ServeArgs) -> Result<(), ServeError> {
    // --- Load config ---
    let config = ServiceConfig::load(&args.config)?;

    // --- Logging ---
    let dispatch = logging::dispatch(&config.log)?;
    let _guard = tracing::dispatcher::set_default(&dispatch);
    config.log_banner(&args.config);

    // --- Connect (fail fast) ---
    let bus = NatsBus::connect(&config.nats).await.map_err(ServeError::Bus)?;
    let sink = ClickHouseSink::connect(&config.clickhouse).await.map_err(ServeError::Sink)?;

    let subject = config.subject();
    if config.subjects.len() > 1 {
        tracing::warn!(
            subject,
            ignored = ?&config.subjects[1..],
            "only the first subject is consumed"
        );
    }
    let spec = config.nats.subscription(subject);
    let stream = pipeline::subscribe(&bus, &spec).await?;

    // --- Start relay ---
    let lifecycle = Lifecycle::new();
    let log = LogContext::new(dispatch.clone(), config.nats.durable.clone());
    let relay = Relay::new(config.batch.clone(), &config.table, Arc::new(sink), lifecycle.clone(), log)?
        .start(stream);
    tracing::info!("relay running, press Ctrl+C to stop");

    // --- Wait for a signal or for the stream to end ---
    tokio::select! {
        signal = shutdown_signal() => {
            let signal = signal?;
            tracing::info!(signal, "shutting down...");
        }
        _ = lifecycle.stopped() => {
            tracing::warn!("subscription ended, relay stopped");
        }
    }

    relay.shutdown();
    let stats = relay.join().await?;

    // Acks of the final batch are buffered in the client until flushed.
    bus.close().await.map_err(ServeError::Bus)?;

    tracing::info!(
        received = stats.inbound.received,
        skipped = stats.inbound.skipped,
        batches_written = stats.batches.batches_written,
        batches_failed = stats.batches.batches_failed,
        records_acked = stats.batches.records_acked,
        ack_failures = stats.batches.ack_failures,
        "stopped"
    );
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str, ServeError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str, ServeError> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
