//! In-process bus: publish из теста, подписка relay'ем, учёт ack'ов.
//!
//! Очередь одна на bus и не ограничена, поэтому публиковать можно до
//! подписки. Поддерживается ровно одна активная подписка.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock, mpsc};

use relay_api::{
    AckHandle, Bus, BoxFuture, DeliveryMetadata, InboundRecord, RecordStream, RelayError, SequencePair,
    SubscriptionSpec,
};

pub const STREAM_NAME: &str = "MEMORY";

// ═══════════════════════════════════════════════════════════════
//  Deliveries
// ═══════════════════════════════════════════════════════════════

enum Delivery {
    Message { subject: String, payload: Bytes, sequence: u64 },
    Undecodable { sequence: u64 },
    TransportError(String),
}

#[derive(Default)]
struct State {
    next_sequence: AtomicU64,
    acked: RwLock<Vec<u64>>,
    failing_acks: RwLock<HashSet<u64>>,
    ack_attempts: AtomicU64,
    closed: AtomicBool,
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBus
// ═══════════════════════════════════════════════════════════════

/// Bus в памяти. Клоны разделяют очередь и учёт ack'ов.
#[derive(Clone)]
pub struct MemoryBus {
    state: Arc<State>,
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Delivery>>>>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(State::default()),
            tx: Arc::new(Mutex::new(Some(tx))),
            rx: Arc::new(Mutex::new(Some(rx))),
        }
    }

    fn sequence(&self) -> u64 {
        self.state.next_sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn push(&self, delivery: Delivery) -> Result<(), RelayError> {
        let tx = self.tx.lock().await;
        let Some(tx) = tx.as_ref() else {
            return Err(RelayError::io("memory bus: publisher closed"));
        };
        tx.send(delivery).map_err(|_| RelayError::io("memory bus: subscription dropped"))
    }

    /// Publish one message; returns its stream sequence (1-based).
    pub async fn publish(&self, subject: impl Into<String>, payload: impl Into<Bytes>) -> Result<u64, RelayError> {
        let sequence = self.sequence();
        self.push(Delivery::Message { subject: subject.into(), payload: payload.into(), sequence })
            .await?;
        Ok(sequence)
    }

    /// Publish a message the subscriber cannot decode. It consumes a
    /// sequence number but never becomes a record.
    pub async fn publish_undecodable(&self) -> Result<u64, RelayError> {
        let sequence = self.sequence();
        self.push(Delivery::Undecodable { sequence }).await?;
        Ok(sequence)
    }

    /// Inject a transport error into the stream.
    pub async fn inject_error(&self, message: impl Into<String>) -> Result<(), RelayError> {
        self.push(Delivery::TransportError(message.into())).await
    }

    /// End the subscription stream once queued deliveries are consumed.
    pub async fn end_stream(&self) {
        self.tx.lock().await.take();
    }

    /// Make the ack of `sequence` fail.
    pub async fn fail_ack(&self, sequence: u64) {
        self.state.failing_acks.write().await.insert(sequence);
    }

    /// Sequences acked so far, in ack order.
    pub async fn acked(&self) -> Vec<u64> {
        self.state.acked.read().await.clone()
    }

    pub fn ack_attempts(&self) -> u64 {
        self.state.ack_attempts.load(Ordering::Relaxed)
    }

    /// Sequence numbers handed out so far, undecodable messages included.
    pub fn published(&self) -> u64 {
        self.state.next_sequence.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Relaxed)
    }
}

impl Bus for MemoryBus {
    fn subscribe<'a>(
        &'a self,
        spec: &'a SubscriptionSpec,
    ) -> BoxFuture<'a, Result<Box<dyn RecordStream>, RelayError>> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(RelayError::io("memory bus: connection closed"));
            }
            let Some(rx) = self.rx.lock().await.take() else {
                return Err(RelayError::new(format!(
                    "memory bus: '{}' already has a subscriber",
                    spec.subject
                )));
            };
            Ok(Box::new(MemoryStream {
                rx,
                state: self.state.clone(),
                consumer: spec.durable.clone(),
                delivered: 0,
            }) as Box<dyn RecordStream>)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), RelayError>> {
        Box::pin(async move {
            self.state.closed.store(true, Ordering::Relaxed);
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStream
// ═══════════════════════════════════════════════════════════════

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Delivery>,
    state: Arc<State>,
    consumer: String,
    delivered: u64,
}

impl RecordStream for MemoryStream {
    fn next(&mut self) -> BoxFuture<'_, Option<Result<InboundRecord, RelayError>>> {
        Box::pin(async move {
            let delivery = self.rx.recv().await?;
            self.delivered += 1;
            let record = match delivery {
                Delivery::Message { subject, payload, sequence } => {
                    let metadata = DeliveryMetadata {
                        stream: STREAM_NAME.into(),
                        consumer: self.consumer.clone(),
                        sequence: SequencePair { stream: sequence, consumer: self.delivered },
                        num_delivered: 1,
                        num_pending: self.rx.len() as u64,
                        timestamp: Some(Utc::now()),
                    };
                    let ack = MemoryAck { state: self.state.clone(), sequence };
                    Ok(InboundRecord::new(subject, payload, metadata, Box::new(ack)))
                }
                Delivery::Undecodable { sequence } => Err(RelayError::format_err(format!(
                    "memory bus: message {sequence} has no delivery metadata"
                ))),
                Delivery::TransportError(message) => Err(RelayError::io(message)),
            };
            Some(record)
        })
    }
}

struct MemoryAck {
    state: Arc<State>,
    sequence: u64,
}

impl AckHandle for MemoryAck {
    fn ack(self: Box<Self>) -> BoxFuture<'static, Result<(), RelayError>> {
        Box::pin(async move {
            self.state.ack_attempts.fetch_add(1, Ordering::Relaxed);
            if self.state.failing_acks.read().await.contains(&self.sequence) {
                return Err(RelayError::io(format!("memory bus: ack {} rejected", self.sequence)));
            }
            self.state.acked.write().await.push(self.sequence);
            Ok(())
        })
    }
}
