use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{BoxFuture, RelayError};

// ════════════════════════════════════════════════════════════════
//  Delivery metadata
// ════════════════════════════════════════════════════════════════

/// Позиция сообщения: в stream'е и в потоке доставки consumer'а.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SequencePair {
    pub stream: u64,
    pub consumer: u64,
}

/// Метаданные доставки, назначенные bus'ом. Пишутся в sink как JSON
/// и используются только для наблюдаемости (не для дедупликации).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryMetadata {
    pub stream: String,
    pub consumer: String,
    pub sequence: SequencePair,
    pub num_delivered: u64,
    pub num_pending: u64,
    /// Время публикации на стороне bus'а, если известно.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

// ════════════════════════════════════════════════════════════════
//  Ack handle
// ════════════════════════════════════════════════════════════════

/// Одноразовая capability подтверждения записи.
///
/// `ack` потребляет хэндл, поэтому повторный вызов невозможен на уровне
/// типов. Хэндл, который дропнули без вызова, означает "не обработано":
/// bus передоставит запись после своего таймаута. `Sync` нужен, чтобы батч
/// можно было держать по ссылке через `.await` при записи.
pub trait AckHandle: Send + Sync {
    fn ack(self: Box<Self>) -> BoxFuture<'static, Result<(), RelayError>>;
}

// ════════════════════════════════════════════════════════════════
//  InboundRecord
// ════════════════════════════════════════════════════════════════

/// One message received from the bus.
pub struct InboundRecord {
    /// Routing key (subject), hierarchical and dot-delimited.
    pub subject: String,
    /// Message body, persisted verbatim.
    pub payload: Bytes,
    pub metadata: DeliveryMetadata,
    /// Consumption time; persisted as the event time.
    pub received_at: DateTime<Utc>,
    ack: Box<dyn AckHandle>,
}

impl InboundRecord {
    /// Build a record stamped with the current time.
    pub fn new(
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
        metadata: DeliveryMetadata,
        ack: Box<dyn AckHandle>,
    ) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            metadata,
            received_at: Utc::now(),
            ack,
        }
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Stream sequence assigned by the bus.
    pub fn sequence(&self) -> u64 {
        self.metadata.sequence.stream
    }

    /// Consume the record, keeping only its ack capability.
    pub fn into_ack(self) -> Box<dyn AckHandle> {
        self.ack
    }
}

impl std::fmt::Debug for InboundRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundRecord")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .field("sequence", &self.metadata.sequence)
            .field("received_at", &self.received_at)
            .finish_non_exhaustive()
    }
}
