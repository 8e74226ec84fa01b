//! Общие типы и контракты коллабораторов relay-пайплайна.
//!
//! Crate не зависит от tokio: bus, sink и ack-хэндлы описаны как трейты
//! с boxed futures, реализации живут в `plugins/`.

use std::future::Future;
use std::pin::Pin;

pub mod bus;
pub mod error;
pub mod record;
pub mod sink;
pub mod util;

pub use bus::{Bus, RecordStream, SubscriptionSpec};
pub use error::{ErrorKind, RelayError};
pub use record::{AckHandle, DeliveryMetadata, InboundRecord, SequencePair};
pub use sink::{BatchHandle, ColumnNames, SinkConnection, SinkRow, TableDescriptor};
pub use util::{route_segment, validate_identifier};

/// Boxed future, возвращаемый методами трейтов коллабораторов.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
