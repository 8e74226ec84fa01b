//! Ядро relay: bounded channel, накопитель батчей, запись в sink, ack и
//! lifecycle `Running → Draining → Stopped`.
//!
//! Транспорт и хранилище подключаются через трейты из `relay-api`.

pub mod acker;
pub mod batcher;
pub mod config;
pub mod error;
pub mod inbound;
pub mod lifecycle;
pub mod log;
pub mod relay;
pub mod writer;

pub use acker::{AckReport, ack_all};
pub use batcher::{Batch, Batcher, FlushTrigger};
pub use config::{BatchConfig, MAX_BATCH_SIZE, MAX_BATCH_TIMEOUT_MS, TableConfig};
pub use error::PipelineError;
pub use inbound::{InboundStats, run_subscription};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use log::LogContext;
pub use relay::{BatchStats, Relay, RelayHandle, RelayStats, subscribe};
pub use writer::{SinkWriter, WriteReceipt, record_to_row};
