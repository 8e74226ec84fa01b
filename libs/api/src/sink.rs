use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{BoxFuture, RelayError, validate_identifier};

// ════════════════════════════════════════════════════════════════
//  Table descriptor
// ════════════════════════════════════════════════════════════════

/// Column names of the destination table. The schema itself is owned by
/// whoever created the table; only the names are configurable here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub timestamp: String,
    pub subject: String,
    pub partition_key: String,
    pub sequence: String,
    pub metadata: String,
    pub data: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            timestamp: "timestamp".into(),
            subject: "subject".into(),
            partition_key: "chat_id".into(),
            sequence: "sequence".into(),
            metadata: "metadata".into(),
            data: "data".into(),
        }
    }
}

impl ColumnNames {
    /// Names in row order.
    pub fn as_array(&self) -> [&str; 6] {
        [
            &self.timestamp,
            &self.subject,
            &self.partition_key,
            &self.sequence,
            &self.metadata,
            &self.data,
        ]
    }
}

/// Target of a batch insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub table: String,
    pub columns: ColumnNames,
}

impl TableDescriptor {
    pub fn new(table: impl Into<String>, columns: ColumnNames) -> Self {
        Self { table: table.into(), columns }
    }

    /// "timestamp, subject, chat_id, sequence, metadata, data"
    pub fn column_list(&self) -> String {
        self.columns.as_array().join(", ")
    }

    /// Reject names that cannot be spliced into an INSERT statement.
    pub fn validate(&self) -> Result<(), RelayError> {
        validate_identifier(&self.table, "table")?;
        for column in self.columns.as_array() {
            validate_identifier(column, "column")?;
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════
//  Rows and batches
// ════════════════════════════════════════════════════════════════

/// One destination row, built from one InboundRecord.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRow {
    pub event_time: DateTime<Utc>,
    pub routing_key: String,
    pub partition_key: String,
    pub sequence: u64,
    /// JSON-encoded delivery metadata.
    pub metadata: String,
    pub payload: Bytes,
}

/// A prepared insert. Rows are buffered by `append`; `send` commits all of
/// them in one request, or none.
pub trait BatchHandle: Send {
    fn append(&mut self, row: SinkRow) -> Result<(), RelayError>;

    /// Rows appended so far.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn send(self: Box<Self>) -> BoxFuture<'static, Result<(), RelayError>>;
}

/// Long-lived handle to the analytical store.
pub trait SinkConnection: Send + Sync {
    fn prepare_batch<'a>(
        &'a self,
        table: &'a TableDescriptor,
    ) -> BoxFuture<'a, Result<Box<dyn BatchHandle>, RelayError>>;

    /// Cheap round-trip used to fail fast at startup.
    fn ping(&self) -> BoxFuture<'_, Result<(), RelayError>>;
}
