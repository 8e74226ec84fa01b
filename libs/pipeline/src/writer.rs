use std::sync::Arc;

use relay_api::{InboundRecord, RelayError, SinkConnection, SinkRow, TableDescriptor, route_segment};

use crate::batcher::Batch;

/// Result of a committed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReceipt {
    pub rows: usize,
}

/// Map one record to one destination row.
///
/// Partition key = segment `partition_key_segment` of the routing key, or an
/// empty string when the key is shorter.
pub fn record_to_row(record: &InboundRecord, partition_key_segment: usize) -> Result<SinkRow, RelayError> {
    let metadata = serde_json::to_string(&record.metadata)
        .map_err(|e| RelayError::format_err(format!("metadata json: {e}")))?;
    Ok(SinkRow {
        event_time: record.received_at,
        routing_key: record.subject.clone(),
        partition_key: route_segment(&record.subject, partition_key_segment).to_string(),
        sequence: record.sequence(),
        metadata,
        payload: record.payload.clone(),
    })
}

/// Persists one batch as one atomic insert.
///
/// There is no retry here: a failed batch is reported once and the caller
/// drops it un-acked, so the bus redelivers every record in it.
pub struct SinkWriter {
    sink: Arc<dyn SinkConnection>,
    table: TableDescriptor,
    partition_key_segment: usize,
}

impl SinkWriter {
    pub fn new(sink: Arc<dyn SinkConnection>, table: TableDescriptor, partition_key_segment: usize) -> Self {
        Self { sink, table, partition_key_segment }
    }

    pub fn table(&self) -> &TableDescriptor {
        &self.table
    }

    pub async fn write(&self, batch: &Batch) -> Result<WriteReceipt, RelayError> {
        let mut handle = self
            .sink
            .prepare_batch(&self.table)
            .await
            .map_err(|e| e.with_context("prepare batch"))?;

        for record in &batch.records {
            let row = record_to_row(record, self.partition_key_segment)
                .map_err(|e| e.with_context(format!("row for sequence {}", record.sequence())))?;
            handle
                .append(row)
                .map_err(|e| e.with_context(format!("append sequence {}", record.sequence())))?;
        }

        let rows = handle.len();
        handle.send().await.map_err(|e| e.with_context("send batch"))?;
        Ok(WriteReceipt { rows })
    }
}
