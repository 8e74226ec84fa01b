use std::time::Duration;

use serde::Deserialize;

use relay_api::{ColumnNames, TableDescriptor};

// ═══════════════════════════════════════════════════════════════
//  Batch Config
// ═══════════════════════════════════════════════════════════════

/// Верхняя граница `size` и `channel_capacity`. Канал tokio не принимает
/// ёмкость больше `Semaphore::MAX_PERMITS`.
pub const MAX_BATCH_SIZE: usize = 1_000_000;

/// Верхняя граница `timeout_ms`: одни сутки.
pub const MAX_BATCH_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;

/// Параметры батчинга: размер, таймаут, ёмкость входного канала.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchConfig {
    /// Максимум записей в одном батче. Достижение — немедленный flush.
    #[serde(default = "default_batch_size")]
    pub size: usize,
    /// Период таймера flush'а в миллисекундах.
    #[serde(default = "default_batch_timeout_ms")]
    pub timeout_ms: u64,
    /// Ёмкость канала subscription → batcher. `None` = `size`.
    #[serde(default)]
    pub channel_capacity: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: default_batch_size(),
            timeout_ms: default_batch_timeout_ms(),
            channel_capacity: None,
        }
    }
}

impl BatchConfig {
    pub fn new(size: usize, timeout: Duration) -> Self {
        Self {
            size,
            timeout_ms: timeout.as_millis() as u64,
            channel_capacity: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity.unwrap_or(self.size)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.size == 0 || self.size > MAX_BATCH_SIZE {
            return Err(format!("batch.size must be in 1..={MAX_BATCH_SIZE}, got {}", self.size));
        }
        if self.timeout_ms == 0 || self.timeout_ms > MAX_BATCH_TIMEOUT_MS {
            return Err(format!(
                "batch.timeout_ms must be in 1..={MAX_BATCH_TIMEOUT_MS}, got {}",
                self.timeout_ms
            ));
        }
        let capacity = self.channel_capacity();
        if capacity == 0 || capacity > MAX_BATCH_SIZE {
            return Err(format!("batch.channel_capacity must be in 1..={MAX_BATCH_SIZE}, got {capacity}"));
        }
        Ok(())
    }
}

fn default_batch_size() -> usize {
    1000
}
fn default_batch_timeout_ms() -> u64 {
    5000
}

// ═══════════════════════════════════════════════════════════════
//  Table Config
// ═══════════════════════════════════════════════════════════════

/// Destination table and the routing-key → partition-key rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TableConfig {
    #[serde(default = "default_table_name")]
    pub name: String,
    /// Zero-based segment of the routing key stored as the partition key.
    #[serde(default = "default_partition_key_segment")]
    pub partition_key_segment: usize,
    #[serde(default)]
    pub columns: ColumnNames,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: default_table_name(),
            partition_key_segment: default_partition_key_segment(),
            columns: ColumnNames::default(),
        }
    }
}

impl TableConfig {
    pub fn descriptor(&self) -> TableDescriptor {
        TableDescriptor::new(self.name.clone(), self.columns.clone())
    }

    pub fn validate(&self) -> Result<(), String> {
        self.descriptor().validate().map_err(|e| e.to_string())
    }
}

fn default_table_name() -> String {
    "nats_data_stream_supprt".into()
}
fn default_partition_key_segment() -> usize {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_capacity_defaults_to_batch_size() {
        let cfg = BatchConfig::new(250, Duration::from_secs(1));
        assert_eq!(cfg.channel_capacity(), 250);
        assert_eq!(cfg.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn rejects_zero_size_and_timeout() {
        assert!(BatchConfig::new(0, Duration::from_secs(5)).validate().is_err());
        assert!(BatchConfig::new(10, Duration::ZERO).validate().is_err());
        assert!(BatchConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_unbounded_sizes() {
        assert!(BatchConfig::new(usize::MAX, Duration::from_secs(5)).validate().is_err());
        assert!(BatchConfig::new(MAX_BATCH_SIZE, Duration::from_secs(5)).validate().is_ok());

        let cfg = BatchConfig { channel_capacity: Some(MAX_BATCH_SIZE + 1), ..BatchConfig::default() };
        assert!(cfg.validate().is_err());
        let cfg = BatchConfig { channel_capacity: Some(0), ..BatchConfig::default() };
        assert!(cfg.validate().is_err());

        let cfg = BatchConfig { timeout_ms: u64::MAX, ..BatchConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn table_defaults() {
        let table = TableConfig::default();
        assert_eq!(table.partition_key_segment, 3);
        assert_eq!(table.descriptor().table, "nats_data_stream_supprt");
        assert!(table.validate().is_ok());
    }
}
