use std::time::Instant;

use relay_api::InboundRecord;

/// Why a batch left the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Buffer reached `batch.size`.
    Size,
    /// Timer tick with a non-empty buffer.
    Timer,
    /// Final flush while draining.
    Shutdown,
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushTrigger::Size => f.write_str("size"),
            FlushTrigger::Timer => f.write_str("timer"),
            FlushTrigger::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Ordered group of records written in one transaction.
#[derive(Debug)]
pub struct Batch {
    pub records: Vec<InboundRecord>,
    pub trigger: FlushTrigger,
    /// When the first record of this batch was accepted.
    pub opened_at: Instant,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// First and last stream sequence, for logging.
    pub fn sequence_range(&self) -> Option<(u64, u64)> {
        let first = self.records.first()?.sequence();
        let last = self.records.last()?.sequence();
        Some((first, last))
    }
}

/// Owner of the pending buffer. Decides when a batch is due.
///
/// Used from a single task only, so it needs no locking. Every method that
/// returns `Some(batch)` hands the whole buffer over and starts a new one:
/// a batch is never split and never handed out twice.
/// Preallocation cap; larger buffers grow on demand.
const PREALLOC_LIMIT: usize = 4096;

pub struct Batcher {
    buffer: Vec<InboundRecord>,
    capacity: usize,
    opened_at: Option<Instant>,
    closed: bool,
}

impl Batcher {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Vec::with_capacity(capacity.min(PREALLOC_LIMIT)),
            capacity,
            opened_at: None,
            closed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append a record; returns the full batch once the cap is reached.
    ///
    /// A record offered after `on_shutdown` is handed back untouched.
    pub fn accept(&mut self, record: InboundRecord) -> Result<Option<Batch>, InboundRecord> {
        if self.closed {
            return Err(record);
        }
        if self.buffer.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.buffer.push(record);
        if self.buffer.len() >= self.capacity {
            return Ok(self.take(FlushTrigger::Size));
        }
        Ok(None)
    }

    /// Timer tick: flush whatever is buffered, regardless of size.
    pub fn on_timer(&mut self) -> Option<Batch> {
        self.take(FlushTrigger::Timer)
    }

    /// Final flush. Closes the batcher; later calls return `None`.
    pub fn on_shutdown(&mut self) -> Option<Batch> {
        if self.closed {
            return None;
        }
        self.closed = true;
        self.take(FlushTrigger::Shutdown)
    }

    fn take(&mut self, trigger: FlushTrigger) -> Option<Batch> {
        if self.buffer.is_empty() {
            return None;
        }
        let next = Vec::with_capacity(self.capacity.min(PREALLOC_LIMIT));
        let records = std::mem::replace(&mut self.buffer, next);
        let opened_at = self.opened_at.take().unwrap_or_else(Instant::now);
        Some(Batch { records, trigger, opened_at })
    }
}
