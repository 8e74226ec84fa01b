use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;

use relay_api::{BatchHandle, BoxFuture, RelayError, SinkConnection, SinkRow, TableDescriptor};

// ═══════════════════════════════════════════════════════════════
//  Failure plan
// ═══════════════════════════════════════════════════════════════

/// Scripted outcome of upcoming `send` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Commit,
    Fail,
}

// ═══════════════════════════════════════════════════════════════
//  MemorySink
// ═══════════════════════════════════════════════════════════════

/// Committed insert, as seen by the destination.
#[derive(Debug, Clone)]
pub struct CommittedBatch {
    pub table: String,
    pub rows: Vec<SinkRow>,
}

#[derive(Default)]
struct State {
    committed: RwLock<Vec<CommittedBatch>>,
    /// Outcomes consumed one per `send`; empty = commit.
    plan: RwLock<VecDeque<SendOutcome>>,
    send_delay: RwLock<Option<Duration>>,
    prepared: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    ping_fails: RwLock<bool>,
}

/// In-memory sink. Каждый `send` либо атомарно добавляет весь батч в
/// `committed`, либо (по плану) падает и ничего не сохраняет.
///
/// Клоны разделяют состояние: тест держит один клон, relay другой.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<State>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next `send` calls, in order.
    pub async fn plan(&self, outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.state.plan.write().await.extend(outcomes);
    }

    /// Fail the next `n` sends.
    pub async fn fail_next(&self, n: usize) {
        self.plan(std::iter::repeat_n(SendOutcome::Fail, n)).await;
    }

    /// Hold every `send` for `delay` before committing.
    pub async fn set_send_delay(&self, delay: Option<Duration>) {
        *self.state.send_delay.write().await = delay;
    }

    /// Make `ping` report an unreachable server.
    pub async fn set_ping_fails(&self, fails: bool) {
        *self.state.ping_fails.write().await = fails;
    }

    pub async fn committed(&self) -> Vec<CommittedBatch> {
        self.state.committed.read().await.clone()
    }

    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.state.committed.read().await.iter().map(|b| b.rows.len()).collect()
    }

    /// All committed rows, flattened in commit order.
    pub async fn rows(&self) -> Vec<SinkRow> {
        self.state
            .committed
            .read()
            .await
            .iter()
            .flat_map(|b| b.rows.iter().cloned())
            .collect()
    }

    pub async fn row_count(&self) -> usize {
        self.state.committed.read().await.iter().map(|b| b.rows.len()).sum()
    }

    pub fn prepare_calls(&self) -> u64 {
        self.state.prepared.load(Ordering::Relaxed)
    }

    pub fn send_calls(&self) -> u64 {
        self.state.sent.load(Ordering::Relaxed)
    }

    pub fn failed_sends(&self) -> u64 {
        self.state.failed.load(Ordering::Relaxed)
    }
}

impl SinkConnection for MemorySink {
    fn prepare_batch<'a>(
        &'a self,
        table: &'a TableDescriptor,
    ) -> BoxFuture<'a, Result<Box<dyn BatchHandle>, RelayError>> {
        Box::pin(async move {
            table.validate()?;
            self.state.prepared.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(MemoryBatch {
                state: self.state.clone(),
                table: table.table.clone(),
                rows: Vec::new(),
            }) as Box<dyn BatchHandle>)
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), RelayError>> {
        Box::pin(async move {
            if *self.state.ping_fails.read().await {
                return Err(RelayError::io("memory sink: ping refused"));
            }
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBatch
// ═══════════════════════════════════════════════════════════════

struct MemoryBatch {
    state: Arc<State>,
    table: String,
    rows: Vec<SinkRow>,
}

impl BatchHandle for MemoryBatch {
    fn append(&mut self, row: SinkRow) -> Result<(), RelayError> {
        self.rows.push(row);
        Ok(())
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn send(self: Box<Self>) -> BoxFuture<'static, Result<(), RelayError>> {
        Box::pin(async move {
            let MemoryBatch { state, table, rows } = *self;
            state.sent.fetch_add(1, Ordering::Relaxed);

            let delay = *state.send_delay.read().await;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let outcome = state.plan.write().await.pop_front().unwrap_or(SendOutcome::Commit);
            if outcome == SendOutcome::Fail {
                state.failed.fetch_add(1, Ordering::Relaxed);
                return Err(RelayError::io(format!("memory sink: insert into {table} refused")));
            }

            state.committed.write().await.push(CommittedBatch { table, rows });
            Ok(())
        })
    }
}
