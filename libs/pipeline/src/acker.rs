use crate::batcher::Batch;

/// Outcome of acknowledging one committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckReport {
    pub acked: usize,
    pub failed: usize,
}

/// Подтвердить все записи батча. Вызывается только после успешного `write`.
///
/// Ack'и идут по порядку батча, каждый хэндл потребляется ровно один раз.
/// Ошибка одного ack'а логируется и не прерывает остальные: запись может
/// быть передоставлена и записана повторно (at-least-once).
pub async fn ack_all(batch: Batch) -> AckReport {
    let mut report = AckReport::default();
    for record in batch.records {
        let subject = record.subject.clone();
        let sequence = record.sequence();
        match record.into_ack().ack().await {
            Ok(()) => report.acked += 1,
            Err(e) => {
                report.failed += 1;
                tracing::error!(%subject, sequence, error = %e, "failed to ack message");
            }
        }
    }
    report
}
