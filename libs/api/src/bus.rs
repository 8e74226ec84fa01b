use crate::{BoxFuture, InboundRecord, RelayError};

/// Параметры подписки на bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Subject pattern (e.g. `chat.events.>`).
    pub subject: String,
    /// Queue group: процессы одной группы получают непересекающиеся
    /// подмножества сообщений.
    pub group: String,
    /// Durable consumer name: неподтверждённые сообщения передоставляются
    /// даже после рестарта процесса.
    pub durable: String,
    /// Явное имя stream'а. `None` — искать stream по subject.
    pub stream: Option<String>,
}

/// Поток входящих записей одной подписки.
pub trait RecordStream: Send {
    /// Следующая запись.
    ///
    /// - `None` — подписка закрыта.
    /// - `Err` с `ErrorKind::Format` — одно сообщение не декодируется,
    ///   его нужно пропустить (без ack).
    /// - `Err` с другим kind — ошибка транспорта, поток продолжает работу.
    fn next(&mut self) -> BoxFuture<'_, Option<Result<InboundRecord, RelayError>>>;
}

/// Соединение с bus'ом: manual ack, durable consumer, queue group.
pub trait Bus: Send + Sync {
    fn subscribe<'a>(
        &'a self,
        spec: &'a SubscriptionSpec,
    ) -> BoxFuture<'a, Result<Box<dyn RecordStream>, RelayError>>;

    /// Дослать буферизованные ack'и и освободить соединение.
    fn close(&self) -> BoxFuture<'_, Result<(), RelayError>>;
}
