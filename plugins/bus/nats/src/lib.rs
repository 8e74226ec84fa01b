//! JetStream bus: durable push consumer с deliver group и явным ack.

use async_nats::jetstream::{self, AckKind, consumer::{AckPolicy, push}};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde::Deserialize;

use relay_api::{
    AckHandle, Bus, BoxFuture, DeliveryMetadata, InboundRecord, RecordStream, RelayError, SequencePair,
    SubscriptionSpec,
};

// ═══════════════════════════════════════════════════════════════
//  NatsConfig
// ═══════════════════════════════════════════════════════════════

fn default_durable() -> String {
    "nats-clickhouse-durable".into()
}
fn default_group() -> String {
    "nats-clickhouse-delivery-group".into()
}
fn default_name() -> String {
    "nats-clickhouse-relay".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NatsConfig {
    /// Server URL. Required: empty until set by file or environment.
    #[serde(default)]
    pub url: String,
    /// Durable consumer name.
    #[serde(default = "default_durable")]
    pub durable: String,
    /// Deliver (queue) group.
    #[serde(default = "default_group")]
    pub group: String,
    /// Stream name; looked up by subject when absent.
    #[serde(default)]
    pub stream: Option<String>,
    /// Connection name shown in server monitoring.
    #[serde(default = "default_name")]
    pub name: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            durable: default_durable(),
            group: default_group(),
            stream: None,
            name: default_name(),
        }
    }
}

impl NatsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("nats.url is required".into());
        }
        if self.durable.trim().is_empty() {
            return Err("nats.durable must not be empty".into());
        }
        if self.group.trim().is_empty() {
            return Err("nats.group must not be empty".into());
        }
        Ok(())
    }

    /// Subscription parameters for one subject.
    pub fn subscription(&self, subject: impl Into<String>) -> SubscriptionSpec {
        SubscriptionSpec {
            subject: subject.into(),
            group: self.group.clone(),
            durable: self.durable.clone(),
            stream: self.stream.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  NatsBus
// ═══════════════════════════════════════════════════════════════

pub struct NatsBus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsBus {
    pub async fn connect(config: &NatsConfig) -> Result<Self, RelayError> {
        let client = async_nats::ConnectOptions::new()
            .name(config.name.as_str())
            .connect(config.url.as_str())
            .await
            .map_err(|e| RelayError::io(format!("nats connect {}: {e}", config.url)))?;
        tracing::info!(url = %config.url, name = %config.name, "connected to nats");
        let jetstream = jetstream::new(client.clone());
        Ok(Self { client, jetstream })
    }

    async fn stream_name(&self, spec: &SubscriptionSpec) -> Result<String, RelayError> {
        if let Some(stream) = &spec.stream {
            return Ok(stream.clone());
        }
        self.jetstream
            .stream_by_subject(spec.subject.as_str())
            .await
            .map_err(|e| RelayError::io(format!("no stream for subject '{}': {e}", spec.subject)))
    }
}

impl Bus for NatsBus {
    fn subscribe<'a>(
        &'a self,
        spec: &'a SubscriptionSpec,
    ) -> BoxFuture<'a, Result<Box<dyn RecordStream>, RelayError>> {
        Box::pin(async move {
            let stream_name = self.stream_name(spec).await?;
            let stream = self
                .jetstream
                .get_stream(stream_name.as_str())
                .await
                .map_err(|e| RelayError::io(format!("get stream '{stream_name}': {e}")))?;

            let config = push::Config {
                durable_name: Some(spec.durable.clone()),
                deliver_subject: self.client.new_inbox(),
                deliver_group: Some(spec.group.clone()),
                filter_subject: spec.subject.clone(),
                ack_policy: AckPolicy::Explicit,
                ..Default::default()
            };
            let consumer = stream
                .get_or_create_consumer(spec.durable.as_str(), config)
                .await
                .map_err(|e| RelayError::io(format!("consumer '{}': {e}", spec.durable)))?;
            let messages = consumer
                .messages()
                .await
                .map_err(|e| RelayError::io(format!("subscribe '{}': {e}", spec.subject)))?;

            tracing::info!(
                stream = %stream_name,
                subject = %spec.subject,
                durable = %spec.durable,
                group = %spec.group,
                "subscribed"
            );
            Ok(Box::new(NatsStream { messages: messages.boxed() }) as Box<dyn RecordStream>)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), RelayError>> {
        Box::pin(async move {
            self.client
                .flush()
                .await
                .map_err(|e| RelayError::io(format!("nats flush: {e}")))?;
            tracing::info!("nats connection flushed");
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  NatsStream
// ═══════════════════════════════════════════════════════════════

type MessageStream =
    BoxStream<'static, Result<jetstream::Message, jetstream::consumer::push::MessagesError>>;

struct NatsStream {
    messages: MessageStream,
}

impl RecordStream for NatsStream {
    fn next(&mut self) -> BoxFuture<'_, Option<Result<InboundRecord, RelayError>>> {
        Box::pin(async move {
            let item = self.messages.next().await?;
            Some(match item {
                Ok(message) => into_record(message),
                Err(e) => Err(RelayError::io(format!("nats messages: {e}"))),
            })
        })
    }
}

fn into_record(message: jetstream::Message) -> Result<InboundRecord, RelayError> {
    let metadata = {
        let info = message
            .info()
            .map_err(|e| RelayError::format_err(format!("{}: no jetstream metadata: {e}", message.subject)))?;
        DeliveryMetadata {
            stream: info.stream.to_string(),
            consumer: info.consumer.to_string(),
            sequence: SequencePair { stream: info.stream_sequence, consumer: info.consumer_sequence },
            num_delivered: info.delivered.max(0) as u64,
            num_pending: info.pending,
            timestamp: published_at(info.published.unix_timestamp_nanos()),
        }
    };
    let subject = message.subject.to_string();
    let payload = message.payload.clone();
    Ok(InboundRecord::new(subject, payload, metadata, Box::new(NatsAck { message })))
}

fn published_at(unix_nanos: i128) -> Option<DateTime<Utc>> {
    i64::try_from(unix_nanos).ok().map(DateTime::from_timestamp_nanos)
}

struct NatsAck {
    message: jetstream::Message,
}

impl AckHandle for NatsAck {
    fn ack(self: Box<Self>) -> BoxFuture<'static, Result<(), RelayError>> {
        Box::pin(async move {
            self.message
                .ack_with(AckKind::Ack)
                .await
                .map_err(|e| RelayError::io(format!("ack {}: {e}", self.message.subject)))
        })
    }
}
