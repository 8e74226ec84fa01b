//! ClickHouse sink через HTTP-интерфейс: один батч = один
//! `INSERT … FORMAT JSONEachRow`.

pub mod config;
pub mod encode;

use std::sync::Arc;

use relay_api::{BatchHandle, BoxFuture, RelayError, SinkConnection, SinkRow, TableDescriptor};

pub use config::{ClickHouseConfig, Compression, Endpoint, PayloadEncoding};

pub const USER_AGENT: &str = "nats-clickhouse-transfer/1";

/// Settings attached to every insert.
#[derive(Debug, Clone, Copy)]
struct InsertSettings {
    compression: Compression,
    payload_encoding: PayloadEncoding,
    max_execution_time: u64,
}

struct Inner {
    http: reqwest::Client,
    endpoint: Endpoint,
    settings: InsertSettings,
}

impl Inner {
    async fn post(
        &self,
        query: Option<&str>,
        body: Vec<u8>,
        content_encoding: Option<&'static str>,
    ) -> Result<String, RelayError> {
        let max_execution_time = self.settings.max_execution_time.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("user", self.endpoint.username.as_str()),
            ("password", self.endpoint.password.as_str()),
            ("database", self.endpoint.database.as_str()),
            ("max_execution_time", max_execution_time.as_str()),
        ];
        if let Some(query) = query {
            params.push(("query", query));
            params.push(("date_time_input_format", "best_effort"));
        }

        let mut request = self.http.post(self.endpoint.base_url.clone()).query(&params).body(body);
        if let Some(encoding) = content_encoding {
            request = request.header(reqwest::header::CONTENT_ENCODING, encoding);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| RelayError::io(format!("CH request: {e}")))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| RelayError::io(format!("CH read: {e}")))?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(RelayError::io(format!("CH {status}: {}", text.trim())))
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  ClickHouseSink
// ═══════════════════════════════════════════════════════════════

/// Connection to one ClickHouse server. Clones share the HTTP pool.
#[derive(Clone)]
pub struct ClickHouseSink {
    inner: Arc<Inner>,
}

impl ClickHouseSink {
    /// Resolve the endpoint, build the client and ping the server.
    pub async fn connect(config: &ClickHouseConfig) -> Result<Self, RelayError> {
        let sink = Self::new(config)?;
        sink.ping().await.map_err(|e| e.with_context("clickhouse ping"))?;
        tracing::info!(
            endpoint = %sink.inner.endpoint.base_url,
            database = %sink.inner.endpoint.database,
            compression = ?config.compression,
            "connected to clickhouse"
        );
        Ok(sink)
    }

    /// Build without touching the network.
    pub fn new(config: &ClickHouseConfig) -> Result<Self, RelayError> {
        let endpoint = config.endpoint()?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| RelayError::config(format!("HTTP client: {e}")))?;
        let settings = InsertSettings {
            compression: config.compression,
            payload_encoding: config.payload_encoding,
            max_execution_time: config.max_execution_time,
        };
        Ok(Self { inner: Arc::new(Inner { http, endpoint, settings }) })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }
}

/// `INSERT INTO table (cols…) FORMAT JSONEachRow`
pub fn insert_query(table: &TableDescriptor) -> String {
    format!("INSERT INTO {} ({}) FORMAT JSONEachRow", table.table, table.column_list())
}

impl SinkConnection for ClickHouseSink {
    fn prepare_batch<'a>(
        &'a self,
        table: &'a TableDescriptor,
    ) -> BoxFuture<'a, Result<Box<dyn BatchHandle>, RelayError>> {
        Box::pin(async move {
            table.validate()?;
            Ok(Box::new(ClickHouseBatch {
                inner: self.inner.clone(),
                table: table.clone(),
                query: insert_query(table),
                body: Vec::new(),
                rows: 0,
            }) as Box<dyn BatchHandle>)
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), RelayError>> {
        Box::pin(async move {
            let out = self.inner.post(None, b"SELECT 1".to_vec(), None).await?;
            if out.trim() != "1" {
                return Err(RelayError::io(format!("unexpected ping reply '{}'", out.trim())));
            }
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  ClickHouseBatch
// ═══════════════════════════════════════════════════════════════

/// Rows are encoded on `append`; `send` compresses and posts the body in a
/// single request, which ClickHouse applies as one insert.
struct ClickHouseBatch {
    inner: Arc<Inner>,
    table: TableDescriptor,
    query: String,
    body: Vec<u8>,
    rows: usize,
}

impl BatchHandle for ClickHouseBatch {
    fn append(&mut self, row: SinkRow) -> Result<(), RelayError> {
        encode::write_row(&mut self.body, &self.table.columns, &row, self.inner.settings.payload_encoding)?;
        self.rows += 1;
        Ok(())
    }

    fn len(&self) -> usize {
        self.rows
    }

    fn send(self: Box<Self>) -> BoxFuture<'static, Result<(), RelayError>> {
        Box::pin(async move {
            let ClickHouseBatch { inner, table, query, body, rows } = *self;
            if rows == 0 {
                return Ok(());
            }
            let raw_len = body.len();
            let compression = inner.settings.compression;
            let body = encode::compress(body, compression)?;
            tracing::debug!(
                table = %table.table,
                rows,
                raw_bytes = raw_len,
                sent_bytes = body.len(),
                "insert"
            );
            inner
                .post(Some(&query), body, compression.content_encoding())
                .await
                .map(|_| ())
                .map_err(|e| e.with_context(format!("insert into {}", table.table)))
        })
    }
}
