use relay_api::RelayError;

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("{context}: {detail}")]
    Config { context: &'static str, detail: String },

    #[error("nats: {0}")]
    Bus(RelayError),

    #[error("clickhouse: {0}")]
    Sink(RelayError),

    #[error("{0}")]
    Pipeline(#[from] pipeline::PipelineError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}

impl ServeError {
    pub fn invalid(detail: impl Into<String>) -> Self {
        ServeError::Config { context: "invalid config", detail: detail.into() }
    }
}
