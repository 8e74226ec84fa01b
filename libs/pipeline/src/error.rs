use relay_api::RelayError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("config: {0}")]
    Config(String),

    #[error("subscription ({subject}): {source}")]
    Subscription { subject: String, source: RelayError },

    #[error("{task} task failed: {source}")]
    Join { task: &'static str, source: tokio::task::JoinError },
}
