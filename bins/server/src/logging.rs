use std::io::IsTerminal;

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogFormat};
use crate::error::ServeError;

/// Build the process dispatcher. `RUST_LOG`, when set, wins over
/// `log.level`.
pub fn dispatch(config: &LogConfig) -> Result<Dispatch, ServeError> {
    let level = config.level_filter().map_err(ServeError::invalid)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let format = match config.format {
        LogFormat::Text if std::io::stdout().is_terminal() => LogFormat::Color,
        other => other,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let dispatch = match format {
        LogFormat::Json => Dispatch::new(builder.json().with_current_span(true).finish()),
        LogFormat::Color => Dispatch::new(builder.with_ansi(true).finish()),
        LogFormat::Text => Dispatch::new(builder.with_ansi(false).finish()),
    };
    Ok(dispatch)
}
