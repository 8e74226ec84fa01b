/// Category of a relay error. Lets the pipeline decide whether a failure
/// skips one record, fails one batch or aborts startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad settings. The relay refuses to start.
    Config,
    /// Bus or sink unreachable, or the insert was rejected. During a run
    /// this fails the current batch (no ack) or is logged as a stream error.
    Io,
    /// One delivery could not be decoded. The subscription skips it
    /// without an ack and keeps reading.
    Format,
    /// Misuse of a collaborator, e.g. a second subscriber.
    Logic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Error returned by the bus, sink and ack seams.
///
/// The pipeline only looks at [`ErrorKind`]: `Format` skips a record,
/// `Io` during a write drops the batch for redelivery, anything before the
/// first subscription aborts startup.
#[derive(Clone, PartialEq, Eq)]
pub struct RelayError {
    kind: ErrorKind,
    message: String,
}

impl RelayError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    /// Startup is aborted.
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    /// Transport failure or server-side rejection.
    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    /// Undecodable record.
    pub fn format_err(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// A single delivery is bad; the stream itself is fine.
    pub fn is_undecodable(&self) -> bool {
        self.kind == ErrorKind::Format
    }

    /// Prefix the message with context, keeping the kind.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        Self { kind: self.kind, message: format!("{ctx}: {}", self.message) }
    }
}

impl std::fmt::Debug for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RelayError {}

impl From<String> for RelayError {
    fn from(s: String) -> Self { Self { kind: ErrorKind::Logic, message: s } }
}

impl From<&str> for RelayError {
    fn from(s: &str) -> Self { Self { kind: ErrorKind::Logic, message: s.to_string() } }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self { Self { kind: ErrorKind::Io, message: e.to_string() } }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self { Self { kind: ErrorKind::Format, message: e.to_string() } }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let e = RelayError::io("connection refused").with_context("clickhouse ping");
        assert_eq!(e.kind(), ErrorKind::Io);
        assert_eq!(e.to_string(), "clickhouse ping: connection refused");
        assert_eq!(format!("{e:?}"), "[io] clickhouse ping: connection refused");
        assert!(!e.is_undecodable());
    }

    #[test]
    fn json_errors_mark_the_record_undecodable() {
        let e: RelayError = serde_json::from_str::<u32>("{").unwrap_err().into();
        assert!(e.is_undecodable());
        assert_eq!(RelayError::from("second subscriber").kind(), ErrorKind::Logic);
    }
}
