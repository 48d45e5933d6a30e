use thiserror::Error;

/// Failures that keep a handler from being created or started.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Backend connection could not be established when the handler was created
    #[error("failed to connect to {backend}: {reason}")]
    Connection {
        backend: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Failures reading or writing external state.
///
/// Queries failing inside a polling loop are logged and retried on the next
/// tick; `DeviceNotFound` is rendered as a placeholder instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("{0}")]
    DeviceNotFound(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("write failed: {0}")]
    Write(String),
}

impl SourceError {
    pub fn query(e: impl std::fmt::Display) -> Self {
        Self::Query(e.to_string())
    }

    pub fn write(e: impl std::fmt::Display) -> Self {
        Self::Write(e.to_string())
    }
}

/// Failures turning state into an image.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to resize image: {0}")]
    Resize(String),

    #[error("failed to load font: {0}")]
    Font(String),
}
