//! Error types for the model crate

/// Errors raised while converting raw values into model types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Numeric severity code outside the known scale
    #[error("unknown severity level: {0}")]
    UnknownSeverity(u16),

    /// Numeric or textual refresh reason that is not recognised
    #[error("unknown refresh reason: {0}")]
    UnknownRefreshReason(String),

    /// User id that could not be parsed
    #[error("invalid user id: {0}")]
    InvalidUserId(String),

    /// Identifier that must not be empty
    #[error("empty {0} id")]
    EmptyId(&'static str),
}
