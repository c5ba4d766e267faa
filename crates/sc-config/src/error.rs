//! Configuration errors

use std::path::PathBuf;

/// Errors while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML could not be parsed
    #[error("invalid config document: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file could not be read
    #[error("io error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two groups share an id
    #[error("duplicate group id: {0}")]
    DuplicateGroup(String),

    /// Two sources share an id
    #[error("duplicate source id: {0}")]
    DuplicateSource(String),

    /// Source definition is inconsistent
    #[error("invalid source {id}: {reason}")]
    InvalidSource { id: String, reason: String },
}

impl ConfigError {
    /// Create an invalid source error
    pub fn invalid_source(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
