//! Error types for configuration handling.

use thiserror::Error;

/// Errors that can occur while handling keys, endpoints, or config files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key material that is not valid base64 or has the wrong length.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid CIDR notation.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid endpoint string.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Config file could not be parsed.
    #[error("config parse error at line {line}: {message}")]
    ParseError {
        /// 1-indexed line number of the offending line.
        line: usize,
        /// What went wrong.
        message: String,
    },
}
