//! Error types for the shared wire types

use thiserror::Error;

/// Errors raised while parsing addresses or encoding/decoding mesh payloads
#[derive(Error, Debug)]
pub enum CoreError {
    /// Text or bytes that are not a 6-byte hardware address
    #[error("Invalid address {input:?}: {reason}")]
    InvalidAddress {
        /// The rejected input (hex-encoded when it was binary)
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// Failed to serialize a message
    #[error("Encode error: {0}")]
    Encode(String),

    /// Failed to parse a message
    #[error("Decode error: {0}")]
    Decode(String),

    /// Payload decoded but is not the expected message kind
    #[error("Unexpected message kind: {0}")]
    UnexpectedKind(String),
}

impl CoreError {
    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidAddress { .. } => "INVALID_ADDRESS",
            CoreError::Encode(_) => "ENCODE_ERROR",
            CoreError::Decode(_) => "DECODE_ERROR",
            CoreError::UnexpectedKind(_) => "UNEXPECTED_KIND",
        }
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = CoreError::Decode("eof".to_string());
        assert_eq!(err.error_code(), "DECODE_ERROR");
        assert!(err.to_string().contains("eof"));
    }
}
