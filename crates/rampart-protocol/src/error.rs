//! Wire-format error types.

use thiserror::Error;

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding control-plane records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The buffer ended before a complete record was read.
    #[error("truncated record: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required to finish the record.
        need: usize,
        /// Bytes actually available.
        have: usize,
    },

    /// The request carried a type code outside the known range.
    #[error("unknown request type {0}")]
    UnknownRequest(u32),

    /// The response header carried an unknown body type.
    #[error("unknown response body type {0}")]
    UnknownResponse(u32),

    /// A rule name exceeded the on-wire field width.
    #[error("rule name too long ({0} bytes, max {max})", max = crate::MAX_RULE_NAME)]
    NameTooLong(usize),

    /// A text field was not valid UTF-8.
    #[error("invalid text payload: {0}")]
    BadText(#[from] std::str::Utf8Error),
}
