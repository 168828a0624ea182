//! Error types for the filter engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while configuring or driving the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An address or CIDR string/word could not be interpreted.
    #[error("bad address: {0}")]
    BadAddress(String),

    /// A port range had its minimum above its maximum.
    #[error("inverted port range {min}-{max}")]
    InvertedPortRange {
        /// Range minimum.
        min: u16,
        /// Range maximum.
        max: u16,
    },

    /// A rule name was empty or exceeded the maximum length.
    #[error("bad rule name {0:?}")]
    BadRuleName(String),

    /// A rule with this name already exists.
    #[error("duplicate rule name {0:?}")]
    DuplicateRuleName(String),

    /// The insert-after anchor rule does not exist.
    #[error("no rule named {0:?}")]
    NoSuchRule(String),

    /// A protocol selector was not TCP, UDP, ICMP or any.
    #[error("unsupported protocol {0}")]
    UnknownProtocol(u8),

    /// A datagram ended before the headers it advertises.
    #[error("truncated datagram: need {need} bytes, have {have}")]
    TruncatedPacket {
        /// Bytes the headers require.
        need: usize,
        /// Bytes present in the buffer.
        have: usize,
    },

    /// A datagram was not IPv4 or carried a malformed header.
    #[error("not an IPv4 datagram")]
    BadIpHeader,
}
