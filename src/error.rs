//! Error codes shared by every Kvik component.
//!
//! The set is closed: local and remote layer implementations report their
//! own failures through the catch-all codes (`GenericFailure`,
//! `NotSupported`, ...) rather than extending the enum. Codes prefixed
//! `Msg*` mirror the on-wire `LocalMsgFailReason` values and are what the
//! receive path hands back to the local layer when a message is discarded.

/// Kvik error code.
///
/// Success is expressed as `Ok(())`; everything in this enum is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// Unspecified failure (typically propagated from a layer).
    GenericFailure,
    /// Invalid argument or message/response type.
    InvalidArg,
    /// Supplied data is too big for processing.
    InvalidSize,
    /// Requested entry doesn't exist.
    NotFound,
    /// Operation not supported by the layer.
    NotSupported,
    /// Timeout while waiting for a response.
    Timeout,
    /// Gateway discovery exhausted its allowed attempts.
    TooManyFailedAttempts,
    /// No gateway is currently known.
    NoGateway,
    /// Duplicate message ID (replay protection, deduplication).
    MsgDupId,
    /// Message timestamp outside the accepted window (replay protection).
    MsgInvalidTs,
    /// Peer reported processing failure (`FAIL` response).
    MsgProcessingFailed,
    /// Message sender differs from the expected peer.
    MsgUnknownSender,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Error::GenericFailure => "generic failure",
            Error::InvalidArg => "invalid argument",
            Error::InvalidSize => "invalid size",
            Error::NotFound => "not found",
            Error::NotSupported => "not supported",
            Error::Timeout => "timeout",
            Error::TooManyFailedAttempts => "too many failed attempts",
            Error::NoGateway => "no gateway",
            Error::MsgDupId => "duplicate message ID",
            Error::MsgInvalidTs => "invalid message timestamp",
            Error::MsgProcessingFailed => "message processing failed",
            Error::MsgUnknownSender => "unknown message sender",
        };
        f.write_str(s)
    }
}

impl std::error::Error for Error {}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
