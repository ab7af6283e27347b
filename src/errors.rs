use thiserror::Error;

/// Error types returned by this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// A read operation needed more bytes than remained in the buffer.
    #[error("unexpected end of buffer (wanted {wanted} bytes, {remaining} remaining)")]
    UnexpectedEof {
        /// Number of bytes the read operation required.
        wanted: usize,
        /// Number of bytes actually left in the buffer.
        remaining: usize,
    },

    /// An enum ordinal read from the wire is outside the declared variant
    /// range for that type.
    #[error("invalid ordinal {ordinal} for enum {type_name} (expected 0..{variant_count})")]
    InvalidEnumOrdinal {
        /// The name of the IDL-declared enum type.
        type_name: &'static str,
        /// The out-of-range ordinal read from the wire.
        ordinal: i32,
        /// The number of declared variants.
        variant_count: u32,
    },

    /// A string field contained bytes that are not valid UTF-8.
    #[error("invalid utf-8 in string field: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A frame or sequence length prefix exceeds the configured maximum.
    #[error("frame of {len} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge {
        /// The length prefix read from the wire.
        len: u32,
        /// The configured maximum frame size.
        max: u32,
    },

    /// The datagram binding's length prefix did not match the number of
    /// bytes actually received in the datagram.
    #[error("frame length prefix {prefix} does not match datagram length {actual}")]
    FrameLengthMismatch {
        /// The length encoded in the frame header.
        prefix: u32,
        /// The number of bytes the transport actually delivered.
        actual: u32,
    },

    /// A response frame's message id does not name a method or push channel
    /// known to this client.
    #[error("unknown message id {0}")]
    UnknownMessageId(u32),

    /// The call was invoked on a client that is not connected, or whose
    /// listener has already terminated.
    #[error("client is not connected")]
    Disconnected,

    /// No response with the expected message id arrived within the call
    /// timeout.
    #[error("call timed out waiting for a response")]
    Timeout,

    /// The underlying transport returned an error.
    #[error("i/o error ({0:?}): {1}")]
    Io(std::io::ErrorKind, String),
}

impl From<std::io::Error> for Error {
    fn from(v: std::io::Error) -> Self {
        Self::Io(v.kind(), v.to_string())
    }
}
