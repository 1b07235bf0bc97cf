//! Error types for wirecall.

use std::fmt;

use thiserror::Error;

/// Wire-level RPC error codes (stable across versions).
///
/// Every reply starts with one of these, encoded as a `u32`. A reply carries
/// a return value if and only if the code is [`ErrorCode::NoError`] and the
/// method's return type is non-void.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// The call succeeded.
    NoError = 0,
    /// The request or reply payload could not be decoded.
    BadPayload = 1,
    /// The method name is not registered on the server.
    BadMethod = 2,
    /// The handler failed or the server hit an internal error.
    Unknown = 3,
}

impl ErrorCode {
    /// Human-readable description, matching the wire documentation.
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::NoError => "(no error)",
            ErrorCode::BadPayload => "bad payload",
            ErrorCode::BadMethod => "bad method",
            ErrorCode::Unknown => "(unrecognized error)",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl serde::Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u32(*self as u32)
    }
}

impl<'de> serde::Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match u32::deserialize(deserializer)? {
            0 => Ok(ErrorCode::NoError),
            1 => Ok(ErrorCode::BadPayload),
            2 => Ok(ErrorCode::BadMethod),
            3 => Ok(ErrorCode::Unknown),
            other => Err(serde::de::Error::invalid_value(
                serde::de::Unexpected::Unsigned(u64::from(other)),
                &"an RPC error code in 0..=3",
            )),
        }
    }
}

/// MessagePack encode/decode failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A value could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A value could not be deserialized (truncated input, tag mismatch).
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Main error type for all wirecall operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The server replied with a non-zero error code.
    #[error("rpc error: {0}")]
    Rpc(ErrorCode),

    /// Local MessagePack encode/decode failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Socket-level failure (bind, connect, send, recv).
    #[error("transport error: {0}")]
    Transport(#[from] zmq::Error),

    /// I/O error outside the socket layer (e.g. thread spawn).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed message envelope (wrong frame count, missing delimiter).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connect-time handshake never observed the greeting on the
    /// subscriber sockets.
    #[error("handshake timed out")]
    HandshakeTimeout,
}

impl Error {
    /// The wire error code, if this error came back from the server.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Rpc(code) => Some(*code),
            _ => None,
        }
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
