use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, LoomError>;

#[derive(Debug)]
pub enum LoomError {
    /// Length prefix out of bounds or varint longer than 10 bytes.
    MalformedFrame(String),
    /// The transport closed in the middle of a frame.
    UnexpectedEndOfStream,
    NotConnected,
    /// Handshake-level failure: TLS, QUIC connect, non-success HTTP status.
    TransportRejected(String),
    /// The selected transport is not available in this build or environment.
    PlatformUnsupported(String),
    InvalidConfig(String),
    Cancelled,
    /// The message handler returned an error.
    Handler(anyhow::Error),
    Io(io::Error),
}

impl LoomError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        LoomError::MalformedFrame(msg.into())
    }

    pub fn rejected(err: impl fmt::Display) -> Self {
        LoomError::TransportRejected(err.to_string())
    }

    /// Whether the consumer's reconnect loop may retry after this error.
    ///
    /// Protocol mismatches, configuration mistakes and missing platform
    /// support will not go away on a fresh connection, so they surface
    /// immediately.
    pub fn is_reconnectable(&self) -> bool {
        match self {
            LoomError::UnexpectedEndOfStream
            | LoomError::TransportRejected(_)
            | LoomError::Handler(_)
            | LoomError::Io(_) => true,
            LoomError::MalformedFrame(_)
            | LoomError::NotConnected
            | LoomError::PlatformUnsupported(_)
            | LoomError::InvalidConfig(_)
            | LoomError::Cancelled => false,
        }
    }
}

impl fmt::Display for LoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoomError::MalformedFrame(msg) =>
                write!(f, "malformed frame: {}", msg),
            LoomError::UnexpectedEndOfStream =>
                write!(f, "unexpected end of stream"),
            LoomError::NotConnected =>
                write!(f, "not connected"),
            LoomError::TransportRejected(msg) =>
                write!(f, "transport rejected: {}", msg),
            LoomError::PlatformUnsupported(msg) =>
                write!(f, "platform unsupported: {}", msg),
            LoomError::InvalidConfig(msg) =>
                write!(f, "invalid config: {}", msg),
            LoomError::Cancelled =>
                write!(f, "operation cancelled"),
            LoomError::Handler(e) =>
                write!(f, "message handler failed: {:#}", e),
            LoomError::Io(e) =>
                write!(f, "i/o error: {}", e),
        }
    }
}

impl std::error::Error for LoomError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoomError::Io(e) => Some(e),
            LoomError::Handler(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for LoomError {
    fn from(e: io::Error) -> Self {
        // Errors raised inside poll-based readers travel wrapped in io::Error.
        if e.get_ref().is_some_and(|inner| inner.is::<LoomError>()) {
            if let Some(inner) = e.into_inner() {
                if let Ok(loom) = inner.downcast::<LoomError>() {
                    return *loom;
                }
            }
            return LoomError::UnexpectedEndOfStream;
        }
        match e.kind() {
            io::ErrorKind::UnexpectedEof => LoomError::UnexpectedEndOfStream,
            _ => LoomError::Io(e),
        }
    }
}

impl From<LoomError> for io::Error {
    fn from(e: LoomError) -> Self {
        match e {
            LoomError::Io(e) => e,
            LoomError::UnexpectedEndOfStream => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            LoomError::MalformedFrame(_) => io::Error::new(io::ErrorKind::InvalidData, e),
            LoomError::NotConnected => io::Error::new(io::ErrorKind::NotConnected, e),
            LoomError::Cancelled => io::Error::new(io::ErrorKind::Interrupted, e),
            other => io::Error::other(other),
        }
    }
}
