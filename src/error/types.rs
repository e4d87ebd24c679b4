//! Error types for graphcall.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Socket setup errors (bind, listen, connect).
    #[error("Socket error: {message}")]
    Socket { message: String },

    /// Frame codec errors.
    #[error("Framing error: {kind}")]
    Framing { kind: FramingErrorKind },

    /// Protocol and transport errors.
    #[error("Protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// Handshake errors.
    #[error("Authentication error: {kind}")]
    Auth { kind: AuthErrorKind },

    /// A path segment does not exist on the remote object graph.
    #[error("Name not found: '{path}'")]
    NameNotFound { path: String },

    /// The peer's resolver or invoked member failed.
    #[error("Remote failure: {message}")]
    RemoteFailure { message: String },

    /// Session lifecycle misuse (e.g. starting twice).
    #[error("Session error: {message}")]
    Session { message: String },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Frame codec error kinds.
#[derive(Error, Debug)]
pub enum FramingErrorKind {
    #[error("Unsupported value type: {type_name}")]
    UnsupportedValueType { type_name: String },

    #[error("Malformed chunk: {message}")]
    MalformedChunk { message: String },

    #[error("Text payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Structured payload is not valid JSON: {message}")]
    InvalidJson { message: String },

    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },
}

/// Protocol error kinds.
#[derive(Error, Debug)]
pub enum ProtocolErrorKind {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timed out")]
    ConnectionTimeout,

    #[error("Protocol violation: {message}")]
    Violation { message: String },
}

/// Authentication error kinds.
#[derive(Error, Debug)]
pub enum AuthErrorKind {
    #[error("Authentication rejected by peer")]
    Rejected,

    #[error("Failed to load shared secret: {message}")]
    SecretError { message: String },
}

impl RpcError {
    /// Peer closed the connection (between or in the middle of messages).
    pub fn connection_closed() -> Self {
        Self::Protocol {
            kind: ProtocolErrorKind::ConnectionClosed,
        }
    }

    /// No complete message arrived within the receive bound.
    pub fn timeout() -> Self {
        Self::Protocol {
            kind: ProtocolErrorKind::ConnectionTimeout,
        }
    }

    /// Peer sent something the protocol does not allow.
    pub fn violation(message: impl Into<String>) -> Self {
        Self::Protocol {
            kind: ProtocolErrorKind::Violation {
                message: message.into(),
            },
        }
    }

    /// Whether this error is a receive timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Protocol {
                kind: ProtocolErrorKind::ConnectionTimeout
            }
        )
    }

    /// Whether this error means the transport is gone.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            Self::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed,
            } => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Result type alias for graphcall operations.
pub type RpcResult<T> = Result<T, RpcError>;
