//! Error types for netdde-client.

use thiserror::Error;

/// Main error type for all NetDDE client operations.
#[derive(Debug, Error)]
pub enum NetDdeError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error (malformed frame, unknown type or id, desync).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered a request with its failure flag set.
    #[error("server reported error on {0}")]
    ServerRefused(&'static str),

    /// The server refused to open a conversation on the given topic.
    #[error("server reported error creating conversation on topic {0:?}")]
    ConversationRefused(String),

    /// No answer arrived for a synchronous request within the configured
    /// timeout. Carries the wire type of the unanswered packet.
    #[error("timeout waiting for answer to packet type {0:#06x}")]
    ResponseTimeout(u32),

    /// The session was torn down while the request was still in flight.
    #[error("request interrupted")]
    Interrupted,

    /// A data operation was invoked outside the `Connected` state.
    #[error("not connected")]
    NotConnected,

    /// `connect` was invoked outside the `Disconnected` state.
    #[error("already connected or connection in progress")]
    AlreadyConnected,

    /// `disconnect` was invoked while the connection was still being set up.
    #[error("can't handle disconnection while still connecting")]
    DisconnectWhileConnecting,

    /// The graceful disconnect handshake exceeded its fixed deadline.
    #[error("timeout while disconnecting")]
    DisconnectTimeout,

    /// The transport is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// A client was constructed without a service name.
    #[error("service expected")]
    ServiceExpected,

    /// The format codec cannot encode a value for this format identifier.
    #[error("unsupported data format {0}")]
    UnsupportedFormat(u32),

    /// A frame was serialized with a reserved packet id (zero or the
    /// asynchronous sentinel).
    #[error("invalid packet id {0:#x}")]
    InvalidPacketId(u32),
}

/// Result type alias using NetDdeError.
pub type Result<T> = std::result::Result<T, NetDdeError>;
