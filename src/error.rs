//! Error taxonomy for hub sessions.
//!
//! Protocol-level errors (an `E` envelope from the server) are not represented
//! here: they are recovered locally and surfaced through the client's error
//! hook as [`crate::protocol::InvocationError`]. Everything in [`ClientError`]
//! either fails a public call outright or, when it escapes one of the session
//! loops, is fatal for the whole session.

// Rust guideline compliant 2026-02

/// Maximum number of characters of an offending frame kept for diagnostics.
const FRAME_PREVIEW_CHARS: usize = 200;

/// Errors produced by a hub session.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Building the connection parameters failed.
    #[error("handshake failed: {0:#}")]
    Handshake(anyhow::Error),

    /// The socket transport failed to connect, send or receive.
    #[error("transport failure: {0:#}")]
    Transport(anyhow::Error),

    /// An inbound frame was not a valid JSON envelope.
    #[error("malformed frame ({source}): {frame}")]
    Decode {
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
        /// Truncated copy of the offending frame.
        frame: String,
    },

    /// An outbound invocation could not be serialized.
    #[error("failed to encode invocation: {0}")]
    Encode(#[source] serde_json::Error),

    /// A registered handler returned an error while dispatching.
    #[error("hook failed: {0:#}")]
    Hook(anyhow::Error),

    /// The invocation queue stopped yielding events while the session was live.
    #[error("invocation queue disconnected")]
    QueueDisconnected,

    /// `start()` was called on a session that is not idle.
    #[error("session already started")]
    AlreadyStarted,

    /// The session is closing or has ended and no longer accepts events.
    #[error("session is closed")]
    Closed,
}

impl ClientError {
    /// Build a [`ClientError::Decode`] keeping a bounded preview of `frame`.
    pub(crate) fn decode(source: serde_json::Error, frame: &str) -> Self {
        Self::Decode {
            source,
            frame: frame.chars().take(FRAME_PREVIEW_CHARS).collect(),
        }
    }

    /// Returns `true` if this error ends the session when raised by a loop.
    ///
    /// Only the public-call errors (`AlreadyStarted`, `Closed`) are non-fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::AlreadyStarted | Self::Closed)
    }
}
