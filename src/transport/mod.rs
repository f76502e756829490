//! Socket transport seam.
//!
//! The session core only ever touches a socket through the two halves
//! returned by a [`Connector`]: the producer loop owns the [`FrameWriter`],
//! the consumer loop owns the [`FrameReader`]. Between them they expose the
//! five operations the core needs: `send`, `recv`, `close`, `is_open`, plus
//! the initial `connect`.
//!
//! # Implementations
//!
//! - [`ws::WsConnector`] - tokio-tungstenite WebSocket (production)
//! - [`memory::pair`] - in-process loopback with a scriptable peer (tests,
//!   embedding)

pub mod memory;
pub mod ws;

use anyhow::Result;
use async_trait::async_trait;

pub use memory::{MemoryConnector, MemoryPeer};
pub use ws::WsConnector;

/// Where and how to open the socket, as produced by a
/// [`Handshake`](crate::handshake::Handshake).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectParams {
    /// Fully built `ws://` / `wss://` URL.
    pub socket_url: String,
    /// Extra request headers for the upgrade request.
    pub headers: Vec<(String, String)>,
}

impl ConnectParams {
    /// Params for `socket_url` with no extra headers.
    #[must_use]
    pub fn new(socket_url: impl Into<String>) -> Self {
        Self {
            socket_url: socket_url.into(),
            headers: Vec::new(),
        }
    }

    /// Add a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Write half of an open socket.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or the write fails.
    async fn send(&mut self, text: &str) -> Result<()>;

    /// Start a graceful shutdown of the connection.
    ///
    /// Completion is observed through [`Self::is_open`].
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown could not be initiated.
    async fn close(&mut self) -> Result<()>;

    /// Returns `true` until the connection is known to be closed.
    fn is_open(&self) -> bool;
}

/// Read half of an open socket.
#[async_trait]
pub trait FrameReader: Send {
    /// Wait for the next text frame.
    ///
    /// Returns `Ok(None)` once the connection has closed.
    ///
    /// # Errors
    ///
    /// Returns an error on a transport fault.
    async fn recv(&mut self) -> Result<Option<String>>;
}

/// Opens sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection described by `params`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn connect(
        &self,
        params: &ConnectParams,
    ) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_params_builder() {
        let params = ConnectParams::new("wss://example.com/signalr/connect")
            .header("Cookie", "a=b")
            .header("User-Agent", "test");

        assert_eq!(params.socket_url, "wss://example.com/signalr/connect");
        assert_eq!(
            params.headers,
            vec![
                ("Cookie".to_string(), "a=b".to_string()),
                ("User-Agent".to_string(), "test".to_string()),
            ]
        );
    }
}
