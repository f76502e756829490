//! WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing the [`FrameWriter`] and
//! [`FrameReader`] halves used by the session loops.
//!
//! # Architecture
//!
//! [`connect`] handles URL→request building, header insertion, and TLS
//! negotiation, then splits the stream. Both halves share one open flag:
//! the reader clears it when it sees a close frame, the end of the stream, or
//! a read error; the writer clears it when a close cannot be sent because the
//! connection is already gone.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use super::{ConnectParams, Connector, FrameReader, FrameWriter};

/// Concrete WebSocket stream type (avoids repeating the 6-line generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// [`Connector`] that opens real WebSocket connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        params: &ConnectParams,
    ) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>)> {
        let headers: Vec<(&str, &str)> = params
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        let (writer, reader) = connect(&params.socket_url, &headers).await?;
        Ok((Box::new(writer), Box::new(reader)))
    }
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn send(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    async fn close(&mut self) -> Result<()> {
        // Sends the close frame; the peer's reply is seen by the reader.
        if let Err(e) = self.sink.close().await {
            log::debug!("[WebSocket] Close frame not sent, connection already gone: {e}");
            self.open.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
    open: Arc<AtomicBool>,
}

impl WsReader {
    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl FrameReader for WsReader {
    /// Ping, pong and raw frames are skipped; tungstenite answers pings itself.
    async fn recv(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Ok(Some(text.to_string()));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return String::from_utf8(data.to_vec())
                        .map(Some)
                        .context("WebSocket binary frame is not UTF-8");
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason): (u16, String) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    log::info!("[WebSocket] Close frame received (code={code}, reason={reason:?})");
                    self.mark_closed();
                    return Ok(None);
                }
                Some(Ok(
                    tungstenite::Message::Ping(_)
                    | tungstenite::Message::Pong(_)
                    | tungstenite::Message::Frame(_),
                )) => continue,
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(anyhow::anyhow!("WebSocket read error: {e}"));
                }
                None => {
                    self.mark_closed();
                    return Ok(None);
                }
            }
        }
    }
}

/// Connect to a WebSocket URL with optional headers.
///
/// Builds an HTTP request from `url`, inserts each `(name, value)` header,
/// then performs the WebSocket handshake. Returns split (writer, reader)
/// halves sharing one open flag.
///
/// # Errors
///
/// Returns an error if the URL is invalid, header values are malformed,
/// or the WebSocket handshake fails.
pub async fn connect(url: &str, headers: &[(&str, &str)]) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    for &(name, value) in headers {
        let header_name = tungstenite::http::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let header_value = tungstenite::http::HeaderValue::from_str(value)
            .with_context(|| format!("invalid header value for {name}"))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;
    log::info!("[WebSocket] Connected to {url}");

    let (sink, stream) = ws_stream.split();
    let open = Arc::new(AtomicBool::new(true));

    Ok((
        WsWriter {
            sink,
            open: Arc::clone(&open),
        },
        WsReader { stream, open },
    ))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}
