//! In-process loopback transport.
//!
//! [`pair`] returns a [`MemoryConnector`] for the client and a [`MemoryPeer`]
//! that plays the server: it reads what the client wrote, pushes frames back,
//! injects read errors, and hangs up.
//!
//! ```ignore
//! let (connector, mut peer) = memory::pair();
//! let client = HubClient::builder("memory://", "c2")
//!     .handshake(DirectHandshake)
//!     .connector(connector)
//!     .build();
//! client.start().await?;
//! client.invoke("Ping", vec![])?;
//! assert!(peer.next_frame().await.is_some());
//! peer.push(r#"{"M":[{"M":"pong","A":[]}]}"#)?;
//! ```
//!
//! Closing is immediate: the writer's `close` flips the shared open flag and
//! drops its sending side, so the peer's [`MemoryPeer::next_frame`] returns
//! `None`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ConnectParams, Connector, FrameReader, FrameWriter};

/// Item travelling from the peer to the client.
#[derive(Debug)]
enum PeerFrame {
    Text(String),
    Error(String),
}

type Halves = (MemoryWriter, MemoryReader);

/// Client side of a loopback pair. Connects exactly once.
pub struct MemoryConnector {
    halves: Mutex<Option<Halves>>,
    connects: Arc<Mutex<Vec<ConnectParams>>>,
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector").finish_non_exhaustive()
    }
}

/// Server side of a loopback pair.
#[derive(Debug)]
pub struct MemoryPeer {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: Option<mpsc::UnboundedSender<PeerFrame>>,
    open: Arc<AtomicBool>,
    connects: Arc<Mutex<Vec<ConnectParams>>>,
}

/// Write half handed to the client.
#[derive(Debug)]
pub struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<String>>,
    open: Arc<AtomicBool>,
}

/// Read half handed to the client.
#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<PeerFrame>,
    open: Arc<AtomicBool>,
}

/// Create a connected loopback pair.
#[must_use]
pub fn pair() -> (MemoryConnector, MemoryPeer) {
    let (client_tx, from_client) = mpsc::unbounded_channel();
    let (to_client, client_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(true));
    let connects = Arc::new(Mutex::new(Vec::new()));

    let writer = MemoryWriter {
        tx: Some(client_tx),
        open: Arc::clone(&open),
    };
    let reader = MemoryReader {
        rx: client_rx,
        open: Arc::clone(&open),
    };

    (
        MemoryConnector {
            halves: Mutex::new(Some((writer, reader))),
            connects: Arc::clone(&connects),
        },
        MemoryPeer {
            from_client,
            to_client: Some(to_client),
            open,
            connects,
        },
    )
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        params: &ConnectParams,
    ) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>)> {
        self.connects
            .lock()
            .expect("MemoryConnector mutex poisoned")
            .push(params.clone());

        let Some((writer, reader)) = self
            .halves
            .lock()
            .expect("MemoryConnector mutex poisoned")
            .take()
        else {
            bail!("memory transport already connected");
        };
        Ok((Box::new(writer), Box::new(reader)))
    }
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, text: &str) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow!("memory transport closed"))?;
        tx.send(text.to_string())
            .map_err(|_| anyhow!("memory peer dropped"))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<String>> {
        match self.rx.recv().await {
            Some(PeerFrame::Text(text)) => Ok(Some(text)),
            Some(PeerFrame::Error(message)) => {
                self.open.store(false, Ordering::SeqCst);
                Err(anyhow!(message))
            }
            None => {
                self.open.store(false, Ordering::SeqCst);
                Ok(None)
            }
        }
    }
}

impl MemoryPeer {
    /// Next frame written by the client, or `None` once it closed.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame written by the client, parsed as JSON.
    ///
    /// # Panics
    ///
    /// Panics if the client wrote something that is not JSON.
    pub async fn next_json(&mut self) -> Option<serde_json::Value> {
        let frame = self.next_frame().await?;
        Some(serde_json::from_str(&frame).expect("client wrote invalid JSON"))
    }

    /// Frame already written by the client, without waiting.
    pub fn try_next_frame(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Deliver a text frame to the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer already hung up or the client is gone.
    pub fn push(&self, frame: impl Into<String>) -> Result<()> {
        self.deliver(PeerFrame::Text(frame.into()))
    }

    /// Make the client's next read fail with `message`.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer already hung up or the client is gone.
    pub fn inject_error(&self, message: impl Into<String>) -> Result<()> {
        self.deliver(PeerFrame::Error(message.into()))
    }

    fn deliver(&self, frame: PeerFrame) -> Result<()> {
        self.to_client
            .as_ref()
            .ok_or_else(|| anyhow!("memory peer hung up"))?
            .send(frame)
            .map_err(|_| anyhow!("memory client dropped"))
    }

    /// Close the server side; the client reads end-of-stream after any
    /// frames already pushed.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }

    /// Whether the client side still considers the connection open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Every [`ConnectParams`] the connector was asked to open.
    #[must_use]
    pub fn connect_params(&self) -> Vec<ConnectParams> {
        self.connects
            .lock()
            .expect("MemoryConnector mutex poisoned")
            .clone()
    }
}
