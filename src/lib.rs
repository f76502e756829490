//! signalr-async - client runtime for SignalR-style hub RPC.
//!
//! A [`HubClient`] keeps one persistent WebSocket session to a hub. Callers
//! fire invocations that are written in order by a producer loop, while a
//! consumer loop decodes inbound frames and fans them out to hooks.
//!
//! # Architecture
//!
//! - **Hooks** - ordered handler lists for received envelopes, hub events,
//!   invocation errors and fatal exceptions
//! - **Correlation** - sequence number → invocation record, so server errors
//!   can name the call that caused them
//! - **Queue** - unbounded FIFO of outbound events drained by one producer
//! - **Dispatch** - consumer loop and the built-in envelope handlers
//! - **Client** - lifecycle and supervision of the two loops
//!
//! # Modules
//!
//! - [`client`] - [`HubClient`] and its builder
//! - [`hook`] - [`EventHook`] and the [`Handler`] adapters
//! - [`transport`] - socket seam, WebSocket and in-memory implementations
//! - [`handshake`] - SignalR negotiate and direct connection parameters
//! - [`config`] - configuration loading
//! - [`decode`] - compressed payload decoding
//!
//! # Example
//!
//! ```ignore
//! let client = HubClient::new("https://socket.example.com/signalr", "c2");
//! client.subscribe("uE", blocking(|args: &Arguments| {
//!     println!("{args:?}");
//!     Ok(())
//! }));
//! client.start().await?;
//! client.invoke("SubscribeToExchangeDeltas", vec!["BTC-ETH".into()])?;
//! client.run_forever().await;
//! ```

pub mod client;
pub mod config;
pub mod correlation;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod hook;
pub mod protocol;
pub mod queue;
pub mod transport;

// Re-export commonly used types
pub use client::{HubClient, HubClientBuilder, SessionState, WeakHubClient};
pub use config::ClientConfig;
pub use correlation::InvocationRecord;
pub use decode::decode_payload;
pub use error::ClientError;
pub use handshake::{DirectHandshake, Handshake, NegotiateHandshake};
pub use hook::{blocking, suspending, EventHook, Handler};
pub use protocol::{Arguments, Envelope, HubMessage, InvocationError};
pub use queue::ClosePolicy;
pub use transport::{ConnectParams, Connector, FrameReader, FrameWriter};
