//! Hub session lifecycle.
//!
//! [`HubClient`] owns one session: the invocation counter, the correlation
//! table, the outbound queue, the hook registries, and (once started) the
//! socket halves driven by two concurrent loops.
//!
//! # Architecture
//!
//! ```text
//!   invoke() / close()              supervisor task
//!   (any task, any thread)    ┌──────────────────────────────┐
//!          │                  │  guarded(producer) ──► socket│
//!          ▼                  │         ▲           write    │
//!    outbound queue ──────────┼─────────┘                    │
//!                             │  guarded(consumer) ◄── socket│
//!                             │         │           read     │
//!                             └─────────┼────────────────────┘
//!                                       ▼
//!                 received hook: hub messages → subscribers
//!                                error frames → error hook
//!                                caller hooks
//! ```
//!
//! The supervisor races the two loops; whichever finishes first (normally or
//! with an error) ends the session and the other is dropped mid-flight. An
//! error escaping either loop is logged, moves the session to
//! [`SessionState::Faulted`], and is reported once through the exception
//! hook. There is no reconnection.
//!
//! # States
//!
//! ```text
//! Idle → Connecting → Running → Closing → Closed
//!   ▲         │          │
//!   └─ failed ┘          └──────────────→ Faulted
//! ```

// Rust guideline compliant 2026-02

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

use crate::config::ClientConfig;
use crate::correlation::{CorrelationTable, InvocationRecord};
use crate::dispatch::{received_hook, run_consumer, HubEvents};
use crate::error::ClientError;
use crate::handshake::{DirectHandshake, Handshake, NegotiateHandshake};
use crate::hook::{EventHook, Handler};
use crate::protocol::{Arguments, Envelope, InvocationError, OutboundInvocation};
use crate::queue::{self, run_producer, ClosePolicy, OutboundEvent, QueueReceiver, QueueSender};
use crate::transport::{Connector, FrameReader, FrameWriter, WsConnector};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not started; invocations are buffered.
    Idle,
    /// Building connection parameters and opening the socket.
    Connecting,
    /// Both loops are running.
    Running,
    /// A close was requested and not yet completed.
    Closing,
    /// The socket closed normally.
    Closed,
    /// A loop failed; the session stopped.
    Faulted,
}

impl SessionState {
    /// Returns `true` for states a session never leaves.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Faulted)
    }
}

/// Counter and close flag, guarded together so id order equals queue order.
#[derive(Debug)]
struct Session {
    /// Last issued sequence number; -1 before the first invoke.
    counter: i64,
    close_requested: bool,
}

/// State shared by every [`HubClient`] handle and the supervisor task.
struct Inner {
    config: ClientConfig,
    handshake: Arc<dyn Handshake>,
    connector: Arc<dyn Connector>,
    session: Mutex<Session>,
    invocations: Arc<Mutex<CorrelationTable>>,
    queue_tx: QueueSender,
    queue_rx: Mutex<Option<QueueReceiver>>,
    state: watch::Sender<SessionState>,
    events: Arc<HubEvents>,
    received: EventHook<Envelope>,
    errors: Arc<EventHook<InvocationError>>,
    exceptions: EventHook<ClientError>,
}

/// Client for one hub session.
///
/// Cloning is cheap and every clone drives the same session. Handlers
/// registered on the client are owned by it, so a handler that needs the
/// client must capture a [`WeakHubClient`] from [`HubClient::downgrade`].
#[derive(Clone)]
pub struct HubClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("address", &self.inner.config.address)
            .field("hub", &self.inner.config.hub)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Builder for [`HubClient`].
///
/// Without overrides the client negotiates (or connects directly when
/// `negotiate` is off in the config) and uses the WebSocket transport.
pub struct HubClientBuilder {
    config: ClientConfig,
    handshake: Option<Arc<dyn Handshake>>,
    connector: Option<Arc<dyn Connector>>,
}

impl std::fmt::Debug for HubClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClientBuilder")
            .field("config", &self.config)
            .field("custom_handshake", &self.handshake.is_some())
            .field("custom_connector", &self.connector.is_some())
            .finish()
    }
}

impl HubClientBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            handshake: None,
            connector: None,
        }
    }

    /// Use `handshake` to build connection parameters.
    #[must_use]
    pub fn handshake(mut self, handshake: impl Handshake + 'static) -> Self {
        self.handshake = Some(Arc::new(handshake));
        self
    }

    /// Use `connector` to open the socket.
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Override the close handshake timing.
    #[must_use]
    pub fn close_policy(mut self, policy: ClosePolicy) -> Self {
        self.config.close_poll_interval_ms =
            u64::try_from(policy.poll_interval.as_millis()).unwrap_or(u64::MAX);
        self.config.close_timeout_ms =
            u64::try_from(policy.timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Build the client. Nothing is connected until [`HubClient::start`].
    #[must_use]
    pub fn build(self) -> HubClient {
        let handshake: Arc<dyn Handshake> = match self.handshake {
            Some(handshake) => handshake,
            None if self.config.negotiate => Arc::new(NegotiateHandshake::new()),
            None => Arc::new(DirectHandshake),
        };
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WsConnector),
        };

        let (queue_tx, queue_rx) = queue::channel();
        let (state, _) = watch::channel(SessionState::Idle);
        let events = Arc::new(HubEvents::new());
        let invocations = Arc::new(Mutex::new(CorrelationTable::new()));
        let errors = Arc::new(EventHook::new());
        let received = received_hook(
            Arc::clone(&events),
            Arc::clone(&invocations),
            Arc::clone(&errors),
        );

        HubClient {
            inner: Arc::new(Inner {
                config: self.config,
                handshake,
                connector,
                session: Mutex::new(Session {
                    counter: -1,
                    close_requested: false,
                }),
                invocations,
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                state,
                events,
                received,
                errors,
                exceptions: EventHook::new(),
            }),
        }
    }
}

impl HubClient {
    /// Client for `hub` at `address` with default settings.
    #[must_use]
    pub fn new(address: impl Into<String>, hub: impl Into<String>) -> Self {
        Self::builder(address, hub).build()
    }

    /// Builder for `hub` at `address`.
    #[must_use]
    pub fn builder(address: impl Into<String>, hub: impl Into<String>) -> HubClientBuilder {
        HubClientBuilder::new(ClientConfig::new(address, hub))
    }

    /// Builder from a loaded configuration.
    #[must_use]
    pub fn from_config(config: ClientConfig) -> HubClientBuilder {
        HubClientBuilder::new(config)
    }

    /// Hub name of this session.
    #[must_use]
    pub fn hub(&self) -> &str {
        &self.inner.config.hub
    }

    /// Configuration the client was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Hook receiving every decoded inbound envelope.
    ///
    /// Handlers registered here run after the built-in hub-message and error
    /// handlers.
    #[must_use]
    pub fn received(&self) -> &EventHook<Envelope> {
        &self.inner.received
    }

    /// Hook receiving per-invocation errors reported by the server.
    #[must_use]
    pub fn errors(&self) -> &EventHook<InvocationError> {
        &self.inner.errors
    }

    /// Hook receiving the fatal error that stopped the session.
    ///
    /// Dispatched fire-and-forget, so only handlers that complete without
    /// suspending are guaranteed to run.
    #[must_use]
    pub fn exceptions(&self) -> &EventHook<ClientError> {
        &self.inner.exceptions
    }

    /// Call `handler` with the arguments of every `event` hub message.
    ///
    /// May be called before or after [`Self::start`]. A handler that needs
    /// the client should capture [`Self::downgrade`] rather than a clone.
    pub fn subscribe<H>(&self, event: &str, handler: H) -> &Self
    where
        H: Handler<Arguments> + 'static,
    {
        self.inner.events.subscribe(event, handler);
        self
    }

    /// Names of the hub events with at least one subscriber, sorted.
    #[must_use]
    pub fn subscribed_events(&self) -> Vec<String> {
        self.inner.events.names()
    }

    /// Queue a call of `method` on the hub and return its sequence number.
    ///
    /// Returns immediately; the server's answer arrives through the hooks.
    /// Calls made before [`Self::start`] are buffered.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] once a close was requested or the
    /// session ended.
    pub fn invoke(&self, method: &str, args: Arguments) -> Result<i64, ClientError> {
        let inner = &self.inner;
        let mut session = inner.session.lock().expect("Session mutex poisoned");
        if session.close_requested || self.state().is_terminal() {
            return Err(ClientError::Closed);
        }

        session.counter += 1;
        let id = session.counter;
        let hub = inner.config.hub.clone();

        // Record before enqueueing so an error frame can never beat its record.
        inner
            .invocations
            .lock()
            .expect("CorrelationTable mutex poisoned")
            .record(id, &hub, method, args.clone());

        inner
            .queue_tx
            .send(OutboundEvent::Invoke(OutboundInvocation {
                hub,
                method: method.to_string(),
                args,
                id,
            }))
            .map_err(|_| ClientError::Closed)?;

        log::debug!("[HubClient] Queued invocation {id} ({method})");
        Ok(id)
    }

    /// The call recorded under sequence number `id`.
    #[must_use]
    pub fn invocation(&self, id: i64) -> Option<InvocationRecord> {
        self.inner
            .invocations
            .lock()
            .expect("CorrelationTable mutex poisoned")
            .lookup(id)
            .cloned()
    }

    /// Ask the session to close once every queued invocation is written.
    ///
    /// Does not wait; use [`Self::run_forever`] to wait for completion.
    /// Calling it again has no effect.
    pub fn close(&self) {
        let inner = &self.inner;
        let mut session = inner.session.lock().expect("Session mutex poisoned");
        if session.close_requested {
            return;
        }
        session.close_requested = true;

        if inner.queue_tx.send(OutboundEvent::Close).is_err() {
            log::debug!("[HubClient] Close requested after the session ended");
        }
        inner.state.send_if_modified(|state| {
            if *state == SessionState::Running {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        });
        log::info!("[HubClient] Close requested");
    }

    /// Build connection parameters, open the socket and launch both loops.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`ClientError::AlreadyStarted`] unless the session is idle
    /// - [`ClientError::Handshake`] / [`ClientError::Transport`] if connecting
    ///   fails; the session returns to idle and keeps its buffered invocations
    pub async fn start(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let claimed = inner.state.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ClientError::AlreadyStarted);
        }

        let (writer, reader) = match inner.open().await {
            Ok(halves) => halves,
            Err(e) => {
                log::warn!("[HubClient] Failed to start session: {e}");
                inner.state.send_replace(SessionState::Idle);
                return Err(e);
            }
        };

        let Some(queue) = inner
            .queue_rx
            .lock()
            .expect("queue mutex poisoned")
            .take()
        else {
            inner.state.send_replace(SessionState::Faulted);
            return Err(ClientError::AlreadyStarted);
        };

        {
            let session = inner.session.lock().expect("Session mutex poisoned");
            inner.state.send_replace(if session.close_requested {
                SessionState::Closing
            } else {
                SessionState::Running
            });
        }
        log::info!("[HubClient] Session running on hub '{}'", inner.config.hub);

        tokio::spawn(supervise(Arc::clone(inner), writer, reader, queue));
        Ok(())
    }

    /// Wait until the session is closed or faulted and return that state.
    ///
    /// Waits indefinitely on a session that is never started.
    pub async fn run_forever(&self) -> SessionState {
        let mut updates = self.inner.state.subscribe();
        let state = match updates.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    /// Non-owning handle to this session.
    ///
    /// Handlers that call back into the client should capture this rather
    /// than a [`HubClient`] clone: the hooks live inside the session, so a
    /// captured clone keeps the session alive forever.
    #[must_use]
    pub fn downgrade(&self) -> WeakHubClient {
        WeakHubClient {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Weak reference to a [`HubClient`], obtained from [`HubClient::downgrade`].
#[derive(Clone, Default)]
pub struct WeakHubClient {
    inner: Weak<Inner>,
}

impl std::fmt::Debug for WeakHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakHubClient")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl WeakHubClient {
    /// The client, unless every handle and the session task are gone.
    #[must_use]
    pub fn upgrade(&self) -> Option<HubClient> {
        self.inner.upgrade().map(|inner| HubClient { inner })
    }
}

impl Inner {
    async fn open(&self) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), ClientError> {
        let params = self
            .handshake
            .build(&self.config.address, &self.config.hub)
            .await
            .map_err(ClientError::Handshake)?;
        log::info!("[HubClient] Connecting to {}", params.socket_url);
        self.connector
            .connect(&params)
            .await
            .map_err(ClientError::Transport)
    }
}

/// Run both loops until the first one finishes, then settle the final state.
async fn supervise(
    inner: Arc<Inner>,
    mut writer: Box<dyn FrameWriter>,
    mut reader: Box<dyn FrameReader>,
    mut queue: QueueReceiver,
) {
    let policy = inner.config.close_policy();
    let producer = guarded(
        &inner,
        "producer",
        run_producer(&mut queue, writer.as_mut(), policy),
    );
    let consumer = guarded(
        &inner,
        "consumer",
        run_consumer(reader.as_mut(), &inner.received),
    );

    tokio::select! {
        () = producer => log::debug!("[HubClient] Producer loop finished first"),
        () = consumer => log::debug!("[HubClient] Consumer loop finished first"),
    }

    inner.state.send_if_modified(|state| {
        if state.is_terminal() {
            false
        } else {
            *state = SessionState::Closed;
            true
        }
    });
    log::info!("[HubClient] Session ended ({:?})", *inner.state.borrow());
}

/// Await `work`; on error stop the session and notify the exception hook.
async fn guarded<F>(inner: &Inner, name: &str, work: F)
where
    F: Future<Output = Result<(), ClientError>>,
{
    if let Err(error) = work.await {
        log::error!("[HubClient] Exception in the {name} loop: {error}");
        inner.state.send_replace(SessionState::Faulted);
        inner.exceptions.dispatch_now(&error);
    }
}
