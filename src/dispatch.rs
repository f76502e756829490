//! Inbound consumer loop and envelope dispatch.
//!
//! Every non-empty frame is decoded into an [`Envelope`] and run through the
//! "received" hook. That hook always starts with two built-in handlers, in
//! this order:
//!
//! 1. [`HubMessageHandler`] - forwards each `M` entry to the handlers
//!    subscribed to its method name
//! 2. [`ErrorHandler`] - turns an `E` envelope into an [`InvocationError`]
//!    correlated through `I`, and dispatches it on the error hook
//!
//! Handlers added to "received" by the caller run after these two.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::correlation::CorrelationTable;
use crate::error::ClientError;
use crate::hook::{EventHook, Handler};
use crate::protocol::{Arguments, Envelope, InvocationError};
use crate::transport::FrameReader;

/// Hub event name → handlers subscribed to it.
#[derive(Debug, Default)]
pub struct HubEvents {
    events: Mutex<HashMap<String, Arc<EventHook<Arguments>>>>,
}

impl HubEvents {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to `event`, creating the event's hook on first use.
    pub fn subscribe<H>(&self, event: &str, handler: H)
    where
        H: Handler<Arguments> + 'static,
    {
        let hook = Arc::clone(
            self.events
                .lock()
                .expect("HubEvents mutex poisoned")
                .entry(event.to_string())
                .or_default(),
        );
        hook.register(handler);
        log::debug!("[HubEvents] Subscribed handler to '{event}'");
    }

    /// Hook for `event`, if anything subscribed to it.
    #[must_use]
    pub fn get(&self, event: &str) -> Option<Arc<EventHook<Arguments>>> {
        self.events
            .lock()
            .expect("HubEvents mutex poisoned")
            .get(event)
            .cloned()
    }

    /// Names of every subscribed event.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .events
            .lock()
            .expect("HubEvents mutex poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Built-in "received" handler forwarding hub messages to subscribers.
#[derive(Debug)]
pub struct HubMessageHandler {
    events: Arc<HubEvents>,
}

impl HubMessageHandler {
    /// Forward to the subscribers in `events`.
    #[must_use]
    pub fn new(events: Arc<HubEvents>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Handler<Envelope> for HubMessageHandler {
    async fn call(&self, envelope: &Envelope) -> Result<()> {
        for message in &envelope.messages {
            if let Some(hook) = self.events.get(&message.method) {
                log::trace!(
                    "[Consumer] Hub message '{}' with {} argument(s)",
                    message.method,
                    message.arguments.len()
                );
                hook.dispatch(&message.arguments).await?;
            }
        }
        Ok(())
    }
}

/// Built-in "received" handler reporting per-invocation errors.
#[derive(Debug)]
pub struct ErrorHandler {
    invocations: Arc<Mutex<CorrelationTable>>,
    errors: Arc<EventHook<InvocationError>>,
}

impl ErrorHandler {
    /// Correlate through `invocations` and report on `errors`.
    #[must_use]
    pub fn new(
        invocations: Arc<Mutex<CorrelationTable>>,
        errors: Arc<EventHook<InvocationError>>,
    ) -> Self {
        Self {
            invocations,
            errors,
        }
    }
}

#[async_trait]
impl Handler<Envelope> for ErrorHandler {
    async fn call(&self, envelope: &Envelope) -> Result<()> {
        let Some(error) = &envelope.error else {
            return Ok(());
        };

        let index = envelope.invocation_index();
        let call_arguments = self
            .invocations
            .lock()
            .expect("CorrelationTable mutex poisoned")
            .lookup(index)
            .cloned();
        if call_arguments.is_none() {
            log::debug!("[Consumer] Error frame for unknown invocation {index}");
        }

        let report = InvocationError {
            error: error.clone(),
            call_arguments,
        };
        self.errors.dispatch(&report).await
    }
}

/// Build the "received" hook with the two built-in handlers registered first.
#[must_use]
pub fn received_hook(
    events: Arc<HubEvents>,
    invocations: Arc<Mutex<CorrelationTable>>,
    errors: Arc<EventHook<InvocationError>>,
) -> EventHook<Envelope> {
    let hook = EventHook::new();
    hook.register(HubMessageHandler::new(events))
        .register(ErrorHandler::new(invocations, errors));
    hook
}

/// Read frames until the connection closes, dispatching each on `received`.
///
/// Returns `Ok(())` when the socket reports it has closed.
///
/// # Errors
///
/// - [`ClientError::Transport`] if a read fails
/// - [`ClientError::Decode`] if a frame is not a JSON envelope
/// - [`ClientError::Hook`] if any handler fails
pub async fn run_consumer(
    reader: &mut dyn FrameReader,
    received: &EventHook<Envelope>,
) -> Result<(), ClientError> {
    loop {
        let Some(frame) = reader.recv().await.map_err(ClientError::Transport)? else {
            log::info!("[Consumer] Connection closed");
            return Ok(());
        };
        if frame.is_empty() {
            continue;
        }

        let envelope =
            Envelope::from_frame(&frame).map_err(|e| ClientError::decode(e, &frame))?;
        received
            .dispatch(&envelope)
            .await
            .map_err(ClientError::Hook)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::InvocationRecord;
    use crate::hook::blocking;
    use crate::transport::memory;
    use crate::transport::{ConnectParams, Connector};
    use serde_json::json;

    struct Fixture {
        events: Arc<HubEvents>,
        invocations: Arc<Mutex<CorrelationTable>>,
        errors: Arc<EventHook<InvocationError>>,
        received: EventHook<Envelope>,
    }

    impl Fixture {
        fn new() -> Self {
            let events = Arc::new(HubEvents::new());
            let invocations = Arc::new(Mutex::new(CorrelationTable::new()));
            let errors = Arc::new(EventHook::new());
            let received = received_hook(
                Arc::clone(&events),
                Arc::clone(&invocations),
                Arc::clone(&errors),
            );
            Self {
                events,
                invocations,
                errors,
                received,
            }
        }

        fn capture_errors(&self) -> Arc<Mutex<Vec<InvocationError>>> {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            self.errors.register(blocking(move |e: &InvocationError| {
                sink.lock().unwrap().push(e.clone());
                Ok(())
            }));
            seen
        }

        fn capture_event(&self, event: &str) -> Arc<Mutex<Vec<Arguments>>> {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            self.events.subscribe(
                event,
                blocking(move |args: &Arguments| {
                    sink.lock().unwrap().push(args.clone());
                    Ok(())
                }),
            );
            seen
        }
    }

    #[test]
    fn test_received_hook_has_builtins() {
        let fixture = Fixture::new();
        assert_eq!(fixture.received.len(), 2);
    }

    #[tokio::test]
    async fn test_hub_message_reaches_subscriber_once() {
        let fixture = Fixture::new();
        let seen = fixture.capture_event("uE");

        let envelope = Envelope::from_frame(r#"{"M":[{"M":"uE","A":[1,2]}]}"#).unwrap();
        fixture.received.dispatch(&envelope).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![vec![json!(1), json!(2)]]);
    }

    #[tokio::test]
    async fn test_unsubscribed_hub_messages_are_ignored() {
        let fixture = Fixture::new();
        let seen = fixture.capture_event("uE");

        let envelope =
            Envelope::from_frame(r#"{"M":[{"M":"other","A":[1]},{"M":"uE","A":[2]}]}"#).unwrap();
        fixture.received.dispatch(&envelope).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![vec![json!(2)]]);
    }

    #[tokio::test]
    async fn test_hub_messages_keep_server_order() {
        let fixture = Fixture::new();
        let seen = fixture.capture_event("tick");

        let envelope = Envelope::from_frame(
            r#"{"M":[{"M":"tick","A":[1]},{"M":"tick","A":[2]},{"M":"tick","A":[3]}]}"#,
        )
        .unwrap();
        fixture.received.dispatch(&envelope).await.unwrap();

        let firsts: Vec<_> = seen.lock().unwrap().iter().map(|a| a[0].clone()).collect();
        assert_eq!(firsts, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_error_frame_is_correlated() {
        let fixture = Fixture::new();
        let seen = fixture.capture_errors();
        fixture
            .invocations
            .lock()
            .unwrap()
            .record(3, "c2", "foo", vec![json!("x")]);

        let envelope = Envelope::from_frame(r#"{"E":"bad arg","I":3}"#).unwrap();
        fixture.received.dispatch(&envelope).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![InvocationError {
                error: json!("bad arg"),
                call_arguments: Some(InvocationRecord {
                    hub_name: "c2".into(),
                    method: "foo".into(),
                    data: vec![json!("x")],
                }),
            }]
        );
    }

    #[tokio::test]
    async fn test_null_error_and_float_id_still_reach_error_hook() {
        let fixture = Fixture::new();
        let seen = fixture.capture_errors();
        {
            let mut invocations = fixture.invocations.lock().unwrap();
            invocations.record(0, "c2", "first", vec![]);
            invocations.record(3, "c2", "fourth", vec![json!(3)]);
        }

        for frame in [r#"{"E":null,"I":0}"#, r#"{"E":"x","I":3.0}"#] {
            let envelope = Envelope::from_frame(frame).unwrap();
            fixture.received.dispatch(&envelope).await.unwrap();
        }

        let errors = seen.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].error, serde_json::Value::Null);
        assert_eq!(errors[0].call_arguments.as_ref().unwrap().method, "first");
        assert_eq!(errors[1].error, json!("x"));
        assert_eq!(errors[1].call_arguments.as_ref().unwrap().method, "fourth");
    }

    #[tokio::test]
    async fn test_error_frame_for_unknown_invocation() {
        let fixture = Fixture::new();
        let seen = fixture.capture_errors();

        let envelope = Envelope::from_frame(r#"{"E":"boom","I":999}"#).unwrap();
        fixture.received.dispatch(&envelope).await.unwrap();

        let errors = seen.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error, json!("boom"));
        assert!(errors[0].call_arguments.is_none());
    }

    #[tokio::test]
    async fn test_frames_without_error_do_not_reach_error_hook() {
        let fixture = Fixture::new();
        let seen = fixture.capture_errors();

        let envelope = Envelope::from_frame(r#"{"R":true,"I":"0"}"#).unwrap();
        fixture.received.dispatch(&envelope).await.unwrap();

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_caller_hooks_run_after_builtins() {
        let fixture = Fixture::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let event_order = Arc::clone(&order);
        fixture.events.subscribe(
            "uE",
            blocking(move |_: &Arguments| {
                event_order.lock().unwrap().push("hub-message");
                Ok(())
            }),
        );
        let error_order = Arc::clone(&order);
        fixture.errors.register(blocking(move |_: &InvocationError| {
            error_order.lock().unwrap().push("error");
            Ok(())
        }));
        let raw_order = Arc::clone(&order);
        fixture.received.register(blocking(move |_: &Envelope| {
            raw_order.lock().unwrap().push("raw");
            Ok(())
        }));

        let envelope =
            Envelope::from_frame(r#"{"M":[{"M":"uE","A":[]}],"E":"bad","I":1}"#).unwrap();
        fixture.received.dispatch(&envelope).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["hub-message", "error", "raw"]);
    }

    #[tokio::test]
    async fn test_consumer_dispatches_until_close() {
        let fixture = Fixture::new();
        let seen = fixture.capture_event("uE");
        let (connector, mut peer) = memory::pair();
        let (_writer, mut reader) = connector
            .connect(&ConnectParams::default())
            .await
            .unwrap();

        peer.push(r#"{"M":[{"M":"uE","A":[1]}]}"#).unwrap();
        peer.push("").unwrap();
        peer.push("{}").unwrap();
        peer.push(r#"{"M":[{"M":"uE","A":[2]}]}"#).unwrap();
        peer.hang_up();

        run_consumer(reader.as_mut(), &fixture.received)
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_consumer_fails_on_malformed_frame() {
        let fixture = Fixture::new();
        let seen = fixture.capture_event("uE");
        let (connector, peer) = memory::pair();
        let (_writer, mut reader) = connector
            .connect(&ConnectParams::default())
            .await
            .unwrap();

        peer.push("{not json").unwrap();
        peer.push(r#"{"M":[{"M":"uE","A":[1]}]}"#).unwrap();

        let err = run_consumer(reader.as_mut(), &fixture.received)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Decode { .. }));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_consumer_propagates_handler_failure() {
        let fixture = Fixture::new();
        fixture.events.subscribe(
            "uE",
            blocking(|_: &Arguments| Err(anyhow::anyhow!("subscriber broke"))),
        );
        let (connector, peer) = memory::pair();
        let (_writer, mut reader) = connector
            .connect(&ConnectParams::default())
            .await
            .unwrap();

        peer.push(r#"{"M":[{"M":"uE","A":[]}]}"#).unwrap();

        let err = run_consumer(reader.as_mut(), &fixture.received)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Hook(_)));
        assert!(err.to_string().contains("subscriber broke"));
    }

    #[tokio::test]
    async fn test_consumer_reports_transport_fault() {
        let fixture = Fixture::new();
        let (connector, peer) = memory::pair();
        let (_writer, mut reader) = connector
            .connect(&ConnectParams::default())
            .await
            .unwrap();

        peer.inject_error("connection reset").unwrap();

        let err = run_consumer(reader.as_mut(), &fixture.received)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[test]
    fn test_hub_events_names_sorted() {
        let events = HubEvents::new();
        events.subscribe("uS", blocking(|_: &Arguments| Ok(())));
        events.subscribe("uE", blocking(|_: &Arguments| Ok(())));
        events.subscribe("uE", blocking(|_: &Arguments| Ok(())));

        assert_eq!(events.names(), vec!["uE", "uS"]);
        assert_eq!(events.get("uE").unwrap().len(), 2);
        assert!(events.get("missing").is_none());
    }
}
