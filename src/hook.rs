//! Ordered multi-subscriber event hooks.
//!
//! An [`EventHook`] is an append-only list of [`Handler`]s. Dispatching runs
//! every handler in registration order with the same arguments, awaiting each
//! one before starting the next. A handler error stops the dispatch and is
//! returned to the caller; nothing is caught here.
//!
//! # Handlers
//!
//! Every handler implements the single async [`Handler::call`] method. Plain
//! closures are adapted at registration time:
//!
//! ```ignore
//! hook.register(blocking(|args: &Arguments| {
//!     println!("{args:?}");
//!     Ok(())
//! }))
//! .register(suspending(|args: Arguments| async move {
//!     store.save(args).await
//! }));
//! ```
//!
//! # Fire-and-forget dispatch
//!
//! [`EventHook::dispatch_now`] is used when the session is already stopping
//! and nothing can be awaited. Each handler future is polled exactly once:
//! blocking handlers complete, suspending handlers that would wait are
//! abandoned.
//!
//! # Deadlock Prevention
//!
//! The handler list is snapshotted under the lock and the lock is released
//! before any handler runs, so handlers may register further handlers.

// Rust guideline compliant 2026-02

use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;

/// Capability interface for anything that reacts to a hook dispatch.
#[async_trait]
pub trait Handler<A: ?Sized + Sync>: Send + Sync {
    /// Handle one dispatch.
    ///
    /// # Errors
    ///
    /// An error aborts the remaining handlers of this dispatch and propagates
    /// to whoever dispatched.
    async fn call(&self, args: &A) -> Result<()>;
}

/// Adapter for synchronous closures.
pub struct Blocking<F>(F);

/// Adapter for closures returning a future.
///
/// The closure receives an owned clone of the dispatch arguments so the
/// returned future can outlive the dispatch borrow.
pub struct Suspending<F>(F);

/// Wrap a synchronous closure as a [`Handler`].
pub fn blocking<A, F>(f: F) -> Blocking<F>
where
    A: ?Sized + Sync,
    F: Fn(&A) -> Result<()> + Send + Sync,
{
    Blocking(f)
}

/// Wrap an async closure as a [`Handler`].
pub fn suspending<A, F, Fut>(f: F) -> Suspending<F>
where
    A: Clone + Send + Sync + 'static,
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Suspending(f)
}

impl<F> std::fmt::Debug for Blocking<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Blocking")
    }
}

impl<F> std::fmt::Debug for Suspending<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Suspending")
    }
}

#[async_trait]
impl<A, F> Handler<A> for Blocking<F>
where
    A: ?Sized + Sync,
    F: Fn(&A) -> Result<()> + Send + Sync,
{
    async fn call(&self, args: &A) -> Result<()> {
        (self.0)(args)
    }
}

#[async_trait]
impl<A, F, Fut> Handler<A> for Suspending<F>
where
    A: Clone + Send + Sync + 'static,
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn call(&self, args: &A) -> Result<()> {
        (self.0)(args.clone()).await
    }
}

/// Append-only, ordered list of handlers for one event.
pub struct EventHook<A: ?Sized + Sync> {
    handlers: Mutex<Vec<Arc<dyn Handler<A>>>>,
}

impl<A: ?Sized + Sync> std::fmt::Debug for EventHook<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHook")
            .field("handlers", &self.len())
            .finish()
    }
}

impl<A: ?Sized + Sync> Default for EventHook<A> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }
}

impl<A: ?Sized + Sync> EventHook<A> {
    /// Create an empty hook.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Returns `self` so registrations can be chained.
    pub fn register<H>(&self, handler: H) -> &Self
    where
        H: Handler<A> + 'static,
    {
        self.handlers
            .lock()
            .expect("EventHook mutex poisoned")
            .push(Arc::new(handler));
        self
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.lock().expect("EventHook mutex poisoned").len()
    }

    /// Returns `true` if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn Handler<A>>> {
        self.handlers
            .lock()
            .expect("EventHook mutex poisoned")
            .clone()
    }

    /// Run every handler in order, awaiting each before the next.
    ///
    /// # Errors
    ///
    /// Returns the first handler error; later handlers do not run.
    pub async fn dispatch(&self, args: &A) -> Result<()> {
        for handler in self.snapshot() {
            handler.call(args).await?;
        }
        Ok(())
    }

    /// Run every handler without awaiting.
    ///
    /// Each handler is polled once. Errors are logged rather than returned
    /// and handlers that suspend are dropped unfinished.
    pub fn dispatch_now(&self, args: &A) {
        for handler in self.snapshot() {
            match handler.call(args).now_or_never() {
                Some(Ok(())) => {}
                Some(Err(e)) => log::error!("[EventHook] Handler failed during shutdown: {e:#}"),
                None => log::warn!("[EventHook] Suspending handler abandoned during shutdown"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, tag: &'static str) -> Blocking<impl Fn(&i32) -> Result<()>> {
        let log = Arc::clone(log);
        blocking(move |n: &i32| {
            log.lock().unwrap().push(format!("{tag}:{n}"));
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_dispatch_runs_handlers_in_registration_order() {
        let log: Log = Arc::default();
        let hook = EventHook::<i32>::new();
        hook.register(recorder(&log, "a"))
            .register(recorder(&log, "b"))
            .register(recorder(&log, "c"));

        hook.dispatch(&7).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a:7", "b:7", "c:7"]);
    }

    #[tokio::test]
    async fn test_suspending_handler_completes_before_next_starts() {
        let log: Log = Arc::default();
        let hook = EventHook::<i32>::new();

        let slow_log = Arc::clone(&log);
        hook.register(suspending(move |n: i32| {
            let log = Arc::clone(&slow_log);
            async move {
                log.lock().unwrap().push(format!("slow-start:{n}"));
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                log.lock().unwrap().push(format!("slow-end:{n}"));
                Ok(())
            }
        }));
        hook.register(recorder(&log, "fast"));

        hook.dispatch(&1).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["slow-start:1", "slow-end:1", "fast:1"]
        );
    }

    #[tokio::test]
    async fn test_handler_error_stops_dispatch_and_propagates() {
        let log: Log = Arc::default();
        let hook = EventHook::<i32>::new();
        hook.register(recorder(&log, "first"));
        hook.register(blocking(|_: &i32| Err(anyhow::anyhow!("handler exploded"))));
        hook.register(recorder(&log, "never"));

        let err = hook.dispatch(&3).await.unwrap_err();

        assert_eq!(err.to_string(), "handler exploded");
        assert_eq!(*log.lock().unwrap(), vec!["first:3"]);
    }

    #[tokio::test]
    async fn test_dispatch_on_empty_hook_is_ok() {
        let hook = EventHook::<i32>::new();
        assert!(hook.is_empty());
        hook.dispatch(&0).await.unwrap();
    }

    #[test]
    fn test_dispatch_now_runs_blocking_handlers() {
        let log: Log = Arc::default();
        let hook = EventHook::<i32>::new();
        hook.register(recorder(&log, "a")).register(recorder(&log, "b"));

        hook.dispatch_now(&5);

        assert_eq!(*log.lock().unwrap(), vec!["a:5", "b:5"]);
    }

    #[test]
    fn test_dispatch_now_abandons_suspended_handlers_and_continues() {
        let log: Log = Arc::default();
        let hook = EventHook::<i32>::new();
        let pending_log = Arc::clone(&log);
        hook.register(suspending(move |_: i32| {
            let log = Arc::clone(&pending_log);
            async move {
                futures_util::future::pending::<()>().await;
                log.lock().unwrap().push("unreachable".to_string());
                Ok(())
            }
        }));
        hook.register(blocking(|_: &i32| Err(anyhow::anyhow!("ignored"))));
        hook.register(recorder(&log, "last"));

        hook.dispatch_now(&9);

        assert_eq!(*log.lock().unwrap(), vec!["last:9"]);
    }

    #[tokio::test]
    async fn test_handler_may_register_during_dispatch() {
        let hook = Arc::new(EventHook::<i32>::new());
        let inner = Arc::clone(&hook);
        hook.register(blocking(move |_: &i32| {
            inner.register(blocking(|_: &i32| Ok(())));
            Ok(())
        }));

        hook.dispatch(&0).await.unwrap();

        assert_eq!(hook.len(), 2);
    }

    #[tokio::test]
    async fn test_unsized_arguments() {
        let seen = Arc::new(Mutex::new(0usize));
        let hook = EventHook::<[u8]>::new();
        let counter = Arc::clone(&seen);
        hook.register(blocking(move |bytes: &[u8]| {
            *counter.lock().unwrap() += bytes.len();
            Ok(())
        }));

        hook.dispatch(b"abc".as_slice()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), 3);
    }
}
