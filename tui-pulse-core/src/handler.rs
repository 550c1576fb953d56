//! Caller-supplied callbacks with failure isolation
//!
//! Key bindings and bus subscribers both accept handlers that may be
//! synchronous or asynchronous. Whatever the flavor, a failing handler
//! (returned error or panic) surfaces as a [`HandlerError`] at the call
//! site instead of unwinding through the dispatcher.

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::warn;

use crate::error::{panic_message, HandlerError, HandlerResult};

type SyncFn<T> = dyn Fn(&T) -> HandlerResult + Send + Sync;
type AsyncFn<T> = dyn Fn(T) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// A one-argument callback, either run inline or awaited.
pub enum Handler<T> {
    /// Runs to completion on the calling task
    Sync(Arc<SyncFn<T>>),
    /// Produces a future that must be awaited (or spawned)
    Async(Arc<AsyncFn<T>>),
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        match self {
            Handler::Sync(f) => Handler::Sync(Arc::clone(f)),
            Handler::Async(f) => Handler::Async(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Sync(_) => f.write_str("Handler::Sync"),
            Handler::Async(_) => f.write_str("Handler::Async"),
        }
    }
}

impl<T> Handler<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap a synchronous callback.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T) -> HandlerResult + Send + Sync + 'static,
    {
        Handler::Sync(Arc::new(f))
    }

    /// Wrap an asynchronous callback.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Handler::Async(Arc::new(move |arg| f(arg).boxed()))
    }

    /// Whether this handler needs to be awaited.
    pub fn is_async(&self) -> bool {
        matches!(self, Handler::Async(_))
    }

    /// Invoke the handler, awaiting it if asynchronous.
    pub async fn call(&self, arg: &T) -> HandlerResult {
        match self {
            Handler::Sync(f) => invoke_sync(f.as_ref(), arg),
            Handler::Async(f) => {
                let fut = match catch_unwind(AssertUnwindSafe(|| f(arg.clone()))) {
                    Ok(fut) => fut,
                    Err(payload) => return Err(panicked(payload.as_ref())),
                };
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => Err(panicked(payload.as_ref())),
                }
            }
        }
    }

    /// Invoke the handler without awaiting.
    ///
    /// Synchronous handlers run inline. Asynchronous handlers are spawned on
    /// the current tokio runtime and their failures are logged under `label`;
    /// outside a runtime they cannot run and an error is returned.
    pub fn call_now(&self, arg: &T, label: &str) -> HandlerResult {
        let label = label.to_string();
        self.call_now_or_else(arg, move |error| {
            warn!(handler = %label, %error, "Async handler failed");
        })
    }

    /// Like [`call_now`](Self::call_now), but a spawned handler's failure is
    /// passed to `on_failure` instead of being logged.
    pub fn call_now_or_else<F>(&self, arg: &T, on_failure: F) -> HandlerResult
    where
        F: FnOnce(HandlerError) + Send + 'static,
    {
        match self {
            Handler::Sync(f) => invoke_sync(f.as_ref(), arg),
            Handler::Async(_) => {
                let runtime = tokio::runtime::Handle::try_current()
                    .map_err(|_| HandlerError::from("no async runtime available for handler"))?;
                let handler = self.clone();
                let arg = arg.clone();
                runtime.spawn(async move {
                    if let Err(error) = handler.call(&arg).await {
                        on_failure(error);
                    }
                });
                Ok(())
            }
        }
    }
}

fn invoke_sync<T>(f: &SyncFn<T>, arg: &T) -> HandlerResult {
    match catch_unwind(AssertUnwindSafe(|| f(arg))) {
        Ok(result) => result,
        Err(payload) => Err(panicked(payload.as_ref())),
    }
}

fn panicked(payload: &(dyn std::any::Any + Send)) -> HandlerError {
    format!("handler panicked: {}", panic_message(payload)).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_sync_handler_runs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handler = Handler::new(move |n: &usize| {
            h.fetch_add(*n, Ordering::SeqCst);
            Ok(())
        });

        assert!(!handler.is_async());
        handler.call(&3).await.unwrap();
        handler.call_now(&4, "test").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_async_handler_awaited() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handler = Handler::from_async(move |n: usize| {
            let h = h.clone();
            async move {
                tokio::task::yield_now().await;
                h.fetch_add(n, Ordering::SeqCst);
                Ok(())
            }
        });

        assert!(handler.is_async());
        handler.call(&5).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_panics_become_errors() {
        let sync = Handler::new(|_: &u8| panic!("sync boom"));
        let err = sync.call(&0).await.unwrap_err();
        assert!(err.to_string().contains("sync boom"));

        let async_handler = Handler::from_async(|n: u8| async move {
            assert!(n > 0, "async boom");
            Ok(())
        });
        let err = async_handler.call(&0).await.unwrap_err();
        assert!(err.to_string().contains("async boom"));
    }

    #[tokio::test]
    async fn test_spawned_failure_reaches_callback() {
        let handler = Handler::from_async(|_: u8| async { Err("late failure".into()) });
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        handler
            .call_now_or_else(&1, move |error| {
                let _ = tx.send(error.to_string());
            })
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "late failure");
    }

    #[test]
    fn test_async_call_now_without_runtime_fails() {
        let handler = Handler::from_async(|_: u8| async { Ok(()) });
        assert!(handler.call_now(&1, "orphan").is_err());
    }
}
