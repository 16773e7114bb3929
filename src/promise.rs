//! Single-assignment result slots.
//!
//! A [`Promise<T>`] starts out pending and settles exactly once, either to a
//! value or to a [`Failure`]. Every node in a graph owns one, graphs hand one
//! back from [`Graph::run`](crate::Graph::run), and deferred producers return
//! one to signal that their value will arrive later.
//!
//! Listeners registered with [`Promise::on_settled`] run on the thread that
//! settles the promise, or immediately on the caller if it is already
//! settled. They are never invoked while the internal lock is held.

use std::fmt::{self, Debug};
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::error::Failure;

/// The terminal state of a promise.
pub type Outcome<T> = Result<Arc<T>, Failure>;

type Listener<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

enum State<T: ?Sized> {
    Pending {
        listeners: Vec<Listener<T>>,
        wakers: Vec<Waker>,
    },
    Settled(Outcome<T>),
}

struct Shared<T: ?Sized> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// A value that will eventually be available.
pub struct Promise<T: ?Sized> {
    shared: Arc<Shared<T>>,
}

impl<T: ?Sized> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Promise<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a pending promise together with the handle used to complete it.
    pub fn channel() -> (Promise<T>, Completer<T>) {
        let promise = Promise::pending();
        let completer = Completer {
            promise: Some(promise.clone()),
        };
        (promise, completer)
    }

    /// Creates a promise already settled to `value`.
    pub fn ready(value: T) -> Self {
        let promise = Promise::pending();
        promise.settle(Ok(Arc::new(value)));
        promise
    }
}

impl<T> Promise<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    pub(crate) fn pending() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending {
                    listeners: Vec::new(),
                    wakers: Vec::new(),
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Creates a promise already settled to a failure.
    pub fn failed(err: impl Into<Failure>) -> Self {
        let promise = Promise::pending();
        promise.settle(Err(err.into()));
        promise
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether the promise holds either a value or a failure.
    pub fn is_done(&self) -> bool {
        matches!(&*self.lock(), State::Settled(_))
    }

    /// Returns the outcome without blocking, if the promise has settled.
    pub fn outcome(&self) -> Option<Outcome<T>> {
        match &*self.lock() {
            State::Settled(outcome) => Some(outcome.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Blocks the current thread until the promise settles.
    pub fn wait(&self) -> Outcome<T> {
        let mut state = self.lock();
        loop {
            if let State::Settled(outcome) = &*state {
                return outcome.clone();
            }
            state = self
                .shared
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Registers a listener fired exactly once with the outcome.
    ///
    /// If the promise has already settled the listener runs immediately on
    /// the calling thread.
    pub fn on_settled<F>(&self, listener: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let mut state = self.lock();
        let outcome = match &mut *state {
            State::Pending { listeners, .. } => {
                listeners.push(Box::new(listener));
                return;
            }
            State::Settled(outcome) => outcome.clone(),
        };
        drop(state);

        listener(&outcome);
    }

    /// Settles the promise. Returns `false` if it had already settled, in
    /// which case the outcome is discarded.
    pub(crate) fn settle(&self, outcome: Outcome<T>) -> bool {
        let (listeners, wakers) = {
            let mut state = self.lock();
            match &mut *state {
                State::Settled(_) => {
                    tracing::warn!("attempted to settle an already settled promise");
                    return false;
                }
                State::Pending { listeners, wakers } => {
                    let listeners = mem::take(listeners);
                    let wakers = mem::take(wakers);
                    *state = State::Settled(outcome.clone());
                    (listeners, wakers)
                }
            }
        };

        self.shared.ready.notify_all();

        for listener in listeners {
            listener(&outcome);
        }

        for waker in wakers {
            waker.wake();
        }

        true
    }

    /// Returns a promise settling to `f` applied to this promise's value.
    /// Failures pass through unchanged.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: ?Sized + Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> Outcome<U> + Send + 'static,
    {
        let mapped = Promise::pending();
        let target = mapped.clone();
        self.on_settled(move |outcome| {
            let outcome = match outcome {
                Ok(value) => f(value.clone()),
                Err(err) => Err(err.clone()),
            };
            target.settle(outcome);
        });
        mapped
    }
}

impl<T> Future for Promise<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.lock();
        match &mut *state {
            State::Settled(outcome) => Poll::Ready(outcome.clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> Debug for Promise<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.lock() {
            State::Pending { .. } => "pending",
            State::Settled(Ok(_)) => "success",
            State::Settled(Err(_)) => "failure",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

/// The write end of a promise created with [`Promise::channel`].
///
/// Dropping a completer without completing it settles the promise to a
/// failure, so nothing waits on a value that can no longer arrive.
pub struct Completer<T>
where
    T: Send + Sync + 'static,
{
    promise: Option<Promise<T>>,
}

impl<T> Completer<T>
where
    T: Send + Sync + 'static,
{
    pub fn complete(mut self, result: anyhow::Result<T>) {
        if let Some(promise) = self.promise.take() {
            promise.settle(result.map(Arc::new).map_err(Failure::from));
        }
    }

    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, err: impl Into<anyhow::Error>) {
        self.complete(Err(err.into()));
    }
}

impl<T> Drop for Completer<T>
where
    T: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(promise) = self.promise.take() {
            promise.settle(Err(Failure::new(anyhow::anyhow!(
                "deferred value was dropped before completion"
            ))));
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_ready() {
        let promise = Promise::ready(42);
        assert!(promise.is_done());
        assert_eq!(*promise.wait().unwrap(), 42);
    }

    #[test]
    fn test_listener_fires_once() {
        let (promise, completer) = Promise::<u32>::channel();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        promise.on_settled(move |outcome| {
            assert_eq!(**outcome.as_ref().unwrap(), 7);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        completer.succeed(7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Late listeners run immediately.
        let counter = calls.clone();
        promise.on_settled(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_second_settle_is_noop() {
        let promise = Promise::<&str>::pending();
        assert!(promise.settle(Ok(Arc::new("first"))));
        assert!(!promise.settle(Ok(Arc::new("second"))));
        assert_eq!(*promise.wait().unwrap(), "first");
    }

    #[test]
    fn test_dropped_completer_fails() {
        let (promise, completer) = Promise::<u8>::channel();
        drop(completer);
        let err = promise.wait().unwrap_err();
        assert!(err.to_string().contains("dropped before completion"));
    }

    #[test]
    fn test_wait_across_threads() {
        let (promise, completer) = Promise::<String>::channel();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.succeed("late".to_string());
        });

        assert_eq!(promise.wait().unwrap().as_str(), "late");
        handle.join().unwrap();
    }

    #[test]
    fn test_map_passes_failure_through() {
        let failed = Promise::<i32>::failed(anyhow::anyhow!("boom"));
        let mapped = failed.map(|value| Ok(Arc::new(*value + 1)));
        assert_eq!(mapped.wait().unwrap_err().to_string(), "boom");

        let doubled = Promise::ready(21).map(|value| Ok(Arc::new(*value * 2)));
        assert_eq!(*doubled.wait().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_await() {
        let (promise, completer) = Promise::<u64>::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            completer.succeed(1234);
        });

        assert_eq!(*promise.await.unwrap(), 1234);
    }
}
