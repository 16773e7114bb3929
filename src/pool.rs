//! Worker pools executing producer jobs.
//!
//! The graph never runs user code on its own. Every ready node is handed to a
//! [`WorkerPool`] as a boxed job, and the pool decides where and when it runs.
//! Completion is observed through the node's promise, so a pool does not need
//! to report anything back.

use std::sync::Arc;

#[cfg(feature = "rayon")]
use std::borrow::Cow;

#[cfg(feature = "tokio")]
use std::future::Future;

#[cfg(feature = "tokio")]
use crate::promise::Promise;

/// A unit of work submitted to a pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Accepts jobs for execution.
///
/// Implementations must run every submitted job exactly once. They may run it
/// on the calling thread before `submit` returns.
pub trait WorkerPool: Send + Sync {
    fn submit(&self, job: Job);
}

impl<P> WorkerPool for Arc<P>
where
    P: WorkerPool + ?Sized,
{
    fn submit(&self, job: Job) {
        (**self).submit(job)
    }
}

/// Runs every job synchronously on the submitting thread.
///
/// Graphs driven by a direct pool are fully settled by the time
/// [`Graph::run`](crate::Graph::run) returns, unless a producer hands back a
/// deferred value. Handy in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectPool;

impl WorkerPool for DirectPool {
    fn submit(&self, job: Job) {
        job()
    }
}

/// Runs jobs on a rayon thread pool.
#[cfg(feature = "rayon")]
#[derive(Clone)]
pub struct RayonPool {
    pool: Option<Arc<rayon::ThreadPool>>,
}

#[cfg(feature = "rayon")]
impl RayonPool {
    /// Uses the global rayon pool.
    pub fn global() -> Self {
        Self { pool: None }
    }

    pub fn builder() -> RayonPoolBuilder {
        RayonPoolBuilder::default()
    }
}

#[cfg(feature = "rayon")]
impl Default for RayonPool {
    fn default() -> Self {
        Self::global()
    }
}

#[cfg(feature = "rayon")]
impl WorkerPool for RayonPool {
    fn submit(&self, job: Job) {
        match &self.pool {
            Some(pool) => pool.spawn(job),
            None => rayon::spawn(job),
        }
    }
}

#[cfg(feature = "rayon")]
impl std::fmt::Debug for RayonPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.pool {
            Some(pool) => write!(f, "RayonPool({} threads)", pool.current_num_threads()),
            None => write!(f, "RayonPool(global)"),
        }
    }
}

/// Configures a dedicated rayon pool.
#[cfg(feature = "rayon")]
#[derive(Default)]
pub struct RayonPoolBuilder {
    threads: Option<usize>,
    thread_name: Option<Cow<'static, str>>,
}

#[cfg(feature = "rayon")]
impl RayonPoolBuilder {
    /// The number of worker threads, defaults to the number of CPUs.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Worker threads are named `{name}-{index}`.
    pub fn thread_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    pub fn build(self) -> Result<RayonPool, rayon::ThreadPoolBuildError> {
        let mut builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads) = self.threads {
            builder = builder.num_threads(threads);
        }

        if let Some(name) = self.thread_name {
            builder = builder.thread_name(move |index| format!("{name}-{index}"));
        }

        let pool = builder.build()?;
        tracing::debug!(threads = pool.current_num_threads(), "started worker pool");

        Ok(RayonPool {
            pool: Some(Arc::new(pool)),
        })
    }
}

/// Runs jobs on the blocking thread pool of a tokio runtime.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioPool {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio")]
impl TokioPool {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running in.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

#[cfg(feature = "tokio")]
impl WorkerPool for TokioPool {
    fn submit(&self, job: Job) {
        // The join handle is dropped, the job still runs to completion.
        self.handle.spawn_blocking(job);
    }
}

#[cfg(feature = "tokio")]
impl<T> Promise<T>
where
    T: Send + Sync + 'static,
{
    /// Spawns `future` on the runtime and returns a promise of its output.
    ///
    /// Meant for producers computing their value asynchronously, they can
    /// hand the promise back as [`Produced::Deferred`](crate::Produced).
    pub fn spawn<F>(handle: &tokio::runtime::Handle, future: F) -> Promise<T>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (promise, completer) = Promise::channel();
        handle.spawn(async move {
            completer.complete(future.await);
        });
        promise
    }
}
