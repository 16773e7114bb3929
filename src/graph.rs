use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::Span;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::{Node, downcast};
use crate::error::{Failure, InputError};
use crate::key::{BindingKey, Key};
use crate::plan::Plan;
use crate::pool::WorkerPool;
use crate::promise::Promise;
use crate::resolver::Resolution;

/// A fully wired graph of nodes producing one value of type `T`.
///
/// A graph is created by [`Context::new_graph`](crate::Context::new_graph) in
/// an unstarted state. Keys the registry cannot produce are explicit inputs:
/// bind each with [`add_input`](Self::add_input), then call
/// [`run`](Self::run) to obtain a promise of the result. Running consumes the
/// graph, so it executes at most once.
pub struct Graph<T> {
    root: Arc<Node>,
    nodes: Vec<Arc<Node>>,
    inputs: HashMap<BindingKey, Arc<Node>>,
    pool: Arc<dyn WorkerPool>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Graph<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(resolution: Resolution, pool: Arc<dyn WorkerPool>) -> Self {
        Self {
            root: resolution.root,
            nodes: resolution.nodes,
            inputs: resolution.inputs,
            pool,
            _phantom: PhantomData,
        }
    }

    /// The key this graph produces.
    pub fn key(&self) -> BindingKey {
        self.root.key
    }

    /// Binds the value of an explicit input.
    ///
    /// Fails if `key` is not an explicit input of this graph, or if it has
    /// already been bound. A failed call leaves the graph unchanged.
    pub fn add_input<I>(&mut self, key: Key<I>, value: I) -> Result<&mut Self, InputError>
    where
        I: Send + Sync + 'static,
    {
        let key = key.erased();
        let node = self.inputs.get(&key).ok_or(InputError::Unexpected(key))?;

        if node.is_done() || !node.accept(Ok(Arc::new(value))) {
            return Err(InputError::AlreadyBound(key));
        }

        Ok(self)
    }

    /// Like [`add_input`](Self::add_input), for chaining by value.
    pub fn with_input<I>(mut self, key: Key<I>, value: I) -> Result<Self, InputError>
    where
        I: Send + Sync + 'static,
    {
        self.add_input(key, value)?;
        Ok(self)
    }

    /// Every explicit input, bound or not, sorted by key.
    pub fn explicit_inputs(&self) -> Vec<BindingKey> {
        let mut keys: Vec<_> = self.inputs.keys().copied().collect();
        keys.sort_by_cached_key(ToString::to_string);
        keys
    }

    /// The explicit inputs still waiting for a value, sorted by key.
    pub fn missing_inputs(&self) -> Vec<BindingKey> {
        let mut keys: Vec<_> = self
            .inputs
            .iter()
            .filter(|(_, node)| !node.is_done())
            .map(|(key, _)| *key)
            .collect();
        keys.sort_by_cached_key(ToString::to_string);
        keys
    }

    pub fn plan(&self) -> Plan {
        Plan::new(&self.nodes, &self.root)
    }

    /// Starts the graph and returns a promise of the root value.
    ///
    /// If any explicit input is unbound the promise fails right away with
    /// [`InputError::Missing`], and no producer runs. Otherwise every
    /// reachable node is wired and submitted to the worker pool as soon as
    /// all of its dependencies have settled.
    pub fn run(self) -> Promise<T> {
        let key = self.root.key;

        let missing = self.missing_inputs();
        if !missing.is_empty() {
            tracing::warn!(%key, missing = missing.len(), "graph has unbound inputs");
            return Promise::failed(Failure::new(InputError::Missing(missing)));
        }

        let computed = self.nodes.iter().filter(|node| node.action.is_some()).count();

        let span = tracing::info_span!("graph", %key);
        span.pb_set_style(&crate::utils::PROGRESS_STYLE);
        span.pb_set_length(computed as u64);
        span.pb_set_message(&format!("Producing {key}"));

        {
            let _enter = span.enter();
            tracing::info!(nodes = self.nodes.len(), "running graph");

            let scheduler = Arc::new(Scheduler {
                pool: self.pool.clone(),
                span: span.clone(),
            });
            scheduler.schedule(&self.root);
        }

        self.root.value.on_settled(move |outcome| match outcome {
            Ok(_) => tracing::info!(parent: &span, %key, "graph settled"),
            Err(err) => tracing::info!(parent: &span, %key, error = %err, "graph failed"),
        });

        self.root
            .value
            .map(move |value| downcast::<T>(&Ok(value), &key))
    }
}

/// Drives nodes through the worker pool.
struct Scheduler {
    pool: Arc<dyn WorkerPool>,
    span: Span,
}

impl Scheduler {
    /// Wires `node` and everything below it, leaves first.
    fn schedule(self: &Arc<Self>, node: &Arc<Node>) {
        if !node.mark_scheduled() || node.action.is_none() {
            return;
        }

        for dependency in &node.dependencies {
            self.schedule(dependency);
        }

        for dependency in &node.dependencies {
            let scheduler = self.clone();
            let node = node.clone();
            dependency
                .value
                .on_settled(move |_| scheduler.dependency_settled(&node));
        }

        let span = self.span.clone();
        node.value.on_settled(move |_| span.pb_inc(1));

        // Covers nodes without dependencies, and dependencies that settled
        // before their listeners were attached.
        self.dependency_settled(node);
    }

    /// Submits the node once every dependency has settled.
    fn dependency_settled(&self, node: &Arc<Node>) {
        let Some(outcomes) = node
            .dependencies
            .iter()
            .map(|dependency| dependency.value.outcome())
            .collect::<Option<Vec<_>>>()
        else {
            return;
        };

        // Several dependencies can settle at once, only one caller may submit.
        if !node.claim() {
            return;
        }

        tracing::debug!(key = %node.key, producer = %node.label(), "claimed node");

        let node = node.clone();
        let span = self.span.clone();
        self.pool.submit(Box::new(move || {
            let _enter = span.enter();
            node.execute(outcomes);
        }));
    }
}
