use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::{Assembler, Erased, ErasedOutput, Producer};
use crate::error::Failure;
use crate::key::BindingKey;
use crate::promise::{Outcome, Promise};

/// What a node runs once all of its dependencies have settled.
#[derive(Clone)]
pub(crate) enum Action {
    Produce(Arc<dyn Producer>),
    Assemble(Arc<dyn Assembler>),
}

/// Holds the execution state of a single producer in a specific graph
/// execution.
///
/// A node without an action is a constant: its value is bound from the
/// outside before the graph runs. Nodes are owned by exactly one graph.
pub(crate) struct Node {
    pub key: BindingKey,
    pub dependencies: Vec<Arc<Node>>,
    pub action: Option<Action>,
    /// Settles exactly once, with either a value or a failure.
    pub value: Promise<Erased>,
    /// Set once the node's dependency listeners have been wired.
    scheduled: AtomicBool,
    /// Set by whoever first observes every dependency settled, and thereby
    /// wins the right to submit the action.
    claimed: AtomicBool,
}

impl Node {
    fn new(key: BindingKey, action: Option<Action>, dependencies: Vec<Arc<Node>>) -> Self {
        Self {
            key,
            dependencies,
            action,
            value: Promise::pending(),
            scheduled: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
        }
    }

    pub fn constant(key: BindingKey) -> Self {
        Self::new(key, None, vec![])
    }

    pub fn computed(
        key: BindingKey,
        producer: Arc<dyn Producer>,
        dependencies: Vec<Arc<Node>>,
    ) -> Self {
        Self::new(key, Some(Action::Produce(producer)), dependencies)
    }

    pub fn assembly(
        key: BindingKey,
        assembler: Arc<dyn Assembler>,
        dependencies: Vec<Arc<Node>>,
    ) -> Self {
        Self::new(key, Some(Action::Assemble(assembler)), dependencies)
    }

    pub fn is_done(&self) -> bool {
        self.value.is_done()
    }

    /// A short human readable description of what the node runs.
    pub fn label(&self) -> String {
        match &self.action {
            None => "input".to_string(),
            Some(Action::Produce(producer)) => producer.name().to_string(),
            Some(Action::Assemble(assembler)) => {
                format!("collect {}", assembler.output_type_name())
            }
        }
    }

    /// Type name of the value the node settles with.
    pub fn output_type_name(&self) -> &'static str {
        match &self.action {
            None => self.key.type_name(),
            Some(Action::Produce(producer)) => producer.output_type_name(),
            Some(Action::Assemble(assembler)) => assembler.output_type_name(),
        }
    }

    /// Returns `true` only for the first caller.
    pub fn mark_scheduled(&self) -> bool {
        !self.scheduled.swap(true, Ordering::AcqRel)
    }

    /// Returns `true` only for the first caller.
    pub fn claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Settles the node. Repeated settlement is ignored and returns `false`.
    pub fn accept(&self, outcome: Outcome<Erased>) -> bool {
        let failure = outcome.as_ref().err().cloned();
        if !self.value.settle(outcome) {
            return false;
        }

        match failure {
            None => tracing::debug!(key = %self.key, "node settled"),
            Some(err) => tracing::debug!(key = %self.key, error = %err, "node failed"),
        }
        true
    }

    fn failure(&self, err: anyhow::Error) -> Failure {
        Failure::new(err.context(format!(
            "Unable to execute producer '{}' for key {}",
            self.label(),
            self.key
        )))
    }

    /// Runs the action with the outcomes of the dependencies, in declared
    /// order, and settles the node with the result.
    pub fn execute(self: Arc<Self>, outcomes: Vec<Outcome<Erased>>) {
        let Some(action) = self.action.clone() else {
            return;
        };

        let span = tracing::debug_span!("node", key = %self.key, producer = %self.label());
        let _enter = span.enter();

        match action {
            Action::Produce(producer) => {
                // Producers are user code, a panic must not take the worker
                // down without settling the node.
                let result = panic::catch_unwind(AssertUnwindSafe(|| producer.invoke(&outcomes)));

                match result {
                    Ok(Ok(ErasedOutput::Ready(value))) => {
                        self.accept(Ok(value));
                    }
                    Ok(Ok(ErasedOutput::Deferred(promise))) => {
                        tracing::debug!(key = %self.key, "waiting for deferred value");
                        let node = self.clone();
                        promise.on_settled(move |outcome| {
                            let outcome = match outcome {
                                Ok(value) => Ok(value.clone()),
                                Err(err) => Err(node.failure(anyhow::Error::new(err.clone()))),
                            };
                            node.accept(outcome);
                        });
                    }
                    Ok(Err(err)) => {
                        self.accept(Err(self.failure(err)));
                    }
                    Err(panic) => {
                        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            format!("Producer panicked: {s}")
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            format!("Producer panicked: {s}")
                        } else {
                            String::from("Producer panicked with unknown payload")
                        };

                        self.accept(Err(self.failure(anyhow::anyhow!(msg))));
                    }
                }
            }
            Action::Assemble(assembler) => {
                let outcome = assembler
                    .assemble(&self.key, &outcomes)
                    .map_err(|err| self.failure(anyhow::Error::new(err)));
                self.accept(outcome);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::marker::PhantomData;

    use super::*;
    use crate::engine::{CollectInto, Dynamic, Produced, ProducerFn};
    use crate::key::Key;

    fn producer<R, F>(name: &'static str, callback: F) -> Arc<dyn Producer>
    where
        R: Send + Sync + 'static,
        F: Fn(()) -> anyhow::Result<Produced<R>> + Send + Sync + 'static,
    {
        Arc::new(ProducerFn {
            name: name.into(),
            dependencies: (),
            callback,
            _phantom: PhantomData::<fn() -> R>,
        })
    }

    #[test]
    fn test_claim_only_once() {
        let node = Node::constant(Key::<i32>::new().erased());
        assert!(node.claim());
        assert!(!node.claim());
        assert!(node.mark_scheduled());
        assert!(!node.mark_scheduled());
    }

    #[test]
    fn test_second_accept_keeps_first_value() {
        let node = Node::constant(Key::<i32>::new().erased());

        assert!(node.accept(Ok(Arc::new(1_i32) as Dynamic)));
        assert!(!node.accept(Ok(Arc::new(2_i32) as Dynamic)));
        assert!(!node.accept(Err(Failure::new(anyhow::anyhow!("late")))));

        let value = node.value.wait().unwrap();
        assert_eq!(value.downcast_ref::<i32>(), Some(&1));
    }

    #[test]
    fn test_output_type_name() {
        let constant = Node::constant(Key::<f64>::new().erased());
        assert_eq!(constant.output_type_name(), std::any::type_name::<f64>());

        let computed = Node::computed(
            Key::<i32>::new().erased(),
            producer("someNumber", |()| Ok(Produced::Ready(42_i32))),
            vec![],
        );
        assert_eq!(computed.output_type_name(), std::any::type_name::<i32>());

        let assembly = Node::assembly(
            Key::<Vec<String>>::new().erased(),
            Arc::new(CollectInto::<Vec<String>>::new()),
            vec![],
        );
        assert_eq!(assembly.output_type_name(), std::any::type_name::<Vec<String>>());
    }

    #[test]
    fn test_execute_ready() {
        let key = Key::<i32>::new().erased();
        let node = Arc::new(Node::computed(
            key,
            producer("someNumber", |()| Ok(Produced::Ready(42_i32))),
            vec![],
        ));

        node.clone().execute(vec![]);
        let value = node.value.wait().unwrap();
        assert_eq!(value.downcast_ref::<i32>(), Some(&42));
    }

    #[test]
    fn test_execute_error_names_producer() {
        let key = Key::<i32>::new().erased();
        let node = Arc::new(Node::computed(
            key,
            producer("produceInt", |()| -> anyhow::Result<Produced<i32>> {
                anyhow::bail!("this is an expected exception")
            }),
            vec![],
        ));

        node.clone().execute(vec![]);
        let err = node.value.wait().unwrap_err();
        assert!(err.to_string().contains("produceInt"));
        assert_eq!(err.root_cause().to_string(), "this is an expected exception");
    }

    #[test]
    fn test_execute_catches_panic() {
        let key = Key::<u8>::new().erased();
        let node = Arc::new(Node::computed(
            key,
            producer("explode", |()| -> anyhow::Result<Produced<u8>> { panic!("kaboom") }),
            vec![],
        ));

        node.clone().execute(vec![]);
        let err = node.value.wait().unwrap_err();
        assert_eq!(err.root_cause().to_string(), "Producer panicked: kaboom");
    }

    #[test]
    fn test_execute_deferred_forwards() {
        let key = Key::<u64>::new().erased();
        let (promise, completer) = Promise::<u64>::channel();
        let promise = std::sync::Mutex::new(Some(promise));
        let node = Arc::new(Node::computed(
            key,
            producer("produceLong", move |()| {
                let promise = promise.lock().unwrap().take().unwrap();
                Ok(Produced::Deferred(promise))
            }),
            vec![],
        ));

        node.clone().execute(vec![]);
        assert!(!node.is_done());

        completer.succeed(1234);
        let value = node.value.wait().unwrap();
        assert_eq!(value.downcast_ref::<u64>(), Some(&1234));
    }

    #[test]
    fn test_assembly_failure_is_atomic() {
        let key = Key::<Vec<String>>::new().erased();
        let node = Arc::new(Node::assembly(
            key,
            Arc::new(CollectInto::<Vec<String>>::new()),
            vec![],
        ));

        let ok: Outcome<Erased> = Ok(Arc::new("foo".to_string()) as Dynamic);
        let failed = Err(Failure::new(anyhow::anyhow!("element failed")));
        node.clone().execute(vec![ok, failed]);

        let err = node.value.wait().unwrap_err();
        assert_eq!(err.root_cause().to_string(), "element failed");
    }
}
