use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use thiserror::Error;

use crate::key::BindingKey;

/// A terminal error stored in a result slot.
///
/// Failures are shared between every consumer of a node, so the underlying
/// [`anyhow::Error`] lives behind an `Arc` and cloning is cheap. Each hop
/// through the graph adds context naming the producer and key that failed,
/// the original error remains available as the [`root_cause`](Self::root_cause).
#[derive(Clone)]
pub struct Failure(Arc<anyhow::Error>);

impl Failure {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    /// The innermost error in the cause chain.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        self.0.root_cause()
    }

    /// Iterates the cause chain, outermost context first.
    pub fn chain(&self) -> anyhow::Chain<'_> {
        self.0.chain()
    }

    /// Attempts to find an error of type `E` anywhere in the cause chain.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: Display + Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Finds an error of type `E` in the chain, looking through the failures
    /// of upstream nodes as well.
    pub fn find<E>(&self) -> Option<&E>
    where
        E: StdError + Send + Sync + 'static,
    {
        if let Some(found) = self.0.downcast_ref::<E>() {
            return Some(found);
        }

        self.chain().find_map(|err| {
            err.downcast_ref::<E>().or_else(|| {
                err.downcast_ref::<Failure>()
                    .and_then(|nested| nested.find::<E>())
            })
        })
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&*self.0, f)
    }
}

impl Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&*self.0, f)
    }
}

impl StdError for Failure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// Raised while the producer registry is being built.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Already have producer '{existing}' for key {key}. Cannot add new producer '{added}'")]
    Duplicate {
        key: BindingKey,
        existing: String,
        added: String,
    },

    #[error("Producer '{0}' can only have one qualifier")]
    QualifierConflict(String),
}

/// Raised while a graph is being resolved from the registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("No producer available for key {0}")]
    NoProducer(BindingKey),

    #[error("Key {0} depends on itself")]
    Cycle(BindingKey),
}

/// Raised when binding explicit inputs or running a graph with missing ones.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("Attempted to bind unexpected input for key: {0}")]
    Unexpected(BindingKey),

    #[error("Attempted to bind already-bound input for key: {0}")]
    AlreadyBound(BindingKey),

    #[error("Missing input for keys: {}", format_keys(.0))]
    Missing(Vec<BindingKey>),
}

impl InputError {
    /// Whether this is an InvalidInput error raised by `add_input`.
    pub fn is_invalid(&self) -> bool {
        matches!(self, InputError::Unexpected(_) | InputError::AlreadyBound(_))
    }
}

fn format_keys(keys: &[BindingKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
