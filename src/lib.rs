#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod context;
mod engine;
mod error;
mod graph;
mod key;
mod plan;
mod pool;
mod present;
mod promise;
mod registry;
mod resolver;
mod utils;

pub use crate::context::Context;
pub use crate::engine::{Collection, Dependencies, Dependency, Produced};
pub use crate::error::{Failure, InputError, RegistrationError, ResolutionError};
pub use crate::graph::Graph;
pub use crate::key::{BindingKey, Key, Qualifier};
pub use crate::plan::{NodeKind, Plan, PlanNode};
pub use crate::pool::{DirectPool, Job, WorkerPool};
pub use crate::present::Present;
pub use crate::promise::{Completer, Outcome, Promise};
pub use crate::registry::{ElementDef, ProducerDef, Registry, RegistryBuilder};

#[cfg(feature = "rayon")]
pub use crate::pool::{RayonPool, RayonPoolBuilder};

#[cfg(feature = "tokio")]
pub use crate::pool::TokioPool;

#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
