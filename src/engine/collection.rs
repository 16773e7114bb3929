use std::any::type_name;
use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::engine::{Dynamic, Erased, downcast};
use crate::error::Failure;
use crate::key::BindingKey;
use crate::promise::Outcome;

/// A collection that can be assembled from values contributed by several
/// element producers.
///
/// Element values are shared between consumers, so they are cloned into the
/// assembled collection. Duplicates follow the semantics of the collection:
/// a `Vec` keeps them, a set collapses them.
pub trait Collection: FromIterator<Self::Item> + Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;
}

impl<T> Collection for Vec<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Item = T;
}

impl<T> Collection for HashSet<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    type Item = T;
}

impl<T> Collection for BTreeSet<T>
where
    T: Clone + Ord + Send + Sync + 'static,
{
    type Item = T;
}

/// The action of a collection-assembly node.
pub(crate) trait Assembler: Send + Sync {
    fn output_type_name(&self) -> &'static str;

    /// Builds the collection from the outcomes of every contributing element
    /// producer. The first failure found fails the whole assembly.
    fn assemble(&self, key: &BindingKey, outcomes: &[Outcome<Erased>]) -> Outcome<Erased>;
}

pub(crate) struct CollectInto<C>(PhantomData<fn() -> C>);

impl<C> CollectInto<C> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

impl<C> Assembler for CollectInto<C>
where
    C: Collection,
{
    fn output_type_name(&self) -> &'static str {
        type_name::<C>()
    }

    fn assemble(&self, key: &BindingKey, outcomes: &[Outcome<Erased>]) -> Outcome<Erased> {
        let items = outcomes
            .iter()
            .map(|outcome| downcast::<C::Item>(outcome, key).map(|item| (*item).clone()))
            .collect::<Result<C, Failure>>()?;

        Ok(Arc::new(items) as Dynamic)
    }
}
