//! The type-erased machinery behind a graph.
//!
//! Under the hood every value is stored as `Arc<dyn Any + Send + Sync>` and
//! addressed by [`BindingKey`]. The typed [`Key<T>`] handles used to declare
//! dependencies bridge the gap: the [`Dependencies`] trait turns the erased
//! outcomes of a node's dependencies back into a tuple of typed
//! [`Present`]s before the producer is invoked.

mod collection;
mod node;
mod producer;

use std::any::Any;
use std::slice::Iter;
use std::sync::Arc;

use crate::error::Failure;
use crate::key::{BindingKey, Key};
use crate::present::Present;
use crate::promise::{Outcome, Promise};

pub use crate::engine::collection::Collection;
pub(crate) use crate::engine::collection::{Assembler, CollectInto};
pub(crate) use crate::engine::node::{Action, Node};
pub(crate) use crate::engine::producer::{ErasedOutput, Producer, ProducerFn};

/// A type-erased, thread-safe value.
pub(crate) type Erased = dyn Any + Send + Sync;

/// A shared type-erased value.
pub(crate) type Dynamic = Arc<Erased>;

/// What a producer hands back: a value, or a promise of one.
pub enum Produced<T> {
    /// The value is available right away.
    Ready(T),
    /// The value will be delivered later through the promise.
    Deferred(Promise<T>),
}

impl<T> From<Promise<T>> for Produced<T> {
    fn from(promise: Promise<T>) -> Self {
        Produced::Deferred(promise)
    }
}

/// Restores the typed value behind an erased outcome.
pub(crate) fn downcast<T>(outcome: &Outcome<Erased>, key: &BindingKey) -> Outcome<T>
where
    T: Send + Sync + 'static,
{
    let value = outcome.clone()?;
    value.downcast::<T>().map_err(|_| {
        Failure::new(anyhow::anyhow!(
            "Type mismatch in dependency resolution for key {key}"
        ))
    })
}

fn next_outcome(iter: &mut Iter<'_, Outcome<Erased>>) -> Outcome<Erased> {
    match iter.next() {
        Some(outcome) => outcome.clone(),
        None => Err(Failure::new(anyhow::anyhow!(
            "Dependency outcome missing for producer"
        ))),
    }
}

/// A single typed dependency.
pub trait Dependency: Copy + Send + Sync + 'static {
    type Value: Send + Sync + 'static;

    fn key(&self) -> BindingKey;

    fn present(&self, outcome: &Outcome<Erased>) -> Present<Self::Value>;
}

impl<T> Dependency for Key<T>
where
    T: Send + Sync + 'static,
{
    type Value = T;

    fn key(&self) -> BindingKey {
        self.erased()
    }

    fn present(&self, outcome: &Outcome<Erased>) -> Present<T> {
        Present::new(downcast(outcome, &self.erased()))
    }
}

/// A trait that enables a collection of [`Key<T>`]s to be used as the
/// dependencies of a producer.
///
/// It is implemented for `()`, a single key, a `Vec` of keys of one type, and
/// tuples of up to twelve keys. The producer closure receives the matching
/// shape of [`Present`]s, in declared order.
pub trait Dependencies: Send + Sync + 'static {
    /// For a tuple of `Key<T>`s this is a tuple of `Present<T>`s.
    type Presents;

    /// Returns the binding key of each dependency, in declared order.
    fn keys(&self) -> Vec<BindingKey>;

    /// Turns the erased outcomes of the dependencies into typed presents.
    fn resolve(&self, outcomes: &[Outcome<Erased>]) -> Self::Presents;
}

impl Dependencies for () {
    type Presents = ();

    fn keys(&self) -> Vec<BindingKey> {
        vec![]
    }

    fn resolve(&self, _: &[Outcome<Erased>]) -> Self::Presents {}
}

impl<D> Dependencies for D
where
    D: Dependency,
{
    type Presents = Present<D::Value>;

    fn keys(&self) -> Vec<BindingKey> {
        vec![Dependency::key(self)]
    }

    fn resolve(&self, outcomes: &[Outcome<Erased>]) -> Self::Presents {
        let mut iter = outcomes.iter();
        self.present(&next_outcome(&mut iter))
    }
}

impl<D> Dependencies for Vec<D>
where
    D: Dependency,
{
    type Presents = Vec<Present<D::Value>>;

    fn keys(&self) -> Vec<BindingKey> {
        self.iter().map(Dependency::key).collect()
    }

    fn resolve(&self, outcomes: &[Outcome<Erased>]) -> Self::Presents {
        let mut iter = outcomes.iter();
        self.iter()
            .map(|dependency| dependency.present(&next_outcome(&mut iter)))
            .collect()
    }
}

macro_rules! impl_deps {
    ($($D:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($D),*> Dependencies for ($($D,)*)
        where
            $($D: Dependency),* {
            type Presents = ($(Present<$D::Value>,)*);

            fn keys(&self) -> Vec<BindingKey> {
                let ($($D,)*) = self;
                vec![$(Dependency::key($D),)*]
            }

            fn resolve(&self, outcomes: &[Outcome<Erased>]) -> Self::Presents {
                let ($($D,)*) = self;
                let mut iter = outcomes.iter();

                ($($D.present(&next_outcome(&mut iter)),)*)
            }
        }
    };
}

impl_deps!(A);
impl_deps!(A, B);
impl_deps!(A, B, C);
impl_deps!(A, B, C, D);
impl_deps!(A, B, C, D, E);
impl_deps!(A, B, C, D, E, F);
impl_deps!(A, B, C, D, E, F, G);
impl_deps!(A, B, C, D, E, F, G, H);
impl_deps!(A, B, C, D, E, F, G, H, I);
impl_deps!(A, B, C, D, E, F, G, H, I, J);
impl_deps!(A, B, C, D, E, F, G, H, I, J, K);
impl_deps!(A, B, C, D, E, F, G, H, I, J, K, L);

#[cfg(test)]
mod test {
    use super::*;

    fn erased<T: Send + Sync + 'static>(value: T) -> Outcome<Erased> {
        Ok(Arc::new(value) as Dynamic)
    }

    #[test]
    fn test_tuple_keys_in_order() {
        let deps = (Key::<i32>::new(), Key::<String>::qualified("Bar"));
        assert_eq!(
            deps.keys(),
            vec![
                Key::<i32>::new().erased(),
                Key::<String>::qualified("Bar").erased()
            ]
        );
    }

    #[test]
    fn test_resolve_tuple() {
        let deps = (Key::<i32>::new(), Key::<String>::new());
        let (number, string) = deps.resolve(&[erased(42), erased("foo".to_string())]);
        assert_eq!(*number.get().unwrap(), 42);
        assert_eq!(string.get().unwrap(), "foo");
    }

    #[test]
    fn test_resolve_keeps_failures() {
        let deps = (Key::<i32>::new(), Key::<u8>::new());
        let failed = Err(Failure::new(anyhow::anyhow!("upstream")));
        let (number, small) = deps.resolve(&[erased(1), failed]);
        assert!(number.is_success());
        assert_eq!(small.get().unwrap_err().to_string(), "upstream");
    }

    #[test]
    fn test_type_mismatch_is_a_failure() {
        let dep = Key::<i32>::new();
        let present = dep.resolve(&[erased("not a number")]);
        assert!(present.failure().is_some());
    }

    #[test]
    fn test_vec_of_keys() {
        let deps = vec![Key::<u32>::qualified("a"), Key::<u32>::qualified("b")];
        let presents = deps.resolve(&[erased(1u32), erased(2u32)]);
        let values: Vec<u32> = presents.iter().map(|p| *p.get().unwrap()).collect();
        assert_eq!(values, vec![1, 2]);
    }
}
