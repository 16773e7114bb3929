use std::any::type_name;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::engine::{Assembler, CollectInto, Collection, Dependencies, Produced, Producer, ProducerFn};
use crate::error::RegistrationError;
use crate::key::{BindingKey, Key, Qualifier};

/// A producer contributing one element into a collection.
#[derive(Clone)]
pub(crate) struct Element {
    /// Identifies the element producer, since every contributor to a
    /// collection shares the same element key.
    pub id: usize,
    pub producer: Arc<dyn Producer>,
}

/// How to assemble a collection key, and the element producers declared
/// with `collect_into` for exactly that collection.
#[derive(Clone)]
pub(crate) struct Collected {
    pub element: BindingKey,
    pub assembler: Arc<dyn Assembler>,
    pub elements: Vec<Element>,
}

/// The immutable set of producer definitions a [`Context`](crate::Context)
/// builds graphs from.
///
/// A registry maps every output key to at most one producer, and every
/// collection key to the producers contributing elements into it. A
/// contributor feeds only the collection type it was registered for. It is assembled with a [`RegistryBuilder`] and never changes
/// afterwards, so it can be shared by any number of graphs.
pub struct Registry {
    producers: HashMap<BindingKey, Arc<dyn Producer>>,
    collections: HashMap<BindingKey, Collected>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub(crate) fn producer(&self, key: &BindingKey) -> Option<&Arc<dyn Producer>> {
        self.producers.get(key)
    }

    pub(crate) fn collection(&self, key: &BindingKey) -> Option<&Collected> {
        self.collections.get(key)
    }

    /// Returns the set of keys with a producer of their own.
    pub fn available_keys(&self) -> Vec<BindingKey> {
        self.producers.keys().copied().collect()
    }

    /// Returns the collection keys that can be assembled from element
    /// producers.
    pub fn collection_keys(&self) -> Vec<BindingKey> {
        self.collections.keys().copied().collect()
    }

    /// Returns the number of producers contributing into the collection
    /// `key`, or zero if `key` is not an assembled collection.
    pub fn element_producers(&self, key: impl Into<BindingKey>) -> usize {
        self.collections
            .get(&key.into())
            .map(|collected| collected.elements.len())
            .unwrap_or(0)
    }

    /// Returns the name of the producer for `key`, if there is one.
    pub fn producer_name(&self, key: impl Into<BindingKey>) -> Option<&str> {
        self.producers.get(&key.into()).map(|producer| producer.name())
    }

    /// Returns whether a graph can be built for `key`.
    pub fn can_produce(&self, key: &BindingKey) -> bool {
        self.producers.contains_key(key)
            || self
                .collections
                .get(key)
                .is_some_and(|collected| !collected.elements.is_empty())
    }
}

impl Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines: Vec<_> = self
            .producers
            .iter()
            .map(|(key, producer)| format!("{key} <- {}", producer.name()))
            .chain(self.collections.iter().map(|(key, collected)| {
                format!("{key} <- {} element producers", collected.elements.len())
            }))
            .collect();
        lines.sort();

        for line in lines {
            writeln!(f, "{line}")?;
        }

        Ok(())
    }
}

/// Collects producer definitions into a [`Registry`].
///
/// # Example
///
/// ```rust
/// use seisan::{Key, Present, Registry};
///
/// let mut builder = Registry::builder();
/// builder
///     .producer()
///     .name("someNumber")
///     .run(|()| Ok(42))
///     .unwrap();
/// builder
///     .producer()
///     .name("someString")
///     .depends_on(Key::<i32>::new())
///     .run(|number: Present<i32>| Ok(format!("The number was: {}", number.get()?)))
///     .unwrap();
///
/// let registry = builder.build();
/// assert_eq!(registry.available_keys().len(), 2);
/// ```
#[derive(Default)]
pub struct RegistryBuilder {
    producers: HashMap<BindingKey, Arc<dyn Producer>>,
    collections: HashMap<BindingKey, Collected>,
    next_element: usize,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> Registry {
        Registry {
            producers: self.producers,
            collections: self.collections,
        }
    }

    /// The entry point for defining a producer.
    pub fn producer(&mut self) -> ProducerDef<'_> {
        ProducerDef {
            builder: self,
            name: None,
            qualifier: None,
            conflict: false,
            dependencies: (),
        }
    }

    fn add_producer(
        &mut self,
        key: BindingKey,
        producer: Arc<dyn Producer>,
    ) -> Result<(), RegistrationError> {
        if let Some(existing) = self.producers.get(&key) {
            return Err(RegistrationError::Duplicate {
                key,
                existing: existing.name().to_string(),
                added: producer.name().to_string(),
            });
        }

        tracing::debug!(%key, producer = producer.name(), "registered producer");
        self.producers.insert(key, producer);
        Ok(())
    }

    fn add_element(
        &mut self,
        element: BindingKey,
        collection: BindingKey,
        assembler: Arc<dyn Assembler>,
        producer: Arc<dyn Producer>,
    ) {
        tracing::debug!(%element, %collection, producer = producer.name(), "registered element producer");

        let id = self.next_element;
        self.next_element += 1;

        self.collections
            .entry(collection)
            .or_insert_with(|| Collected {
                element,
                assembler,
                elements: Vec::new(),
            })
            .elements
            .push(Element { id, producer });
    }
}

/// A producer definition in progress.
pub struct ProducerDef<'a, D = ()> {
    builder: &'a mut RegistryBuilder,
    name: Option<Cow<'static, str>>,
    qualifier: Option<Qualifier>,
    conflict: bool,
    dependencies: D,
}

impl<'a, D> ProducerDef<'a, D>
where
    D: Dependencies,
{
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Qualifies the produced key. A producer has at most one qualifier.
    pub fn qualified(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.conflict |= self.qualifier.is_some();
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Qualifies the produced key with the marker type `M`.
    pub fn marked<M: 'static>(self) -> Self {
        self.qualified(Qualifier::of::<M>())
    }

    /// Declares the keys this producer consumes, in the order the callback
    /// receives them.
    pub fn depends_on<D2>(self, dependencies: D2) -> ProducerDef<'a, D2>
    where
        D2: Dependencies,
    {
        ProducerDef {
            builder: self.builder,
            name: self.name,
            qualifier: self.qualifier,
            conflict: self.conflict,
            dependencies,
        }
    }

    /// Turns this definition into an element producer contributing into the
    /// collection `C`.
    pub fn collect_into<C>(self) -> ElementDef<'a, C, D>
    where
        C: Collection,
    {
        ElementDef {
            def: self,
            _phantom: PhantomData,
        }
    }

    fn finish<R, F>(self, callback: F) -> Result<Key<R>, RegistrationError>
    where
        R: Send + Sync + 'static,
        F: Fn(D::Presents) -> anyhow::Result<Produced<R>> + Send + Sync + 'static,
    {
        let name = self.name.unwrap_or(type_name::<F>().into());
        if self.conflict {
            return Err(RegistrationError::QualifierConflict(name.into_owned()));
        }

        let key = Key::<R>::with_qualifier(self.qualifier);
        let producer = ProducerFn {
            name,
            dependencies: self.dependencies,
            callback,
            _phantom: PhantomData::<fn() -> R>,
        };

        self.builder.add_producer(key.erased(), Arc::new(producer))?;
        Ok(key)
    }

    /// Registers a producer computing its value directly.
    pub fn run<F, R>(mut self, callback: F) -> Result<Key<R>, RegistrationError>
    where
        F: Fn(D::Presents) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        self.name.get_or_insert(type_name::<F>().into());
        self.finish(move |presents| callback(presents).map(Produced::Ready))
    }

    /// Registers a producer which may hand back a promise, settled later
    /// from any thread.
    pub fn run_deferred<F, R>(self, callback: F) -> Result<Key<R>, RegistrationError>
    where
        F: Fn(D::Presents) -> anyhow::Result<Produced<R>> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        self.finish(callback)
    }
}

/// An element producer definition in progress.
pub struct ElementDef<'a, C, D = ()> {
    def: ProducerDef<'a, D>,
    _phantom: PhantomData<fn() -> C>,
}

impl<'a, C, D> ElementDef<'a, C, D>
where
    C: Collection,
    D: Dependencies,
{
    /// Registers the producer. Returns the key of the assembled collection.
    pub fn run<F>(self, callback: F) -> Result<Key<C>, RegistrationError>
    where
        F: Fn(D::Presents) -> anyhow::Result<C::Item> + Send + Sync + 'static,
    {
        let def = self.def;
        let name = def.name.unwrap_or(type_name::<F>().into());
        if def.conflict {
            return Err(RegistrationError::QualifierConflict(name.into_owned()));
        }

        let element = Key::<C::Item>::with_qualifier(def.qualifier);
        let collection = Key::<C>::with_qualifier(def.qualifier);
        let producer = ProducerFn {
            name,
            dependencies: def.dependencies,
            callback: move |presents: D::Presents| callback(presents).map(Produced::Ready),
            _phantom: PhantomData::<fn() -> C::Item>,
        };

        def.builder.add_element(
            element.erased(),
            collection.erased(),
            Arc::new(CollectInto::<C>::new()),
            Arc::new(producer),
        );

        Ok(collection)
    }
}

#[cfg(test)]
mod test {
    use std::collections::{BTreeSet, HashSet};

    use super::*;
    use crate::present::Present;

    struct Foo;
    struct Bar;

    #[test]
    fn test_duplicate_producer_is_rejected() {
        let mut builder = Registry::builder();
        builder.producer().name("first").run(|()| Ok(1_i32)).unwrap();

        let err = builder
            .producer()
            .name("second")
            .run(|()| Ok(2_i32))
            .unwrap_err();

        assert_eq!(
            err,
            RegistrationError::Duplicate {
                key: Key::<i32>::new().erased(),
                existing: "first".to_string(),
                added: "second".to_string(),
            }
        );
    }

    #[test]
    fn test_qualified_producers_coexist() {
        let mut builder = Registry::builder();
        let foo = builder
            .producer()
            .marked::<Foo>()
            .run(|()| Ok("foo".to_string()))
            .unwrap();
        let bar = builder
            .producer()
            .marked::<Bar>()
            .depends_on(foo)
            .run(|foo: Present<String>| Ok(format!("bar[{}]", foo.get()?)))
            .unwrap();

        let registry = builder.build();
        assert_eq!(registry.available_keys().len(), 2);
        assert!(registry.can_produce(&foo.erased()));
        assert!(registry.can_produce(&bar.erased()));
        assert!(!registry.can_produce(&Key::<String>::new().erased()));
    }

    #[test]
    fn test_two_qualifiers_are_rejected() {
        let mut builder = Registry::builder();
        let err = builder
            .producer()
            .name("confused")
            .marked::<Foo>()
            .marked::<Bar>()
            .run(|()| Ok(0_u8))
            .unwrap_err();

        assert_eq!(err, RegistrationError::QualifierConflict("confused".into()));
    }

    #[test]
    fn test_element_producers_accumulate() {
        let mut builder = Registry::builder();
        let mut keys = vec![];
        for value in ["foo", "bar", "foo"] {
            let key = builder
                .producer()
                .collect_into::<HashSet<String>>()
                .run(move |()| Ok(value.to_string()))
                .unwrap();
            keys.push(key);
        }

        let registry = builder.build();
        assert!(keys.iter().all(|key| *key == Key::<HashSet<String>>::new()));
        assert_eq!(registry.element_producers(Key::<HashSet<String>>::new()), 3);
        assert_eq!(registry.collection_keys(), vec![Key::<HashSet<String>>::new().erased()]);
        assert!(registry.available_keys().is_empty());
    }

    #[test]
    fn test_elements_feed_only_their_collection() {
        let mut builder = Registry::builder();
        builder
            .producer()
            .collect_into::<Vec<String>>()
            .run(|()| Ok("a".to_string()))
            .unwrap();
        builder
            .producer()
            .collect_into::<HashSet<String>>()
            .run(|()| Ok("b".to_string()))
            .unwrap();

        let registry = builder.build();
        assert_eq!(registry.element_producers(Key::<Vec<String>>::new()), 1);
        assert_eq!(registry.element_producers(Key::<HashSet<String>>::new()), 1);
        assert_eq!(registry.element_producers(Key::<BTreeSet<String>>::new()), 0);
        assert!(!registry.can_produce(&Key::<BTreeSet<String>>::new().erased()));
        assert_eq!(registry.collection_keys().len(), 2);
    }

    #[test]
    fn test_default_name_is_closure_type() {
        let mut builder = Registry::builder();
        let key = builder.producer().run(|()| Ok(1.5_f64)).unwrap();
        let registry = builder.build();

        let name = registry.producer_name(key).unwrap();
        assert!(name.contains("closure"));
    }
}
