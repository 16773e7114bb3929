use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::engine::Node;
use crate::error::ResolutionError;
use crate::key::BindingKey;
use crate::registry::{Element, Registry};

/// Memoization slot. Element producers all share the element key, so they are
/// told apart by their registration id instead.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Key(BindingKey),
    Element(usize),
}

/// The wired, unstarted node set for one target key.
pub(crate) struct Resolution {
    pub root: Arc<Node>,
    /// Every node, dependencies before their dependents.
    pub nodes: Vec<Arc<Node>>,
    /// Constant nodes waiting for a value from the caller.
    pub inputs: HashMap<BindingKey, Arc<Node>>,
}

/// Builds the minimal node set needed to produce a key.
///
/// Each slot maps to exactly one node, so a key requested by several
/// dependents is produced once and shared.
pub(crate) struct Resolver<'r> {
    registry: &'r Registry,
    memo: HashMap<Slot, Arc<Node>>,
    resolving: HashSet<Slot>,
    nodes: Vec<Arc<Node>>,
    inputs: HashMap<BindingKey, Arc<Node>>,
}

impl<'r> Resolver<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            memo: HashMap::new(),
            resolving: HashSet::new(),
            nodes: Vec::new(),
            inputs: HashMap::new(),
        }
    }

    pub fn resolve(mut self, key: BindingKey) -> Result<Resolution, ResolutionError> {
        if !self.registry.can_produce(&key) {
            return Err(ResolutionError::NoProducer(key));
        }

        let root = self.node(key)?;

        tracing::debug!(
            %key,
            nodes = self.nodes.len(),
            inputs = self.inputs.len(),
            "resolved graph"
        );

        Ok(Resolution {
            root,
            nodes: self.nodes,
            inputs: self.inputs,
        })
    }

    fn node(&mut self, key: BindingKey) -> Result<Arc<Node>, ResolutionError> {
        let slot = Slot::Key(key);
        if let Some(node) = self.memo.get(&slot) {
            return Ok(node.clone());
        }

        if !self.resolving.insert(slot) {
            return Err(ResolutionError::Cycle(key));
        }

        let registry = self.registry;

        let node = if let Some(producer) = registry.producer(&key) {
            let dependencies = producer
                .dependencies()
                .into_iter()
                .map(|dependency| self.node(dependency))
                .collect::<Result<Vec<_>, _>>()?;

            Node::computed(key, producer.clone(), dependencies)
        } else if let Some(collected) = registry
            .collection(&key)
            .filter(|collected| !collected.elements.is_empty())
        {
            let dependencies = collected
                .elements
                .iter()
                .map(|element| self.element(collected.element, element))
                .collect::<Result<Vec<_>, _>>()?;

            Node::assembly(key, collected.assembler.clone(), dependencies)
        } else {
            Node::constant(key)
        };

        let node = Arc::new(node);
        if node.action.is_none() {
            self.inputs.insert(key, node.clone());
        }

        Ok(self.remember(slot, node))
    }

    fn element(
        &mut self,
        key: BindingKey,
        element: &Element,
    ) -> Result<Arc<Node>, ResolutionError> {
        let slot = Slot::Element(element.id);
        if let Some(node) = self.memo.get(&slot) {
            return Ok(node.clone());
        }

        if !self.resolving.insert(slot) {
            return Err(ResolutionError::Cycle(key));
        }

        let dependencies = element
            .producer
            .dependencies()
            .into_iter()
            .map(|dependency| self.node(dependency))
            .collect::<Result<Vec<_>, _>>()?;

        let node = Node::computed(key, element.producer.clone(), dependencies);
        Ok(self.remember(slot, Arc::new(node)))
    }

    fn remember(&mut self, slot: Slot, node: Arc<Node>) -> Arc<Node> {
        self.resolving.remove(&slot);
        self.memo.insert(slot, node.clone());
        self.nodes.push(node.clone());
        node
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;
    use crate::key::Key;
    use crate::present::Present;

    #[test]
    fn test_diamond_shares_one_node() {
        let mut builder = Registry::builder();
        let number = builder.producer().run(|()| Ok(21_i32)).unwrap();
        let left = builder
            .producer()
            .qualified("left")
            .depends_on(number)
            .run(|n: Present<i32>| Ok(*n.get()? as i64))
            .unwrap();
        let right = builder
            .producer()
            .qualified("right")
            .depends_on(number)
            .run(|n: Present<i32>| Ok(*n.get()? as i64))
            .unwrap();
        let sum = builder
            .producer()
            .depends_on((left, right))
            .run(|(l, r): (Present<i64>, Present<i64>)| Ok(l.get()? + r.get()?))
            .unwrap();
        let registry = builder.build();

        let resolution = Resolver::new(&registry).resolve(sum.erased()).unwrap();
        assert_eq!(resolution.nodes.len(), 4);
        assert!(resolution.inputs.is_empty());

        let (l, r) = (&resolution.root.dependencies[0], &resolution.root.dependencies[1]);
        assert!(Arc::ptr_eq(&l.dependencies[0], &r.dependencies[0]));
    }

    #[test]
    fn test_unproducible_dependency_becomes_input() {
        let mut builder = Registry::builder();
        let key = builder
            .producer()
            .depends_on(Key::<f64>::qualified("Baz"))
            .run(|baz: Present<f64>| Ok(format!("{}", baz.get()?)))
            .unwrap();
        let registry = builder.build();

        let resolution = Resolver::new(&registry).resolve(key.erased()).unwrap();
        assert_eq!(resolution.inputs.len(), 1);
        assert!(resolution.inputs.contains_key(&Key::<f64>::qualified("Baz").erased()));
    }

    #[test]
    fn test_collection_without_elements_is_input() {
        let mut builder = Registry::builder();
        let key = builder
            .producer()
            .depends_on(Key::<Vec<String>>::new())
            .run(|list: Present<Vec<String>>| Ok(list.get()?.len()))
            .unwrap();
        let registry = builder.build();

        let resolution = Resolver::new(&registry).resolve(key.erased()).unwrap();
        assert!(resolution.inputs.contains_key(&Key::<Vec<String>>::new().erased()));
    }

    #[test]
    fn test_elements_get_their_own_nodes() {
        let mut builder = Registry::builder();
        for value in ["foo", "bar", "foo"] {
            builder
                .producer()
                .collect_into::<HashSet<String>>()
                .run(move |()| Ok(value.to_string()))
                .unwrap();
        }
        let registry = builder.build();

        let resolution = Resolver::new(&registry)
            .resolve(Key::<HashSet<String>>::new().erased())
            .unwrap();

        assert_eq!(resolution.root.dependencies.len(), 3);
        assert_eq!(resolution.nodes.len(), 4);
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut builder = Registry::builder();
        let ping = builder
            .producer()
            .depends_on(Key::<u16>::new())
            .run(|_: Present<u16>| Ok(1_u8))
            .unwrap();
        builder
            .producer()
            .depends_on(ping)
            .run(|_: Present<u8>| Ok(2_u16))
            .unwrap();
        let registry = builder.build();

        let err = Resolver::new(&registry).resolve(ping.erased()).err().unwrap();
        assert_eq!(err, ResolutionError::Cycle(ping.erased()));
    }

    #[test]
    fn test_unknown_root() {
        let registry = Registry::builder().build();
        let key = Key::<String>::new().erased();

        let err = Resolver::new(&registry).resolve(key).err().unwrap();
        assert_eq!(err, ResolutionError::NoProducer(key));
    }
}
