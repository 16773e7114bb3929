use std::any::type_name;
use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::engine::{Dependencies, Dynamic, Erased, Produced};
use crate::key::BindingKey;
use crate::promise::{Outcome, Promise};

/// The output of an erased producer.
pub(crate) enum ErasedOutput {
    Ready(Dynamic),
    Deferred(Promise<Erased>),
}

pub(crate) trait TypedProducer: Send + Sync {
    /// The concrete output type of this producer.
    type Output: Send + Sync + 'static;

    fn name(&self) -> &str;

    fn dependencies(&self) -> Vec<BindingKey>;

    fn invoke(&self, outcomes: &[Outcome<Erased>]) -> anyhow::Result<Produced<Self::Output>>;
}

/// The type-erased producer held by the registry and by computed nodes.
pub(crate) trait Producer: Send + Sync {
    fn name(&self) -> &str;

    fn output_type_name(&self) -> &'static str;

    fn dependencies(&self) -> Vec<BindingKey>;

    fn invoke(&self, outcomes: &[Outcome<Erased>]) -> anyhow::Result<ErasedOutput>;
}

// A blanket implementation to automatically bridge the two. This is where the
// type erasure actually happens.
impl<T> Producer for T
where
    T: TypedProducer + 'static,
{
    fn name(&self) -> &str {
        T::name(self)
    }

    fn output_type_name(&self) -> &'static str {
        type_name::<T::Output>()
    }

    fn dependencies(&self) -> Vec<BindingKey> {
        T::dependencies(self)
    }

    fn invoke(&self, outcomes: &[Outcome<Erased>]) -> anyhow::Result<ErasedOutput> {
        let output = match T::invoke(self, outcomes)? {
            Produced::Ready(value) => ErasedOutput::Ready(Arc::new(value)),
            Produced::Deferred(promise) => {
                ErasedOutput::Deferred(promise.map(|value| Ok(value as Dynamic)))
            }
        };
        Ok(output)
    }
}

/// A producer backed by a closure over typed presents.
pub(crate) struct ProducerFn<R, D, F>
where
    R: Send + Sync + 'static,
    D: Dependencies,
    F: Fn(D::Presents) -> anyhow::Result<Produced<R>> + Send + Sync,
{
    pub name: Cow<'static, str>,
    pub dependencies: D,
    pub callback: F,
    pub _phantom: PhantomData<fn() -> R>,
}

impl<R, D, F> TypedProducer for ProducerFn<R, D, F>
where
    R: Send + Sync + 'static,
    D: Dependencies,
    F: Fn(D::Presents) -> anyhow::Result<Produced<R>> + Send + Sync + 'static,
{
    type Output = R;

    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<BindingKey> {
        self.dependencies.keys()
    }

    fn invoke(&self, outcomes: &[Outcome<Erased>]) -> anyhow::Result<Produced<R>> {
        let presents = self.dependencies.resolve(outcomes);
        (self.callback)(presents)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::Key;
    use crate::present::Present;

    #[test]
    fn test_erases_ready_value() {
        let producer = ProducerFn {
            name: "produceBar".into(),
            dependencies: Key::<String>::qualified("Foo"),
            callback: |foo: Present<String>| -> anyhow::Result<Produced<String>> {
                Ok(Produced::Ready(format!("bar[{}]", foo.get()?)))
            },
            _phantom: PhantomData::<fn() -> String>,
        };

        assert_eq!(Producer::name(&producer), "produceBar");
        assert_eq!(producer.output_type_name(), type_name::<String>());
        assert_eq!(
            Producer::dependencies(&producer),
            vec![Key::<String>::qualified("Foo").erased()]
        );

        let input: Outcome<Erased> = Ok(Arc::new("foo".to_string()));
        let ErasedOutput::Ready(value) = Producer::invoke(&producer, &[input]).unwrap() else {
            panic!("expected a ready value");
        };
        assert_eq!(value.downcast_ref::<String>().unwrap(), "bar[foo]");
    }

    #[test]
    fn test_erases_deferred_value() {
        let producer = ProducerFn {
            name: "produceLong".into(),
            dependencies: (),
            callback: |(): ()| -> anyhow::Result<Produced<i64>> {
                Ok(Produced::Deferred(Promise::ready(1234)))
            },
            _phantom: PhantomData::<fn() -> i64>,
        };

        let ErasedOutput::Deferred(promise) = Producer::invoke(&producer, &[]).unwrap() else {
            panic!("expected a deferred value");
        };
        let value = promise.wait().unwrap();
        assert_eq!(value.downcast_ref::<i64>(), Some(&1234));
    }
}
