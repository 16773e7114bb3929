//! Binding keys, the sole addressing mechanism for values in a graph.
//!
//! A value is identified by its type and an optional [`Qualifier`]. Two
//! producers may emit the same type as long as they are qualified
//! differently, e.g. `@Foo String` and `@Bar String`.
//!
//! ## Phantom keys
//!
//! The graph itself is type-erased and addresses everything by
//! [`BindingKey`]. The public API uses [`Key<T>`] instead, which carries no
//! data beyond the erased key but holds `T` in `PhantomData`, so the compiler
//! checks that a producer declaring a dependency on `Key<A>` receives an `A`.

use std::any::{TypeId, type_name};
use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// An opaque tag used to tell apart several producers of the same type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// A tag identified by a static name.
    Named(&'static str),
    /// A tag identified by a marker type, e.g. `struct Foo;`.
    Marker(TypeId, &'static str),
}

impl Qualifier {
    pub const fn named(name: &'static str) -> Self {
        Self::Named(name)
    }

    /// Creates a qualifier from a marker type.
    pub fn of<M: 'static>() -> Self {
        let name = type_name::<M>();
        let name = name.rsplit("::").next().unwrap_or(name);
        Self::Marker(TypeId::of::<M>(), name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Qualifier::Named(name) => name,
            Qualifier::Marker(_, name) => name,
        }
    }
}

impl Debug for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name())
    }
}

impl Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name())
    }
}

impl From<&'static str> for Qualifier {
    fn from(name: &'static str) -> Self {
        Qualifier::Named(name)
    }
}

/// The type-erased identity of a producible value.
#[derive(Clone, Copy)]
pub struct BindingKey {
    type_id: TypeId,
    type_name: &'static str,
    qualifier: Option<Qualifier>,
}

impl BindingKey {
    pub fn of<T: ?Sized + 'static>(qualifier: Option<Qualifier>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            qualifier,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn qualifier(&self) -> Option<Qualifier> {
        self.qualifier
    }
}

impl PartialEq for BindingKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.qualifier == other.qualifier
    }
}

impl Eq for BindingKey {}

impl Hash for BindingKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.qualifier.hash(state);
    }
}

impl Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.qualifier {
            Some(qualifier) => write!(f, "{} {}", qualifier, self.type_name),
            None => f.write_str(self.type_name),
        }
    }
}

impl Debug for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

/// A type-safe binding key for values of type `T`.
///
/// `Key<T>` is a lightweight, copyable token. It is used both to declare the
/// dependencies of a producer and to ask a [`Context`](crate::Context) for a
/// graph producing `T`. Keys can be created anywhere, no registration is
/// required: a key nothing produces becomes an explicit input of the graph.
pub struct Key<T: ?Sized> {
    qualifier: Option<Qualifier>,
    _phantom: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized + 'static> Key<T> {
    /// The unqualified key for `T`.
    pub const fn new() -> Self {
        Self {
            qualifier: None,
            _phantom: PhantomData,
        }
    }

    /// The key for `T` qualified with `qualifier`.
    pub fn qualified(qualifier: impl Into<Qualifier>) -> Self {
        Self {
            qualifier: Some(qualifier.into()),
            _phantom: PhantomData,
        }
    }

    /// The key for `T` qualified with the marker type `M`.
    pub fn marked<M: 'static>() -> Self {
        Self::qualified(Qualifier::of::<M>())
    }

    pub(crate) fn with_qualifier(qualifier: Option<Qualifier>) -> Self {
        Self {
            qualifier,
            _phantom: PhantomData,
        }
    }

    pub fn qualifier(&self) -> Option<Qualifier> {
        self.qualifier
    }

    /// Returns the underlying type-erased key.
    pub fn erased(&self) -> BindingKey {
        BindingKey::of::<T>(self.qualifier)
    }
}

impl<T: ?Sized + 'static> Default for Key<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Key<T> {}

impl<T: ?Sized> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.qualifier == other.qualifier
    }
}

impl<T: ?Sized> Eq for Key<T> {}

impl<T: ?Sized + 'static> Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.erased(), f)
    }
}

impl<T: ?Sized + 'static> Display for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.erased(), f)
    }
}

impl<T: ?Sized + 'static> From<Key<T>> for BindingKey {
    fn from(key: Key<T>) -> Self {
        key.erased()
    }
}
