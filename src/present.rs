use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::error::Failure;
use crate::promise::Outcome;

/// Holds the result of a terminated dependency, i.e., either a value or an
/// error.
///
/// Producers receive one `Present` per declared dependency. Reading a failed
/// present with [`get`](Self::get) hands back the failure, so a producer
/// propagates it with `?` or inspects it and recovers.
pub struct Present<T: ?Sized> {
    inner: Outcome<T>,
}

impl<T: ?Sized> Present<T> {
    pub(crate) fn new(inner: Outcome<T>) -> Self {
        Self { inner }
    }

    pub fn successful(value: Arc<T>) -> Self {
        Self { inner: Ok(value) }
    }

    pub fn failed(failure: Failure) -> Self {
        Self {
            inner: Err(failure),
        }
    }

    /// Returns the value, or the failure of the dependency.
    pub fn get(&self) -> Result<&T, Failure> {
        match &self.inner {
            Ok(value) => Ok(&**value),
            Err(failure) => Err(failure.clone()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.inner.is_ok()
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.inner.as_ref().err()
    }

    /// Returns the shared value, or the failure of the dependency.
    pub fn into_result(self) -> Outcome<T> {
        self.inner
    }
}

impl<T: Clone> Present<T> {
    /// Returns an owned copy of the value.
    pub fn cloned(&self) -> Result<T, Failure> {
        self.get().cloned()
    }
}

impl<T: ?Sized> Clone for Present<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ?Sized + Debug> Debug for Present<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Ok(value) => f.debug_tuple("Successful").field(value).finish(),
            Err(failure) => f.debug_tuple("Failed").field(&failure.to_string()).finish(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_successful() {
        let present = Present::successful(Arc::new("hello!".to_string()));
        assert!(present.is_success());
        assert_eq!(present.get().unwrap().len(), 6);
        assert_eq!(present.cloned().unwrap(), "hello!");
    }

    #[test]
    fn test_failed_reraises() {
        let present = Present::<u8>::failed(Failure::new(anyhow::anyhow!("nope")));
        assert!(!present.is_success());

        let read = || -> anyhow::Result<u8> { Ok(*present.get()?) };
        let err = read().unwrap_err();
        assert_eq!(err.to_string(), "nope");
        assert!(err.downcast_ref::<Failure>().is_some());
    }
}
