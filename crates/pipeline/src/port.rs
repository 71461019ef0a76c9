//! Typed handles to stage outputs.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed reference to the output of a registered stage.
///
/// Ports are only created by [`Pipeline`](crate::Pipeline) when a stage is
/// registered. They carry the stage key and the static output type, which is
/// what makes wiring type-checked at compile time.
pub struct Port<T> {
    key: Arc<str>,
    _output: PhantomData<fn() -> T>,
}

impl<T> Port<T> {
    pub(crate) fn new(key: &str) -> Self {
        Self {
            key: Arc::from(key),
            _output: PhantomData,
        }
    }

    /// Key of the stage this port refers to.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<T> Clone for Port<T> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            _output: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Port<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("key", &self.key)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> PartialEq for Port<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Port<T> {}

impl<T> Hash for Port<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_clone_shares_key() {
        let port: Port<i32> = Port::new("src");
        let copy = port.clone();
        assert_eq!(port, copy);
        assert_eq!(copy.key(), "src");
    }

    #[test]
    fn test_port_debug_names_type() {
        let port: Port<String> = Port::new("name");
        let debug = format!("{port:?}");
        assert!(debug.contains("name"));
        assert!(debug.contains("String"));
    }
}
