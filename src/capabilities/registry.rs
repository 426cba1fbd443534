//! Compile-time capability registry: a map from capability name to factory function, built
//! once at program start and owned by the `Coordinator` — a simple stand-in for a
//! directory-scanned plugin loader. Unknown names fail at config-validation time rather than
//! at first use.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;

type Factory<T> = Box<dyn Fn(&HashMap<String, String>) -> Result<Arc<T>> + Send + Sync>;

/// An owned, non-singleton registry of named factories for one capability trait `T`. Passed by
/// reference into the `Coordinator`; never a process-wide static.
pub struct Registry<T: ?Sized> {
    factories: HashMap<String, Factory<T>>,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&HashMap<String, String>) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|s| s.as_str())
    }

    /// Builds a named capability instance, or an error naming the unknown capability and the
    /// full list of registered ones — surfaced as part of the aggregated startup config error.
    pub fn build(&self, name: &str, settings: &HashMap<String, String>) -> Result<Arc<T>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "unknown capability '{name}', known: [{}]",
                self.factories.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })?;
        factory(settings)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Hello;
    impl Greeter for Hello {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    #[test]
    fn builds_registered_factory() {
        let mut reg: Registry<dyn Greeter> = Registry::new();
        reg.register("hello", |_| Ok(Arc::new(Hello)));
        let built = reg.build("hello", &HashMap::new()).unwrap();
        assert_eq!(built.greet(), "hello");
    }

    #[test]
    fn unknown_name_fails_fast() {
        let reg: Registry<dyn Greeter> = Registry::new();
        let err = reg.build("nope", &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("unknown capability"));
    }
}
