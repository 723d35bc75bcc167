//! Shared registries consulted by every pipeline run
//!
//! Both registries are concurrent maps because class loading is: many
//! classes reach the pipeline from different loader threads at once.

use super::requests::CustomTransform;
use crate::errors::Error;
use crate::ir::ClassBody;
use crate::jvm::BinaryName;
use dashmap::DashMap;
use std::sync::Arc;

/// Class-level transformer resolved through the handler registry by key
pub trait ClassTransform: Send + Sync {
    fn transform(&self, class: &mut ClassBody) -> Result<(), Error>;
}

impl<F> ClassTransform for F
where
    F: Fn(&mut ClassBody) -> Result<(), Error> + Send + Sync,
{
    fn transform(&self, class: &mut ClassBody) -> Result<(), Error> {
        self(class)
    }
}

/// One transform parked until its foreign class reaches the pipeline
pub type DeferredTransform = Box<dyn Fn(&mut ClassBody) -> Result<(), Error> + Send + Sync>;

/// Cross-class injection mailbox
///
/// Surgical requests register here against the foreign class's name; the
/// pipeline drains the mailbox when that class comes through. Draining is a
/// single atomic removal, so two threads transforming the same class never
/// run the same entry twice.
#[derive(Default)]
pub struct DeferredRegistry {
    entries: DashMap<BinaryName, Vec<DeferredTransform>>,
}

impl DeferredRegistry {
    pub fn new() -> DeferredRegistry {
        DeferredRegistry::default()
    }

    pub fn register(&self, class: BinaryName, transform: DeferredTransform) {
        self.entries.entry(class).or_default().push(transform);
    }

    /// Take every entry parked for `class`, leaving none behind
    pub fn drain(&self, class: &BinaryName) -> Vec<DeferredTransform> {
        self.entries
            .remove(class)
            .map(|(_, transforms)| transforms)
            .unwrap_or_default()
    }

    pub fn pending(&self, class: &BinaryName) -> usize {
        self.entries.get(class).map_or(0, |entry| entry.len())
    }

    /// Discard every parked entry (hot-reload support)
    pub fn reset(&self) {
        self.entries.clear();
    }
}

type ClassFactory = Box<dyn Fn() -> Result<Arc<dyn ClassTransform>, Error> + Send + Sync>;
type CustomFactory = Box<dyn Fn() -> Result<Arc<dyn CustomTransform>, Error> + Send + Sync>;

/// Key-to-handler resolution with per-key instantiation caching
///
/// Keys name transformer implementations supplied by the host; each is
/// instantiated at most once and the instance is reused for every class.
#[derive(Default)]
pub struct HandlerRegistry {
    class_factories: DashMap<String, ClassFactory>,
    custom_factories: DashMap<String, CustomFactory>,
    class_cache: DashMap<String, Arc<dyn ClassTransform>>,
    custom_cache: DashMap<String, Arc<dyn CustomTransform>>,
}

impl HandlerRegistry {
    pub fn new() -> HandlerRegistry {
        HandlerRegistry::default()
    }

    pub fn register_class_handler(&self, key: impl Into<String>, factory: ClassFactory) {
        self.class_factories.insert(key.into(), factory);
    }

    pub fn register_custom_handler(&self, key: impl Into<String>, factory: CustomFactory) {
        self.custom_factories.insert(key.into(), factory);
    }

    pub fn resolve_class_handler(&self, key: &str) -> Result<Arc<dyn ClassTransform>, Error> {
        if let Some(cached) = self.class_cache.get(key) {
            return Ok(cached.clone());
        }
        let factory = self.class_factories.get(key).ok_or_else(|| {
            Error::TransformerInstantiationFailure {
                key: key.to_owned(),
            }
        })?;
        let handler = factory()?;
        self.class_cache.insert(key.to_owned(), handler.clone());
        Ok(handler)
    }

    pub fn resolve_custom_handler(&self, key: &str) -> Result<Arc<dyn CustomTransform>, Error> {
        if let Some(cached) = self.custom_cache.get(key) {
            return Ok(cached.clone());
        }
        let factory = self.custom_factories.get(key).ok_or_else(|| {
            Error::TransformerInstantiationFailure {
                key: key.to_owned(),
            }
        })?;
        let handler = factory()?;
        self.custom_cache.insert(key.to_owned(), handler.clone());
        Ok(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::Name;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn drain_empties_the_mailbox() {
        let registry = DeferredRegistry::new();
        let class = BinaryName::from_string("acme/Foreign".to_owned()).unwrap();
        registry.register(class.clone(), Box::new(|_| Ok(())));
        registry.register(class.clone(), Box::new(|_| Ok(())));
        assert_eq!(registry.pending(&class), 2);

        assert_eq!(registry.drain(&class).len(), 2);
        assert_eq!(registry.pending(&class), 0);
        assert!(registry.drain(&class).is_empty());
    }

    #[test]
    fn handler_keys_instantiate_once() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);
        let registry = HandlerRegistry::new();
        registry.register_class_handler(
            "caching",
            Box::new(|| {
                BUILDS.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(|_: &mut ClassBody| Ok(())) as Arc<dyn ClassTransform>)
            }),
        );

        registry.resolve_class_handler("caching").unwrap();
        registry.resolve_class_handler("caching").unwrap();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_keys_are_reported() {
        let registry = HandlerRegistry::new();
        assert!(matches!(
            registry.resolve_custom_handler("ghost"),
            Err(Error::TransformerInstantiationFailure { .. })
        ));
    }
}
