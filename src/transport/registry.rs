//! A process-wide, copy-on-write name registry (§4.9, §4.7 "named
//! channels/servers"), shared by [`crate::transport::channel::Channel`] and
//! [`crate::transport::server::Server`] so either can be looked up by name
//! instead of threading an `Arc` through application state by hand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A name -> value table, read far more often than written: `lookup` clones
/// an `Arc` snapshot of the whole map under the lock and releases it
/// immediately, so readers never block behind a slow registration.
pub struct NameRegistry<T> {
    table: Mutex<Arc<HashMap<String, Arc<T>>>>,
}

impl<T> Default for NameRegistry<T> {
    fn default() -> Self {
        Self {
            table: Mutex::new(Arc::new(HashMap::new())),
        }
    }
}

impl<T> NameRegistry<T> {
    pub fn register(&self, name: impl Into<String>, value: Arc<T>) {
        let mut guard = self.table.lock().unwrap();
        let mut next = HashMap::clone(&guard);
        next.insert(name.into(), value);
        *guard = Arc::new(next);
    }

    pub fn unregister(&self, name: &str) {
        let mut guard = self.table.lock().unwrap();
        if guard.contains_key(name) {
            let mut next = HashMap::clone(&guard);
            next.remove(name);
            *guard = Arc::new(next);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<T>> {
        self.table.lock().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.lock().unwrap().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_then_unregister() {
        let registry: NameRegistry<u32> = NameRegistry::default();
        registry.register("a", Arc::new(1));
        assert_eq!(*registry.lookup("a").unwrap(), 1);

        registry.unregister("a");
        assert!(registry.lookup("a").is_none());
    }

    #[test]
    fn unrelated_names_do_not_clobber_each_other() {
        let registry: NameRegistry<u32> = NameRegistry::default();
        registry.register("a", Arc::new(1));
        registry.register("b", Arc::new(2));
        assert_eq!(*registry.lookup("a").unwrap(), 1);
        assert_eq!(*registry.lookup("b").unwrap(), 2);
    }
}
