//! Typed key/value bag carried by every operation.
//!
//! Links declare their own keys as marker types implementing [`ContextKey`],
//! so two links can never collide on a stringly-typed name.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait ContextKey: 'static {
    type Value: Clone + Send + Sync + 'static;

    /// Name used in debug output.
    const NAME: &'static str;
}

#[derive(Clone)]
struct Entry {
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

#[derive(Clone, Default)]
pub struct OperationContext {
    entries: HashMap<TypeId, Entry>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the one it replaced.
    pub fn insert<K: ContextKey>(&mut self, value: K::Value) -> Option<K::Value> {
        let previous = self.entries.insert(
            TypeId::of::<K>(),
            Entry {
                name: K::NAME,
                value: Arc::new(value),
            },
        );
        previous.and_then(|entry| entry.value.downcast_ref::<K::Value>().cloned())
    }

    pub fn with<K: ContextKey>(mut self, value: K::Value) -> Self {
        self.insert::<K>(value);
        self
    }

    pub fn get<K: ContextKey>(&self) -> Option<&K::Value> {
        self.entries
            .get(&TypeId::of::<K>())
            .and_then(|entry| entry.value.downcast_ref::<K::Value>())
    }

    pub fn contains<K: ContextKey>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<K>())
    }

    /// Copies every key of `other` that is not already present.
    pub fn extend_missing(&mut self, other: &OperationContext) {
        for (type_id, entry) in &other.entries {
            self.entries
                .entry(*type_id)
                .or_insert_with(|| entry.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.values().map(|entry| entry.name).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}
