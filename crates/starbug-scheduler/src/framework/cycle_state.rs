use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-attempt scratch space shared by the scheduler and its plugins
///
/// Plugins store what they computed in one extension point (usually
/// pre-filter) and read it back in later ones. A fresh `CycleState` is
/// created for every scheduling attempt.
#[derive(Default)]
pub struct CycleState {
    data: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.data.write().insert(key.into(), Arc::new(value));
    }

    /// Value stored under `key`, if present and of type `T`
    pub fn read<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.data.read().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn delete(&self, key: &str) {
        self.data.write().remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }
}

impl std::fmt::Debug for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.read();
        let mut keys: Vec<&String> = data.keys().collect();
        keys.sort();
        f.debug_struct("CycleState").field("keys", &keys).finish()
    }
}
