use std::any::{Any, TypeId};
use std::collections::HashMap;

use parking_lot::Mutex;

/// Type-indexed attribute storage attached to a handler context.
///
/// One value per type; storing a second value of the same type replaces the
/// first. Values are cloned out on access, so attribute types are expected
/// to be cheap handles (`Arc`s, counters, small copies).
#[derive(Default)]
pub struct AttributeMap {
    entries: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl AttributeMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, replacing any previous value of the same type.
    pub fn set<T: Send + Sync + 'static>(&self, value: T) {
        self.entries
            .lock()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns a clone of the stored value of type `T`, if any.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.entries
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Removes the stored value of type `T`. Returns `true` when a value
    /// was present.
    pub fn remove<T: Send + Sync + 'static>(&self) -> bool {
        self.entries.lock().remove(&TypeId::of::<T>()).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_replace_remove() {
        let attrs = AttributeMap::new();
        assert_eq!(attrs.get::<u32>(), None);

        attrs.set(7u32);
        attrs.set("label");
        assert_eq!(attrs.get::<u32>(), Some(7));
        assert_eq!(attrs.get::<&str>(), Some("label"));

        attrs.set(8u32);
        assert_eq!(attrs.get::<u32>(), Some(8));

        assert!(attrs.remove::<u32>());
        assert!(!attrs.remove::<u32>());
        assert_eq!(attrs.get::<u32>(), None);
    }
}
