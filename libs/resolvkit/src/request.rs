//! Request context registry: maps per-request identifiers to the inbound request value.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Token of the internal provider that exposes the inbound request to request-scoped factories.
pub const REQUEST: &str = "REQUEST";

/// The raw inbound request value, as handed over by the dispatch layer.
pub type RequestValue = Arc<dyn Any + Send + Sync>;

/// Opaque identifier of one logical request. Minted fresh per request and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sharded store of request values keyed by [`ContextId`].
///
/// Entries are write-once: the first registration for an identifier wins and later
/// registrations for the same identifier are ignored. Removal is explicit and belongs
/// to whoever owns the request lifecycle (see `ProviderContainer::dispose_context`).
#[derive(Default)]
pub struct RequestRegistry {
    entries: DashMap<ContextId, RequestValue>,
}

impl fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `value` with `id`. Returns `false` if `id` already had a value,
    /// in which case the stored value is left untouched.
    pub fn register(&self, id: ContextId, value: RequestValue) -> bool {
        match self.entries.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    pub fn get(&self, id: ContextId) -> Option<RequestValue> {
        self.entries.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Typed lookup; `None` when absent or when the stored value has another type.
    pub fn get_as<T: Any + Send + Sync>(&self, id: ContextId) -> Option<Arc<T>> {
        self.get(id).and_then(|v| v.downcast::<T>().ok())
    }

    pub fn remove(&self, id: ContextId) -> Option<RequestValue> {
        self.entries.remove(&id).map(|(_, v)| v)
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Req(&'static str);

    #[test]
    fn lookup_returns_registered_value_only() {
        let registry = RequestRegistry::new();
        let a = ContextId::new();
        let b = ContextId::new();

        assert!(registry.register(a, Arc::new(Req("alice"))));

        let found = registry.get_as::<Req>(a).expect("value for A");
        assert_eq!(*found, Req("alice"));
        assert!(registry.get(b).is_none(), "B was never registered");
    }

    #[test]
    fn registration_is_write_once() {
        let registry = RequestRegistry::new();
        let id = ContextId::new();

        assert!(registry.register(id, Arc::new(Req("first"))));
        assert!(!registry.register(id, Arc::new(Req("second"))));

        assert_eq!(*registry.get_as::<Req>(id).unwrap(), Req("first"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn removed_entries_are_not_recreated() {
        let registry = RequestRegistry::new();
        let id = ContextId::new();
        registry.register(id, Arc::new(Req("gone")));

        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
        assert!(!registry.contains(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn typed_lookup_rejects_other_types() {
        let registry = RequestRegistry::new();
        let id = ContextId::new();
        registry.register(id, Arc::new(42u32));

        assert!(registry.get_as::<Req>(id).is_none());
        assert_eq!(*registry.get_as::<u32>(id).unwrap(), 42);
    }

    #[test]
    fn concurrent_requests_do_not_contend() {
        let registry = Arc::new(RequestRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let id = ContextId::new();
                    registry.register(id, Arc::new(i as u32));
                    (id, i as u32)
                })
            })
            .collect();

        for h in handles {
            let (id, expected) = h.join().unwrap();
            assert_eq!(*registry.get_as::<u32>(id).unwrap(), expected);
        }
        assert_eq!(registry.len(), 8);
    }

    #[test]
    fn context_ids_are_unique() {
        let a = ContextId::new();
        let b = ContextId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }
}
