//! [`TypeRegistry`] – runtime lookup of message types by fingerprint.
//!
//! Message types are resolved at runtime rather than through generics.  The
//! registry remembers every [`TypeIdentity`] it has been shown, keyed by its
//! MD5 fingerprint, so that a component holding only a fingerprint (or an
//! identity without definition text) can recover the full identity.

use std::collections::HashMap;
use std::sync::Arc;

use crate::message::{RosMessage, TypeIdentity};

#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    by_md5: HashMap<String, Arc<TypeIdentity>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `identity`, returning the shared handle stored for its
    /// fingerprint.
    ///
    /// An already registered fingerprint keeps its entry, except that a
    /// definition text is filled in when the stored entry lacks one.
    pub fn register(&mut self, identity: TypeIdentity) -> Arc<TypeIdentity> {
        match self.by_md5.get_mut(&identity.md5) {
            Some(existing) if existing.definition.is_none() && identity.definition.is_some() => {
                *existing = Arc::new(identity);
                Arc::clone(existing)
            }
            Some(existing) => Arc::clone(existing),
            None => {
                let entry = Arc::new(identity);
                self.by_md5.insert(entry.md5.clone(), Arc::clone(&entry));
                entry
            }
        }
    }

    /// Register a statically known type.
    pub fn register_message<M: RosMessage>(&mut self) -> Arc<TypeIdentity> {
        self.register(TypeIdentity::of::<M>())
    }

    pub fn resolve(&self, md5: &str) -> Option<Arc<TypeIdentity>> {
        self.by_md5.get(md5).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_md5.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_md5.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Float64;

    #[test]
    fn resolve_registered_message() {
        let mut registry = TypeRegistry::new();
        registry.register_message::<Float64>();
        let found = registry.resolve(Float64::MD5SUM).expect("registered");
        assert_eq!(found.name, "std_msgs/msg/Float64");
        assert_eq!(found.definition.as_deref(), Some("float64 data"));
    }

    #[test]
    fn unknown_fingerprint_resolves_to_none() {
        let registry = TypeRegistry::new();
        assert!(registry.resolve("0000").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn reregister_keeps_existing_handle() {
        let mut registry = TypeRegistry::new();
        let first = registry.register(TypeIdentity::new("a/msg/B", "f1").with_definition("int8 x"));
        let second = registry.register(TypeIdentity::new("a/msg/B", "f1"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn definition_is_filled_in_later() {
        let mut registry = TypeRegistry::new();
        registry.register(TypeIdentity::new("a/msg/B", "f1"));
        registry.register(TypeIdentity::new("a/msg/B", "f1").with_definition("int8 x"));
        let found = registry.resolve("f1").unwrap();
        assert_eq!(found.definition.as_deref(), Some("int8 x"));
    }
}
