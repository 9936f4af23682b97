//! Value-type registry for channel type resolution
//!
//! Channel descriptors name their accepted value types by string id.
//! The registry resolves those ids to [`TypeDescriptor`]s carrying the
//! subtype lattice and a runtime conformance predicate. Type ids that
//! cannot be resolved (e.g. a type contributed by an uninstalled add-on)
//! are downgraded to a warning and treated as never-matching.

use std::collections::{HashMap, HashSet, VecDeque};

/// A registered value type
#[derive(Clone)]
pub struct TypeDescriptor {
    /// Type id as referenced from channel descriptors
    pub id: String,
    /// Direct supertypes; subtyping is the reflexive-transitive closure
    pub supertypes: Vec<String>,
    /// Runtime conformance predicate for delivered values
    pub check: fn(&serde_json::Value) -> bool,
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("id", &self.id)
            .field("supertypes", &self.supertypes)
            .finish()
    }
}

impl TypeDescriptor {
    /// Create a descriptor with no supertypes other than the implicit self
    pub fn new(id: impl Into<String>, check: fn(&serde_json::Value) -> bool) -> Self {
        Self {
            id: id.into(),
            supertypes: Vec::new(),
            check,
        }
    }

    /// Declare direct supertypes
    pub fn with_supertypes(mut self, supertypes: &[&str]) -> Self {
        self.supertypes = supertypes.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Registry of value types keyed by type id
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDescriptor>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the builtin lattice
    ///
    /// `int` and `float` are subtypes of `number`; everything is a subtype
    /// of `any`. Hosts register their domain types on top of these.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(TypeDescriptor::new("any", |_| true));
        registry.register(TypeDescriptor::new("str", |v| v.is_string()).with_supertypes(&["any"]));
        registry.register(TypeDescriptor::new("bool", |v| v.is_boolean()).with_supertypes(&["any"]));
        registry.register(TypeDescriptor::new("number", |v| v.is_number()).with_supertypes(&["any"]));
        registry.register(TypeDescriptor::new("int", |v| v.is_i64() || v.is_u64()).with_supertypes(&["number"]));
        registry.register(TypeDescriptor::new("float", |v| v.is_number()).with_supertypes(&["number"]));
        registry.register(TypeDescriptor::new("list", |v| v.is_array()).with_supertypes(&["any"]));
        registry.register(TypeDescriptor::new("object", |v| v.is_object()).with_supertypes(&["any"]));
        registry
    }

    /// Register (or replace) a type descriptor
    pub fn register(&mut self, descriptor: TypeDescriptor) {
        self.types.insert(descriptor.id.clone(), descriptor);
    }

    /// Whether a type id resolves
    pub fn contains(&self, id: &str) -> bool {
        self.types.contains_key(id)
    }

    /// Look up a descriptor
    pub fn get(&self, id: &str) -> Option<&TypeDescriptor> {
        self.types.get(id)
    }

    /// Whether `sub` is a subtype of `sup` (reflexive, transitive)
    ///
    /// An unresolvable id on either side never matches; the failed
    /// resolution is logged once per call rather than raised.
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        if !self.contains(sub) {
            log::warn!("unresolvable channel type id '{}'", sub);
            return false;
        }
        if !self.contains(sup) {
            log::warn!("unresolvable channel type id '{}'", sup);
            return false;
        }
        if sub == sup {
            return true;
        }
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(sub);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if current == sup {
                return true;
            }
            if let Some(descriptor) = self.types.get(current) {
                for parent in &descriptor.supertypes {
                    queue.push_back(parent);
                }
            }
        }
        false
    }

    /// Whether a runtime value conforms to a type
    ///
    /// Used by dynamic-link re-validation at delivery time. Unresolvable
    /// ids never conform.
    pub fn value_conforms(&self, id: &str, value: &serde_json::Value) -> bool {
        match self.types.get(id) {
            Some(descriptor) => (descriptor.check)(value),
            None => {
                log::warn!("unresolvable channel type id '{}'", id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subtype_is_reflexive() {
        let registry = TypeRegistry::with_builtins();
        assert!(registry.is_subtype("str", "str"));
    }

    #[test]
    fn test_subtype_transitive_closure() {
        let registry = TypeRegistry::with_builtins();
        assert!(registry.is_subtype("int", "number"));
        assert!(registry.is_subtype("int", "any"));
        assert!(!registry.is_subtype("number", "int"));
        assert!(!registry.is_subtype("str", "number"));
    }

    #[test]
    fn test_unresolvable_type_never_matches() {
        let _ = env_logger::builder().is_test(true).try_init();
        let registry = TypeRegistry::with_builtins();
        assert!(!registry.is_subtype("ghost.Type", "any"));
        assert!(!registry.is_subtype("any", "ghost.Type"));
        assert!(!registry.value_conforms("ghost.Type", &json!(1)));
    }

    #[test]
    fn test_value_conforms_builtins() {
        let registry = TypeRegistry::with_builtins();
        assert!(registry.value_conforms("str", &json!("hello")));
        assert!(!registry.value_conforms("str", &json!(3)));
        assert!(registry.value_conforms("int", &json!(3)));
        assert!(!registry.value_conforms("int", &json!(3.5)));
        assert!(registry.value_conforms("number", &json!(3.5)));
        assert!(registry.value_conforms("any", &json!({"k": 1})));
    }

    #[test]
    fn test_host_registered_type_joins_lattice() {
        let mut registry = TypeRegistry::with_builtins();
        registry.register(
            TypeDescriptor::new("table", |v| v.is_object()).with_supertypes(&["object"]),
        );
        assert!(registry.is_subtype("table", "object"));
        assert!(registry.is_subtype("table", "any"));
        assert!(!registry.is_subtype("object", "table"));
    }
}
