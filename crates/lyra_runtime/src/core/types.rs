//! Type descriptors for error-frame matching.
//!
//! Descriptors are immutable after construction; named error types are
//! interned by the `TypeRegistry` so repeated call sites share one
//! allocation.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::FastHashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Nil,
    Bool,
    Int32,
    Int64,
    UInt64,
    Float64,
    String,
    List,
    Tuple,
    Dict,
    Range,
    Function,
    Closure,
    Object,
    Module,
    Channel,
    Iterator,
    Atomic,
    ErrorUnion,
}

/// Success-or-error shape of a fallible value.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorUnionType {
    /// Error type names this union admits. Empty admits any kind.
    pub error_names: Vec<String>,
    /// True for unions built by `ConstructOk`, which admit any error kind.
    pub is_generic: bool,
}

impl ErrorUnionType {
    /// Whether a raised error of `error_type` is admitted by this union.
    pub fn admits(&self, error_type: &str) -> bool {
        self.is_generic
            || self.error_names.is_empty()
            || self.error_names.iter().any(|n| n == error_type)
    }
}

/// Declared error expectation attached to error frames.
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    ErrorUnion(ErrorUnionType),
    UserDefined(String),
}

/// Interns named error-type descriptors, one registry per VM instance.
pub struct TypeRegistry {
    named: Mutex<FastHashMap<String, Arc<Type>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            named: Mutex::new(FastHashMap::default()),
        }
    }

    pub fn user_defined(&self, name: &str) -> Arc<Type> {
        self.named
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Type::UserDefined(name.to_string())))
            .clone()
    }

    pub fn error_union(&self, union: ErrorUnionType) -> Arc<Type> {
        Arc::new(Type::ErrorUnion(union))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_descriptors_are_interned() {
        let registry = TypeRegistry::new();
        let a = registry.user_defined("IoError");
        let b = registry.user_defined("IoError");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &registry.user_defined("Boom")));
    }

    #[test]
    fn union_admission_covers_members_and_generics() {
        let named = ErrorUnionType {
            error_names: vec!["Boom".into(), "IoError".into()],
            is_generic: false,
        };
        assert!(named.admits("Boom"));
        assert!(!named.admits("Timeout"));

        let generic = ErrorUnionType {
            error_names: Vec::new(),
            is_generic: true,
        };
        assert!(generic.admits("Timeout"));
    }
}
