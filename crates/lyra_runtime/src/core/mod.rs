//! Core data model: values, type descriptors, environments.

pub mod env;
pub mod types;
pub mod value;

pub use env::Environment;
pub use types::{ErrorUnionType, Type, TypeRegistry, TypeTag};
pub use value::{
    ClosureData, DictKey, ErrorUnionValue, ErrorValue, IterCursor, ModuleData, ObjectData,
    RangeValue, UnionPayload, Value, value_eq,
};

/// Hash map used on hot paths.
pub type FastHashMap<K, V> = hashbrown::HashMap<K, V, ahash::RandomState>;

/// Ordered map used where iteration order must match insertion order.
pub type OrderedMap<K, V> = indexmap::IndexMap<K, V, ahash::RandomState>;
