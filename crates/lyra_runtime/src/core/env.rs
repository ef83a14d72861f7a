//! Chained lexical scopes.
//!
//! An `Environment` is an ordered name→Value map plus an optional parent
//! link. Frames, closures, and task interpreters hold `Arc`s to the same
//! chain; each scope's map is guarded by its own mutex so task interpreters
//! can read and write shared bindings without tearing.
//!
//! A binding slot is either owned or shared. Shared slots back the closure
//! capture promotion: once two live closures capture the same variable name,
//! both environments point at one boxed cell and writes through either are
//! visible to the other.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::OrderedMap;
use crate::core::value::Value;

#[derive(Clone, Debug)]
pub enum Slot {
    Owned(Value),
    Shared(Arc<Mutex<Value>>),
}

impl Slot {
    fn read(&self) -> Value {
        match self {
            Slot::Owned(v) => v.clone(),
            Slot::Shared(cell) => cell.lock().clone(),
        }
    }

    fn write(&mut self, value: Value) {
        match self {
            Slot::Owned(v) => *v = value,
            Slot::Shared(cell) => *cell.lock() = value,
        }
    }
}

#[derive(Debug)]
pub struct Environment {
    slots: Mutex<OrderedMap<String, Slot>>,
    parent: Option<Arc<Environment>>,
}

impl Environment {
    pub fn root() -> Arc<Environment> {
        Arc::new(Environment {
            slots: Mutex::new(OrderedMap::default()),
            parent: None,
        })
    }

    pub fn child(parent: &Arc<Environment>) -> Arc<Environment> {
        Arc::new(Environment {
            slots: Mutex::new(OrderedMap::default()),
            parent: Some(parent.clone()),
        })
    }

    pub fn parent(&self) -> Option<&Arc<Environment>> {
        self.parent.as_ref()
    }

    /// Defines (or redefines) a binding in this scope.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.slots.lock().insert(name.into(), Slot::Owned(value));
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.slots.lock().contains_key(name)
    }

    /// Lookup walking the parent chain.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(slot) = self.slots.lock().get(name) {
            return Some(slot.read());
        }
        self.parent.as_ref()?.get(name)
    }

    /// Assignment walking the parent chain; `false` when the name is unbound.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        if let Some(slot) = self.slots.lock().get_mut(name) {
            slot.write(value);
            return true;
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => false,
        }
    }

    /// Promotes a local slot to a shared boxed cell, returning the cell.
    /// An already-shared slot returns its existing cell.
    pub fn promote_shared(&self, name: &str) -> Option<Arc<Mutex<Value>>> {
        let mut slots = self.slots.lock();
        match slots.get_mut(name)? {
            Slot::Shared(cell) => Some(cell.clone()),
            slot @ Slot::Owned(_) => {
                let cell = Arc::new(Mutex::new(slot.read()));
                *slot = Slot::Shared(cell.clone());
                Some(cell)
            }
        }
    }

    /// Binds a name in this scope to an existing shared cell.
    pub fn install_shared(&self, name: impl Into<String>, cell: Arc<Mutex<Value>>) {
        self.slots.lock().insert(name.into(), Slot::Shared(cell));
    }

    pub fn local_names(&self) -> Vec<String> {
        self.slots.lock().keys().cloned().collect()
    }
}
