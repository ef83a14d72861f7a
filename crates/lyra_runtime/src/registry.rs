//! Function and class registries.
//!
//! User function bodies live inline in the instruction stream; the pre-scan
//! pass registers their `[start, end)` ranges here before the main loop runs,
//! so forward references (including closures over not-yet-executed
//! definitions) resolve. Natives and host-declared signatures share the same
//! table. Methods are registered under `Class::method` keys.

use std::sync::Arc;

use lyra_ir::FunctionSig;

use crate::core::{FastHashMap, OrderedMap, Value};
use crate::errors::VmError;

pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, VmError> + Send + Sync>;

pub enum FunctionKind {
    Native(NativeFn),
    User,
}

pub struct FunctionDef {
    pub sig: FunctionSig,
    pub kind: FunctionKind,
    /// `[body_start, end)` for inline user functions. `body_start` is past
    /// the parameter-definition prefix; `end` is the index of `EndFunction`.
    pub body: Option<(usize, usize)>,
    /// Default values for optional parameters, captured from literal pushes
    /// in the definition prefix.
    pub defaults: FastHashMap<String, Value>,
}

impl FunctionDef {
    pub fn is_native(&self) -> bool {
        matches!(self.kind, FunctionKind::Native(_))
    }

    pub fn is_fallible(&self) -> bool {
        self.sig.is_fallible()
    }
}

#[derive(Default)]
pub struct FunctionRegistry {
    funcs: FastHashMap<String, Arc<FunctionDef>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_native(&mut self, sig: FunctionSig, f: NativeFn) {
        let name = sig.name.clone();
        let def = FunctionDef {
            sig,
            kind: FunctionKind::Native(f),
            body: None,
            defaults: FastHashMap::default(),
        };
        self.funcs.insert(name, Arc::new(def));
    }

    /// Registers a signature without a body. The pre-scan pass attaches the
    /// body range when the inline definition is found.
    pub fn register_signature(&mut self, sig: FunctionSig) {
        let name = sig.name.clone();
        let def = FunctionDef {
            sig,
            kind: FunctionKind::User,
            body: None,
            defaults: FastHashMap::default(),
        };
        self.funcs.insert(name, Arc::new(def));
    }

    /// Registers an inline definition discovered by the pre-scan, merging a
    /// previously registered signature's return annotation when present.
    pub fn register_inline(
        &mut self,
        mut sig: FunctionSig,
        body: (usize, usize),
        defaults: FastHashMap<String, Value>,
    ) {
        if let Some(prev) = self.funcs.get(&sig.name) {
            sig.return_type = prev.sig.return_type.clone();
            sig.throws = sig.throws || prev.sig.throws;
        }
        let name = sig.name.clone();
        let def = FunctionDef {
            sig,
            kind: FunctionKind::User,
            body: Some(body),
            defaults,
        };
        self.funcs.insert(name, Arc::new(def));
    }

    pub fn get(&self, name: &str) -> Option<Arc<FunctionDef>> {
        self.funcs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }
}

#[derive(Clone, Debug)]
pub struct ClassDef {
    pub name: String,
    pub superclass: Option<String>,
    /// Field defaults in declaration order, inherited fields first at
    /// construction time.
    pub field_defaults: OrderedMap<String, Value>,
}

#[derive(Default)]
pub struct ClassRegistry {
    classes: FastHashMap<String, Arc<ClassDef>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: ClassDef) {
        self.classes.insert(def.name.clone(), Arc::new(def));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClassDef>> {
        self.classes.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Walks the superclass chain starting at `class`, returning the first
    /// class that defines `method` (as `Class::method` in `funcs`).
    pub fn resolve_method(
        &self,
        funcs: &FunctionRegistry,
        class: &str,
        method: &str,
    ) -> Option<(String, Arc<FunctionDef>)> {
        let mut cur = Some(class.to_string());
        while let Some(name) = cur {
            let key = format!("{name}::{method}");
            if let Some(def) = funcs.get(&key) {
                return Some((key, def));
            }
            cur = self.classes.get(&name).and_then(|c| c.superclass.clone());
        }
        None
    }

    /// Field defaults for a class, superclass fields first.
    pub fn collect_field_defaults(&self, class: &str) -> OrderedMap<String, Value> {
        let mut chain = Vec::new();
        let mut cur = Some(class.to_string());
        while let Some(name) = cur {
            if let Some(def) = self.classes.get(&name) {
                cur = def.superclass.clone();
                chain.push(def.clone());
            } else {
                break;
            }
        }
        let mut fields = OrderedMap::default();
        for def in chain.iter().rev() {
            for (k, v) in def.field_defaults.iter() {
                fields.insert(k.clone(), v.clone());
            }
        }
        fields
    }
}
