//! Tagged runtime values.
//!
//! A closed sum type: every opcode family (arithmetic, comparison, indexing)
//! matches exhaustively over it, so the promotion/coercion matrix lives in one
//! place per family instead of being scattered across tag checks. Containers
//! are shared by reference; anything that can cross a task boundary is behind
//! an `Arc` with interior locking where mutation is allowed.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

use crate::concurrency::Channel;
use crate::core::types::{ErrorUnionType, TypeTag};
use crate::core::{Environment, FastHashMap, OrderedMap};

/// Key type for dictionary payloads. Values are not hashable in general;
/// the admissible key kinds are strings, integers, and booleans.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DictKey {
    Str(Arc<str>),
    Int(i64),
    Bool(bool),
}

impl DictKey {
    pub fn to_value(&self) -> Value {
        match self {
            DictKey::Str(s) => Value::Str(s.clone()),
            DictKey::Int(i) => Value::Int64(*i),
            DictKey::Bool(b) => Value::Bool(*b),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RangeValue {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

/// Error payload carried inside an error union.
#[derive(Clone, Debug)]
pub struct ErrorValue {
    pub error_type: String,
    pub message: String,
    pub args: Vec<Value>,
    pub line: u32,
}

impl ErrorValue {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>, line: u32) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            args: Vec::new(),
            line,
        }
    }
}

#[derive(Clone, Debug)]
pub enum UnionPayload {
    Ok(Value),
    Err(ErrorValue),
}

/// A fallible result: union metadata plus a success-or-error payload.
#[derive(Clone, Debug)]
pub struct ErrorUnionValue {
    pub union: ErrorUnionType,
    pub payload: UnionPayload,
}

/// Function body plus captured lexical scope.
///
/// Valid iff the name is non-empty, `start < end`, and the environment is
/// present; `Interp` faults on any call through an invalid closure.
#[derive(Debug)]
pub struct ClosureData {
    pub id: u64,
    pub function_name: String,
    pub start: usize,
    pub end: usize,
    pub env: Arc<Environment>,
    pub captured: Vec<String>,
}

impl ClosureData {
    pub fn is_valid(&self) -> bool {
        !self.function_name.is_empty() && self.start < self.end
    }
}

/// A class instance: definition reference plus ordered field storage.
#[derive(Debug)]
pub struct ObjectData {
    pub class_name: String,
    pub fields: Mutex<OrderedMap<String, Value>>,
}

#[derive(Debug)]
pub struct ModuleData {
    pub name: String,
    pub exports: FastHashMap<String, Value>,
}

/// Cursor state for the iterator protocol.
#[derive(Debug)]
pub enum IterCursor {
    List { items: Vec<Value>, idx: usize },
    Range { next: i64, end: i64, step: i64 },
    Dict { pairs: Vec<(DictKey, Value)>, idx: usize },
    Str { chars: Vec<char>, idx: usize },
}

impl IterCursor {
    pub fn has_next(&self) -> bool {
        match self {
            IterCursor::List { items, idx } => *idx < items.len(),
            IterCursor::Range { next, end, step } => {
                if *step > 0 { next < end } else { next > end }
            }
            IterCursor::Dict { pairs, idx } => *idx < pairs.len(),
            IterCursor::Str { chars, idx } => *idx < chars.len(),
        }
    }

    /// Advances and returns the next element, or `None` when exhausted.
    pub fn next(&mut self) -> Option<Value> {
        match self {
            IterCursor::List { items, idx } => {
                let v = items.get(*idx).cloned()?;
                *idx += 1;
                Some(v)
            }
            IterCursor::Range { next, end, step } => {
                let done = if *step > 0 { *next >= *end } else { *next <= *end };
                if done {
                    return None;
                }
                let v = *next;
                *next += *step;
                Some(Value::Int64(v))
            }
            IterCursor::Dict { pairs, idx } => {
                let (_, v) = pairs.get(*idx).cloned()?;
                *idx += 1;
                Some(v)
            }
            IterCursor::Str { chars, idx } => {
                let c = chars.get(*idx).copied()?;
                *idx += 1;
                Some(Value::Str(Arc::from(c.to_string().as_str())))
            }
        }
    }

    /// Advances and returns the next (key, value) pair.
    pub fn next_key_value(&mut self) -> Option<(Value, Value)> {
        match self {
            IterCursor::Dict { pairs, idx } => {
                let (k, v) = pairs.get(*idx).cloned()?;
                *idx += 1;
                Some((k.to_value(), v))
            }
            IterCursor::List { items, idx } => {
                let v = items.get(*idx).cloned()?;
                let k = Value::Int64(*idx as i64);
                *idx += 1;
                Some((k, v))
            }
            other => {
                let v = other.next()?;
                Some((Value::Nil, v))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    Str(Arc<str>),
    List(Arc<Mutex<Vec<Value>>>),
    Tuple(Arc<Vec<Value>>),
    Dict(Arc<Mutex<OrderedMap<DictKey, Value>>>),
    Range(Arc<RangeValue>),
    /// Named reference to a registered function.
    Function(Arc<str>),
    Closure(Arc<ClosureData>),
    Object(Arc<ObjectData>),
    Module(Arc<ModuleData>),
    Channel(Arc<Channel>),
    Iterator(Arc<Mutex<IterCursor>>),
    Atomic(Arc<AtomicI64>),
    Error(Arc<ErrorUnionValue>),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(Mutex::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Arc::new(items))
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Nil => TypeTag::Nil,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int32(_) => TypeTag::Int32,
            Value::Int64(_) => TypeTag::Int64,
            Value::UInt64(_) => TypeTag::UInt64,
            Value::Float64(_) => TypeTag::Float64,
            Value::Str(_) => TypeTag::String,
            Value::List(_) => TypeTag::List,
            Value::Tuple(_) => TypeTag::Tuple,
            Value::Dict(_) => TypeTag::Dict,
            Value::Range(_) => TypeTag::Range,
            Value::Function(_) => TypeTag::Function,
            Value::Closure(_) => TypeTag::Closure,
            Value::Object(_) => TypeTag::Object,
            Value::Module(_) => TypeTag::Module,
            Value::Channel(_) => TypeTag::Channel,
            Value::Iterator(_) => TypeTag::Iterator,
            Value::Atomic(_) => TypeTag::Atomic,
            Value::Error(_) => TypeTag::ErrorUnion,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.type_tag() {
            TypeTag::Nil => "Nil",
            TypeTag::Bool => "Bool",
            TypeTag::Int32 => "Int32",
            TypeTag::Int64 => "Int64",
            TypeTag::UInt64 => "UInt64",
            TypeTag::Float64 => "Float64",
            TypeTag::String => "String",
            TypeTag::List => "List",
            TypeTag::Tuple => "Tuple",
            TypeTag::Dict => "Dict",
            TypeTag::Range => "Range",
            TypeTag::Function => "Function",
            TypeTag::Closure => "Closure",
            TypeTag::Object => "Object",
            TypeTag::Module => "Module",
            TypeTag::Channel => "Channel",
            TypeTag::Iterator => "Iterator",
            TypeTag::Atomic => "Atomic",
            TypeTag::ErrorUnion => "ErrorUnion",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int32(_)
                | Value::Int64(_)
                | Value::UInt64(_)
                | Value::Float64(_)
                | Value::Atomic(_)
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Value::Float64(_))
    }

    /// Integer reading across the integer variants; `None` when the value is
    /// not an integer or a `UInt64` exceeds `i64::MAX`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            Value::Atomic(cell) => Some(cell.load(Ordering::SeqCst)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::UInt64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            Value::Atomic(cell) => Some(cell.load(Ordering::SeqCst) as f64),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int32(v) => *v != 0,
            Value::Int64(v) => *v != 0,
            Value::UInt64(v) => *v != 0,
            Value::Float64(v) => *v != 0.0,
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// True when the value is an error union carrying an error payload.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Value::Error(u) if matches!(u.payload, UnionPayload::Err(_))
        )
    }

    pub fn error_payload(&self) -> Option<&ErrorValue> {
        match self {
            Value::Error(u) => match &u.payload {
                UnionPayload::Err(e) => Some(e),
                UnionPayload::Ok(_) => None,
            },
            _ => None,
        }
    }

    /// Wraps an error payload as an error-union value.
    pub fn from_error(err: ErrorValue) -> Value {
        let union = ErrorUnionType {
            error_names: vec![err.error_type.clone()],
            is_generic: false,
        };
        Value::Error(Arc::new(ErrorUnionValue {
            union,
            payload: UnionPayload::Err(err),
        }))
    }

    /// Wraps a success payload as a generic error-union value.
    pub fn from_ok(value: Value) -> Value {
        let union = ErrorUnionType {
            error_names: Vec::new(),
            is_generic: true,
        };
        Value::Error(Arc::new(ErrorUnionValue {
            union,
            payload: UnionPayload::Ok(value),
        }))
    }

    pub fn dict_key(&self) -> Option<DictKey> {
        match self {
            Value::Str(s) => Some(DictKey::Str(s.clone())),
            Value::Int32(v) => Some(DictKey::Int(*v as i64)),
            Value::Int64(v) => Some(DictKey::Int(*v)),
            Value::UInt64(v) => i64::try_from(*v).ok().map(DictKey::Int),
            Value::Bool(b) => Some(DictKey::Bool(*b)),
            _ => None,
        }
    }

    /// Display formatting shared by `Print`, string concatenation, and
    /// interpolation.
    pub fn display_into(&self, out: &mut String) {
        match self {
            Value::Nil => out.push_str("nil"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Int32(v) => {
                let mut buf = itoa::Buffer::new();
                out.push_str(buf.format(*v));
            }
            Value::Int64(v) => {
                let mut buf = itoa::Buffer::new();
                out.push_str(buf.format(*v));
            }
            Value::UInt64(v) => {
                let mut buf = itoa::Buffer::new();
                out.push_str(buf.format(*v));
            }
            Value::Float64(v) => {
                let mut buf = ryu::Buffer::new();
                out.push_str(buf.format(*v));
            }
            Value::Str(s) => out.push_str(s),
            Value::List(items) => {
                out.push('[');
                for (i, item) in items.lock().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.display_into(out);
                }
                out.push(']');
            }
            Value::Tuple(items) => {
                out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.display_into(out);
                }
                out.push(')');
            }
            Value::Dict(map) => {
                out.push('{');
                for (i, (k, v)) in map.lock().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.to_value().display_into(out);
                    out.push_str(": ");
                    v.display_into(out);
                }
                out.push('}');
            }
            Value::Range(r) => {
                out.push_str(&format!("{}..{}", r.start, r.end));
                if r.step != 1 {
                    out.push_str(&format!(" step {}", r.step));
                }
            }
            Value::Function(name) => out.push_str(&format!("<function {name}>")),
            Value::Closure(c) => {
                out.push_str(&format!(
                    "<closure:{} captures[{}]>",
                    c.function_name,
                    c.captured.join(", ")
                ));
            }
            Value::Object(obj) => out.push_str(&format!("<{} instance>", obj.class_name)),
            Value::Module(m) => out.push_str(&format!("<module {}>", m.name)),
            Value::Channel(_) => out.push_str("<channel>"),
            Value::Iterator(_) => out.push_str("<iterator>"),
            Value::Atomic(cell) => {
                let mut buf = itoa::Buffer::new();
                out.push_str(buf.format(cell.load(Ordering::SeqCst)));
            }
            Value::Error(u) => match &u.payload {
                UnionPayload::Ok(v) => {
                    out.push_str("ok(");
                    v.display_into(out);
                    out.push(')');
                }
                UnionPayload::Err(e) => {
                    out.push_str(&format!("{}({})", e.error_type, e.message));
                }
            },
        }
    }

    pub fn to_display_string(&self) -> String {
        let mut out = String::new();
        self.display_into(&mut out);
        out
    }
}

/// Language-level equality. Numeric values compare by magnitude across
/// integer/float variants; containers compare element-wise.
pub fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| value_eq(a, b))
        }
        (Value::List(x), Value::List(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let xs = x.lock();
            let ys = y.lock();
            xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(a, b)| value_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => Arc::ptr_eq(x, y),
        (Value::Channel(x), Value::Channel(y)) => Arc::ptr_eq(x, y),
        (Value::Closure(x), Value::Closure(y)) => Arc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => x == y,
        _ => {
            if a.is_numeric() && b.is_numeric() {
                if a.is_float() || b.is_float() {
                    a.as_f64() == b.as_f64()
                } else {
                    a.as_i64() == b.as_i64()
                }
            } else {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_crosses_variants() {
        assert!(value_eq(&Value::Int32(5), &Value::Int64(5)));
        assert!(value_eq(&Value::Int64(5), &Value::Float64(5.0)));
        assert!(!value_eq(&Value::Int64(5), &Value::Float64(5.5)));
    }

    #[test]
    fn display_formats_collections() {
        let v = Value::list(vec![Value::Int64(1), Value::str("a"), Value::Nil]);
        assert_eq!(v.to_display_string(), "[1, a, nil]");
    }

    #[test]
    fn error_union_payload_accessors() {
        let err = Value::from_error(ErrorValue::new("Boom", "bad", 3));
        assert!(err.is_error());
        assert_eq!(err.error_payload().unwrap().error_type, "Boom");
        let ok = Value::from_ok(Value::Int64(7));
        assert!(!ok.is_error());
    }

    #[test]
    fn closure_validity_requires_name_and_forward_range() {
        let env = Environment::root();
        let good = ClosureData {
            id: 0,
            function_name: "f".into(),
            start: 1,
            end: 2,
            env: env.clone(),
            captured: vec![],
        };
        assert!(good.is_valid());
        let unnamed = ClosureData { function_name: String::new(), ..good };
        assert!(!unnamed.is_valid());
        let empty_body = ClosureData {
            id: 0,
            function_name: "f".into(),
            start: 2,
            end: 2,
            env,
            captured: vec![],
        };
        assert!(!empty_body.is_valid());
    }

    #[test]
    fn range_cursor_counts_down_with_negative_step() {
        let mut cur = IterCursor::Range { next: 3, end: 0, step: -1 };
        let mut got = Vec::new();
        while let Some(v) = cur.next() {
            got.push(v.as_i64().unwrap());
        }
        assert_eq!(got, vec![3, 2, 1]);
    }
}
