//! The `MatchPattern` opcode.
//!
//! The compiler pushes the scrutinee, then the pattern, then emits
//! `MatchPattern`; the handler pops both and pushes a bool. Three marker
//! strings select destructuring forms whose element data sits beneath the
//! scrutinee and is consumed whether or not the match succeeds; matched
//! names are bound in the current environment.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::value::DictKey;
use crate::core::{OrderedMap, Value, value_eq};
use crate::errors::VmError;
use crate::vm::Interp;

const DICT_MARKER: &str = "__dict_pattern__";
const LIST_MARKER: &str = "__list_pattern__";
const TUPLE_MARKER: &str = "__tuple_pattern__";

impl Interp {
    pub(crate) fn op_match_pattern(&mut self) -> Result<(), VmError> {
        let pattern = self.pop("MATCH_PATTERN")?;
        let value = self.pop("MATCH_PATTERN")?;

        let matched = match &pattern {
            // Nil and `_` are wildcards.
            Value::Nil => true,
            Value::Str(s) => match s.as_ref() {
                DICT_MARKER => self.match_dict_pattern(&value)?,
                LIST_MARKER | TUPLE_MARKER => self.match_sequence_pattern(&value)?,
                "_" => true,
                name => type_pattern_matches(name, &value),
            },
            // A literal list/dict pattern matches any value of that shape.
            Value::List(_) => matches!(value, Value::List(_)),
            Value::Dict(_) => matches!(value, Value::Dict(_)),
            other => value_eq(other, &value),
        };

        self.stack.push(Value::Bool(matched));
        Ok(())
    }

    /// `[el_0 .. el_n-1, count]` beneath the scrutinee: positional patterns
    /// matched against a list or tuple of the same length. String patterns
    /// other than `_` bind the element.
    fn match_sequence_pattern(&mut self, value: &Value) -> Result<bool, VmError> {
        let count = self.pop_pattern_count()?;
        let patterns = self.pop_args(count, "MATCH_PATTERN")?;

        let elements: Vec<Value> = match value {
            Value::List(items) => items.lock().clone(),
            Value::Tuple(items) => items.as_ref().clone(),
            _ => return Ok(false),
        };
        if elements.len() != count {
            return Ok(false);
        }

        for (pattern, element) in patterns.iter().zip(&elements) {
            match pattern {
                Value::Str(name) if name.as_ref() != "_" => {
                    self.env.define(name.as_ref(), element.clone());
                }
                _ => {}
            }
        }
        Ok(true)
    }

    /// `[(key_i, binding_i) pairs, count, has_rest, rest_binding]` beneath
    /// the scrutinee: every named key must be present in the dict; with
    /// `has_rest`, unmatched entries collect into `rest_binding`.
    fn match_dict_pattern(&mut self, value: &Value) -> Result<bool, VmError> {
        let rest_binding = self.pop("MATCH_PATTERN")?;
        let has_rest = self.pop("MATCH_PATTERN")?.is_truthy();
        let count = self.pop_pattern_count()?;

        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let binding = self.pop("MATCH_PATTERN")?;
            let key = self.pop("MATCH_PATTERN")?;
            match (key, binding) {
                (Value::Str(key), Value::Str(binding)) => fields.push((key, binding)),
                _ => return Err(self.fault("dict pattern fields must be string pairs")),
            }
        }

        let Value::Dict(map) = value else {
            return Ok(false);
        };
        let entries = map.lock().clone();

        let mut matched_keys = Vec::with_capacity(fields.len());
        for (key, binding) in fields.iter().rev() {
            let dict_key = DictKey::Str(key.clone());
            let Some(found) = entries.get(&dict_key) else {
                return Ok(false);
            };
            self.env.define(binding.as_ref(), found.clone());
            matched_keys.push(dict_key);
        }

        if has_rest {
            let Value::Str(rest_name) = rest_binding else {
                return Err(self.fault("dict pattern rest binding must be a string"));
            };
            let mut rest: OrderedMap<DictKey, Value> = OrderedMap::default();
            for (key, val) in &entries {
                if !matched_keys.contains(key) {
                    rest.insert(key.clone(), val.clone());
                }
            }
            self.env
                .define(rest_name.as_ref(), Value::Dict(Arc::new(Mutex::new(rest))));
        }
        Ok(true)
    }

    fn pop_pattern_count(&mut self) -> Result<usize, VmError> {
        let count = self.pop("MATCH_PATTERN")?;
        count
            .as_i64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| self.fault("pattern element count must be an integer"))
    }
}

/// Coarse type-name patterns; unrecognized names never match.
fn type_pattern_matches(name: &str, value: &Value) -> bool {
    match value {
        Value::Int32(_) | Value::Int64(_) | Value::UInt64(_) => name == "int",
        Value::Float64(_) => name == "float",
        Value::Str(_) => name == "str",
        Value::Bool(_) => name == "bool",
        Value::Nil => name == "nil",
        Value::List(_) | Value::Range(_) => {
            name.starts_with("list") || name == "array" || name == "range"
        }
        Value::Tuple(_) => name.starts_with("tuple"),
        Value::Dict(_) => name.starts_with("dict") || name == "map" || name == "object",
        _ => false,
    }
}
