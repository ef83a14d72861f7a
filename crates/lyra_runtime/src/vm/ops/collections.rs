//! Collection construction, indexing, and the iterator protocol.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::value::{IterCursor, RangeValue};
use crate::core::{OrderedMap, Value};
use crate::errors::{VmError, messages};
use crate::vm::Interp;

impl Interp {
    pub(crate) fn op_create_list(&mut self, n: usize) -> Result<(), VmError> {
        let items = self.pop_args(n, "CREATE_LIST")?;
        self.stack.push(Value::list(items));
        Ok(())
    }

    pub(crate) fn op_create_tuple(&mut self, n: usize) -> Result<(), VmError> {
        let items = self.pop_args(n, "CREATE_TUPLE")?;
        self.stack.push(Value::tuple(items));
        Ok(())
    }

    /// Pops `n` (key, value) pairs pushed in order.
    pub(crate) fn op_create_dict(&mut self, n: usize) -> Result<(), VmError> {
        let flat = self.pop_args(n * 2, "CREATE_DICT")?;
        let mut map = OrderedMap::default();
        for pair in flat.chunks_exact(2) {
            let key = pair[0]
                .dict_key()
                .ok_or_else(|| self.fault(messages::BAD_DICT_KEY))?;
            map.insert(key, pair[1].clone());
        }
        self.stack.push(Value::Dict(Arc::new(Mutex::new(map))));
        Ok(())
    }

    pub(crate) fn op_create_range(&mut self) -> Result<(), VmError> {
        let end = self.pop("CREATE_RANGE")?;
        let start = self.pop("CREATE_RANGE")?;
        let (Some(start), Some(end)) = (start.as_i64(), end.as_i64()) else {
            return Err(self.fault("range bounds must be integers"));
        };
        self.stack
            .push(Value::Range(Arc::new(RangeValue { start, end, step: 1 })));
        Ok(())
    }

    pub(crate) fn op_set_range_step(&mut self) -> Result<(), VmError> {
        let step = self.pop("SET_RANGE_STEP")?;
        let range = self.pop("SET_RANGE_STEP")?;
        let Some(step) = step.as_i64() else {
            return Err(self.fault("range step must be an integer"));
        };
        if step == 0 {
            return Err(self.fault(messages::RANGE_STEP_ZERO));
        }
        let Value::Range(r) = &range else {
            return Err(self.fault("SET_RANGE_STEP on a non-range value"));
        };
        self.stack.push(Value::Range(Arc::new(RangeValue {
            start: r.start,
            end: r.end,
            step,
        })));
        Ok(())
    }

    pub(crate) fn op_get_index(&mut self) -> Result<(), VmError> {
        let index = self.pop("GET_INDEX")?;
        let target = self.pop("GET_INDEX")?;
        let value = match &target {
            Value::List(items) => {
                let items = items.lock();
                let idx = self.list_index(&index, items.len())?;
                items[idx].clone()
            }
            Value::Tuple(items) => {
                let idx = self.list_index(&index, items.len())?;
                items[idx].clone()
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let idx = self.list_index(&index, chars.len())?;
                Value::str(chars[idx].to_string())
            }
            Value::Dict(map) => {
                let key = index
                    .dict_key()
                    .ok_or_else(|| self.fault(messages::BAD_DICT_KEY))?;
                map.lock().get(&key).cloned().ok_or_else(|| {
                    self.fault(format!("Key not found: {}", index.to_display_string()))
                })?
            }
            other => {
                return Err(self.fault(format!(
                    "{}: {}",
                    messages::NOT_INDEXABLE,
                    other.type_name()
                )));
            }
        };
        self.stack.push(value);
        Ok(())
    }

    pub(crate) fn op_set_index(&mut self) -> Result<(), VmError> {
        let value = self.pop("SET_INDEX")?;
        let index = self.pop("SET_INDEX")?;
        let target = self.pop("SET_INDEX")?;
        match &target {
            Value::List(items) => {
                let mut items = items.lock();
                let idx = self.list_index(&index, items.len())?;
                items[idx] = value;
            }
            Value::Dict(map) => {
                let key = index
                    .dict_key()
                    .ok_or_else(|| self.fault(messages::BAD_DICT_KEY))?;
                map.lock().insert(key, value);
            }
            other => {
                return Err(self.fault(format!(
                    "{}: {}",
                    messages::NOT_INDEXABLE,
                    other.type_name()
                )));
            }
        }
        Ok(())
    }

    fn list_index(&self, index: &Value, len: usize) -> Result<usize, VmError> {
        let idx = index
            .as_i64()
            .ok_or_else(|| self.fault("index must be an integer"))?;
        usize::try_from(idx)
            .ok()
            .filter(|i| *i < len)
            .ok_or_else(|| {
                self.fault(format!("{}: {idx} (len {len})", messages::INDEX_OUT_OF_RANGE))
            })
    }

    /// Builds a cursor for any iterable value.
    pub(crate) fn make_cursor(&self, value: &Value) -> Result<IterCursor, VmError> {
        match value {
            Value::List(items) => Ok(IterCursor::List {
                items: items.lock().clone(),
                idx: 0,
            }),
            Value::Tuple(items) => Ok(IterCursor::List {
                items: items.as_ref().clone(),
                idx: 0,
            }),
            Value::Range(r) => Ok(IterCursor::Range {
                next: r.start,
                end: r.end,
                step: r.step,
            }),
            Value::Dict(map) => Ok(IterCursor::Dict {
                pairs: map.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                idx: 0,
            }),
            Value::Str(s) => Ok(IterCursor::Str {
                chars: s.chars().collect(),
                idx: 0,
            }),
            other => Err(self.fault(format!(
                "{}: {}",
                messages::NOT_ITERABLE,
                other.type_name()
            ))),
        }
    }

    pub(crate) fn op_get_iterator(&mut self) -> Result<(), VmError> {
        let value = self.pop("GET_ITERATOR")?;
        let cursor = self.make_cursor(&value)?;
        self.stack
            .push(Value::Iterator(Arc::new(Mutex::new(cursor))));
        Ok(())
    }

    /// Peeks the iterator (leaving it in place for the loop) and pushes
    /// whether another element remains.
    pub(crate) fn op_iter_has_next(&mut self) -> Result<(), VmError> {
        let Value::Iterator(cursor) = self.peek("ITER_HAS_NEXT")? else {
            return Err(self.fault(messages::NOT_AN_ITERATOR));
        };
        let has = cursor.lock().has_next();
        self.stack.push(Value::Bool(has));
        Ok(())
    }

    pub(crate) fn op_iter_next(&mut self) -> Result<(), VmError> {
        let Value::Iterator(cursor) = self.peek("ITER_NEXT")? else {
            return Err(self.fault(messages::NOT_AN_ITERATOR));
        };
        let next = cursor.lock().next();
        let value = next.ok_or_else(|| self.fault("Iterator exhausted"))?;
        self.stack.push(value);
        Ok(())
    }

    pub(crate) fn op_iter_next_key_value(&mut self) -> Result<(), VmError> {
        let Value::Iterator(cursor) = self.peek("ITER_NEXT_KEY_VALUE")? else {
            return Err(self.fault(messages::NOT_AN_ITERATOR));
        };
        let next = cursor.lock().next_key_value();
        let (key, value) = next.ok_or_else(|| self.fault("Iterator exhausted"))?;
        self.stack.push(key);
        self.stack.push(value);
        Ok(())
    }
}
