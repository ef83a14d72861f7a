//! Arithmetic handlers.
//!
//! Promotion matrix: Int+Int yields Int64 (overflow is a fault), any Float64
//! operand promotes the result to Float64, String concatenates with anything
//! on Add, String*Int repeats. Division and modulo by zero produce a
//! `DivisionByZero` error-union value on the stack instead of a fault.
//! An atomic left operand turns Add/Subtract into fetch-add/fetch-sub.

use std::sync::atomic::Ordering;

use crate::core::Value;
use crate::core::value::ErrorValue;
use crate::errors::{VmError, messages};
use crate::vm::Interp;

impl Interp {
    pub(crate) fn op_add(&mut self) -> Result<(), VmError> {
        let b = self.pop("ADD")?;
        let a = self.pop("ADD")?;

        if let Value::Atomic(cell) = &a {
            let delta = b
                .as_i64()
                .ok_or_else(|| self.binary_type_fault("add", &a, &b))?;
            let new = cell.fetch_add(delta, Ordering::SeqCst) + delta;
            self.stack.push(Value::Int64(new));
            return Ok(());
        }

        match (&a, &b) {
            (Value::Str(x), _) => {
                let mut s = String::with_capacity(x.len() + 8);
                s.push_str(x);
                b.display_into(&mut s);
                self.stack.push(Value::str(s));
            }
            (_, Value::Str(y)) => {
                let mut s = String::new();
                a.display_into(&mut s);
                s.push_str(y);
                self.stack.push(Value::str(s));
            }
            _ if a.is_numeric() && b.is_numeric() => {
                let result = self.numeric_binary(&a, &b, "add", |x, y| x.checked_add(y), |x, y| {
                    x + y
                })?;
                self.stack.push(result);
            }
            _ => return Err(self.binary_type_fault("add", &a, &b)),
        }
        Ok(())
    }

    pub(crate) fn op_subtract(&mut self) -> Result<(), VmError> {
        let b = self.pop("SUBTRACT")?;
        let a = self.pop("SUBTRACT")?;

        if let Value::Atomic(cell) = &a {
            let delta = b
                .as_i64()
                .ok_or_else(|| self.binary_type_fault("subtract", &a, &b))?;
            let new = cell.fetch_sub(delta, Ordering::SeqCst) - delta;
            self.stack.push(Value::Int64(new));
            return Ok(());
        }

        let result = self.numeric_binary(&a, &b, "subtract", |x, y| x.checked_sub(y), |x, y| {
            x - y
        })?;
        self.stack.push(result);
        Ok(())
    }

    pub(crate) fn op_multiply(&mut self) -> Result<(), VmError> {
        let b = self.pop("MULTIPLY")?;
        let a = self.pop("MULTIPLY")?;

        if let (Value::Str(s), Some(n)) = (&a, b.as_i64()) {
            if !b.is_float() {
                let count = usize::try_from(n).unwrap_or(0);
                self.stack.push(Value::str(s.repeat(count)));
                return Ok(());
            }
        }

        let result = self.numeric_binary(&a, &b, "multiply", |x, y| x.checked_mul(y), |x, y| {
            x * y
        })?;
        self.stack.push(result);
        Ok(())
    }

    pub(crate) fn op_divide(&mut self) -> Result<(), VmError> {
        let b = self.pop("DIVIDE")?;
        let a = self.pop("DIVIDE")?;

        if !a.is_numeric() || !b.is_numeric() {
            return Err(self.binary_type_fault("divide", &a, &b));
        }
        if self.push_if_zero_divisor(&b)? {
            return Ok(());
        }

        let result = self.numeric_binary(&a, &b, "divide", |x, y| x.checked_div(y), |x, y| {
            x / y
        })?;
        self.stack.push(result);
        Ok(())
    }

    pub(crate) fn op_modulo(&mut self) -> Result<(), VmError> {
        let b = self.pop("MODULO")?;
        let a = self.pop("MODULO")?;

        if !a.is_numeric() || !b.is_numeric() {
            return Err(self.binary_type_fault("modulo", &a, &b));
        }
        if self.push_if_zero_divisor(&b)? {
            return Ok(());
        }

        let result = self.numeric_binary(&a, &b, "modulo", |x, y| x.checked_rem(y), |x, y| {
            x % y
        })?;
        self.stack.push(result);
        Ok(())
    }

    pub(crate) fn op_power(&mut self) -> Result<(), VmError> {
        let b = self.pop("POWER")?;
        let a = self.pop("POWER")?;

        if !a.is_numeric() || !b.is_numeric() {
            return Err(self.binary_type_fault("raise", &a, &b));
        }
        if a.is_float() || b.is_float() || b.as_i64().is_none_or(|e| e < 0) {
            let x = a.as_f64().unwrap_or(f64::NAN);
            let y = b.as_f64().unwrap_or(f64::NAN);
            self.stack.push(Value::Float64(x.powf(y)));
            return Ok(());
        }
        let base = a
            .as_i64()
            .ok_or_else(|| self.fault(messages::INT_OVERFLOW))?;
        let exp = b.as_i64().and_then(|e| u32::try_from(e).ok());
        let result = exp
            .and_then(|e| base.checked_pow(e))
            .ok_or_else(|| self.fault(format!("Integer power overflow: {base}^{:?}", b.as_i64())))?;
        self.stack.push(Value::Int64(result));
        Ok(())
    }

    pub(crate) fn op_negate(&mut self) -> Result<(), VmError> {
        let a = self.pop("NEGATE")?;
        let result = match &a {
            Value::Float64(v) => Value::Float64(-v),
            _ if a.is_numeric() => {
                let v = a
                    .as_i64()
                    .and_then(i64::checked_neg)
                    .ok_or_else(|| self.fault(messages::INT_OVERFLOW))?;
                Value::Int64(v)
            }
            other => {
                return Err(self.fault(format!(
                    "cannot negate {}, {}",
                    other.type_name(),
                    messages::NUMERIC_OPERANDS
                )));
            }
        };
        self.stack.push(result);
        Ok(())
    }

    /// Integer path with overflow checking, float path on any float operand.
    fn numeric_binary(
        &self,
        a: &Value,
        b: &Value,
        verb: &str,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> Result<Value, VmError> {
        if !a.is_numeric() || !b.is_numeric() {
            return Err(self.binary_type_fault(verb, a, b));
        }
        if a.is_float() || b.is_float() {
            let x = a.as_f64().unwrap_or(f64::NAN);
            let y = b.as_f64().unwrap_or(f64::NAN);
            return Ok(Value::Float64(float_op(x, y)));
        }
        match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => int_op(x, y)
                .map(Value::Int64)
                .ok_or_else(|| self.fault(format!("Integer {verb} overflow"))),
            // A UInt64 beyond i64 range falls back to the float path.
            _ => {
                let x = a.as_f64().unwrap_or(f64::NAN);
                let y = b.as_f64().unwrap_or(f64::NAN);
                Ok(Value::Float64(float_op(x, y)))
            }
        }
    }

    /// Pushes a `DivisionByZero` error-union value when `b` is zero.
    fn push_if_zero_divisor(&mut self, b: &Value) -> Result<bool, VmError> {
        let zero = match b {
            Value::Float64(v) => *v == 0.0,
            _ => b.as_i64() == Some(0),
        };
        if zero {
            self.stack.push(Value::from_error(ErrorValue::new(
                "DivisionByZero",
                "Division by zero",
                self.line,
            )));
        }
        Ok(zero)
    }

    pub(crate) fn binary_type_fault(&self, verb: &str, a: &Value, b: &Value) -> VmError {
        self.fault(format!(
            "cannot {verb} {} and {}, {}",
            a.type_name(),
            b.type_name(),
            messages::NUMERIC_OPERANDS
        ))
    }
}
