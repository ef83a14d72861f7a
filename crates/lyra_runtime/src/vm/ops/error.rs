//! Error-union opcodes.

use crate::core::value::{ErrorValue, UnionPayload};
use crate::core::Value;
use crate::errors::{VmError, messages};
use crate::vm::Interp;

impl Interp {
    /// Builds an error-carrying union. The message comes from the first
    /// string argument, defaulting to "Error occurred".
    pub(crate) fn op_construct_error(&mut self, type_name: &str, argc: usize) -> Result<(), VmError> {
        let args = self.pop_args(argc, "CONSTRUCT_ERROR")?;
        let message = args
            .iter()
            .find_map(|a| match a {
                Value::Str(s) => Some(s.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "Error occurred".to_string());
        let error = ErrorValue {
            error_type: type_name.to_string(),
            message,
            args,
            line: self.line,
        };
        self.stack.push(Value::from_error(error));
        Ok(())
    }

    /// Wraps the top of stack as a success-carrying generic union.
    pub(crate) fn op_construct_ok(&mut self) -> Result<(), VmError> {
        let value = self.pop("CONSTRUCT_OK")?;
        self.stack.push(Value::from_ok(value));
        Ok(())
    }

    /// Non-destructive peek; pushes whether the top of stack carries an
    /// error, for a following conditional jump.
    pub(crate) fn op_check_error(&mut self) -> Result<(), VmError> {
        let is_error = self.peek("CHECK_ERROR")?.is_error();
        self.stack.push(Value::Bool(is_error));
        Ok(())
    }

    /// Success payloads unwrap to the raw success-typed value; error
    /// payloads are re-pushed and propagated.
    pub(crate) fn op_unwrap_value(&mut self) -> Result<(), VmError> {
        let value = self.pop("UNWRAP_VALUE")?;
        match &value {
            Value::Error(union) => match &union.payload {
                UnionPayload::Ok(inner) => {
                    // The raw success-typed value replaces the union.
                    self.stack.push(inner.clone());
                    Ok(())
                }
                UnionPayload::Err(_) => self.propagate(value.clone()),
            },
            _ => {
                // Already a raw value; nothing to unwrap.
                self.stack.push(value);
                Ok(())
            }
        }
    }

    /// Propagates the error on top of the stack, or the last raised error
    /// when the stack is empty.
    pub(crate) fn op_propagate_error(&mut self) -> Result<(), VmError> {
        if self.stack.last().is_some_and(Value::is_error) {
            let value = self.pop("PROPAGATE_ERROR")?;
            return self.propagate(value);
        }
        if let Some(last) = self.last_exception.clone() {
            return self.propagate(Value::from_error(last));
        }
        Err(self.fault(messages::NO_ERROR_TO_PROPAGATE))
    }
}
