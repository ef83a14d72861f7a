//! Diagnostics for VM execution.
//!
//! Three classes of failure leave the interpreter through `VmError`:
//! faults (bad bytecode or operands), unhandled language errors (error-union
//! propagation exhausted every frame), and fatal violations (assertions and
//! contracts, which bypass every handler). Recoverable language errors never
//! appear here; they travel as error-union `Value`s on the operand stack.

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum VmError {
    #[error("line {line}: {message}")]
    Fault { message: String, line: u32 },

    #[error("line {line}: Unhandled error: {error_type} - {message}")]
    Unhandled {
        error_type: String,
        message: String,
        line: u32,
    },

    #[error("line {line}: {message}")]
    Fatal { message: String, line: u32 },
}

impl VmError {
    pub fn fault(message: impl Into<String>, line: u32) -> Self {
        VmError::Fault { message: message.into(), line }
    }

    pub fn fatal(message: impl Into<String>, line: u32) -> Self {
        VmError::Fatal { message: message.into(), line }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, VmError::Fatal { .. })
    }

    /// Attaches a source line to a diagnostic raised without one
    /// (native functions do not see the instruction stream).
    pub fn with_line(mut self, new_line: u32) -> Self {
        match &mut self {
            VmError::Fault { line, .. }
            | VmError::Unhandled { line, .. }
            | VmError::Fatal { line, .. } => {
                if *line == 0 {
                    *line = new_line;
                }
            }
        }
        self
    }

    pub fn line(&self) -> u32 {
        match self {
            VmError::Fault { line, .. }
            | VmError::Unhandled { line, .. }
            | VmError::Fatal { line, .. } => *line,
        }
    }
}

pub mod messages {
    pub const STACK_UNDERFLOW: &str = "Stack underflow";
    pub const NUMERIC_OPERANDS: &str = "expected numeric operands (int or float)";
    pub const NOT_A_LIST: &str = "Value is not a list";
    pub const NOT_A_DICT: &str = "Value is not a dictionary";
    pub const NOT_ITERABLE: &str = "Value is not iterable";
    pub const NOT_AN_ITERATOR: &str = "Value is not an iterator";
    pub const NOT_INDEXABLE: &str = "Value is not indexable";
    pub const INDEX_OUT_OF_RANGE: &str = "Index out of range";
    pub const BAD_DICT_KEY: &str = "Dictionary key must be a string, integer, or boolean";
    pub const RANGE_STEP_ZERO: &str = "Range step must not be zero";
    pub const INT_OVERFLOW: &str = "Integer overflow";
    pub const RETURN_OUTSIDE_FUNCTION: &str = "RETURN outside of a function";
    pub const INVALID_CLOSURE: &str = "Invalid closure value";
    pub const NO_ERROR_TO_PROPAGATE: &str = "No error to propagate";
    pub const CHANNEL_CLOSED: &str = "send on closed channel";
    pub const END_WITHOUT_BLOCK: &str = "Block end without a matching block begin";
    pub const TASK_OUTSIDE_BLOCK: &str = "Task outside of a parallel or concurrent block";
}

/// Formats a stack-underflow fault with the opcode position.
pub(crate) fn stack_underflow(ip: usize, what: &str) -> String {
    format!("{} at ip {} ({})", messages::STACK_UNDERFLOW, ip, what)
}
