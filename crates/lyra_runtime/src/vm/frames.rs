//! Call frames and error frames.

use std::sync::Arc;

use crate::core::types::Type;
use crate::core::Environment;

/// One active invocation.
#[derive(Clone, Debug)]
pub struct CallFrame {
    pub function_name: String,
    /// Instruction to resume at after `Return` (the one past the call site).
    pub return_address: usize,
    /// Operand-stack depth at entry, after arguments were popped.
    pub stack_base: usize,
    pub previous_env: Arc<Environment>,
    pub is_closure_call: bool,
    /// Constructor frames return the receiver, discarding the body's value.
    pub is_constructor: bool,
    pub this: Option<crate::core::Value>,
}

/// One registered error handler scope.
///
/// Pushed before transferring into a fallible call; popped on success-return,
/// on a propagation match, or when propagation exhausts the stack.
#[derive(Clone, Debug)]
pub struct ErrorFrame {
    /// Instruction the loop resumes at when this frame matches.
    pub handler: usize,
    /// Operand-stack depth to restore before pushing the error value.
    pub stack_base: usize,
    /// Call-frame depth to unwind to.
    pub frames_base: usize,
    /// `None` is a wildcard. A named type must equal the raised error's
    /// type; a union must admit it.
    pub expected: Option<Arc<Type>>,
    pub function_name: String,
    /// Environment active at the call site.
    pub env: Arc<Environment>,
}

impl ErrorFrame {
    pub fn matches(&self, error_type: &str) -> bool {
        match &self.expected {
            None => true,
            Some(t) => match &**t {
                Type::ErrorUnion(u) => u.admits(error_type),
                Type::UserDefined(name) => name == error_type,
            },
        }
    }
}
