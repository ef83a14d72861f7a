//! Error-union propagation.

use crate::core::Value;
use crate::errors::VmError;
use crate::vm::Interp;

impl Interp {
    /// Walks the error-frame stack top-down looking for a handler that
    /// accepts the raised error's type. On a match the operand stack is
    /// truncated to the frame's base, call frames pushed since are unwound,
    /// the error value is pushed, and execution resumes at the handler.
    /// Exhausting every frame is an unhandled-error diagnostic.
    pub(crate) fn propagate(&mut self, err_value: Value) -> Result<(), VmError> {
        let payload = err_value
            .error_payload()
            .cloned()
            .ok_or_else(|| self.fault("PROPAGATE on a non-error value"))?;
        self.last_exception = Some(payload.clone());

        while let Some(frame) = self.error_frames.pop() {
            if !frame.matches(&payload.error_type) {
                continue;
            }
            tracing::trace!(
                error_type = %payload.error_type,
                handler = frame.handler,
                "error frame matched"
            );
            if let Some((start, end)) = self.task_body {
                // A handler outside the task body belongs to the parent
                // interpreter; the task finishes with the error value as its
                // result and the parent's block policy takes over.
                if frame.handler < start || frame.handler >= end {
                    self.stack.push(err_value);
                    self.ip = self.code.len();
                    return Ok(());
                }
            }
            self.stack.truncate(frame.stack_base);
            self.frames.truncate(frame.frames_base);
            self.env = frame.env.clone();
            self.stack.push(err_value);
            self.ip = frame.handler;
            return Ok(());
        }

        Err(VmError::Unhandled {
            error_type: payload.error_type,
            message: payload.message,
            line: self.line,
        })
    }
}
