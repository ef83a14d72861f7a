//! Lyra instruction set and compiler-facing metadata.
//!
//! The compiler lowers a program into a flat `Program` (instruction array);
//! the runtime consumes it together with the `FunctionSig` metadata the host
//! registers for functions whose bodies are not inline in the stream.

mod ops;
mod sig;

pub use ops::{Instruction, Op, Program};
pub use sig::{FunctionSig, ParamSpec, TypeNote};
