//! Stack-based bytecode interpreter for a dynamically typed language with
//! error-union values, closures, classes, and structured concurrency.
//!
//! The host builds a [`Program`] (a flat `Vec<Instruction>`), hands it to
//! [`Vm::execute`], and gets back the `Halt` value. Function and class bodies
//! live inline in the instruction stream; a pre-scan pass registers them
//! before the main loop runs, and the loop skips definition regions so bodies
//! execute only when called.
//!
//! ```
//! use lyra_ir::{Instruction, Op};
//! use lyra_runtime::{Value, Vm};
//!
//! let program: Vec<Instruction> = vec![
//!     Op::PushInt(2).into(),
//!     Op::PushInt(3).into(),
//!     Op::Add.into(),
//!     Op::Halt.into(),
//! ];
//! let mut vm = Vm::new();
//! assert!(matches!(vm.execute(&program), Ok(Value::Int64(5))));
//! ```

pub mod concurrency;
pub mod config;
pub mod core;
pub mod errors;
pub mod gc;
pub mod registry;
pub mod vm;

pub use lyra_ir::{FunctionSig, Instruction, Op, ParamSpec, Program, TypeNote};

pub use crate::concurrency::Channel;
pub use crate::config::VmConfig;
pub use crate::core::value::{DictKey, ErrorValue, UnionPayload};
pub use crate::core::{Environment, Value, value_eq};
pub use crate::errors::VmError;
pub use crate::registry::NativeFn;
pub use crate::vm::Vm;
