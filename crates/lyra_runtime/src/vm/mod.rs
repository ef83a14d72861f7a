//! The virtual machine: host facade, shared state, and the interpreter.

pub mod frames;
mod builtins;
mod dispatch;
mod exception;
mod ops;
mod prescan;

pub(crate) use dispatch::Interp;

use std::sync::Arc;

use lyra_ir::{FunctionSig, ParamSpec, Program};
use parking_lot::{Mutex, RwLock};

use crate::concurrency::ConcurrencyRuntime;
use crate::config::VmConfig;
use crate::core::types::TypeRegistry;
use crate::core::value::ModuleData;
use crate::core::{Environment, FastHashMap, Value};
use crate::errors::VmError;
use crate::gc::ClosureTracker;
use crate::registry::{ClassRegistry, FunctionRegistry, NativeFn};

/// State shared by the main interpreter and every task interpreter it spawns:
/// registries, the closure tracker, the scheduler, and the output buffer.
/// Globals are shared separately so multiple `Vm` instances stay independent.
pub struct VmShared {
    pub config: VmConfig,
    pub types: TypeRegistry,
    pub functions: RwLock<FunctionRegistry>,
    pub classes: RwLock<ClassRegistry>,
    pub modules: RwLock<FastHashMap<String, Value>>,
    pub tracker: ClosureTracker,
    pub concurrency: ConcurrencyRuntime,
    pub output: Mutex<String>,
}

impl VmShared {
    pub fn write_output(&self, text: &str) {
        self.output.lock().push_str(text);
    }
}

/// Host-facing VM instance.
///
/// Registries and globals persist across `execute` calls; the operand stack
/// does not.
pub struct Vm {
    shared: Arc<VmShared>,
    globals: Arc<Environment>,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let concurrency = ConcurrencyRuntime::new(config.worker_threads);
        let shared = Arc::new(VmShared {
            config,
            types: TypeRegistry::new(),
            functions: RwLock::new(FunctionRegistry::new()),
            classes: RwLock::new(ClassRegistry::new()),
            modules: RwLock::new(FastHashMap::default()),
            tracker: ClosureTracker::new(),
            concurrency,
            output: Mutex::new(String::new()),
        });
        builtins::install(&mut shared.functions.write());
        Self {
            shared,
            globals: Environment::root(),
        }
    }

    /// Runs a program to completion and returns the `Halt` value
    /// (top-of-stack, or Nil on an empty stack).
    pub fn execute(&mut self, program: &Program) -> Result<Value, VmError> {
        let code: Arc<[lyra_ir::Instruction]> = Arc::from(program.as_slice());
        prescan::prescan(
            &code,
            &mut self.shared.functions.write(),
            &mut self.shared.classes.write(),
        )?;
        let mut interp = Interp::new(self.shared.clone(), code, self.globals.clone());
        interp.run()
    }

    /// Registers a host function. `fallible` marks it as error-union
    /// returning, so calls to it run under a wildcard error frame.
    pub fn register_native_function(
        &mut self,
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        fallible: bool,
        f: NativeFn,
    ) {
        let mut sig = FunctionSig::new(name);
        sig.params = params;
        sig.throws = fallible;
        self.shared.functions.write().register_native(sig, f);
    }

    /// Registers signature metadata for a user function whose body arrives
    /// inline in a later program (return annotation, throws flag).
    pub fn register_user_function(&mut self, sig: FunctionSig) {
        self.shared.functions.write().register_signature(sig);
    }

    pub fn register_module(&mut self, name: impl Into<String>, exports: Vec<(String, Value)>) {
        let name = name.into();
        let module = ModuleData {
            name: name.clone(),
            exports: exports.into_iter().collect(),
        };
        self.shared
            .modules
            .write()
            .insert(name, Value::Module(Arc::new(module)));
    }

    pub fn globals(&self) -> &Arc<Environment> {
        &self.globals
    }

    /// Number of parallel/concurrent blocks currently executing.
    pub fn active_blocks(&self) -> usize {
        self.shared.concurrency.active_blocks()
    }

    pub fn output(&self) -> String {
        self.shared.output.lock().clone()
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.shared.output.lock())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
