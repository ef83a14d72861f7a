//! The fetch-execute loop.
//!
//! One `Interp` per execution: the main `Vm::execute` call owns one, and
//! every task spawned by a parallel/concurrent block owns an isolated one
//! over the same instruction stream, sharing the registries, scheduler, and
//! globals through `VmShared`. A task interpreter sees the whole stream (so
//! calls into functions defined anywhere in it still work) and finishes when
//! the instruction pointer reaches its body's end at call depth zero.
//!
//! The instruction pointer advances before dispatch; handlers that transfer
//! control assign absolute targets.

use std::sync::Arc;

use lyra_ir::{Instruction, Op};
use smallvec::SmallVec;

use crate::concurrency::BlockExecutionState;
use crate::core::value::ErrorValue;
use crate::core::{Environment, Value, value_eq};
use crate::errors::{VmError, messages, stack_underflow};
use crate::vm::VmShared;
use crate::vm::frames::{CallFrame, ErrorFrame};

pub(crate) struct Interp {
    pub shared: Arc<VmShared>,
    pub code: Arc<[Instruction]>,
    pub globals: Arc<Environment>,
    pub env: Arc<Environment>,

    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    pub error_frames: SmallVec<[ErrorFrame; 8]>,
    pub temps: Vec<Option<Value>>,
    pub last_exception: Option<ErrorValue>,

    /// Active parallel/concurrent blocks, innermost last.
    pub blocks: Vec<Arc<BlockExecutionState>>,
    pub task_loop_var: Option<String>,

    pub ip: usize,
    /// `[start, end)` of the task body when this interpreter runs one task;
    /// the run loop ends at `end` once every call frame has returned.
    pub task_body: Option<(usize, usize)>,
    /// Source line of the instruction being executed.
    pub line: u32,

    instr_count: u64,
    return_count: u64,
}

impl Interp {
    pub fn new(shared: Arc<VmShared>, code: Arc<[Instruction]>, globals: Arc<Environment>) -> Self {
        Self {
            shared,
            code,
            env: globals.clone(),
            globals,
            stack: Vec::with_capacity(64),
            frames: Vec::new(),
            error_frames: SmallVec::new(),
            temps: Vec::new(),
            last_exception: None,
            blocks: Vec::new(),
            task_loop_var: None,
            ip: 0,
            task_body: None,
            line: 0,
            instr_count: 0,
            return_count: 0,
        }
    }

    /// Isolated interpreter for one task: own stack/ip/env, shared everything
    /// else. The full instruction stream stays reachable so the task can call
    /// functions whose inline bodies sit outside the block.
    pub fn for_task(
        shared: Arc<VmShared>,
        code: Arc<[Instruction]>,
        globals: Arc<Environment>,
        env: Arc<Environment>,
        error_frames: Vec<ErrorFrame>,
        body: (usize, usize),
    ) -> Self {
        let mut interp = Self::new(shared, code, globals);
        interp.env = env;
        interp.error_frames = error_frames.into();
        interp.ip = body.0;
        interp.task_body = Some(body);
        interp
    }

    pub fn run(&mut self) -> Result<Value, VmError> {
        let code = self.code.clone();
        let limit = code.len();
        let sweep_mask = self.shared.config.sweep_every_instrs.max(1) - 1;
        // Depth of the definition region currently being skipped. Bodies are
        // inline; they execute only when entered via Call.
        let mut skip_depth = 0usize;

        while self.ip < limit {
            if let Some((_, end)) = self.task_body {
                // The task is done once its body is exhausted and every call
                // made from it has returned.
                if self.ip == end && self.frames.is_empty() {
                    break;
                }
            }
            let inst = &code[self.ip];
            self.ip += 1;
            self.line = inst.line;
            self.instr_count += 1;
            if self.instr_count & sweep_mask == 0 {
                self.shared.tracker.sweep();
            }

            if skip_depth > 0 {
                match &inst.op {
                    Op::BeginFunction(_) | Op::BeginClass(_) => skip_depth += 1,
                    Op::EndFunction | Op::EndClass => skip_depth -= 1,
                    _ => {}
                }
                continue;
            }

            match &inst.op {
                // Definitions were registered by the pre-scan; skip the body.
                Op::BeginFunction(_) | Op::BeginClass(_) => skip_depth = 1,
                // Falling off a function body is an implicit `return nil`.
                Op::EndFunction => self.op_return()?,
                Op::EndClass => {
                    return Err(self.fault("unexpected END_CLASS"));
                }

                Op::PushInt(v) => self.stack.push(Self::int_value(*v)),
                Op::PushFloat(v) => self.stack.push(Value::Float64(*v)),
                Op::PushBool(v) => self.stack.push(Value::Bool(*v)),
                Op::PushString(s) => self.stack.push(Value::str(s)),
                Op::PushNil => self.stack.push(Value::Nil),
                Op::Pop => {
                    self.pop("POP")?;
                }
                Op::Dup => {
                    let top = self.peek("DUP")?.clone();
                    self.stack.push(top);
                }
                Op::Swap => {
                    let len = self.stack.len();
                    if len < 2 {
                        return Err(self.fault(stack_underflow(self.ip - 1, "SWAP")));
                    }
                    self.stack.swap(len - 1, len - 2);
                }

                Op::StoreVar(name) => self.op_store_var(name)?,
                Op::LoadVar(name) => self.op_load_var(name)?,
                Op::StoreTemp(slot) => self.op_store_temp(*slot)?,
                Op::LoadTemp(slot) => self.op_load_temp(*slot)?,
                Op::ClearTemp(slot) => self.op_clear_temp(*slot),
                Op::DefineAtomic(name) => self.op_define_atomic(name)?,

                Op::Add => self.op_add()?,
                Op::Subtract => self.op_subtract()?,
                Op::Multiply => self.op_multiply()?,
                Op::Divide => self.op_divide()?,
                Op::Modulo => self.op_modulo()?,
                Op::Power => self.op_power()?,
                Op::Negate => self.op_negate()?,
                Op::Concat(parts) => self.op_concat(*parts)?,

                Op::Equal => {
                    let b = self.pop("EQUAL")?;
                    let a = self.pop("EQUAL")?;
                    self.stack.push(Value::Bool(value_eq(&a, &b)));
                }
                Op::NotEqual => {
                    let b = self.pop("NOT_EQUAL")?;
                    let a = self.pop("NOT_EQUAL")?;
                    self.stack.push(Value::Bool(!value_eq(&a, &b)));
                }
                Op::Less => self.op_compare("LESS", |o| o.is_lt())?,
                Op::LessEqual => self.op_compare("LESS_EQUAL", |o| o.is_le())?,
                Op::Greater => self.op_compare("GREATER", |o| o.is_gt())?,
                Op::GreaterEqual => self.op_compare("GREATER_EQUAL", |o| o.is_ge())?,
                Op::And => {
                    let b = self.pop("AND")?;
                    let a = self.pop("AND")?;
                    self.stack.push(Value::Bool(a.is_truthy() && b.is_truthy()));
                }
                Op::Or => {
                    let b = self.pop("OR")?;
                    let a = self.pop("OR")?;
                    self.stack.push(Value::Bool(a.is_truthy() || b.is_truthy()));
                }
                Op::Not => {
                    let a = self.pop("NOT")?;
                    self.stack.push(Value::Bool(!a.is_truthy()));
                }

                Op::Jump(target) => self.ip = *target,
                Op::JumpIfFalse(target) => {
                    let cond = self.pop("JUMP_IF_FALSE")?;
                    if !cond.is_truthy() {
                        self.ip = *target;
                    }
                }
                Op::JumpIfTrue(target) => {
                    let cond = self.pop("JUMP_IF_TRUE")?;
                    if cond.is_truthy() {
                        self.ip = *target;
                    }
                }
                Op::Call { name, argc } => {
                    let name = name.clone();
                    self.op_call(&name, *argc)?;
                }
                Op::Return => self.op_return()?,
                Op::Halt => {
                    return Ok(self.stack.pop().unwrap_or(Value::Nil));
                }

                Op::DefineParam(_) | Op::DefineOptionalParam(_) | Op::SetDefaultValue(_) => {
                    return Err(self.fault("parameter definition outside of a function"));
                }
                Op::SetSuperclass(_) | Op::DefineField(_) => {
                    return Err(self.fault("class member definition outside of a class"));
                }
                Op::PushFunction(name) => self.op_push_function(name)?,
                Op::CreateClosure { name, captures } => {
                    let name = name.clone();
                    self.op_create_closure(&name, *captures)?;
                }

                Op::GetProperty(name) => self.op_get_property(name)?,
                Op::SetProperty(name) => self.op_set_property(name)?,
                Op::LoadThis => self.op_load_this("THIS")?,
                Op::LoadSuper => self.op_load_this("SUPER")?,

                Op::CreateList(n) => self.op_create_list(*n)?,
                Op::CreateDict(n) => self.op_create_dict(*n)?,
                Op::CreateTuple(n) => self.op_create_tuple(*n)?,
                Op::CreateRange => self.op_create_range()?,
                Op::SetRangeStep => self.op_set_range_step()?,
                Op::GetIndex => self.op_get_index()?,
                Op::SetIndex => self.op_set_index()?,

                Op::GetIterator => self.op_get_iterator()?,
                Op::IterHasNext => self.op_iter_has_next()?,
                Op::IterNext => self.op_iter_next()?,
                Op::IterNextKeyValue => self.op_iter_next_key_value()?,

                Op::BeginScope => self.env = Environment::child(&self.env),
                Op::EndScope => {
                    let parent = self
                        .env
                        .parent()
                        .cloned()
                        .ok_or_else(|| self.fault("END_SCOPE at the root scope"))?;
                    self.env = parent;
                }

                Op::ConstructError { type_name, argc } => {
                    let type_name = type_name.clone();
                    self.op_construct_error(&type_name, *argc)?;
                }
                Op::ConstructOk => self.op_construct_ok()?,
                Op::CheckError => self.op_check_error()?,
                Op::IsError => {
                    let v = self.pop("IS_ERROR")?;
                    self.stack.push(Value::Bool(v.is_error()));
                }
                Op::IsSuccess => {
                    let v = self.pop("IS_SUCCESS")?;
                    self.stack.push(Value::Bool(!v.is_error()));
                }
                Op::UnwrapValue => self.op_unwrap_value()?,
                Op::PropagateError => self.op_propagate_error()?,

                Op::MatchPattern => self.op_match_pattern()?,

                // Enum definitions are registry-only: each variant binds its
                // own name in the defining environment.
                Op::BeginEnum(_) | Op::EndEnum => {}
                Op::DefineEnumVariant(name) | Op::DefineEnumVariantWithType(name) => {
                    self.env.define(name.clone(), Value::str(name));
                }

                Op::BeginParallel(params) => {
                    let params = params.clone();
                    self.op_begin_block(crate::concurrency::BlockKind::Parallel, &params)?;
                }
                Op::EndParallel => self.op_end_block(crate::concurrency::BlockKind::Parallel)?,
                Op::BeginConcurrent(params) => {
                    let params = params.clone();
                    self.op_begin_block(crate::concurrency::BlockKind::Concurrent, &params)?;
                }
                Op::EndConcurrent => {
                    self.op_end_block(crate::concurrency::BlockKind::Concurrent)?
                }
                Op::BeginTask(loop_var) => self.op_begin_task(loop_var)?,
                Op::EndTask => self.op_end_task()?,
                Op::StoreIterable => self.op_store_iterable()?,

                Op::Print(argc) => self.op_print(*argc)?,
            }
        }

        Ok(self.stack.pop().unwrap_or(Value::Nil))
    }

    /// Small integer literals stay 32-bit; arithmetic promotes to Int64.
    pub(crate) fn int_value(v: i64) -> Value {
        match i32::try_from(v) {
            Ok(small) => Value::Int32(small),
            Err(_) => Value::Int64(v),
        }
    }

    pub(crate) fn fault(&self, message: impl Into<String>) -> VmError {
        VmError::fault(message, self.line)
    }

    pub(crate) fn pop(&mut self, what: &str) -> Result<Value, VmError> {
        self.stack
            .pop()
            .ok_or_else(|| self.fault_at(stack_underflow(self.ip.saturating_sub(1), what)))
    }

    pub(crate) fn peek(&self, what: &str) -> Result<&Value, VmError> {
        self.stack
            .last()
            .ok_or_else(|| self.fault_at(stack_underflow(self.ip.saturating_sub(1), what)))
    }

    fn fault_at(&self, message: String) -> VmError {
        VmError::fault(message, self.line)
    }

    /// Pops `argc` values, preserving push order.
    pub(crate) fn pop_args(&mut self, argc: usize, what: &str) -> Result<Vec<Value>, VmError> {
        let base = self
            .stack
            .len()
            .checked_sub(argc)
            .ok_or_else(|| self.fault_at(stack_underflow(self.ip.saturating_sub(1), what)))?;
        Ok(self.stack.split_off(base))
    }

    pub(crate) fn note_return(&mut self) {
        self.return_count += 1;
        let every = self.shared.config.sweep_every_returns.max(1);
        if self.return_count % every == 0 {
            self.shared.tracker.sweep();
        }
    }

    fn op_store_var(&mut self, name: &str) -> Result<(), VmError> {
        let value = self.pop("STORE_VAR")?;
        if !self.env.assign(name, value.clone()) {
            self.env.define(name, value);
        }
        Ok(())
    }

    fn op_load_var(&mut self, name: &str) -> Result<(), VmError> {
        if let Some(value) = self.env.get(name) {
            self.stack.push(value);
            return Ok(());
        }
        if self.shared.functions.read().contains(name) {
            self.stack.push(Value::Function(Arc::from(name)));
            return Ok(());
        }
        if let Some(module) = self.shared.modules.read().get(name) {
            self.stack.push(module.clone());
            return Ok(());
        }
        Err(self.fault(format!("Undefined variable: {name}")))
    }

    fn op_store_temp(&mut self, slot: usize) -> Result<(), VmError> {
        let value = self.pop("STORE_TEMP")?;
        if self.temps.len() <= slot {
            self.temps.resize(slot + 1, None);
        }
        self.temps[slot] = Some(value);
        Ok(())
    }

    fn op_load_temp(&mut self, slot: usize) -> Result<(), VmError> {
        let value = self
            .temps
            .get(slot)
            .and_then(|v| v.clone())
            .ok_or_else(|| self.fault(format!("empty temp slot {slot}")))?;
        self.stack.push(value);
        Ok(())
    }

    fn op_clear_temp(&mut self, slot: usize) {
        if let Some(v) = self.temps.get_mut(slot) {
            *v = None;
        }
    }

    fn op_define_atomic(&mut self, name: &str) -> Result<(), VmError> {
        let init = self.pop("DEFINE_ATOMIC")?;
        let init = init
            .as_i64()
            .ok_or_else(|| self.fault("atomic variables require an integer initializer"))?;
        self.env.define(
            name,
            Value::Atomic(Arc::new(std::sync::atomic::AtomicI64::new(init))),
        );
        Ok(())
    }

    fn op_push_function(&mut self, name: &str) -> Result<(), VmError> {
        if !self.shared.functions.read().contains(name) {
            return Err(self.fault(format!("Function not found: {name}")));
        }
        self.stack.push(Value::Function(Arc::from(name)));
        Ok(())
    }

    fn op_load_this(&mut self, what: &str) -> Result<(), VmError> {
        let this = self
            .env
            .get("this")
            .ok_or_else(|| self.fault(format!("{what} outside of a method")))?;
        self.stack.push(this);
        Ok(())
    }

    fn op_print(&mut self, argc: usize) -> Result<(), VmError> {
        let args = self.pop_args(argc, "PRINT")?;
        let mut text = String::new();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                text.push(' ');
            }
            arg.display_into(&mut text);
        }
        text.push('\n');
        self.shared.write_output(&text);
        Ok(())
    }

    fn op_concat(&mut self, parts: usize) -> Result<(), VmError> {
        let args = self.pop_args(parts, "CONCAT")?;
        let mut text = String::new();
        for arg in &args {
            arg.display_into(&mut text);
        }
        self.stack.push(Value::str(text));
        Ok(())
    }

    fn op_compare(
        &mut self,
        what: &str,
        accept: fn(std::cmp::Ordering) -> bool,
    ) -> Result<(), VmError> {
        let b = self.pop(what)?;
        let a = self.pop(what)?;
        let ordering = if a.is_numeric() && b.is_numeric() {
            match (a.is_float() || b.is_float(), a.as_i64(), b.as_i64()) {
                (false, Some(x), Some(y)) => x.cmp(&y),
                _ => {
                    let x = a.as_f64().unwrap_or(f64::NAN);
                    let y = b.as_f64().unwrap_or(f64::NAN);
                    x.partial_cmp(&y)
                        .ok_or_else(|| self.fault("comparison with NaN"))?
                }
            }
        } else if let (Value::Str(x), Value::Str(y)) = (&a, &b) {
            x.cmp(y)
        } else {
            return Err(self.fault(format!(
                "cannot compare {} and {}, {}",
                a.type_name(),
                b.type_name(),
                messages::NUMERIC_OPERANDS
            )));
        };
        self.stack.push(Value::Bool(accept(ordering)));
        Ok(())
    }
}
