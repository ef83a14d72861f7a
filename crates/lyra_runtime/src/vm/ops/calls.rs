//! Call resolution, returns, closures, and object member access.
//!
//! Resolution order for `Call { name, argc }`:
//! 1. function-valued top-of-stack referring to a user function,
//! 2. empty callee name: callee value sits under the arguments,
//! 3. `method:`/`super:` prefix: receiver under the arguments,
//! 4. bare registered class name: construction (+ `init`),
//! 5. variable bound to a closure,
//! 6. registry lookup (native or user) with default application,
//! 7. otherwise "function not found".

use std::sync::Arc;

use lyra_ir::{FunctionSig, TypeNote};
use parking_lot::Mutex;

use crate::core::types::{ErrorUnionType, Type};
use crate::core::value::{ClosureData, ErrorValue, ObjectData};
use crate::core::{Environment, Value};
use crate::errors::{VmError, messages};
use crate::registry::{FunctionDef, FunctionKind};
use crate::vm::Interp;
use crate::vm::frames::{CallFrame, ErrorFrame};

impl Interp {
    pub(crate) fn op_call(&mut self, name: &str, argc: usize) -> Result<(), VmError> {
        // Tier 1: a function-valued reference on top of the stack, naming a
        // registered user function.
        if let Some(Value::Function(fname)) = self.stack.last() {
            let fname = fname.to_string();
            let is_user = self
                .shared
                .functions
                .read()
                .get(&fname)
                .is_some_and(|d| !d.is_native());
            if is_user {
                self.stack.pop();
                return self.call_registered(&fname, argc);
            }
        }

        // Tier 2: empty callee name, callee value under the arguments.
        if name.is_empty() {
            return self.call_popped_callee(argc);
        }

        // Tier 3: method dispatch.
        if let Some(method) = name.strip_prefix("method:") {
            return self.call_method(method, argc, false);
        }
        if let Some(method) = name.strip_prefix("super:") {
            return self.call_method(method, argc, true);
        }

        // Tier 4: bare class name constructs an instance.
        if self.shared.classes.read().contains(name) {
            return self.construct(name, argc);
        }

        // Tier 5: variable bound to a closure.
        if let Some(Value::Closure(closure)) = self.env.get(name) {
            return self.call_closure(&closure, argc);
        }

        // Tier 6: registry lookup.
        if self.shared.functions.read().contains(name) {
            return self.call_registered(name, argc);
        }

        // Tier 7.
        Err(self.fault(format!("Function not found: {name}")))
    }

    fn call_popped_callee(&mut self, argc: usize) -> Result<(), VmError> {
        let idx = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or_else(|| self.fault(messages::STACK_UNDERFLOW))?;
        let callee = self.stack.remove(idx);
        match callee {
            Value::Function(name) => self.call_registered(&name, argc),
            Value::Closure(closure) => self.call_closure(&closure, argc),
            Value::Str(name) => {
                // Module-qualified names resolve through the module table.
                if let Some((module, func)) = name.split_once('.') {
                    let exported = self
                        .shared
                        .modules
                        .read()
                        .get(module)
                        .cloned()
                        .and_then(|m| match m {
                            Value::Module(data) => data.exports.get(func).cloned(),
                            _ => None,
                        })
                        .ok_or_else(|| {
                            self.fault(format!("Function not found: {module}.{func}"))
                        })?;
                    return match exported {
                        Value::Function(n) => self.call_registered(&n, argc),
                        Value::Closure(c) => self.call_closure(&c, argc),
                        other => {
                            Err(self.fault(format!("{} is not callable", other.type_name())))
                        }
                    };
                }
                self.call_registered(&name, argc)
            }
            other => Err(self.fault(format!("{} is not callable", other.type_name()))),
        }
    }

    /// Tier 6 body: native or user function by registry name, with argument
    /// validation and default application.
    pub(crate) fn call_registered(&mut self, name: &str, argc: usize) -> Result<(), VmError> {
        let def = self
            .shared
            .functions
            .read()
            .get(name)
            .ok_or_else(|| self.fault(format!("Function not found: {name}")))?;
        self.check_argc(&def, name, argc)?;
        let mut args = self.pop_args(argc, "CALL")?;
        self.apply_defaults(&def, &mut args);

        match &def.kind {
            FunctionKind::Native(f) => {
                let result = f(&args).map_err(|e| e.with_line(self.line))?;
                self.stack.push(result);
                Ok(())
            }
            FunctionKind::User => {
                let body = def
                    .body
                    .ok_or_else(|| self.fault(format!("Function has no body: {name}")))?;
                let callee_env = Environment::child(&self.globals);
                self.bind_params(&def, &args, &callee_env);
                let expected = self.declared_errors(&def.sig);
                self.enter(
                    name,
                    body.0,
                    callee_env,
                    def.is_fallible(),
                    expected,
                    false,
                    false,
                    None,
                );
                Ok(())
            }
        }
    }

    /// Tier 3 body: resolve the receiver under the arguments and dispatch
    /// through its class chain (or the channel built-ins).
    fn call_method(&mut self, method: &str, argc: usize, via_super: bool) -> Result<(), VmError> {
        let idx = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or_else(|| self.fault(messages::STACK_UNDERFLOW))?;
        let receiver = self.stack.remove(idx);

        if let Value::Channel(channel) = &receiver {
            let channel = channel.clone();
            return self.call_channel_method(&channel, method, argc);
        }

        let Value::Object(obj) = &receiver else {
            return Err(self.fault(format!(
                "cannot call method '{method}' on {}",
                receiver.type_name()
            )));
        };

        let start_class = if via_super {
            self.shared
                .classes
                .read()
                .get(&obj.class_name)
                .and_then(|c| c.superclass.clone())
                .ok_or_else(|| {
                    self.fault(format!("class {} has no superclass", obj.class_name))
                })?
        } else {
            obj.class_name.clone()
        };

        let resolved = {
            let classes = self.shared.classes.read();
            let funcs = self.shared.functions.read();
            classes.resolve_method(&funcs, &start_class, method)
        };
        let (key, def) = resolved.ok_or_else(|| {
            self.fault(format!("Method not found: {start_class}::{method}"))
        })?;

        self.check_argc(&def, &key, argc)?;
        let mut args = self.pop_args(argc, "CALL")?;
        self.apply_defaults(&def, &mut args);

        let body = def
            .body
            .ok_or_else(|| self.fault(format!("Method has no body: {key}")))?;
        let callee_env = Environment::child(&self.globals);
        callee_env.define("this", receiver.clone());
        self.bind_params(&def, &args, &callee_env);
        let expected = self.declared_errors(&def.sig);
        self.enter(
            &key,
            body.0,
            callee_env,
            def.is_fallible(),
            expected,
            false,
            false,
            None,
        );
        Ok(())
    }

    fn call_channel_method(
        &mut self,
        channel: &Arc<crate::concurrency::Channel>,
        method: &str,
        argc: usize,
    ) -> Result<(), VmError> {
        let mut args = self.pop_args(argc, "CALL")?;
        match (method, args.len()) {
            ("send", 1) => {
                let value = args.pop().unwrap_or(Value::Nil);
                if channel.send(value) {
                    self.stack.push(Value::Nil);
                    Ok(())
                } else {
                    let err = Value::from_error(ErrorValue::new(
                        "ChannelClosed",
                        messages::CHANNEL_CLOSED,
                        self.line,
                    ));
                    self.propagate(err)
                }
            }
            ("receive", 0) => {
                let (value, ok) = channel.receive();
                self.stack.push(Value::tuple(vec![value, Value::Bool(ok)]));
                Ok(())
            }
            ("close", 0) => {
                channel.close();
                self.stack.push(Value::Nil);
                Ok(())
            }
            _ => Err(self.fault(format!(
                "channel has no method '{method}' taking {argc} arguments"
            ))),
        }
    }

    /// Tier 4 body: allocate the instance, apply inherited field defaults,
    /// then run `init` when the class chain defines one. The constructor
    /// frame pushes the receiver on return regardless of the body's value.
    fn construct(&mut self, class_name: &str, argc: usize) -> Result<(), VmError> {
        let fields = self.shared.classes.read().collect_field_defaults(class_name);
        let receiver = Value::Object(Arc::new(ObjectData {
            class_name: class_name.to_string(),
            fields: Mutex::new(fields),
        }));

        let resolved = {
            let classes = self.shared.classes.read();
            let funcs = self.shared.functions.read();
            classes.resolve_method(&funcs, class_name, "init")
        };

        match resolved {
            Some((key, def)) => {
                self.check_argc(&def, &key, argc)?;
                let mut args = self.pop_args(argc, "CALL")?;
                self.apply_defaults(&def, &mut args);
                let body = def
                    .body
                    .ok_or_else(|| self.fault(format!("Method has no body: {key}")))?;
                let callee_env = Environment::child(&self.globals);
                callee_env.define("this", receiver.clone());
                self.bind_params(&def, &args, &callee_env);
                let expected = self.declared_errors(&def.sig);
                self.enter(
                    &key,
                    body.0,
                    callee_env,
                    def.is_fallible(),
                    expected,
                    false,
                    true,
                    Some(receiver),
                );
                Ok(())
            }
            None => {
                if argc != 0 {
                    return Err(self.fault(format!(
                        "class {class_name} has no init taking {argc} arguments"
                    )));
                }
                self.stack.push(receiver);
                Ok(())
            }
        }
    }

    /// Tier 5 body: call through a closure value.
    pub(crate) fn call_closure(
        &mut self,
        closure: &Arc<ClosureData>,
        argc: usize,
    ) -> Result<(), VmError> {
        if !closure.is_valid() {
            return Err(self.fault(messages::INVALID_CLOSURE));
        }
        let def = self
            .shared
            .functions
            .read()
            .get(&closure.function_name)
            .ok_or_else(|| {
                self.fault(format!("Function not found: {}", closure.function_name))
            })?;
        self.check_argc(&def, &closure.function_name, argc)?;
        let mut args = self.pop_args(argc, "CALL")?;
        self.apply_defaults(&def, &mut args);

        let callee_env = Environment::child(&closure.env);
        self.bind_params(&def, &args, &callee_env);
        let name = closure.function_name.clone();
        let expected = self.declared_errors(&def.sig);
        self.enter(
            &name,
            closure.start,
            callee_env,
            def.is_fallible(),
            expected,
            true,
            false,
            None,
        );
        Ok(())
    }

    /// Error expectation from the callee's declared return annotation. One
    /// declared error name matches only itself; several build a union
    /// descriptor; a bare `throws` keeps the wildcard frame.
    fn declared_errors(&self, sig: &FunctionSig) -> Option<Arc<Type>> {
        let TypeNote::ErrorUnion { errors, .. } = &sig.return_type else {
            return None;
        };
        match errors.as_slice() {
            [] => None,
            [only] => Some(self.shared.types.user_defined(only)),
            many => Some(self.shared.types.error_union(ErrorUnionType {
                error_names: many.to_vec(),
                is_generic: false,
            })),
        }
    }

    fn check_argc(&self, def: &FunctionDef, name: &str, argc: usize) -> Result<(), VmError> {
        if def.sig.accepts_argc(argc) {
            Ok(())
        } else {
            Err(self.fault(format!(
                "{name} expects {} to {} arguments, got {argc}",
                def.sig.required_count(),
                def.sig.total_count()
            )))
        }
    }

    /// Extends missing optional arguments with registered defaults, else Nil.
    fn apply_defaults(&self, def: &FunctionDef, args: &mut Vec<Value>) {
        for param in def.sig.params.iter().skip(args.len()) {
            let value = def
                .defaults
                .get(&param.name)
                .cloned()
                .unwrap_or(Value::Nil);
            args.push(value);
        }
    }

    fn bind_params(&self, def: &FunctionDef, args: &[Value], env: &Arc<Environment>) {
        for (param, value) in def.sig.params.iter().zip(args.iter()) {
            env.define(param.name.clone(), value.clone());
        }
    }

    /// Pushes the call frame (and, for fallible targets, an error frame
    /// carrying the declared expectation) and transfers to the body.
    #[allow(clippy::too_many_arguments)]
    fn enter(
        &mut self,
        name: &str,
        body_start: usize,
        callee_env: Arc<Environment>,
        fallible: bool,
        expected: Option<Arc<Type>>,
        is_closure_call: bool,
        is_constructor: bool,
        this: Option<Value>,
    ) {
        if fallible {
            self.error_frames.push(ErrorFrame {
                handler: self.ip,
                stack_base: self.stack.len(),
                frames_base: self.frames.len(),
                expected,
                function_name: name.to_string(),
                env: self.env.clone(),
            });
        }
        self.frames.push(CallFrame {
            function_name: name.to_string(),
            return_address: self.ip,
            stack_base: self.stack.len(),
            previous_env: self.env.clone(),
            is_closure_call,
            is_constructor,
            this,
        });
        self.env = callee_env;
        self.ip = body_start;
    }

    /// Return transfer. Pops the matching error frame only when the returned
    /// value is not itself an error; an error-carrying return leaves the
    /// frame for the caller's propagation step.
    pub(crate) fn op_return(&mut self) -> Result<(), VmError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| self.fault(messages::RETURN_OUTSIDE_FUNCTION))?;
        self.note_return();

        let mut ret = if self.stack.len() > frame.stack_base {
            self.stack.pop().unwrap_or(Value::Nil)
        } else {
            Value::Nil
        };
        self.stack.truncate(frame.stack_base);

        if frame.is_constructor {
            ret = frame.this.clone().unwrap_or(Value::Nil);
        }

        if !ret.is_error() {
            if let Some(top) = self.error_frames.last() {
                if top.function_name == frame.function_name {
                    self.error_frames.pop();
                }
            }
        }

        self.env = frame.previous_env;
        self.ip = frame.return_address;
        self.stack.push(ret);
        Ok(())
    }

    /// `CreateClosure`: pop the captured (name, value) pairs, snapshot them
    /// into a closure environment rooted at the globals, and register the
    /// closure with the tracker.
    pub(crate) fn op_create_closure(&mut self, name: &str, captures: usize) -> Result<(), VmError> {
        let mut pairs = Vec::with_capacity(captures);
        for _ in 0..captures {
            let value = self.pop("CREATE_CLOSURE")?;
            let key = match self.pop("CREATE_CLOSURE")? {
                Value::Str(s) => s.to_string(),
                other => {
                    return Err(self.fault(format!(
                        "captured variable name must be a string, got {}",
                        other.type_name()
                    )));
                }
            };
            pairs.push((key, value));
        }
        pairs.reverse();

        let body = self
            .shared
            .functions
            .read()
            .get(name)
            .and_then(|d| d.body)
            .ok_or_else(|| self.fault(format!("Function not found: {name}")))?;

        let env = crate::gc::capture_environment(&self.globals, &pairs);
        let closure = Arc::new(ClosureData {
            id: self.shared.tracker.next_id(),
            function_name: name.to_string(),
            start: body.0,
            end: body.1,
            env,
            captured: pairs.into_iter().map(|(n, _)| n).collect(),
        });
        self.shared.tracker.register(&closure);
        self.stack.push(Value::Closure(closure));
        Ok(())
    }

    pub(crate) fn op_get_property(&mut self, name: &str) -> Result<(), VmError> {
        let target = self.pop("GET_PROPERTY")?;
        let value = match &target {
            Value::Object(obj) => obj.fields.lock().get(name).cloned().ok_or_else(|| {
                self.fault(format!("Unknown property '{name}' on {}", obj.class_name))
            })?,
            Value::Module(module) => module.exports.get(name).cloned().ok_or_else(|| {
                self.fault(format!("module {} has no export '{name}'", module.name))
            })?,
            other => {
                return Err(self.fault(format!(
                    "cannot read property '{name}' of {}",
                    other.type_name()
                )));
            }
        };
        self.stack.push(value);
        Ok(())
    }

    pub(crate) fn op_set_property(&mut self, name: &str) -> Result<(), VmError> {
        let value = self.pop("SET_PROPERTY")?;
        let target = self.pop("SET_PROPERTY")?;
        match &target {
            Value::Object(obj) => {
                obj.fields.lock().insert(name.to_string(), value);
                Ok(())
            }
            other => Err(self.fault(format!(
                "cannot write property '{name}' of {}",
                other.type_name()
            ))),
        }
    }
}
