//! Built-in native functions installed into every VM.

use std::sync::Arc;

use lyra_ir::{FunctionSig, ParamSpec};

use crate::concurrency::Channel;
use crate::core::Value;
use crate::errors::VmError;
use crate::registry::{FunctionRegistry, NativeFn};

fn native(
    funcs: &mut FunctionRegistry,
    name: &str,
    params: Vec<ParamSpec>,
    f: impl Fn(&[Value]) -> Result<Value, VmError> + Send + Sync + 'static,
) {
    let mut sig = FunctionSig::new(name);
    sig.params = params;
    funcs.register_native(sig, Arc::new(f) as NativeFn);
}

pub(crate) fn install(funcs: &mut FunctionRegistry) {
    // `channel()` is unbounded; `channel(n)` blocks senders at n queued
    // values.
    native(
        funcs,
        "channel",
        vec![ParamSpec::optional("capacity")],
        |args| {
            let channel = match args.first() {
                None | Some(Value::Nil) => Channel::unbounded(),
                Some(arg) => {
                    let cap = arg
                        .as_i64()
                        .and_then(|n| usize::try_from(n).ok())
                        .filter(|n| *n > 0)
                        .ok_or_else(|| {
                            VmError::fault("channel capacity must be a positive integer", 0)
                        })?;
                    Channel::with_capacity(Some(cap))
                }
            };
            Ok(Value::Channel(Arc::new(channel)))
        },
    );

    native(funcs, "len", vec![ParamSpec::required("value")], |args| {
        let n = match &args[0] {
            Value::Str(s) => s.chars().count(),
            Value::List(items) => items.lock().len(),
            Value::Tuple(items) => items.len(),
            Value::Dict(map) => map.lock().len(),
            other => {
                return Err(VmError::fault(
                    format!("len() does not apply to {}", other.type_name()),
                    0,
                ));
            }
        };
        Ok(Value::Int64(n as i64))
    });

    native(funcs, "str", vec![ParamSpec::required("value")], |args| {
        Ok(Value::str(args[0].to_display_string()))
    });

    native(funcs, "type_of", vec![ParamSpec::required("value")], |args| {
        Ok(Value::str(args[0].type_name()))
    });

    // Assertion and contract checks terminate execution regardless of any
    // enclosing error frame.
    native(
        funcs,
        "assert",
        vec![ParamSpec::required("condition"), ParamSpec::optional("message")],
        |args| {
            if args[0].is_truthy() {
                return Ok(Value::Nil);
            }
            let detail = args
                .get(1)
                .filter(|m| !matches!(m, Value::Nil))
                .map(|m| m.to_display_string())
                .unwrap_or_else(|| "condition is false".to_string());
            Err(VmError::fatal(format!("Assertion failed: {detail}"), 0))
        },
    );

    native(
        funcs,
        "require",
        vec![ParamSpec::required("condition"), ParamSpec::optional("message")],
        |args| {
            if args[0].is_truthy() {
                return Ok(Value::Nil);
            }
            let detail = args
                .get(1)
                .filter(|m| !matches!(m, Value::Nil))
                .map(|m| m.to_display_string())
                .unwrap_or_else(|| "condition is false".to_string());
            Err(VmError::fatal(format!("Contract violation: {detail}"), 0))
        },
    );
}
