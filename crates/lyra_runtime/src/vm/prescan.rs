//! Definition pre-scan.
//!
//! Function and class bodies are inline in the flat instruction stream. This
//! pass walks it once before execution, matching `BeginFunction`/`EndFunction`
//! and `BeginClass`/`EndClass` by nesting depth, and registers every function
//! body range, parameter list, literal default, class shape, and method key
//! (`Class::name`) so forward references resolve before anything runs.

use lyra_ir::{FunctionSig, Instruction, Op, ParamSpec};

use crate::core::{FastHashMap, OrderedMap, Value};
use crate::errors::VmError;
use crate::registry::{ClassDef, ClassRegistry, FunctionRegistry};

struct FnScan {
    key: String,
    start: usize,
    sig: FunctionSig,
    defaults: FastHashMap<String, Value>,
}

struct ClassScan {
    name: String,
    superclass: Option<String>,
    field_defaults: OrderedMap<String, Value>,
}

/// Value of a literal push, used for parameter and field defaults.
fn literal_value(op: &Op) -> Option<Value> {
    match op {
        Op::PushInt(v) => Some(int_literal(*v)),
        Op::PushFloat(v) => Some(Value::Float64(*v)),
        Op::PushBool(v) => Some(Value::Bool(*v)),
        Op::PushString(s) => Some(Value::str(s)),
        Op::PushNil => Some(Value::Nil),
        _ => None,
    }
}

fn int_literal(v: i64) -> Value {
    match i32::try_from(v) {
        Ok(small) => Value::Int32(small),
        Err(_) => Value::Int64(v),
    }
}

/// Literal at `ip - 1`, for `SetDefaultValue`/`DefineField` which consume the
/// immediately preceding push.
fn preceding_literal(code: &[Instruction], ip: usize) -> Option<Value> {
    ip.checked_sub(1).and_then(|prev| literal_value(&code[prev].op))
}

/// Computes the body start for a function beginning at `begin`: past the
/// parameter definitions and their literal defaults.
fn body_start(code: &[Instruction], begin: usize, end: usize) -> usize {
    let mut ip = begin + 1;
    while ip < end {
        match &code[ip].op {
            Op::DefineParam(_) | Op::DefineOptionalParam(_) => ip += 1,
            op if literal_value(op).is_some()
                && matches!(code.get(ip + 1).map(|i| &i.op), Some(Op::SetDefaultValue(_))) =>
            {
                ip += 2;
            }
            _ => break,
        }
    }
    ip
}

pub(crate) fn prescan(
    code: &[Instruction],
    funcs: &mut FunctionRegistry,
    classes: &mut ClassRegistry,
) -> Result<(), VmError> {
    let mut fn_stack: Vec<FnScan> = Vec::new();
    let mut class_stack: Vec<ClassScan> = Vec::new();

    for (ip, inst) in code.iter().enumerate() {
        match &inst.op {
            Op::BeginFunction(name) => {
                let key = match (fn_stack.is_empty(), class_stack.last()) {
                    (true, Some(class)) => format!("{}::{}", class.name, name),
                    _ => name.clone(),
                };
                fn_stack.push(FnScan {
                    sig: FunctionSig::new(key.clone()),
                    key,
                    start: ip,
                    defaults: FastHashMap::default(),
                });
            }
            Op::EndFunction => {
                let scan = fn_stack.pop().ok_or_else(|| {
                    VmError::fault("END_FUNCTION without BEGIN_FUNCTION", inst.line)
                })?;
                let body = (body_start(code, scan.start, ip), ip);
                let mut sig = scan.sig;
                sig.name = scan.key;
                funcs.register_inline(sig, body, scan.defaults);
            }
            Op::DefineParam(name) => {
                if let Some(scan) = fn_stack.last_mut() {
                    scan.sig.params.push(ParamSpec::required(name.clone()));
                }
            }
            Op::DefineOptionalParam(name) => {
                if let Some(scan) = fn_stack.last_mut() {
                    scan.sig.params.push(ParamSpec::optional(name.clone()));
                }
            }
            Op::SetDefaultValue(name) => {
                if let Some(scan) = fn_stack.last_mut() {
                    let value = preceding_literal(code, ip).unwrap_or(Value::Nil);
                    scan.defaults.insert(name.clone(), value);
                }
            }
            Op::BeginClass(name) => {
                class_stack.push(ClassScan {
                    name: name.clone(),
                    superclass: None,
                    field_defaults: OrderedMap::default(),
                });
            }
            Op::SetSuperclass(superclass) => {
                if let Some(scan) = class_stack.last_mut() {
                    scan.superclass = Some(superclass.clone());
                }
            }
            Op::DefineField(name) => {
                if fn_stack.is_empty() {
                    if let Some(scan) = class_stack.last_mut() {
                        let value = preceding_literal(code, ip).unwrap_or(Value::Nil);
                        scan.field_defaults.insert(name.clone(), value);
                    }
                }
            }
            Op::EndClass => {
                let scan = class_stack
                    .pop()
                    .ok_or_else(|| VmError::fault("END_CLASS without BEGIN_CLASS", inst.line))?;
                classes.register(ClassDef {
                    name: scan.name,
                    superclass: scan.superclass,
                    field_defaults: scan.field_defaults,
                });
            }
            _ => {}
        }
    }

    if let Some(open) = fn_stack.last() {
        return Err(VmError::fault(
            format!("unterminated function definition '{}'", open.key),
            code[open.start].line,
        ));
    }
    if let Some(open) = class_stack.last() {
        return Err(VmError::fault(
            format!("unterminated class definition '{}'", open.name),
            0,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyra_ir::Instruction;

    fn program(ops: Vec<Op>) -> Vec<Instruction> {
        ops.into_iter().map(Instruction::from).collect()
    }

    #[test]
    fn registers_nested_functions_with_ranges() {
        let code = program(vec![
            Op::BeginFunction("outer".into()),
            Op::DefineParam("a".into()),
            Op::BeginFunction("inner".into()),
            Op::PushNil,
            Op::Return,
            Op::EndFunction,
            Op::PushNil,
            Op::Return,
            Op::EndFunction,
            Op::Halt,
        ]);
        let mut funcs = FunctionRegistry::new();
        let mut classes = ClassRegistry::new();
        prescan(&code, &mut funcs, &mut classes).unwrap();

        let outer = funcs.get("outer").unwrap();
        assert_eq!(outer.body, Some((2, 8)));
        assert_eq!(outer.sig.required_count(), 1);
        let inner = funcs.get("inner").unwrap();
        assert_eq!(inner.body, Some((3, 5)));
    }

    #[test]
    fn collects_optional_defaults_from_literal_prefix() {
        let code = program(vec![
            Op::BeginFunction("f".into()),
            Op::DefineParam("a".into()),
            Op::DefineOptionalParam("b".into()),
            Op::PushInt(9),
            Op::SetDefaultValue("b".into()),
            Op::PushNil,
            Op::Return,
            Op::EndFunction,
        ]);
        let mut funcs = FunctionRegistry::new();
        let mut classes = ClassRegistry::new();
        prescan(&code, &mut funcs, &mut classes).unwrap();

        let f = funcs.get("f").unwrap();
        assert_eq!(f.body, Some((5, 7)));
        assert!(f.sig.accepts_argc(1));
        assert!(f.sig.accepts_argc(2));
        assert!(!f.sig.accepts_argc(3));
        assert_eq!(f.defaults.get("b").and_then(|v| v.as_i64()), Some(9));
    }

    #[test]
    fn registers_methods_under_class_key() {
        let code = program(vec![
            Op::BeginClass("Point".into()),
            Op::PushInt(0),
            Op::DefineField("x".into()),
            Op::BeginFunction("init".into()),
            Op::DefineParam("x".into()),
            Op::PushNil,
            Op::Return,
            Op::EndFunction,
            Op::EndClass,
        ]);
        let mut funcs = FunctionRegistry::new();
        let mut classes = ClassRegistry::new();
        prescan(&code, &mut funcs, &mut classes).unwrap();

        assert!(funcs.contains("Point::init"));
        let class = classes.get("Point").unwrap();
        assert_eq!(class.field_defaults.get("x").and_then(|v| v.as_i64()), Some(0));
    }

    #[test]
    fn unbalanced_definitions_fault() {
        let code = program(vec![Op::BeginFunction("f".into()), Op::Halt]);
        let mut funcs = FunctionRegistry::new();
        let mut classes = ClassRegistry::new();
        assert!(prescan(&code, &mut funcs, &mut classes).is_err());
    }
}
