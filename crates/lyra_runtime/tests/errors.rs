use lyra_ir::{FunctionSig, Instruction, Op, TypeNote};
use lyra_runtime::{Value, Vm, VmError};

fn program(ops: Vec<Op>) -> Vec<Instruction> {
    ops.into_iter().map(Instruction::from).collect()
}

fn run(ops: Vec<Op>) -> Result<Value, VmError> {
    let mut vm = Vm::new();
    vm.execute(&program(ops))
}

fn throwing_sig(name: &str) -> FunctionSig {
    let mut sig = FunctionSig::new(name);
    sig.throws = true;
    sig
}

fn risky_def() -> Vec<Op> {
    vec![
        Op::BeginFunction("risky".into()),
        Op::PushString("kaput".into()),
        Op::ConstructError { type_name: "Boom".into(), argc: 1 },
        Op::PropagateError,
        Op::EndFunction,
    ]
}

#[test]
fn unhandled_error_reports_type_and_message() {
    let err = run(vec![
        Op::ConstructError { type_name: "Boom".into(), argc: 0 },
        Op::PropagateError,
        Op::Halt,
    ])
    .unwrap_err();
    let VmError::Unhandled { error_type, message, .. } = &err else {
        panic!("expected unhandled, got {err:?}");
    };
    assert_eq!(error_type, "Boom");
    assert_eq!(message, "Error occurred");
    assert!(err.to_string().contains("Unhandled error: Boom"), "{err}");
}

#[test]
fn fallible_call_resumes_at_handler_with_error_on_stack() {
    let mut vm = Vm::new();
    vm.register_user_function(throwing_sig("risky"));

    let mut ops = risky_def();
    let call_at = ops.len();
    ops.extend([
        Op::Call { name: "risky".into(), argc: 0 },
        Op::CheckError,
        Op::JumpIfFalse(call_at + 4),
        Op::Halt,
        Op::PushString("no error".into()),
        Op::Halt,
    ]);

    let result = vm.execute(&program(ops)).unwrap();
    assert!(result.is_error());
    let payload = result.error_payload().unwrap();
    assert_eq!(payload.error_type, "Boom");
    assert_eq!(payload.message, "kaput");
}

#[test]
fn handler_restores_operand_stack_depth() {
    let mut vm = Vm::new();
    vm.register_user_function(throwing_sig("risky"));

    let mut ops = risky_def();
    ops.extend([
        Op::PushInt(7),
        Op::Call { name: "risky".into(), argc: 0 },
        Op::Pop,
        Op::Halt,
    ]);

    let result = vm.execute(&program(ops)).unwrap();
    assert_eq!(result.as_i64(), Some(7));
}

#[test]
fn clean_return_discards_the_error_frame() {
    let mut vm = Vm::new();
    vm.register_user_function(throwing_sig("safe"));

    let ops = vec![
        Op::BeginFunction("safe".into()),
        Op::PushInt(5),
        Op::Return,
        Op::EndFunction,
        Op::Call { name: "safe".into(), argc: 0 },
        Op::Pop,
        Op::PushString("late".into()),
        Op::ConstructError { type_name: "Boom".into(), argc: 1 },
        Op::PropagateError,
        Op::Halt,
    ];

    let err = vm.execute(&program(ops)).unwrap_err();
    assert!(matches!(err, VmError::Unhandled { .. }), "{err:?}");
}

#[test]
fn returned_error_survives_until_caller_checks_it() {
    let mut vm = Vm::new();
    vm.register_user_function(throwing_sig("risky"));

    // Body returns the error value instead of propagating it.
    let ops = vec![
        Op::BeginFunction("risky".into()),
        Op::PushString("kaput".into()),
        Op::ConstructError { type_name: "Boom".into(), argc: 1 },
        Op::Return,
        Op::EndFunction,
        Op::Call { name: "risky".into(), argc: 0 },
        Op::Halt,
    ];

    let result = vm.execute(&program(ops)).unwrap();
    assert!(result.is_error());
    assert_eq!(result.error_payload().unwrap().message, "kaput");
}

#[test]
fn check_error_is_non_destructive() {
    let result = run(vec![
        Op::PushInt(1),
        Op::PushInt(0),
        Op::Divide,
        Op::CheckError,
        Op::Halt,
    ])
    .unwrap();
    assert!(matches!(result, Value::Bool(true)), "{result:?}");
}

#[test]
fn is_error_and_is_success_consume_the_operand() {
    let result = run(vec![
        Op::ConstructError { type_name: "Boom".into(), argc: 0 },
        Op::IsError,
        Op::Halt,
    ])
    .unwrap();
    assert!(matches!(result, Value::Bool(true)), "{result:?}");

    let result = run(vec![Op::PushInt(1), Op::IsSuccess, Op::Halt]).unwrap();
    assert!(matches!(result, Value::Bool(true)), "{result:?}");
}

#[test]
fn unwrap_yields_the_raw_success_value() {
    let result = run(vec![
        Op::PushInt(7),
        Op::ConstructOk,
        Op::UnwrapValue,
        Op::Halt,
    ])
    .unwrap();
    assert!(matches!(result, Value::Int32(7)), "{result:?}");
}

#[test]
fn unwrap_on_plain_value_is_identity() {
    let result = run(vec![Op::PushInt(3), Op::UnwrapValue, Op::Halt]).unwrap();
    assert!(matches!(result, Value::Int32(3)), "{result:?}");
}

#[test]
fn unwrap_on_error_propagates() {
    let err = run(vec![
        Op::ConstructError { type_name: "Boom".into(), argc: 0 },
        Op::UnwrapValue,
        Op::Halt,
    ])
    .unwrap_err();
    assert!(matches!(err, VmError::Unhandled { .. }), "{err:?}");
}

#[test]
fn propagate_without_error_faults() {
    let err = run(vec![Op::PropagateError, Op::Halt]).unwrap_err();
    assert!(err.to_string().contains("No error to propagate"), "{err}");
}

#[test]
fn assert_failure_is_fatal_and_skips_handlers() {
    let mut vm = Vm::new();
    vm.register_user_function(throwing_sig("checked"));

    let ops = vec![
        Op::BeginFunction("checked".into()),
        Op::PushBool(false),
        Op::Call { name: "assert".into(), argc: 1 },
        Op::EndFunction,
        Op::Call { name: "checked".into(), argc: 0 },
        Op::Halt,
    ];

    let err = vm.execute(&program(ops)).unwrap_err();
    assert!(err.is_fatal(), "{err:?}");
    assert!(
        err.to_string().contains("Assertion failed: condition is false"),
        "{err}"
    );
}

#[test]
fn require_reports_the_given_message() {
    let err = run(vec![
        Op::PushBool(false),
        Op::PushString("positive".into()),
        Op::Call { name: "require".into(), argc: 2 },
        Op::Halt,
    ])
    .unwrap_err();
    assert!(err.is_fatal(), "{err:?}");
    assert!(err.to_string().contains("Contract violation: positive"), "{err}");
}

#[test]
fn construct_error_takes_message_from_first_string_argument() {
    let result = run(vec![
        Op::PushInt(3),
        Op::PushString("went wrong".into()),
        Op::ConstructError { type_name: "IoError".into(), argc: 2 },
        Op::Halt,
    ])
    .unwrap();
    let payload = result.error_payload().unwrap();
    assert_eq!(payload.error_type, "IoError");
    assert_eq!(payload.message, "went wrong");
    assert_eq!(payload.args.len(), 2);
}

fn typed_sig(name: &str, errors: &[&str]) -> FunctionSig {
    let mut sig = FunctionSig::new(name);
    sig.return_type = TypeNote::ErrorUnion {
        success: Box::new(TypeNote::Dynamic),
        errors: errors.iter().map(|e| e.to_string()).collect(),
    };
    sig
}

#[test]
fn declared_error_type_is_caught_at_the_call_site() {
    let mut vm = Vm::new();
    vm.register_user_function(typed_sig("risky", &["Boom"]));

    let mut ops = risky_def();
    ops.extend([Op::Call { name: "risky".into(), argc: 0 }, Op::Halt]);

    let result = vm.execute(&program(ops)).unwrap();
    assert!(result.is_error());
    assert_eq!(result.error_payload().unwrap().error_type, "Boom");
}

#[test]
fn undeclared_error_type_skips_the_typed_frame() {
    let mut vm = Vm::new();
    vm.register_user_function(typed_sig("risky", &["IoError"]));

    let mut ops = risky_def();
    ops.extend([Op::Call { name: "risky".into(), argc: 0 }, Op::Halt]);

    let err = vm.execute(&program(ops)).unwrap_err();
    let VmError::Unhandled { error_type, .. } = &err else {
        panic!("expected unhandled, got {err:?}");
    };
    assert_eq!(error_type, "Boom");
}

#[test]
fn error_union_frame_accepts_any_declared_member() {
    let mut vm = Vm::new();
    vm.register_user_function(typed_sig("risky", &["IoError", "Boom"]));

    let mut ops = risky_def();
    ops.extend([Op::Call { name: "risky".into(), argc: 0 }, Op::Halt]);

    let result = vm.execute(&program(ops)).unwrap();
    assert!(result.is_error());
    assert_eq!(result.error_payload().unwrap().error_type, "Boom");
}
