use lyra_ir::{Instruction, Op};
use lyra_runtime::{Value, Vm, VmError};

fn program(ops: Vec<Op>) -> Vec<Instruction> {
    ops.into_iter().map(Instruction::from).collect()
}

fn run(ops: Vec<Op>) -> Result<Value, VmError> {
    let mut vm = Vm::new();
    vm.execute(&program(ops))
}

#[test]
fn closure_captures_a_snapshot_of_the_variable() {
    let ops = vec![
        Op::PushInt(1),
        Op::StoreVar("x".into()),
        Op::BeginFunction("get_x".into()),
        Op::LoadVar("x".into()),
        Op::Return,
        Op::EndFunction,
        Op::PushString("x".into()),
        Op::LoadVar("x".into()),
        Op::CreateClosure { name: "get_x".into(), captures: 1 },
        Op::StoreVar("f".into()),
        Op::PushInt(99),
        Op::StoreVar("x".into()),
        Op::Call { name: "f".into(), argc: 0 },
        Op::Halt,
    ];
    assert_eq!(run(ops).unwrap().as_i64(), Some(1));
}

#[test]
fn closure_takes_arguments_like_a_function() {
    let ops = vec![
        Op::BeginFunction("adder".into()),
        Op::DefineParam("y".into()),
        Op::LoadVar("x".into()),
        Op::LoadVar("y".into()),
        Op::Add,
        Op::Return,
        Op::EndFunction,
        Op::PushString("x".into()),
        Op::PushInt(5),
        Op::CreateClosure { name: "adder".into(), captures: 1 },
        Op::StoreVar("add5".into()),
        Op::PushInt(2),
        Op::Call { name: "add5".into(), argc: 1 },
        Op::Halt,
    ];
    assert_eq!(run(ops).unwrap().as_i64(), Some(7));
}

#[test]
fn closure_value_calls_through_empty_callee_name() {
    let ops = vec![
        Op::BeginFunction("sub".into()),
        Op::LoadVar("p".into()),
        Op::LoadVar("q".into()),
        Op::Subtract,
        Op::Return,
        Op::EndFunction,
        Op::PushString("p".into()),
        Op::PushInt(10),
        Op::PushString("q".into()),
        Op::PushInt(4),
        Op::CreateClosure { name: "sub".into(), captures: 2 },
        Op::Call { name: String::new(), argc: 0 },
        Op::Halt,
    ];
    assert_eq!(run(ops).unwrap().as_i64(), Some(6));
}

#[test]
fn two_closures_over_the_same_name_share_one_cell() {
    // Both closures capture `n`; once the second registers, writes through
    // either are visible to the other.
    let ops = vec![
        Op::BeginFunction("bump".into()),
        Op::LoadVar("n".into()),
        Op::PushInt(1),
        Op::Add,
        Op::StoreVar("n".into()),
        Op::LoadVar("n".into()),
        Op::Return,
        Op::EndFunction,
        Op::PushString("n".into()),
        Op::PushInt(0),
        Op::CreateClosure { name: "bump".into(), captures: 1 },
        Op::StoreVar("a".into()),
        Op::PushString("n".into()),
        Op::PushInt(0),
        Op::CreateClosure { name: "bump".into(), captures: 1 },
        Op::StoreVar("b".into()),
        Op::Call { name: "a".into(), argc: 0 },
        Op::Pop,
        Op::Call { name: "b".into(), argc: 0 },
        Op::Halt,
    ];
    assert_eq!(run(ops).unwrap().as_i64(), Some(2));
}

#[test]
fn single_closure_mutation_stays_private() {
    let ops = vec![
        Op::BeginFunction("bump".into()),
        Op::LoadVar("n".into()),
        Op::PushInt(1),
        Op::Add,
        Op::StoreVar("n".into()),
        Op::LoadVar("n".into()),
        Op::Return,
        Op::EndFunction,
        Op::PushInt(10),
        Op::StoreVar("n".into()),
        Op::PushString("n".into()),
        Op::LoadVar("n".into()),
        Op::CreateClosure { name: "bump".into(), captures: 1 },
        Op::StoreVar("c".into()),
        Op::Call { name: "c".into(), argc: 0 },
        Op::Pop,
        // The outer binding is untouched by the closure's writes.
        Op::LoadVar("n".into()),
        Op::Halt,
    ];
    assert_eq!(run(ops).unwrap().as_i64(), Some(10));
}

#[test]
fn closure_over_unknown_function_faults() {
    let err = run(vec![
        Op::PushString("x".into()),
        Op::PushInt(1),
        Op::CreateClosure { name: "ghost".into(), captures: 1 },
        Op::Halt,
    ])
    .unwrap_err();
    assert!(err.to_string().contains("Function not found"), "{err}");
}

#[test]
fn closure_displays_name_and_captures() {
    let ops = vec![
        Op::BeginFunction("adder".into()),
        Op::DefineParam("y".into()),
        Op::LoadVar("y".into()),
        Op::Return,
        Op::EndFunction,
        Op::PushString("x".into()),
        Op::PushInt(5),
        Op::CreateClosure { name: "adder".into(), captures: 1 },
        Op::Halt,
    ];
    let result = run(ops).unwrap();
    assert!(matches!(result, Value::Closure(_)), "{result:?}");
    assert_eq!(result.to_display_string(), "<closure:adder captures[x]>");
}
