use lyra_ir::{Instruction, Op};
use lyra_runtime::{Value, Vm, VmError};

fn program(ops: Vec<Op>) -> Vec<Instruction> {
    ops.into_iter().map(Instruction::from).collect()
}

fn run(ops: Vec<Op>) -> Result<Value, VmError> {
    let mut vm = Vm::new();
    vm.execute(&program(ops))
}

fn list_as_i64(value: &Value) -> Vec<i64> {
    let Value::List(items) = value else {
        panic!("expected list, got {value:?}");
    };
    items.lock().iter().map(|v| v.as_i64().unwrap()).collect()
}

#[test]
fn channel_buffers_values_in_fifo_order() {
    let result = run(vec![
        Op::Call { name: "channel".into(), argc: 0 },
        Op::StoreVar("c".into()),
        Op::LoadVar("c".into()),
        Op::PushInt(42),
        Op::Call { name: "method:send".into(), argc: 1 },
        Op::Pop,
        Op::LoadVar("c".into()),
        Op::Call { name: "method:receive".into(), argc: 0 },
        Op::PushInt(0),
        Op::GetIndex,
        Op::Halt,
    ])
    .unwrap();
    assert_eq!(result.as_i64(), Some(42));
}

#[test]
fn receive_after_close_reports_not_ok() {
    let result = run(vec![
        Op::Call { name: "channel".into(), argc: 0 },
        Op::StoreVar("c".into()),
        Op::LoadVar("c".into()),
        Op::Call { name: "method:close".into(), argc: 0 },
        Op::Pop,
        Op::LoadVar("c".into()),
        Op::Call { name: "method:receive".into(), argc: 0 },
        Op::PushInt(1),
        Op::GetIndex,
        Op::Halt,
    ])
    .unwrap();
    assert!(matches!(result, Value::Bool(false)), "{result:?}");
}

#[test]
fn send_on_closed_channel_raises() {
    let err = run(vec![
        Op::Call { name: "channel".into(), argc: 0 },
        Op::StoreVar("c".into()),
        Op::LoadVar("c".into()),
        Op::Call { name: "method:close".into(), argc: 0 },
        Op::Pop,
        Op::LoadVar("c".into()),
        Op::PushInt(1),
        Op::Call { name: "method:send".into(), argc: 1 },
        Op::Halt,
    ])
    .unwrap_err();
    let VmError::Unhandled { error_type, .. } = &err else {
        panic!("expected unhandled, got {err:?}");
    };
    assert_eq!(error_type, "ChannelClosed");
}

#[test]
fn parallel_block_collects_results_in_task_order() {
    let result = run(vec![
        Op::BeginParallel(String::new()),
        Op::BeginTask("item".into()),
        Op::PushInt(1),
        Op::PushInt(4),
        Op::CreateRange,
        Op::StoreIterable,
        Op::LoadVar("item".into()),
        Op::PushInt(10),
        Op::Multiply,
        Op::EndTask,
        Op::EndParallel,
        Op::Halt,
    ])
    .unwrap();
    assert_eq!(list_as_i64(&result), vec![10, 20, 30]);
}

#[test]
fn concurrent_block_behaves_like_parallel_for_batch_results() {
    let result = run(vec![
        Op::BeginConcurrent("mode=stream, ch=out".into()),
        Op::BeginTask("item".into()),
        Op::PushInt(0),
        Op::PushInt(3),
        Op::CreateRange,
        Op::StoreIterable,
        Op::LoadVar("item".into()),
        Op::PushInt(1),
        Op::Add,
        Op::EndTask,
        Op::EndConcurrent,
        Op::Halt,
    ])
    .unwrap();
    assert_eq!(list_as_i64(&result), vec![1, 2, 3]);
}

#[test]
fn empty_iterable_yields_empty_result_list() {
    let result = run(vec![
        Op::BeginParallel(String::new()),
        Op::BeginTask("item".into()),
        Op::CreateList(0),
        Op::StoreIterable,
        Op::LoadVar("item".into()),
        Op::EndTask,
        Op::EndParallel,
        Op::Halt,
    ])
    .unwrap();
    assert_eq!(list_as_i64(&result), Vec::<i64>::new());
}

#[test]
fn task_fault_under_stop_raises_parallel_execution_error() {
    let err = run(vec![
        Op::BeginParallel(String::new()),
        Op::BeginTask("item".into()),
        Op::PushInt(1),
        Op::PushInt(3),
        Op::CreateRange,
        Op::StoreIterable,
        Op::LoadVar("missing".into()),
        Op::EndTask,
        Op::EndParallel,
        Op::Halt,
    ])
    .unwrap_err();
    let VmError::Unhandled { error_type, message, .. } = &err else {
        panic!("expected unhandled, got {err:?}");
    };
    assert_eq!(error_type, "ParallelExecutionError");
    assert!(message.contains("2 of 2 tasks failed"), "{message}");
}

#[test]
fn one_failing_task_of_many_still_raises_under_stop() {
    let err = run(vec![
        Op::BeginParallel(String::new()),
        Op::BeginTask("item".into()),
        Op::PushInt(1),
        Op::PushInt(1),
        Op::PushInt(0),
        Op::CreateList(3),
        Op::StoreIterable,
        Op::LoadVar("item".into()),
        Op::JumpIfFalse(11),
        Op::LoadVar("item".into()),
        Op::Jump(12),
        Op::LoadVar("missing".into()),
        Op::EndTask,
        Op::EndParallel,
        Op::Halt,
    ])
    .unwrap_err();
    let VmError::Unhandled { error_type, message, .. } = &err else {
        panic!("expected unhandled, got {err:?}");
    };
    assert_eq!(error_type, "ParallelExecutionError");
    assert!(message.contains("1 of 3 tasks failed"), "{message}");
}

#[test]
fn on_error_auto_keeps_surviving_results() {
    let result = run(vec![
        Op::BeginParallel("on_error=auto".into()),
        Op::BeginTask("item".into()),
        Op::PushInt(1),
        Op::PushInt(0),
        Op::CreateList(2),
        Op::StoreIterable,
        Op::LoadVar("item".into()),
        Op::JumpIfFalse(10),
        Op::LoadVar("item".into()),
        Op::Jump(11),
        Op::LoadVar("missing".into()),
        Op::EndTask,
        Op::EndParallel,
        Op::Halt,
    ])
    .unwrap();
    assert_eq!(list_as_i64(&result), vec![1]);
}

#[test]
fn block_failure_is_catchable_by_an_error_frame() {
    let mut vm = Vm::new();
    let mut sig = lyra_ir::FunctionSig::new("work");
    sig.throws = true;
    vm.register_user_function(sig);

    let ops = vec![
        Op::BeginFunction("work".into()),
        Op::BeginParallel(String::new()),
        Op::BeginTask("item".into()),
        Op::PushInt(0),
        Op::PushInt(1),
        Op::CreateRange,
        Op::StoreIterable,
        Op::LoadVar("missing".into()),
        Op::EndTask,
        Op::EndParallel,
        Op::Return,
        Op::EndFunction,
        Op::Call { name: "work".into(), argc: 0 },
        Op::Halt,
    ];
    let result = vm.execute(&program(ops)).unwrap();
    assert!(result.is_error());
    assert_eq!(
        result.error_payload().unwrap().error_type,
        "ParallelExecutionError"
    );
}

#[test]
fn tasks_read_enclosing_bindings() {
    let result = run(vec![
        Op::PushInt(100),
        Op::StoreVar("base".into()),
        Op::BeginParallel(String::new()),
        Op::BeginTask("item".into()),
        Op::PushInt(1),
        Op::PushInt(3),
        Op::CreateRange,
        Op::StoreIterable,
        Op::LoadVar("base".into()),
        Op::LoadVar("item".into()),
        Op::Add,
        Op::EndTask,
        Op::EndParallel,
        Op::Halt,
    ])
    .unwrap();
    assert_eq!(list_as_i64(&result), vec![101, 102]);
}

#[test]
fn atomic_counter_accumulates_across_tasks() {
    let result = run(vec![
        Op::PushInt(0),
        Op::DefineAtomic("n".into()),
        Op::BeginParallel(String::new()),
        Op::BeginTask("i".into()),
        Op::PushInt(0),
        Op::PushInt(5),
        Op::CreateRange,
        Op::StoreIterable,
        Op::LoadVar("n".into()),
        Op::PushInt(1),
        Op::Add,
        Op::EndTask,
        Op::EndParallel,
        Op::Pop,
        Op::LoadVar("n".into()),
        Op::Halt,
    ])
    .unwrap();
    assert_eq!(result.as_i64(), Some(5));
}

#[test]
fn task_outside_a_block_faults() {
    let err = run(vec![Op::BeginTask("item".into()), Op::Halt]).unwrap_err();
    assert!(err.to_string().contains("Task outside"), "{err}");
}

#[test]
fn block_end_without_begin_faults() {
    let err = run(vec![Op::EndParallel, Op::Halt]).unwrap_err();
    assert!(err.to_string().contains("Block end"), "{err}");
}

#[test]
fn malformed_block_parameters_fault() {
    let err = run(vec![
        Op::BeginParallel("bogus=1".into()),
        Op::EndParallel,
        Op::Halt,
    ])
    .unwrap_err();
    assert!(err.to_string().contains("unknown block parameter"), "{err}");
}

#[test]
fn task_calls_function_defined_after_the_block() {
    let result = run(vec![
        Op::BeginParallel(String::new()),
        Op::BeginTask("item".into()),
        Op::PushInt(1),
        Op::PushInt(3),
        Op::CreateRange,
        Op::StoreIterable,
        Op::LoadVar("item".into()),
        Op::Call { name: "double".into(), argc: 1 },
        Op::EndTask,
        Op::EndParallel,
        Op::Halt,
        Op::BeginFunction("double".into()),
        Op::DefineParam("x".into()),
        Op::LoadVar("x".into()),
        Op::PushInt(2),
        Op::Multiply,
        Op::Return,
        Op::EndFunction,
    ])
    .unwrap();
    assert_eq!(list_as_i64(&result), vec![2, 4]);
}

#[test]
fn batch_mode_delivers_results_to_the_channel_at_block_end() {
    let result = run(vec![
        Op::Call { name: "channel".into(), argc: 0 },
        Op::StoreVar("c".into()),
        Op::BeginParallel("ch=c".into()),
        Op::BeginTask("item".into()),
        Op::PushInt(0),
        Op::PushInt(2),
        Op::CreateRange,
        Op::StoreIterable,
        Op::LoadVar("item".into()),
        Op::PushInt(10),
        Op::Add,
        Op::EndTask,
        Op::EndParallel,
        Op::Pop,
        Op::LoadVar("c".into()),
        Op::Call { name: "method:receive".into(), argc: 0 },
        Op::PushInt(0),
        Op::GetIndex,
        Op::Halt,
    ])
    .unwrap();
    assert_eq!(result.as_i64(), Some(10));
}

#[test]
fn cores_bound_still_completes_every_task() {
    let result = run(vec![
        Op::BeginParallel("cores=1".into()),
        Op::BeginTask("item".into()),
        Op::PushInt(1),
        Op::PushInt(4),
        Op::CreateRange,
        Op::StoreIterable,
        Op::LoadVar("item".into()),
        Op::PushInt(10),
        Op::Multiply,
        Op::EndTask,
        Op::EndParallel,
        Op::Halt,
    ])
    .unwrap();
    assert_eq!(list_as_i64(&result), vec![10, 20, 30]);
}

fn register_snooze(vm: &mut Vm) {
    use std::sync::Arc;
    use std::time::Duration;
    vm.register_native_function(
        "snooze",
        vec![lyra_ir::ParamSpec::required("ms")],
        false,
        Arc::new(|args: &[Value]| {
            let ms = args[0].as_i64().unwrap_or(0).max(0) as u64;
            std::thread::sleep(Duration::from_millis(ms));
            Ok(Value::Nil)
        }),
    );
}

#[test]
fn timeout_with_partial_keeps_finished_results() {
    let mut vm = Vm::new();
    register_snooze(&mut vm);

    let ops = vec![
        Op::BeginParallel("timeout=150, grace=50".into()),
        Op::BeginTask("item".into()),
        Op::PushInt(1),
        Op::PushInt(0),
        Op::CreateList(2),
        Op::StoreIterable,
        Op::LoadVar("item".into()),
        Op::JumpIfFalse(10),
        Op::LoadVar("item".into()),
        Op::Jump(13),
        Op::PushInt(800),
        Op::Call { name: "snooze".into(), argc: 1 },
        Op::Pop,
        Op::EndTask,
        Op::EndParallel,
        Op::Halt,
    ];
    let result = vm.execute(&program(ops)).unwrap();
    assert_eq!(list_as_i64(&result), vec![1]);
}

#[test]
fn timeout_with_error_action_raises() {
    let mut vm = Vm::new();
    register_snooze(&mut vm);

    let ops = vec![
        Op::BeginParallel("timeout=100, grace=50, on_timeout=error".into()),
        Op::BeginTask("item".into()),
        Op::PushInt(0),
        Op::CreateList(1),
        Op::StoreIterable,
        Op::PushInt(800),
        Op::Call { name: "snooze".into(), argc: 1 },
        Op::EndTask,
        Op::EndParallel,
        Op::Halt,
    ];
    let err = vm.execute(&program(ops)).unwrap_err();
    let VmError::Unhandled { error_type, message, .. } = &err else {
        panic!("expected unhandled, got {err:?}");
    };
    assert_eq!(error_type, "ParallelExecutionError");
    assert!(message.contains("timed out"), "{message}");
}

#[test]
fn channel_builtin_accepts_a_capacity() {
    let result = run(vec![
        Op::PushInt(2),
        Op::Call { name: "channel".into(), argc: 1 },
        Op::StoreVar("c".into()),
        Op::LoadVar("c".into()),
        Op::PushInt(7),
        Op::Call { name: "method:send".into(), argc: 1 },
        Op::Pop,
        Op::LoadVar("c".into()),
        Op::Call { name: "method:receive".into(), argc: 0 },
        Op::PushInt(0),
        Op::GetIndex,
        Op::Halt,
    ])
    .unwrap();
    assert_eq!(result.as_i64(), Some(7));
}

#[test]
fn channel_builtin_rejects_a_bad_capacity() {
    let err = run(vec![
        Op::PushInt(0),
        Op::Call { name: "channel".into(), argc: 1 },
        Op::Halt,
    ])
    .unwrap_err();
    assert!(err.to_string().contains("channel capacity"), "{err}");
}

#[test]
fn mismatched_block_end_faults_and_clears_block_accounting() {
    let mut vm = Vm::new();
    let ops = vec![
        Op::BeginParallel(String::new()),
        Op::EndConcurrent,
        Op::EndParallel,
        Op::Halt,
    ];
    let err = vm.execute(&program(ops)).unwrap_err();
    assert!(err.to_string().contains("Block end"), "{err}");
    assert_eq!(vm.active_blocks(), 0);
}
