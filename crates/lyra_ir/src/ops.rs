//! Flat bytecode representation.
//!
//! Function and class bodies are inline in the stream, delimited by
//! `BeginFunction`/`EndFunction` and `BeginClass`/`EndClass`. The runtime
//! pre-scans these regions before execution and only enters them via `Call`.

/// One opcode with its literal payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    // Stack
    PushInt(i64),
    PushFloat(f64),
    PushBool(bool),
    PushString(String),
    PushNil,
    Pop,
    Dup,
    Swap,

    // Variables
    StoreVar(String),
    LoadVar(String),
    StoreTemp(usize),
    LoadTemp(usize),
    ClearTemp(usize),
    DefineAtomic(String),

    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Negate,

    /// Stringify and join the top `n` values (string interpolation).
    Concat(usize),

    // Comparison / logic
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    Not,

    // Control flow
    Jump(usize),
    JumpIfFalse(usize),
    JumpIfTrue(usize),
    Call { name: String, argc: usize },
    Return,
    Halt,

    // Function definition (body inline, skipped by the main loop)
    BeginFunction(String),
    EndFunction,
    DefineParam(String),
    DefineOptionalParam(String),
    /// Pops the preceding literal push as the named parameter's default.
    SetDefaultValue(String),
    /// Push a function-valued reference to a registered function.
    PushFunction(String),
    /// Pop `captures` (name, value) pairs and produce a closure over the
    /// named function.
    CreateClosure { name: String, captures: usize },

    // Classes
    BeginClass(String),
    EndClass,
    SetSuperclass(String),
    /// Pops the preceding literal push as the field's default.
    DefineField(String),
    GetProperty(String),
    SetProperty(String),
    LoadThis,
    LoadSuper,

    // Collections
    CreateList(usize),
    CreateDict(usize),
    CreateTuple(usize),
    CreateRange,
    SetRangeStep,
    GetIndex,
    SetIndex,

    // Iteration
    GetIterator,
    IterHasNext,
    IterNext,
    IterNextKeyValue,

    /// Pops a pattern, then the scrutinee, and pushes whether they match.
    /// Marker patterns (dict/list/tuple destructuring) also consume their
    /// element data from the stack and bind matched names.
    MatchPattern,

    // Enum definitions (registry-only: each variant binds its own name)
    BeginEnum(String),
    EndEnum,
    DefineEnumVariant(String),
    DefineEnumVariantWithType(String),

    // Scopes
    BeginScope,
    EndScope,

    // Error unions
    ConstructError { type_name: String, argc: usize },
    ConstructOk,
    CheckError,
    IsError,
    IsSuccess,
    UnwrapValue,
    PropagateError,

    // Concurrency
    BeginParallel(String),
    EndParallel,
    BeginConcurrent(String),
    EndConcurrent,
    BeginTask(String),
    EndTask,
    StoreIterable,

    // Output
    Print(usize),
}

/// An opcode plus the source line it was lowered from.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub op: Op,
    pub line: u32,
}

impl Instruction {
    pub fn new(op: Op, line: u32) -> Self {
        Self { op, line }
    }
}

impl From<Op> for Instruction {
    fn from(op: Op) -> Self {
        Self { op, line: 0 }
    }
}

pub type Program = Vec<Instruction>;
