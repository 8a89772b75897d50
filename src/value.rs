// Operand stack values and runtime errors

use crate::script::Script;
use crate::script_compiler::symbols::SymbolId;
use crate::variables::VarStorage;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Namespace instance a reference is bound to, when it must outlive the
/// activation that created it (arguments passed by reference)
#[derive(Debug, Clone)]
pub enum RefOwner {
    /// `.@` variables of a specific activation
    Scope(Rc<RefCell<VarStorage>>),
    /// `.` variables of a specific script
    Script(Rc<Script>),
}

/// A variable (or array element) reference
#[derive(Debug, Clone)]
pub struct Reference {
    pub symbol: SymbolId,
    pub index: u32,
    pub owner: Option<RefOwner>,
}

impl Reference {
    pub fn new(symbol: SymbolId) -> Self {
        Reference {
            symbol,
            index: 0,
            owner: None,
        }
    }
}

/// Caller state saved by callsub/callfunc
#[derive(Debug, Clone)]
pub struct RetInfo {
    /// Resume position in the caller
    pub pos: usize,
    pub script: Rc<Script>,
    pub scope: Rc<RefCell<VarStorage>>,
    /// Caller's default stack pointer
    pub defsp: usize,
    /// Argument copies sitting below this record
    pub nargs: usize,
}

/// One operand stack slot
#[derive(Debug, Clone)]
pub enum Value {
    Int(i32),
    Str(String),
    /// Resolved label position
    Pos(usize),
    /// `-` placeholder label
    NoLabel,
    Ref(Reference),
    /// Start of a call's argument list
    Arg,
    RetInfo(Box<RetInfo>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Pos(_) => "label",
            Value::NoLabel => "no-label",
            Value::Ref(_) => "reference",
            Value::Arg => "argument marker",
            Value::RetInfo(_) => "return info",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "\"{}\"", s),
            Value::Pos(p) => write!(f, "@{:#x}", p),
            Value::NoLabel => write!(f, "-"),
            Value::Ref(r) if r.index > 0 => write!(f, "<ref {}[{}]>", r.symbol, r.index),
            Value::Ref(r) => write!(f, "<ref {}>", r.symbol),
            Value::Arg => write!(f, "<arg>"),
            Value::RetInfo(_) => write!(f, "<retinfo>"),
        }
    }
}

/// Operand stack with the default stack pointer of the current activation
#[derive(Debug, Default)]
pub struct ScriptStack {
    pub data: Vec<Value>,
    /// Everything below belongs to callers or pending calls
    pub defsp: usize,
}

impl ScriptStack {
    pub fn new() -> Self {
        ScriptStack {
            data: Vec::with_capacity(64),
            defsp: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push(&mut self, value: Value) {
        self.data.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.data.pop().ok_or(RuntimeError::StackUnderflow)
    }

    /// Remove `[start, end)`, shifting the rest down and keeping `defsp`
    /// pointing at the same logical slot
    pub fn pop_range(&mut self, start: usize, end: usize) {
        let end = end.min(self.data.len());
        if start >= end {
            return;
        }
        self.data.drain(start..end);
        if self.defsp > start {
            if self.defsp < end {
                self.defsp = start;
            } else {
                self.defsp -= end - start;
            }
        }
    }

    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
        if self.defsp > len {
            self.defsp = len;
        }
    }
}

/// Errors that end one script instance
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    StackUnderflow,
    /// Function call without its argument marker
    MissingArgMarker,
    InvalidBytecode { pos: usize, detail: String },
    /// Operator applied to operands it has no rule for
    InvalidOperands { op: &'static str, left: String, right: String },
    DivisionByZero { op: &'static str, left: i32, right: i32 },
    TypeMismatch { context: String, found: &'static str },
    NotAFunction(String),
    NotAVariable(String),
    NotALabel(String),
    ArrayIndexOutOfRange { name: String, index: i64, max: u32 },
    NoPlayerAttached(String),
    PlayerOffline(u32),
    MissingArgument { function: String, index: usize },
    UnknownFunction(String),
    UnexpectedResume(String),
    Failed(String),
}

impl RuntimeError {
    pub fn type_mismatch(context: &str, value: &Value) -> Self {
        RuntimeError::TypeMismatch {
            context: context.to_string(),
            found: value.type_name(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RuntimeError::StackUnderflow => write!(f, "stack underflow"),
            RuntimeError::MissingArgMarker => {
                write!(f, "function call without argument list marker")
            }
            RuntimeError::InvalidBytecode { pos, detail } => {
                write!(f, "malformed bytecode at {:#x}: {}", pos, detail)
            }
            RuntimeError::InvalidOperands { op, left, right } => {
                write!(f, "invalid data for operator {} ({} and {})", op, left, right)
            }
            RuntimeError::DivisionByZero { op, left, right } => {
                write!(f, "division by zero detected op={} i1={} i2={}", op, left, right)
            }
            RuntimeError::TypeMismatch { context, found } => {
                write!(f, "{}: unexpected {}", context, found)
            }
            RuntimeError::NotAFunction(name) => write!(f, "'{}' is not a function", name),
            RuntimeError::NotAVariable(name) => write!(f, "'{}' is not a variable", name),
            RuntimeError::NotALabel(context) => write!(f, "{}: argument is not a label", context),
            RuntimeError::ArrayIndexOutOfRange { name, index, max } => write!(
                f,
                "array index {} of '{}' out of range (max {})",
                index, name, max
            ),
            RuntimeError::NoPlayerAttached(function) => {
                write!(f, "{}: fatal error, player not attached", function)
            }
            RuntimeError::PlayerOffline(rid) => {
                write!(f, "player {} is no longer online", rid)
            }
            RuntimeError::MissingArgument { function, index } => {
                write!(f, "{}: missing argument {}", function, index)
            }
            RuntimeError::UnknownFunction(name) => write!(f, "function '{}' not found", name),
            RuntimeError::UnexpectedResume(function) => {
                write!(f, "{}: resumed with an unexpected reply", function)
            }
            RuntimeError::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}
