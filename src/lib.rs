// Hercules-style script engine: compiler, bytecode interpreter and the
// suspend/resume lifecycle of running scripts.

pub mod builtins;
pub mod config;
pub mod context;
pub mod disassembler;
pub mod engine;
pub mod host;
pub mod interpreter;
pub mod script;
pub mod script_compiler;
pub mod script_rand;
pub mod state;
pub mod value;
pub mod variables;

pub use builtins::{BuiltinDef, BuiltinFn, BuiltinOutcome};
pub use config::ScriptConfig;
pub use context::ScriptContext;
pub use engine::ScriptEngine;
pub use host::{DialogEvent, Host, MemoryHost, ObjectId, PlayerId};
pub use script::Script;
pub use script_compiler::{CompileError, CompileErrorKind};
pub use state::{ExecState, Reply, ReplyKind, StateId, Suspension};
pub use value::{RuntimeError, Value};
pub use variables::{VarStorage, VariableScope};
