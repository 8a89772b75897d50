// Argument and state access for builtins
//
// A builtin sees its call frame as `[name, Arg, arg0, arg1, ...]` starting at
// `st.call_start`. Values it pushes land above the frame and survive the
// frame's removal, which is how a builtin returns a value.

use crate::config::ScriptConfig;
use crate::host::{Host, ObjectId, PlayerId};
use crate::interpreter::{plain_text, Interpreter};
use crate::script_rand::ScriptRand;
use crate::state::{ExecState, Resume, ScriptState};
use crate::value::{Reference, RuntimeError, Value};
use crate::variables::conv_num;

pub struct ScriptContext<'a, 'e> {
    pub(crate) interp: &'a mut Interpreter<'e>,
    pub(crate) st: &'a mut ScriptState,
}

impl<'a, 'e> ScriptContext<'a, 'e> {
    pub(crate) fn new(interp: &'a mut Interpreter<'e>, st: &'a mut ScriptState) -> Self {
        ScriptContext { interp, st }
    }

    /// Name of the builtin being executed
    pub fn name(&self) -> &str {
        match self.st.stack.data.get(self.st.call_start) {
            Some(Value::Ref(r)) => self.interp.symbols.name(r.symbol),
            _ => "<unknown>",
        }
    }

    pub fn arg_count(&self) -> usize {
        self.st.call_end.saturating_sub(self.st.call_start + 2)
    }

    pub fn has_arg(&self, index: usize) -> bool {
        index < self.arg_count()
    }

    /// Argument as pushed, without resolving references
    pub fn raw_arg(&self, index: usize) -> Result<&Value, RuntimeError> {
        if !self.has_arg(index) {
            return Err(RuntimeError::MissingArgument {
                function: self.name().to_string(),
                index,
            });
        }
        Ok(&self.st.stack.data[self.st.call_start + 2 + index])
    }

    /// Argument with variable references resolved
    pub fn arg(&mut self, index: usize) -> Result<Value, RuntimeError> {
        let value = self.raw_arg(index)?.clone();
        self.interp.get_val(self.st, value)
    }

    pub fn get_num(&mut self, index: usize) -> Result<i32, RuntimeError> {
        match self.arg(index)? {
            Value::Int(v) => Ok(v),
            Value::Str(s) => Ok(conv_num(&s)),
            other => Err(RuntimeError::type_mismatch(self.name(), &other)),
        }
    }

    /// Numeric argument, or `default` when it was not passed
    pub fn get_num_or(&mut self, index: usize, default: i32) -> Result<i32, RuntimeError> {
        if self.has_arg(index) {
            self.get_num(index)
        } else {
            Ok(default)
        }
    }

    pub fn get_str(&mut self, index: usize) -> Result<String, RuntimeError> {
        match self.arg(index)? {
            value @ (Value::Str(_) | Value::Int(_)) => Ok(plain_text(&value)),
            other => Err(RuntimeError::type_mismatch(self.name(), &other)),
        }
    }

    /// Variable reference argument
    pub fn get_ref(&self, index: usize) -> Result<Reference, RuntimeError> {
        match self.raw_arg(index)? {
            Value::Ref(r) => Ok(r.clone()),
            other => Err(RuntimeError::NotAVariable(format!("{} ({})", self.name(), other))),
        }
    }

    /// Label argument; `None` for the `-` placeholder
    pub fn get_label(&self, index: usize) -> Result<Option<usize>, RuntimeError> {
        match self.raw_arg(index)? {
            Value::Pos(pos) => Ok(Some(*pos)),
            Value::NoLabel => Ok(None),
            _ => Err(RuntimeError::NotALabel(self.name().to_string())),
        }
    }

    pub fn push_int(&mut self, value: i32) {
        self.st.stack.push(Value::Int(value));
    }

    pub fn push_str(&mut self, value: impl Into<String>) {
        self.st.stack.push(Value::Str(value.into()));
    }

    pub fn push_value(&mut self, value: Value) {
        self.st.stack.push(value);
    }

    pub fn get_var(&mut self, reference: &Reference) -> Result<Value, RuntimeError> {
        self.interp.read_reference(self.st, reference)
    }

    pub fn set_var(&mut self, reference: &Reference, value: Value) -> Result<(), RuntimeError> {
        self.interp.set_reference(self.st, reference, value)
    }

    /// Same variable, other element
    pub fn element(&self, reference: &Reference, index: i64) -> Result<Reference, RuntimeError> {
        self.interp.element(reference, index)
    }

    pub fn array_size(&mut self, reference: &Reference) -> u32 {
        self.interp.array_size(self.st, reference)
    }

    pub fn is_string_var(&self, reference: &Reference) -> bool {
        self.interp.symbols.get(reference.symbol).is_string
    }

    pub fn default_for(&self, reference: &Reference) -> Value {
        self.interp.default_for(reference)
    }

    /// Resumption token left by the engine when this call is dispatched again
    pub fn take_resume(&mut self) -> Option<Resume> {
        self.st.resume.take()
    }

    pub fn rid(&self) -> PlayerId {
        self.st.rid
    }

    pub fn oid(&self) -> ObjectId {
        self.st.oid
    }

    /// The attached player, required by dialog builtins
    pub fn require_player(&self) -> Result<PlayerId, RuntimeError> {
        if self.st.rid == 0 {
            return Err(RuntimeError::NoPlayerAttached(self.name().to_string()));
        }
        Ok(self.st.rid)
    }

    pub fn host(&mut self) -> &mut dyn Host {
        &mut *self.interp.host
    }

    pub fn config(&self) -> &ScriptConfig {
        self.interp.config
    }

    pub fn rng(&mut self) -> &mut ScriptRand {
        &mut *self.interp.rng
    }

    pub fn state(&self) -> &ScriptState {
        &*self.st
    }

    pub fn state_mut(&mut self) -> &mut ScriptState {
        &mut *self.st
    }

    /// Continue at `pos` on the next cycle
    pub fn jump(&mut self, pos: usize) {
        self.st.pos = pos;
        self.st.status = ExecState::Goto;
    }

    pub fn end(&mut self) {
        self.st.status = ExecState::End;
    }
}
