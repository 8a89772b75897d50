// Stack-machine interpreter for compiled scripts
//
// One `Interpreter` borrows the engine's shared tables for the duration of a
// run. Script states are independent; the interpreter only ever touches the
// state it is handed.

use crate::builtins::{signature_char, BuiltinDef, BuiltinOutcome};
use crate::config::ScriptConfig;
use crate::context::ScriptContext;
use crate::host::{Host, PlayerId};
use crate::script::Script;
use crate::script_compiler::bytecode::{decode_at, Instr, Op};
use crate::script_compiler::symbols::{SymbolKind, SymbolTable};
use crate::script_rand::ScriptRand;
use crate::state::{ExecState, ScriptState, StateId};
use crate::value::{Reference, RuntimeError, Value};
use crate::variables::{conv_num, VarStorage};
use indexmap::IndexMap;
use log::{debug, error, warn};
use std::rc::Rc;

pub struct Interpreter<'e> {
    pub(crate) symbols: &'e SymbolTable,
    pub(crate) builtins: &'e [BuiltinDef],
    pub(crate) config: &'e ScriptConfig,
    /// `$` and `$@` variables
    pub(crate) globals: &'e mut VarStorage,
    /// Scripts reachable through `callfunc`, lowercase names
    pub(crate) functions: &'e IndexMap<String, Rc<Script>>,
    pub(crate) rng: &'e mut ScriptRand,
    pub(crate) host: &'e mut dyn Host,
    /// Player to state attachments, for `attachrid`
    pub(crate) attached: &'e IndexMap<PlayerId, StateId>,
}

/// Text form of a value for concatenation and messages
pub(crate) fn plain_text(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

fn clamp_i64(op: Op, left: i32, right: i32, result: i64) -> i32 {
    if result > i32::MAX as i64 {
        warn!(
            "script:op_2num: overflow detected op={} i1={} i2={}",
            op.mnemonic(),
            left,
            right
        );
        i32::MAX
    } else if result < i32::MIN as i64 {
        warn!(
            "script:op_2num: underflow detected op={} i1={} i2={}",
            op.mnemonic(),
            left,
            right
        );
        i32::MIN
    } else {
        result as i32
    }
}

/// Integer binary operator
pub(crate) fn int_op(op: Op, a: i32, b: i32) -> Result<i32, RuntimeError> {
    let (x, y) = (a as i64, b as i64);
    let result = match op {
        Op::Add => return Ok(clamp_i64(op, a, b, x + y)),
        Op::Sub => return Ok(clamp_i64(op, a, b, x - y)),
        Op::Mul => return Ok(clamp_i64(op, a, b, x * y)),
        Op::Div | Op::Mod => {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero {
                    op: op.operator(),
                    left: a,
                    right: b,
                });
            }
            if a == i32::MIN && b == -1 {
                if op == Op::Div {
                    warn!("script:op_2num: overflow detected op=DIV i1={} i2={}", a, b);
                    return Ok(i32::MAX);
                }
                return Ok(0);
            }
            if op == Op::Div {
                a / b
            } else {
                a % b
            }
        }
        Op::Eq => (a == b) as i32,
        Op::Ne => (a != b) as i32,
        Op::Gt => (a > b) as i32,
        Op::Ge => (a >= b) as i32,
        Op::Lt => (a < b) as i32,
        Op::Le => (a <= b) as i32,
        Op::And => a & b,
        Op::Or => a | b,
        Op::Xor => a ^ b,
        Op::RShift => a.wrapping_shr(b as u32),
        Op::LShift => a.wrapping_shl(b as u32),
        other => {
            return Err(RuntimeError::InvalidOperands {
                op: other.operator(),
                left: "int".to_string(),
                right: "int".to_string(),
            })
        }
    };
    Ok(result)
}

/// String binary operator: concatenation and comparisons
fn str_op(op: Op, a: &str, b: &str) -> Result<Value, RuntimeError> {
    let result = match op {
        Op::Add => return Ok(Value::Str(format!("{}{}", a, b))),
        Op::Eq => a == b,
        Op::Ne => a != b,
        Op::Gt => a > b,
        Op::Ge => a >= b,
        Op::Lt => a < b,
        Op::Le => a <= b,
        other => {
            return Err(RuntimeError::InvalidOperands {
                op: other.operator(),
                left: format!("\"{}\"", a),
                right: format!("\"{}\"", b),
            })
        }
    };
    Ok(Value::Int(result as i32))
}

/// Condition value; strings count by their numeric value
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Int(v) => *v != 0,
        Value::Str(s) => conv_num(s) != 0,
        _ => true,
    }
}

impl<'e> Interpreter<'e> {
    /// Execute until the state ends, suspends or trips the loop guard
    pub fn run_script_main(&mut self, st: &mut ScriptState) {
        let mut cmdcount = self.config.check_cmdcount;
        let mut gotocount = self.config.check_gotocount;
        st.status = ExecState::Running;
        debug!(
            "run_script_main: state {} '{}' at {:#x}",
            st.id, st.script.name, st.pos
        );

        while st.status == ExecState::Running {
            let script = Rc::clone(&st.script);
            let op_pos = st.pos;
            let (instr, next) = match decode_at(script.code(), op_pos) {
                Ok(decoded) => decoded,
                Err(e) => {
                    self.report_error(st, &e, false);
                    st.status = ExecState::End;
                    break;
                }
            };
            st.pos = next;

            let outcome = match instr {
                Instr::Int(value) => {
                    self.push_literal(st, script.code(), value);
                    Ok(())
                }
                Instr::Pos(pos) => {
                    st.stack.push(Value::Pos(pos));
                    Ok(())
                }
                Instr::Name(symbol) => {
                    st.stack.push(Value::Ref(Reference::new(symbol)));
                    Ok(())
                }
                Instr::Str(text) => {
                    st.stack.push(Value::Str(text));
                    Ok(())
                }
                Instr::LandJump(target) => self.op_short_circuit(st, false, target),
                Instr::LorJump(target) => self.op_short_circuit(st, true, target),
                Instr::Op(op) => self.execute_op(st, op, op_pos),
            };
            if let Err(e) = outcome {
                self.report_error(st, &e, false);
                st.status = ExecState::End;
                break;
            }

            if st.status == ExecState::Goto {
                st.status = ExecState::Running;
                if !st.freeloop && self.config.check_gotocount > 0 {
                    gotocount = gotocount.saturating_sub(1);
                    if gotocount == 0 {
                        error!(
                            "run_script: infinity loop! (more than {} jumps)",
                            self.config.check_gotocount
                        );
                        self.report_source(st);
                        st.status = ExecState::End;
                    }
                }
            }
            if st.status == ExecState::Running && !st.freeloop && self.config.check_cmdcount > 0 {
                cmdcount = cmdcount.saturating_sub(1);
                if cmdcount == 0 {
                    error!(
                        "run_script: infinity loop! (more than {} commands)",
                        self.config.check_cmdcount
                    );
                    self.report_source(st);
                    st.status = ExecState::End;
                }
            }
        }

        if st.status == ExecState::Rerun {
            st.status = match st.pending {
                Some(crate::state::Suspension::Sleep { .. }) => ExecState::Sleeping,
                _ => ExecState::Stopped,
            };
        }
        debug!("run_script_main: state {} left with {:?}", st.id, st.status);
    }

    /// Push an integer literal. The magnitude of `i32::MIN` only fits when it
    /// is immediately negated.
    fn push_literal(&mut self, st: &mut ScriptState, code: &[u8], value: u64) {
        if value <= i32::MAX as u64 {
            st.stack.push(Value::Int(value as i32));
            return;
        }
        if let Ok((Instr::Op(Op::Neg), after)) = decode_at(code, st.pos) {
            if value == 1u64 << 31 {
                st.stack.push(Value::Int(i32::MIN));
                st.pos = after;
                return;
            }
        }
        warn!("script:get_num: literal {} out of range, capping to {}", value, i32::MAX);
        st.stack.push(Value::Int(i32::MAX));
    }

    fn execute_op(&mut self, st: &mut ScriptState, op: Op, op_pos: usize) -> Result<(), RuntimeError> {
        match op {
            Op::Nop => st.status = ExecState::End,
            Op::Eol => {
                if st.stack.len() != st.stack.defsp {
                    debug!(
                        "run_script: stack.len() ({}) != defsp ({}) at end of statement",
                        st.stack.len(),
                        st.stack.defsp
                    );
                }
                let defsp = st.stack.defsp;
                st.stack.truncate(defsp);
            }
            Op::Arg => st.stack.push(Value::Arg),
            Op::NoLabel => st.stack.push(Value::NoLabel),
            Op::Func => self.run_func(st, op_pos),
            Op::Bool => {
                let value = self.pop_value(st)?;
                st.stack.push(Value::Int(is_truthy(&value) as i32));
            }
            Op::Neg | Op::LNot | Op::Not => self.op_1(st, op)?,
            Op::AddPre | Op::SubPre | Op::AddPost | Op::SubPost => self.op_incdec(st, op)?,
            Op::Op3 => self.op_3(st)?,
            Op::Eq
            | Op::Ne
            | Op::Gt
            | Op::Ge
            | Op::Lt
            | Op::Le
            | Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod
            | Op::And
            | Op::Or
            | Op::Xor
            | Op::RShift
            | Op::LShift => self.op_2(st, op)?,
            Op::Pos | Op::Int | Op::Str | Op::Name | Op::LandJump | Op::LorJump => {
                return Err(RuntimeError::InvalidBytecode {
                    pos: op_pos,
                    detail: format!("operand-carrying opcode {} without operand", op.mnemonic()),
                });
            }
        }
        Ok(())
    }

    /// Pop and resolve to a plain value
    pub(crate) fn pop_value(&mut self, st: &mut ScriptState) -> Result<Value, RuntimeError> {
        let value = st.stack.pop()?;
        self.get_val(st, value)
    }

    fn op_2(&mut self, st: &mut ScriptState, op: Op) -> Result<(), RuntimeError> {
        let right = self.pop_value(st)?;
        let left = self.pop_value(st)?;
        let result = match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => Value::Int(int_op(op, *a, *b)?),
            (Value::Str(a), Value::Str(b)) => str_op(op, a, b)?,
            (Value::Int(_), Value::Str(_)) | (Value::Str(_), Value::Int(_)) if op == Op::Add => {
                Value::Str(format!("{}{}", plain_text(&left), plain_text(&right)))
            }
            _ => {
                return Err(RuntimeError::InvalidOperands {
                    op: op.operator(),
                    left: left.to_string(),
                    right: right.to_string(),
                })
            }
        };
        st.stack.push(result);
        Ok(())
    }

    fn op_1(&mut self, st: &mut ScriptState, op: Op) -> Result<(), RuntimeError> {
        let value = self.pop_value(st)?;
        let Value::Int(v) = value else {
            return Err(RuntimeError::InvalidOperands {
                op: op.operator(),
                left: value.to_string(),
                right: String::new(),
            });
        };
        let result = match op {
            Op::Neg if v == i32::MIN => {
                warn!("script:op_1: overflow detected op=NEG i1={}", v);
                i32::MAX
            }
            Op::Neg => -v,
            Op::LNot => (v == 0) as i32,
            _ => !v,
        };
        st.stack.push(Value::Int(result));
        Ok(())
    }

    /// `c ? a : b`; both branches have already been evaluated
    fn op_3(&mut self, st: &mut ScriptState) -> Result<(), RuntimeError> {
        let if_false = self.pop_value(st)?;
        let if_true = self.pop_value(st)?;
        let cond = self.pop_value(st)?;
        st.stack.push(if is_truthy(&cond) { if_true } else { if_false });
        Ok(())
    }

    fn op_incdec(&mut self, st: &mut ScriptState, op: Op) -> Result<(), RuntimeError> {
        let Value::Ref(reference) = st.stack.pop()? else {
            return Err(RuntimeError::NotAVariable(op.operator().to_string()));
        };
        let Value::Int(old) = self.read_reference(st, &reference)? else {
            return Err(RuntimeError::InvalidOperands {
                op: op.operator(),
                left: self.symbols.name(reference.symbol).to_string(),
                right: String::new(),
            });
        };
        let delta = if matches!(op, Op::AddPre | Op::AddPost) { 1 } else { -1 };
        let new = clamp_i64(op, old, delta, old as i64 + delta as i64);
        self.set_reference(st, &reference, Value::Int(new))?;
        let produced = if matches!(op, Op::AddPre | Op::SubPre) { new } else { old };
        st.stack.push(Value::Int(produced));
        Ok(())
    }

    /// `&&` (`on = false`) and `||` (`on = true`): when the left operand
    /// decides the result, push it as 0/1 and skip the right operand
    fn op_short_circuit(&mut self, st: &mut ScriptState, on: bool, target: usize) -> Result<(), RuntimeError> {
        let value = self.pop_value(st)?;
        if is_truthy(&value) == on {
            st.stack.push(Value::Int(on as i32));
            st.pos = target;
        }
        Ok(())
    }

    /// Dispatch the builtin whose call frame ends at the top of the stack
    fn run_func(&mut self, st: &mut ScriptState, op_pos: usize) {
        let end = st.stack.len();
        let Some(arg_index) = st.stack.data.iter().rposition(|v| matches!(v, Value::Arg)) else {
            self.report_error(st, &RuntimeError::MissingArgMarker, false);
            st.status = ExecState::End;
            return;
        };
        if arg_index == 0 {
            self.report_error(st, &RuntimeError::MissingArgMarker, false);
            st.status = ExecState::End;
            return;
        }
        let start = arg_index - 1;
        let index = match &st.stack.data[start] {
            Value::Ref(r) => match self.symbols.kind(r.symbol) {
                SymbolKind::Function(index) if index < self.builtins.len() => Ok(index),
                _ => Err(RuntimeError::NotAFunction(self.symbols.name(r.symbol).to_string())),
            },
            other => Err(RuntimeError::NotAFunction(other.to_string())),
        };
        let index = match index {
            Ok(index) => index,
            Err(e) => {
                self.report_error(st, &e, false);
                st.status = ExecState::End;
                return;
            }
        };

        st.call_start = start;
        st.call_end = end;
        let builtins = self.builtins;
        let def = &builtins[index];
        if self.config.warn_func_mismatch_argtypes {
            self.check_argtypes(st, def);
        }

        let outcome = {
            let mut ctx = ScriptContext::new(self, st);
            (def.func)(&mut ctx)
        };
        match outcome {
            Err(e) => {
                self.report_error(st, &e, true);
                st.status = ExecState::End;
            }
            Ok(BuiltinOutcome::Completed) => {
                if st.status == ExecState::ReturnFromFunction {
                    self.return_from_function(st);
                } else {
                    let (start, end) = (st.call_start, st.call_end);
                    st.stack.pop_range(start, end);
                }
            }
            Ok(BuiltinOutcome::Suspend(suspension)) => {
                debug!("{}: suspending state {} with {:?}", def.name, st.id, suspension);
                st.pending = Some(suspension);
                st.pos = op_pos;
                st.status = ExecState::Rerun;
            }
        }
    }

    /// Restore the caller saved below the current frame
    fn return_from_function(&mut self, st: &mut ScriptState) {
        let retval = if st.stack.len() > st.call_end {
            st.stack.data.pop()
        } else {
            None
        };
        let defsp = st.stack.defsp;
        let info = match defsp.checked_sub(1).and_then(|i| st.stack.data.get(i)) {
            Some(Value::RetInfo(info)) => (**info).clone(),
            _ => {
                warn!("script:run_func: return without callfunc or callsub!");
                self.report_source(st);
                st.status = ExecState::End;
                return;
            }
        };
        st.stack.truncate(defsp - 1 - info.nargs);
        st.pos = info.pos;
        st.script = info.script;
        st.scope = info.scope;
        st.stack.defsp = info.defsp;
        if let Some(value) = retval {
            st.stack.push(value);
        }
        st.status = ExecState::Goto;
        debug!("return: state {} back at {:#x}", st.id, st.pos);
    }

    /// Warn about arguments that do not match the declared type letters
    fn check_argtypes(&mut self, st: &ScriptState, def: &BuiltinDef) {
        for (i, value) in st.stack.data[st.call_start + 2..st.call_end].iter().enumerate() {
            let expected = signature_char(&def.signature, i);
            let ok = match (expected, value) {
                (b'i', Value::Int(_)) | (b's', Value::Str(_)) => true,
                (b'i', Value::Ref(r)) => !self.symbols.get(r.symbol).is_string,
                (b's', Value::Ref(r)) => self.symbols.get(r.symbol).is_string,
                (b'l', Value::Pos(_)) | (b'l', Value::NoLabel) => true,
                (b'r', Value::Ref(_)) => true,
                (b'i' | b's' | b'l' | b'r', _) => false,
                _ => true,
            };
            if !ok {
                warn!(
                    "script:run_func: argument {} of '{}' is {} but '{}' was expected",
                    i + 1,
                    def.name,
                    value.type_name(),
                    expected as char
                );
            }
        }
    }

    /// Log a runtime error with the call being executed and the source object
    fn report_error(&mut self, st: &ScriptState, e: &RuntimeError, in_call: bool) {
        error!("script: {} (state {}, '{}' at {:#x})", e, st.id, st.script.name, st.pos);
        if in_call {
            self.report_func(st);
        }
        self.report_source(st);
    }

    fn report_func(&self, st: &ScriptState) {
        let frame = &st.stack.data[st.call_start.min(st.stack.len())..st.call_end.min(st.stack.len())];
        let Some(Value::Ref(name)) = frame.first() else {
            return;
        };
        let args: Vec<String> = frame.iter().skip(2).map(|v| v.to_string()).collect();
        error!(
            "Function: {} ({} args): {}",
            self.symbols.name(name.symbol),
            args.len(),
            args.join(" ")
        );
    }

    fn report_source(&mut self, st: &ScriptState) {
        match self.host.describe_object(st.oid) {
            Some(description) => error!("Source (NPC): {}", description),
            None => error!("Source (Non-NPC script '{}')", st.script.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_int_ops_clamp_and_compare() {
        assert_eq!(int_op(Op::Add, i32::MAX, 1).unwrap(), i32::MAX);
        assert_eq!(int_op(Op::Sub, i32::MIN, 1).unwrap(), i32::MIN);
        assert_eq!(int_op(Op::Mul, 1 << 20, 1 << 20).unwrap(), i32::MAX);
        assert_eq!(int_op(Op::Div, i32::MIN, -1).unwrap(), i32::MAX);
        assert_eq!(int_op(Op::Mod, i32::MIN, -1).unwrap(), 0);
        assert_eq!(int_op(Op::Mod, -7, 3).unwrap(), -1);
        assert_eq!(int_op(Op::Lt, 1, 2).unwrap(), 1);
        assert_eq!(int_op(Op::LShift, 1, 4).unwrap(), 16);
        assert!(matches!(
            int_op(Op::Div, 1, 0),
            Err(RuntimeError::DivisionByZero { .. })
        ));
    }

    #[test]
    fn test_string_ops() {
        assert!(matches!(str_op(Op::Add, "ab", "cd").unwrap(), Value::Str(s) if s == "abcd"));
        assert!(matches!(str_op(Op::Lt, "abc", "abd").unwrap(), Value::Int(1)));
        assert!(matches!(str_op(Op::Eq, "x", "x").unwrap(), Value::Int(1)));
        assert!(str_op(Op::Sub, "a", "b").is_err());
    }

    #[test]
    fn test_string_conditions_use_their_number() {
        assert!(!is_truthy(&Value::Str("0".to_string())));
        assert!(!is_truthy(&Value::Str(String::new())));
        assert!(is_truthy(&Value::Str("12".to_string())));
        assert!(is_truthy(&Value::Int(-1)));
        assert!(!is_truthy(&Value::Int(0)));
    }
}
