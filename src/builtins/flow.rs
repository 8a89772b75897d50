// Control flow builtins: jumps, subroutine calls and termination

use super::BuiltinOutcome;
use crate::context::ScriptContext;
use crate::interpreter::is_truthy;
use crate::script::Script;
use crate::state::ExecState;
use crate::value::{RefOwner, RetInfo, RuntimeError, Value};
use crate::variables::{VarStorage, VariableScope};
use log::debug;
use std::cell::RefCell;
use std::rc::Rc;

pub fn goto(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let Some(pos) = ctx.get_label(0)? else {
        return Err(RuntimeError::NotALabel("goto".to_string()));
    };
    ctx.jump(pos);
    Ok(BuiltinOutcome::Completed)
}

/// Jump when the condition is false
pub fn jump_zero(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let cond = ctx.arg(0)?;
    if !is_truthy(&cond) {
        let Some(pos) = ctx.get_label(1)? else {
            return Err(RuntimeError::NotALabel("jump_zero".to_string()));
        };
        ctx.jump(pos);
    }
    Ok(BuiltinOutcome::Completed)
}

/// Pin `.@` and `.` references to the caller's storage so the callee can
/// write through them
fn bind_owner(ctx: &ScriptContext, value: &Value) -> Value {
    let Value::Ref(reference) = value else {
        return value.clone();
    };
    if reference.owner.is_some() {
        return value.clone();
    }
    let mut bound = reference.clone();
    match ctx.interp.symbols.get(reference.symbol).scope {
        VariableScope::ScopeLocal => bound.owner = Some(RefOwner::Scope(Rc::clone(&ctx.st.scope))),
        VariableScope::NpcLocal => bound.owner = Some(RefOwner::Script(Rc::clone(&ctx.st.script))),
        _ => {}
    }
    Value::Ref(bound)
}

/// Push argument copies and the caller's return info, then enter `script`
/// at `pos` with a fresh `.@` scope
fn enter_subroutine(
    ctx: &mut ScriptContext,
    first_arg: usize,
    script: Rc<Script>,
    pos: usize,
) -> Result<(), RuntimeError> {
    let mut copies = Vec::new();
    for i in first_arg..ctx.arg_count() {
        copies.push(bind_owner(ctx, ctx.raw_arg(i)?));
    }
    let nargs = copies.len();
    let st = ctx.state_mut();
    for value in copies {
        st.stack.push(value);
    }
    st.stack.push(Value::RetInfo(Box::new(RetInfo {
        pos: st.pos,
        script: Rc::clone(&st.script),
        scope: Rc::clone(&st.scope),
        defsp: st.stack.defsp,
        nargs,
    })));
    st.stack.defsp = st.stack.len();
    st.scope = Rc::new(RefCell::new(VarStorage::new()));
    st.script = script;
    st.pos = pos;
    st.status = ExecState::Goto;
    Ok(())
}

pub fn callsub(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let Some(pos) = ctx.get_label(0)? else {
        return Err(RuntimeError::NotALabel("callsub".to_string()));
    };
    let script = Rc::clone(&ctx.state().script);
    enter_subroutine(ctx, 1, script, pos)?;
    Ok(BuiltinOutcome::Completed)
}

pub fn callfunc(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let name = ctx.get_str(0)?;
    let Some(script) = ctx.interp.functions.get(&name.to_ascii_lowercase()).cloned() else {
        return Err(RuntimeError::UnknownFunction(name));
    };
    debug!("callfunc: entering '{}'", name);
    enter_subroutine(ctx, 1, script, 0)?;
    Ok(BuiltinOutcome::Completed)
}

/// `return` outside any call ends the script; the interpreter reports it
pub fn return_(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    if ctx.has_arg(0) {
        let value = ctx.arg(0)?;
        ctx.push_value(value);
    }
    ctx.state_mut().status = ExecState::ReturnFromFunction;
    Ok(BuiltinOutcome::Completed)
}

/// Argument count of the current activation and where its copies start
fn frame_args(ctx: &ScriptContext, function: &str) -> Result<(usize, usize), RuntimeError> {
    let stack = &ctx.state().stack;
    match stack.defsp.checked_sub(1).and_then(|i| stack.data.get(i)) {
        Some(Value::RetInfo(info)) => Ok((stack.defsp - 1 - info.nargs, info.nargs)),
        _ => Err(RuntimeError::Failed(format!(
            "{}: no callfunc or callsub!",
            function
        ))),
    }
}

pub fn getarg(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let (base, nargs) = frame_args(ctx, "getarg")?;
    let index = ctx.get_num(0)?;
    if index >= 0 && (index as usize) < nargs {
        let value = ctx.state().stack.data[base + index as usize].clone();
        ctx.push_value(value);
    } else if ctx.has_arg(1) {
        let default = ctx.arg(1)?;
        ctx.push_value(default);
    } else {
        return Err(RuntimeError::Failed(format!(
            "getarg: index (idx={}) out of range (nargs={}) and no default value found",
            index, nargs
        )));
    }
    Ok(BuiltinOutcome::Completed)
}

pub fn getargcount(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let (_, nargs) = frame_args(ctx, "getargcount")?;
    ctx.push_int(nargs as i32);
    Ok(BuiltinOutcome::Completed)
}

pub fn end(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    ctx.end();
    Ok(BuiltinOutcome::Completed)
}

pub fn freeloop(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    if ctx.has_arg(0) {
        let on = ctx.get_num(0)? != 0;
        ctx.state_mut().freeloop = on;
    }
    let on = ctx.state().freeloop;
    ctx.push_int(on as i32);
    Ok(BuiltinOutcome::Completed)
}
