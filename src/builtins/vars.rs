// Variable and array builtins

use super::BuiltinOutcome;
use crate::context::ScriptContext;
use crate::value::{RuntimeError, Value};

/// `set <variable>, <value>` pushes the value as stored
pub fn set(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let reference = ctx.get_ref(0)?;
    let value = ctx.arg(1)?;
    ctx.set_var(&reference, value)?;
    let stored = ctx.get_var(&reference)?;
    ctx.push_value(stored);
    Ok(BuiltinOutcome::Completed)
}

pub fn setarray(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let reference = ctx.get_ref(0)?;
    let start = reference.index as i64;
    for i in 1..ctx.arg_count() {
        let value = ctx.arg(i)?;
        let element = ctx.element(&reference, start + i as i64 - 1)?;
        ctx.set_var(&element, value)?;
    }
    Ok(BuiltinOutcome::Completed)
}

/// `cleararray <variable>, <value>, <count>`
pub fn cleararray(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let reference = ctx.get_ref(0)?;
    let value = ctx.arg(1)?;
    let count = ctx.get_num(2)?;
    let start = reference.index as i64;
    for i in 0..count.max(0) as i64 {
        let element = ctx.element(&reference, start + i)?;
        ctx.set_var(&element, value.clone())?;
    }
    Ok(BuiltinOutcome::Completed)
}

pub fn getarraysize(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let reference = ctx.get_ref(0)?;
    let size = ctx.array_size(&reference);
    ctx.push_int(size as i32);
    Ok(BuiltinOutcome::Completed)
}

/// Reference to `name[index]`, emitted by the compiler for subscripts
pub fn getelementofarray(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let reference = ctx.get_ref(0)?;
    let index = ctx.get_num(1)?;
    let element = ctx.element(&reference, index as i64)?;
    ctx.push_value(Value::Ref(element));
    Ok(BuiltinOutcome::Completed)
}

/// `deletearray <variable>[, <count>]` removes elements starting at the
/// referenced index and shifts the rest of the array down
pub fn deletearray(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let reference = ctx.get_ref(0)?;
    let start = reference.index as i64;
    let base = ctx.element(&reference, 0)?;
    let end = ctx.array_size(&base) as i64;
    if start >= end {
        return Ok(BuiltinOutcome::Completed);
    }
    let count = match ctx.has_arg(1) {
        true => (ctx.get_num(1)? as i64).clamp(0, end - start),
        false => end - start,
    };
    if count == 0 {
        return Ok(BuiltinOutcome::Completed);
    }
    for index in start..end - count {
        let from = ctx.element(&reference, index + count)?;
        let value = ctx.get_var(&from)?;
        let to = ctx.element(&reference, index)?;
        ctx.set_var(&to, value)?;
    }
    let empty = ctx.default_for(&reference);
    for index in end - count..end {
        let slot = ctx.element(&reference, index)?;
        ctx.set_var(&slot, empty.clone())?;
    }
    Ok(BuiltinOutcome::Completed)
}
