// Timing, randomness, debugging and player attachment builtins

use super::BuiltinOutcome;
use crate::context::ScriptContext;
use crate::state::{Resume, Suspension};
use crate::value::RuntimeError;
use log::debug;

fn sleep_common(ctx: &mut ScriptContext, detach: bool) -> Result<BuiltinOutcome, RuntimeError> {
    match ctx.take_resume() {
        None => {
            let millis = ctx.get_num(0)?.max(0) as u32;
            Ok(BuiltinOutcome::Suspend(Suspension::Sleep { millis, detach }))
        }
        Some(Resume::TimerElapsed) => Ok(BuiltinOutcome::Completed),
        Some(Resume::Reply(_)) => Err(RuntimeError::UnexpectedResume(ctx.name().to_string())),
    }
}

/// Pause; the player is released and the script continues unattached
pub fn sleep(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    sleep_common(ctx, true)
}

/// Pause while keeping the player; ends if the player left meanwhile
pub fn sleep2(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let outcome = sleep_common(ctx, false)?;
    if outcome == BuiltinOutcome::Completed {
        let rid = ctx.rid();
        if rid != 0 && !ctx.host().player_online(rid) {
            debug!("sleep2: player {} went offline, ending state {}", rid, ctx.state().id);
            ctx.end();
        }
    }
    Ok(outcome)
}

/// `rand(<range>)` yields [0, range); `rand(<min>, <max>)` yields [min, max]
pub fn rand(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let (low, high) = if ctx.has_arg(1) {
        let a = ctx.get_num(0)? as i64;
        let b = ctx.get_num(1)? as i64;
        (a.min(b), a.max(b))
    } else {
        (0, ctx.get_num(0)? as i64 - 1)
    };
    let value = if high <= low {
        low
    } else {
        ctx.rng().range(low, high)
    };
    ctx.push_int(value as i32);
    Ok(BuiltinOutcome::Completed)
}

pub fn debugmes(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let text = ctx.get_str(0)?;
    let oid = ctx.oid();
    ctx.host().debug_message(oid, &text);
    Ok(BuiltinOutcome::Completed)
}

/// Attach an online player without a running script; returns 1 on success
pub fn attachrid(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let rid = ctx.get_num(0)?;
    let own = ctx.state().id;
    let busy = rid > 0
        && ctx
            .interp
            .attached
            .get(&(rid as u32))
            .is_some_and(|&state| state != own);
    let attached = rid > 0 && !busy && ctx.host().player_online(rid as u32);
    if attached {
        ctx.state_mut().rid = rid as u32;
    }
    ctx.push_int(attached as i32);
    Ok(BuiltinOutcome::Completed)
}

pub fn detachrid(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    ctx.state_mut().rid = 0;
    Ok(BuiltinOutcome::Completed)
}

pub fn playerattached(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let rid = ctx.rid();
    let online = rid != 0 && ctx.host().player_online(rid);
    ctx.push_int(if online { rid as i32 } else { 0 });
    Ok(BuiltinOutcome::Completed)
}
