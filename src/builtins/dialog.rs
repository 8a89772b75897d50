// Player dialog builtins
//
// Builtins that wait for the player send their dialog on the first dispatch
// and return `Suspend`. The engine re-dispatches the same call once the reply
// arrives, with the reply available through `take_resume`.

use super::BuiltinOutcome;
use crate::context::ScriptContext;
use crate::host::DialogEvent;
use crate::state::{Reply, ReplyKind, Resume, Suspension};
use crate::value::{Reference, RuntimeError, Value};
use crate::variables::conv_num;
use log::{debug, warn};

/// Menu choice meaning the player closed the menu
pub const MENU_CANCEL: u32 = 255;

/// Reply handed to a re-dispatched call, `None` on the first dispatch
fn take_reply(ctx: &mut ScriptContext) -> Result<Option<Reply>, RuntimeError> {
    match ctx.take_resume() {
        None => Ok(None),
        Some(Resume::Reply(reply)) => Ok(Some(reply)),
        Some(Resume::TimerElapsed) => Err(RuntimeError::UnexpectedResume(ctx.name().to_string())),
    }
}

fn send(ctx: &mut ScriptContext, event: DialogEvent) -> Result<(), RuntimeError> {
    let rid = ctx.require_player()?;
    let oid = ctx.oid();
    ctx.host().dialog(rid, oid, event);
    Ok(())
}

/// Store the choice in the player's `@menu`
fn set_menu_var(ctx: &mut ScriptContext, choice: u32) -> Result<(), RuntimeError> {
    if let Some(symbol) = ctx.interp.symbols.lookup("@menu") {
        ctx.set_var(&Reference::new(symbol), Value::Int(choice as i32))?;
    }
    Ok(())
}

/// Menu entries of one option string; an empty string hides the option
fn split_options(text: &str) -> Vec<String> {
    if text.is_empty() {
        Vec::new()
    } else {
        text.split(':').map(str::to_string).collect()
    }
}

pub fn mes(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let text = ctx.get_str(0)?;
    send(ctx, DialogEvent::Message(text))?;
    Ok(BuiltinOutcome::Completed)
}

pub fn next(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    match take_reply(ctx)? {
        None => {
            send(ctx, DialogEvent::Next)?;
            Ok(BuiltinOutcome::Suspend(Suspension::Reply(ReplyKind::Continue)))
        }
        Some(_) => Ok(BuiltinOutcome::Completed),
    }
}

pub fn close(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    send(ctx, DialogEvent::Close)?;
    ctx.end();
    Ok(BuiltinOutcome::Completed)
}

/// Close the dialog window but keep running once the player acknowledges
pub fn close2(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    match take_reply(ctx)? {
        None => {
            send(ctx, DialogEvent::Close)?;
            Ok(BuiltinOutcome::Suspend(Suspension::Reply(ReplyKind::Continue)))
        }
        Some(_) => Ok(BuiltinOutcome::Completed),
    }
}

/// Choice as a menu index, or `None` when the menu was cancelled
fn menu_choice(ctx: &ScriptContext, reply: Reply, total: usize) -> Result<Option<u32>, RuntimeError> {
    let choice = match reply {
        Reply::Menu(choice) => choice,
        Reply::Number(n) if n >= 0 => n as u32,
        _ => return Err(RuntimeError::UnexpectedResume(ctx.name().to_string())),
    };
    if choice == MENU_CANCEL || choice == 0 {
        debug!("{}: menu cancelled", ctx.name());
        return Ok(None);
    }
    if choice as usize > total {
        warn!(
            "{}: choice {} out of range ({} options)",
            ctx.name(),
            choice,
            total
        );
        return Ok(None);
    }
    Ok(Some(choice))
}

/// `menu "<option>", <label>{, "<option>", <label>, ...}`
///
/// An option string may hold several `:`-separated entries that all lead
/// to the same label. A `-` label continues after the menu.
pub fn menu(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    if ctx.arg_count() % 2 != 0 {
        return Err(RuntimeError::Failed(
            "menu: illegal number of arguments".to_string(),
        ));
    }
    let mut groups = Vec::new();
    for i in (0..ctx.arg_count()).step_by(2) {
        let entries = split_options(&ctx.get_str(i)?);
        let label = ctx.get_label(i + 1)?;
        groups.push((entries, label));
    }
    let total: usize = groups.iter().map(|(entries, _)| entries.len()).sum();

    let Some(reply) = take_reply(ctx)? else {
        let options = groups.into_iter().flat_map(|(entries, _)| entries).collect();
        send(ctx, DialogEvent::Menu(options))?;
        return Ok(BuiltinOutcome::Suspend(Suspension::Reply(ReplyKind::Menu)));
    };
    let Some(choice) = menu_choice(ctx, reply, total)? else {
        ctx.end();
        return Ok(BuiltinOutcome::Completed);
    };
    set_menu_var(ctx, choice)?;

    let mut seen = 0;
    for (entries, label) in groups {
        seen += entries.len();
        if choice as usize <= seen {
            if let Some(pos) = label {
                ctx.jump(pos);
            }
            break;
        }
    }
    Ok(BuiltinOutcome::Completed)
}

fn select_options(ctx: &mut ScriptContext) -> Result<Vec<String>, RuntimeError> {
    let mut options = Vec::new();
    for i in 0..ctx.arg_count() {
        options.extend(ctx.get_str(i)?.split(':').map(str::to_string));
    }
    Ok(options)
}

/// Shared body of `select` and `prompt`
fn select_common(ctx: &mut ScriptContext, end_on_cancel: bool) -> Result<BuiltinOutcome, RuntimeError> {
    let options = select_options(ctx)?;
    let Some(reply) = take_reply(ctx)? else {
        send(ctx, DialogEvent::Menu(options))?;
        return Ok(BuiltinOutcome::Suspend(Suspension::Reply(ReplyKind::Menu)));
    };
    match menu_choice(ctx, reply, options.len())? {
        Some(choice) => {
            set_menu_var(ctx, choice)?;
            ctx.push_int(choice as i32);
        }
        None if end_on_cancel => ctx.end(),
        None => {
            set_menu_var(ctx, MENU_CANCEL)?;
            ctx.push_int(MENU_CANCEL as i32);
        }
    }
    Ok(BuiltinOutcome::Completed)
}

pub fn select(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    select_common(ctx, true)
}

pub fn prompt(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    select_common(ctx, false)
}

/// `input <variable>{, <min>{, <max>}}`
///
/// Numbers outside the bounds are clamped; strings are bounded by length.
/// Returns 1 above the maximum, -1 below the minimum, 0 otherwise.
pub fn input(ctx: &mut ScriptContext) -> Result<BuiltinOutcome, RuntimeError> {
    let reference = ctx.get_ref(0)?;
    let is_string = ctx.is_string_var(&reference);
    let Some(reply) = take_reply(ctx)? else {
        let event = if is_string {
            DialogEvent::InputText
        } else {
            DialogEvent::InputNumber
        };
        let kind = if is_string { ReplyKind::Text } else { ReplyKind::Number };
        send(ctx, event)?;
        return Ok(BuiltinOutcome::Suspend(Suspension::Reply(kind)));
    };

    let min = ctx.get_num_or(1, ctx.config().input_min_value)?;
    let max = ctx.get_num_or(2, ctx.config().input_max_value)?;
    let result = if is_string {
        let text = match reply {
            Reply::Text(text) => text,
            Reply::Number(n) => n.to_string(),
            _ => return Err(RuntimeError::UnexpectedResume("input".to_string())),
        };
        let len = text.chars().count() as i64;
        ctx.set_var(&reference, Value::Str(text))?;
        if len > max as i64 {
            1
        } else if len < min as i64 {
            -1
        } else {
            0
        }
    } else {
        let number = match reply {
            Reply::Number(n) => n,
            Reply::Text(text) => conv_num(&text),
            _ => return Err(RuntimeError::UnexpectedResume("input".to_string())),
        };
        let (stored, result) = if number > max {
            (max, 1)
        } else if number < min {
            (min, -1)
        } else {
            (number, 0)
        };
        ctx.set_var(&reference, Value::Int(stored))?;
        result
    };
    ctx.push_int(result);
    Ok(BuiltinOutcome::Completed)
}
