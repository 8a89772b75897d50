// Core builtin functions
//
// Each builtin has a type signature used by the compiler (argument counts,
// label arguments) and by the interpreter's argument type warnings:
//   i int, s string, v any value, r variable reference, l label,
//   ? optional from here on, * repeat the rest.

pub mod dialog;
pub mod flow;
pub mod misc;
pub mod vars;

use crate::context::ScriptContext;
use crate::state::Suspension;
use crate::value::RuntimeError;

/// Native implementation of a builtin
pub type BuiltinFn = fn(&mut ScriptContext<'_, '_>) -> Result<BuiltinOutcome, RuntimeError>;

/// What a builtin did with its call
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltinOutcome {
    /// Finished; any pushed value is the call's result
    Completed,
    /// Dispatch this call again once the suspension is satisfied
    Suspend(Suspension),
}

#[derive(Clone)]
pub struct BuiltinDef {
    pub name: String,
    pub signature: String,
    pub func: BuiltinFn,
}

impl std::fmt::Debug for BuiltinDef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.signature)
    }
}

/// Expected type letter of argument `index`.
///
/// Past the end of a signature ending in `*`, signatures that mix labels
/// into their repeated part (`sl*`) cycle through the part before the `*`;
/// other repeated arguments are untyped. Returns 0 past the end of a fixed
/// signature.
pub fn signature_char(signature: &str, index: usize) -> u8 {
    let bytes = signature.as_bytes();
    let base_len = bytes.iter().position(|&c| c == b'*').unwrap_or(bytes.len());
    let base = &bytes[..base_len];
    if index < base.len() {
        return base[index];
    }
    if base_len == bytes.len() {
        return 0;
    }
    if base.len() >= 2 && base.contains(&b'l') {
        base[index % base.len()]
    } else {
        b'*'
    }
}

/// Builtins every engine starts with
pub fn core_builtins() -> Vec<(&'static str, &'static str, BuiltinFn)> {
    vec![
        ("goto", "l", flow::goto as BuiltinFn),
        ("jump_zero", "il", flow::jump_zero),
        ("callsub", "l*", flow::callsub),
        ("callfunc", "s*", flow::callfunc),
        ("return", "?", flow::return_),
        ("getarg", "i?", flow::getarg),
        ("getargcount", "", flow::getargcount),
        ("end", "", flow::end),
        ("freeloop", "?", flow::freeloop),
        ("set", "rv", vars::set),
        ("setarray", "rv*", vars::setarray),
        ("cleararray", "rvi", vars::cleararray),
        ("getarraysize", "r", vars::getarraysize),
        ("getelementofarray", "ri", vars::getelementofarray),
        ("deletearray", "r?", vars::deletearray),
        ("mes", "s", dialog::mes),
        ("next", "", dialog::next),
        ("close", "", dialog::close),
        ("close2", "", dialog::close2),
        ("menu", "sl*", dialog::menu),
        ("select", "s*", dialog::select),
        ("prompt", "s*", dialog::prompt),
        ("input", "r??", dialog::input),
        ("sleep", "i", misc::sleep),
        ("sleep2", "i", misc::sleep2),
        ("rand", "i?", misc::rand),
        ("debugmes", "v", misc::debugmes),
        ("attachrid", "i", misc::attachrid),
        ("detachrid", "", misc::detachrid),
        ("playerattached", "", misc::playerattached),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_signature_char() {
        assert_eq!(signature_char("il", 0), b'i');
        assert_eq!(signature_char("il", 1), b'l');
        assert_eq!(signature_char("il", 2), 0);
        assert_eq!(signature_char("r??", 2), b'?');
        assert_eq!(signature_char("l*", 0), b'l');
        assert_eq!(signature_char("l*", 3), b'*');
        assert_eq!(signature_char("s*", 5), b'*');
    }

    #[test]
    fn test_menu_signature_cycles() {
        let kinds: Vec<u8> = (0..6).map(|i| signature_char("sl*", i)).collect();
        assert_eq!(kinds, b"slslsl".to_vec());
    }

    #[test]
    fn test_core_names_are_unique() {
        let list = core_builtins();
        let mut names: Vec<&str> = list.iter().map(|(name, _, _)| *name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), list.len());
    }
}
