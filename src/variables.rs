// Variable namespaces and storage
//
// The leading sigil of an identifier selects its namespace. Classification
// happens once when the name is interned; the interpreter only consults the
// cached scope afterwards.

use crate::interpreter::Interpreter;
use crate::script_compiler::symbols::{SymbolId, SymbolKind};
use crate::state::ScriptState;
use crate::value::{RefOwner, Reference, RuntimeError, Value};
use indexmap::IndexMap;
use log::warn;

/// Storage namespace of a variable, decided by its name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableScope {
    /// `@name` - character, not saved
    Temporary,
    /// `#name` - account, per server
    Account,
    /// `##name` - account, shared by all servers
    AccountGlobal,
    /// `.name` - owned by the compiled script (NPC)
    NpcLocal,
    /// `.@name` - one activation of a script or subroutine
    ScopeLocal,
    /// `$name` - server wide, persistent
    Global,
    /// `$@name` - server wide, not saved
    GlobalTemporary,
    /// `'name` - map instance
    Instance,
    /// bare name - character, persistent
    Character,
}

impl VariableScope {
    /// Classify an identifier by its sigil
    pub fn from_name(name: &str) -> VariableScope {
        if name.starts_with("$@") {
            VariableScope::GlobalTemporary
        } else if name.starts_with('$') {
            VariableScope::Global
        } else if name.starts_with(".@") {
            VariableScope::ScopeLocal
        } else if name.starts_with('.') {
            VariableScope::NpcLocal
        } else if name.starts_with("##") {
            VariableScope::AccountGlobal
        } else if name.starts_with('#') {
            VariableScope::Account
        } else if name.starts_with('@') {
            VariableScope::Temporary
        } else if name.starts_with('\'') {
            VariableScope::Instance
        } else {
            VariableScope::Character
        }
    }

    /// Whether a controlling player is needed to reach the storage
    pub fn needs_player(self) -> bool {
        matches!(
            self,
            VariableScope::Temporary
                | VariableScope::Account
                | VariableScope::AccountGlobal
                | VariableScope::Character
        )
    }
}

/// String-typed variables carry a trailing `$`
pub fn is_string_name(name: &str) -> bool {
    name.ends_with('$')
}

/// Symbol and array index packed into one lookup key
pub fn reference_uid(symbol: SymbolId, index: u32) -> u64 {
    (symbol as u64) | ((index as u64) << 32)
}

/// Sparse variable storage for one namespace instance.
///
/// Zero and the empty string are the implicit defaults; assigning them
/// removes the entry, so arrays stay sparse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarStorage {
    ints: IndexMap<u64, i32>,
    strs: IndexMap<u64, String>,
}

impl VarStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_int(&self, symbol: SymbolId, index: u32) -> i32 {
        self.ints
            .get(&reference_uid(symbol, index))
            .copied()
            .unwrap_or(0)
    }

    pub fn get_str(&self, symbol: SymbolId, index: u32) -> String {
        self.strs
            .get(&reference_uid(symbol, index))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_int(&mut self, symbol: SymbolId, index: u32, value: i32) {
        let uid = reference_uid(symbol, index);
        if value == 0 {
            self.ints.shift_remove(&uid);
        } else {
            self.ints.insert(uid, value);
        }
    }

    pub fn set_str(&mut self, symbol: SymbolId, index: u32, value: &str) {
        let uid = reference_uid(symbol, index);
        if value.is_empty() {
            self.strs.shift_remove(&uid);
        } else {
            self.strs.insert(uid, value.to_string());
        }
    }

    pub fn is_set(&self, symbol: SymbolId, index: u32, is_string: bool) -> bool {
        let uid = reference_uid(symbol, index);
        if is_string {
            self.strs.contains_key(&uid)
        } else {
            self.ints.contains_key(&uid)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ints.is_empty() && self.strs.is_empty()
    }

    pub fn clear(&mut self) {
        self.ints.clear();
        self.strs.clear();
    }

    /// (symbol, index, value) for every integer entry
    pub fn ints(&self) -> impl Iterator<Item = (SymbolId, u32, i32)> + '_ {
        self.ints
            .iter()
            .map(|(uid, v)| ((*uid & 0xFFFF_FFFF) as SymbolId, (*uid >> 32) as u32, *v))
    }

    /// (symbol, index, value) for every string entry
    pub fn strs(&self) -> impl Iterator<Item = (SymbolId, u32, &str)> + '_ {
        self.strs
            .iter()
            .map(|(uid, v)| ((*uid & 0xFFFF_FFFF) as SymbolId, (*uid >> 32) as u32, v.as_str()))
    }
}

/// Interpret a string as a number the way scripts expect: leading integer,
/// garbage reported but tolerated
pub fn conv_num(text: &str) -> i32 {
    let trimmed = text.trim();
    let bytes = trimmed.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        if !trimmed.is_empty() {
            warn!("script:conv_num: invalid data for number conversion \"{}\"", text);
        }
        return 0;
    }
    if end != bytes.len() {
        warn!("script:conv_num: trailing data in number \"{}\"", text);
    }
    match trimmed[..end].parse::<i64>() {
        Ok(v) if v > i32::MAX as i64 => {
            warn!("script:conv_num: overflow detected, capping to {}", i32::MAX);
            i32::MAX
        }
        Ok(v) if v < i32::MIN as i64 => {
            warn!("script:conv_num: underflow detected, capping to {}", i32::MIN);
            i32::MIN
        }
        Ok(v) => v as i32,
        Err(_) => {
            warn!("script:conv_num: overflow detected in \"{}\"", text);
            if trimmed.starts_with('-') {
                i32::MIN
            } else {
                i32::MAX
            }
        }
    }
}

impl Interpreter<'_> {
    /// Run `f` against the storage a reference points at.
    /// `None` means the namespace is unreachable (no player, no instance).
    fn with_storage<R>(
        &mut self,
        st: &ScriptState,
        reference: &Reference,
        f: impl FnOnce(&mut VarStorage) -> R,
    ) -> Option<R> {
        let scope = self.symbols.get(reference.symbol).scope;
        match scope {
            VariableScope::Global | VariableScope::GlobalTemporary => Some(f(&mut *self.globals)),
            VariableScope::ScopeLocal => match &reference.owner {
                Some(RefOwner::Scope(vars)) => Some(f(&mut *vars.borrow_mut())),
                _ => Some(f(&mut *st.scope.borrow_mut())),
            },
            VariableScope::NpcLocal => match &reference.owner {
                Some(RefOwner::Script(script)) => Some(f(&mut *script.local.borrow_mut())),
                _ => Some(f(&mut *st.script.local.borrow_mut())),
            },
            VariableScope::Instance => self.host.instance_vars(st.oid).map(f),
            VariableScope::Temporary
            | VariableScope::Account
            | VariableScope::AccountGlobal
            | VariableScope::Character => {
                if st.rid == 0 {
                    None
                } else {
                    self.host.player_vars(st.rid, scope).map(f)
                }
            }
        }
    }

    /// Resolve a stack value to a plain int or string
    pub(crate) fn get_val(&mut self, st: &ScriptState, value: Value) -> Result<Value, RuntimeError> {
        match value {
            Value::Ref(reference) => self.read_reference(st, &reference),
            other => Ok(other),
        }
    }

    pub(crate) fn read_reference(
        &mut self,
        st: &ScriptState,
        reference: &Reference,
    ) -> Result<Value, RuntimeError> {
        let symbols = self.symbols;
        let symbol = symbols.get(reference.symbol);
        let is_string = symbol.is_string;
        match symbol.kind {
            SymbolKind::Constant(value) => return Ok(Value::Int(value)),
            SymbolKind::Parameter(param) => {
                if st.rid == 0 {
                    warn!(
                        "script:get_val: parameter '{}' read without an attached player",
                        symbol.name
                    );
                    return Ok(Value::Int(0));
                }
                return Ok(Value::Int(self.host.read_param(st.rid, param).unwrap_or(0)));
            }
            SymbolKind::Function(_) => {
                return Err(RuntimeError::NotAVariable(symbol.name.clone()));
            }
            SymbolKind::Nop => {}
        }

        let (symbol_id, index) = (reference.symbol, reference.index);
        let found = self.with_storage(st, reference, |vars| {
            if is_string {
                Value::Str(vars.get_str(symbol_id, index))
            } else {
                Value::Int(vars.get_int(symbol_id, index))
            }
        });
        match found {
            Some(value) => Ok(value),
            None => {
                warn!(
                    "script:get_val: cannot access variable '{}' (no attached player or instance), using default",
                    self.symbols.name(symbol_id)
                );
                Ok(if is_string {
                    Value::Str(String::new())
                } else {
                    Value::Int(0)
                })
            }
        }
    }

    /// Assign a resolved value; converts between int and string to fit the variable type
    pub(crate) fn set_reference(
        &mut self,
        st: &ScriptState,
        reference: &Reference,
        value: Value,
    ) -> Result<(), RuntimeError> {
        if reference.index >= self.config.max_array_size {
            return Err(RuntimeError::ArrayIndexOutOfRange {
                name: self.symbols.name(reference.symbol).to_string(),
                index: reference.index as i64,
                max: self.config.max_array_size,
            });
        }
        let symbols = self.symbols;
        let symbol = symbols.get(reference.symbol);
        let is_string = symbol.is_string;
        match symbol.kind {
            SymbolKind::Constant(_) | SymbolKind::Function(_) => {
                return Err(RuntimeError::NotAVariable(symbol.name.clone()));
            }
            SymbolKind::Parameter(param) => {
                let number = match &value {
                    Value::Int(v) => *v,
                    Value::Str(s) => conv_num(s),
                    other => return Err(RuntimeError::type_mismatch("set", other)),
                };
                if st.rid == 0 || !self.host.write_param(st.rid, param, number) {
                    warn!(
                        "script:set: parameter '{}' cannot be written without an attached player",
                        symbol.name
                    );
                }
                return Ok(());
            }
            SymbolKind::Nop => {}
        }

        let (symbol_id, index) = (reference.symbol, reference.index);
        let stored = match value {
            Value::Int(v) if is_string => {
                let text = v.to_string();
                self.with_storage(st, reference, |vars| vars.set_str(symbol_id, index, &text))
            }
            Value::Int(v) => self.with_storage(st, reference, |vars| vars.set_int(symbol_id, index, v)),
            Value::Str(s) if is_string => {
                self.with_storage(st, reference, |vars| vars.set_str(symbol_id, index, &s))
            }
            Value::Str(s) => {
                let number = conv_num(&s);
                self.with_storage(st, reference, |vars| vars.set_int(symbol_id, index, number))
            }
            other => return Err(RuntimeError::type_mismatch("set", &other)),
        };
        if stored.is_none() {
            warn!(
                "script:set_reg: cannot store variable '{}' (no attached player or instance), value dropped",
                self.symbols.name(symbol_id)
            );
        }
        Ok(())
    }

    /// Highest populated index + 1, scanning from the reference's index
    /// up to the array capacity
    pub(crate) fn array_size(&mut self, st: &ScriptState, reference: &Reference) -> u32 {
        let is_string = self.symbols.get(reference.symbol).is_string;
        let max = self.config.max_array_size;
        let symbol_id = reference.symbol;
        let start = reference.index;
        self.with_storage(st, reference, |vars| {
            let mut size = 0;
            for index in start..max {
                if vars.is_set(symbol_id, index, is_string) {
                    size = index + 1;
                }
            }
            size
        })
        .unwrap_or(0)
    }

    /// Same variable, different element
    pub(crate) fn element(&self, reference: &Reference, index: i64) -> Result<Reference, RuntimeError> {
        if index < 0 || index >= self.config.max_array_size as i64 {
            return Err(RuntimeError::ArrayIndexOutOfRange {
                name: self.symbols.name(reference.symbol).to_string(),
                index,
                max: self.config.max_array_size,
            });
        }
        Ok(Reference {
            symbol: reference.symbol,
            index: index as u32,
            owner: reference.owner.clone(),
        })
    }

    /// Default value for the variable's type
    pub(crate) fn default_for(&self, reference: &Reference) -> Value {
        if self.symbols.get(reference.symbol).is_string {
            Value::Str(String::new())
        } else {
            Value::Int(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_sigils_select_scope() {
        assert_eq!(VariableScope::from_name("$@tmp"), VariableScope::GlobalTemporary);
        assert_eq!(VariableScope::from_name("$gold"), VariableScope::Global);
        assert_eq!(VariableScope::from_name(".@i"), VariableScope::ScopeLocal);
        assert_eq!(VariableScope::from_name(".count"), VariableScope::NpcLocal);
        assert_eq!(VariableScope::from_name("##bank"), VariableScope::AccountGlobal);
        assert_eq!(VariableScope::from_name("#points"), VariableScope::Account);
        assert_eq!(VariableScope::from_name("@menu"), VariableScope::Temporary);
        assert_eq!(VariableScope::from_name("'stage"), VariableScope::Instance);
        assert_eq!(VariableScope::from_name("quest_step"), VariableScope::Character);
        assert!(is_string_name(".@name$"));
        assert!(!is_string_name(".@name"));
    }

    #[test]
    fn test_storage_is_sparse() {
        let mut vars = VarStorage::new();
        vars.set_int(3, 5, 9);
        assert!(vars.is_set(3, 5, false));
        assert_eq!(vars.get_int(3, 4), 0);
        vars.set_int(3, 5, 0);
        assert!(vars.is_empty());

        vars.set_str(4, 0, "abc");
        assert_eq!(vars.get_str(4, 0), "abc");
        vars.set_str(4, 0, "");
        assert!(!vars.is_set(4, 0, true));
    }

    #[test]
    fn test_entries_report_symbol_and_index() {
        let mut vars = VarStorage::new();
        vars.set_int(7, 2, 11);
        let entries: Vec<_> = vars.ints().collect();
        assert_eq!(entries, vec![(7, 2, 11)]);
    }

    #[test]
    fn test_conv_num() {
        assert_eq!(conv_num("42"), 42);
        assert_eq!(conv_num(" -7 "), -7);
        assert_eq!(conv_num("12abc"), 12);
        assert_eq!(conv_num("abc"), 0);
        assert_eq!(conv_num("99999999999"), i32::MAX);
    }
}
