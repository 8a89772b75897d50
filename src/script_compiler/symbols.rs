// Shared string/symbol table
//
// Every identifier the compiler sees is interned once, case-insensitively,
// and referred to by its numeric id afterwards. The table is owned by the
// engine and outlives every compiled script.

use crate::variables::{is_string_name, VariableScope};
use indexmap::IndexMap;
use log::debug;

pub type SymbolId = u32;

/// What a name means to the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Plain identifier: variable, label or user function
    Nop,
    /// Folded to its value at compile time
    Constant(i32),
    /// Builtin, index into the engine's builtin list
    Function(usize),
    /// Player parameter read through the host
    Parameter(u32),
}

#[derive(Debug, Clone)]
pub struct Symbol {
    /// Name as first written
    pub name: String,
    pub kind: SymbolKind,
    pub scope: VariableScope,
    pub is_string: bool,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    ids: IndexMap<String, SymbolId>,
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `name`, adding it if unseen
    pub fn intern(&mut self, name: &str) -> SymbolId {
        let key = name.to_ascii_lowercase();
        if let Some(&id) = self.ids.get(&key) {
            return id;
        }
        let id = self.symbols.len() as SymbolId;
        self.symbols.push(Symbol {
            name: name.to_string(),
            kind: SymbolKind::Nop,
            scope: VariableScope::from_name(name),
            is_string: is_string_name(name),
        });
        self.ids.insert(key, id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.ids.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id as usize]
    }

    pub fn name(&self, id: SymbolId) -> &str {
        self.symbols
            .get(id as usize)
            .map(|s| s.name.as_str())
            .unwrap_or("<unknown>")
    }

    pub fn kind(&self, id: SymbolId) -> SymbolKind {
        self.symbols[id as usize].kind
    }

    pub fn set_kind(&mut self, id: SymbolId, kind: SymbolKind) {
        debug!("symbol '{}' is now {:?}", self.symbols[id as usize].name, kind);
        self.symbols[id as usize].kind = kind;
    }

    pub fn contains(&self, id: SymbolId) -> bool {
        (id as usize) < self.symbols.len()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_intern_is_case_insensitive() {
        let mut table = SymbolTable::new();
        let a = table.intern("Mes");
        let b = table.intern("MES");
        assert_eq!(a, b);
        assert_eq!(table.name(a), "Mes");
        assert_eq!(table.lookup("mes"), Some(a));
        assert_eq!(table.lookup("nope"), None);
    }

    #[test]
    fn test_scope_is_cached() {
        let mut table = SymbolTable::new();
        let id = table.intern(".@name$");
        let symbol = table.get(id);
        assert_eq!(symbol.scope, VariableScope::ScopeLocal);
        assert!(symbol.is_string);
        assert_eq!(symbol.kind, SymbolKind::Nop);
    }
}
