use crate::variables::VarStorage;
use indexmap::IndexMap;
use std::cell::RefCell;

/// A compiled script.
///
/// The bytecode is immutable once compiled and may be executed by any number
/// of states at the same time. Script-local (`.name`) variables live here and
/// are dropped with the script.
#[derive(Debug)]
pub struct Script {
    /// Source file name, for diagnostics
    pub name: String,
    pub(crate) code: Vec<u8>,
    pub(crate) labels: IndexMap<String, usize>,
    pub(crate) local: RefCell<VarStorage>,
}

impl Script {
    pub(crate) fn new(name: &str, code: Vec<u8>, labels: IndexMap<String, usize>) -> Self {
        Script {
            name: name.to_string(),
            code,
            labels,
            local: RefCell::new(VarStorage::new()),
        }
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Position of a named label (case-insensitive)
    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(&name.to_ascii_lowercase()).copied()
    }

    /// Every named label with its position, in definition order
    pub fn labels(&self) -> impl Iterator<Item = (&str, usize)> {
        self.labels.iter().map(|(name, pos)| (name.as_str(), *pos))
    }

    /// Snapshot of the script-local variables
    pub fn locals(&self) -> VarStorage {
        self.local.borrow().clone()
    }
}
