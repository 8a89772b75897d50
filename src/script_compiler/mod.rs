// Script Compiler Module
// Single-pass compiler from script source to bytecode

pub mod bytecode;
pub mod cursor;
pub mod error;
pub mod expr;
pub mod statement;
pub mod symbols;

use crate::builtins::BuiltinDef;
use crate::config::ScriptConfig;
use crate::script::Script;
use bytecode::{Emitter, LabelId, Op, OPERAND_LIMIT};
use cursor::Cursor;
use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};
use symbols::{SymbolId, SymbolKind, SymbolTable};

pub use error::{CompileError, CompileErrorKind, ParseError, ParseResult};

/// Builtins the compiler emits calls to on its own
#[derive(Debug, Clone, Copy)]
pub struct CoreSymbols {
    pub set: SymbolId,
    pub goto: SymbolId,
    pub jump_zero: SymbolId,
    pub callsub: SymbolId,
    pub ret: SymbolId,
    pub getelementofarray: SymbolId,
}

/// Open `switch` block
#[derive(Debug, Clone)]
pub(crate) struct SwitchState {
    /// Hidden global holding the switch value
    pub var: SymbolId,
    /// Where the next `case` comparison starts
    pub next_check: LabelId,
    pub default: Option<LabelId>,
    pub cases: IndexSet<i32>,
    /// A `case` or `default` was seen
    pub started: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum CurlyKind {
    Block,
    If,
    Switch(SwitchState),
    While,
    For,
    Do,
    Function,
}

/// Entry of the open-context stack
#[derive(Debug, Clone)]
pub(crate) struct Curly {
    pub kind: CurlyKind,
    /// `break` target
    pub brk: Option<LabelId>,
    /// `continue` target
    pub cont: Option<LabelId>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct UserFunction {
    pub defined: bool,
    /// First call site, for the undefined-function report
    pub first_call: Option<usize>,
}

pub struct ScriptCompiler<'a> {
    pub(crate) cur: Cursor<'a>,
    pub(crate) symbols: &'a mut SymbolTable,
    pub(crate) builtins: &'a [BuiltinDef],
    pub(crate) core: CoreSymbols,
    pub(crate) config: &'a ScriptConfig,
    pub(crate) emit: Emitter,
    pub(crate) curly: Vec<Curly>,
    /// Exported named labels, lowercase
    pub(crate) labels: IndexMap<String, usize>,
    pub(crate) functions: IndexMap<SymbolId, UserFunction>,
    /// Words passed where a label is required, with the first use
    pub(crate) expected_labels: IndexMap<SymbolId, usize>,
    pub(crate) switch_count: u32,
}

impl<'a> ScriptCompiler<'a> {
    pub fn new(
        source: &'a str,
        symbols: &'a mut SymbolTable,
        builtins: &'a [BuiltinDef],
        core: CoreSymbols,
        config: &'a ScriptConfig,
    ) -> Self {
        ScriptCompiler {
            cur: Cursor::new(source),
            symbols,
            builtins,
            core,
            config,
            emit: Emitter::new(),
            curly: Vec::new(),
            labels: IndexMap::new(),
            functions: IndexMap::new(),
            expected_labels: IndexMap::new(),
            switch_count: 0,
        }
    }

    /// Compile the whole source into a script object
    pub fn compile(mut self, file: &str, start_line: usize) -> Result<Script, CompileError> {
        let source = self.cur.source();
        debug!("compiling script '{}' ({} bytes)", file, source.len());
        if let Err(e) = self.parse_script() {
            return Err(e.locate(source, file, start_line));
        }
        if let Err(e) = self.finish() {
            return Err(e.locate(source, file, start_line));
        }
        let code = self.emit.into_code();
        debug!(
            "compiled script '{}': {} bytes of bytecode, {} labels",
            file,
            code.len(),
            self.labels.len()
        );
        Ok(Script::new(file, code, self.labels))
    }

    fn parse_script(&mut self) -> ParseResult<()> {
        self.cur.skip_space()?;
        if self.cur.peek() == b'{' {
            self.cur.advance(1);
            loop {
                self.cur.skip_space()?;
                if self.cur.at_end() {
                    return Err(ParseError::expected("'}'", self.cur.pos));
                }
                if self.cur.peek() == b'}' {
                    self.cur.advance(1);
                    break;
                }
                self.parse_statement()?;
            }
            self.cur.skip_space()?;
            if !self.cur.at_end() {
                return Err(ParseError::syntax("unexpected text after the end of the script", self.cur.pos));
            }
        } else {
            while !self.cur.at_end() {
                self.parse_statement()?;
                self.cur.skip_space()?;
            }
        }
        self.emit.emit_op(Op::Nop);
        Ok(())
    }

    /// End-of-script checks
    fn finish(&mut self) -> ParseResult<()> {
        if let Some(curly) = self.curly.last() {
            return Err(ParseError::syntax(
                format!("unclosed {} block", curly.kind_name()),
                self.cur.pos,
            ));
        }
        for (&symbol, &pos) in &self.expected_labels {
            if !self.emit.is_label(symbol) {
                return Err(ParseError::new(
                    CompileErrorKind::UndefinedLabel(self.symbols.name(symbol).to_string()),
                    pos,
                ));
            }
        }
        for (&symbol, function) in &self.functions {
            if let (false, Some(pos)) = (function.defined, function.first_call) {
                return Err(ParseError::new(
                    CompileErrorKind::UndefinedFunction(self.symbols.name(symbol).to_string()),
                    pos,
                ));
            }
        }
        if !self.emit.dangling_labels().is_empty() {
            warn!("script:finish: {} jump targets were never placed", self.emit.dangling_labels().len());
        }
        if self.emit.pos() >= OPERAND_LIMIT || self.symbols.len() >= OPERAND_LIMIT {
            return Err(ParseError::new(CompileErrorKind::ScriptTooLarge, self.cur.pos));
        }
        Ok(())
    }

    /// Builtin signature of a function symbol
    pub(crate) fn builtin(&self, symbol: SymbolId) -> Option<&'a BuiltinDef> {
        match self.symbols.kind(symbol) {
            SymbolKind::Function(index) => self.builtins.get(index),
            _ => None,
        }
    }

    /// `Name(func) Arg ... Func` with a compiler-chosen label argument
    pub(crate) fn emit_goto(&mut self, label: LabelId) {
        self.emit.emit_name(self.core.goto);
        self.emit.emit_op(Op::Arg);
        self.emit.emit_label(label);
        self.emit.emit_op(Op::Func);
    }
}

impl Curly {
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            CurlyKind::Block => "block",
            CurlyKind::If => "if",
            CurlyKind::Switch(_) => "switch",
            CurlyKind::While => "while",
            CurlyKind::For => "for",
            CurlyKind::Do => "do",
            CurlyKind::Function => "function",
        }
    }
}
