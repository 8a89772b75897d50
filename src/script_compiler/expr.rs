// Expression parsing
//
// Precedence climbing over the operator table below. Operands are emitted
// as they are parsed and each operator opcode follows its operands, so the
// bytecode is in postfix order.
//
//   ?:  0 (right associative)    ||  1    &&  2    |  3    ^  4    &  5
//   == !=  6    < <= > >=  7    << >>  8    + -  9    * / %  10
//   unary - ! ~ bind tighter than every binary operator

use super::bytecode::Op;
use super::error::{CompileErrorKind, ParseError, ParseResult};
use super::symbols::{SymbolId, SymbolKind};
use super::ScriptCompiler;
use crate::builtins::signature_char;
use crate::variables::VariableScope;
use log::warn;

/// Assignment operator found after a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Assign {
    Set,
    /// `op=`
    Compound(Op),
    /// `++`/`--`, carrying `Add` or `Sub`
    Increment(Op),
}

/// Source region of an assignment: the variable (with any index) and the operator
#[derive(Debug, Clone, Copy)]
pub(crate) struct AssignTarget {
    pub var_start: usize,
    pub op_end: usize,
    pub op: Assign,
}

/// How the argument list of a call is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallStyle {
    /// Inside an expression: `f(a, b)`, or `f` alone for no arguments
    Expression,
    /// As a statement ending at the given byte: `f a, b;` or `f(a, b);`
    Statement(u8),
}

impl ScriptCompiler<'_> {
    pub(crate) fn parse_expr(&mut self) -> ParseResult<()> {
        self.parse_subexpr(-1)
    }

    /// Binary operator at the cursor with its precedence and length
    fn binary_operator(&self) -> Option<(Op, i32, usize)> {
        let (c0, c1) = (self.cur.peek(), self.cur.peek_at(1));
        let found = match (c0, c1) {
            (b'?', _) => (Op::Op3, 0, 1),
            (b'|', b'|') => (Op::LorJump, 1, 2),
            (b'&', b'&') => (Op::LandJump, 2, 2),
            (b'|', _) => (Op::Or, 3, 1),
            (b'^', _) => (Op::Xor, 4, 1),
            (b'&', _) => (Op::And, 5, 1),
            (b'=', b'=') => (Op::Eq, 6, 2),
            (b'!', b'=') => (Op::Ne, 6, 2),
            (b'>', b'>') => (Op::RShift, 8, 2),
            (b'>', b'=') => (Op::Ge, 7, 2),
            (b'>', _) => (Op::Gt, 7, 1),
            (b'<', b'<') => (Op::LShift, 8, 2),
            (b'<', b'=') => (Op::Le, 7, 2),
            (b'<', _) => (Op::Lt, 7, 1),
            (b'+', c) if c != b'+' => (Op::Add, 9, 1),
            (b'-', c) if c != b'-' => (Op::Sub, 9, 1),
            (b'*', _) => (Op::Mul, 10, 1),
            (b'/', _) => (Op::Div, 10, 1),
            (b'%', _) => (Op::Mod, 10, 1),
            _ => return None,
        };
        Some(found)
    }

    /// Parse operators binding tighter than `limit`
    pub(crate) fn parse_subexpr(&mut self, limit: i32) -> ParseResult<()> {
        self.cur.skip_space()?;
        let (c0, c1) = (self.cur.peek(), self.cur.peek_at(1));

        if (c0 == b'+' || c0 == b'-') && c1 == c0 {
            let op = if c0 == b'+' { Op::AddPre } else { Op::SubPre };
            self.cur.advance(2);
            self.cur.skip_space()?;
            self.parse_variable_ref()?;
            self.emit.emit_op(op);
        } else if c0 == b'-' && self.no_label_follows()? {
            self.cur.advance(1);
            self.emit.emit_op(Op::NoLabel);
        } else if matches!(c0, b'-' | b'!' | b'~') && !self.cur.at_number() {
            let op = match c0 {
                b'-' => Op::Neg,
                b'!' => Op::LNot,
                _ => Op::Not,
            };
            self.cur.advance(1);
            self.parse_subexpr(10)?;
            self.emit.emit_op(op);
        } else {
            self.parse_simpleexpr()?;
        }

        loop {
            self.cur.skip_space()?;
            let Some((op, opl, len)) = self.binary_operator() else {
                break;
            };
            if opl <= limit {
                break;
            }
            self.cur.advance(len);
            match op {
                Op::Op3 => {
                    self.parse_subexpr(-1)?;
                    self.cur.expect(b':', "':'")?;
                    self.parse_subexpr(-1)?;
                    self.emit.emit_op(Op::Op3);
                }
                Op::LandJump | Op::LorJump => {
                    let end = self.emit.new_label();
                    self.emit.emit_jump(op, end);
                    self.parse_subexpr(opl)?;
                    self.emit.emit_op(Op::Bool);
                    self.emit.place_label(end);
                }
                _ => {
                    self.parse_subexpr(opl)?;
                    self.emit.emit_op(op);
                }
            }
        }
        Ok(())
    }

    /// A `-` standing alone as an argument
    fn no_label_follows(&self) -> ParseResult<bool> {
        let mut probe = self.cur.clone();
        probe.advance(1);
        probe.skip_space()?;
        Ok(probe.at_end() || matches!(probe.peek(), b',' | b';' | b')'))
    }

    fn parse_simpleexpr(&mut self) -> ParseResult<()> {
        let c = self.cur.peek();
        if c == b'(' {
            self.cur.advance(1);
            self.parse_subexpr(-1)?;
            return self.cur.expect(b')', "')'");
        }
        if self.cur.at_number() {
            let value = self.cur.parse_number()?;
            self.emit.emit_signed(value);
            return Ok(());
        }
        if c == b'"' {
            let text = self.cur.parse_string()?;
            self.emit.emit_str(&text);
            return Ok(());
        }

        let start = self.cur.pos;
        let end = self.cur.word_end(start);
        if end == start {
            if self.cur.at_end() {
                return Err(ParseError::new(CompileErrorKind::UnexpectedEnd, start));
            }
            return Err(ParseError::syntax(
                format!("unexpected character '{}'", c as char),
                start,
            ));
        }
        let symbol = self.symbols.intern(self.cur.slice(start, end));
        match self.symbols.kind(symbol) {
            SymbolKind::Constant(value) => {
                self.cur.pos = end;
                self.emit.emit_signed(value);
            }
            SymbolKind::Function(_) => {
                self.cur.pos = end;
                self.parse_builtin_call(symbol, start, CallStyle::Expression)?;
            }
            SymbolKind::Parameter(_) | SymbolKind::Nop => {
                if self.is_user_call(symbol, end)? {
                    self.cur.pos = end;
                    self.parse_user_call(symbol, start, CallStyle::Expression)?;
                } else if let Some(target) = self.peek_assignment(start)? {
                    self.parse_assignment(target, true)?;
                } else {
                    self.parse_variable_ref()?;
                }
            }
        }
        Ok(())
    }

    /// Whether a plain word names a user function at this point
    pub(crate) fn is_user_call(&self, symbol: SymbolId, end: usize) -> ParseResult<bool> {
        let entry = self.symbols.get(symbol);
        if entry.kind != SymbolKind::Nop || entry.scope != VariableScope::Character || entry.is_string {
            return Ok(false);
        }
        if self.functions.contains_key(&symbol) {
            return Ok(true);
        }
        let mut probe = self.cur.clone();
        probe.pos = end;
        probe.skip_space()?;
        Ok(probe.peek() == b'(')
    }

    fn emit_variable_name(&mut self, symbol: SymbolId) {
        match self.symbols.kind(symbol) {
            SymbolKind::Parameter(_) => self.emit.emit_name(symbol),
            _ => self.emit.emit_symbol(symbol),
        }
    }

    /// Variable reference at the cursor, with an optional `[index]`
    pub(crate) fn parse_variable_ref(&mut self) -> ParseResult<SymbolId> {
        let start = self.cur.pos;
        let end = self.cur.word_end(start);
        if end == start {
            return Err(ParseError::expected("variable name", start));
        }
        let symbol = self.symbols.intern(self.cur.slice(start, end));
        match self.symbols.kind(symbol) {
            SymbolKind::Nop | SymbolKind::Parameter(_) => {}
            _ => {
                return Err(ParseError::syntax(
                    format!("'{}' is not a variable", self.symbols.name(symbol)),
                    start,
                ))
            }
        }
        self.cur.pos = end;
        self.cur.skip_space()?;
        if self.cur.peek() == b'[' {
            self.cur.advance(1);
            self.emit.emit_name(self.core.getelementofarray);
            self.emit.emit_op(Op::Arg);
            self.emit_variable_name(symbol);
            self.parse_subexpr(-1)?;
            self.cur.expect(b']', "']'")?;
            self.emit.emit_op(Op::Func);
        } else {
            self.cur.pos = end;
            self.emit_variable_name(symbol);
        }
        Ok(symbol)
    }

    /// End of the variable (and index) starting at `start`
    pub(crate) fn variable_extent(&self, start: usize) -> ParseResult<Option<usize>> {
        let end = self.cur.word_end(start);
        if end == start {
            return Ok(None);
        }
        let mut probe = self.cur.clone();
        probe.pos = end;
        probe.skip_space()?;
        if probe.peek() != b'[' {
            return Ok(Some(end));
        }
        let mut depth = 0;
        loop {
            if probe.at_end() {
                return Ok(None);
            }
            match probe.peek() {
                b'"' => {
                    probe.parse_string()?;
                    continue;
                }
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        probe.advance(1);
                        return Ok(Some(probe.pos));
                    }
                }
                _ => {}
            }
            probe.advance(1);
        }
    }

    /// Assignment operator following the variable at `start`, if any
    pub(crate) fn peek_assignment(&self, start: usize) -> ParseResult<Option<AssignTarget>> {
        let Some(var_end) = self.variable_extent(start)? else {
            return Ok(None);
        };
        let mut probe = self.cur.clone();
        probe.pos = var_end;
        probe.skip_space()?;
        let (c0, c1, c2) = (probe.peek(), probe.peek_at(1), probe.peek_at(2));
        let (op, len) = match (c0, c1, c2) {
            (b'=', b'=', _) => return Ok(None),
            (b'=', _, _) => (Assign::Set, 1),
            (b'+', b'+', _) => (Assign::Increment(Op::Add), 2),
            (b'-', b'-', _) => (Assign::Increment(Op::Sub), 2),
            (b'<', b'<', b'=') => (Assign::Compound(Op::LShift), 3),
            (b'>', b'>', b'=') => (Assign::Compound(Op::RShift), 3),
            (b'+', b'=', _) => (Assign::Compound(Op::Add), 2),
            (b'-', b'=', _) => (Assign::Compound(Op::Sub), 2),
            (b'*', b'=', _) => (Assign::Compound(Op::Mul), 2),
            (b'/', b'=', _) => (Assign::Compound(Op::Div), 2),
            (b'%', b'=', _) => (Assign::Compound(Op::Mod), 2),
            (b'&', b'=', _) => (Assign::Compound(Op::And), 2),
            (b'|', b'=', _) => (Assign::Compound(Op::Or), 2),
            (b'^', b'=', _) => (Assign::Compound(Op::Xor), 2),
            _ => return Ok(None),
        };
        Ok(Some(AssignTarget {
            var_start: start,
            op_end: probe.pos + len,
            op,
        }))
    }

    /// Compile an assignment as a `set` call. Inside an expression `x++` and
    /// `x--` use the post-increment opcodes so the old value is produced.
    pub(crate) fn parse_assignment(&mut self, target: AssignTarget, in_expr: bool) -> ParseResult<()> {
        if let (true, Assign::Increment(op)) = (in_expr, target.op) {
            self.cur.pos = target.var_start;
            self.parse_variable_ref()?;
            self.emit.emit_op(if op == Op::Add { Op::AddPost } else { Op::SubPost });
            self.cur.pos = target.op_end;
            return Ok(());
        }

        let symbol_pos = target.var_start;
        let word_end = self.cur.word_end(symbol_pos);
        let symbol = self.symbols.intern(self.cur.slice(symbol_pos, word_end));
        if !matches!(self.symbols.kind(symbol), SymbolKind::Nop | SymbolKind::Parameter(_)) {
            return Err(ParseError::syntax(
                format!("cannot assign to '{}'", self.symbols.name(symbol)),
                symbol_pos,
            ));
        }

        self.emit.emit_name(self.core.set);
        self.emit.emit_op(Op::Arg);
        self.cur.pos = target.var_start;
        self.parse_variable_ref()?;
        match target.op {
            Assign::Set => {
                self.cur.pos = target.op_end;
                self.parse_expr()?;
            }
            Assign::Compound(op) => {
                self.cur.pos = target.var_start;
                self.parse_variable_ref()?;
                self.cur.pos = target.op_end;
                self.parse_expr()?;
                self.emit.emit_op(op);
            }
            Assign::Increment(op) => {
                self.cur.pos = target.var_start;
                self.parse_variable_ref()?;
                self.emit.emit_int(1);
                self.emit.emit_op(op);
                self.cur.pos = target.op_end;
            }
        }
        self.emit.emit_op(Op::Func);
        Ok(())
    }

    /// Builtin call; the cursor is just past the name
    pub(crate) fn parse_builtin_call(
        &mut self,
        symbol: SymbolId,
        call_pos: usize,
        style: CallStyle,
    ) -> ParseResult<()> {
        let Some(def) = self.builtin(symbol) else {
            return Err(ParseError::new(
                CompileErrorKind::UnknownCommand(self.symbols.name(symbol).to_string()),
                call_pos,
            ));
        };
        self.emit.emit_name(symbol);
        self.emit.emit_op(Op::Arg);
        let argc = self.parse_call_args(Some(&def.signature), style)?;
        self.check_arg_count(&def.name, &def.signature, argc, call_pos)?;
        self.emit.emit_op(Op::Func);
        Ok(())
    }

    /// Call of a script-defined function, compiled to `callsub`
    pub(crate) fn parse_user_call(
        &mut self,
        symbol: SymbolId,
        call_pos: usize,
        style: CallStyle,
    ) -> ParseResult<()> {
        self.functions
            .entry(symbol)
            .or_default()
            .first_call
            .get_or_insert(call_pos);
        self.emit.emit_name(self.core.callsub);
        self.emit.emit_op(Op::Arg);
        self.emit.emit_symbol(symbol);
        self.parse_call_args(None, style)?;
        self.emit.emit_op(Op::Func);
        Ok(())
    }

    /// Whether a statement's leading `(` encloses the whole argument list,
    /// as in `mes("hi");` rather than `mes ("a") + "b";`
    fn paren_closes_call(&self, terminator: u8) -> ParseResult<bool> {
        let mut probe = self.cur.clone();
        let mut depth = 0;
        loop {
            if probe.at_end() {
                return Ok(false);
            }
            match probe.peek() {
                b'"' => {
                    probe.parse_string()?;
                    continue;
                }
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        probe.advance(1);
                        break;
                    }
                }
                _ => {}
            }
            probe.advance(1);
        }
        probe.skip_space()?;
        Ok(probe.at_end() || probe.peek() == terminator)
    }

    /// Record a bare word passed where a label is required
    fn note_label_argument(&mut self, close: u8) -> ParseResult<()> {
        let start = self.cur.pos;
        let end = self.cur.word_end(start);
        if end == start {
            return Ok(());
        }
        let mut probe = self.cur.clone();
        probe.pos = end;
        probe.skip_space()?;
        if !matches!(probe.peek(), b',' | b')') && probe.peek() != close {
            return Ok(());
        }
        let symbol = self.symbols.intern(self.cur.slice(start, end));
        let entry = self.symbols.get(symbol);
        if entry.kind == SymbolKind::Nop
            && entry.scope == VariableScope::Character
            && !self.emit.is_label(symbol)
        {
            self.expected_labels.entry(symbol).or_insert(start);
        }
        Ok(())
    }

    /// Emit the arguments of a call and return how many there were
    pub(crate) fn parse_call_args(&mut self, signature: Option<&str>, style: CallStyle) -> ParseResult<usize> {
        self.cur.skip_space()?;
        let paren = match style {
            CallStyle::Expression => self.cur.peek() == b'(',
            CallStyle::Statement(terminator) => {
                self.cur.peek() == b'(' && self.paren_closes_call(terminator)?
            }
        };
        let close = match (paren, style) {
            (true, _) => {
                self.cur.advance(1);
                self.cur.skip_space()?;
                b')'
            }
            (false, CallStyle::Expression) => return Ok(0),
            (false, CallStyle::Statement(terminator)) => terminator,
        };
        if self.cur.peek() == close {
            if paren {
                self.cur.advance(1);
            }
            return Ok(0);
        }

        let mut argc = 0;
        loop {
            self.cur.skip_space()?;
            if let Some(signature) = signature {
                if signature_char(signature, argc) == b'l' {
                    self.note_label_argument(close)?;
                }
            }
            self.parse_expr()?;
            argc += 1;
            self.cur.skip_space()?;
            if self.cur.peek() == b',' {
                self.cur.advance(1);
                continue;
            }
            break;
        }
        if paren {
            self.cur.expect(b')', "')'")?;
        } else if self.cur.peek() != close {
            if self.cur.at_end() {
                return Err(ParseError::new(CompileErrorKind::UnexpectedEnd, self.cur.pos));
            }
            return Err(ParseError::expected(&format!("',' or '{}'", close as char), self.cur.pos));
        }
        Ok(argc)
    }

    fn check_arg_count(&self, name: &str, signature: &str, argc: usize, pos: usize) -> ParseResult<()> {
        let required = signature.bytes().take_while(|&c| c != b'?' && c != b'*').count();
        if argc < required {
            return Err(ParseError::new(
                CompileErrorKind::NotEnoughArguments(name.to_string()),
                pos,
            ));
        }
        if !signature.contains('*') && argc > signature.len() && self.config.warn_func_mismatch_paramnum {
            warn!(
                "script:parse_callfunc: too many arguments for '{}' ({} given, {} expected)",
                name,
                argc,
                signature.len()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ScriptConfig;
    use crate::engine::ScriptEngine;
    use crate::script_compiler::bytecode::{decode_at, Instr, Op};
    use crate::script_compiler::CompileErrorKind;
    use test_log::test;

    fn ops(engine: &mut ScriptEngine, source: &str) -> Vec<Instr> {
        let script = engine.compile(source, "test", 1).unwrap();
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < script.len() {
            let (instr, next) = decode_at(script.code(), pos).unwrap();
            out.push(instr);
            pos = next;
        }
        out
    }

    fn operators(engine: &mut ScriptEngine, source: &str) -> Vec<Op> {
        ops(engine, source)
            .into_iter()
            .filter_map(|i| match i {
                Instr::Op(op) if !matches!(op, Op::Arg | Op::Func | Op::Eol | Op::Nop) => Some(op),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_precedence_is_postfix_ordered() {
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        assert_eq!(operators(&mut engine, ".@x = 1 + 2 * 3;"), vec![Op::Mul, Op::Add]);
        assert_eq!(operators(&mut engine, ".@x = (1 + 2) * 3;"), vec![Op::Add, Op::Mul]);
        assert_eq!(operators(&mut engine, ".@x = 10 - 4 - 3;"), vec![Op::Sub, Op::Sub]);
        assert_eq!(
            operators(&mut engine, ".@x = 1 < 2 == 3 > 4;"),
            vec![Op::Lt, Op::Gt, Op::Eq]
        );
        assert_eq!(
            operators(&mut engine, ".@x = 1 ? 2 : 3 ? 4 : 5;"),
            vec![Op::Op3, Op::Op3]
        );
    }

    #[test]
    fn test_negative_literals_and_unary_minus() {
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        let code = ops(&mut engine, ".@x = -5;");
        assert!(code.windows(2).any(|w| w == [Instr::Int(5), Instr::Op(Op::Neg)]));
        assert_eq!(operators(&mut engine, ".@x = - .@y * 2;"), vec![Op::Neg, Op::Mul]);
        assert_eq!(operators(&mut engine, ".@x = 3 - -2;"), vec![Op::Neg, Op::Sub]);
    }

    #[test]
    fn test_logical_operators_short_circuit() {
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        let code = ops(&mut engine, ".@x = .@a && .@b;");
        let jump = code.iter().position(|i| matches!(i, Instr::LandJump(_))).unwrap();
        assert_eq!(code[jump + 2], Instr::Op(Op::Bool));
    }

    #[test]
    fn test_compound_assignment_rereads_variable() {
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        let code = ops(&mut engine, ".@x += 2;");
        let names = code.iter().filter(|i| matches!(i, Instr::Name(_))).count();
        // set, .@x twice
        assert_eq!(names, 3);
        assert_eq!(operators(&mut engine, ".@x <<= 1;"), vec![Op::LShift]);
        assert_eq!(operators(&mut engine, ".@x = .@y++;"), vec![Op::AddPost]);
        assert_eq!(operators(&mut engine, ".@x = --.@y;"), vec![Op::SubPre]);
    }

    #[test]
    fn test_constants_fold_to_literals() {
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        engine.set_constant("Job_Knight", 7);
        let code = ops(&mut engine, ".@x = Job_Knight;");
        assert!(code.contains(&Instr::Int(7)));
    }

    #[test]
    fn test_missing_arguments_are_rejected() {
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        let err = engine.compile("mes;", "test", 1).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::NotEnoughArguments("mes".to_string()));
        // extra arguments only warn
        assert!(engine.compile("mes \"a\", \"b\";", "test", 1).is_ok());
    }

    #[test]
    fn test_paren_and_statement_call_styles_agree() {
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        let a = ops(&mut engine, "mes \"hi\";");
        let b = ops(&mut engine, "mes(\"hi\");");
        assert_eq!(a, b);
        let c = ops(&mut engine, "mes (\"a\") + \"b\";");
        assert!(c.contains(&Instr::Op(Op::Add)));
    }
}
