// Statement parsing and control-flow lowering
//
// Structured statements are lowered to `goto`/`jump_zero` calls on
// anonymous labels:
//
//   if (c) A else B     jump_zero c, NEXT; A; goto FIN; NEXT: B; FIN:
//   while (c) A         NXT: jump_zero c, FIN; A; goto NXT; FIN:
//   do A while (c);     BGN: A; NXT: jump_zero c, FIN; goto BGN; FIN:
//   for (i; c; s) A     i; CHK: jump_zero c, FIN; goto BGN; NXT: s; goto CHK;
//                       BGN: A; goto NXT; FIN:
//   switch (v) {...}    set SW, v; goto CHECK; ... each case compares SW and
//                       falls through to the next check on mismatch
//
// `self.curly` holds the open constructs so `break`, `continue` and `case`
// find their targets.

use super::bytecode::{LabelId, Op};
use super::error::{CompileErrorKind, ParseError, ParseResult};
use super::expr::{Assign, AssignTarget, CallStyle};
use super::symbols::{SymbolId, SymbolKind};
use super::{Curly, CurlyKind, ScriptCompiler, SwitchState};
use indexmap::IndexSet;
use log::debug;

impl ScriptCompiler<'_> {
    /// Parse one statement, including any nested body
    pub(crate) fn parse_statement(&mut self) -> ParseResult<()> {
        self.cur.skip_space()?;
        let start = self.cur.pos;
        if self.cur.at_end() {
            return Err(ParseError::new(CompileErrorKind::UnexpectedEnd, start));
        }
        match self.cur.peek() {
            b'{' => return self.parse_block(CurlyKind::Block, None, None),
            b';' => {
                self.cur.advance(1);
                return Ok(());
            }
            b'}' => return Err(ParseError::syntax("unexpected '}'", start)),
            _ => {}
        }

        if self.cur.eat_keyword("if") {
            return self.parse_if();
        }
        if self.cur.eat_keyword("while") {
            return self.parse_while();
        }
        if self.cur.eat_keyword("do") {
            return self.parse_do();
        }
        if self.cur.eat_keyword("for") {
            return self.parse_for();
        }
        if self.cur.eat_keyword("switch") {
            return self.parse_switch();
        }
        if self.cur.eat_keyword("function") {
            return self.parse_function(start);
        }
        if self.cur.eat_keyword("break") {
            return self.parse_break(start);
        }
        if self.cur.eat_keyword("continue") {
            return self.parse_continue(start);
        }
        if self.cur.eat_keyword("case") {
            return self.parse_case(start);
        }
        if self.cur.starts_with("default") && self.is_default_label() {
            return self.parse_default(start);
        }
        if self.cur.eat_keyword("else") {
            return Err(ParseError::syntax("'else' without 'if'", start));
        }

        if let Some(end) = self.label_definition_end() {
            return self.parse_label(start, end);
        }

        self.parse_simple_statement(b';')
    }

    /// `Name:` at the cursor; returns the end of the name
    fn label_definition_end(&self) -> Option<usize> {
        let end = self.cur.word_end(self.cur.pos);
        if end == self.cur.pos {
            return None;
        }
        (self.cur.byte_at(end) == b':' && self.cur.byte_at(end + 1) != b':').then_some(end)
    }

    fn is_default_label(&self) -> bool {
        let mut probe = self.cur.clone();
        if !probe.eat_keyword("default") {
            return false;
        }
        probe.skip_space().is_ok() && probe.peek() == b':'
    }

    fn parse_label(&mut self, start: usize, end: usize) -> ParseResult<()> {
        let name = self.cur.slice(start, end);
        let symbol = self.symbols.intern(name);
        if self.symbols.kind(symbol) != SymbolKind::Nop {
            return Err(ParseError::new(
                CompileErrorKind::ReservedLabel(name.to_string()),
                start,
            ));
        }
        let pos = self
            .emit
            .define_symbol(symbol)
            .map_err(|_| ParseError::new(CompileErrorKind::DuplicateLabel(name.to_string()), start))?;
        debug!("label '{}' at {:#x}", name, pos);
        self.labels.insert(name.to_ascii_lowercase(), pos);
        self.cur.pos = end + 1;
        Ok(())
    }

    /// Command call or assignment up to `terminator`, followed by `Eol`
    pub(crate) fn parse_simple_statement(&mut self, terminator: u8) -> ParseResult<()> {
        self.cur.skip_space()?;
        let start = self.cur.pos;
        let (c0, c1) = (self.cur.peek(), self.cur.peek_at(1));

        if (c0 == b'+' || c0 == b'-') && c1 == c0 {
            let mut probe = self.cur.clone();
            probe.advance(2);
            probe.skip_space()?;
            let var_start = probe.pos;
            let Some(var_end) = self.variable_extent(var_start)? else {
                return Err(ParseError::expected("variable name", var_start));
            };
            let op = if c0 == b'+' { Op::Add } else { Op::Sub };
            self.parse_assignment(
                AssignTarget {
                    var_start,
                    op_end: var_end,
                    op: Assign::Increment(op),
                },
                false,
            )?;
        } else {
            let end = self.cur.word_end(start);
            if end == start {
                return Err(ParseError::expected("command", start));
            }
            let name = self.cur.slice(start, end);
            let symbol = self.symbols.intern(name);
            match self.symbols.kind(symbol) {
                SymbolKind::Function(_) => {
                    self.cur.pos = end;
                    self.parse_builtin_call(symbol, start, CallStyle::Statement(terminator))?;
                }
                SymbolKind::Constant(_) => {
                    return Err(ParseError::syntax(
                        format!("cannot assign to constant '{}'", name),
                        start,
                    ));
                }
                SymbolKind::Nop | SymbolKind::Parameter(_) => {
                    if let Some(target) = self.peek_assignment(start)? {
                        self.parse_assignment(target, false)?;
                    } else if self.is_user_call(symbol, end)? {
                        self.cur.pos = end;
                        self.parse_user_call(symbol, start, CallStyle::Statement(terminator))?;
                    } else {
                        return Err(ParseError::new(
                            CompileErrorKind::UnknownCommand(name.to_string()),
                            start,
                        ));
                    }
                }
            }
        }

        self.cur.skip_space()?;
        if self.cur.peek() != terminator {
            if self.cur.at_end() {
                return Err(ParseError::new(CompileErrorKind::UnexpectedEnd, self.cur.pos));
            }
            return Err(ParseError::expected(&format!("'{}'", terminator as char), self.cur.pos));
        }
        self.cur.advance(1);
        self.emit.emit_op(Op::Eol);
        Ok(())
    }

    /// `{ statements }` as its own context
    fn parse_block(&mut self, kind: CurlyKind, brk: Option<LabelId>, cont: Option<LabelId>) -> ParseResult<()> {
        self.cur.expect(b'{', "'{'")?;
        self.curly.push(Curly { kind, brk, cont });
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
        self.curly.pop();
        Ok(())
    }

    /// Loop or conditional body: a block or a single statement
    fn parse_body(&mut self, kind: CurlyKind, brk: Option<LabelId>, cont: Option<LabelId>) -> ParseResult<()> {
        self.cur.skip_space()?;
        if self.cur.peek() == b'{' {
            return self.parse_block(kind, brk, cont);
        }
        self.curly.push(Curly { kind, brk, cont });
        self.parse_statement()?;
        self.curly.pop();
        Ok(())
    }

    /// `jump_zero (<expr>), label` for a parenthesised condition at the cursor
    fn emit_condition_jump(&mut self, target: LabelId) -> ParseResult<()> {
        self.cur.expect(b'(', "'('")?;
        self.emit.emit_name(self.core.jump_zero);
        self.emit.emit_op(Op::Arg);
        self.parse_expr()?;
        self.cur.expect(b')', "')'")?;
        self.emit.emit_label(target);
        self.emit.emit_op(Op::Func);
        Ok(())
    }

    fn parse_if(&mut self) -> ParseResult<()> {
        let next = self.emit.new_label();
        self.emit_condition_jump(next)?;
        self.parse_body(CurlyKind::If, None, None)?;

        let mut probe = self.cur.clone();
        probe.skip_space()?;
        if probe.eat_keyword("else") {
            self.cur.pos = probe.pos;
            let fin = self.emit.new_label();
            self.emit_goto(fin);
            self.emit.place_label(next);
            self.parse_body(CurlyKind::If, None, None)?;
            self.emit.place_label(fin);
        } else {
            self.emit.place_label(next);
        }
        Ok(())
    }

    fn parse_while(&mut self) -> ParseResult<()> {
        let nxt = self.emit.new_label();
        let fin = self.emit.new_label();
        self.emit.place_label(nxt);
        self.emit_condition_jump(fin)?;
        self.parse_body(CurlyKind::While, Some(fin), Some(nxt))?;
        self.emit_goto(nxt);
        self.emit.place_label(fin);
        Ok(())
    }

    fn parse_do(&mut self) -> ParseResult<()> {
        let bgn = self.emit.new_label();
        let nxt = self.emit.new_label();
        let fin = self.emit.new_label();
        self.emit.place_label(bgn);
        self.parse_body(CurlyKind::Do, Some(fin), Some(nxt))?;
        self.cur.skip_space()?;
        if !self.cur.eat_keyword("while") {
            return Err(ParseError::expected("'while'", self.cur.pos));
        }
        self.emit.place_label(nxt);
        self.emit_condition_jump(fin)?;
        self.emit_goto(bgn);
        self.emit.place_label(fin);
        self.cur.expect(b';', "';'")?;
        Ok(())
    }

    fn parse_for(&mut self) -> ParseResult<()> {
        let chk = self.emit.new_label();
        let nxt = self.emit.new_label();
        let bgn = self.emit.new_label();
        let fin = self.emit.new_label();

        self.cur.expect(b'(', "'('")?;
        self.cur.skip_space()?;
        if self.cur.peek() == b';' {
            self.cur.advance(1);
        } else {
            self.parse_simple_statement(b';')?;
        }

        self.emit.place_label(chk);
        self.cur.skip_space()?;
        if self.cur.peek() == b';' {
            self.cur.advance(1);
        } else {
            self.emit.emit_name(self.core.jump_zero);
            self.emit.emit_op(Op::Arg);
            self.parse_expr()?;
            self.emit.emit_label(fin);
            self.emit.emit_op(Op::Func);
            self.cur.expect(b';', "';'")?;
        }
        self.emit_goto(bgn);

        self.emit.place_label(nxt);
        self.cur.skip_space()?;
        if self.cur.peek() == b')' {
            self.cur.advance(1);
        } else {
            self.parse_simple_statement(b')')?;
        }
        self.emit_goto(chk);

        self.emit.place_label(bgn);
        self.parse_body(CurlyKind::For, Some(fin), Some(nxt))?;
        self.emit_goto(nxt);
        self.emit.place_label(fin);
        Ok(())
    }

    fn parse_switch(&mut self) -> ParseResult<()> {
        let index = self.switch_count;
        self.switch_count += 1;
        let var = self.symbols.intern(&format!("$@__SW{:x}_VAL", index));
        let fin = self.emit.new_label();
        let first_check = self.emit.new_label();

        self.cur.expect(b'(', "'('")?;
        self.emit.emit_name(self.core.set);
        self.emit.emit_op(Op::Arg);
        self.emit.emit_name(var);
        self.parse_expr()?;
        self.cur.expect(b')', "')'")?;
        self.emit.emit_op(Op::Func);
        self.emit.emit_op(Op::Eol);
        self.emit_goto(first_check);

        self.cur.expect(b'{', "'{'")?;
        self.curly.push(Curly {
            kind: CurlyKind::Switch(SwitchState {
                var,
                next_check: first_check,
                default: None,
                cases: IndexSet::new(),
                started: false,
            }),
            brk: Some(fin),
            cont: None,
        });
        loop {
            self.cur.skip_space()?;
            if self.cur.at_end() {
                return Err(ParseError::expected("'}'", self.cur.pos));
            }
            if self.cur.peek() == b'}' {
                self.cur.advance(1);
                break;
            }
            let at = self.cur.pos;
            let is_label = self.cur.clone().eat_keyword("case") || self.is_default_label();
            if !is_label && !self.current_switch().map(|s| s.started).unwrap_or(false) {
                return Err(ParseError::syntax("statement before the first 'case' in 'switch'", at));
            }
            self.parse_statement()?;
        }
        let Some(Curly {
            kind: CurlyKind::Switch(state),
            ..
        }) = self.curly.pop()
        else {
            return Err(ParseError::syntax("switch context lost", self.cur.pos));
        };

        self.emit_goto(fin);
        self.emit.place_label(state.next_check);
        if let Some(default) = state.default {
            self.emit_goto(default);
        }
        self.emit.place_label(fin);
        Ok(())
    }

    fn current_switch(&mut self) -> Option<&mut SwitchState> {
        match self.curly.last_mut() {
            Some(Curly {
                kind: CurlyKind::Switch(state),
                ..
            }) => Some(state),
            _ => None,
        }
    }

    /// Integer constant of a `case` label
    fn parse_case_value(&mut self) -> ParseResult<i32> {
        self.cur.skip_space()?;
        if self.cur.at_number() {
            return self.cur.parse_number();
        }
        let start = self.cur.pos;
        let end = self.cur.word_end(start);
        if end > start {
            if let Some(symbol) = self.symbols.lookup(self.cur.slice(start, end)) {
                if let SymbolKind::Constant(value) = self.symbols.kind(symbol) {
                    self.cur.pos = end;
                    return Ok(value);
                }
            }
        }
        Err(ParseError::new(CompileErrorKind::CaseNotConstant, start))
    }

    fn parse_case(&mut self, start: usize) -> ParseResult<()> {
        if self.current_switch().is_none() {
            return Err(ParseError::new(CompileErrorKind::CaseOutsideSwitch, start));
        }
        let value = self.parse_case_value()?;
        self.cur.expect(b':', "':'")?;

        let body = self.emit.new_label();
        let check = self.emit.new_label();
        let (var, previous, started) = {
            let Some(state) = self.current_switch() else {
                return Err(ParseError::new(CompileErrorKind::CaseOutsideSwitch, start));
            };
            if !state.cases.insert(value) {
                return Err(ParseError::new(CompileErrorKind::DuplicateCase(value), start));
            }
            let previous = std::mem::replace(&mut state.next_check, check);
            let started = std::mem::replace(&mut state.started, true);
            (state.var, previous, started)
        };

        // fall-through from the previous body skips this comparison
        if started {
            self.emit_goto(body);
        }
        self.emit.place_label(previous);
        self.emit.emit_name(self.core.jump_zero);
        self.emit.emit_op(Op::Arg);
        self.emit.emit_name(var);
        self.emit.emit_signed(value);
        self.emit.emit_op(Op::Eq);
        self.emit.emit_label(check);
        self.emit.emit_op(Op::Func);
        self.emit.place_label(body);
        Ok(())
    }

    fn parse_default(&mut self, start: usize) -> ParseResult<()> {
        self.cur.eat_keyword("default");
        self.cur.expect(b':', "':'")?;
        let label = self.emit.new_label();
        {
            let Some(state) = self.current_switch() else {
                return Err(ParseError::new(CompileErrorKind::CaseOutsideSwitch, start));
            };
            if state.default.is_some() {
                return Err(ParseError::syntax("duplicate 'default' in 'switch'", start));
            }
            state.default = Some(label);
            state.started = true;
        }
        self.emit.place_label(label);
        Ok(())
    }

    fn parse_break(&mut self, start: usize) -> ParseResult<()> {
        let mut target = None;
        for curly in self.curly.iter().rev() {
            if let CurlyKind::Function = curly.kind {
                break;
            }
            if let Some(brk) = curly.brk {
                target = Some(brk);
                break;
            }
        }
        let Some(target) = target else {
            return Err(ParseError::new(CompileErrorKind::BreakOutsideLoop, start));
        };
        self.cur.expect(b';', "';'")?;
        self.emit_goto(target);
        self.emit.emit_op(Op::Eol);
        Ok(())
    }

    fn parse_continue(&mut self, start: usize) -> ParseResult<()> {
        let mut target = None;
        for curly in self.curly.iter().rev() {
            if let CurlyKind::Function = curly.kind {
                break;
            }
            if let Some(cont) = curly.cont {
                target = Some(cont);
                break;
            }
        }
        let Some(target) = target else {
            return Err(ParseError::new(CompileErrorKind::ContinueOutsideLoop, start));
        };
        self.cur.expect(b';', "';'")?;
        self.emit_goto(target);
        self.emit.emit_op(Op::Eol);
        Ok(())
    }

    /// `function Name;` declares, `function Name { ... }` defines
    fn parse_function(&mut self, start: usize) -> ParseResult<()> {
        if self.curly.iter().any(|c| matches!(c.kind, CurlyKind::Function)) {
            return Err(ParseError::syntax("function definitions cannot be nested", start));
        }
        self.cur.skip_space()?;
        let name_start = self.cur.pos;
        let name_end = self.cur.word_end(name_start);
        if name_end == name_start {
            return Err(ParseError::expected("function name", name_start));
        }
        let name = self.cur.slice(name_start, name_end);
        let symbol: SymbolId = self.symbols.intern(name);
        let entry = self.symbols.get(symbol);
        if entry.kind != SymbolKind::Nop || entry.scope != crate::variables::VariableScope::Character {
            return Err(ParseError::new(
                CompileErrorKind::ReservedLabel(name.to_string()),
                name_start,
            ));
        }
        self.cur.pos = name_end;
        self.functions.entry(symbol).or_default();
        self.cur.skip_space()?;

        if self.cur.peek() == b';' {
            self.cur.advance(1);
            debug!("function '{}' declared", name);
            return Ok(());
        }
        if self.cur.peek() != b'{' {
            return Err(ParseError::expected("';' or '{'", self.cur.pos));
        }
        if self.functions.get(&symbol).map(|f| f.defined).unwrap_or(false) {
            return Err(ParseError::new(
                CompileErrorKind::DuplicateFunction(name.to_string()),
                name_start,
            ));
        }

        let skip = self.emit.new_label();
        self.emit_goto(skip);
        let pos = self
            .emit
            .define_symbol(symbol)
            .map_err(|_| ParseError::new(CompileErrorKind::DuplicateLabel(name.to_string()), name_start))?;
        if let Some(function) = self.functions.get_mut(&symbol) {
            function.defined = true;
        }
        debug!("function '{}' at {:#x}", name, pos);

        self.parse_block(CurlyKind::Function, None, None)?;
        self.emit.emit_name(self.core.ret);
        self.emit.emit_op(Op::Arg);
        self.emit.emit_op(Op::Func);
        self.emit.emit_op(Op::Eol);
        self.emit.place_label(skip);
        Ok(())
    }
}
