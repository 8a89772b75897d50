// Bytecode format, emitter and decoder
//
// Opcodes and integer literals share one variable-length encoding scheme
// with six payload bits per byte:
//   opcode   bytes 0x00-0x3f, continuation bytes 0x40-0x7f
//   integer  bytes 0x80-0xbf, continuation bytes 0xc0-0xff
// so the interpreter can tell a literal from an instruction by its first byte.
// Label positions and symbol ids are fixed 3-byte little-endian operands,
// which lets forward references be rewritten in place.

use crate::script_compiler::symbols::SymbolId;
use crate::value::RuntimeError;
use indexmap::IndexMap;
use log::debug;

/// Upper bound (exclusive) for 3-byte operands
pub const OPERAND_LIMIT: usize = 1 << 24;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// End of script
    Nop = 0x00,
    Pos,
    Int,
    /// Call the function whose name sits below the matching `Arg`
    Func,
    Str,
    /// Argument list marker
    Arg,
    Name,
    /// End of statement
    Eol,
    /// `-` placeholder label
    NoLabel,
    LandJump,
    LorJump,
    /// Normalise to 0/1
    Bool,
    Le,
    Lt,
    Ge,
    Gt,
    Eq,
    Ne,
    Xor,
    Or,
    And,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    LNot,
    Not,
    RShift,
    LShift,
    AddPost,
    SubPost,
    AddPre,
    SubPre,
    /// Ternary
    Op3,
}

const OPCODES: [Op; 36] = [
    Op::Nop,
    Op::Pos,
    Op::Int,
    Op::Func,
    Op::Str,
    Op::Arg,
    Op::Name,
    Op::Eol,
    Op::NoLabel,
    Op::LandJump,
    Op::LorJump,
    Op::Bool,
    Op::Le,
    Op::Lt,
    Op::Ge,
    Op::Gt,
    Op::Eq,
    Op::Ne,
    Op::Xor,
    Op::Or,
    Op::And,
    Op::Add,
    Op::Sub,
    Op::Mul,
    Op::Div,
    Op::Mod,
    Op::Neg,
    Op::LNot,
    Op::Not,
    Op::RShift,
    Op::LShift,
    Op::AddPost,
    Op::SubPost,
    Op::AddPre,
    Op::SubPre,
    Op::Op3,
];

impl Op {
    pub fn from_code(code: u32) -> Option<Op> {
        OPCODES.get(code as usize).copied()
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Nop => "NOP",
            Op::Pos => "POS",
            Op::Int => "INT",
            Op::Func => "FUNC",
            Op::Str => "STR",
            Op::Arg => "ARG",
            Op::Name => "NAME",
            Op::Eol => "EOL",
            Op::NoLabel => "NOLABEL",
            Op::LandJump => "LAND_JUMP",
            Op::LorJump => "LOR_JUMP",
            Op::Bool => "BOOL",
            Op::Le => "LE",
            Op::Lt => "LT",
            Op::Ge => "GE",
            Op::Gt => "GT",
            Op::Eq => "EQ",
            Op::Ne => "NE",
            Op::Xor => "XOR",
            Op::Or => "OR",
            Op::And => "AND",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Mod => "MOD",
            Op::Neg => "NEG",
            Op::LNot => "LNOT",
            Op::Not => "NOT",
            Op::RShift => "R_SHIFT",
            Op::LShift => "L_SHIFT",
            Op::AddPost => "ADD_POST",
            Op::SubPost => "SUB_POST",
            Op::AddPre => "ADD_PRE",
            Op::SubPre => "SUB_PRE",
            Op::Op3 => "OP3",
        }
    }

    /// Source spelling of operator opcodes
    pub fn operator(self) -> &'static str {
        match self {
            Op::Le => "<=",
            Op::Lt => "<",
            Op::Ge => ">=",
            Op::Gt => ">",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Xor => "^",
            Op::Or => "|",
            Op::And => "&",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::Neg => "-",
            Op::LNot => "!",
            Op::Not => "~",
            Op::RShift => ">>",
            Op::LShift => "<<",
            Op::AddPost | Op::AddPre => "++",
            Op::SubPost | Op::SubPre => "--",
            Op::Op3 => "?:",
            Op::LandJump => "&&",
            Op::LorJump => "||",
            other => other.mnemonic(),
        }
    }
}

/// Anonymous jump target created by the statement compiler
pub type LabelId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchTarget {
    /// A named label, referenced by word before it was defined
    Symbol(SymbolId),
    Anon(LabelId),
}

/// Error raised when a named label is placed twice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyDefined;

/// Growable bytecode buffer with a backpatch side-table.
///
/// Every unresolved reference records the offset of its 3-byte operand under
/// its target. Placing the target rewrites each recorded operand; references
/// emitted afterwards get the final position directly.
#[derive(Debug, Default)]
pub struct Emitter {
    code: Vec<u8>,
    pending: IndexMap<PatchTarget, Vec<usize>>,
    resolved: IndexMap<PatchTarget, usize>,
    next_label: LabelId,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pos(&self) -> usize {
        self.code.len()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn into_code(self) -> Vec<u8> {
        self.code
    }

    pub fn emit_byte(&mut self, byte: u8) {
        self.code.push(byte);
    }

    /// Opcode in the 0x00-0x7f encoding
    pub fn emit_op(&mut self, op: Op) {
        let mut value = op as u32;
        while value >= 0x40 {
            self.emit_byte(0x40 | (value & 0x3f) as u8);
            value >>= 6;
        }
        self.emit_byte(value as u8);
    }

    /// Non-negative integer literal in the 0x80-0xff encoding
    pub fn emit_int(&mut self, value: u32) {
        let mut value = value as u64;
        while value >= 0x40 {
            self.emit_byte(0xc0 | (value & 0x3f) as u8);
            value = (value - 0x40) >> 6;
        }
        self.emit_byte(0x80 | value as u8);
    }

    /// Signed literal: magnitude followed by `Neg` when negative
    pub fn emit_signed(&mut self, value: i32) {
        self.emit_int(value.unsigned_abs());
        if value < 0 {
            self.emit_op(Op::Neg);
        }
    }

    pub fn emit_str(&mut self, text: &str) {
        self.emit_op(Op::Str);
        self.code.extend_from_slice(text.as_bytes());
        self.emit_byte(0);
    }

    fn emit_operand(&mut self, value: usize) {
        self.code.push((value & 0xff) as u8);
        self.code.push(((value >> 8) & 0xff) as u8);
        self.code.push(((value >> 16) & 0xff) as u8);
    }

    fn emit_target(&mut self, target: PatchTarget) {
        match self.resolved.get(&target).copied() {
            Some(pos) => self.emit_operand(pos),
            None => {
                let offset = self.pos();
                self.pending.entry(target).or_default().push(offset);
                self.emit_operand(0);
            }
        }
    }

    /// Builtin or variable name that can never turn into a label
    pub fn emit_name(&mut self, symbol: SymbolId) {
        self.emit_op(Op::Name);
        self.emit_operand(symbol as usize);
    }

    /// Reference to a word. Emitted as a position once the word is a label,
    /// otherwise as a name that a later label definition may rewrite.
    pub fn emit_symbol(&mut self, symbol: SymbolId) {
        let target = PatchTarget::Symbol(symbol);
        if let Some(pos) = self.resolved.get(&target).copied() {
            self.emit_op(Op::Pos);
            self.emit_operand(pos);
            return;
        }
        self.emit_op(Op::Name);
        let offset = self.pos();
        self.pending.entry(target).or_default().push(offset);
        self.emit_operand(symbol as usize);
    }

    pub fn new_label(&mut self) -> LabelId {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    pub fn emit_label(&mut self, label: LabelId) {
        self.emit_op(Op::Pos);
        self.emit_target(PatchTarget::Anon(label));
    }

    /// `LandJump`/`LorJump` with their target operand
    pub fn emit_jump(&mut self, op: Op, label: LabelId) {
        self.emit_op(op);
        self.emit_target(PatchTarget::Anon(label));
    }

    pub fn place_label(&mut self, label: LabelId) {
        let pos = self.pos();
        self.resolve(PatchTarget::Anon(label), pos);
    }

    /// Define a named label at the current position
    pub fn define_symbol(&mut self, symbol: SymbolId) -> Result<usize, AlreadyDefined> {
        let target = PatchTarget::Symbol(symbol);
        if self.resolved.contains_key(&target) {
            return Err(AlreadyDefined);
        }
        let pos = self.pos();
        self.resolve(target, pos);
        Ok(pos)
    }

    pub fn is_label(&self, symbol: SymbolId) -> bool {
        self.resolved.contains_key(&PatchTarget::Symbol(symbol))
    }

    pub fn label_pos(&self, symbol: SymbolId) -> Option<usize> {
        self.resolved.get(&PatchTarget::Symbol(symbol)).copied()
    }

    fn resolve(&mut self, target: PatchTarget, pos: usize) {
        self.resolved.insert(target, pos);
        let Some(offsets) = self.pending.shift_remove(&target) else {
            return;
        };
        debug!("backpatch {:?} -> {:#x} ({} references)", target, pos, offsets.len());
        for offset in offsets {
            if let PatchTarget::Symbol(_) = target {
                self.code[offset - 1] = Op::Pos as u8;
            }
            self.code[offset] = (pos & 0xff) as u8;
            self.code[offset + 1] = ((pos >> 8) & 0xff) as u8;
            self.code[offset + 2] = ((pos >> 16) & 0xff) as u8;
        }
    }

    /// Anonymous labels referenced but never placed
    pub fn dangling_labels(&self) -> Vec<LabelId> {
        self.pending
            .keys()
            .filter_map(|target| match target {
                PatchTarget::Anon(label) => Some(*label),
                PatchTarget::Symbol(_) => None,
            })
            .collect()
    }
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Integer literal (magnitude; sign comes from a following `Neg`)
    Int(u64),
    Pos(usize),
    Name(SymbolId),
    Str(String),
    LandJump(usize),
    LorJump(usize),
    Op(Op),
}

fn read_operand(code: &[u8], pos: usize) -> Result<usize, RuntimeError> {
    if pos + 3 > code.len() {
        return Err(RuntimeError::InvalidBytecode {
            pos,
            detail: "truncated operand".to_string(),
        });
    }
    Ok(code[pos] as usize | (code[pos + 1] as usize) << 8 | (code[pos + 2] as usize) << 16)
}

/// Decode the instruction at `pos`, returning it and the position after it
pub fn decode_at(code: &[u8], pos: usize) -> Result<(Instr, usize), RuntimeError> {
    let truncated = |at: usize| RuntimeError::InvalidBytecode {
        pos: at,
        detail: "unexpected end of bytecode".to_string(),
    };
    let mut cursor = pos;
    let first = *code.get(cursor).ok_or_else(|| truncated(cursor))?;

    if first >= 0x80 {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = *code.get(cursor).ok_or_else(|| truncated(cursor))?;
            cursor += 1;
            if shift > 60 {
                return Err(RuntimeError::InvalidBytecode {
                    pos,
                    detail: "integer literal too long".to_string(),
                });
            }
            value += ((byte & 0x7f) as u64) << shift;
            if byte < 0xc0 {
                break;
            }
            shift += 6;
        }
        return Ok((Instr::Int(value), cursor));
    }

    let mut code_value: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *code.get(cursor).ok_or_else(|| truncated(cursor))?;
        if byte >= 0x80 || shift > 24 {
            return Err(RuntimeError::InvalidBytecode {
                pos,
                detail: "malformed opcode".to_string(),
            });
        }
        cursor += 1;
        code_value |= ((byte & 0x3f) as u32) << shift;
        if byte < 0x40 {
            break;
        }
        shift += 6;
    }
    let op = Op::from_code(code_value).ok_or_else(|| RuntimeError::InvalidBytecode {
        pos,
        detail: format!("unknown opcode {:#x}", code_value),
    })?;

    match op {
        Op::Pos | Op::Name | Op::LandJump | Op::LorJump => {
            let operand = read_operand(code, cursor)?;
            let instr = match op {
                Op::Pos => Instr::Pos(operand),
                Op::Name => Instr::Name(operand as SymbolId),
                Op::LandJump => Instr::LandJump(operand),
                _ => Instr::LorJump(operand),
            };
            Ok((instr, cursor + 3))
        }
        Op::Str => {
            let end = code[cursor..]
                .iter()
                .position(|&b| b == 0)
                .map(|n| cursor + n)
                .ok_or_else(|| RuntimeError::InvalidBytecode {
                    pos,
                    detail: "unterminated string constant".to_string(),
                })?;
            let text = String::from_utf8_lossy(&code[cursor..end]).into_owned();
            Ok((Instr::Str(text), end + 1))
        }
        _ => Ok((Instr::Op(op), cursor)),
    }
}
