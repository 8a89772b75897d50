// Compiler Error Handling

use std::fmt;

/// Lines of source shown above and below the offending line
const CONTEXT_LINES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    UnexpectedEnd,
    /// What was expected at this point
    Expected(String),
    Syntax(String),
    UnterminatedString,
    UnterminatedComment,
    NewlineInString,
    DuplicateLabel(String),
    /// Label name already means a constant, parameter or builtin
    ReservedLabel(String),
    UndefinedLabel(String),
    UndefinedFunction(String),
    DuplicateFunction(String),
    DuplicateCase(i32),
    CaseNotConstant,
    NotEnoughArguments(String),
    UnknownCommand(String),
    BreakOutsideLoop,
    ContinueOutsideLoop,
    CaseOutsideSwitch,
    ScriptTooLarge,
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompileErrorKind::UnexpectedEnd => write!(f, "unexpected end of script"),
            CompileErrorKind::Expected(what) => write!(f, "expected {}", what),
            CompileErrorKind::Syntax(msg) => write!(f, "{}", msg),
            CompileErrorKind::UnterminatedString => write!(f, "unterminated string"),
            CompileErrorKind::UnterminatedComment => write!(f, "unexpected end of script in comment"),
            CompileErrorKind::NewlineInString => write!(f, "unexpected newline in string"),
            CompileErrorKind::DuplicateLabel(name) => write!(f, "dup label '{}'", name),
            CompileErrorKind::ReservedLabel(name) => {
                write!(f, "invalid label name '{}' (reserved word)", name)
            }
            CompileErrorKind::UndefinedLabel(name) => write!(f, "undefined label '{}'", name),
            CompileErrorKind::UndefinedFunction(name) => {
                write!(f, "call to undefined function '{}'", name)
            }
            CompileErrorKind::DuplicateFunction(name) => {
                write!(f, "duplicate function definition '{}'", name)
            }
            CompileErrorKind::DuplicateCase(value) => write!(f, "dup 'case' value {}", value),
            CompileErrorKind::CaseNotConstant => write!(f, "'case' label is not an integer constant"),
            CompileErrorKind::NotEnoughArguments(name) => {
                write!(f, "not enough arguments for '{}'", name)
            }
            CompileErrorKind::UnknownCommand(name) => write!(f, "unknown command '{}'", name),
            CompileErrorKind::BreakOutsideLoop => write!(f, "unexpected 'break'"),
            CompileErrorKind::ContinueOutsideLoop => write!(f, "unexpected 'continue'"),
            CompileErrorKind::CaseOutsideSwitch => write!(f, "'case' outside 'switch'"),
            CompileErrorKind::ScriptTooLarge => write!(f, "script too large"),
        }
    }
}

/// Error raised inside the parser, positioned by byte offset
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: CompileErrorKind,
    pub pos: usize,
}

impl ParseError {
    pub fn new(kind: CompileErrorKind, pos: usize) -> Self {
        ParseError { kind, pos }
    }

    pub fn expected(what: &str, pos: usize) -> Self {
        ParseError::new(CompileErrorKind::Expected(what.to_string()), pos)
    }

    pub fn syntax(msg: impl Into<String>, pos: usize) -> Self {
        ParseError::new(CompileErrorKind::Syntax(msg.into()), pos)
    }

    /// Attach file, line and excerpt information
    pub fn locate(self, source: &str, file: &str, start_line: usize) -> CompileError {
        let (line, column) = line_column(source, self.pos);
        CompileError {
            excerpt: excerpt(source, line, column, start_line),
            kind: self.kind,
            file: file.to_string(),
            line: line + start_line,
            column: column + 1,
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Compile failure as reported to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub file: String,
    /// 1-based, offset by the caller's start line
    pub line: usize,
    /// 1-based
    pub column: usize,
    pub excerpt: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "script error in '{}' line {} column {}: {}",
            self.file, self.line, self.column, self.kind
        )?;
        write!(f, "{}", self.excerpt)
    }
}

impl std::error::Error for CompileError {}

/// 0-based line and column of a byte offset
fn line_column(source: &str, pos: usize) -> (usize, usize) {
    let pos = pos.min(source.len());
    let before = &source.as_bytes()[..pos];
    let line = before.iter().filter(|&&b| b == b'\n').count();
    let line_start = before.iter().rposition(|&b| b == b'\n').map(|p| p + 1).unwrap_or(0);
    (line, pos - line_start)
}

fn excerpt(source: &str, line: usize, column: usize, start_line: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let first = line.saturating_sub(CONTEXT_LINES);
    let last = (line + CONTEXT_LINES).min(lines.len().saturating_sub(1));
    let mut out = String::new();
    for (n, text) in lines.iter().enumerate().take(last + 1).skip(first) {
        out.push_str(&format!("{:5}: {}\n", n + start_line, text));
        if n == line {
            let pad: String = text
                .chars()
                .take(column)
                .map(|c| if c == '\t' { '\t' } else { ' ' })
                .collect();
            out.push_str(&format!("       {}^\n", pad));
        }
    }
    if line >= lines.len() {
        out.push_str(&format!("{:5}: <end of script>\n", line + start_line));
    }
    out
}
