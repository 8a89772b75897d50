// Source cursor: whitespace and comments, words, numbers, string literals

use crate::script_compiler::error::{CompileErrorKind, ParseError, ParseResult};
use log::warn;

#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pub pos: usize,
}

fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

impl<'a> Cursor<'a> {
    pub fn new(src: &'a str) -> Self {
        Cursor {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    pub fn source(&self) -> &'a str {
        self.src
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Byte at the cursor, 0 at end of input
    pub fn peek(&self) -> u8 {
        self.peek_at(0)
    }

    pub fn peek_at(&self, offset: usize) -> u8 {
        self.bytes.get(self.pos + offset).copied().unwrap_or(0)
    }

    pub fn byte_at(&self, pos: usize) -> u8 {
        self.bytes.get(pos).copied().unwrap_or(0)
    }

    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.bytes.len());
    }

    pub fn starts_with(&self, text: &str) -> bool {
        self.bytes[self.pos.min(self.bytes.len())..].starts_with(text.as_bytes())
    }

    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.src[start..end]
    }

    /// Skip whitespace and comments
    pub fn skip_space(&mut self) -> ParseResult<()> {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => self.pos += 1,
                b'/' if self.peek_at(1) == b'/' => {
                    while !self.at_end() && self.peek() != b'\n' {
                        self.pos += 1;
                    }
                }
                b'/' if self.peek_at(1) == b'*' => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        if self.at_end() {
                            return Err(ParseError::new(CompileErrorKind::UnterminatedComment, start));
                        }
                        if self.starts_with("*/") {
                            self.pos += 2;
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// End of the identifier starting at `start` (== `start` when there is none).
    /// Accepts the variable sigils in front and a string `$` at the back.
    pub fn word_end(&self, start: usize) -> usize {
        let mut p = start;
        match self.byte_at(p) {
            b'@' | b'\'' => p += 1,
            b'#' => p += if self.byte_at(p + 1) == b'#' { 2 } else { 1 },
            b'.' | b'$' => p += if self.byte_at(p + 1) == b'@' { 2 } else { 1 },
            _ => {}
        }
        let body = p;
        while is_word_char(self.byte_at(p)) {
            p += 1;
        }
        if p == body {
            return start;
        }
        if self.byte_at(p) == b'$' {
            p += 1;
        }
        p
    }

    /// Identifier at the cursor, if any; does not move
    pub fn peek_word(&self) -> Option<&'a str> {
        let end = self.word_end(self.pos);
        (end > self.pos).then(|| &self.src[self.pos..end])
    }

    /// Consume `keyword` when it is followed by a non-word character
    pub fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.starts_with(keyword) && !is_word_char(self.peek_at(keyword.len())) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    /// Skip space, then require `c`
    pub fn expect(&mut self, c: u8, what: &str) -> ParseResult<()> {
        self.skip_space()?;
        if self.peek() != c {
            if self.at_end() {
                return Err(ParseError::new(CompileErrorKind::UnexpectedEnd, self.pos));
            }
            return Err(ParseError::expected(what, self.pos));
        }
        self.pos += 1;
        Ok(())
    }

    /// Whether a numeric literal starts here (optional sign, then a digit)
    pub fn at_number(&self) -> bool {
        let c = self.peek();
        c.is_ascii_digit() || ((c == b'-' || c == b'+') && self.peek_at(1).is_ascii_digit())
    }

    /// Decimal, `0x` hex or leading-zero octal literal with optional sign.
    /// Values outside the 32-bit range are clamped with a warning.
    pub fn parse_number(&mut self) -> ParseResult<i32> {
        let start = self.pos;
        let negative = match self.peek() {
            b'-' => {
                self.pos += 1;
                true
            }
            b'+' => {
                self.pos += 1;
                false
            }
            _ => false,
        };
        let (radix, digits_start) =
            if self.peek() == b'0' && matches!(self.peek_at(1), b'x' | b'X') && self.peek_at(2).is_ascii_hexdigit() {
                (16, self.pos + 2)
            } else if self.peek() == b'0' && self.peek_at(1).is_ascii_digit() {
                (8, self.pos + 1)
            } else {
                (10, self.pos)
            };
        let mut end = digits_start;
        while (self.byte_at(end) as char).is_digit(radix) {
            end += 1;
        }
        if end == digits_start {
            return Err(ParseError::expected("number", start));
        }
        self.pos = end;

        let mut magnitude: i64 = 0;
        let mut overflow = false;
        for &b in &self.bytes[digits_start..end] {
            let digit = (b as char).to_digit(radix).unwrap_or(0) as i64;
            magnitude = magnitude * radix as i64 + digit;
            if magnitude > 1 << 32 {
                overflow = true;
                break;
            }
        }
        let value = if negative { -magnitude } else { magnitude };
        if overflow || value > i32::MAX as i64 {
            if negative {
                warn!(
                    "script:parse_number: underflow detected in '{}', capping value to {}",
                    self.slice(start, end),
                    i32::MIN
                );
                return Ok(i32::MIN);
            }
            warn!(
                "script:parse_number: overflow detected in '{}', capping value to {}",
                self.slice(start, end),
                i32::MAX
            );
            return Ok(i32::MAX);
        }
        if value < i32::MIN as i64 {
            warn!(
                "script:parse_number: underflow detected in '{}', capping value to {}",
                self.slice(start, end),
                i32::MIN
            );
            return Ok(i32::MIN);
        }
        if is_word_char(self.peek()) {
            return Err(ParseError::syntax("unexpected character after number", self.pos));
        }
        Ok(value as i32)
    }

    /// String literal starting at the opening quote
    pub fn parse_string(&mut self) -> ParseResult<String> {
        let start = self.pos;
        self.pos += 1;
        let mut out: Vec<u8> = Vec::new();
        loop {
            let c = self.peek();
            if self.at_end() {
                return Err(ParseError::new(CompileErrorKind::UnterminatedString, start));
            }
            match c {
                b'"' => {
                    self.pos += 1;
                    break;
                }
                b'\n' => {
                    return Err(ParseError::new(CompileErrorKind::NewlineInString, self.pos));
                }
                b'\\' => {
                    self.pos += 1;
                    if self.at_end() {
                        return Err(ParseError::new(CompileErrorKind::UnterminatedString, start));
                    }
                    out.push(self.parse_escape());
                }
                _ => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Byte for the escape sequence after a backslash
    fn parse_escape(&mut self) -> u8 {
        let c = self.peek();
        self.pos += 1;
        match c {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'a' => 0x07,
            b'b' => 0x08,
            b'v' => 0x0b,
            b'f' => 0x0c,
            b'x' if self.peek().is_ascii_hexdigit() => {
                let mut value: u32 = 0;
                let mut count = 0;
                while count < 2 && self.peek().is_ascii_hexdigit() {
                    value = value * 16 + (self.peek() as char).to_digit(16).unwrap_or(0);
                    self.pos += 1;
                    count += 1;
                }
                value as u8
            }
            b'0'..=b'7' => {
                let mut value: u32 = (c - b'0') as u32;
                let mut count = 1;
                while count < 3 && (b'0'..=b'7').contains(&self.peek()) {
                    value = value * 8 + (self.peek() - b'0') as u32;
                    self.pos += 1;
                    count += 1;
                }
                value as u8
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_comments_are_skipped() {
        let mut c = Cursor::new("  // line\n /* block\n */ mes");
        c.skip_space().unwrap();
        assert_eq!(c.peek_word(), Some("mes"));

        let mut c = Cursor::new("/* never closed");
        let err = c.skip_space().unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnterminatedComment);
    }

    #[test]
    fn test_words_with_sigils() {
        for (text, word) in [
            (".@count+1", ".@count"),
            ("$@tmp$ =", "$@tmp$"),
            ("##bank;", "##bank"),
            ("'stage)", "'stage"),
            ("@menu", "@menu"),
            ("quest_2 ", "quest_2"),
        ] {
            assert_eq!(Cursor::new(text).peek_word(), Some(word));
        }
        assert_eq!(Cursor::new(".@ x").peek_word(), None);
        assert_eq!(Cursor::new("+").peek_word(), None);
    }

    #[test]
    fn test_numbers() {
        let parse = |s: &str| Cursor::new(s).parse_number().unwrap();
        assert_eq!(parse("42"), 42);
        assert_eq!(parse("0x1F"), 31);
        assert_eq!(parse("-17"), -17);
        assert_eq!(parse("010"), 8);
        assert_eq!(parse("-0777"), -511);
        assert_eq!(parse("0"), 0);
        assert!(Cursor::new("09").parse_number().is_err());
        assert_eq!(parse("99999999999"), i32::MAX);
        assert_eq!(parse("-99999999999"), i32::MIN);
        assert_eq!(parse("-2147483648"), i32::MIN);
        assert!(Cursor::new("12ab").parse_number().is_err());
    }

    #[test]
    fn test_strings_and_escapes() {
        let mut c = Cursor::new(r#""a\"b\n\x41\101\q" rest"#);
        assert_eq!(c.parse_string().unwrap(), "a\"b\nAAq");
        assert_eq!(c.peek(), b' ');

        let err = Cursor::new("\"open").parse_string().unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnterminatedString);
        let err = Cursor::new("\"two\nlines\"").parse_string().unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::NewlineInString);
    }
}
