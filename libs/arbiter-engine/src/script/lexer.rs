//! Tokenizer with Python's layout rules: INDENT/DEDENT from leading
//! whitespace, implicit joining inside brackets and explicit joining with a
//! trailing backslash.

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use super::error::{ScriptError, ScriptResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Keyword(&'static str),
    Int(i64),
    /// Integer literal outside `i64`.
    BigInt(BigInt),
    Float(f64),
    Str(String),
    /// Body of an f-string, escapes untouched. Parsed by the parser.
    FStr { body: String, raw: bool },
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
    "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in",
    "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with",
    "yield",
];

// Longest first so that prefix matching picks `**=` over `**` over `*`.
const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "->", ":=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=",
    "*=", "/=", "%=", "&=", "|=", "^=", "@=", "<<", ">>", "+", "-", "*", "/", "%", "<", ">", "=",
    "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "@", "&", "|", "^", "~",
];

const STRING_PREFIXES: &[&str] = &["r", "u", "f", "b", "rb", "br", "fr", "rf"];

pub fn tokenize(source: &str) -> ScriptResult<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    indents: Vec<usize>,
    brackets: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            indents: vec![0],
            brackets: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok, line: usize) {
        self.tokens.push(Token { tok, line });
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(message, self.line)
    }

    fn run(mut self) -> ScriptResult<Vec<Token>> {
        loop {
            if self.at_line_start && self.brackets == 0 {
                if !self.indentation()? {
                    break;
                }
                if self.at_line_start {
                    continue;
                }
            }

            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' | '\x0c' | '\r' => self.pos += 1,
                '\n' => {
                    self.pos += 1;
                    if self.brackets == 0 {
                        let line = self.line;
                        self.push(Tok::Newline, line);
                        self.at_line_start = true;
                    }
                    self.line += 1;
                }
                '#' => self.skip_comment(),
                '\\' => {
                    let next = match self.peek_at(1) {
                        Some('\r') if self.peek_at(2) == Some('\n') => 3,
                        Some('\n') => 2,
                        _ => return Err(self.error("unexpected character after line continuation character")),
                    };
                    self.pos += next;
                    self.line += 1;
                }
                '"' | '\'' => self.string("")?,
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.word()?,
                _ => self.operator()?,
            }
        }

        let line = self.line;
        if self.tokens.last().is_some_and(|t| t.tok != Tok::Newline) {
            self.push(Tok::Newline, line);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent, line);
        }
        self.push(Tok::Eof, line);
        Ok(self.tokens)
    }

    /// Measure the indentation of a logical line. Returns false at end of input.
    /// Leaves `at_line_start` set when the line was blank or a comment.
    fn indentation(&mut self) -> ScriptResult<bool> {
        let mut column = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ' ' => column += 1,
                '\t' => column = (column / 8 + 1) * 8,
                '\x0c' => column = 0,
                _ => break,
            }
            self.pos += 1;
        }

        match self.peek() {
            None => return Ok(false),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(true);
            }
            Some('\r') => {
                self.pos += 1;
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                return Ok(true);
            }
            _ => {}
        }

        let current = self.indents.last().copied().unwrap_or(0);
        let line = self.line;
        if column > current {
            self.indents.push(column);
            self.push(Tok::Indent, line);
        } else if column < current {
            while self.indents.last().is_some_and(|&top| column < top) {
                self.indents.pop();
                self.push(Tok::Dedent, line);
            }
            if self.indents.last().copied() != Some(column) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        self.at_line_start = false;
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn word(&mut self) -> ScriptResult<()> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('"') | Some('\''))
            && STRING_PREFIXES.contains(&word.to_ascii_lowercase().as_str())
        {
            return self.string(&word.to_ascii_lowercase());
        }

        let line = self.line;
        match KEYWORDS.iter().find(|k| **k == word) {
            Some(keyword) => self.push(Tok::Keyword(*keyword), line),
            None => self.push(Tok::Name(word), line),
        }
        Ok(())
    }

    fn string(&mut self, prefix: &str) -> ScriptResult<()> {
        if prefix.contains('b') {
            return Err(self.error("bytes literals are not supported"));
        }
        let raw = prefix.contains('r');
        let formatted = prefix.contains('f');
        let start_line = self.line;

        let quote = self.peek().unwrap_or('"');
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut body = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(ScriptError::syntax("unterminated string literal", start_line));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(ScriptError::syntax("unterminated string literal", start_line));
                }
                self.line += 1;
            }
            if c == '\\' {
                let Some(next) = self.peek_at(1) else {
                    return Err(ScriptError::syntax("unterminated string literal", start_line));
                };
                if next == '\n' {
                    self.line += 1;
                }
                body.push(c);
                body.push(next);
                self.pos += 2;
                continue;
            }
            body.push(c);
            self.pos += 1;
        }

        let tok = if formatted {
            Tok::FStr { body, raw }
        } else if raw {
            Tok::Str(body)
        } else {
            Tok::Str(unescape(&body).map_err(|m| ScriptError::syntax(m, start_line))?)
        };
        self.push(tok, start_line);
        Ok(())
    }

    fn number(&mut self) -> ScriptResult<()> {
        let line = self.line;
        let start = self.pos;

        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.pos += 2;
                let digits_start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
                    self.pos += 1;
                }
                let digits: String = self.chars[digits_start..self.pos].iter().filter(|c| **c != '_').collect();
                let value = BigInt::parse_bytes(digits.as_bytes(), radix)
                    .ok_or_else(|| self.error(format!("invalid integer literal '{}'", self.slice(start))))?;
                self.push(int_token(value), line);
                return Ok(());
            }
        }

        let mut is_float = false;
        self.digits();
        if self.peek() == Some('.') {
            is_float = true;
            self.pos += 1;
            self.digits();
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let signed = matches!(self.peek_at(1), Some('+') | Some('-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += digit_at;
                self.digits();
            }
        }
        if matches!(self.peek(), Some('j') | Some('J')) {
            return Err(self.error("complex literals are not supported"));
        }
        if self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            return Err(self.error("invalid decimal literal"));
        }

        let text: String = self.slice(start).chars().filter(|c| *c != '_').collect();
        let tok = if is_float {
            Tok::Float(text.parse::<f64>().map_err(|_| self.error(format!("invalid float literal '{}'", text)))?)
        } else {
            let value = BigInt::parse_bytes(text.as_bytes(), 10)
                .ok_or_else(|| self.error(format!("invalid integer literal '{}'", text)))?;
            int_token(value)
        };
        self.push(tok, line);
        Ok(())
    }

    fn digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.pos += 1;
        }
    }

    fn slice(&self, start: usize) -> String {
        self.chars[start..self.pos].iter().collect()
    }

    fn operator(&mut self) -> ScriptResult<()> {
        let line = self.line;
        for op in OPERATORS {
            let len = op.chars().count();
            if self.pos + len <= self.chars.len() && op.chars().eq(self.chars[self.pos..self.pos + len].iter().copied()) {
                self.pos += len;
                match *op {
                    "(" | "[" | "{" => self.brackets += 1,
                    ")" | "]" | "}" => self.brackets = self.brackets.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(*op), line);
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or(' ');
        Err(self.error(format!("invalid character '{}' (U+{:04X})", c, c as u32)))
    }
}

/// Resolve backslash escapes in a non-raw string body.
pub fn unescape(body: &str) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            'x' | 'u' | 'U' => {
                let width = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let hex: String = (0..width).filter_map(|_| chars.next()).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == width)
                    .ok_or_else(|| format!("truncated \\{}{} escape", next, "X".repeat(width)))?;
                let ch = char::from_u32(code).ok_or_else(|| format!("invalid code point \\{}{}", next, hex))?;
                out.push(ch);
            }
            '0'..='7' => {
                let mut code = next.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

fn int_token(value: BigInt) -> Tok {
    match value.to_i64() {
        Some(i) => Tok::Int(i),
        None => Tok::BigInt(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn emits_indent_and_dedent() {
        let toks = kinds("def f():\n    return 1\nx = 2\n");
        assert!(toks.contains(&Tok::Indent));
        assert!(toks.contains(&Tok::Dedent));
        assert_eq!(toks.last(), Some(&Tok::Eof));
    }

    #[test]
    fn brackets_join_lines() {
        let toks = kinds("x = [1,\n     2]\n");
        let newlines = toks.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        let toks = kinds("x = 1\n\n    # indented comment\ny = 2\n");
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn string_escapes_and_prefixes() {
        assert_eq!(kinds("'a\\nb'")[0], Tok::Str("a\nb".into()));
        assert_eq!(kinds("r'a\\nb'")[0], Tok::Str("a\\nb".into()));
        assert_eq!(kinds("'''x\ny'''")[0], Tok::Str("x\ny".into()));
        assert!(matches!(kinds("f'{x}'")[0], Tok::FStr { .. }));
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("0xff")[0], Tok::Int(255));
        assert_eq!(kinds("1_000")[0], Tok::Int(1000));
        assert_eq!(kinds("1.5e3")[0], Tok::Float(1500.0));
        assert_eq!(kinds(".5")[0], Tok::Float(0.5));
        assert_eq!(kinds("9223372036854775807")[0], Tok::Int(i64::MAX));
        assert_eq!(
            kinds("99999999999999999999")[0],
            Tok::BigInt("99999999999999999999".parse().unwrap())
        );
    }

    #[test]
    fn rejects_unsupported_literals() {
        assert!(tokenize("b'x'").is_err());
        assert!(tokenize("3j").is_err());
        assert!(tokenize("0x").is_err());
        assert!(tokenize("'open").is_err());
    }

    #[test]
    fn inconsistent_dedent_is_an_error() {
        assert!(tokenize("if x:\n        a = 1\n    b = 2\n").is_err());
    }
}
