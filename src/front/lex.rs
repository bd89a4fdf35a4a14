//! The lexer (§4.1).
//!
//! Built over `regex::Regex` the way the teacher's `Lexer` skeleton is laid
//! out: a `Vec<(Regex, TokenKind)>` matcher table tried in priority order at
//! the current byte offset. Unlike the teacher's toy grammar this table
//! covers hex/float literals, brackets, offsets and strings.

use std::fmt;

use derive_more::Display;
use regex::Regex;
use thiserror::Error;

/// Byte/line/column position of a token or lexer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub byte: usize,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Token classes (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TokenKind {
    #[display("eof")]
    Eof,
    #[display("bad")]
    Bad,
    #[display("directive")]
    Directive,
    #[display("identifier")]
    Identifier,
    #[display("label")]
    Label,
    #[display("register")]
    Register,
    #[display("immediate")]
    Immediate,
    #[display("'['")]
    LeftBracket,
    #[display("']'")]
    RightBracket,
    #[display("offset")]
    Offset,
    #[display("','")]
    Comma,
    #[display("newline")]
    Newline,
    #[display("string")]
    String,
}

/// A single lexed token: its kind, its source text, and its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: Pos,
}

#[derive(Debug, Error)]
#[error("lexical error at {pos}: malformed token {text:?}")]
pub struct LexError {
    pub pos: Pos,
    pub text: String,
}

/// `(regex, kind)` matcher table, tried in order at the current position.
/// Order matters: `label` must be tried before `identifier` (both start
/// the same way) and `immediate`/`offset` numeric forms are tried longest
/// (hex/float) before plain decimal.
fn matchers() -> Vec<(Regex, TokenKind)> {
    let num = r"(?:[xX]-?[0-9a-fA-F]+[uU]?|[fF]-?[0-9]+(?:\.[0-9]*)?|-?[0-9]+[uU]?)";
    let num_no_float = r"(?:[xX]-?[0-9a-fA-F]+[uU]?|-?[0-9]+[uU]?)";
    vec![
        (Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*:").unwrap(), TokenKind::Label),
        (Regex::new(r"^\.[A-Za-z][A-Za-z0-9_]*").unwrap(), TokenKind::Directive),
        (Regex::new(r"^%[A-Za-z][A-Za-z0-9]*").unwrap(), TokenKind::Register),
        (Regex::new(&format!("^#{num}")).unwrap(), TokenKind::Immediate),
        (Regex::new(&format!("^[+-]{num_no_float}")).unwrap(), TokenKind::Offset),
        (Regex::new(r"^[A-Za-z_][A-Za-z0-9_$-]*").unwrap(), TokenKind::Identifier),
        (Regex::new(r#"^"(?:[^"\\]|\\.)*""#).unwrap(), TokenKind::String),
        (Regex::new(r"^\[").unwrap(), TokenKind::LeftBracket),
        (Regex::new(r"^\]").unwrap(), TokenKind::RightBracket),
        (Regex::new(r"^,").unwrap(), TokenKind::Comma),
        (Regex::new(r"^\n").unwrap(), TokenKind::Newline),
    ]
}

/// Peekable lexer over an input string.
pub struct Lexer<'src> {
    input: &'src str,
    pos: usize,
    line: u32,
    column: u32,
    whitespace: Regex,
    comment: Regex,
    matchers: Vec<(Regex, TokenKind)>,
    peeked: Option<Token>,
}

impl<'src> Lexer<'src> {
    pub fn new(input: &'src str) -> Self {
        Lexer {
            input,
            pos: 0,
            line: 1,
            column: 1,
            whitespace: Regex::new(r"^[ \t\r\f\v]+").unwrap(),
            comment: Regex::new(r"^;[^\n]*").unwrap(),
            matchers: matchers(),
            peeked: None,
        }
    }

    fn advance_pos(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.pos += text.len();
    }

    fn skip_trivia(&mut self) {
        loop {
            let rest = &self.input[self.pos..];
            if let Some(m) = self.whitespace.find(rest) {
                let text = m.as_str().to_string();
                self.advance_pos(&text);
                continue;
            }
            if let Some(m) = self.comment.find(rest) {
                let text = m.as_str().to_string();
                self.advance_pos(&text);
                continue;
            }
            break;
        }
    }

    fn cur_pos(&self) -> Pos {
        Pos { byte: self.pos, line: self.line, column: self.column }
    }

    fn lex_one(&mut self) -> Result<Token, LexError> {
        self.skip_trivia();
        let pos = self.cur_pos();
        if self.pos >= self.input.len() {
            return Ok(Token { kind: TokenKind::Eof, text: String::new(), pos });
        }
        let rest = &self.input[self.pos..];
        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                let text = m.as_str().to_string();
                self.advance_pos(&text);
                return Ok(Token { kind: *kind, text, pos });
            }
        }
        // Unrecognized character: consume one char and report it as BAD.
        let bad: String = rest.chars().take(1).collect();
        self.advance_pos(&bad);
        Ok(Token { kind: TokenKind::Bad, text: bad, pos })
    }

    /// Look at the next token without consuming it.
    pub fn peek(&mut self) -> Result<&Token, LexError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lex_one()?);
        }
        Ok(self.peeked.as_ref().unwrap())
    }

    /// Look at the next token's kind without consuming it.
    pub fn peek_type(&mut self) -> Result<TokenKind, LexError> {
        Ok(self.peek()?.kind)
    }

    /// Consume and return the next token.
    pub fn get(&mut self) -> Result<Token, LexError> {
        if let Some(t) = self.peeked.take() {
            return Ok(t);
        }
        self.lex_one()
    }
}
