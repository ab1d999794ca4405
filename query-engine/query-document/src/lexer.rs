//! Single pass scanner turning a query (or schema) document into a flat token list.
//!
//! Tokens borrow their text from the input, nothing is copied. String tokens hold the
//! text between the quotes with escapes left untouched, variable tokens hold the name
//! without the leading `$`.

use crate::error::LexError;
use std::{fmt, ops::Range};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,
    Name,
    /// The `on` keyword of inline fragments and fragment definitions.
    On,
    ArgsOpen,
    ArgsClose,
    ListOpen,
    ListClose,
    ObjOpen,
    ObjClose,
    Colon,
    Equals,
    Pipe,
    Required,
    Directive,
    Variable,
    Spread,
    Number,
    String,
    Bool,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Eof => "EOF",
            TokenKind::Name => "name",
            TokenKind::On => "on",
            TokenKind::ArgsOpen => "(",
            TokenKind::ArgsClose => ")",
            TokenKind::ListOpen => "[",
            TokenKind::ListClose => "]",
            TokenKind::ObjOpen => "{",
            TokenKind::ObjClose => "}",
            TokenKind::Colon => ":",
            TokenKind::Equals => "=",
            TokenKind::Pipe => "|",
            TokenKind::Required => "!",
            TokenKind::Directive => "@",
            TokenKind::Variable => "variable",
            TokenKind::Spread => "...",
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::Bool => "boolean",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub value: &'a str,
    /// Byte offset of `value` in the input.
    pub pos: usize,
    pub line: u32,
}

impl Token<'_> {
    pub fn span(&self) -> Range<usize> {
        self.pos..self.pos + self.value.len()
    }

    /// Keyword check for names, case-insensitive like the rest of the keyword handling.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Name && self.value.eq_ignore_ascii_case(keyword)
    }
}

/// Scans `input` into tokens. The last token is always [`TokenKind::Eof`].
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>, LexError> {
    if input.is_empty() {
        return Err(LexError::Empty);
    }

    let mut lexer = Lexer::new(input);
    lexer.run()?;

    Ok(lexer.tokens)
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    start: usize,
    line: u32,
    start_line: u32,
    tokens: Vec<Token<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            start: 0,
            line: 1,
            start_line: 1,
            tokens: Vec::with_capacity(input.len() / 4 + 1),
        }
    }

    fn run(&mut self) -> Result<(), LexError> {
        while let Some(c) = self.bump() {
            match c {
                c if is_space(c) || is_end_of_line(c) => self.ignore(),
                '#' => {
                    self.eat_while(|c| !is_end_of_line(c));
                    self.ignore();
                }
                '$' => {
                    self.ignore();

                    if self.eat_while(is_alphanumeric) == 0 {
                        return Err(self.unrecognized('$'));
                    }

                    self.emit(TokenKind::Variable);
                }
                '.' => {
                    if !self.input[self.pos..].starts_with("..") {
                        return Err(self.unrecognized('.'));
                    }

                    self.pos += 2;
                    self.emit(TokenKind::Spread);
                }
                '"' | '\'' => self.string(c)?,
                '+' | '-' | '0'..='9' => self.number()?,
                c if is_alphanumeric(c) => self.name(),
                c => match punctuator(c) {
                    Some(kind) => self.emit(kind),
                    None => return Err(self.unrecognized(c)),
                },
            }
        }

        self.ignore();
        self.emit(TokenKind::Eof);

        Ok(())
    }

    fn string(&mut self, delimiter: char) -> Result<(), LexError> {
        let (line, pos) = (self.line, self.pos - 1);
        self.ignore();

        let mut escaped = false;

        loop {
            let Some(c) = self.bump() else {
                return Err(LexError::UnterminatedString { line, pos });
            };

            if c == '\\' && !escaped {
                escaped = true;
                continue;
            }

            if c == delimiter && !escaped {
                let end = self.pos - c.len_utf8();

                self.tokens.push(Token {
                    kind: TokenKind::String,
                    value: &self.input[self.start..end],
                    pos: self.start,
                    line: self.start_line,
                });

                self.ignore();
                return Ok(());
            }

            escaped = false;
        }
    }

    // Optional sign, digits, optional fraction, optional trailing `i`. The sign or first
    // digit has already been consumed.
    fn number(&mut self) -> Result<(), LexError> {
        let signed = self.input[self.start..].starts_with(['+', '-']);

        if self.eat_while(|c| c.is_ascii_digit()) == 0 && signed {
            return Err(self.bad_number());
        }

        if self.eat(|c| c == '.') {
            self.eat_while(|c| c.is_ascii_digit());
        }

        self.eat(|c| c == 'i');

        if self.peek().is_some_and(is_alphanumeric) {
            self.bump();
            return Err(self.bad_number());
        }

        self.emit(TokenKind::Number);
        Ok(())
    }

    fn bad_number(&self) -> LexError {
        LexError::BadNumber {
            text: self.input[self.start..self.pos].to_owned(),
            line: self.start_line,
            pos: self.start,
        }
    }

    fn name(&mut self) {
        self.eat_while(is_alphanumeric);

        let value = &self.input[self.start..self.pos];

        let kind = if value.eq_ignore_ascii_case("on") {
            TokenKind::On
        } else if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
            TokenKind::Bool
        } else {
            TokenKind::Name
        };

        self.emit(kind);
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();

        if c == '\n' {
            self.line += 1;
        }

        Some(c)
    }

    fn eat(&mut self, pred: impl Fn(char) -> bool) -> bool {
        match self.peek() {
            Some(c) if pred(c) => {
                self.bump();
                true
            }
            _ => false,
        }
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) -> usize {
        let mut n = 0;

        while self.eat(&pred) {
            n += 1;
        }

        n
    }

    fn emit(&mut self, kind: TokenKind) {
        self.tokens.push(Token {
            kind,
            value: &self.input[self.start..self.pos],
            pos: self.start,
            line: self.start_line,
        });

        self.ignore();
    }

    fn ignore(&mut self) {
        self.start = self.pos;
        self.start_line = self.line;
    }

    fn unrecognized(&self, rune: char) -> LexError {
        LexError::UnrecognizedCharacter {
            rune,
            line: self.line,
            pos: self.pos - rune.len_utf8(),
        }
    }
}

fn punctuator(c: char) -> Option<TokenKind> {
    let kind = match c {
        '!' => TokenKind::Required,
        '@' => TokenKind::Directive,
        '(' => TokenKind::ArgsOpen,
        ')' => TokenKind::ArgsClose,
        '[' => TokenKind::ListOpen,
        ']' => TokenKind::ListClose,
        '{' => TokenKind::ObjOpen,
        '}' => TokenKind::ObjClose,
        ':' => TokenKind::Colon,
        '=' => TokenKind::Equals,
        '|' => TokenKind::Pipe,
        _ => return None,
    };

    Some(kind)
}

fn is_space(c: char) -> bool {
    matches!(c, ',' | ' ' | '\t')
}

fn is_end_of_line(c: char) -> bool {
    matches!(c, '\r' | '\n')
}

fn is_alphanumeric(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}
