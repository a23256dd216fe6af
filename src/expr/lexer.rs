//! Tokenizer for record expressions.
//!
//! Recognizes identifiers, double-quoted strings, backquoted raw strings and
//! single punctuation characters. Whitespace and `//` / `/* */` comments are
//! skipped.

use super::error::{ParseError, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    /// Quoted text exactly as written, quotes included.
    String(String),
    RawString(String),
    Char(char),
    Eof,
}

impl Token {
    pub fn kind(&self) -> TokenKind {
        match self {
            Token::Ident(_) => TokenKind::Ident,
            Token::String(_) => TokenKind::String,
            Token::RawString(_) => TokenKind::RawString,
            Token::Char(c) => TokenKind::Char(*c),
            Token::Eof => TokenKind::Eof,
        }
    }
}

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.src[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, offset: usize, message: &str) -> ParseError {
        ParseError::Lex {
            offset,
            message: message.to_string(),
        }
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match (self.peek(), self.peek_second()) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.pos;
                    self.pos += 2;
                    match self.src[self.pos..].find("*/") {
                        Some(end) => self.pos += end + 2,
                        None => return Err(self.error(start, "comment not terminated")),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia()?;
        let start = self.pos;
        let c = match self.bump() {
            Some(c) => c,
            None => return Ok(Token::Eof),
        };

        if c.is_alphabetic() || c == '_' {
            while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
                self.bump();
            }
            return Ok(Token::Ident(self.src[start..self.pos].to_string()));
        }

        match c {
            '"' => {
                loop {
                    match self.bump() {
                        Some('"') => break,
                        Some('\\') => {
                            if self.bump().is_none() {
                                return Err(self.error(start, "literal not terminated"));
                            }
                        }
                        Some('\n') | None => {
                            return Err(self.error(start, "literal not terminated"))
                        }
                        Some(_) => {}
                    }
                }
                Ok(Token::String(self.src[start..self.pos].to_string()))
            }
            '`' => match self.src[self.pos..].find('`') {
                Some(end) => {
                    self.pos += end + 1;
                    Ok(Token::RawString(self.src[start..self.pos].to_string()))
                }
                None => Err(self.error(start, "literal not terminated")),
            },
            other => Ok(Token::Char(other)),
        }
    }
}

/// Reads `count` digits in `radix` from `chars`.
fn digits(chars: &mut std::str::Chars<'_>, count: usize, radix: u32) -> Option<u32> {
    (0..count).try_fold(0u32, |acc, _| {
        let digit = chars.next()?.to_digit(radix)?;
        Some(acc * radix + digit)
    })
}

/// Strips the quotes from a string token and resolves its escapes.
///
/// Raw strings keep their text, minus carriage returns. Quoted strings accept
/// `\a \b \f \n \r \t \v \\ \"`, `\xHH` and `\OOO` bytes, and `\uHHHH` /
/// `\UHHHHHHHH` code points; the bytes must add up to valid UTF-8.
pub fn unquote(literal: &str) -> Result<String, ParseError> {
    let invalid = |reason: &str| ParseError::InvalidString {
        literal: literal.to_string(),
        reason: reason.to_string(),
    };

    if let Some(body) = literal.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
        if body.contains('`') {
            return Err(invalid("backquote inside raw string"));
        }
        return Ok(body.replace('\r', ""));
    }
    let body = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| invalid("not a quoted string"))?;

    let mut out: Vec<u8> = Vec::with_capacity(body.len());
    let mut buf = [0u8; 4];
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {}
            '"' => return Err(invalid("unescaped quote")),
            '\n' => return Err(invalid("newline in string")),
            c => {
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                continue;
            }
        }

        let escape = chars.next().ok_or_else(|| invalid("dangling backslash"))?;
        let decoded = match escape {
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\x0b',
            '\\' => '\\',
            '"' => '"',
            'x' => {
                let byte = digits(&mut chars, 2, 16).ok_or_else(|| invalid("bad \\x escape"))?;
                out.push(byte as u8);
                continue;
            }
            '0'..='7' => {
                let high = escape.to_digit(8).unwrap_or(0);
                let byte = digits(&mut chars, 2, 8)
                    .map(|low| high * 64 + low)
                    .filter(|&v| v <= 0xff)
                    .ok_or_else(|| invalid("bad octal escape"))?;
                out.push(byte as u8);
                continue;
            }
            'u' | 'U' => {
                let width = if escape == 'u' { 4 } else { 8 };
                digits(&mut chars, width, 16)
                    .and_then(char::from_u32)
                    .ok_or_else(|| invalid("bad unicode escape"))?
            }
            other => return Err(invalid(&format!("unknown escape \\{}", other))),
        };
        out.extend_from_slice(decoded.encode_utf8(&mut buf).as_bytes());
    }

    String::from_utf8(out).map_err(|_| invalid("escapes do not form valid UTF-8"))
}
