use std::fmt;
use thiserror::Error;

/// Token classes reported in syntax errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    String,
    RawString,
    Char(char),
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident => write!(f, "Ident"),
            TokenKind::String => write!(f, "String"),
            TokenKind::RawString => write!(f, "RawString"),
            TokenKind::Char(c) => write!(f, "{:?}", c.to_string()),
            TokenKind::Eof => write!(f, "EOF"),
        }
    }
}

/// Errors raised while turning expression text into an AST.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected {expected} but got {actual}")]
    Syntax { expected: TokenKind, actual: TokenKind },
    #[error("{message} at offset {offset}")]
    Lex { offset: usize, message: String },
    #[error("invalid string literal {literal}: {reason}")]
    InvalidString { literal: String, reason: String },
    #[error("no such function: {0}")]
    UnknownFunction(String),
}

/// Errors raised while evaluating an AST against a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("{function}() expects exactly {expected} argument(s), got {actual}")]
    Arity {
        function: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{function}(): {reason}")]
    Evaluation {
        function: &'static str,
        reason: String,
    },
}
