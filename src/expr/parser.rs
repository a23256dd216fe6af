//! Recursive-descent parser for record expressions.
//!
//! ```text
//! <expr>   = <fncall> | <atom>
//! <fncall> = IDENT [ "(" [ <expr> ("," <expr>)* ] ")" ]
//! <atom>   = STRING | RAWSTRING
//! ```

use super::ast::{Expr, Value};
use super::error::{ParseError, TokenKind};
use super::functions;
use super::lexer::{unquote, Lexer, Token};

struct Parser<'a> {
    lexer: Lexer<'a>,
    tok: Token,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(src);
        let tok = lexer.next_token()?;
        Ok(Self { lexer, tok })
    }

    fn advance(&mut self) -> Result<Token, ParseError> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.tok, next))
    }

    fn consume_char(&mut self, expected: char) -> Result<(), ParseError> {
        if self.tok == Token::Char(expected) {
            self.advance()?;
            Ok(())
        } else {
            Err(self.unexpected(TokenKind::Char(expected)))
        }
    }

    fn unexpected(&self, expected: TokenKind) -> ParseError {
        ParseError::Syntax {
            expected,
            actual: self.tok.kind(),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.tok, Token::Ident(_)) {
            self.parse_call()
        } else {
            self.parse_atom()
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        match &self.tok {
            Token::String(text) | Token::RawString(text) => {
                let value = unquote(text)?;
                self.advance()?;
                Ok(Expr::Literal(Value::Str(value)))
            }
            _ => Err(self.unexpected(TokenKind::String)),
        }
    }

    fn parse_call(&mut self) -> Result<Expr, ParseError> {
        let name = match self.advance()? {
            Token::Ident(name) => name,
            _ => return Err(self.unexpected(TokenKind::Ident)),
        };
        let (name, function) =
            functions::lookup(&name).ok_or(ParseError::UnknownFunction(name))?;

        let mut args = Vec::new();
        if self.tok == Token::Char('(') {
            self.advance()?;
            while self.tok != Token::Char(')') {
                if !args.is_empty() {
                    self.consume_char(',')?;
                }
                args.push(self.parse_expr()?);
            }
            self.consume_char(')')?;
        }

        Ok(Expr::Call {
            name,
            function,
            args,
        })
    }
}

/// Parses an expression. Function names are resolved here, so an unknown
/// name fails before any record is seen.
pub fn parse(src: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(src)?;
    let expr = parser.parse_expr()?;
    if parser.tok != Token::Eof {
        return Err(parser.unexpected(TokenKind::Eof));
    }
    Ok(expr)
}
