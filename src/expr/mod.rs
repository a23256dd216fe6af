//! Record expression language.
//!
//! Expressions are parsed once into an [`Expr`] tree and then evaluated
//! against each harvested [`Record`](crate::model::Record). They are used to
//! derive output filenames and to build match guards.
//!
//! ```text
//! concat(replace(urn, ":", "_"), "-", xp("//dc:date"))
//! startsWith(xp("//dc:type"), "Text")
//! ```

pub mod ast;
pub mod error;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use ast::{Expr, Value};
pub use error::{EvalError, ParseError, TokenKind};
pub use parser::parse;

use crate::model::Record;

/// Runs a parsed expression over records, reporting whether each matches.
#[derive(Debug, Clone)]
pub struct RecordSearch {
    expr: Expr,
}

impl RecordSearch {
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }

    pub fn parse(src: &str) -> Result<Self, ParseError> {
        parse(src).map(Self::new)
    }

    /// Returns the boolean and string forms of the result.
    pub fn search(&self, record: &Record) -> Result<(bool, String), EvalError> {
        let value = self.expr.evaluate(record)?;
        Ok((value.as_bool(), value.to_string()))
    }
}
