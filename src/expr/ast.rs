use std::fmt;

use super::error::EvalError;
use super::functions::NativeFunction;
use crate::model::Record;

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Bool(bool),
}

impl Value {
    /// Strings are true when non-empty.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Bool(b) => f.write_str(if *b { "true" } else { "false" }),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// Parsed expression tree. Read-only once built, so one tree can be
/// evaluated against many records from many tasks.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Call {
        name: &'static str,
        function: NativeFunction,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn evaluate(&self, record: &Record) -> Result<Value, EvalError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Call { function, args, .. } => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(record))
                    .collect::<Result<Vec<_>, _>>()?;
                function(record, &values)
            }
        }
    }
}
