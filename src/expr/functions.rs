//! Native functions callable from record expressions.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use super::ast::Value;
use super::error::EvalError;
use crate::model::Record;
use crate::xml::{XPath, XmlDocument};

pub type NativeFunction = fn(&Record, &[Value]) -> Result<Value, EvalError>;

static NATIVE_FUNCTIONS: Lazy<HashMap<&'static str, NativeFunction>> = Lazy::new(|| {
    let table: [(&'static str, NativeFunction); 6] = [
        ("xp", xp),
        ("concat", concat),
        ("startsWith", starts_with),
        ("contains", contains),
        ("urn", urn),
        ("replace", replace),
    ];
    table.into_iter().collect()
});

/// Resolves a function name against the registry.
pub fn lookup(name: &str) -> Option<(&'static str, NativeFunction)> {
    NATIVE_FUNCTIONS
        .get_key_value(name)
        .map(|(name, function)| (*name, *function))
}

fn check_arity(function: &'static str, args: &[Value], expected: usize) -> Result<(), EvalError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(EvalError::Arity {
            function,
            expected,
            actual: args.len(),
        })
    }
}

/// xp(<xpath>): trimmed string value of the path over the record content.
fn xp(record: &Record, args: &[Value]) -> Result<Value, EvalError> {
    check_arity("xp", args, 1)?;
    let failed = |e: crate::xml::XmlError| EvalError::Evaluation {
        function: "xp",
        reason: e.to_string(),
    };

    let path = XPath::compile(&args[0].to_string()).map_err(failed)?;
    let doc = XmlDocument::parse(&record.content).map_err(failed)?;
    let value = path.string_value(&doc).unwrap_or_default();
    Ok(Value::Str(value.trim().to_string()))
}

/// concat(<strs>...)
fn concat(_: &Record, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Str(args.iter().map(Value::to_string).collect()))
}

/// startsWith(<str>, <prefix>): the string if it has the prefix, else "".
fn starts_with(_: &Record, args: &[Value]) -> Result<Value, EvalError> {
    check_arity("startsWith", args, 2)?;
    if args[0].to_string().starts_with(&args[1].to_string()) {
        Ok(args[0].clone())
    } else {
        Ok(Value::Str(String::new()))
    }
}

/// contains(<str>, <substring>): the string if it contains the substring, else "".
fn contains(_: &Record, args: &[Value]) -> Result<Value, EvalError> {
    check_arity("contains", args, 2)?;
    if args[0].to_string().contains(&args[1].to_string()) {
        Ok(args[0].clone())
    } else {
        Ok(Value::Str(String::new()))
    }
}

fn urn(record: &Record, args: &[Value]) -> Result<Value, EvalError> {
    check_arity("urn", args, 0)?;
    Ok(Value::Str(record.identifier().to_string()))
}

/// replace(<str>, <substr>, <new>)
fn replace(_: &Record, args: &[Value]) -> Result<Value, EvalError> {
    check_arity("replace", args, 3)?;
    let from = args[1].to_string();
    let to = args[2].to_string();
    Ok(Value::Str(args[0].to_string().replace(&from, &to)))
}
