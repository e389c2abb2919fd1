//! Literal rendering for sampled values.

use hs_types::{ParameterValue, TemplateError};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Literal syntax family of the generated program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dialect {
    /// `True`/`False`/`None`, double-quoted strings.
    #[default]
    Python,
    /// `true`/`false`/`null`, JSON strings.
    Json,
}

/// Render a float in positional decimal form, always carrying a `.`.
///
/// Returns `None` for NaN and infinities, which have no literal form.
pub fn render_float(v: f64) -> Option<String> {
    if !v.is_finite() {
        return None;
    }
    let mut s = v.to_string();
    if !s.contains('.') {
        s.push_str(".0");
    }
    Some(s)
}

/// Render one value as a literal of `dialect`.
pub fn render_value(value: &ParameterValue, dialect: Dialect) -> Result<String, TemplateError> {
    let mut out = String::new();
    match value {
        ParameterValue::Int(v) => out.push_str(&v.to_string()),
        ParameterValue::Float(v) => out.push_str(&float_literal(*v)?),
        ParameterValue::Json(v) => write_json(v, dialect, &mut out)?,
    }
    Ok(out)
}

pub(crate) fn quote_str(s: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::Json => serde_json::Value::String(s.to_string()).to_string(),
        Dialect::Python => {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('"');
            for c in s.chars() {
                match c {
                    '\\' => out.push_str("\\\\"),
                    '"' => out.push_str("\\\""),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    c if c.is_control() => {
                        let _ = write!(out, "\\x{:02x}", c as u32);
                    }
                    c => out.push(c),
                }
            }
            out.push('"');
            out
        }
    }
}

fn float_literal(v: f64) -> Result<String, TemplateError> {
    render_float(v).ok_or_else(|| TemplateError::MalformedTemplate {
        message: format!("{v} has no literal form"),
    })
}

fn write_json(
    value: &serde_json::Value,
    dialect: Dialect,
    out: &mut String,
) -> Result<(), TemplateError> {
    use serde_json::Value;

    match value {
        Value::Null => out.push_str(match dialect {
            Dialect::Python => "None",
            Dialect::Json => "null",
        }),
        Value::Bool(b) => out.push_str(match (dialect, *b) {
            (Dialect::Python, true) => "True",
            (Dialect::Python, false) => "False",
            (Dialect::Json, true) => "true",
            (Dialect::Json, false) => "false",
        }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                out.push_str(&float_literal(f)?);
            }
        }
        Value::String(s) => out.push_str(&quote_str(s, dialect)),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_json(item, dialect, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&quote_str(key, dialect));
                out.push_str(": ");
                write_json(item, dialect, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}
