//! Template formatting.
//!
//! A template is plain SQL with `{name}` or `{name:selector}` placeholders.
//! `{{` and `}}` render literal braces.
//!
//! | selector | renders |
//! |---|---|
//! | *(none)* | quoted string literal |
//! | `i` | quoted identifier (dotted when the value has several parts) |
//! | `r` | raw text, no escaping |
//! | `d` | number or boolean, validated |
//! | `lf` | quoted literal escaped for `LIKE` |
//! | `dyn` | literal chosen from the value's own type |
//!
//! List values render each element with the same selector, joined by `, `.

use std::fmt::Write;

use indexmap::IndexMap;

use crate::{Lit, quote_ident, quote_parts};

/// A value bound to a template placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// An identifier made of one or more unquoted parts.
    Ident(Vec<String>),
    List(Vec<SqlValue>),
}

impl SqlValue {
    /// Build a dotted identifier value.
    pub fn ident<S: Into<String>>(parts: impl IntoIterator<Item = S>) -> Self {
        SqlValue::Ident(parts.into_iter().map(Into::into).collect())
    }

    /// Build a list value.
    pub fn list<V: Into<SqlValue>>(items: impl IntoIterator<Item = V>) -> Self {
        SqlValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Str(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Str(s)
    }
}

impl From<&String> for SqlValue {
    fn from(s: &String) -> Self {
        SqlValue::Str(s.clone())
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        SqlValue::Int(n)
    }
}

impl From<u32> for SqlValue {
    fn from(n: u32) -> Self {
        SqlValue::Int(i64::from(n))
    }
}

impl From<f64> for SqlValue {
    fn from(n: f64) -> Self {
        SqlValue::Float(n)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// How a placeholder value is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Literal,
    Identifier,
    Raw,
    Decimal,
    LikePattern,
    Dynamic,
}

impl Selector {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "" | "s" => Selector::Literal,
            "i" => Selector::Identifier,
            "r" => Selector::Raw,
            "d" => Selector::Decimal,
            "lf" => Selector::LikePattern,
            "dyn" => Selector::Dynamic,
            _ => return None,
        })
    }
}

/// Errors raised while rendering a template.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatError {
    #[error("placeholder {{{0}}} has no bound value")]
    MissingParam(String),

    #[error("unknown format selector '{selector}' on placeholder {{{name}}}")]
    UnknownSelector { name: String, selector: String },

    #[error("value for {{{name}}} cannot be rendered as {selector:?}: {reason}")]
    InvalidValue {
        name: String,
        selector: Selector,
        reason: String,
    },

    #[error("unterminated placeholder at offset {0}")]
    Unterminated(usize),

    #[error("unmatched '}}' at offset {0}")]
    UnmatchedBrace(usize),
}

/// Named values for a template, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct SqlParams {
    values: IndexMap<String, SqlValue>,
}

impl SqlParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value, replacing any previous binding with the same name.
    pub fn bind(mut self, name: &str, value: impl Into<SqlValue>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.values.get(name)
    }
}

/// Render `template` with `params` into finished SQL text.
///
/// ```
/// use wharf_sql::{SqlParams, SqlValue, format_sql};
///
/// let sql = format_sql(
///     "CREATE DATABASE {name:i} COMMENT = {comment}",
///     &SqlParams::new()
///         .bind("name", SqlValue::ident(["ACME"]))
///         .bind("comment", "it's ours"),
/// )
/// .unwrap();
/// assert_eq!(sql, "CREATE DATABASE \"ACME\" COMMENT = 'it''s ours'");
/// ```
pub fn format_sql(template: &str, params: &SqlParams) -> Result<String, FormatError> {
    let mut out = String::with_capacity(template.len() + 32);
    let bytes = template.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                out.push('{');
                i += 2;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                out.push('}');
                i += 2;
            }
            b'{' => {
                let end = template[i..]
                    .find('}')
                    .map(|off| i + off)
                    .ok_or(FormatError::Unterminated(i))?;
                let inner = &template[i + 1..end];
                let (name, selector) = inner.split_once(':').unwrap_or((inner, ""));
                let selector =
                    Selector::parse(selector).ok_or_else(|| FormatError::UnknownSelector {
                        name: name.to_string(),
                        selector: selector.to_string(),
                    })?;
                let value = params
                    .get(name)
                    .ok_or_else(|| FormatError::MissingParam(name.to_string()))?;
                render_value(&mut out, name, selector, value)?;
                i = end + 1;
            }
            b'}' => return Err(FormatError::UnmatchedBrace(i)),
            _ => {
                // Copy the whole run up to the next brace at once so
                // multi-byte characters stay intact.
                let next = template[i..]
                    .find(['{', '}'])
                    .map(|off| i + off)
                    .unwrap_or(bytes.len());
                out.push_str(&template[i..next]);
                i = next;
            }
        }
    }

    Ok(out)
}

fn render_value(
    out: &mut String,
    name: &str,
    selector: Selector,
    value: &SqlValue,
) -> Result<(), FormatError> {
    let invalid = |reason: &str| FormatError::InvalidValue {
        name: name.to_string(),
        selector,
        reason: reason.to_string(),
    };

    if let SqlValue::List(items) = value {
        for (idx, item) in items.iter().enumerate() {
            if idx > 0 {
                out.push_str(", ");
            }
            render_value(out, name, selector, item)?;
        }
        return Ok(());
    }

    match selector {
        Selector::Literal => match value {
            SqlValue::Null => out.push_str("NULL"),
            SqlValue::Ident(_) => return Err(invalid("identifiers need the 'i' selector")),
            other => {
                let _ = write!(out, "{}", Lit(scalar_text(other)));
            }
        },
        Selector::Identifier => match value {
            SqlValue::Str(s) => out.push_str(&quote_ident(s)),
            SqlValue::Ident(parts) if !parts.is_empty() => out.push_str(&quote_parts(parts)),
            _ => return Err(invalid("expected an identifier")),
        },
        Selector::Raw => match value {
            SqlValue::Ident(parts) => out.push_str(&parts.join(".")),
            SqlValue::Null => out.push_str("NULL"),
            other => out.push_str(&scalar_text(other)),
        },
        Selector::Decimal => match value {
            SqlValue::Int(n) => {
                let _ = write!(out, "{n}");
            }
            SqlValue::Float(n) if n.is_finite() => {
                let _ = write!(out, "{n}");
            }
            SqlValue::Bool(b) => out.push_str(if *b { "TRUE" } else { "FALSE" }),
            SqlValue::Str(s) if s.parse::<f64>().is_ok_and(f64::is_finite) => {
                out.push_str(s.trim())
            }
            SqlValue::Null => out.push_str("NULL"),
            _ => return Err(invalid("not a finite number or boolean")),
        },
        Selector::LikePattern => match value {
            SqlValue::Str(s) => {
                let escaped = s
                    .replace('\\', "\\\\")
                    .replace('%', "\\%")
                    .replace('_', "\\_");
                let _ = write!(out, "{}", Lit(escaped));
            }
            _ => return Err(invalid("LIKE patterns must be strings")),
        },
        Selector::Dynamic => match value {
            SqlValue::Null => out.push_str("NULL"),
            SqlValue::Bool(b) => out.push_str(if *b { "TRUE" } else { "FALSE" }),
            SqlValue::Int(n) => {
                let _ = write!(out, "{n}");
            }
            SqlValue::Float(n) if n.is_finite() => {
                let _ = write!(out, "{n}");
            }
            SqlValue::Float(_) => return Err(invalid("not a finite number")),
            SqlValue::Str(s) => {
                let _ = write!(out, "{}", Lit(s));
            }
            SqlValue::Ident(parts) => out.push_str(&quote_parts(parts)),
            SqlValue::List(_) => unreachable!("lists are expanded above"),
        },
    }

    Ok(())
}

fn scalar_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        SqlValue::Int(n) => n.to_string(),
        SqlValue::Float(n) => n.to_string(),
        SqlValue::Str(s) => s.clone(),
        SqlValue::Ident(parts) => parts.join("."),
        SqlValue::List(items) => items.iter().map(scalar_text).collect::<Vec<_>>().join(", "),
    }
}
