//! Placeholder tokens in SQL templates.
//!
//! Two token forms are recognised:
//!
//! - `:name` followed by an optional `?` (nullable) and an optional type run,
//!   e.g. `:id?i`, `:note?sn`, `:user.email`
//! - `?` followed by an optional type run, e.g. `?`, `?i`, `?sn`
//!
//! A type run is one of `s` (string), `i` (integer), `f` (float),
//! `d` (date-time) or `b` (boolean), optionally followed by `n` to mark the
//! token nullable. Every token is replaced by an escaped literal produced by
//! the connection's escape primitive.

use crate::adapter::Connection;
use crate::error::{Error, Result};
use crate::value::{Params, Value};
use regex::{Captures, Regex};
use std::ops::Range;
use std::sync::LazyLock;

static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(:[A-Za-z0-9_.\-]*)(\?)?([a-z]*)|\?([a-z]*)").unwrap()
});

const NULL_LITERAL: &str = "NULL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    String,
    Integer,
    Float,
    DateTime,
    Boolean,
    Untyped,
}

impl TypeCode {
    fn from_letter(letter: char) -> Option<Self> {
        match letter {
            's' => Some(TypeCode::String),
            'i' => Some(TypeCode::Integer),
            'f' => Some(TypeCode::Float),
            'd' => Some(TypeCode::DateTime),
            'b' => Some(TypeCode::Boolean),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Named(String),
    Positional,
}

/// One placeholder occurrence in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub type_code: TypeCode,
    pub nullable: bool,
    /// Byte range of the token in the template
    pub span: Range<usize>,
}

impl Token {
    fn from_captures(caps: &Captures<'_>) -> Result<Self> {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
        let text = caps.get(0).map(|m| m.as_str()).unwrap_or_default();

        let (kind, marked_nullable, letters) = match caps.get(1) {
            Some(name) => {
                let name = &name.as_str()[1..];
                let kind = if name.is_empty() {
                    TokenKind::Positional
                } else {
                    TokenKind::Named(name.to_string())
                };
                let letters = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
                (kind, caps.get(2).is_some(), letters)
            }
            None => {
                let letters = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
                (TokenKind::Positional, false, letters)
            }
        };

        let (type_code, nullable_suffix) = parse_type_run(letters).ok_or_else(|| {
            Error::UnknownTypeToken {
                token: text.to_string(),
                letters: letters.to_string(),
            }
        })?;

        Ok(Self {
            kind,
            type_code,
            nullable: marked_nullable || nullable_suffix,
            span: whole,
        })
    }
}

/// `""`, `"n"`, `"<t>"` or `"<t>n"`.
fn parse_type_run(letters: &str) -> Option<(TypeCode, bool)> {
    let mut chars = letters.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (None, _, _) => Some((TypeCode::Untyped, false)),
        (Some('n'), None, _) => Some((TypeCode::Untyped, true)),
        (Some(t), None, _) => TypeCode::from_letter(t).map(|code| (code, false)),
        (Some(t), Some('n'), None) => TypeCode::from_letter(t).map(|code| (code, true)),
        _ => None,
    }
}

/// Resolves template tokens into escaped literals.
#[derive(Debug, Clone, Default)]
pub struct QueryParser;

impl QueryParser {
    pub fn new() -> Self {
        Self
    }

    /// All tokens in `template`, in scan order.
    pub fn tokens(&self, template: &str) -> Result<Vec<Token>> {
        TOKEN_REGEX
            .captures_iter(template)
            .map(|caps| Token::from_captures(&caps))
            .collect()
    }

    /// Replace every token in `template` with its bound literal.
    ///
    /// Substituted text is never rescanned, so a value that looks like a
    /// token is inserted verbatim.
    pub fn parse(&self, template: &str, params: &Params, conn: &dyn Connection) -> Result<String> {
        let mut parsed = String::with_capacity(template.len());
        let mut last = 0;
        let mut next_positional = 0;

        for caps in TOKEN_REGEX.captures_iter(template) {
            let token = Token::from_captures(&caps)?;
            parsed.push_str(&template[last..token.span.start]);

            let value = match &token.kind {
                TokenKind::Named(name) => match params.get(name) {
                    Some(value) => Some(value),
                    None if token.nullable => None,
                    None => return Err(Error::TokenResolution { name: name.clone() }),
                },
                TokenKind::Positional => {
                    let value = params.positional.get(next_positional).ok_or(
                        Error::PositionalArity {
                            supplied: params.positional.len(),
                        },
                    )?;
                    next_positional += 1;
                    Some(value)
                }
            };

            parsed.push_str(&bind_literal(value, &token, conn));
            last = token.span.end;
        }

        parsed.push_str(&template[last..]);
        Ok(parsed)
    }
}

fn quote(escaped: String) -> String {
    format!("'{}'", escaped)
}

fn bool_literal(value: &Value) -> String {
    if value.is_truthy() { "1" } else { "0" }.to_string()
}

/// Cast, escape and quote one value for `token`.
fn bind_literal(value: Option<&Value>, token: &Token, conn: &dyn Connection) -> String {
    let value = match value {
        None | Some(Value::Null) if token.nullable => return NULL_LITERAL.to_string(),
        None => Value::Null,
        Some(Value::DateTime(dt)) => Value::Integer(dt.timestamp()),
        Some(other) => other.clone(),
    };

    match token.type_code {
        TypeCode::String => quote(conn.escape(&Value::Text(value.to_text()))),
        TypeCode::Integer => match value {
            Value::Text(ref s) if s.starts_with('@') => conn.escape(&value),
            _ => conn.escape(&Value::Integer(value.to_integer())),
        },
        TypeCode::Float => quote(conn.escape(&Value::Real(value.to_real()))),
        TypeCode::DateTime => conn.escape(&Value::Integer(value.to_integer())),
        TypeCode::Boolean => bool_literal(&value),
        TypeCode::Untyped => match value {
            Value::Integer(_) => conn.escape(&value),
            Value::Boolean(_) => bool_literal(&value),
            _ => quote(conn.escape(&value)),
        },
    }
}
