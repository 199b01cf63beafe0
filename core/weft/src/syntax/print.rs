//! Canonical text form of syntax trees and values.
//!
//! The output of this module can be parsed again. Two blocks that only differ by
//! whitespace, comments or optional commas print to the same text, which is how
//! the controller detects that the declaration of a component has changed.

use std::fmt::{self, Write};

use super::ast::{Block, Body, Expr, ExprKind, Literal, Stmt};
use crate::eval::Value;

const INDENT: &str = "    ";

pub fn body_to_string(body: &Body) -> String {
    let mut out = String::new();
    // writing to a String never fails
    let _ = write_body(&mut out, body, 0);
    out
}

pub fn block_to_string(block: &Block) -> String {
    let mut out = String::new();
    let _ = write_block(&mut out, block, 0);
    out
}

pub fn write_body(out: &mut impl Write, body: &Body, depth: usize) -> fmt::Result {
    for stmt in &body.stmts {
        match stmt {
            Stmt::Attribute(attr) => {
                write_indent(out, depth)?;
                write!(out, "{} = ", attr.name.value)?;
                write_expr(out, &attr.value)?;
                out.write_char('\n')?;
            }
            Stmt::Block(block) => write_block(out, block, depth)?,
        }
    }
    Ok(())
}

pub fn write_block(out: &mut impl Write, block: &Block, depth: usize) -> fmt::Result {
    write_indent(out, depth)?;
    out.write_str(&block.name())?;
    if let Some(label) = &block.label {
        out.write_char(' ')?;
        write_string(out, &label.value)?;
    }
    if block.body.is_empty() {
        return out.write_str(" {}\n");
    }
    out.write_str(" {\n")?;
    write_body(out, &block.body, depth + 1)?;
    write_indent(out, depth)?;
    out.write_str("}\n")
}

pub fn write_expr(out: &mut impl Write, expr: &Expr) -> fmt::Result {
    match &expr.kind {
        ExprKind::Literal(lit) => match lit {
            Literal::Null => out.write_str("null"),
            Literal::Bool(b) => write!(out, "{b}"),
            Literal::Int(i) => write!(out, "{i}"),
            Literal::Float(f) => write_float(out, *f),
            Literal::String(s) => write_string(out, s),
        },
        ExprKind::List(items) => {
            out.write_char('[')?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.write_str(", ")?;
                }
                write_expr(out, item)?;
            }
            out.write_char(']')
        }
        ExprKind::Object(fields) => {
            out.write_char('{')?;
            for (i, field) in fields.iter().enumerate() {
                out.write_str(if i > 0 { ", " } else { " " })?;
                write_key(out, &field.key.value)?;
                out.write_str(" = ")?;
                write_expr(out, &field.value)?;
            }
            if !fields.is_empty() {
                out.write_char(' ')?;
            }
            out.write_char('}')
        }
        ExprKind::Reference(path) => out.write_str(&super::ast::path_to_string(path)),
    }
}

/// Writes a value as an expression of the configuration language.
pub fn write_value(out: &mut impl Write, value: &Value) -> fmt::Result {
    match value {
        Value::Null => out.write_str("null"),
        Value::Bool(b) => write!(out, "{b}"),
        Value::Int(i) => write!(out, "{i}"),
        Value::Float(f) => write_float(out, *f),
        Value::String(s) => write_string(out, s),
        Value::List(items) => {
            out.write_char('[')?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.write_str(", ")?;
                }
                write_value(out, item)?;
            }
            out.write_char(']')
        }
        Value::Map(entries) => {
            out.write_char('{')?;
            for (i, (key, v)) in entries.iter().enumerate() {
                out.write_str(if i > 0 { ", " } else { " " })?;
                write_key(out, key)?;
                out.write_str(" = ")?;
                write_value(out, v)?;
            }
            if !entries.is_empty() {
                out.write_char(' ')?;
            }
            out.write_char('}')
        }
    }
}

fn write_indent(out: &mut impl Write, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        out.write_str(INDENT)?;
    }
    Ok(())
}

fn write_float(out: &mut impl Write, f: f64) -> fmt::Result {
    // Debug keeps a fractional part (`1.0`), so that the number is parsed as a float again
    write!(out, "{f:?}")
}

fn write_key(out: &mut impl Write, key: &str) -> fmt::Result {
    if is_identifier(key) {
        out.write_str(key)
    } else {
        write_string(out, key)
    }
}

pub fn write_string(out: &mut impl Write, s: &str) -> fmt::Result {
    out.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            '\t' => out.write_str("\\t")?,
            '\r' => out.write_str("\\r")?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}

/// Returns `true` if `s` can be written without quotes: it is an identifier and not a keyword.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    first_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !matches!(s, "true" | "false" | "null")
}
