//! Evaluation of configuration expressions into values.
//!
//! References to the exports of other components are delegated to a [`ReferenceResolver`].
//! Evaluating the arguments of a block is atomic: either every field is evaluated
//! successfully, or an error is returned and no arguments are produced.

use thiserror::Error;

use crate::schema::{BlockMultiplicity, Field, FieldKind, Schema, ValueType};
use crate::syntax::ast::{self, Body, Expr, ExprKind, Literal};
use crate::syntax::diag::{Diagnostic, DiagnosticCode};
use crate::syntax::{Span, Spanned};

mod value;

pub use value::{Arguments, Value};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("{span}: unresolved reference `{reference}`: {reason}")]
    UnresolvedReference { reference: String, reason: String, span: Span },
    #[error("{span}: wrong type for `{path}`: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
        span: Span,
    },
    #[error("{span}: {message}")]
    Invalid { message: String, span: Span },
}

/// Provides the values of the references found in expressions.
pub trait ReferenceResolver {
    fn resolve(&self, path: &[Spanned<String>], span: Span) -> Result<Value, EvalError>;
}

impl<F> ReferenceResolver for F
where
    F: Fn(&[Spanned<String>], Span) -> Result<Value, EvalError>,
{
    fn resolve(&self, path: &[Spanned<String>], span: Span) -> Result<Value, EvalError> {
        self(path, span)
    }
}

/// A resolver for contexts where references are not allowed.
pub struct NoReferences;

impl ReferenceResolver for NoReferences {
    fn resolve(&self, path: &[Spanned<String>], span: Span) -> Result<Value, EvalError> {
        Err(EvalError::UnresolvedReference {
            reference: ast::path_to_string(path),
            reason: String::from("references are not allowed here"),
            span,
        })
    }
}

impl EvalError {
    pub fn span(&self) -> Span {
        match self {
            EvalError::UnresolvedReference { span, .. }
            | EvalError::TypeMismatch { span, .. }
            | EvalError::Invalid { span, .. } => *span,
        }
    }

    pub fn code(&self) -> DiagnosticCode {
        match self {
            EvalError::UnresolvedReference { .. } => DiagnosticCode::UnresolvedReference,
            EvalError::TypeMismatch { .. } => DiagnosticCode::TypeMismatch,
            EvalError::Invalid { .. } => DiagnosticCode::MissingRequired,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let message = match self {
            EvalError::UnresolvedReference { reference, reason, .. } => {
                format!("unresolved reference `{reference}`: {reason}")
            }
            EvalError::TypeMismatch {
                path, expected, found, ..
            } => format!("wrong type for `{path}`: expected {expected}, found {found}"),
            EvalError::Invalid { message, .. } => message.clone(),
        };
        Diagnostic::error(self.code(), self.span(), message)
    }

    /// Prefixes the path of a type mismatch with the name of the enclosing field.
    fn within(self, field: &str) -> Self {
        match self {
            EvalError::TypeMismatch {
                path,
                expected,
                found,
                span,
            } => EvalError::TypeMismatch {
                path: if path.is_empty() || path.starts_with('[') || path.starts_with('.') {
                    format!("{field}{path}")
                } else {
                    format!("{field}.{path}")
                },
                expected,
                found,
                span,
            },
            other => other,
        }
    }
}

/// Evaluates an expression and converts the result to `ty`.
pub fn evaluate(expr: &Expr, ty: &ValueType, resolver: &dyn ReferenceResolver) -> Result<Value, EvalError> {
    let value = evaluate_untyped(expr, resolver)?;
    coerce(value, ty, expr.span)
}

fn coerce(value: Value, ty: &ValueType, span: Span) -> Result<Value, EvalError> {
    ty.coerce(value).map_err(|m| EvalError::TypeMismatch {
        path: m.path,
        expected: m.expected,
        found: m.found,
        span,
    })
}

fn evaluate_untyped(expr: &Expr, resolver: &dyn ReferenceResolver) -> Result<Value, EvalError> {
    let value = match &expr.kind {
        ExprKind::Literal(lit) => literal_value(lit),
        ExprKind::List(items) => {
            let items: Result<Vec<_>, _> = items.iter().map(|item| evaluate_untyped(item, resolver)).collect();
            Value::List(items?)
        }
        ExprKind::Object(fields) => {
            let mut map = indexmap::IndexMap::with_capacity(fields.len());
            for field in fields {
                map.insert(field.key.value.clone(), evaluate_untyped(&field.value, resolver)?);
            }
            Value::Map(map)
        }
        ExprKind::Reference(path) => resolver.resolve(path, expr.span)?,
    };
    Ok(value)
}

pub(crate) fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

/// Evaluates the content of a block against its argument schema.
///
/// The result contains the fields in schema order. Absent optional attributes take their
/// default value, or are left out if they have none. An attribute explicitly set to `null`
/// counts as absent, unless its type is `any`. Nested blocks are evaluated to a map
/// (single block), a list of maps (repeated blocks) or a map of maps keyed by label (labeled blocks).
pub fn evaluate_body(body: &Body, schema: &Schema, resolver: &dyn ReferenceResolver) -> Result<Arguments, EvalError> {
    evaluate_body_at(body, schema, resolver, body_span(body))
}

fn evaluate_body_at(
    body: &Body,
    schema: &Schema,
    resolver: &dyn ReferenceResolver,
    span: Span,
) -> Result<Arguments, EvalError> {
    let mut args = Arguments::new();
    for field in schema.fields() {
        match &field.kind {
            FieldKind::Attribute(ty) => {
                let attr = body.attributes().find(|a| a.name.value == field.name);
                let value = match attr {
                    Some(attr) => {
                        let raw = evaluate_untyped(&attr.value, resolver).map_err(|e| e.within(&field.name))?;
                        if raw.is_null() && *ty != ValueType::Any {
                            None
                        } else {
                            Some(coerce(raw, ty, attr.value.span).map_err(|e| e.within(&field.name))?)
                        }
                    }
                    None => None,
                };
                match value {
                    Some(value) => args.insert(field.name.clone(), value),
                    None => {
                        if let Some(default) = &field.default {
                            args.insert(field.name.clone(), default.clone());
                        } else if field.required {
                            return Err(missing(field, attr.map(|a| a.span).unwrap_or(span)));
                        }
                    }
                }
            }
            FieldKind::Block { schema, multiplicity } => {
                let blocks: Vec<_> = body.blocks().filter(|b| b.name() == field.name).collect();
                if blocks.is_empty() && field.required {
                    return Err(missing(field, span));
                }
                let evaluated = |b: &ast::Block| {
                    evaluate_body_at(&b.body, schema, resolver, b.span)
                        .map(|a| a.to_value())
                        .map_err(|e| e.within(&field.name))
                };
                match multiplicity {
                    BlockMultiplicity::Single => {
                        if let Some(b) = blocks.first() {
                            args.insert(field.name.clone(), evaluated(b)?);
                        }
                    }
                    BlockMultiplicity::Repeated => {
                        let items: Result<Vec<_>, _> = blocks.iter().map(|b| evaluated(b)).collect();
                        args.insert(field.name.clone(), Value::List(items?));
                    }
                    BlockMultiplicity::Labeled => {
                        let mut map = indexmap::IndexMap::with_capacity(blocks.len());
                        for b in &blocks {
                            let label = b.label().unwrap_or_default().to_owned();
                            map.insert(label, evaluated(b)?);
                        }
                        args.insert(field.name.clone(), Value::Map(map));
                    }
                }
            }
        }
    }
    Ok(args)
}

fn missing(field: &Field, span: Span) -> EvalError {
    EvalError::Invalid {
        message: format!("missing required field `{}`", field.name),
        span,
    }
}

fn body_span(body: &Body) -> Span {
    match (body.stmts.first(), body.stmts.last()) {
        (Some(first), Some(last)) => first.span().to(last.span()),
        _ => Span::default(),
    }
}
