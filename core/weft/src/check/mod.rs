//! Validation of blocks against their schema.
//!
//! The checker is pure: it looks at the syntax tree and the schema only. References are
//! checked for their shape; whether they point at an existing export is the job of the
//! graph builder.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::eval::literal_value;
use crate::schema::{BlockMultiplicity, FieldKind, Schema, ValueType};
use crate::syntax::Span;
use crate::syntax::ast::{self, Block, Body, Expr, ExprKind, Literal};
use crate::syntax::diag::{Diagnostic, DiagnosticCode, Diagnostics};

/// Checks the content of a component block against the argument schema of its kind.
///
/// The returned diagnostics are sorted by position.
pub fn check_block(block: &Block, schema: &Schema) -> Diagnostics {
    let mut diags = Diagnostics::new();
    check_body(&block.body, schema, block.header_span(), &mut diags);
    diags.sort();
    diags
}

fn check_body(body: &Body, schema: &Schema, owner: Span, diags: &mut Diagnostics) {
    let mut seen_attributes: FxHashMap<&str, Span> = FxHashMap::default();
    for attr in body.attributes() {
        let name = attr.name.value.as_str();
        if let Some(first) = seen_attributes.insert(name, attr.name.span) {
            seen_attributes.insert(name, first);
            diags.push(Diagnostic::error(
                DiagnosticCode::DuplicateAttribute,
                attr.name.span,
                format!("attribute `{name}` is already set at {first}"),
            ));
            continue;
        }
        match schema.get(name).map(|f| (&f.kind, f.required)) {
            None => diags.push(Diagnostic::error(
                DiagnosticCode::UnknownField,
                attr.name.span,
                unknown_field_message("attribute", name, schema),
            )),
            Some((FieldKind::Block { .. }, _)) => diags.push(Diagnostic::error(
                DiagnosticCode::UnknownField,
                attr.name.span,
                format!("`{name}` is a block, not an attribute"),
            )),
            Some((FieldKind::Attribute(ty), required)) => {
                if matches!(attr.value.kind, ExprKind::Literal(Literal::Null)) && *ty != ValueType::Any {
                    if required {
                        diags.push(Diagnostic::error(
                            DiagnosticCode::MissingRequired,
                            attr.span,
                            format!("required attribute `{name}` cannot be null"),
                        ));
                    }
                } else {
                    check_expr(&attr.value, ty, name, diags);
                }
            }
        }
    }

    let mut block_counts: FxHashMap<String, usize> = FxHashMap::default();
    let mut labels: FxHashMap<String, FxHashSet<String>> = FxHashMap::default();
    for block in body.blocks() {
        let name = block.name();
        let Some(field) = schema.get(&name) else {
            diags.push(Diagnostic::error(
                DiagnosticCode::UnknownField,
                block.name_span(),
                unknown_field_message("block", &name, schema),
            ));
            continue;
        };
        let FieldKind::Block {
            schema: nested,
            multiplicity,
        } = &field.kind
        else {
            diags.push(Diagnostic::error(
                DiagnosticCode::UnknownField,
                block.name_span(),
                format!("`{name}` is an attribute, not a block"),
            ));
            continue;
        };

        let count = block_counts.entry(name.clone()).or_default();
        *count += 1;
        match (multiplicity, &block.label) {
            (BlockMultiplicity::Single, _) if *count > 1 => diags.push(Diagnostic::error(
                DiagnosticCode::DuplicateBlock,
                block.name_span(),
                format!("block `{name}` can only appear once"),
            )),
            (BlockMultiplicity::Single | BlockMultiplicity::Repeated, Some(label)) => diags.push(Diagnostic::error(
                DiagnosticCode::UnexpectedLabel,
                label.span,
                format!("block `{name}` does not take a label"),
            )),
            (BlockMultiplicity::Labeled, None) => diags.push(Diagnostic::error(
                DiagnosticCode::MissingLabel,
                block.name_span(),
                format!("block `{name}` requires a label"),
            )),
            (BlockMultiplicity::Labeled, Some(label)) => {
                if !labels.entry(name.clone()).or_default().insert(label.value.clone()) {
                    diags.push(Diagnostic::error(
                        DiagnosticCode::DuplicateLabel,
                        label.span,
                        format!("duplicate label \"{}\" for block `{name}`", label.value),
                    ));
                }
            }
            _ => (),
        }
        check_body(&block.body, nested, block.header_span(), diags);
    }

    // one diagnostic per missing field, so that each one can be fixed independently
    for field in schema.fields().filter(|f| f.required) {
        let present = if field.is_block() {
            block_counts.contains_key(&field.name)
        } else {
            seen_attributes.contains_key(field.name.as_str())
        };
        if !present {
            let what = if field.is_block() { "block" } else { "attribute" };
            diags.push(Diagnostic::error(
                DiagnosticCode::MissingRequired,
                owner,
                format!("missing required {what} `{}`", field.name),
            ));
        }
    }
}

/// Checks the type of the literal parts of an expression.
fn check_expr(expr: &Expr, ty: &ValueType, path: &str, diags: &mut Diagnostics) {
    match &expr.kind {
        ExprKind::Reference(segments) => {
            if segments.len() < 2 {
                diags.push(Diagnostic::error(
                    DiagnosticCode::MalformedReference,
                    expr.span,
                    format!(
                        "`{}` is not a valid reference: expected the name of a component followed by one of its exports",
                        ast::path_to_string(segments)
                    ),
                ));
            }
        }
        ExprKind::Literal(lit) => {
            if let Err(m) = ty.coerce(literal_value(lit)) {
                diags.push(mismatch(expr.span, path, &m.expected, &m.found));
            }
        }
        ExprKind::List(items) => match ty {
            ValueType::Any | ValueType::List(_) => {
                let inner = match ty {
                    ValueType::List(inner) => inner.as_ref(),
                    _ => &ValueType::Any,
                };
                for (i, item) in items.iter().enumerate() {
                    check_expr(item, inner, &format!("{path}[{i}]"), diags);
                }
            }
            _ => diags.push(mismatch(expr.span, path, &ty.to_string(), "list")),
        },
        ExprKind::Object(fields) => match ty {
            ValueType::Any | ValueType::Map(_) => {
                let inner = match ty {
                    ValueType::Map(inner) => inner.as_ref(),
                    _ => &ValueType::Any,
                };
                for field in fields {
                    check_expr(&field.value, inner, &format!("{path}.{}", field.key.value), diags);
                }
            }
            _ => diags.push(mismatch(expr.span, path, &ty.to_string(), "map")),
        },
    }
}

fn mismatch(span: Span, path: &str, expected: &str, found: &str) -> Diagnostic {
    Diagnostic::error(
        DiagnosticCode::TypeMismatch,
        span,
        format!("wrong type for `{path}`: expected {expected}, found {found}"),
    )
}

fn unknown_field_message(what: &str, name: &str, schema: &Schema) -> String {
    let mut known = schema.fields().map(|f| f.name.as_str()).peekable();
    if known.peek().is_none() {
        format!("unknown {what} `{name}`: this block accepts no {what}")
    } else {
        let known: Vec<&str> = known.collect();
        format!("unknown {what} `{name}`, expected one of: {}", known.join(", "))
    }
}
