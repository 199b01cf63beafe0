//! Construction of the component graph.
//!
//! [`build`] turns the syntax tree of a configuration file into a [`ComponentGraph`]:
//! one node per component block, one edge per dependency. Every problem found along
//! the way is reported as a diagnostic, and a graph is only returned if there is no error.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::check;
use crate::schema::{FieldKind, Registration, Registry, Schema, ValueType};
use crate::syntax::ast::{self, Block, Body, Expr, ExprKind, Stmt};
use crate::syntax::diag::{Diagnostic, DiagnosticCode, Diagnostics};
use crate::syntax::print::{block_to_string, is_identifier};
use crate::syntax::{Span, Spanned};

mod dag;

pub use dag::Dag;

/// Identifies a component: its kind and, if any, its label.
///
/// Displayed as `kind.label`, which is also how other components refer to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId {
    kind: String,
    label: Option<String>,
}

/// A resolved reference to the export of another component.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub target: ComponentId,
    /// Name of the export.
    pub field: String,
    /// Keys to look up inside the export value, if it is a map.
    pub path: Vec<String>,
    pub span: Span,
}

/// A component block of the configuration, ready to be instantiated.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub id: ComponentId,
    pub block: Block,
    pub registration: Arc<Registration>,
    /// References found in the block, in source order.
    pub references: Vec<Reference>,
    /// Canonical text of the block, used to detect changes on reload.
    pub text: String,
}

/// The components of a configuration and their dependencies. Always acyclic.
#[derive(Debug, Clone, Default)]
pub struct ComponentGraph {
    declarations: IndexMap<ComponentId, Declaration>,
    dag: Dag<ComponentId>,
    by_name: FxHashMap<String, ComponentId>,
}

impl ComponentId {
    pub fn new(kind: impl Into<String>, label: Option<&str>) -> Self {
        Self {
            kind: kind.into(),
            label: label.map(str::to_owned),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{}.{label}", self.kind),
            None => f.write_str(&self.kind),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.field)?;
        for key in &self.path {
            write!(f, ".{key}")?;
        }
        Ok(())
    }
}

impl ComponentGraph {
    pub fn get(&self, id: &ComponentId) -> Option<&Declaration> {
        self.declarations.get(id)
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.declarations.contains_key(id)
    }

    /// Iterates on the declarations, in source order.
    pub fn declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.declarations.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ComponentId> {
        self.declarations.keys()
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn dag(&self) -> &Dag<ComponentId> {
        &self.dag
    }

    pub fn dependencies(&self, id: &ComponentId) -> impl Iterator<Item = &ComponentId> {
        self.dag.dependencies(id)
    }

    pub fn dependents(&self, id: &ComponentId) -> impl Iterator<Item = &ComponentId> {
        self.dag.dependents(id)
    }

    /// Every component, each one after its dependencies.
    pub fn topological_order(&self) -> Vec<ComponentId> {
        // the builder rejects cycles
        self.dag
            .topological_order()
            .unwrap_or_else(|| self.declarations.keys().cloned().collect())
    }

    /// Resolves a reference path against the declared components.
    ///
    /// The longest prefix of `path` that names a component is the target, the next segment
    /// is the export, and the remaining segments are keys inside the export.
    pub fn resolve_path(&self, path: &[Spanned<String>], span: Span) -> Option<Reference> {
        resolve_path(path, span, |name| self.by_name.get(name).cloned())
    }
}

fn resolve_path(
    path: &[Spanned<String>],
    span: Span,
    lookup: impl Fn(&str) -> Option<ComponentId>,
) -> Option<Reference> {
    for split in (1..path.len()).rev() {
        let name = ast::path_to_string(&path[..split]);
        if let Some(target) = lookup(&name) {
            return Some(Reference {
                target,
                field: path[split].value.clone(),
                path: path[split + 1..].iter().map(|s| s.value.clone()).collect(),
                span,
            });
        }
    }
    None
}

/// Builds the component graph of a configuration file.
///
/// Returns `None` if at least one error has been found. The diagnostics are sorted by position.
pub fn build(body: &Body, registry: &Registry) -> (Option<ComponentGraph>, Diagnostics) {
    let mut diags = Diagnostics::new();

    // declare the components
    let mut declarations: IndexMap<ComponentId, Declaration> = IndexMap::new();
    let mut by_name: FxHashMap<String, (ComponentId, Span)> = FxHashMap::default();
    for stmt in &body.stmts {
        let block = match stmt {
            Stmt::Block(block) => block,
            Stmt::Attribute(attr) => {
                diags.push(Diagnostic::error(
                    DiagnosticCode::UnexpectedAttribute,
                    attr.span,
                    format!("unexpected attribute `{}`: only component blocks are allowed here", attr.name.value),
                ));
                continue;
            }
        };
        let kind = block.name();
        let registration = match registry.lookup(&kind) {
            Ok(r) => r.clone(),
            Err(e) => {
                diags.push(Diagnostic::error(DiagnosticCode::UnknownKind, block.name_span(), e.to_string()));
                continue;
            }
        };
        if let Some(label) = &block.label {
            if !is_identifier(&label.value) {
                diags.push(Diagnostic::error(
                    DiagnosticCode::InvalidLabel,
                    label.span,
                    format!(
                        "invalid label \"{}\": labels must start with a letter or `_` and contain only letters, digits and `_`",
                        label.value
                    ),
                ));
                continue;
            }
        }
        let id = ComponentId::new(kind, block.label());
        let name = id.to_string();
        if let Some((_, first)) = by_name.get(&name) {
            diags.push(Diagnostic::error(
                DiagnosticCode::DuplicateLabel,
                block.header_span(),
                format!("component `{name}` is already declared at {first}"),
            ));
            continue;
        }
        by_name.insert(name, (id.clone(), block.header_span()));

        diags.extend(check::check_block(block, &registration.arguments));
        declarations.insert(
            id.clone(),
            Declaration {
                id,
                block: block.clone(),
                registration,
                references: Vec::new(),
                text: block_to_string(block),
            },
        );
    }

    // resolve the references
    let mut dag = Dag::new();
    let lookup = |name: &str| by_name.get(name).map(|(id, _)| id.clone());
    for decl in declarations.values_mut() {
        dag.add_node(decl.id.clone());
        let mut refs = Vec::new();
        visit_body_references(&decl.block.body, &decl.registration.arguments, &mut |path, span, expected| {
            refs.push((path.to_vec(), span, expected.clone()));
        });
        for (path, span, expected) in refs {
            if path.len() < 2 {
                // reported by the checker
                continue;
            }
            let Some(reference) = resolve_path(&path, span, lookup) else {
                diags.push(Diagnostic::error(
                    DiagnosticCode::UnresolvedReference,
                    span,
                    format!(
                        "unresolved reference `{}`: there is no such component",
                        ast::path_to_string(&path)
                    ),
                ));
                continue;
            };
            let exports = exports_of(&reference.target, registry);
            match check_export_type(&reference, &exports, &expected) {
                Ok(()) => {
                    dag.add_edge(reference.target.clone(), decl.id.clone());
                    decl.references.push(reference);
                }
                Err(diag) => diags.push(diag),
            }
        }
    }

    // reject cycles
    for cycle in dag.cycles() {
        let names: Vec<String> = cycle.iter().map(ComponentId::to_string).collect();
        let span = by_name.get(&names[0]).map(|(_, s)| *s).unwrap_or_default();
        let mut path = names.join(" -> ");
        if let Some(first) = names.first() {
            path.push_str(" -> ");
            path.push_str(first);
        }
        diags.push(Diagnostic::error(
            DiagnosticCode::CycleDetected,
            span,
            format!("dependency cycle between components: {path}"),
        ));
    }

    diags.sort();
    if diags.has_errors() {
        return (None, diags);
    }
    let by_name = by_name.into_iter().map(|(name, (id, _))| (name, id)).collect();
    let graph = ComponentGraph {
        declarations,
        dag,
        by_name,
    };
    (Some(graph), diags)
}

fn exports_of(target: &ComponentId, registry: &Registry) -> Arc<Schema> {
    registry
        .lookup(target.kind())
        .map(|r| r.exports.clone())
        .unwrap_or_default()
}

/// Checks that a reference names an existing export, with a type compatible with `expected`.
fn check_export_type(reference: &Reference, exports: &Schema, expected: &ValueType) -> Result<(), Diagnostic> {
    let Some(mut ty) = exports.get(&reference.field).and_then(|f| f.value_type()) else {
        let known: Vec<&str> = exports.fields().map(|f| f.name.as_str()).collect();
        let hint = if known.is_empty() {
            String::from("it has no exports")
        } else {
            format!("its exports are: {}", known.join(", "))
        };
        return Err(Diagnostic::error(
            DiagnosticCode::UnknownExport,
            reference.span,
            format!(
                "component `{}` has no export `{}`, {hint}",
                reference.target, reference.field
            ),
        ));
    };
    for key in &reference.path {
        ty = match ty {
            ValueType::Map(inner) => inner.as_ref(),
            ValueType::Any => &ValueType::Any,
            other => {
                return Err(Diagnostic::error(
                    DiagnosticCode::TypeMismatch,
                    reference.span,
                    format!("cannot look up `{key}` in `{reference}`: the export has type {other}, not a map"),
                ));
            }
        };
    }
    if expected.accepts(ty) {
        Ok(())
    } else {
        Err(Diagnostic::error(
            DiagnosticCode::TypeMismatch,
            reference.span,
            format!("wrong type for reference `{reference}`: expected {expected}, found {ty}"),
        ))
    }
}

/// Calls `f` on every reference of a block body, with the type expected at its position.
fn visit_body_references<'a>(
    body: &'a Body,
    schema: &Schema,
    f: &mut dyn FnMut(&'a [Spanned<String>], Span, &ValueType),
) {
    for stmt in &body.stmts {
        match stmt {
            Stmt::Attribute(attr) => {
                let ty = match schema.get(&attr.name.value).map(|f| &f.kind) {
                    Some(FieldKind::Attribute(ty)) => ty,
                    _ => &ValueType::Any,
                };
                visit_expr_references(&attr.value, ty, f);
            }
            Stmt::Block(block) => match schema.get(&block.name()).map(|f| &f.kind) {
                Some(FieldKind::Block { schema: nested, .. }) => visit_body_references(&block.body, nested, f),
                _ => visit_body_references(&block.body, &Schema::empty(), f),
            },
        }
    }
}

fn visit_expr_references<'a>(
    expr: &'a Expr,
    ty: &ValueType,
    f: &mut dyn FnMut(&'a [Spanned<String>], Span, &ValueType),
) {
    match (&expr.kind, ty) {
        (ExprKind::Reference(path), _) => f(path, expr.span, ty),
        (ExprKind::List(items), ValueType::List(inner)) => {
            for item in items {
                visit_expr_references(item, inner, f);
            }
        }
        (ExprKind::Object(fields), ValueType::Map(inner)) => {
            for field in fields {
                visit_expr_references(&field.value, inner, f);
            }
        }
        _ => expr.visit_references(&mut |path, span| f(path, span, &ValueType::Any)),
    }
}
