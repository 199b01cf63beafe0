//! Syntax tree of the configuration language.
//!
//! The tree is immutable once parsed. On reload, a new tree is parsed and
//! compared with the previous one (see [`print`](super::print) for the canonical form
//! that is used to detect changes).

use super::{Span, Spanned};

/// A list of statements: the content of a file or of a block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Attribute(Attribute),
    Block(Block),
}

/// `name = value`
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: Spanned<String>,
    pub value: Expr,
    pub span: Span,
}

/// `dotted.name "label" { body }`
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Segments of the block name, for instance `["local", "file"]`.
    pub name: Vec<Spanned<String>>,
    pub label: Option<Spanned<String>>,
    pub body: Body,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    List(Vec<Expr>),
    Object(Vec<ObjectField>),
    /// A dotted path pointing at the export of another component.
    Reference(Vec<Spanned<String>>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// `key = value` inside an object literal.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectField {
    pub key: Spanned<String>,
    pub value: Expr,
}

impl Body {
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.stmts.iter().filter_map(|s| match s {
            Stmt::Attribute(a) => Some(a),
            Stmt::Block(_) => None,
        })
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.stmts.iter().filter_map(|s| match s {
            Stmt::Block(b) => Some(b),
            Stmt::Attribute(_) => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Attribute(a) => a.span,
            Stmt::Block(b) => b.span,
        }
    }
}

impl Block {
    /// Returns the full dotted name of the block, for instance `local.file`.
    pub fn name(&self) -> String {
        self.name
            .iter()
            .map(|s| s.value.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Returns the span of the block name (without the label).
    pub fn name_span(&self) -> Span {
        match (self.name.first(), self.name.last()) {
            (Some(first), Some(last)) => first.span.to(last.span),
            _ => self.span,
        }
    }

    /// Returns the span of the header: the name and, if any, the label.
    pub fn header_span(&self) -> Span {
        match &self.label {
            Some(label) => self.name_span().to(label.span),
            None => self.name_span(),
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_ref().map(|l| l.value.as_str())
    }
}

impl Expr {
    /// Calls `f` on every reference contained in this expression, in source order.
    pub fn visit_references<'a>(&'a self, f: &mut dyn FnMut(&'a [Spanned<String>], Span)) {
        match &self.kind {
            ExprKind::Literal(_) => (),
            ExprKind::Reference(path) => f(path, self.span),
            ExprKind::List(items) => {
                for item in items {
                    item.visit_references(f);
                }
            }
            ExprKind::Object(fields) => {
                for field in fields {
                    field.value.visit_references(f);
                }
            }
        }
    }
}

/// Formats a reference path as it appears in the source.
pub fn path_to_string(path: &[Spanned<String>]) -> String {
    path.iter().map(|s| s.value.as_str()).collect::<Vec<_>>().join(".")
}
