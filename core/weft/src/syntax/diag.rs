//! Structured validation findings.
//!
//! Diagnostics are never thrown: every stage (parser, checker, graph builder) collects
//! them and returns them as a batch, so that all the problems of a configuration are
//! reported together.

use std::fmt;

use super::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// What went wrong, independently of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    /// Malformed text.
    Syntax,
    UnknownKind,
    UnknownField,
    /// A reference points at a field that is not an export of the target component.
    UnknownExport,
    MissingRequired,
    TypeMismatch,
    DuplicateLabel,
    DuplicateBlock,
    DuplicateAttribute,
    MissingLabel,
    UnexpectedLabel,
    InvalidLabel,
    MalformedReference,
    /// An attribute where only component blocks are allowed.
    UnexpectedAttribute,
    UnresolvedReference,
    CycleDetected,
    /// The component rejected its initial arguments.
    InitializationError,
    /// The component rejected an update of its arguments.
    UpdateRejected,
    /// The run task of the component returned an error, or returned before being stopped.
    ComponentExited,
}

/// Families of diagnostics, which determine how far an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Never reaches the graph.
    Syntax,
    /// Blocks the activation of the block.
    Schema,
    /// Blocks the whole (re)load.
    Graph,
    /// Localized to one node.
    Runtime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
    pub span: Span,
}

/// An ordered list of diagnostics.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Diagnostics(Vec<Diagnostic>);

impl DiagnosticCode {
    pub fn category(self) -> ErrorCategory {
        match self {
            DiagnosticCode::Syntax => ErrorCategory::Syntax,
            DiagnosticCode::UnknownKind
            | DiagnosticCode::UnknownField
            | DiagnosticCode::UnknownExport
            | DiagnosticCode::MissingRequired
            | DiagnosticCode::TypeMismatch
            | DiagnosticCode::DuplicateLabel
            | DiagnosticCode::DuplicateBlock
            | DiagnosticCode::DuplicateAttribute
            | DiagnosticCode::MissingLabel
            | DiagnosticCode::UnexpectedLabel
            | DiagnosticCode::InvalidLabel
            | DiagnosticCode::MalformedReference
            | DiagnosticCode::UnexpectedAttribute => ErrorCategory::Schema,
            DiagnosticCode::UnresolvedReference | DiagnosticCode::CycleDetected => ErrorCategory::Graph,
            DiagnosticCode::InitializationError
            | DiagnosticCode::UpdateRejected
            | DiagnosticCode::ComponentExited => ErrorCategory::Runtime,
        }
    }
}

impl Diagnostic {
    pub fn error(code: DiagnosticCode, span: Span, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            span,
        }
    }

    pub fn warning(code: DiagnosticCode, span: Span, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
            span,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    /// Returns `true` if at least one diagnostic has the `Error` severity.
    ///
    /// A pass without errors may proceed to the next stage.
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if one of the diagnostics has the given code.
    pub fn contains(&self, code: DiagnosticCode) -> bool {
        self.0.iter().any(|d| d.code == code)
    }

    /// Sorts the diagnostics by source position. The sort is stable.
    pub fn sort(&mut self) {
        self.0.sort_by_key(|d| d.span.start.offset);
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.0
    }

    /// Formats the diagnostics with an excerpt of the source line they point at.
    pub fn render(&self, source: &str) -> String {
        let lines: Vec<&str> = source.lines().collect();
        let mut out = String::new();
        for d in &self.0 {
            out.push_str(&d.to_string());
            out.push('\n');
            let line_no = d.span.start.line as usize;
            if let Some(line) = line_no.checked_sub(1).and_then(|i| lines.get(i)) {
                let gutter = line_no.to_string();
                out.push_str(&format!("{gutter} | {line}\n"));
                let pad = " ".repeat(gutter.len() + 3 + (d.span.start.column as usize).saturating_sub(1));
                let width = if d.span.end.line == d.span.start.line {
                    (d.span.end.column.saturating_sub(d.span.start.column) as usize).max(1)
                } else {
                    1
                };
                out.push_str(&format!("{pad}{}\n", "^".repeat(width)));
            }
        }
        out
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.span.start, self.severity, self.message)
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for d in &self.0 {
            if !first {
                f.write_str("\n")?;
            }
            first = false;
            fmt::Display::fmt(d, f)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(value: Vec<Diagnostic>) -> Self {
        Self(value)
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use crate::syntax::{Position, Span};

    use super::{Diagnostic, DiagnosticCode, Diagnostics, ErrorCategory};

    fn span(line: u32, column: u32, len: u32, offset: usize) -> Span {
        Span::new(
            Position { offset, line, column },
            Position {
                offset: offset + len as usize,
                line,
                column: column + len,
            },
        )
    }

    #[test]
    fn severity_and_sorting() {
        let mut diags = Diagnostics::new();
        assert!(!diags.has_errors());
        diags.push(Diagnostic::warning(DiagnosticCode::Syntax, span(2, 1, 1, 10), "later"));
        assert!(!diags.has_errors());
        diags.push(Diagnostic::error(DiagnosticCode::UnknownField, span(1, 3, 2, 2), "first"));
        assert!(diags.has_errors());
        diags.sort();
        let messages: Vec<_> = diags.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "later"]);
    }

    #[test]
    fn categories() {
        assert_eq!(DiagnosticCode::Syntax.category(), ErrorCategory::Syntax);
        assert_eq!(DiagnosticCode::MissingRequired.category(), ErrorCategory::Schema);
        assert_eq!(DiagnosticCode::CycleDetected.category(), ErrorCategory::Graph);
        assert_eq!(DiagnosticCode::InitializationError.category(), ErrorCategory::Runtime);
    }

    #[test]
    fn render_points_at_the_span() {
        let src = "a = 1\nbad = ?\n";
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::error(DiagnosticCode::Syntax, span(2, 7, 1, 12), "unexpected `?`"));
        let rendered = diags.render(src);
        assert_eq!(rendered, "2:7: error: unexpected `?`\n2 | bad = ?\n          ^\n");
    }
}
