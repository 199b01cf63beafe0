//! Configuration language: tokens, syntax tree and diagnostics.
//!
//! A configuration file is a list of blocks and attributes:
//!
//! ```text
//! local.file "api_key" {
//!     filename = "/etc/secrets/key"
//! }
//!
//! debug.log "key_length" {
//!     message = local.file.api_key.content
//! }
//! ```
//!
//! Use [`parse`] to obtain the syntax tree. Parsing never fails: syntax errors are
//! reported as [`Diagnostics`](diag::Diagnostics) alongside the (partial) tree.

use std::fmt;

pub mod ast;
pub mod diag;
mod lexer;
mod parser;
pub mod print;

pub use parser::parse;

/// A position in the source text.
///
/// `line` and `column` start at 1; `column` counts characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Position {
    pub offset: usize,
    pub line: u32,
    pub column: u32,
}

/// A range of source text, from `start` (inclusive) to `end` (exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

/// A value with the span it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub value: T,
    pub span: Span,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Returns the smallest span that covers both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        let start = if other.start.offset < self.start.offset {
            other.start
        } else {
            self.start
        };
        let end = if other.end.offset > self.end.offset {
            other.end
        } else {
            self.end
        };
        Span { start, end }
    }
}

impl<T> Spanned<T> {
    pub fn new(value: T, span: Span) -> Self {
        Self { value, span }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.start, f)
    }
}

/// Converts byte offsets to line/column positions.
pub(crate) struct LineIndex<'src> {
    src: &'src str,
    line_starts: Vec<usize>,
}

impl<'src> LineIndex<'src> {
    pub fn new(src: &'src str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(src.match_indices('\n').map(|(i, _)| i + 1));
        Self { src, line_starts }
    }

    pub fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.src.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(next) => next - 1,
        };
        let line_start = self.line_starts[line];
        let column = self
            .src
            .get(line_start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(offset - line_start);
        Position {
            offset,
            line: line as u32 + 1,
            column: column as u32 + 1,
        }
    }

    pub fn span(&self, range: std::ops::Range<usize>) -> Span {
        Span::new(self.position(range.start), self.position(range.end))
    }
}

#[cfg(test)]
mod tests {
    use super::LineIndex;

    #[test]
    fn positions() {
        let src = "a = 1\nbé = 2\n\nc";
        let index = LineIndex::new(src);
        let p = index.position(0);
        assert_eq!((p.line, p.column), (1, 1));
        let p = index.position(4);
        assert_eq!((p.line, p.column), (1, 5));
        // 'é' is two bytes but one column
        let eq = src[6..].find('=').unwrap() + 6;
        let p = index.position(eq);
        assert_eq!((p.line, p.column), (2, 4));
        let p = index.position(src.len());
        assert_eq!((p.line, p.column), (4, 2));
    }
}
