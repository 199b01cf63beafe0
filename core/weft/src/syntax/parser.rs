//! Hand-written recursive descent parser.

use super::ast::{Attribute, Block, Body, Expr, ExprKind, Literal, ObjectField, Stmt};
use super::diag::{Diagnostic, DiagnosticCode, Diagnostics};
use super::lexer::{self, Token};
use super::{LineIndex, Span, Spanned};

/// Parses a configuration file.
///
/// Parsing never fails: malformed text is reported as `Syntax` diagnostics, and the parser
/// skips to the next statement to report as many errors as possible in one pass.
/// The returned body contains every statement that could be parsed.
pub fn parse(src: &str) -> (Body, Diagnostics) {
    let lines = LineIndex::new(src);
    let lexer::Tokens { tokens, invalid } = lexer::tokenize(src);

    let mut diags = Diagnostics::new();
    for range in invalid {
        let text = &src[range.clone()];
        diags.push(Diagnostic::error(
            DiagnosticCode::Syntax,
            lines.span(range),
            format!("invalid character(s) `{text}`"),
        ));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        lines,
        src_len: src.len(),
        depth: 0,
        diags,
    };
    let body = parser.parse_body(false);
    let mut diags = parser.diags;
    diags.sort();
    (body, diags)
}

type PResult<T> = Result<T, Diagnostic>;

/// Maximum number of nested blocks, lists and objects.
const MAX_NESTING: usize = 128;

struct Parser<'src> {
    tokens: Vec<(Token, std::ops::Range<usize>)>,
    pos: usize,
    lines: LineIndex<'src>,
    src_len: usize,
    /// Current number of nested blocks, lists and objects.
    depth: usize,
    diags: Diagnostics,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<(Token, Span)> {
        let (tok, range) = self.tokens.get(self.pos)?.clone();
        self.pos += 1;
        Some((tok, self.lines.span(range)))
    }

    /// Span of the current token, or an empty span at the end of the input.
    fn current_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, range)) => self.lines.span(range.clone()),
            None => self.lines.span(self.src_len..self.src_len),
        }
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        let found = match self.peek() {
            Some(tok) => tok.describe(),
            None => String::from("end of input"),
        };
        Diagnostic::error(
            DiagnosticCode::Syntax,
            self.current_span(),
            format!("expected {expected}, found {found}"),
        )
    }

    fn expect(&mut self, expected: Token) -> PResult<Span> {
        if self.peek() == Some(&expected) {
            let (_, span) = self.advance().expect("peeked token exists");
            Ok(span)
        } else {
            Err(self.unexpected(&expected.describe()))
        }
    }

    fn expect_ident(&mut self) -> PResult<Spanned<String>> {
        match self.peek() {
            Some(Token::Ident(_)) => match self.advance() {
                Some((Token::Ident(name), span)) => Ok(Spanned::new(name, span)),
                _ => unreachable!("peeked an identifier"),
            },
            _ => Err(self.unexpected("an identifier")),
        }
    }

    /// Runs `f` one nesting level deeper, or fails if the input is nested too deeply.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(Diagnostic::error(
                DiagnosticCode::Syntax,
                self.current_span(),
                format!("nesting too deep (the limit is {MAX_NESTING} levels)"),
            ));
        }
        self.depth += 1;
        let res = f(self);
        self.depth -= 1;
        res
    }

    /// Parses statements until the end of input or, if `nested`, until a closing `}`
    /// (which is not consumed).
    fn parse_body(&mut self, nested: bool) -> Body {
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                None => break,
                Some(Token::RBrace) if nested => break,
                Some(Token::RBrace) => {
                    let span = self.current_span();
                    self.diags.push(Diagnostic::error(
                        DiagnosticCode::Syntax,
                        span,
                        "unexpected `}` without a matching `{`",
                    ));
                    self.advance();
                }
                Some(Token::Ident(_)) => match self.parse_stmt() {
                    Ok(stmt) => stmts.push(stmt),
                    Err(diag) => {
                        self.diags.push(diag);
                        self.recover();
                    }
                },
                Some(_) => {
                    let diag = self.unexpected("an attribute or a block");
                    self.diags.push(diag);
                    self.recover();
                }
            }
        }
        Body { stmts }
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        let first = self.expect_ident()?;
        if self.peek() == Some(&Token::Assign) {
            self.advance();
            let value = self.parse_expr()?;
            let span = first.span.to(value.span);
            return Ok(Stmt::Attribute(Attribute {
                name: first,
                value,
                span,
            }));
        }

        // block: name segments, optional label, body
        let mut name = vec![first];
        while self.peek() == Some(&Token::Dot) {
            self.advance();
            name.push(self.expect_ident()?);
        }
        let label = match self.peek() {
            Some(Token::String(_)) => {
                let (tok, span) = self.advance().expect("peeked token exists");
                let Token::String(raw) = tok else { unreachable!() };
                Some(Spanned::new(self.unescape(&raw, span)?, span))
            }
            Some(Token::UnterminatedString) => return Err(self.unterminated_string()),
            _ => None,
        };
        if self.peek() != Some(&Token::LBrace) {
            return Err(self.unexpected("`=` or `{`"));
        }
        let (body, close) = self.nested(|p| {
            let open = p.expect(Token::LBrace)?;
            let body = p.parse_body(true);
            match p.peek() {
                Some(Token::RBrace) => Ok((body, p.expect(Token::RBrace)?)),
                _ => Err(Diagnostic::error(
                    DiagnosticCode::Syntax,
                    open,
                    format!("block opened at {} is never closed", open.start),
                )),
            }
        })?;
        let span = name[0].span.to(close);
        Ok(Stmt::Block(Block { name, label, body, span }))
    }

    fn parse_expr(&mut self) -> PResult<Expr> {
        let Some(tok) = self.peek() else {
            return Err(self.unexpected("an expression"));
        };
        match tok {
            Token::String(_) => {
                let (tok, span) = self.advance().expect("peeked token exists");
                let Token::String(raw) = tok else { unreachable!() };
                let s = self.unescape(&raw, span)?;
                Ok(Expr {
                    kind: ExprKind::Literal(Literal::String(s)),
                    span,
                })
            }
            Token::UnterminatedString => Err(self.unterminated_string()),
            Token::Number(_) => {
                let (tok, span) = self.advance().expect("peeked token exists");
                let Token::Number(raw) = tok else { unreachable!() };
                let lit = parse_number(&raw).ok_or_else(|| {
                    Diagnostic::error(
                        DiagnosticCode::Syntax,
                        span,
                        format!("number `{raw}` is out of range"),
                    )
                })?;
                Ok(Expr {
                    kind: ExprKind::Literal(lit),
                    span,
                })
            }
            Token::True | Token::False | Token::Null => {
                let (tok, span) = self.advance().expect("peeked token exists");
                let lit = match tok {
                    Token::True => Literal::Bool(true),
                    Token::False => Literal::Bool(false),
                    _ => Literal::Null,
                };
                Ok(Expr {
                    kind: ExprKind::Literal(lit),
                    span,
                })
            }
            Token::LBracket => self.nested(Self::parse_list),
            Token::LBrace => self.nested(Self::parse_object),
            Token::Ident(_) => {
                let first = self.expect_ident()?;
                let mut span = first.span;
                let mut path = vec![first];
                while self.peek() == Some(&Token::Dot) {
                    self.advance();
                    let segment = self.expect_ident()?;
                    span = span.to(segment.span);
                    path.push(segment);
                }
                Ok(Expr {
                    kind: ExprKind::Reference(path),
                    span,
                })
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn parse_list(&mut self) -> PResult<Expr> {
        let open = self.expect(Token::LBracket)?;
        let mut items = Vec::new();
        loop {
            if self.peek() == Some(&Token::RBracket) {
                break;
            }
            items.push(self.parse_expr()?);
            match self.peek() {
                Some(Token::Comma) => {
                    self.advance();
                }
                Some(Token::RBracket) => break,
                _ => return Err(self.unexpected("`,` or `]`")),
            }
        }
        let close = self.expect(Token::RBracket)?;
        Ok(Expr {
            kind: ExprKind::List(items),
            span: open.to(close),
        })
    }

    fn parse_object(&mut self) -> PResult<Expr> {
        let open = self.expect(Token::LBrace)?;
        let mut fields: Vec<ObjectField> = Vec::new();
        loop {
            let key = match self.peek() {
                Some(Token::RBrace) => break,
                Some(Token::Ident(_)) => self.expect_ident()?,
                Some(Token::String(_)) => {
                    let (tok, span) = self.advance().expect("peeked token exists");
                    let Token::String(raw) = tok else { unreachable!() };
                    Spanned::new(self.unescape(&raw, span)?, span)
                }
                _ => return Err(self.unexpected("an object key or `}`")),
            };
            if fields.iter().any(|f| f.key.value == key.value) {
                return Err(Diagnostic::error(
                    DiagnosticCode::Syntax,
                    key.span,
                    format!("duplicate key `{}` in object", key.value),
                ));
            }
            self.expect(Token::Assign)?;
            let value = self.parse_expr()?;
            fields.push(ObjectField { key, value });
            if self.peek() == Some(&Token::Comma) {
                self.advance();
            }
        }
        let close = self.expect(Token::RBrace)?;
        Ok(Expr {
            kind: ExprKind::Object(fields),
            span: open.to(close),
        })
    }

    fn unterminated_string(&mut self) -> Diagnostic {
        let span = self.current_span();
        self.advance();
        Diagnostic::error(DiagnosticCode::Syntax, span, "unterminated string")
    }

    /// Removes the quotes of a string token and processes its escape sequences.
    fn unescape(&self, raw: &str, span: Span) -> PResult<String> {
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    return Err(Diagnostic::error(
                        DiagnosticCode::Syntax,
                        span,
                        format!("unknown escape sequence `\\{other}`"),
                    ));
                }
                None => {
                    return Err(Diagnostic::error(DiagnosticCode::Syntax, span, "unterminated escape sequence"));
                }
            }
        }
        Ok(out)
    }

    /// Returns `true` if the current token starts a statement (`ident =` or a block header).
    fn at_statement_start(&self) -> bool {
        if !matches!(self.peek(), Some(Token::Ident(_))) {
            return false;
        }
        let mut n = 1;
        loop {
            match self.peek_nth(n) {
                Some(Token::Assign) if n == 1 => return true,
                Some(Token::Dot) => match self.peek_nth(n + 1) {
                    Some(Token::Ident(_)) => n += 2,
                    _ => return false,
                },
                Some(Token::String(_)) => return self.peek_nth(n + 1) == Some(&Token::LBrace),
                Some(Token::LBrace) => return true,
                _ => return false,
            }
        }
    }

    /// Skips tokens until the beginning of the next statement, or until the `}`
    /// that closes the current block.
    fn recover(&mut self) {
        let mut depth = 0usize;
        let mut first = true;
        while let Some(tok) = self.peek() {
            if !first && depth == 0 && self.at_statement_start() {
                return;
            }
            first = false;
            match tok {
                Token::LBrace => depth += 1,
                Token::RBrace => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                _ => (),
            }
            self.advance();
        }
    }
}

fn parse_number(raw: &str) -> Option<Literal> {
    if raw.contains(['.', 'e', 'E']) {
        raw.parse::<f64>().ok().filter(|f| f.is_finite()).map(Literal::Float)
    } else {
        raw.parse::<i64>().ok().map(Literal::Int)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::parse;
    use crate::syntax::ast::{ExprKind, Literal, Stmt};
    use crate::syntax::diag::DiagnosticCode;

    #[test]
    fn blocks_and_attributes() {
        let src = indoc! {r#"
            local.file "logs" {
                filename = "/var/log/syslog"
                poll_frequency = "10s"
            }

            debug.log {
                values = [1, 2.5, true, null, { a = "x", "b c" = local.file.logs.content }]
            }
        "#};
        let (body, diags) = parse(src);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags}");
        assert_eq!(body.stmts.len(), 2);

        let blocks: Vec<_> = body.blocks().collect();
        assert_eq!(blocks[0].name(), "local.file");
        assert_eq!(blocks[0].label(), Some("logs"));
        assert_eq!(blocks[0].body.attributes().count(), 2);
        assert_eq!(blocks[1].name(), "debug.log");
        assert_eq!(blocks[1].label(), None);

        let attr = blocks[1].body.attributes().next().unwrap();
        let ExprKind::List(items) = &attr.value.kind else {
            panic!("expected a list, got {:?}", attr.value.kind)
        };
        assert_eq!(items[0].kind, ExprKind::Literal(Literal::Int(1)));
        assert_eq!(items[1].kind, ExprKind::Literal(Literal::Float(2.5)));
        assert_eq!(items[2].kind, ExprKind::Literal(Literal::Bool(true)));
        assert_eq!(items[3].kind, ExprKind::Literal(Literal::Null));
        let ExprKind::Object(fields) = &items[4].kind else {
            panic!("expected an object")
        };
        assert_eq!(fields[1].key.value, "b c");
        let ExprKind::Reference(path) = &fields[1].value.kind else {
            panic!("expected a reference")
        };
        let path: Vec<_> = path.iter().map(|s| s.value.as_str()).collect();
        assert_eq!(path, vec!["local", "file", "logs", "content"]);
    }

    #[test]
    fn nested_blocks_and_positions() {
        let src = "outer {\n  inner \"a\" {\n    x = 1\n  }\n}\n";
        let (body, diags) = parse(src);
        assert!(diags.is_empty());
        let outer = body.blocks().next().unwrap();
        let inner = outer.body.blocks().next().unwrap();
        assert_eq!(inner.label(), Some("a"));
        assert_eq!(inner.span.start.line, 2);
        assert_eq!(inner.span.start.column, 3);
        let x = inner.body.attributes().next().unwrap();
        assert_eq!((x.span.start.line, x.span.start.column), (3, 5));
    }

    #[test]
    fn escapes() {
        let (body, diags) = parse(r#"a = "tab\there \"q\" \\ nl\n""#);
        assert!(diags.is_empty());
        let Stmt::Attribute(attr) = &body.stmts[0] else { panic!() };
        assert_eq!(
            attr.value.kind,
            ExprKind::Literal(Literal::String(String::from("tab\there \"q\" \\ nl\n")))
        );

        let (_, diags) = parse(r#"a = "bad \q escape""#);
        assert_eq!(diags.len(), 1);
        assert!(diags.iter().next().unwrap().message.contains("\\q"));
    }

    #[test]
    fn recovers_and_reports_every_error() {
        let src = indoc! {r#"
            a = = 1
            b = 2
            c {
                d = [1 2]
                e = 3
            }
            f = @ 1
            g = "ok"
        "#};
        let (body, diags) = parse(src);
        let lines: Vec<u32> = diags.iter().map(|d| d.span.start.line).collect();
        assert_eq!(lines, vec![1, 4, 7]);
        assert!(diags.iter().all(|d| d.code == DiagnosticCode::Syntax));

        // statements after each error are still parsed
        let names: Vec<String> = body
            .stmts
            .iter()
            .map(|s| match s {
                Stmt::Attribute(a) => a.name.value.clone(),
                Stmt::Block(b) => b.name(),
            })
            .collect();
        assert_eq!(names, vec!["b", "c", "f", "g"]);
        let c = body.blocks().next().unwrap();
        let inner: Vec<_> = c.body.attributes().map(|a| a.name.value.as_str()).collect();
        assert_eq!(inner, vec!["e"]);
    }

    #[test]
    fn unclosed_block() {
        let (_, diags) = parse("a {\n b = 1\n");
        assert_eq!(diags.len(), 1);
        assert!(diags.iter().next().unwrap().message.contains("never closed"));
    }

    #[test]
    fn stray_closing_brace() {
        let (body, diags) = parse("}\na = 1");
        assert_eq!(diags.len(), 1);
        assert_eq!(body.stmts.len(), 1);
    }

    #[test]
    fn integer_overflow() {
        let (_, diags) = parse("a = 99999999999999999999");
        assert_eq!(diags.len(), 1);
        assert!(diags.iter().next().unwrap().message.contains("out of range"));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let depth = 200_000;
        let src = format!("a = {}{}\nb = 1\n", "[".repeat(depth), "]".repeat(depth));
        let (body, diags) = parse(&src);
        assert_eq!(diags.len(), 1);
        let diag = diags.iter().next().unwrap();
        assert_eq!(diag.code, DiagnosticCode::Syntax);
        assert!(diag.message.contains("nesting too deep"), "unexpected message: {}", diag.message);
        // the parser recovers after the deep attribute
        assert_eq!(body.stmts.len(), 1);
        let Stmt::Attribute(b) = &body.stmts[0] else { panic!() };
        assert_eq!(b.name.value, "b");

        let src = format!("x = {}{}", "{ k = ".repeat(depth), "}".repeat(depth));
        let (_, diags) = parse(&src);
        assert!(diags.iter().any(|d| d.message.contains("nesting too deep")));

        let src = format!("{}{}\nc = 2", "a {\n".repeat(1000), "}\n".repeat(1000));
        let (body, diags) = parse(&src);
        assert_eq!(diags.len(), 1);
        assert!(diags.iter().next().unwrap().message.contains("nesting too deep"));
        assert_eq!(body.stmts.len(), 2);

        // nesting below the limit is fine
        let src = format!("a = {}{}", "[".repeat(100), "]".repeat(100));
        let (_, diags) = parse(&src);
        assert!(diags.is_empty());
    }

    #[test]
    fn empty_input() {
        let (body, diags) = parse("  // nothing here\n");
        assert!(body.is_empty());
        assert!(diags.is_empty());
    }
}
