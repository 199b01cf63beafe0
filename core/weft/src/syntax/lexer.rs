use std::ops::Range;

use logos::Logos;

/// Token of the configuration language.
///
/// Literals keep their raw source text; the parser is responsible for
/// unescaping strings and converting numbers, so that it can report
/// precise diagnostics.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
pub(crate) enum Token {
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("=")]
    Assign,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_owned())]
    Ident(String),
    #[regex(r"-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().to_owned())]
    Number(String),
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| lex.slice().to_owned())]
    String(String),
    /// A string that reaches the end of the line without a closing quote.
    #[regex(r#""([^"\\\n]|\\.)*"#)]
    UnterminatedString,
}

impl Token {
    /// Human-readable description, used in diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Token::LBrace => String::from("`{`"),
            Token::RBrace => String::from("`}`"),
            Token::LBracket => String::from("`[`"),
            Token::RBracket => String::from("`]`"),
            Token::Assign => String::from("`=`"),
            Token::Dot => String::from("`.`"),
            Token::Comma => String::from("`,`"),
            Token::True => String::from("`true`"),
            Token::False => String::from("`false`"),
            Token::Null => String::from("`null`"),
            Token::Ident(name) => format!("identifier `{name}`"),
            Token::Number(n) => format!("number `{n}`"),
            Token::String(s) => format!("string {s}"),
            Token::UnterminatedString => String::from("unterminated string"),
        }
    }
}

/// Result of [`tokenize`]: the valid tokens and the byte ranges that could not be lexed.
pub(crate) struct Tokens {
    pub tokens: Vec<(Token, Range<usize>)>,
    pub invalid: Vec<Range<usize>>,
}

pub(crate) fn tokenize(src: &str) -> Tokens {
    let mut tokens = Vec::new();
    let mut invalid: Vec<Range<usize>> = Vec::new();
    for (res, range) in Token::lexer(src).spanned() {
        match res {
            Ok(tok) => tokens.push((tok, range)),
            Err(()) => match invalid.last_mut() {
                // merge consecutive invalid characters into one error
                Some(last) if last.end == range.start => last.end = range.end,
                _ => invalid.push(range),
            },
        }
    }
    Tokens { tokens, invalid }
}
