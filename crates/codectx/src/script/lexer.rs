//! Tokenizer for the namespace script language, built on `logos`.

use crate::error::ScriptError;
use logos::Logos;
use std::ops::Range;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[regex(r"//[^\n]*", logos::skip)]
    Comment,

    #[regex(r"///[^\n]*", |lex| lex.slice().trim_start_matches('/').trim().to_string())]
    Doc(String),

    // Keywords
    #[token("fn")]
    Fn,
    #[token("struct")]
    Struct,
    #[token("abstract")]
    Abstract,
    #[token("extends")]
    Extends,
    #[token("let")]
    Let,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("use")]
    Use,
    #[token("as")]
    As,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("nil")]
    Nil,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token("::")]
    PathSep,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token(".")]
    Dot,
    #[token("->")]
    Arrow,
    #[token("?")]
    Question,

    // Operators
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
}

/// A token together with its byte span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Range<usize>,
}

/// Tokenize `source`, failing on the first unrecognized character.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ScriptError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push(Spanned { token, span }),
            Err(()) => {
                let (line, column) = line_col(source, span.start);
                return Err(ScriptError::Syntax {
                    line,
                    column,
                    message: format!("unexpected input {:?}", lexer.slice()),
                });
            }
        }
    }
    Ok(tokens)
}

/// One-based line and column of a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

fn unescape(literal: &str) -> Option<String> {
    let inner = literal.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("fn format(x)"),
            vec![
                Token::Fn,
                Token::Ident("format".into()),
                Token::LParen,
                Token::Ident("x".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_but_docs_kept() {
        let tokens = kinds("// plain\n/// Adds things.\nfn");
        assert_eq!(tokens, vec![Token::Doc("Adds things.".into()), Token::Fn]);
    }

    #[test]
    fn numbers_and_strings() {
        assert_eq!(
            kinds(r#"42 1.5 "a\"b\n""#),
            vec![Token::Int(42), Token::Float(1.5), Token::Str("a\"b\n".into())]
        );
    }

    #[test]
    fn path_separator_beats_colon() {
        assert_eq!(
            kinds("a::b: c"),
            vec![
                Token::Ident("a".into()),
                Token::PathSep,
                Token::Ident("b".into()),
                Token::Colon,
                Token::Ident("c".into()),
            ]
        );
    }

    #[test]
    fn unknown_character_reports_position() {
        let err = tokenize("let x = 1;\nlet y = @;").unwrap_err();
        match err {
            ScriptError::Syntax { line, column, .. } => {
                assert_eq!(line, 2);
                assert_eq!(column, 9);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
