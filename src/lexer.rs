// Query tokenizer: UTF-8 query text → flat token sequence.
// Identifiers are resolved against the binop and function registries here,
// so the parser only ever sees reference tokens.

use std::fmt;
use std::rc::Rc;

use regex::Regex;
use thiserror::Error;

use crate::binop::{self, Binop};
use crate::functions::{self, ArgFunction};
use crate::value::JNode;

/// Lexer errors, each carrying the source offset it was raised at.
#[derive(Error, Debug)]
pub enum LexError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated backtick string starting at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("invalid number \"{text}\" at offset {offset}")]
    BadNumber { text: String, offset: usize },

    #[error("invalid regex literal at offset {offset}: {source}")]
    BadRegex {
        offset: usize,
        source: regex::Error,
    },

    #[error("invalid JSON literal at offset {offset}: {source}")]
    BadJsonLiteral {
        offset: usize,
        source: serde_json::Error,
    },
}

/// One token of a query.
#[derive(Clone, Debug)]
pub enum Token {
    /// A JSON constant: number, backtick string, bool, null, `g`-regex,
    /// or `j`-embedded JSON.
    Json(JNode),
    /// An unquoted name (a key after `.`, mostly).
    Ident(Rc<str>),
    /// A binop reference resolved against the registry.
    Binop(&'static Binop),
    /// A function reference resolved against the registry.
    Func(&'static ArgFunction),
    /// `@`, the current input.
    At,
    Dot,
    DotDot,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
    Colon,
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Token::Json(a), Token::Json(b)) => a == b,
            (Token::Ident(a), Token::Ident(b)) => a == b,
            (Token::Binop(a), Token::Binop(b)) => a.sym == b.sym,
            (Token::Func(a), Token::Func(b)) => a.name == b.name,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Json(v) => write!(f, "{}", v),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Binop(b) => write!(f, "binop '{}'", b.sym),
            Token::Func(func) => write!(f, "function '{}'", func.name),
            Token::At => write!(f, "@"),
            Token::Dot => write!(f, "."),
            Token::DotDot => write!(f, ".."),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
        }
    }
}

/// Tokenize a whole query.
pub fn lex(query: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(query);
    let mut toks = Vec::new();
    while let Some(tok) = lexer.next_token()? {
        toks.push(tok);
    }
    Ok(toks)
}

struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        if self.position < self.input.len() {
            self.position += 1;
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn binop_token(sym: &str) -> Token {
        Token::Binop(binop::lookup(sym).expect("symbolic operators are registered"))
    }

    fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        self.skip_whitespace();
        let offset = self.position;
        let Some(ch) = self.current() else {
            return Ok(None);
        };

        let tok = match ch {
            '@' => {
                self.advance();
                Token::At
            }
            '(' => {
                self.advance();
                Token::LParen
            }
            ')' => {
                self.advance();
                Token::RParen
            }
            '[' => {
                self.advance();
                Token::LBracket
            }
            ']' => {
                self.advance();
                Token::RBracket
            }
            '{' => {
                self.advance();
                Token::LBrace
            }
            '}' => {
                self.advance();
                Token::RBrace
            }
            ',' => {
                self.advance();
                Token::Comma
            }
            ':' => {
                self.advance();
                Token::Colon
            }
            '.' => {
                self.advance();
                if self.current() == Some('.') {
                    self.advance();
                    Token::DotDot
                } else {
                    Token::Dot
                }
            }
            '`' => {
                self.advance();
                Token::Json(JNode::string(self.read_raw_string(offset)?))
            }
            '0'..='9' => self.read_number(offset)?,

            // two-character operators
            '*' if self.peek(1) == Some('*') => {
                self.advance();
                self.advance();
                Self::binop_token("**")
            }
            '/' if self.peek(1) == Some('/') => {
                self.advance();
                self.advance();
                Self::binop_token("//")
            }
            '=' if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Self::binop_token("==")
            }
            '=' if self.peek(1) == Some('~') => {
                self.advance();
                self.advance();
                Self::binop_token("=~")
            }
            '!' if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Self::binop_token("!=")
            }
            '<' if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Self::binop_token("<=")
            }
            '>' if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Self::binop_token(">=")
            }

            // single-character operators
            '+' | '-' | '*' | '/' | '%' | '<' | '>' | '&' | '|' | '^' => {
                self.advance();
                let mut buf = [0u8; 4];
                Self::binop_token(ch.encode_utf8(&mut buf))
            }

            // regex and JSON literals, identifiers, keywords
            c if c.is_alphabetic() || c == '_' => {
                if (c == 'g' || c == 'j') && self.peek(1) == Some('`') {
                    self.advance(); // the g/j prefix
                    self.advance(); // the opening backtick
                    let text = self.read_raw_string(offset)?;
                    if c == 'g' {
                        let re = Regex::new(&text)
                            .map_err(|source| LexError::BadRegex { offset, source })?;
                        Token::Json(JNode::regex(re))
                    } else {
                        // the lexer defers to the JSON parser over the
                        // enclosed text
                        let v = JNode::from_json_str(&text)
                            .map_err(|source| LexError::BadJsonLiteral { offset, source })?;
                        Token::Json(v)
                    }
                } else {
                    self.read_word()
                }
            }

            ch => return Err(LexError::UnexpectedChar { ch, offset }),
        };
        Ok(Some(tok))
    }

    /// Backtick-delimited raw string; only `` \` `` is an escape.
    fn read_raw_string(&mut self, start_offset: usize) -> Result<String, LexError> {
        let mut out = String::new();
        loop {
            match self.current() {
                None => {
                    return Err(LexError::UnterminatedString {
                        offset: start_offset,
                    })
                }
                Some('\\') if self.peek(1) == Some('`') => {
                    out.push('`');
                    self.advance();
                    self.advance();
                }
                Some('`') => {
                    self.advance();
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.advance();
                }
            }
        }
    }

    fn read_number(&mut self, offset: usize) -> Result<Token, LexError> {
        let start = self.position;
        let mut is_float = false;

        while self.current().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.current() == Some('.') && self.peek(1).map_or(false, |c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while self.current().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.current(), Some('e') | Some('E')) {
            is_float = true;
            self.advance();
            if matches!(self.current(), Some('+') | Some('-')) {
                self.advance();
            }
            if !self.current().map_or(false, |c| c.is_ascii_digit()) {
                let text: String = self.input[start..self.position].iter().collect();
                return Err(LexError::BadNumber { text, offset });
            }
            while self.current().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let text: String = self.input[start..self.position].iter().collect();
        if !is_float {
            if let Ok(n) = text.parse::<i64>() {
                return Ok(Token::Json(JNode::Int(n)));
            }
            // out of i64 range: fall through to float
        }
        text.parse::<f64>()
            .map(|f| Token::Json(JNode::Float(f)))
            .map_err(|_| LexError::BadNumber { text, offset })
    }

    /// An unquoted word: keyword constant, binop spelling, function name,
    /// or plain identifier, in that lookup order.
    fn read_word(&mut self) -> Token {
        let start = self.position;
        while let Some(c) = self.current() {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        let word: String = self.input[start..self.position].iter().collect();
        match word.as_str() {
            "true" => Token::Json(JNode::Bool(true)),
            "false" => Token::Json(JNode::Bool(false)),
            "null" => Token::Json(JNode::Null),
            "NaN" => Token::Json(JNode::Float(f64::NAN)),
            "Infinity" => Token::Json(JNode::Float(f64::INFINITY)),
            // only the keyword spellings (and/or/xor) resolve as binops here;
            // symbols never lex as words
            w => {
                if let Some(b) = binop::lookup(w) {
                    Token::Binop(b)
                } else if let Some(f) = functions::lookup(w) {
                    Token::Func(f)
                } else {
                    Token::Ident(Rc::from(word.as_str()))
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jnode;

    fn syms(query: &str) -> Vec<Token> {
        lex(query).unwrap()
    }

    #[test]
    fn test_lex_numbers() {
        assert_eq!(
            syms("42 3.14 2.5e10 1E-5"),
            vec![
                Token::Json(jnode!(42)),
                Token::Json(jnode!(3.14)),
                Token::Json(jnode!(2.5e10)),
                Token::Json(jnode!(1e-5)),
            ]
        );
        // ints stay ints, floats stay floats
        assert!(matches!(&syms("7")[0], Token::Json(JNode::Int(7))));
        assert!(matches!(&syms("7.0")[0], Token::Json(JNode::Float(_))));
    }

    #[test]
    fn test_lex_backtick_strings() {
        assert_eq!(syms("`hello`"), vec![Token::Json(jnode!("hello"))]);
        // \` is the only escape; everything else is raw
        assert_eq!(syms(r"`a\`g`"), vec![Token::Json(jnode!("a`g"))]);
        assert_eq!(syms(r"`a\nb`"), vec![Token::Json(jnode!("a\\nb"))]);
        assert!(matches!(
            lex("`oops").unwrap_err(),
            LexError::UnterminatedString { offset: 0 }
        ));
    }

    #[test]
    fn test_lex_regex_literal() {
        let toks = syms(r"g`\d+`");
        match &toks[0] {
            Token::Json(JNode::Regex(re)) => assert!(re.is_match("a12")),
            other => panic!("expected regex token, got {:?}", other),
        }
        assert!(matches!(
            lex("g`[`").unwrap_err(),
            LexError::BadRegex { offset: 0, .. }
        ));
    }

    #[test]
    fn test_lex_json_literal() {
        let toks = syms(r#"j`[1, {"a": null}]`"#);
        assert_eq!(toks, vec![Token::Json(jnode!([1, {"a": null}]))]);
        assert!(matches!(
            lex("j`{nope`").unwrap_err(),
            LexError::BadJsonLiteral { offset: 0, .. }
        ));
    }

    #[test]
    fn test_lex_keywords_and_registries() {
        assert_eq!(
            syms("true false null"),
            vec![
                Token::Json(jnode!(true)),
                Token::Json(jnode!(false)),
                Token::Json(JNode::Null),
            ]
        );
        // word binops resolve to their symbolic entries
        match &syms("and or xor")[..] {
            [Token::Binop(a), Token::Binop(o), Token::Binop(x)] => {
                assert_eq!(a.sym, "&");
                assert_eq!(o.sym, "|");
                assert_eq!(x.sym, "^");
            }
            other => panic!("expected three binops, got {:?}", other),
        }
        // function names resolve to registry references
        assert!(matches!(&syms("sort_by")[0], Token::Func(f) if f.name == "sort_by"));
        // unknown words are plain identifiers
        assert_eq!(syms("foo_bar1"), vec![Token::Ident(Rc::from("foo_bar1"))]);
    }

    #[test]
    fn test_lex_operators() {
        let toks = syms("+ - * ** / // % == != < <= > >= =~ & | ^");
        let expected = [
            "+", "-", "*", "**", "/", "//", "%", "==", "!=", "<", "<=", ">", ">=", "=~", "&",
            "|", "^",
        ];
        assert_eq!(toks.len(), expected.len());
        for (tok, sym) in toks.iter().zip(expected) {
            assert!(matches!(tok, Token::Binop(b) if b.sym == sym), "bad token for {}", sym);
        }
    }

    #[test]
    fn test_lex_delimiters() {
        assert_eq!(
            syms("@.a..b[*]{},:()"),
            vec![
                Token::At,
                Token::Dot,
                Token::Ident(Rc::from("a")),
                Token::DotDot,
                Token::Ident(Rc::from("b")),
                Token::LBracket,
                Lexer::binop_token("*"),
                Token::RBracket,
                Token::LBrace,
                Token::RBrace,
                Token::Comma,
                Token::Colon,
                Token::LParen,
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_lex_error_offsets() {
        match lex("  #").unwrap_err() {
            LexError::UnexpectedChar { ch, offset } => {
                assert_eq!(ch, '#');
                assert_eq!(offset, 2);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(matches!(
            lex("1e+").unwrap_err(),
            LexError::BadNumber { offset: 0, .. }
        ));
    }

    #[test]
    fn test_g_and_j_only_special_before_backtick() {
        assert_eq!(syms("guzo"), vec![Token::Ident(Rc::from("guzo"))]);
        assert_eq!(syms("jub"), vec![Token::Ident(Rc::from("jub"))]);
    }
}
