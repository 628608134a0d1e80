// Parser/compiler: token sequence → compiled query.
// A compiled query is a JNode: either a constant (the query never looks at
// its input) or a late-bound reference. Input-independent subtrees fold to
// constants while parsing.

use std::rc::Rc;

use thiserror::Error;

use crate::binop::{self, Binop};
use crate::eval::{self, EvalError};
use crate::functions::{self, ArgFunction};
use crate::indexer::{self, Indexer, IndexerKind, Projection, SlicerChild, VarnameChild};
use crate::lexer::Token;
use crate::value::{JNode, JType, Slicer};
use crate::QueryError;

/// Parse errors, carrying the token index and an expected/actual description.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unexpected end of query")]
    UnexpectedEnd,

    #[error("token {pos}: expected {expected}, found {found}")]
    Expected {
        pos: usize,
        expected: String,
        found: String,
    },

    #[error("token {pos}: {msg}")]
    InvalidSyntax { pos: usize, msg: String },

    #[error("token {pos}: bracket list cannot mix string/regex children with int/slice children")]
    MixedBracketList { pos: usize },

    #[error("function {func}, argument {index}: expected {expected}, got {got}")]
    BadFunctionArg {
        func: &'static str,
        index: usize,
        expected: JType,
        got: JType,
    },

    #[error("function {func} takes at least {min} arguments, got {got}")]
    TooFewArgs {
        func: &'static str,
        min: usize,
        got: usize,
    },

    #[error("function {func} takes at most {max} arguments, got {got}")]
    TooManyArgs {
        func: &'static str,
        max: usize,
        got: usize,
    },

    #[error("token {pos}: projection keys must be strings, got {got}")]
    BadProjectionKey { pos: usize, got: JType },
}

/// Parse a lexed query into a compiled value.
pub fn parse(toks: &[Token]) -> Result<JNode, QueryError> {
    let mut p = Parser { toks, pos: 0 };
    let root = p.parse_expr_or_scalar_func()?;
    if let Some(tok) = p.peek() {
        return Err(ParseError::Expected {
            pos: p.pos,
            expected: "end of query".to_string(),
            found: tok.to_string(),
        }
        .into());
    }
    Ok(root)
}

struct Parser<'a> {
    toks: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.toks.get(self.pos)
    }

    fn peek_at(&self, n: usize) -> Option<&'a Token> {
        self.toks.get(self.pos + n)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn err_expected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(tok) => ParseError::Expected {
                pos: self.pos,
                expected: expected.to_string(),
                found: tok.to_string(),
            },
            None => ParseError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ParseError> {
        match self.peek() {
            Some(tok) if std::mem::discriminant(tok) == std::mem::discriminant(expected) => {
                self.advance();
                Ok(())
            }
            _ => Err(self.err_expected(what)),
        }
    }

    // ── Expression-or-scalar-function: the binop loop ────────────────────────

    /// Read operands and binops alternately, resolving the tree bottom-up.
    ///
    /// Unary minus is a pending flag toggled per `-` (double minus cancels);
    /// a pending minus followed by `**` folds into the synthetic negate-power
    /// binop so `**` still binds tighter. A right-associative binop competes
    /// with the stack at a nudged-up precedence, which is what makes
    /// `2 ** 3 ** 2` group to the right.
    fn parse_expr_or_scalar_func(&mut self) -> Result<JNode, QueryError> {
        let mut ops: Vec<&'static Binop> = Vec::new();
        let mut operands: Vec<JNode> = Vec::new();

        loop {
            let mut negate = false;
            while matches!(self.peek(), Some(Token::Binop(b)) if b.sym == "-") {
                negate = !negate;
                self.advance();
            }

            let mut operand = self.parse_expr_or_scalar()?;
            let next_is_pow = matches!(self.peek(), Some(Token::Binop(b)) if b.sym == "**");
            let mut fold_negpow = false;
            if negate {
                if next_is_pow {
                    fold_negpow = true;
                } else {
                    operand = eval::apply_arg_function(functions::uminus(), vec![operand])?;
                }
            }
            operands.push(operand);

            match self.peek() {
                Some(Token::Binop(b)) => {
                    let b: &'static Binop = if fold_negpow { binop::negpow_binop() } else { *b };
                    self.advance();
                    let eff = b.effective_precedence();
                    while let Some(top) = ops.last() {
                        if eff <= top.precedence {
                            Self::reduce(&mut ops, &mut operands)?;
                        } else {
                            break;
                        }
                    }
                    ops.push(b);
                }
                _ => break,
            }
        }

        while !ops.is_empty() {
            Self::reduce(&mut ops, &mut operands)?;
        }
        Ok(operands.pop().expect("the binop loop parsed at least one operand"))
    }

    fn reduce(ops: &mut Vec<&'static Binop>, operands: &mut Vec<JNode>) -> Result<(), QueryError> {
        let op = ops.pop().expect("reduce is called with an operator on the stack");
        let right = operands.pop().expect("every stacked binop has a right operand");
        let left = operands.pop().expect("every stacked binop has a left operand");
        operands.push(eval::resolve_binop(op, left, right)?);
        Ok(())
    }

    // ── Expression-or-scalar: one atom plus its indexer chain ────────────────

    fn parse_expr_or_scalar(&mut self) -> Result<JNode, QueryError> {
        let atom = match self.peek() {
            Some(Token::LParen) => {
                self.advance();
                let e = self.parse_expr_or_scalar_func()?;
                self.expect(&Token::RParen, "')'")?;
                e
            }
            Some(Token::Func(f)) => {
                let f: &'static ArgFunction = *f;
                self.advance();
                self.parse_arg_function(f)?
            }
            Some(Token::Json(v)) => {
                let v = v.clone();
                self.advance();
                v
            }
            Some(Token::At) => {
                self.advance();
                JNode::identity()
            }
            _ => return Err(self.err_expected("an expression").into()),
        };

        let mut idxrs: Vec<Indexer> = Vec::new();
        while matches!(
            self.peek(),
            Some(Token::Dot | Token::DotDot | Token::LBracket | Token::LBrace)
        ) {
            idxrs.push(self.parse_indexer()?);
        }
        if idxrs.is_empty() {
            return Ok(atom);
        }

        match atom {
            // late-bound: defer the whole chain until the input arrives
            JNode::CurJson { func, .. } => {
                let tag = chain_out_tag(&idxrs);
                let idxrs = Rc::new(idxrs);
                Ok(JNode::cur_json(
                    tag,
                    Rc::new(move |input: &JNode| {
                        let v = func(input)?;
                        indexer::apply_indexer_chain(&v, &idxrs)
                    }),
                ))
            }
            // input-independent: index the constant right now
            constant => Ok(indexer::apply_indexer_chain(&constant, &idxrs)?),
        }
    }

    // ── Argument functions ───────────────────────────────────────────────────

    fn parse_arg_function(&mut self, f: &'static ArgFunction) -> Result<JNode, QueryError> {
        self.expect(&Token::LParen, "'(' after function name")?;
        let mut args: Vec<JNode> = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            self.advance();
        } else {
            loop {
                let arg = self.parse_slicer_aware()?;
                let permitted = f.arg_type(args.len());
                let got = arg.type_tag();
                if !got.intersects(permitted) {
                    return Err(ParseError::BadFunctionArg {
                        func: f.name,
                        index: args.len(),
                        expected: permitted,
                        got,
                    }
                    .into());
                }
                args.push(arg);
                match self.peek() {
                    Some(Token::Comma) => self.advance(),
                    Some(Token::RParen) => {
                        self.advance();
                        break;
                    }
                    _ => return Err(self.err_expected("',' or ')' in a function call").into()),
                }
            }
        }
        if args.len() < f.min_args {
            return Err(ParseError::TooFewArgs {
                func: f.name,
                min: f.min_args,
                got: args.len(),
            }
            .into());
        }
        if args.len() > f.max_args {
            return Err(ParseError::TooManyArgs {
                func: f.name,
                max: f.max_args,
                got: args.len(),
            }
            .into());
        }
        // short calls are padded with explicit null up to max arity
        if !f.is_variadic() {
            while args.len() < f.max_args {
                args.push(JNode::Null);
            }
        }
        Ok(eval::apply_arg_function(f, args)?)
    }

    // ── Indexers ─────────────────────────────────────────────────────────────

    fn parse_indexer(&mut self) -> Result<Indexer, QueryError> {
        match self.peek() {
            Some(Token::Dot) => {
                self.advance();
                self.parse_dot_indexer(false)
            }
            Some(Token::DotDot) => {
                self.advance();
                if matches!(self.peek(), Some(Token::LBracket)) {
                    self.advance();
                    self.parse_bracket_indexer(true)
                } else {
                    self.parse_dot_indexer(true)
                }
            }
            Some(Token::LBracket) => {
                self.advance();
                self.parse_bracket_indexer(false)
            }
            Some(Token::LBrace) => {
                self.advance();
                self.parse_projection()
            }
            _ => Err(self.err_expected("an indexer").into()),
        }
    }

    fn parse_dot_indexer(&mut self, recursive: bool) -> Result<Indexer, QueryError> {
        let child = match self.peek() {
            Some(Token::Ident(s)) => {
                let c = VarnameChild::Name(s.clone());
                self.advance();
                c
            }
            // a key that happens to spell a function name
            Some(Token::Func(f)) => {
                let c = VarnameChild::Name(Rc::from(f.name));
                self.advance();
                c
            }
            Some(Token::Json(JNode::Str(s))) => {
                let c = VarnameChild::Name(s.clone());
                self.advance();
                c
            }
            Some(Token::Json(JNode::Regex(re))) => {
                let c = VarnameChild::Pattern(re.clone());
                self.advance();
                c
            }
            Some(Token::Binop(b)) if b.sym == "*" => {
                self.advance();
                return if recursive {
                    Err(EvalError::NotImplemented(
                        "recursive star indexing".to_string(),
                    )
                    .into())
                } else {
                    Ok(Indexer::star())
                };
            }
            _ => return Err(self.err_expected("a key, regex, or '*'").into()),
        };
        Ok(if recursive {
            Indexer::recursive_varnames(vec![child])
        } else {
            Indexer::varnames(vec![child])
        })
    }

    fn parse_bracket_indexer(&mut self, recursive: bool) -> Result<Indexer, QueryError> {
        let start_pos = self.pos;
        if matches!(self.peek(), Some(Token::Binop(b)) if b.sym == "*")
            && matches!(self.peek_at(1), Some(Token::RBracket))
        {
            self.advance();
            self.advance();
            return if recursive {
                Err(EvalError::NotImplemented("recursive star indexing".to_string()).into())
            } else {
                Ok(Indexer::star())
            };
        }
        let mut children: Vec<JNode> = Vec::new();
        loop {
            children.push(self.parse_slicer_aware()?);
            match self.peek() {
                Some(Token::Comma) => self.advance(),
                Some(Token::RBracket) => {
                    self.advance();
                    break;
                }
                _ => return Err(self.err_expected("',' or ']' in a bracket list").into()),
            }
        }
        self.classify_bracket_children(children, recursive, start_pos)
    }

    /// A bracket list is all string/regex (object varname list), all
    /// int/slice (array slicer list), or one boolean sub-expression (filter).
    fn classify_bracket_children(
        &self,
        children: Vec<JNode>,
        recursive: bool,
        pos: usize,
    ) -> Result<Indexer, QueryError> {
        if children.len() == 1 && matches!(&children[0], JNode::Bool(_) | JNode::CurJson { .. }) {
            if recursive {
                return Err(
                    EvalError::NotImplemented("recursive boolean filtering".to_string()).into(),
                );
            }
            let mask = children.into_iter().next().expect("one child was just matched");
            return Ok(Indexer::boolean(mask));
        }
        let mut varnames = Vec::new();
        let mut slicers = Vec::new();
        for c in children {
            match c {
                JNode::Str(s) => varnames.push(VarnameChild::Name(s)),
                JNode::Regex(re) => varnames.push(VarnameChild::Pattern(re)),
                JNode::Int(i) => slicers.push(SlicerChild::Int(i)),
                JNode::Slicer(s) => slicers.push(SlicerChild::Slice(s)),
                JNode::Bool(_) | JNode::CurJson { .. } => {
                    return Err(ParseError::InvalidSyntax {
                        pos,
                        msg: "a boolean filter must be the only child of a bracket list"
                            .to_string(),
                    }
                    .into())
                }
                other => {
                    return Err(ParseError::InvalidSyntax {
                        pos,
                        msg: format!(
                            "bracket list children must be strings, regexes, ints, or slices, got {}",
                            other.type_tag()
                        ),
                    }
                    .into())
                }
            }
        }
        match (varnames.is_empty(), slicers.is_empty()) {
            (false, true) => Ok(if recursive {
                Indexer::recursive_varnames(varnames)
            } else {
                Indexer::varnames(varnames)
            }),
            (true, false) => {
                if recursive {
                    Err(EvalError::NotImplemented(
                        "recursive search for array indices and slices".to_string(),
                    )
                    .into())
                } else {
                    Ok(Indexer::slicers(slicers))
                }
            }
            _ => Err(ParseError::MixedBracketList { pos }.into()),
        }
    }

    // ── Slicers ──────────────────────────────────────────────────────────────

    /// An expression, or a slicer if colon syntax shows up (`1:`, `:3:2`, …).
    fn parse_slicer_aware(&mut self) -> Result<JNode, QueryError> {
        if matches!(self.peek(), Some(Token::Colon)) {
            return self.parse_slicer(None);
        }
        let e = self.parse_expr_or_scalar_func()?;
        if matches!(self.peek(), Some(Token::Colon)) {
            let start = self.slice_bound(e)?;
            return self.parse_slicer(Some(start));
        }
        Ok(e)
    }

    fn slice_bound(&self, e: JNode) -> Result<i64, ParseError> {
        e.as_int().ok_or_else(|| ParseError::InvalidSyntax {
            pos: self.pos,
            msg: format!("slice bounds must be ints, got {}", e.type_tag()),
        })
    }

    /// Up to three colon-separated optional integers.
    fn parse_slicer(&mut self, start: Option<i64>) -> Result<JNode, QueryError> {
        let mut parts = [start, None, None];
        let mut slot = 0;
        while matches!(self.peek(), Some(Token::Colon)) {
            self.advance();
            slot += 1;
            if slot > 2 {
                return Err(ParseError::InvalidSyntax {
                    pos: self.pos,
                    msg: "a slice takes at most three parts".to_string(),
                }
                .into());
            }
            match self.peek() {
                Some(Token::Colon | Token::RBracket | Token::Comma | Token::RParen) | None => {}
                _ => {
                    let e = self.parse_expr_or_scalar_func()?;
                    parts[slot] = Some(self.slice_bound(e)?);
                }
            }
        }
        Ok(JNode::Slicer(Slicer::new(parts[0], parts[1], parts[2])?))
    }

    // ── Projections ──────────────────────────────────────────────────────────

    fn parse_projection(&mut self) -> Result<Indexer, QueryError> {
        if self.peek_key_colon() {
            let mut pairs: Vec<(Rc<str>, JNode)> = Vec::new();
            loop {
                let key = self.parse_projection_key()?;
                let val = self.parse_expr_or_scalar_func()?;
                pairs.push((key, val));
                match self.peek() {
                    Some(Token::Comma) => self.advance(),
                    Some(Token::RBrace) => {
                        self.advance();
                        break;
                    }
                    _ => return Err(self.err_expected("',' or '}' in a projection").into()),
                }
            }
            Ok(Indexer::projection(Projection::Object(pairs)))
        } else {
            let mut children = Vec::new();
            loop {
                children.push(self.parse_expr_or_scalar_func()?);
                match self.peek() {
                    Some(Token::Comma) => self.advance(),
                    Some(Token::RBrace) => {
                        self.advance();
                        break;
                    }
                    Some(Token::Colon) => {
                        let got = children
                            .last()
                            .expect("a child was just parsed")
                            .type_tag();
                        return Err(ParseError::BadProjectionKey { pos: self.pos, got }.into());
                    }
                    _ => return Err(self.err_expected("',' or '}' in a projection").into()),
                }
            }
            Ok(Indexer::projection(Projection::Array(children)))
        }
    }

    fn peek_key_colon(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Ident(_) | Token::Func(_) | Token::Json(JNode::Str(_)))
        ) && matches!(self.peek_at(1), Some(Token::Colon))
    }

    /// `key :` at the head of an object-projection pair. Only string keys.
    fn parse_projection_key(&mut self) -> Result<Rc<str>, QueryError> {
        let key = match self.peek() {
            Some(Token::Ident(s)) => s.clone(),
            Some(Token::Func(f)) => Rc::from(f.name),
            Some(Token::Json(JNode::Str(s))) => s.clone(),
            Some(Token::Json(v)) => {
                return Err(ParseError::BadProjectionKey {
                    pos: self.pos,
                    got: v.type_tag(),
                }
                .into())
            }
            _ => return Err(self.err_expected("a string projection key").into()),
        };
        self.advance();
        self.expect(&Token::Colon, "':' after projection key")?;
        Ok(key)
    }
}

/// Output set for a late-bound indexer chain, from its last link.
fn chain_out_tag(idxrs: &[Indexer]) -> JType {
    let last = idxrs.last().expect("chain_out_tag is called on a non-empty chain");
    match &last.kind {
        IndexerKind::Proj(Projection::Array(_)) => JType::ARR,
        IndexerKind::Proj(Projection::Object(_)) => JType::OBJ,
        _ if last.singleton => JType::ANYTHING,
        IndexerKind::Slicers(_) | IndexerKind::RecursiveVarnames(_) => JType::ARR,
        _ => JType::ITERABLE,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jnode;
    use crate::lexer::lex;

    fn compile_str(q: &str) -> Result<JNode, QueryError> {
        parse(&lex(q).unwrap())
    }

    fn constant(q: &str) -> JNode {
        let v = compile_str(q).unwrap();
        assert!(!v.is_cur_json(), "query {:?} should compile to a constant", q);
        v
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(constant("2 - 4 * 3.5"), jnode!(-12.0));
        assert_eq!(constant("1 + 2"), jnode!(3));
        assert_eq!(constant("`ab` + `cd`"), jnode!("abcd"));
        assert_eq!(constant("range(2, 19, 5)"), jnode!([2, 7, 12, 17]));
    }

    #[test]
    fn test_precedence_groupings() {
        assert_eq!(constant("2 + 3 * 4"), jnode!(14));
        assert_eq!(constant("2 * 3 + 4"), jnode!(10));
        assert_eq!(constant("(2 + 3) * 4"), jnode!(20));
        assert_eq!(constant("10 - 4 - 3"), jnode!(3));
        assert_eq!(constant("2 * 3 == 6"), jnode!(true));
        assert_eq!(constant("1 == 1 & 2 == 2"), jnode!(true));
        assert_eq!(constant("1 == 2 | 3 == 3"), jnode!(true));
        assert_eq!(constant("true ^ 1 == 2"), jnode!(true));
        assert_eq!(constant("1 + 2 * 3 ** 2 - 4"), jnode!(15.0));
    }

    #[test]
    fn test_pow_is_right_associative() {
        assert_eq!(constant("2 ** 3 ** 2"), jnode!(512.0));
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(constant("-3"), jnode!(-3));
        // double minus cancels
        assert_eq!(constant("--3"), jnode!(3));
        assert_eq!(constant("1 - -2"), jnode!(3));
        // the pending minus folds into negate-power: -2 ** 2 == -(2 ** 2)
        assert_eq!(constant("-2 ** 2"), jnode!(-4.0));
        assert_eq!(constant("2 ** -1"), jnode!(0.5));
        assert_eq!(constant("2 * -3 ** 2"), jnode!(-18.0));
    }

    #[test]
    fn test_constant_indexing() {
        assert_eq!(constant("j`[1, 2, 3]`[0]"), jnode!(1));
        assert_eq!(constant("j`[1, 2, 3]`[-1]"), jnode!(3));
        assert_eq!(constant("j`[1, 2, 3]`[:2]"), jnode!([1, 2]));
        assert_eq!(constant("j`{\"a\": {\"b\": 5}}`.a.b"), jnode!(5));
        assert_eq!(constant("j`[1, 2, 3]`[@ > 1]"), jnode!([2, 3]));
        assert_eq!(constant("j`[[1, 2], [3]]`[*][0]"), jnode!([1, 3]));
        assert_eq!(
            constant("j`{\"x\": 1}`{a: @.x, b: `k`}"),
            jnode!({"a": 1, "b": "k"})
        );
    }

    #[test]
    fn test_late_bound_queries_are_cur_json() {
        assert!(compile_str("@").unwrap().is_cur_json());
        assert!(compile_str("@.foo").unwrap().is_cur_json());
        assert!(compile_str("@ + 1").unwrap().is_cur_json());
        assert!(compile_str("len(@)").unwrap().is_cur_json());
    }

    #[test]
    fn test_bracket_list_errors() {
        assert!(matches!(
            compile_str("@[`a`, 0]").unwrap_err(),
            QueryError::Parse(ParseError::MixedBracketList { .. })
        ));
        assert!(matches!(
            compile_str("@[@ > 1, 0]").unwrap_err(),
            QueryError::Parse(ParseError::InvalidSyntax { .. })
        ));
    }

    #[test]
    fn test_recursive_slicers_not_implemented() {
        for q in ["@..[0]", "@..[1:3]", "@..*", "@..[@ > 1]"] {
            assert!(
                matches!(
                    compile_str(q).unwrap_err(),
                    QueryError::Eval(EvalError::NotImplemented(_))
                ),
                "query {:?} should be not-implemented",
                q
            );
        }
    }

    #[test]
    fn test_function_arg_checking() {
        // wrong type at a position names the function and index
        match compile_str("sum(`a`)").unwrap_err() {
            QueryError::Parse(ParseError::BadFunctionArg { func, index, .. }) => {
                assert_eq!(func, "sum");
                assert_eq!(index, 0);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(matches!(
            compile_str("sum()").unwrap_err(),
            QueryError::Parse(ParseError::TooFewArgs { .. })
        ));
        assert!(matches!(
            compile_str("len(@, @)").unwrap_err(),
            QueryError::Parse(ParseError::TooManyArgs { .. })
        ));
        // a slice argument where the position admits one
        assert_eq!(constant("s_slice(`abcde`, ::2)"), jnode!("ace"));
    }

    #[test]
    fn test_projection_key_errors() {
        assert!(matches!(
            compile_str("@{1: 2}").unwrap_err(),
            QueryError::Parse(ParseError::BadProjectionKey { got, .. }) if got == JType::INT
        ));
    }

    #[test]
    fn test_slice_syntax_errors() {
        assert!(matches!(
            compile_str("@[::0]").unwrap_err(),
            QueryError::Eval(EvalError::Type(_))
        ));
        assert!(matches!(
            compile_str("@[1:2:3:4]").unwrap_err(),
            QueryError::Parse(ParseError::InvalidSyntax { .. })
        ));
        assert!(matches!(
            compile_str("@[1.5:]").unwrap_err(),
            QueryError::Parse(ParseError::InvalidSyntax { .. })
        ));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(matches!(
            compile_str("1 2").unwrap_err(),
            QueryError::Parse(ParseError::Expected { .. })
        ));
        assert!(matches!(
            compile_str("").unwrap_err(),
            QueryError::Parse(ParseError::UnexpectedEnd)
        ));
    }
}
