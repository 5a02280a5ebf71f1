use regex::Regex;

use crate::ast::{Node, TestKind};
use crate::error::Error;
use crate::lexer::{Lexer, Token, TokenKind};
use crate::registry::TagRegistry;
use crate::syntax;

/// Matches an upcoming `{% <tag> %}` that closes an open block body, built
/// by [`Parser::end_body_predicate`]. The check looks two tokens ahead and
/// only consumes the opener (and optionally the tag symbol) on a match, so
/// a non-closing tag is left for normal statement dispatch.
pub struct EndBody {
    rx: Regex,
    consume_close: bool,
}

/// Recursive-descent parser with precedence climbing for expressions and
/// registry dispatch for statements. Tag parse hooks receive `&mut Parser`
/// as their context.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    tags: TagRegistry,
}

impl<'a> Parser<'a> {
    pub fn new(lexer: Lexer<'a>, tags: TagRegistry) -> Self {
        Self { lexer, tags }
    }

    pub fn parse(&mut self) -> Result<Node, Error> {
        self.parse_until(None)
    }

    /* -----[ token plumbing ]----- */

    pub fn peek(&mut self) -> Result<Option<Token>, Error> {
        self.lexer.peek()
    }

    pub fn eof(&mut self) -> Result<bool, Error> {
        self.lexer.eof()
    }

    pub fn next(&mut self) -> Result<Token, Error> {
        match self.lexer.next()? {
            Some(token) => Ok(token),
            None => Err(self.croak("Unexpected end of template")),
        }
    }

    fn peek_required(&mut self) -> Result<Token, Error> {
        match self.lexer.peek()? {
            Some(token) => Ok(token),
            None => Err(self.croak("Unexpected end of template")),
        }
    }

    pub fn looking_at(&mut self, kind: TokenKind) -> Result<Option<Token>, Error> {
        Ok(self.lexer.peek()?.filter(|t| t.kind == kind))
    }

    pub fn looking_at_val(&mut self, kind: TokenKind, value: &str) -> Result<bool, Error> {
        Ok(self
            .lexer
            .peek()?
            .is_some_and(|t| t.kind == kind && t.value == value))
    }

    /// Consumes a token of `kind` or fails naming the expectation and
    /// dumping the actual token with its location.
    pub fn skip(&mut self, kind: TokenKind) -> Result<Token, Error> {
        match self.lexer.peek()? {
            Some(token) if token.kind == kind => self.next(),
            other => Err(self.expecting(&kind.to_string(), other.as_ref())),
        }
    }

    pub fn skip_val(&mut self, kind: TokenKind, value: &str) -> Result<Token, Error> {
        match self.lexer.peek()? {
            Some(token) if token.kind == kind && token.value == value => self.next(),
            other => Err(self.expecting(&format!("{kind} `{value}`"), other.as_ref())),
        }
    }

    /// Consumes a symbol token and checks its spelling (`as`, `import`,
    /// `by`, …).
    pub fn expect_symbol(&mut self, word: &str) -> Result<Token, Error> {
        match self.lexer.peek()? {
            Some(token) if token.kind == TokenKind::Symbol && token.value == word => self.next(),
            other => Err(self.expecting(&format!("`{word}`"), other.as_ref())),
        }
    }

    pub fn croak(&mut self, message: impl Into<String>) -> Error {
        Error::syntax(message, self.lexer.location())
    }

    fn expecting(&mut self, expected: &str, actual: Option<&Token>) -> Error {
        let (dump, loc) = match actual {
            Some(token) => (
                format!("{} `{}`", token.kind, token.value),
                token.loc,
            ),
            None => ("end of template".to_string(), self.lexer.location()),
        };
        Error::syntax(format!("Expecting {expected}, got: {dump}"), loc)
    }

    /// Runs `f` with `overrides` layered over the current tag registry; the
    /// previous registry is back in place afterwards, error or not.
    pub fn with_tags<R>(
        &mut self,
        overrides: &TagRegistry,
        f: impl FnOnce(&mut Self) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let merged = self.tags.overlay(overrides);
        let saved = std::mem::replace(&mut self.tags, merged);
        let result = f(self);
        self.tags = saved;
        result
    }

    /* -----[ statements ]----- */

    pub fn parse_next(&mut self) -> Result<Node, Error> {
        let token = self.peek_required()?;
        match token.kind {
            TokenKind::Text => {
                self.next()?;
                Ok(Node::Text(token.value))
            }
            TokenKind::ExprBeg => {
                self.next()?;
                let expr = self.parse_expression()?;
                self.skip(TokenKind::ExprEnd)?;
                Ok(expr)
            }
            TokenKind::StatBeg => {
                self.next()?;
                let name = self.skip(TokenKind::Symbol)?;
                let Some(descriptor) = self.tags.get(&name.value).cloned() else {
                    return Err(Error::syntax(
                        format!("Tag `{}` is not supported", name.value),
                        name.loc,
                    ));
                };
                let node = (*descriptor.parse)(self)?;
                Ok(Node::Stat {
                    tag: name.value,
                    node,
                })
            }
            _ => Err(self.expecting("text, `{{` or `{%`", Some(&token))),
        }
    }

    /// Parses statements into a program node until the end predicate fires
    /// (or the input ends, when no predicate is given).
    pub fn parse_until(&mut self, until: Option<&EndBody>) -> Result<Node, Error> {
        let mut body = Vec::new();
        loop {
            if self.lexer.eof()? {
                break;
            }
            if let Some(predicate) = until {
                if self.at_end_body(predicate)? {
                    break;
                }
            }
            body.push(self.parse_next()?);
        }
        Ok(Node::Prog(body))
    }

    pub fn end_body_predicate(
        &self,
        pattern: &str,
        consume_close: bool,
    ) -> Result<EndBody, Error> {
        let rx = Regex::new(pattern)
            .map_err(|err| Error::Internal(format!("Bad end-body pattern: {err}")))?;
        Ok(EndBody { rx, consume_close })
    }

    fn at_end_body(&mut self, predicate: &EndBody) -> Result<bool, Error> {
        let matched = self.lexer.ahead(2, |tokens| {
            let closes = tokens.len() == 2
                && tokens[0].kind == TokenKind::StatBeg
                && tokens[1].kind == TokenKind::Symbol
                && predicate.rx.is_match(&tokens[1].value);
            if closes {
                (true, if predicate.consume_close { 2 } else { 1 })
            } else {
                (false, 0)
            }
        })?;
        if matched && predicate.consume_close {
            self.skip(TokenKind::StatEnd)?;
        }
        Ok(matched)
    }

    /* -----[ expressions ]----- */

    pub fn parse_expression(&mut self) -> Result<Node, Error> {
        let atom = self.parse_atom()?;
        let expr = self.maybe_binary(atom, 0)?;
        self.maybe_ternary(expr)
    }

    fn maybe_binary(&mut self, mut left: Node, my_prec: u8) -> Result<Node, Error> {
        loop {
            let Some(token) = self.looking_at(TokenKind::Operator)? else {
                return Ok(left);
            };
            let op = token.value;
            let Some(his_prec) = syntax::binary_precedence(&op) else {
                return Ok(left);
            };
            if his_prec <= my_prec {
                return Ok(left);
            }
            self.next()?;
            if op == "is" || op == "is not" {
                left = self.parse_is(left, op == "is not", his_prec)?;
                continue;
            }
            let atom = self.parse_atom()?;
            let right = self.maybe_binary(atom, his_prec)?;
            left = Node::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn maybe_ternary(&mut self, expr: Node) -> Result<Node, Error> {
        if let Some(token) = self.looking_at(TokenKind::Operator)? {
            if token.value == "?" {
                self.next()?;
                let then = self.parse_expression()?;
                self.skip_val(TokenKind::Punc, ":")?;
                let els = self.parse_expression()?;
                return Ok(Node::Cond {
                    cond: Box::new(expr),
                    then: Box::new(then),
                    els: Box::new(els),
                });
            }
            if token.value == "?:" {
                self.next()?;
                let right = self.parse_expression()?;
                return Ok(Node::Binary {
                    op: "?:".to_string(),
                    left: Box::new(expr),
                    right: Box::new(right),
                });
            }
        }
        Ok(expr)
    }

    /// The right side of `is`/`is not`: a fixed keyword test when the next
    /// symbol names one, otherwise a normal expression compared for
    /// identity.
    fn parse_is(&mut self, left: Node, negated: bool, is_prec: u8) -> Result<Node, Error> {
        if let Some(token) = self.looking_at(TokenKind::Symbol)? {
            let simple = match token.value.as_str() {
                "constant" => {
                    return Err(Error::syntax(
                        "The `constant` test is not supported",
                        token.loc,
                    ))
                }
                "defined" => Some(TestKind::Defined),
                "empty" => Some(TestKind::Empty),
                "even" => Some(TestKind::Even),
                "iterable" => Some(TestKind::Iterable),
                "null" => Some(TestKind::Null),
                "odd" => Some(TestKind::Odd),
                "divisible" => {
                    self.next()?;
                    self.expect_symbol("by")?;
                    let arg = self.parse_atom()?;
                    return Ok(Node::Test {
                        expr: Box::new(left),
                        test: TestKind::DivisibleBy,
                        arg: Some(Box::new(arg)),
                        negated,
                    });
                }
                "same" => {
                    self.next()?;
                    self.expect_symbol("as")?;
                    let arg = self.parse_atom()?;
                    return Ok(Node::Test {
                        expr: Box::new(left),
                        test: TestKind::SameAs,
                        arg: Some(Box::new(arg)),
                        negated,
                    });
                }
                _ => None,
            };
            if let Some(test) = simple {
                self.next()?;
                return Ok(Node::Test {
                    expr: Box::new(left),
                    test,
                    arg: None,
                    negated,
                });
            }
        }
        let atom = self.parse_atom()?;
        let right = self.maybe_binary(atom, is_prec)?;
        Ok(Node::Binary {
            op: if negated { "is not" } else { "is" }.to_string(),
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn parse_atom(&mut self) -> Result<Node, Error> {
        let token = self.peek_required()?;
        let atom = match token.kind {
            TokenKind::Punc if token.value == "(" => self.parse_paren()?,
            TokenKind::Punc if token.value == "{" => self.parse_hash()?,
            TokenKind::Punc if token.value == "[" => {
                Node::Array(self.delimited("[", "]", ",", |p| p.parse_expression())?)
            }
            TokenKind::Symbol => self.parse_symbol()?,
            TokenKind::Number => {
                let token = self.next()?;
                let value: f64 = token
                    .value
                    .parse()
                    .map_err(|_| Error::syntax("Invalid number literal", token.loc))?;
                Node::Num(value)
            }
            TokenKind::Str => Node::Str(self.next()?.value),
            TokenKind::IntStrBeg => self.parse_interpolated()?,
            TokenKind::Operator if syntax::is_unary(&token.value) => {
                self.next()?;
                let expr = if token.value == "not" {
                    // `not` binds looser than the comparison group, so
                    // `not a in b` negates the membership test.
                    let atom = self.parse_atom()?;
                    self.maybe_binary(atom, syntax::NOT_PRECEDENCE)?
                } else {
                    self.parse_atom()?
                };
                Node::Unary {
                    op: token.value,
                    expr: Box::new(expr),
                }
            }
            _ => return Err(self.expecting("an expression", Some(&token))),
        };
        self.maybe_postfix(atom)
    }

    /// A parenthesized expression or tuple; immediately followed by `=>` it
    /// becomes a lambda whose parameters must all be plain symbols.
    fn parse_paren(&mut self) -> Result<Node, Error> {
        self.skip_val(TokenKind::Punc, "(")?;
        let mut items = vec![self.parse_expression()?];
        let mut tuple = false;
        while self.looking_at_val(TokenKind::Punc, ",")? {
            self.next()?;
            tuple = true;
            if self.looking_at_val(TokenKind::Punc, ")")? {
                break;
            }
            items.push(self.parse_expression()?);
        }
        self.skip_val(TokenKind::Punc, ")")?;
        if self.looking_at_val(TokenKind::Operator, "=>")? {
            let arrow = self.next()?;
            let mut params = Vec::new();
            for item in &items {
                match item {
                    Node::Symbol(name) => params.push(name.clone()),
                    _ => {
                        return Err(Error::syntax(
                            "Lambda parameters must be plain names",
                            arrow.loc,
                        ))
                    }
                }
            }
            let body = self.parse_expression()?;
            return Ok(Node::Lambda {
                params,
                body: Box::new(body),
            });
        }
        if tuple {
            Ok(Node::Prog(items))
        } else {
            Ok(items.pop().expect("paren group holds one expression"))
        }
    }

    fn maybe_postfix(&mut self, mut expr: Node) -> Result<Node, Error> {
        loop {
            if self.looking_at_val(TokenKind::Punc, "(")? {
                let args = self.delimited("(", ")", ",", |p| p.parse_expression())?;
                expr = Node::Call {
                    func: Box::new(expr),
                    args,
                };
            } else if self.looking_at_val(TokenKind::Punc, "[")? {
                expr = self.parse_index_or_slice(expr)?;
            } else if self.looking_at_val(TokenKind::Punc, ".")? {
                self.next()?;
                let prop = self.skip(TokenKind::Symbol)?;
                expr = Node::Index {
                    expr: Box::new(expr),
                    prop: Box::new(Node::Str(prop.value)),
                };
            } else if self.looking_at_val(TokenKind::Operator, "|")? {
                self.next()?;
                let name = self.skip(TokenKind::Symbol)?.value;
                let args = if self.looking_at_val(TokenKind::Punc, "(")? {
                    self.delimited("(", ")", ",", |p| p.parse_expression())?
                } else {
                    Vec::new()
                };
                expr = Node::Filter {
                    expr: Box::new(expr),
                    name,
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// `[expr]` indexes; a `:` where the index (or anything after `[`) was
    /// expected turns the postfix into a slice.
    fn parse_index_or_slice(&mut self, expr: Node) -> Result<Node, Error> {
        self.skip_val(TokenKind::Punc, "[")?;
        if self.looking_at_val(TokenKind::Punc, ":")? {
            self.next()?;
            let len = self.parse_slice_len()?;
            self.skip_val(TokenKind::Punc, "]")?;
            return Ok(Node::Slice {
                expr: Box::new(expr),
                start: None,
                len,
            });
        }
        let first = self.parse_expression()?;
        if self.looking_at_val(TokenKind::Punc, ":")? {
            self.next()?;
            let len = self.parse_slice_len()?;
            self.skip_val(TokenKind::Punc, "]")?;
            return Ok(Node::Slice {
                expr: Box::new(expr),
                start: Some(Box::new(first)),
                len,
            });
        }
        self.skip_val(TokenKind::Punc, "]")?;
        Ok(Node::Index {
            expr: Box::new(expr),
            prop: Box::new(first),
        })
    }

    fn parse_slice_len(&mut self) -> Result<Option<Box<Node>>, Error> {
        if self.looking_at_val(TokenKind::Punc, "]")? {
            Ok(None)
        } else {
            Ok(Some(Box::new(self.parse_expression()?)))
        }
    }

    fn parse_symbol(&mut self) -> Result<Node, Error> {
        let token = self.next()?;
        Ok(match token.value.as_str() {
            "true" => Node::Bool(true),
            "false" => Node::Bool(false),
            "null" => Node::Null,
            _ => Node::Symbol(token.value),
        })
    }

    fn parse_hash(&mut self) -> Result<Node, Error> {
        let entries = self.delimited("{", "}", ",", |p| p.parse_hash_entry())?;
        Ok(Node::Hash(entries))
    }

    fn parse_hash_entry(&mut self) -> Result<(Node, Node), Error> {
        let key = if let Some(token) = self.looking_at(TokenKind::Symbol)? {
            self.next()?;
            Node::Str(token.value)
        } else {
            self.parse_expression()?
        };
        self.skip_val(TokenKind::Punc, ":")?;
        let value = self.parse_expression()?;
        Ok((key, value))
    }

    /// Alternating literal and expression parts. A lone literal collapses to
    /// a plain string; multiple parts fold into a right-nested `~` chain. A
    /// non-empty tail literal (or an otherwise empty string) is always
    /// represented.
    fn parse_interpolated(&mut self) -> Result<Node, Error> {
        self.skip(TokenKind::IntStrBeg)?;
        let mut parts: Vec<Node> = Vec::new();
        loop {
            let token = self.peek_required()?;
            match token.kind {
                TokenKind::IntStrMid => {
                    self.next()?;
                    if !token.value.is_empty() {
                        parts.push(Node::Str(token.value));
                    }
                    parts.push(self.parse_expression()?);
                }
                TokenKind::IntStrEnd => {
                    self.next()?;
                    if !token.value.is_empty() || parts.is_empty() {
                        parts.push(Node::Str(token.value));
                    }
                    break;
                }
                _ => return Err(self.expecting("interpolated string part", Some(&token))),
            }
        }
        let mut folded = parts.pop().expect("interpolation has at least one part");
        while let Some(part) = parts.pop() {
            folded = Node::Binary {
                op: "~".to_string(),
                left: Box::new(part),
                right: Box::new(folded),
            };
        }
        Ok(folded)
    }

    /* -----[ shared helpers for tag parsers ]----- */

    pub fn delimited<T>(
        &mut self,
        start: &str,
        stop: &str,
        sep: &str,
        mut item: impl FnMut(&mut Self) -> Result<T, Error>,
    ) -> Result<Vec<T>, Error> {
        self.skip_val(TokenKind::Punc, start)?;
        let mut items = Vec::new();
        let mut first = true;
        loop {
            if self.lexer.eof()? {
                break;
            }
            self.maybe_resplit(stop)?;
            if self.looking_at_val(TokenKind::Punc, stop)? {
                break;
            }
            if first {
                first = false;
            } else {
                self.skip_val(TokenKind::Punc, sep)?;
            }
            self.maybe_resplit(stop)?;
            if self.looking_at_val(TokenKind::Punc, stop)? {
                break;
            }
            items.push(item(self)?);
        }
        self.maybe_resplit(stop)?;
        self.skip_val(TokenKind::Punc, stop)?;
        Ok(items)
    }

    /// A hash literal whose `}` was merged with a following `}` into one
    /// `}}` close token gets the token resplit into two `}` puncs.
    fn maybe_resplit(&mut self, stop: &str) -> Result<(), Error> {
        if stop != "}" {
            return Ok(());
        }
        if let Some(token) = self.lexer.peek()? {
            if token.kind == TokenKind::ExprEnd && token.value == "}}" {
                self.lexer.resplit_close();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TagNode;
    use crate::lexer::Lexer;
    use crate::syntax::Syntax;
    use crate::tags;
    use std::sync::Arc;

    fn parse(source: &str) -> Node {
        try_parse(source).expect("parses cleanly")
    }

    fn try_parse(source: &str) -> Result<Node, Error> {
        let lexer = Lexer::new(source, Arc::new(Syntax::new()));
        Parser::new(lexer, tags::core_tags()).parse()
    }

    fn parse_expr(source: &str) -> Node {
        match parse(&format!("{{{{ {source} }}}}")) {
            Node::Prog(mut body) => body.pop().expect("one expression"),
            other => panic!("expected prog, got {other:?}"),
        }
    }

    fn sym(name: &str) -> Box<Node> {
        Box::new(Node::Symbol(name.to_string()))
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let node = parse_expr("1 + 2 * 3");
        assert_eq!(
            node,
            Node::Binary {
                op: "+".to_string(),
                left: Box::new(Node::Num(1.0)),
                right: Box::new(Node::Binary {
                    op: "*".to_string(),
                    left: Box::new(Node::Num(2.0)),
                    right: Box::new(Node::Num(3.0)),
                }),
            }
        );
    }

    #[test]
    fn not_negates_the_whole_membership_test() {
        let node = parse_expr("not a in b");
        assert_eq!(
            node,
            Node::Unary {
                op: "not".to_string(),
                expr: Box::new(Node::Binary {
                    op: "in".to_string(),
                    left: sym("a"),
                    right: sym("b"),
                }),
            }
        );
    }

    #[test]
    fn power_is_tighter_than_multiplication() {
        let node = parse_expr("2 * 3 ** 4");
        let Node::Binary { op, right, .. } = node else {
            panic!("expected binary");
        };
        assert_eq!(op, "*");
        assert!(matches!(*right, Node::Binary { ref op, .. } if op == "**"));
    }

    #[test]
    fn ternary_and_elvis_parse() {
        assert!(matches!(parse_expr("a ? b : c"), Node::Cond { .. }));
        let node = parse_expr("a ?: b");
        assert!(matches!(node, Node::Binary { ref op, .. } if op == "?:"));
    }

    #[test]
    fn postfixes_chain_in_any_order() {
        let node = parse_expr("a.b[0](1)|upper");
        let Node::Filter { name, expr, .. } = node else {
            panic!("expected filter");
        };
        assert_eq!(name, "upper");
        assert!(matches!(*expr, Node::Call { .. }));
    }

    #[test]
    fn slices_cover_all_three_forms() {
        assert!(matches!(
            parse_expr("a[:2]"),
            Node::Slice { start: None, len: Some(_), .. }
        ));
        assert!(matches!(
            parse_expr("a[1:]"),
            Node::Slice { start: Some(_), len: None, .. }
        ));
        assert!(matches!(
            parse_expr("a[1:2]"),
            Node::Slice { start: Some(_), len: Some(_), .. }
        ));
        assert!(matches!(parse_expr("a[1]"), Node::Index { .. }));
    }

    #[test]
    fn keyword_tests_parse_and_constant_is_rejected() {
        assert!(matches!(
            parse_expr("a is defined"),
            Node::Test { test: TestKind::Defined, negated: false, .. }
        ));
        assert!(matches!(
            parse_expr("a is not empty"),
            Node::Test { test: TestKind::Empty, negated: true, .. }
        ));
        assert!(matches!(
            parse_expr("a is divisible by 3"),
            Node::Test { test: TestKind::DivisibleBy, arg: Some(_), .. }
        ));
        assert!(matches!(
            parse_expr("a is same as b"),
            Node::Test { test: TestKind::SameAs, arg: Some(_), .. }
        ));
        assert!(try_parse("{{ a is constant('X') }}").is_err());
    }

    #[test]
    fn is_with_expression_right_side_compares_identity() {
        let node = parse_expr("a is b");
        assert!(matches!(node, Node::Binary { ref op, .. } if op == "is"));
    }

    #[test]
    fn lambdas_require_symbol_parameters() {
        let node = parse_expr("(a, b) => a + b");
        let Node::Lambda { params, .. } = node else {
            panic!("expected lambda");
        };
        assert_eq!(params, vec!["a".to_string(), "b".to_string()]);
        assert!(try_parse("{{ (a + 1) => a }}").is_err());
    }

    #[test]
    fn true_false_null_fold_to_literals() {
        assert_eq!(parse_expr("true"), Node::Bool(true));
        assert_eq!(parse_expr("null"), Node::Null);
    }

    #[test]
    fn interpolation_collapses_and_folds() {
        assert_eq!(parse_expr(r#""plain""#), Node::Str("plain".to_string()));
        assert_eq!(parse_expr(r#""""#), Node::Str(String::new()));
        let node = parse_expr(r#""a#{x}b""#);
        let Node::Binary { op, left, right } = node else {
            panic!("expected concat chain");
        };
        assert_eq!(op, "~");
        assert_eq!(*left, Node::Str("a".to_string()));
        assert!(matches!(*right, Node::Binary { ref op, .. } if op == "~"));
    }

    #[test]
    fn hash_keys_may_be_symbols_strings_or_expressions() {
        let node = parse_expr("{a: 1, 'b': 2, (c): 3}");
        let Node::Hash(entries) = node else {
            panic!("expected hash");
        };
        assert_eq!(entries[0].0, Node::Str("a".to_string()));
        assert_eq!(entries[1].0, Node::Str("b".to_string()));
        assert_eq!(entries[2].0, Node::Symbol("c".to_string()));
    }

    #[test]
    fn merged_hash_close_is_resplit() {
        let node = parse_expr("{a: {b: 1}}");
        assert!(matches!(node, Node::Hash(_)));
        // No space before the tag close: the lexer first sees `}}` as a
        // close token and the parser has to resplit it, twice.
        let prog = parse("{{ {a: {b: 1}}}}");
        let Node::Prog(body) = prog else {
            panic!("expected prog")
        };
        assert!(matches!(body[0], Node::Hash(_)));
    }

    #[test]
    fn unknown_tags_are_fatal() {
        let err = try_parse("{% bogus %}").unwrap_err();
        assert!(matches!(err, Error::Syntax { ref message, .. } if message.contains("bogus")));
    }

    #[test]
    fn unexpected_tokens_name_the_expectation() {
        let err = try_parse("{{ a b }}").unwrap_err();
        assert!(
            matches!(err, Error::Syntax { ref message, .. } if message.contains("Expecting")),
            "got: {err:?}"
        );
    }

    #[test]
    fn if_tag_parses_elseif_chains() {
        let node = parse("{% if a %}1{% elseif b %}2{% else %}3{% endif %}");
        let Node::Prog(body) = node else {
            panic!("expected prog")
        };
        let Node::Stat { tag, node } = &body[0] else {
            panic!("expected stat");
        };
        assert_eq!(tag, "if");
        let TagNode::If { els: Some(els), .. } = node else {
            panic!("expected else branch");
        };
        assert!(matches!(**els, Node::Stat { ref tag, .. } if tag == "if"));
    }

    #[test]
    fn statements_inside_expressions_are_rejected() {
        assert!(try_parse("{{ {% if x %} }}").is_err());
    }
}
