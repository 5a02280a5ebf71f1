use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{Error, Location};
use crate::input::Input;
use crate::syntax::{Syntax, PUNCTUATION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Text,
    ExprBeg,
    ExprEnd,
    StatBeg,
    StatEnd,
    Operator,
    Number,
    Punc,
    Str,
    IntStrBeg,
    IntStrMid,
    IntStrEnd,
    Symbol,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenKind::Text => "text",
            TokenKind::ExprBeg => "expr_beg",
            TokenKind::ExprEnd => "expr_end",
            TokenKind::StatBeg => "stat_beg",
            TokenKind::StatEnd => "stat_end",
            TokenKind::Operator => "operator",
            TokenKind::Number => "number",
            TokenKind::Punc => "punc",
            TokenKind::Str => "string",
            TokenKind::IntStrBeg => "interpolated_string_beg",
            TokenKind::IntStrMid => "interpolated_string_mid",
            TokenKind::IntStrEnd => "interpolated_string_end",
            TokenKind::Symbol => "symbol",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub loc: Location,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Expr,
    Interp,
    Nested { depth: usize },
}

/// Mode-stacked tokenizer over a template source. The base mode (empty
/// stack) scans raw text; `{{`/`{%` push expression mode, a double quote
/// pushes interpolation mode, and `#{` inside an interpolation pushes a
/// nested expression mode whose closing `}` pops back to the interpolation
/// instead of ending the tag.
pub struct Lexer<'a> {
    input: Input<'a>,
    syntax: Arc<Syntax>,
    modes: Vec<Mode>,
    peeked: VecDeque<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, syntax: Arc<Syntax>) -> Self {
        Self {
            input: Input::new(source),
            syntax,
            modes: Vec::new(),
            peeked: VecDeque::new(),
        }
    }

    pub fn location(&mut self) -> Location {
        match self.peeked.front() {
            Some(token) => token.loc,
            None => self.input.location(),
        }
    }

    pub fn next(&mut self) -> Result<Option<Token>, Error> {
        if let Some(token) = self.peeked.pop_front() {
            return Ok(Some(token));
        }
        self.read_token()
    }

    pub fn peek(&mut self) -> Result<Option<Token>, Error> {
        if self.peeked.is_empty() {
            if let Some(token) = self.read_token()? {
                self.peeked.push_back(token);
            }
        }
        Ok(self.peeked.front().cloned())
    }

    pub fn eof(&mut self) -> Result<bool, Error> {
        Ok(self.peek()?.is_none())
    }

    /// Buffers up to `n` tokens and hands them to `f`, which returns a value
    /// plus how many of the buffered tokens to actually consume. Near the end
    /// of input the slice may be shorter than `n`.
    pub fn ahead<R>(
        &mut self,
        n: usize,
        f: impl FnOnce(&[Token]) -> (R, usize),
    ) -> Result<R, Error> {
        while self.peeked.len() < n {
            match self.read_token()? {
                Some(token) => self.peeked.push_back(token),
                None => break,
            }
        }
        let buffer: Vec<Token> = self.peeked.iter().cloned().collect();
        let (result, consume) = f(&buffer);
        for _ in 0..consume {
            self.peeked.pop_front();
        }
        Ok(result)
    }

    /// Resplits a pending `}}` close token into two single-`}` punctuation
    /// tokens: the first replaces the pending token, the second `}` is pushed
    /// back into the stream, and the lexer resumes expression mode so it is
    /// re-lexed there. The parser calls this when a hash literal's closing
    /// brace was swallowed by the tag-close match.
    pub fn resplit_close(&mut self) {
        debug_assert_eq!(self.peeked.len(), 1);
        if let Some(front) = self.peeked.front_mut() {
            debug_assert_eq!(front.kind, TokenKind::ExprEnd);
            front.kind = TokenKind::Punc;
            front.value = "}".to_string();
        }
        self.input.unread('}');
        self.modes.push(Mode::Expr);
    }

    fn token(&self, kind: TokenKind, value: impl Into<String>, loc: Location) -> Token {
        Token {
            kind,
            value: value.into(),
            loc,
        }
    }

    fn read_token(&mut self) -> Result<Option<Token>, Error> {
        match self.modes.last().copied() {
            None => self.read_text_token(),
            Some(Mode::Expr) => self.read_expr_token(false),
            Some(Mode::Nested { .. }) => self.read_expr_token(true),
            Some(Mode::Interp) => self.read_interp_token(),
        }
    }

    fn skip_whitespace(&mut self) {
        self.input.skip(&self.syntax.rx_whitespace);
    }

    /// TEXT mode: raw characters up to the next `{{`, `{%` or `{#`. A `-`
    /// right after the upcoming delimiter trims trailing whitespace off the
    /// text produced here.
    fn read_text_token(&mut self) -> Result<Option<Token>, Error> {
        loop {
            if self.input.eof() {
                return Ok(None);
            }
            let loc = self.input.location();
            let rest = self.input.rest();
            let delim = ["{{", "{%", "{#"]
                .iter()
                .filter_map(|d| rest.find(d).map(|at| (at, *d)))
                .min();
            let (text_end, delim) = match delim {
                Some((at, d)) => (at, Some(d)),
                None => (rest.len(), None),
            };
            if text_end > 0 {
                let mut text = rest[..text_end].to_string();
                if rest[text_end..].as_bytes().get(2) == Some(&b'-') {
                    // The upcoming tag wants its leading whitespace trimmed.
                    text.truncate(text.trim_end().len());
                }
                for _ in 0..rest[..text_end].chars().count() {
                    self.input.advance();
                }
                if !text.is_empty() {
                    return Ok(Some(self.token(TokenKind::Text, text, loc)));
                }
                continue;
            }
            let delim = delim.expect("cursor sits on a delimiter");
            self.input.advance();
            self.input.advance();
            if self.input.peek() == Some('-') {
                self.input.advance();
            }
            self.skip_whitespace();
            match delim {
                "{{" => {
                    self.modes.push(Mode::Expr);
                    return Ok(Some(self.token(TokenKind::ExprBeg, "{{", loc)));
                }
                "{%" => {
                    if let Some(token) = self.read_verbatim(loc)? {
                        return Ok(Some(token));
                    }
                    if self.modes.is_empty() {
                        continue; // empty verbatim block
                    }
                    return Ok(Some(self.token(TokenKind::StatBeg, "{%", loc)));
                }
                _ => {
                    self.skip_comment()?;
                    continue;
                }
            }
        }
    }

    /// Recognizes `verbatim … endverbatim` right after a consumed `{%`. The
    /// body is captured as one inert text token. Returns `None` when the tag
    /// is not a verbatim block (the caller then emits `stat_beg`); when it is
    /// a verbatim block with an empty body, the mode stack stays empty and
    /// the caller loops.
    fn read_verbatim(&mut self, loc: Location) -> Result<Option<Token>, Error> {
        let Some(open) = self.input.skip(&self.syntax.rx_verbatim_open) else {
            self.modes.push(Mode::Expr);
            return Ok(None);
        };
        if open[1].as_deref() == Some("-") {
            self.skip_whitespace();
        }
        let Some(body) = self.input.skip(&self.syntax.rx_verbatim_body) else {
            return Err(self.input.error("Unfinished verbatim block"));
        };
        let mut text = body[1].clone().unwrap_or_default();
        if body[2].as_deref() == Some("-") {
            text.truncate(text.trim_end().len());
        }
        if body[3].as_deref() == Some("-") {
            self.skip_whitespace();
        }
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.token(TokenKind::Text, text, loc)))
        }
    }

    fn skip_comment(&mut self) -> Result<(), Error> {
        let Some(groups) = self.input.skip(&self.syntax.rx_comment) else {
            return Err(self.input.error("Unfinished comment"));
        };
        let close = groups[2].clone().unwrap_or_default();
        if close.starts_with('-') {
            self.skip_whitespace();
        }
        Ok(())
    }

    fn read_expr_token(&mut self, nested: bool) -> Result<Option<Token>, Error> {
        self.skip_whitespace();
        let loc = self.input.location();
        if !nested {
            if let Some(groups) = self.input.skip(&self.syntax.rx_tag_close) {
                let matched = groups[0].clone().unwrap_or_default();
                self.modes.pop();
                if matched.starts_with('-') {
                    self.skip_whitespace();
                }
                let kind = if matched.ends_with("}}") {
                    TokenKind::ExprEnd
                } else {
                    TokenKind::StatEnd
                };
                return Ok(Some(self.token(kind, matched, loc)));
            }
        }
        let Some(ch) = self.input.peek() else {
            if nested {
                return Err(self.input.error("Unfinished string interpolation"));
            }
            return Ok(None);
        };
        if let Some(groups) = self.input.skip(&self.syntax.rx_operator) {
            let raw = groups[0].clone().unwrap_or_default();
            let value = raw.split_whitespace().collect::<Vec<_>>().join(" ");
            return Ok(Some(self.token(TokenKind::Operator, value, loc)));
        }
        if let Some(groups) = self.input.skip(&self.syntax.rx_hex_number) {
            let digits = groups[1].clone().unwrap_or_default();
            let value = u64::from_str_radix(&digits, 16)
                .map_err(|_| Error::lexical("Invalid hex literal", loc))?;
            return Ok(Some(self.token(TokenKind::Number, value.to_string(), loc)));
        }
        if let Some(groups) = self.input.skip(&self.syntax.rx_number) {
            let value = groups[0].clone().unwrap_or_default();
            return Ok(Some(self.token(TokenKind::Number, value, loc)));
        }
        if nested && (ch == '{' || ch == '}') {
            // Brace bookkeeping: the `}` that balances the opening `#{` pops
            // back to interpolation mode and is not a token.
            if let Some(Mode::Nested { depth }) = self.modes.last_mut() {
                if ch == '{' {
                    *depth += 1;
                } else if *depth > 0 {
                    *depth -= 1;
                } else {
                    self.input.advance();
                    self.modes.pop();
                    return self.read_token();
                }
            }
            self.input.advance();
            return Ok(Some(self.token(TokenKind::Punc, ch, loc)));
        }
        if PUNCTUATION.contains(ch) {
            self.input.advance();
            return Ok(Some(self.token(TokenKind::Punc, ch, loc)));
        }
        if ch == '\'' {
            let value = self.read_escaped('\'')?;
            return Ok(Some(self.token(TokenKind::Str, value, loc)));
        }
        if ch == '"' {
            self.input.advance();
            self.modes.push(Mode::Interp);
            return Ok(Some(self.token(TokenKind::IntStrBeg, "\"", loc)));
        }
        if is_symbol_start(ch) {
            let mut value = String::new();
            while let Some(ch) = self.input.peek() {
                if !is_symbol_char(ch) {
                    break;
                }
                value.push(ch);
                self.input.advance();
            }
            return Ok(Some(self.token(TokenKind::Symbol, value, loc)));
        }
        Err(self.input.error(format!("Unexpected input in expression: `{ch}`")))
    }

    /// INTERPOLATION mode: literal characters up to `#{` (emits the pending
    /// literal as a middle token and pushes nested expression mode) or the
    /// closing `"` (emits the tail literal as the end token).
    fn read_interp_token(&mut self) -> Result<Option<Token>, Error> {
        let loc = self.input.location();
        let mut literal = String::new();
        loop {
            let Some(ch) = self.input.advance() else {
                return Err(self.input.error("Unfinished string"));
            };
            match ch {
                '\\' => {
                    let Some(escaped) = self.input.advance() else {
                        return Err(self.input.error("Unfinished string"));
                    };
                    literal.push(escaped);
                }
                '"' => {
                    self.modes.pop();
                    return Ok(Some(self.token(TokenKind::IntStrEnd, literal, loc)));
                }
                '#' if self.input.peek() == Some('{') => {
                    self.input.advance();
                    self.modes.push(Mode::Nested { depth: 0 });
                    return Ok(Some(self.token(TokenKind::IntStrMid, literal, loc)));
                }
                _ => literal.push(ch),
            }
        }
    }

    fn read_escaped(&mut self, end: char) -> Result<String, Error> {
        let mut value = String::new();
        self.input.advance();
        loop {
            let Some(ch) = self.input.advance() else {
                return Err(self.input.error("Unfinished string"));
            };
            if ch == '\\' {
                let Some(escaped) = self.input.advance() else {
                    return Err(self.input.error("Unfinished string"));
                };
                value.push(escaped);
            } else if ch == end {
                return Ok(value);
            } else {
                value.push(ch);
            }
        }
    }
}

fn is_symbol_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_symbol_char(ch: char) -> bool {
    is_symbol_start(ch) || ch.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source, Arc::new(Syntax::new()));
        let mut tokens = Vec::new();
        while let Some(token) = lexer.next().expect("lexes cleanly") {
            tokens.push(token);
        }
        tokens
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn text_and_expression_modes() {
        let tokens = lex("a {{ x }} b");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Text,
                TokenKind::ExprBeg,
                TokenKind::Symbol,
                TokenKind::ExprEnd,
                TokenKind::Text,
            ]
        );
        assert_eq!(tokens[0].value, "a ");
        assert_eq!(tokens[2].value, "x");
        assert_eq!(tokens[4].value, " b");
    }

    #[test]
    fn trim_markers_strip_surrounding_whitespace() {
        let tokens = lex("A \n {{- 'x' -}} \n B");
        assert_eq!(tokens[0].value, "A");
        assert_eq!(tokens.last().unwrap().value, "B");
    }

    #[test]
    fn comments_vanish_and_support_trim() {
        let tokens = lex("a {# note #} b");
        assert_eq!(kinds(&tokens), vec![TokenKind::Text, TokenKind::Text]);
        let tokens = lex("a {# note -#}   b");
        assert_eq!(tokens[1].value, "b");
    }

    #[test]
    fn verbatim_body_is_inert_text() {
        let tokens = lex("{% verbatim %}{{ not parsed }}{% endverbatim %}");
        assert_eq!(kinds(&tokens), vec![TokenKind::Text]);
        assert_eq!(tokens[0].value, "{{ not parsed }}");
    }

    #[test]
    fn operators_prefer_longest_spelling() {
        let tokens = lex("{{ a not in b }}");
        let ops: Vec<&Token> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Operator)
            .collect();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].value, "not in");
    }

    #[test]
    fn multi_word_operator_value_is_normalized() {
        let tokens = lex("{{ a starts   with b }}");
        let op = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Operator)
            .unwrap();
        assert_eq!(op.value, "starts with");
    }

    #[test]
    fn hex_numbers_are_decimalized() {
        let tokens = lex("{{ 0x1A }}");
        let num = tokens.iter().find(|t| t.kind == TokenKind::Number).unwrap();
        assert_eq!(num.value, "26");
    }

    #[test]
    fn interpolated_strings_tokenize_in_parts() {
        let tokens = lex(r#"{{ "a#{x}b" }}"#);
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::ExprBeg,
                TokenKind::IntStrBeg,
                TokenKind::IntStrMid,
                TokenKind::Symbol,
                TokenKind::IntStrEnd,
                TokenKind::ExprEnd,
            ]
        );
        assert_eq!(tokens[2].value, "a");
        assert_eq!(tokens[4].value, "b");
    }

    #[test]
    fn nested_interpolation_tracks_braces() {
        let tokens = lex(r#"{{ "x#{ {'a': 1}['a'] }y" }}"#);
        assert!(tokens
            .iter()
            .any(|t| t.kind == TokenKind::IntStrEnd && t.value == "y"));
    }

    #[test]
    fn single_quoted_strings_unescape() {
        let tokens = lex(r"{{ 'a\'b' }}");
        let s = tokens.iter().find(|t| t.kind == TokenKind::Str).unwrap();
        assert_eq!(s.value, "a'b");
    }

    #[test]
    fn unterminated_comment_is_fatal() {
        let mut lexer = Lexer::new("x {# oops", Arc::new(Syntax::new()));
        lexer.next().unwrap();
        let err = lexer.next().unwrap_err();
        assert!(matches!(err, Error::Lexical { .. }));
    }

    #[test]
    fn unterminated_string_is_fatal() {
        let mut lexer = Lexer::new("{{ 'oops }}", Arc::new(Syntax::new()));
        lexer.next().unwrap();
        let err = lexer.next().unwrap_err();
        assert!(matches!(err, Error::Lexical { .. }));
    }

    #[test]
    fn unterminated_verbatim_is_fatal() {
        let mut lexer = Lexer::new("{% verbatim %}stuck", Arc::new(Syntax::new()));
        let err = lexer.next().unwrap_err();
        assert!(matches!(err, Error::Lexical { .. }));
    }

    #[test]
    fn resplit_turns_a_merged_close_into_two_braces() {
        let mut lexer = Lexer::new("{{ {'a':1}}}", Arc::new(Syntax::new()));
        // Consume up to the merged `}}`.
        for _ in 0..5 {
            lexer.next().unwrap();
        }
        let merged = lexer.peek().unwrap().unwrap();
        assert_eq!(merged.kind, TokenKind::ExprEnd);
        assert_eq!(merged.value, "}}");
        lexer.resplit_close();
        let first = lexer.next().unwrap().unwrap();
        assert_eq!((first.kind, first.value.as_str()), (TokenKind::Punc, "}"));
        let close = lexer.next().unwrap().unwrap();
        assert_eq!(close.kind, TokenKind::ExprEnd);
    }

    #[test]
    fn statement_tags_produce_stat_tokens() {
        let tokens = lex("{% if x %}y{% endif %}");
        assert_eq!(tokens[0].kind, TokenKind::StatBeg);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::StatEnd));
    }

    #[test]
    fn token_locations_are_one_based() {
        let tokens = lex("ab\n{{ x }}");
        let sym = tokens.iter().find(|t| t.kind == TokenKind::Symbol).unwrap();
        assert_eq!(sym.loc, Location { line: 2, column: 4 });
    }
}
