use regex::Regex;

use crate::error::{Error, Location};

/// Character cursor over source text with line/column tracking and
/// regex-based lookahead/skip primitives. All regexes handed to [`skip`] and
/// [`looking_at`] must be anchored with `^`; matching happens against the
/// unread remainder of the input.
///
/// [`skip`]: Input::skip
/// [`looking_at`]: Input::looking_at
pub struct Input<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Input<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn location(&self) -> Location {
        Location {
            line: self.line,
            column: self.column,
        }
    }

    pub fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    pub fn eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    /// Steps back over one just-consumed character. Only valid for
    /// non-newline characters; used by the lexer to resplit a merged `}}`.
    pub fn unread(&mut self, ch: char) {
        debug_assert!(ch != '\n');
        self.pos -= ch.len_utf8();
        self.column = self.column.saturating_sub(1);
    }

    pub fn looking_at(&self, re: &Regex) -> bool {
        re.is_match(self.rest())
    }

    /// Matches `re` at the cursor and consumes the match. Returns the capture
    /// groups (group 0 first) or `None` when the regex does not match or
    /// matches the empty string.
    pub fn skip(&mut self, re: &Regex) -> Option<Vec<Option<String>>> {
        let caps = re.captures(self.rest())?;
        let whole = caps.get(0).expect("group 0 always present");
        if whole.range().is_empty() {
            return None;
        }
        let groups = caps
            .iter()
            .map(|g| g.map(|m| m.as_str().to_string()))
            .collect();
        let end = whole.end();
        let mut consumed = 0;
        while consumed < end {
            let ch = self.advance().expect("match lies within the remainder");
            consumed += ch.len_utf8();
        }
        Some(groups)
    }

    pub fn error(&self, message: impl Into<String>) -> Error {
        Error::lexical(message, self.location())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_tracks_lines_and_columns() {
        let mut input = Input::new("ab\ncd");
        assert_eq!(input.location(), Location { line: 1, column: 1 });
        input.advance();
        input.advance();
        input.advance();
        assert_eq!(input.location(), Location { line: 2, column: 1 });
        input.advance();
        assert_eq!(input.location(), Location { line: 2, column: 2 });
    }

    #[test]
    fn skip_consumes_anchored_matches_only() {
        let re = Regex::new(r"^\d+").unwrap();
        let mut input = Input::new("42abc");
        let groups = input.skip(&re).expect("digits at cursor");
        assert_eq!(groups[0].as_deref(), Some("42"));
        assert_eq!(input.rest(), "abc");
        assert!(input.skip(&re).is_none());
    }

    #[test]
    fn skip_rejects_empty_matches() {
        let re = Regex::new(r"^\d*").unwrap();
        let mut input = Input::new("abc");
        assert!(input.skip(&re).is_none());
    }

    #[test]
    fn unread_steps_back_one_char() {
        let mut input = Input::new("}}");
        input.advance();
        input.advance();
        assert!(input.eof());
        input.unread('}');
        assert_eq!(input.rest(), "}");
    }
}
