use regex::Regex;

/// HTML strategy: the five characters with markup meaning.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// JS strategy: anything outside `[A-Za-z0-9,._]` becomes a `\xHH`/`\uHHHH`
/// escape, so the result is inert inside a script string in any quoting
/// context.
pub fn escape_js(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, ',' | '.' | '_') {
            out.push(ch);
            continue;
        }
        let code = ch as u32;
        if code < 0x100 {
            out.push_str(&format!("\\x{code:02X}"));
        } else if code <= 0xFFFF {
            out.push_str(&format!("\\u{code:04X}"));
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04X}", unit));
            }
        }
    }
    out
}

/// Collapses the whitespace runs between tags and trims the ends.
pub fn spaceless(input: &str) -> String {
    let between_tags = Regex::new(r">\s+<").expect("spaceless pattern is well-formed");
    between_tags.replace_all(input.trim(), "><").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escaping_covers_markup_characters() {
        assert_eq!(escape_html("<b>&\"'"), "&lt;b&gt;&amp;&quot;&#39;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn js_escaping_neutralizes_quotes_and_newlines() {
        assert_eq!(escape_js("a'b"), "a\\x27b");
        assert_eq!(escape_js("\n"), "\\x0A");
        assert_eq!(escape_js("héllo"), "h\\xE9llo");
        assert_eq!(escape_js("漢"), "\\u6F22");
    }

    #[test]
    fn spaceless_collapses_runs_between_tags() {
        assert_eq!(
            spaceless("  <div>\n  <b>x</b>\n</div> "),
            "<div><b>x</b></div>"
        );
    }
}
