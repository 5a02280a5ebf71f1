use regex::Regex;

/// Binary operators grouped from loosest to tightest binding. The group
/// index (plus one) is the operator's precedence for the climbing parser.
/// `?`/`?:` (ternary, elvis) sit outside the ladder and are handled by the
/// parser after climbing finishes.
pub const BINARY_GROUPS: &[&[&str]] = &[
    &["or"],
    &["and"],
    &["b-or"],
    &["b-xor"],
    &["b-and"],
    &[
        "==",
        "!=",
        "<",
        ">",
        ">=",
        "<=",
        "<=>",
        "not in",
        "in",
        "matches",
        "starts with",
        "ends with",
    ],
    &[".."],
    &["+", "-"],
    &["~"],
    &["*", "/", "//", "%"],
    &["is", "is not"],
    &["**"],
    &["??"],
];

pub const UNARY_OPERATORS: &[&str] = &["not", "-", "+"];

/// `not` binds looser than the comparison group (so `not a in b` negates
/// the membership test) but tighter than `and`/`or`.
pub const NOT_PRECEDENCE: u8 = 2;

/// Operator spellings that never climb but still lex as operator tokens.
const STANDALONE_OPERATORS: &[&str] = &["?", "?:", "|", "=", "=>"];

pub const PUNCTUATION: &str = ".,:;(){}[]";

pub fn binary_precedence(op: &str) -> Option<u8> {
    for (index, group) in BINARY_GROUPS.iter().enumerate() {
        if group.contains(&op) {
            return Some(index as u8 + 1);
        }
    }
    None
}

pub fn is_unary(op: &str) -> bool {
    UNARY_OPERATORS.contains(&op)
}

/// The regexes the lexer runs against the raw input, compiled once per
/// engine. The operator regex is assembled from every registered spelling,
/// longest first, so that `**` wins over `*` and `not in` over `not`.
pub struct Syntax {
    pub rx_whitespace: Regex,
    pub rx_operator: Regex,
    pub rx_tag_close: Regex,
    pub rx_hex_number: Regex,
    pub rx_number: Regex,
    pub rx_verbatim_open: Regex,
    pub rx_verbatim_body: Regex,
    pub rx_comment: Regex,
}

impl Syntax {
    pub fn new() -> Self {
        Self {
            // The same whitespace class the original grammar used, including
            // the zero-width and typographic spaces.
            rx_whitespace: compile(
                "^[ \u{00a0}\n\r\t\u{000c}\u{000b}\u{200b}\u{2000}-\u{200a}\u{2028}\u{2029}\u{202f}\u{205f}\u{3000}\u{feff}]+",
            ),
            rx_operator: operator_regex(),
            rx_tag_close: compile(r"^-?(?:%\}|\}\})"),
            rx_hex_number: compile("^0x([0-9a-fA-F]+)"),
            rx_number: compile(r"^(?:\d+(?:\.\d+)?|\.\d+)"),
            rx_verbatim_open: compile(r"^verbatim\s*(-?)%\}"),
            rx_verbatim_body: compile(r"(?s)^(.*?)\{%(-?)\s*endverbatim\s*(-?)%\}"),
            rx_comment: compile(r"(?s)^(.*?)(-?#\})"),
        }
    }
}

impl Default for Syntax {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("lexer pattern is well-formed")
}

fn all_operators() -> Vec<&'static str> {
    let mut all: Vec<&'static str> = STANDALONE_OPERATORS.to_vec();
    all.extend(UNARY_OPERATORS);
    for group in BINARY_GROUPS {
        for op in *group {
            if !all.contains(op) {
                all.push(op);
            }
        }
    }
    all
}

fn operator_regex() -> Regex {
    let mut spellings = all_operators();
    spellings.sort_by(|a, b| b.len().cmp(&a.len()));
    let alternatives: Vec<String> = spellings.iter().map(|op| spelling_pattern(op)).collect();
    compile(&format!("^(?:{})", alternatives.join("|")))
}

/// Word operators require a trailing boundary so `in` never eats the head of
/// `index`; multi-word operators accept any internal whitespace (the token
/// value is normalized back to single spaces by the lexer).
fn spelling_pattern(op: &str) -> String {
    let wordy = op.chars().any(|c| c.is_ascii_alphabetic())
        && op
            .chars()
            .all(|c| c.is_ascii_lowercase() || c == ' ' || c == '-');
    if wordy {
        let words: Vec<&str> = op.split(' ').collect();
        format!("{}\\b", words.join("\\s+"))
    } else {
        regex::escape(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_match(input: &str) -> Option<String> {
        let syntax = Syntax::new();
        syntax
            .rx_operator
            .find(input)
            .map(|m| m.as_str().to_string())
    }

    #[test]
    fn longest_spelling_wins() {
        assert_eq!(first_match("** 2").as_deref(), Some("**"));
        assert_eq!(first_match("// 2").as_deref(), Some("//"));
        assert_eq!(first_match("<=> x").as_deref(), Some("<=>"));
        assert_eq!(first_match("<= x").as_deref(), Some("<="));
        assert_eq!(first_match("?: x").as_deref(), Some("?:"));
        assert_eq!(first_match("?? x").as_deref(), Some("??"));
    }

    #[test]
    fn word_operators_require_a_boundary() {
        assert_eq!(first_match("in x").as_deref(), Some("in"));
        assert_eq!(first_match("index"), None);
        assert_eq!(first_match("not in y").as_deref(), Some("not in"));
        assert_eq!(first_match("nothing"), None);
    }

    #[test]
    fn multi_word_operators_allow_internal_whitespace() {
        assert_eq!(
            first_match("starts   with x").as_deref(),
            Some("starts   with")
        );
        assert_eq!(first_match("is  not y").as_deref(), Some("is  not"));
    }

    #[test]
    fn precedence_orders_the_ladder() {
        let or = binary_precedence("or").unwrap();
        let and = binary_precedence("and").unwrap();
        let add = binary_precedence("+").unwrap();
        let mul = binary_precedence("*").unwrap();
        let pow = binary_precedence("**").unwrap();
        assert!(or < and);
        assert!(and < add);
        assert!(add < mul);
        assert!(mul < pow);
        assert!(binary_precedence("=").is_none());
        assert!(binary_precedence("=>").is_none());
    }
}
