use serde::Serialize;

/// 1-based line/column of a source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Fatal compile-side errors. There is no recovery: any of these aborts the
/// whole parse or compile call with no partial artifact.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("{message} ({location})")]
    Lexical { message: String, location: Location },
    #[error("{message} ({location})")]
    Syntax { message: String, location: Location },
    /// Reachable only through malformed extensions (a tag registered without
    /// a compile hook, a node kind the generic compiler does not know, an
    /// unknown operator), never through core tags on well-formed input.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn lexical(message: impl Into<String>, location: Location) -> Self {
        Error::Lexical {
            message: message.into(),
            location,
        }
    }

    pub fn syntax(message: impl Into<String>, location: Location) -> Self {
        Error::Syntax {
            message: message.into(),
            location,
        }
    }
}

/// Errors raised while executing compiled templates against a [`Runtime`].
///
/// [`Runtime`]: crate::runtime::Runtime
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("template `{0}` is not registered")]
    MissingTemplate(String),
    #[error("unknown filter `{0}`")]
    UnknownFilter(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("unknown operator `{0}`")]
    UnknownOperator(String),
    #[error("invalid regular expression: {0}")]
    InvalidRegex(String),
    #[error("{0}")]
    Type(String),
}
