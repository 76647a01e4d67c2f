pub type TwigResult<T> = std::result::Result<T, TwigError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    UnclosedTag {
        close: String,
        position: usize,
    },
    UnclosedString,
    Message(String),
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnclosedTag { close, position } => {
                write!(
                    f,
                    "Unable to find closing bracket '{}' opened near template position {}",
                    close, position
                )
            }
            Self::UnclosedString => write!(f, "Unclosed string in template"),
            Self::Message(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ParseErrorKind {}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub kind: ParseErrorKind,
}

impl ParseError {
    /// Builds an error for a byte offset into `source`, computing a 1-based
    /// line and column.
    pub(crate) fn at(source: &str, offset: usize, kind: ParseErrorKind) -> Self {
        let mut line = 1;
        let mut column = 1;
        for (index, ch) in source.char_indices() {
            if index >= offset {
                break;
            }
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        Self { line, column, kind }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parse error at line {}, column {}: {}",
            self.line, self.column, self.kind
        )
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum TwigError {
    /// The template text could not be split into tokens.
    Parse(ParseError),
    /// An expression or logic tag is malformed.
    Syntax(String),
    UnknownFilter {
        name: String,
    },
    UnknownFunction {
        name: String,
    },
    UnknownTest {
        name: String,
    },
    /// Key access on `null`/`undefined` while `strict_variables` is on.
    NullKeyAccess {
        key: String,
    },
    Runtime(String),
    TemplateExists {
        id: String,
    },
    TemplateNotFound {
        location: String,
    },
    InvalidTemplateId {
        id: String,
    },
    Loader(String),
    /// A suspended extension was reached while rendering synchronously.
    AsyncInSyncMode,
    /// Wraps an error with the id of the template that raised it.
    InTemplate {
        file: String,
        source: Box<TwigError>,
    },
}

impl TwigError {
    pub(crate) fn syntax<T: Into<String>>(message: T) -> Self {
        Self::Syntax(message.into())
    }

    pub(crate) fn runtime<T: Into<String>>(message: T) -> Self {
        Self::Runtime(message.into())
    }

    /// Attaches `file` unless the error already names its template.
    pub(crate) fn in_template(self, file: Option<&str>) -> Self {
        match (self, file) {
            (err @ (Self::InTemplate { .. } | Self::AsyncInSyncMode), _) | (err, None) => err,
            (err, Some(file)) => Self::InTemplate {
                file: file.to_string(),
                source: Box::new(err),
            },
        }
    }

    /// Returns the innermost error, skipping template attribution.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::InTemplate { source, .. } => source.root_cause(),
            Self::Parse(_)
            | Self::Syntax(_)
            | Self::UnknownFilter { .. }
            | Self::UnknownFunction { .. }
            | Self::UnknownTest { .. }
            | Self::NullKeyAccess { .. }
            | Self::Runtime(_)
            | Self::TemplateExists { .. }
            | Self::TemplateNotFound { .. }
            | Self::InvalidTemplateId { .. }
            | Self::Loader(_)
            | Self::AsyncInSyncMode => self,
        }
    }
}

impl std::fmt::Display for TwigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(parse_error) => write!(f, "{}", parse_error),
            Self::Syntax(message) | Self::Runtime(message) | Self::Loader(message) => {
                write!(f, "{}", message)
            }
            Self::UnknownFilter { name } => write!(f, "Unable to find filter {}", name),
            Self::UnknownFunction { name } => write!(
                f,
                "{} function does not exist and is not defined in the context",
                name
            ),
            Self::UnknownTest { name } => write!(f, "Test {} is not defined.", name),
            Self::NullKeyAccess { key } => write!(
                f,
                "Can't access a key {} on an null or undefined object.",
                key
            ),
            Self::TemplateExists { id } => {
                write!(f, "There is already a template with the ID {}", id)
            }
            Self::TemplateNotFound { location } => {
                write!(f, "Unable to find the template {}", location)
            }
            Self::InvalidTemplateId { id } => write!(f, "{} is not a valid twig identifier", id),
            Self::AsyncInSyncMode => write!(
                f,
                "You are using Twig in sync mode in combination with async extensions."
            ),
            Self::InTemplate { file, source } => write!(f, "{} (in template {})", source, file),
        }
    }
}

impl std::error::Error for TwigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(parse_error) => Some(parse_error),
            Self::InTemplate { source, .. } => Some(source.as_ref()),
            Self::Syntax(_)
            | Self::UnknownFilter { .. }
            | Self::UnknownFunction { .. }
            | Self::UnknownTest { .. }
            | Self::NullKeyAccess { .. }
            | Self::Runtime(_)
            | Self::TemplateExists { .. }
            | Self::TemplateNotFound { .. }
            | Self::InvalidTemplateId { .. }
            | Self::Loader(_)
            | Self::AsyncInSyncMode => None,
        }
    }
}

impl From<ParseError> for TwigError {
    fn from(error: ParseError) -> Self {
        Self::Parse(error)
    }
}

impl From<regex::Error> for TwigError {
    fn from(error: regex::Error) -> Self {
        Self::Runtime(format!("Invalid regular expression: {}", error))
    }
}
